use serde::Serialize;
use tracing::debug;

use crate::config::Config;
use crate::connectors::graph_api::{OUTLOOK_IMAP_HOST, OUTLOOK_IMAP_PORT};
use crate::connectors::icloud::{ICLOUD_IMAP_HOST, ICLOUD_IMAP_PORT};
use crate::connectors::imap::{resolve_secret, ImapConnector, ImapTarget, DEFAULT_IMAP_PORT};
use crate::connectors::{http_client, GmailApiConnector, GraphApiConnector};
use crate::db::models::Provider;

/// Credentials to try, as given by the caller. Nothing here is read from or
/// written to the store.
#[derive(Debug, Clone, Default)]
pub struct CheckRequest {
    pub provider: Option<Provider>,
    pub email: Option<String>,
    pub password: Option<String>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub access_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    pub success: bool,
    pub message: String,
}

impl CheckResult {
    fn ok(message: &str) -> Self {
        Self {
            success: true,
            message: message.to_string(),
        }
    }

    fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// Lightweight connectivity check for one credential shape.
pub async fn check_connection(config: &Config, request: &CheckRequest) -> CheckResult {
    let token = non_empty(request.access_token.as_deref());
    let password = non_empty(request.password.as_deref());

    match (request.provider, token, password) {
        (Some(Provider::Gmail), Some(token), _) => {
            let connector = GmailApiConnector::new(http_client(config), config);
            token_result(connector.check_token(token).await, "Gmail connected")
        }
        (Some(Provider::Outlook), Some(token), _) => {
            let connector = GraphApiConnector::new(http_client(config), config);
            token_result(connector.check_token(token).await, "Outlook connected")
        }
        (Some(Provider::Outlook), None, Some(_)) => {
            check_imap(config, request, "Outlook IMAP", OUTLOOK_IMAP_HOST, OUTLOOK_IMAP_PORT).await
        }
        (Some(Provider::Icloud), _, Some(_)) => {
            check_imap(config, request, "iCloud IMAP", ICLOUD_IMAP_HOST, ICLOUD_IMAP_PORT).await
        }
        (Some(Provider::Imap), _, Some(_)) => match non_empty(request.host.as_deref()) {
            Some(host) => {
                let port = request.port.unwrap_or(DEFAULT_IMAP_PORT);
                check_imap(config, request, "IMAP", host, port).await
            }
            None => CheckResult::failed("IMAP host not configured"),
        },
        _ => CheckResult::failed("unsupported provider for test"),
    }
}

fn token_result<E: std::fmt::Display>(result: Result<bool, E>, connected: &str) -> CheckResult {
    match result {
        Ok(true) => CheckResult::ok(connected),
        Ok(false) => CheckResult::failed("invalid token"),
        Err(e) => {
            debug!(error = %e, "token check failed");
            CheckResult::failed(e.to_string())
        }
    }
}

async fn check_imap(
    config: &Config,
    request: &CheckRequest,
    label: &'static str,
    host: &str,
    port: u16,
) -> CheckResult {
    let Some(address) = non_empty(request.email.as_deref()) else {
        return CheckResult::failed("email address required for IMAP test");
    };
    let password = match resolve_secret(request.password.as_deref()) {
        Ok(password) => password,
        Err(e) => return CheckResult::failed(e.to_string()),
    };

    let target = ImapTarget {
        label,
        host: host.to_string(),
        port,
        address: address.to_string(),
        password,
    };
    match ImapConnector::new(config).check_login(&target).await {
        Ok(()) => CheckResult::ok("IMAP connected"),
        Err(e) => CheckResult::failed(e.to_string()),
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::Router;

    use super::{check_connection, CheckRequest};
    use crate::config::Config;
    use crate::db::models::Provider;

    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind mock server");
        let addr = listener.local_addr().expect("mock addr");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("serve mock");
        });
        format!("http://{addr}")
    }

    async fn authorize(headers: HeaderMap) -> StatusCode {
        match headers.get("authorization").and_then(|v| v.to_str().ok()) {
            Some("Bearer good") => StatusCode::OK,
            _ => StatusCode::UNAUTHORIZED,
        }
    }

    #[tokio::test]
    async fn token_checks_report_connected_or_invalid() {
        let base = serve(
            Router::new()
                .route("/gmail/users/me/profile", get(authorize))
                .route("/graph/me", get(authorize)),
        )
        .await;
        let config = Config {
            gmail_api_base: format!("{base}/gmail"),
            graph_api_base: format!("{base}/graph"),
            ..Config::default()
        };

        let gmail = check_connection(
            &config,
            &CheckRequest {
                provider: Some(Provider::Gmail),
                access_token: Some("good".to_string()),
                ..CheckRequest::default()
            },
        )
        .await;
        assert!(gmail.success);
        assert_eq!(gmail.message, "Gmail connected");

        let outlook = check_connection(
            &config,
            &CheckRequest {
                provider: Some(Provider::Outlook),
                access_token: Some("stale".to_string()),
                ..CheckRequest::default()
            },
        )
        .await;
        assert!(!outlook.success);
        assert_eq!(outlook.message, "invalid token");
    }

    #[tokio::test]
    async fn unknown_shapes_are_unsupported() {
        let config = Config::default();
        let result = check_connection(
            &config,
            &CheckRequest {
                provider: Some(Provider::Gmail),
                ..CheckRequest::default()
            },
        )
        .await;
        assert!(!result.success);
        assert_eq!(result.message, "unsupported provider for test");

        let result = check_connection(&config, &CheckRequest::default()).await;
        assert_eq!(result.message, "unsupported provider for test");
    }

    #[tokio::test]
    async fn imap_check_needs_a_host() {
        let result = check_connection(
            &Config::default(),
            &CheckRequest {
                provider: Some(Provider::Imap),
                email: Some("me@example.com".to_string()),
                password: Some("secret".to_string()),
                ..CheckRequest::default()
            },
        )
        .await;
        assert!(!result.success);
        assert_eq!(result.message, "IMAP host not configured");
    }
}
