use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::OAuthClient;
use crate::connectors::address::redact_response_body;

#[derive(Debug, Clone, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
}

/// Exchanges a refresh token for a fresh access token.
///
/// Best effort: any failure is logged and yields `None`, and the caller keeps
/// using the stored (possibly stale) token so the next API call fails on its
/// own if it really expired. Refreshed tokens are not written back.
pub async fn refresh_access_token(
    client: &Client,
    token_url: &str,
    oauth: Option<&OAuthClient>,
    refresh_token: Option<&str>,
    scope: Option<&str>,
) -> Option<String> {
    let (oauth, refresh_token) = match (oauth, refresh_token) {
        (Some(oauth), Some(refresh_token)) => (oauth, refresh_token),
        (None, Some(_)) => {
            debug!(token_url, "oauth client not configured, skipping token refresh");
            return None;
        }
        _ => return None,
    };

    let mut form = vec![
        ("client_id", oauth.client_id.as_str()),
        ("client_secret", oauth.client_secret.as_str()),
        ("refresh_token", refresh_token),
        ("grant_type", "refresh_token"),
    ];
    if let Some(scope) = scope {
        form.push(("scope", scope));
    }

    let response = match client.post(token_url).form(&form).send().await {
        Ok(response) => response,
        Err(e) => {
            warn!(token_url, error = %e, "token refresh request failed");
            return None;
        }
    };

    let status = response.status();
    let body = match response.text().await {
        Ok(body) => body,
        Err(e) => {
            warn!(token_url, error = %e, "read token refresh response");
            return None;
        }
    };
    if !status.is_success() {
        warn!(
            token_url,
            status = status.as_u16(),
            body = %redact_response_body(&body),
            "token refresh rejected, continuing with stored token"
        );
        return None;
    }

    match serde_json::from_str::<OAuthTokenResponse>(&body) {
        Ok(payload) if !payload.access_token.trim().is_empty() => Some(payload.access_token),
        Ok(_) => None,
        Err(e) => {
            warn!(token_url, error = %e, "decode token refresh response");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::routing::post;
    use axum::{Form, Json, Router};
    use reqwest::Client;
    use serde_json::json;
    use std::collections::HashMap;

    use super::refresh_access_token;
    use crate::config::OAuthClient;

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

    fn oauth() -> OAuthClient {
        OAuthClient {
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
        }
    }

    #[tokio::test]
    async fn refresh_returns_new_token() {
        let base = serve(Router::new().route(
            "/token",
            post(|Form(form): Form<HashMap<String, String>>| async move {
                assert_eq!(form.get("grant_type").map(String::as_str), Some("refresh_token"));
                assert_eq!(form.get("scope").map(String::as_str), Some("Mail.Read"));
                Json(json!({ "access_token": "fresh", "expires_in": 3600 }))
            }),
        ))
        .await;

        let token = refresh_access_token(
            &Client::new(),
            &format!("{base}/token"),
            Some(&oauth()),
            Some("refresh"),
            Some("Mail.Read"),
        )
        .await;
        assert_eq!(token.as_deref(), Some("fresh"));
    }

    #[tokio::test]
    async fn refresh_failure_is_silent() {
        let base = serve(Router::new().route(
            "/token",
            post(|| async {
                (
                    axum::http::StatusCode::BAD_REQUEST,
                    Json(json!({ "error": "invalid_grant" })),
                )
            }),
        ))
        .await;

        let url = format!("{base}/token");
        let client = Client::new();
        assert!(refresh_access_token(&client, &url, Some(&oauth()), Some("r"), None)
            .await
            .is_none());
        assert!(refresh_access_token(&client, &url, None, Some("r"), None)
            .await
            .is_none());
        assert!(refresh_access_token(&client, &url, Some(&oauth()), None, None)
            .await
            .is_none());
    }
}
