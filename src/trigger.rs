use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::config::Config;
use crate::connectors::address::redact_response_body;

/// Payload sent downstream for each transcription message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TranscriptionJob {
    pub message_id: String,
    pub user_id: String,
    pub account: String,
}

#[derive(Debug, Error)]
pub enum TriggerError {
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("transcription trigger returned {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// One-way hand-off to the downstream processing pipeline.
#[async_trait(?Send)]
pub trait DownstreamTrigger {
    async fn fire(&self, job: &TranscriptionJob) -> Result<(), TriggerError>;
}

/// Does nothing; used when no endpoint is configured.
pub struct DisabledTrigger;

#[async_trait(?Send)]
impl DownstreamTrigger for DisabledTrigger {
    async fn fire(&self, job: &TranscriptionJob) -> Result<(), TriggerError> {
        debug!(message_id = %job.message_id, "transcription trigger disabled");
        Ok(())
    }
}

pub struct HttpTranscriptionTrigger {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpTranscriptionTrigger {
    pub fn new(client: Client, url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client,
            url: url.into(),
            token,
        }
    }
}

#[async_trait(?Send)]
impl DownstreamTrigger for HttpTranscriptionTrigger {
    async fn fire(&self, job: &TranscriptionJob) -> Result<(), TriggerError> {
        let mut request = self.client.post(&self.url).json(job);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TriggerError::Rejected {
                status: status.as_u16(),
                body: redact_response_body(&body),
            });
        }
        debug!(message_id = %job.message_id, "transcription trigger sent");
        Ok(())
    }
}

/// HTTP trigger when `transcription_url` is set, otherwise the disabled one.
pub fn from_config(config: &Config, client: Client) -> Box<dyn DownstreamTrigger> {
    match &config.transcription_url {
        Some(url) => Box::new(HttpTranscriptionTrigger::new(
            client,
            url.clone(),
            config.transcription_token.clone(),
        )),
        None => Box::new(DisabledTrigger),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use reqwest::Client;
    use serde_json::Value;

    use super::{DownstreamTrigger, HttpTranscriptionTrigger, TranscriptionJob, TriggerError};

    type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    async fn record(
        State(seen): State<Seen>,
        headers: HeaderMap,
        Json(body): Json<Value>,
    ) -> StatusCode {
        let auth = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        seen.lock().expect("lock").push((auth, body));
        StatusCode::ACCEPTED
    }

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

    fn job() -> TranscriptionJob {
        TranscriptionJob {
            message_id: "m-1".to_string(),
            user_id: "u1".to_string(),
            account: "owner@example.com".to_string(),
        }
    }

    #[tokio::test]
    async fn posts_job_with_bearer_token() {
        let seen: Seen = Arc::default();
        let base = serve(
            Router::new()
                .route("/hook", post(record))
                .with_state(seen.clone()),
        )
        .await;

        let trigger = HttpTranscriptionTrigger::new(
            Client::new(),
            format!("{base}/hook"),
            Some("t0ken".to_string()),
        );
        trigger.fire(&job()).await.expect("fire");

        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_deref(), Some("Bearer t0ken"));
        assert_eq!(seen[0].1["message_id"], "m-1");
        assert_eq!(seen[0].1["account"], "owner@example.com");
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let base = serve(Router::new().route(
            "/hook",
            post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        ))
        .await;

        let trigger = HttpTranscriptionTrigger::new(Client::new(), format!("{base}/hook"), None);
        let err = trigger.fire(&job()).await.expect_err("rejected");
        assert!(matches!(err, TriggerError::Rejected { status: 500, .. }));
    }
}
