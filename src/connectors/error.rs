use thiserror::Error;

use crate::connectors::address::redact_response_body;
use crate::db::DbError;

/// Categorised adapter failure. The orchestrator stores the rendered message
/// on the account, so variants render the provider prefix themselves.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("{0}")]
    MissingCredentials(String),

    #[error("{provider} authentication failed: {message}")]
    Auth {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} connection failed: {message}")]
    Connection {
        provider: &'static str,
        message: String,
    },

    #[error("{provider} rate limit exhausted after {attempts} attempts: {body}")]
    Throttled {
        provider: &'static str,
        attempts: usize,
        body: String,
    },

    #[error("{provider} {operation} error {status}: {body}")]
    Provider {
        provider: &'static str,
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("json decode: {0}")]
    Json(#[from] serde_json::Error),

    #[error("imap: {0}")]
    Imap(#[from] async_imap::error::Error),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl ConnectorError {
    pub fn missing(message: impl Into<String>) -> Self {
        Self::MissingCredentials(message.into())
    }

    pub fn provider(
        provider: &'static str,
        operation: &'static str,
        status: u16,
        body: &str,
    ) -> Self {
        Self::Provider {
            provider,
            operation,
            status,
            body: redact_response_body(body),
        }
    }

    /// Credential problems that no retry will fix.
    pub fn is_terminal(&self) -> bool {
        match self {
            Self::MissingCredentials(_) | Self::Auth { .. } => true,
            Self::Provider { status, .. } => *status == 401 || *status == 403,
            _ => false,
        }
    }
}
