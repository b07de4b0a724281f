use std::path::PathBuf;
use std::time::Duration;

use crate::db::{Database, DbError};

pub const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const GRAPH_API_BASE: &str = "https://graph.microsoft.com/v1.0";
pub const MICROSOFT_TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_IMAP_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: String,
}

/// Runtime settings. Every field is public so callers (and tests) can point
/// adapters somewhere else without touching the process environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: PathBuf,
    pub google: Option<OAuthClient>,
    pub microsoft: Option<OAuthClient>,
    pub gmail_api_base: String,
    pub google_token_url: String,
    pub graph_api_base: String,
    pub microsoft_token_url: String,
    pub transcription_url: Option<String>,
    pub transcription_token: Option<String>,
    pub http_timeout: Duration,
    pub imap_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, DbError> {
        let db_path = match env_string("MAILSYNC_DB_PATH") {
            Some(path) => PathBuf::from(path),
            None => Database::default_db_path()?,
        };

        Ok(Self {
            db_path,
            google: oauth_client("GOOGLE_CLIENT_ID", "GOOGLE_CLIENT_SECRET"),
            microsoft: oauth_client("MICROSOFT_CLIENT_ID", "MICROSOFT_CLIENT_SECRET"),
            gmail_api_base: env_string("MAILSYNC_GMAIL_API_BASE")
                .unwrap_or_else(|| GMAIL_API_BASE.to_string()),
            google_token_url: env_string("MAILSYNC_GOOGLE_TOKEN_URL")
                .unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
            graph_api_base: env_string("MAILSYNC_GRAPH_API_BASE")
                .unwrap_or_else(|| GRAPH_API_BASE.to_string()),
            microsoft_token_url: env_string("MAILSYNC_MICROSOFT_TOKEN_URL")
                .unwrap_or_else(|| MICROSOFT_TOKEN_URL.to_string()),
            transcription_url: env_string("MAILSYNC_TRANSCRIPTION_URL"),
            transcription_token: env_string("MAILSYNC_TRANSCRIPTION_TOKEN"),
            http_timeout: env_secs("MAILSYNC_HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?,
            imap_timeout: env_secs("MAILSYNC_IMAP_TIMEOUT_SECS", DEFAULT_IMAP_TIMEOUT_SECS)?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("mailsync.db"),
            google: None,
            microsoft: None,
            gmail_api_base: GMAIL_API_BASE.to_string(),
            google_token_url: GOOGLE_TOKEN_URL.to_string(),
            graph_api_base: GRAPH_API_BASE.to_string(),
            microsoft_token_url: MICROSOFT_TOKEN_URL.to_string(),
            transcription_url: None,
            transcription_token: None,
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS),
            imap_timeout: Duration::from_secs(DEFAULT_IMAP_TIMEOUT_SECS),
        }
    }
}

pub(crate) fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn oauth_client(id_key: &str, secret_key: &str) -> Option<OAuthClient> {
    Some(OAuthClient {
        client_id: env_string(id_key)?,
        client_secret: env_string(secret_key)?,
    })
}

fn env_secs(key: &str, default: u64) -> Result<Duration, DbError> {
    match env_string(key) {
        None => Ok(Duration::from_secs(default)),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| DbError::Config(format!("{key} must be a whole number of seconds, got {raw}"))),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{Config, GMAIL_API_BASE};

    #[test]
    fn defaults_point_at_public_endpoints() {
        let config = Config::default();
        assert_eq!(config.gmail_api_base, GMAIL_API_BASE);
        assert!(config.transcription_url.is_none());
        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.imap_timeout, Duration::from_secs(60));
    }
}
