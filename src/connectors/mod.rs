use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::Serialize;

use crate::config::Config;
use crate::db::models::{Account, Provider};
use crate::db::Database;
use crate::message::CanonicalMessage;

pub mod address;
pub mod connection_check;
pub mod error;
pub mod gmail_api;
pub mod graph_api;
pub mod icloud;
pub mod imap;
pub mod oauth;

pub use connection_check::{check_connection, CheckRequest, CheckResult};
pub use error::ConnectorError;
pub use gmail_api::GmailApiConnector;
pub use graph_api::GraphApiConnector;
pub use icloud::IcloudConnector;
pub use imap::ImapConnector;

/// Most messages a single adapter call returns.
pub const PAGE_CAP: usize = 500;
pub const LOOKBACK_DAYS: i64 = 365;

/// What an adapter hands back for one account.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FetchOutcome {
    pub messages: Vec<CanonicalMessage>,
    /// Bodies could not be retrieved; messages carry envelope fields only.
    pub metadata_only: bool,
    /// More matching history exists beyond `PAGE_CAP`.
    pub hit_page_cap: bool,
}

/// One provider's way of reading a mailbox. Adapters may read the store
/// (credential lookups) but never write to it.
#[async_trait(?Send)]
pub trait MailConnector {
    fn provider(&self) -> Provider;

    async fn fetch(
        &self,
        db: &Database,
        account: &Account,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, ConnectorError>;
}

pub struct ConnectorRegistry {
    connectors: Vec<Box<dyn MailConnector>>,
}

impl ConnectorRegistry {
    pub fn new() -> Self {
        Self {
            connectors: Vec::new(),
        }
    }

    /// Registry with one adapter per supported provider.
    pub fn with_defaults(config: &Config) -> Self {
        let client = http_client(config);
        let mut registry = Self::new();
        registry.register(Box::new(ImapConnector::new(config)));
        registry.register(Box::new(GmailApiConnector::new(client.clone(), config)));
        registry.register(Box::new(GraphApiConnector::new(client, config)));
        registry.register(Box::new(IcloudConnector::new(config)));
        registry
    }

    /// Later registrations for the same provider replace earlier ones.
    pub fn register(&mut self, connector: Box<dyn MailConnector>) {
        let provider = connector.provider();
        self.connectors.retain(|existing| existing.provider() != provider);
        self.connectors.push(connector);
    }

    pub fn for_provider(&self, provider: Provider) -> Option<&dyn MailConnector> {
        self.connectors
            .iter()
            .find(|connector| connector.provider() == provider)
            .map(|connector| connector.as_ref())
    }

    pub fn all(&self) -> &[Box<dyn MailConnector>] {
        &self.connectors
    }
}

impl Default for ConnectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared HTTP client carrying the configured per-call timeout.
pub fn http_client(config: &Config) -> Client {
    Client::builder()
        .timeout(config.http_timeout)
        .user_agent(concat!("mailsync/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "http client builder failed, using defaults");
            Client::new()
        })
}

/// Lower bound for a fetch: the checkpoint, or one year before `now`.
pub fn lookback_start(since: Option<DateTime<Utc>>, now: DateTime<Utc>) -> DateTime<Utc> {
    since.unwrap_or_else(|| now - Duration::days(LOOKBACK_DAYS))
}
