use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::classifier::classify;
use crate::config::Config;
use crate::connectors::{http_client, ConnectorError, ConnectorRegistry, FetchOutcome};
use crate::db::models::{Account, Credentials, Provider};
use crate::db::{AccountScope, Database, DbError, PersistenceWriter, WriteMode};
use crate::message::{direction_for, preview_from, CanonicalMessage, EmailType};
use crate::trigger::{self, DownstreamTrigger, TranscriptionJob};

/// `sync_state` keys holding when the last run of each mode finished.
pub const LAST_SYNC_RUN_KEY: &str = "last_sync_run";
pub const LAST_REPROCESS_RUN_KEY: &str = "last_reprocess_run";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    Sync,
    Reprocess,
}

/// Tokens obtained by the caller (e.g. a fresh OAuth consent) to store on
/// every selected OAuth account before fetching.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreshTokens {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl FreshTokens {
    pub fn is_empty(&self) -> bool {
        self.access_token.is_none() && self.refresh_token.is_none()
    }

    fn merge_into(&self, credentials: &mut Credentials) {
        if let Some(token) = &self.access_token {
            credentials.access_token = Some(token.clone());
        }
        if let Some(token) = &self.refresh_token {
            credentials.refresh_token = Some(token.clone());
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccountResult {
    pub account_id: String,
    pub provider: Provider,
    pub email_address: String,
    pub synced: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub metadata_only: bool,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub hit_page_cap: bool,
}

impl AccountResult {
    fn failed(account: &Account, message: String) -> Self {
        Self {
            account_id: account.id.clone(),
            provider: account.provider,
            email_address: account.email_address.clone(),
            synced: 0,
            error: Some(message),
            metadata_only: false,
            hit_page_cap: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub mode: SyncMode,
    pub results: Vec<AccountResult>,
    /// Reprocess only: some account has older history beyond the page cap.
    /// Call reprocess again (or let a scheduler do it) to continue.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_more: Option<bool>,
}

impl SyncSummary {
    pub fn total_synced(&self) -> usize {
        self.results.iter().map(|r| r.synced).sum()
    }

    pub fn failures(&self) -> usize {
        self.results.iter().filter(|r| r.error.is_some()).count()
    }
}

#[derive(Debug, Error)]
enum AccountError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error("store error: {0}")]
    Store(#[from] DbError),

    #[error("no connector registered for provider {0}")]
    Unsupported(Provider),
}

struct AccountRun {
    synced: usize,
    outcome: FetchOutcome,
}

/// Drives accounts through fetch, classification and persistence, one
/// account at a time.
pub struct SyncEngine {
    registry: ConnectorRegistry,
    trigger: Box<dyn DownstreamTrigger>,
    batch_size: usize,
}

impl SyncEngine {
    pub fn new(registry: ConnectorRegistry, trigger: Box<dyn DownstreamTrigger>) -> Self {
        Self {
            registry,
            trigger,
            batch_size: crate::db::writer::DEFAULT_BATCH_SIZE,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            ConnectorRegistry::with_defaults(config),
            trigger::from_config(config, http_client(config)),
        )
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Incremental sync of every active account in `scope`.
    pub async fn run_sync(
        &self,
        db: &Database,
        scope: &AccountScope,
        tokens: &FreshTokens,
    ) -> Result<SyncSummary> {
        let accounts = db
            .list_active_accounts(scope)
            .context("list accounts to sync")?;
        info!(count = accounts.len(), "starting sync");

        let mut results = Vec::with_capacity(accounts.len());
        for mut account in accounts {
            if !tokens.is_empty() && account.provider.uses_oauth() {
                if let Err(e) = store_tokens(db, &mut account, tokens) {
                    results.push(self.record_failure(db, &account, &AccountError::from(e)));
                    continue;
                }
            }

            // messages arriving while this account is fetched are picked up next run
            let checkpoint = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

            match self.sync_account(db, &account, SyncMode::Sync).await {
                Ok(run) => {
                    if let Err(e) = db.mark_sync_success(&account.id, &checkpoint) {
                        results.push(self.record_failure(db, &account, &AccountError::from(e)));
                        continue;
                    }
                    info!(
                        account = %account.id,
                        provider = %account.provider,
                        synced = run.synced,
                        "account synced"
                    );
                    if run.outcome.hit_page_cap {
                        warn!(
                            account = %account.id,
                            provider = %account.provider,
                            "page cap reached; older messages since the previous checkpoint were not fetched"
                        );
                    }
                    self.fire_triggers(&account, &run.outcome.messages).await;
                    results.push(success(&account, &run));
                }
                Err(e) => results.push(self.record_failure(db, &account, &e)),
            }
        }

        record_run(db, SyncMode::Sync);
        Ok(SyncSummary {
            mode: SyncMode::Sync,
            results,
            has_more: None,
        })
    }

    /// Full-lookback re-fetch that overwrites stored rows with fresh
    /// classification. Stored checkpoints are left exactly as they were,
    /// even when the run fails or is dropped part way.
    pub async fn run_reprocess(&self, db: &Database, scope: &AccountScope) -> Result<SyncSummary> {
        let accounts = db
            .list_active_accounts(scope)
            .context("list accounts to reprocess")?;
        info!(count = accounts.len(), "starting reprocess");

        let mut results = Vec::with_capacity(accounts.len());
        for account in accounts {
            // cleared in memory only; the stored checkpoint is never written
            let mut cleared = account.clone();
            cleared.last_sync_at = None;

            let result = match self.sync_account(db, &cleared, SyncMode::Reprocess).await {
                Ok(run) => {
                    info!(
                        account = %account.id,
                        synced = run.synced,
                        hit_page_cap = run.outcome.hit_page_cap,
                        "account reprocessed"
                    );
                    success(&account, &run)
                }
                Err(e) => self.record_failure(db, &account, &e),
            };
            results.push(result);
        }

        let has_more = results.iter().any(|r| r.hit_page_cap);
        record_run(db, SyncMode::Reprocess);
        Ok(SyncSummary {
            mode: SyncMode::Reprocess,
            results,
            has_more: Some(has_more),
        })
    }

    async fn sync_account(
        &self,
        db: &Database,
        account: &Account,
        mode: SyncMode,
    ) -> Result<AccountRun, AccountError> {
        let connector = self
            .registry
            .for_provider(account.provider)
            .ok_or(AccountError::Unsupported(account.provider))?;

        let since = match mode {
            SyncMode::Sync => account.checkpoint(),
            SyncMode::Reprocess => None,
        };
        debug!(account = %account.id, since = ?since, ?mode, "fetching");

        let mut outcome = connector.fetch(db, account, since).await?;
        prepare_messages(&mut outcome.messages, &account.email_address);

        let write_mode = match mode {
            SyncMode::Sync => WriteMode::IgnoreDuplicates,
            SyncMode::Reprocess => WriteMode::Overwrite,
        };
        let report = PersistenceWriter::new(db)
            .with_batch_size(self.batch_size)
            .write(
                &account.user_id,
                &account.email_address,
                &outcome.messages,
                write_mode,
            )?;
        debug!(
            account = %account.id,
            written = report.written,
            skipped = report.skipped,
            "messages persisted"
        );

        Ok(AccountRun {
            synced: outcome.messages.len(),
            outcome,
        })
    }

    fn record_failure(&self, db: &Database, account: &Account, e: &AccountError) -> AccountResult {
        let message = e.to_string();
        warn!(
            account = %account.id,
            provider = %account.provider,
            error = %message,
            "account failed"
        );
        if let Err(store_err) = db.mark_sync_error(&account.id, &message) {
            error!(account = %account.id, error = %store_err, "failed to record sync error");
        }
        AccountResult::failed(account, message)
    }

    async fn fire_triggers(&self, account: &Account, messages: &[CanonicalMessage]) {
        for message in messages
            .iter()
            .filter(|m| m.email_type == EmailType::PlaudTranscription)
        {
            let Some(message_id) = message.message_id.as_deref().filter(|id| !id.trim().is_empty()) else {
                debug!(account = %account.id, "transcription message without id, not triggering");
                continue;
            };
            let job = TranscriptionJob {
                message_id: message_id.to_string(),
                user_id: account.user_id.clone(),
                account: account.email_address.clone(),
            };
            if let Err(e) = self.trigger.fire(&job).await {
                warn!(account = %account.id, message_id, error = %e, "transcription trigger failed");
            }
        }
    }
}

fn store_tokens(db: &Database, account: &mut Account, tokens: &FreshTokens) -> Result<(), DbError> {
    let mut credentials = account.credentials();
    tokens.merge_into(&mut credentials);
    db.set_account_credentials(&account.id, &credentials)?;
    account.credentials = Some(credentials);
    debug!(account = %account.id, "stored fresh tokens");
    Ok(())
}

fn record_run(db: &Database, mode: SyncMode) {
    let key = match mode {
        SyncMode::Sync => LAST_SYNC_RUN_KEY,
        SyncMode::Reprocess => LAST_REPROCESS_RUN_KEY,
    };
    let finished = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    if let Err(e) = db.set_sync_state(key, &finished) {
        warn!(key, error = %e, "failed to record run time");
    }
}

fn success(account: &Account, run: &AccountRun) -> AccountResult {
    AccountResult {
        account_id: account.id.clone(),
        provider: account.provider,
        email_address: account.email_address.clone(),
        synced: run.synced,
        error: None,
        metadata_only: run.outcome.metadata_only,
        hit_page_cap: run.outcome.hit_page_cap,
    }
}

/// Direction, classification and field caps, applied the same way whatever
/// adapter produced the messages.
pub fn prepare_messages(messages: &mut [CanonicalMessage], account_address: &str) {
    for message in messages.iter_mut() {
        message.direction = direction_for(&message.from, account_address);
        if message.preview.trim().is_empty() {
            if let Some(body) = message.body_text.as_deref() {
                message.preview = preview_from(body);
            }
        }
        classify(message);
        message.truncate_fields();
    }
}

#[cfg(test)]
mod tests {
    use super::{prepare_messages, FreshTokens};
    use crate::db::models::Credentials;
    use crate::message::{
        CanonicalMessage, Direction, EmailType, MessageHeaders, MAX_BODY_CHARS, MAX_HEADER_CHARS,
    };

    #[test]
    fn prepare_classifies_and_caps_fields() {
        let mut messages = vec![
            CanonicalMessage {
                from: "Owner <owner@example.com>".to_string(),
                subject: "s".repeat(900),
                body_text: Some("b".repeat(MAX_BODY_CHARS + 10)),
                ..CanonicalMessage::default()
            },
            CanonicalMessage {
                from: "Plaud <no-reply@plaud.ai>".to_string(),
                subject: "Your recording summary".to_string(),
                body_text: Some("Summary attached".to_string()),
                headers: MessageHeaders::from_iter([("List-Unsubscribe", "<mailto:x@plaud.ai>")]),
                ..CanonicalMessage::default()
            },
        ];

        prepare_messages(&mut messages, "owner@example.com");

        assert_eq!(messages[0].direction, Direction::Sent);
        assert_eq!(messages[0].subject.chars().count(), MAX_HEADER_CHARS);
        assert_eq!(
            messages[0].body_text.as_deref().map(|b| b.chars().count()),
            Some(MAX_BODY_CHARS)
        );
        assert!(!messages[0].preview.is_empty());
        assert_eq!(messages[1].direction, Direction::Received);
        assert_eq!(messages[1].email_type, EmailType::PlaudTranscription);
    }

    #[test]
    fn fresh_tokens_only_replace_what_was_given() {
        let mut credentials = Credentials {
            access_token: Some("old-access".to_string()),
            refresh_token: Some("old-refresh".to_string()),
            password: None,
        };
        FreshTokens {
            access_token: Some("new-access".to_string()),
            refresh_token: None,
        }
        .merge_into(&mut credentials);

        assert_eq!(credentials.access_token.as_deref(), Some("new-access"));
        assert_eq!(credentials.refresh_token.as_deref(), Some("old-refresh"));
        assert!(FreshTokens::default().is_empty());
    }
}
