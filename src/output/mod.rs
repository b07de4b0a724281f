pub mod json;
pub mod table;

use anyhow::Result;
use serde::Serialize;

use crate::connectors::CheckResult;
use crate::db::models::{Account, CachedEmail, Provider};
use crate::db::DatabaseStats;
use crate::sync::SyncSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn from_json_flag(json: bool) -> Self {
        if json {
            Self::Json
        } else {
            Self::Table
        }
    }
}

/// Account as shown to operators: everything but the credentials.
#[derive(Debug, Clone, Serialize)]
pub struct AccountStatus {
    pub id: String,
    pub user_id: String,
    pub provider: Provider,
    pub email_address: String,
    pub is_active: bool,
    pub last_sync_at: Option<String>,
    pub sync_error: Option<String>,
    pub has_password: bool,
    pub has_token: bool,
}

impl From<&Account> for AccountStatus {
    fn from(account: &Account) -> Self {
        let credentials = account.credentials();
        Self {
            id: account.id.clone(),
            user_id: account.user_id.clone(),
            provider: account.provider,
            email_address: account.email_address.clone(),
            is_active: account.is_active,
            last_sync_at: account.last_sync_at.clone(),
            sync_error: account.sync_error.clone(),
            has_password: credentials.password().is_some(),
            has_token: credentials.access_token().is_some() || credentials.refresh_token().is_some(),
        }
    }
}

pub fn format_sync_summary(format: OutputFormat, summary: &SyncSummary) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_sync_summary(summary)),
        OutputFormat::Json => json::format_sync_summary(summary),
    }
}

pub fn format_accounts(format: OutputFormat, accounts: &[AccountStatus]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_accounts(accounts)),
        OutputFormat::Json => json::format_accounts(accounts),
    }
}

pub fn format_messages(format: OutputFormat, emails: &[CachedEmail]) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_messages(emails)),
        OutputFormat::Json => json::format_messages(emails),
    }
}

pub fn format_stats(format: OutputFormat, stats: &DatabaseStats) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_stats(stats)),
        OutputFormat::Json => json::format_stats(stats),
    }
}

pub fn format_check(format: OutputFormat, result: &CheckResult) -> Result<String> {
    match format {
        OutputFormat::Table => Ok(table::format_check(result)),
        OutputFormat::Json => json::format_check(result),
    }
}
