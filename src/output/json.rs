use anyhow::Result;

use crate::connectors::CheckResult;
use crate::db::models::CachedEmail;
use crate::db::DatabaseStats;
use crate::output::AccountStatus;
use crate::sync::SyncSummary;

pub fn format_sync_summary(summary: &SyncSummary) -> Result<String> {
    Ok(serde_json::to_string_pretty(summary)?)
}

pub fn format_accounts(accounts: &[AccountStatus]) -> Result<String> {
    Ok(serde_json::to_string_pretty(accounts)?)
}

pub fn format_messages(emails: &[CachedEmail]) -> Result<String> {
    Ok(serde_json::to_string_pretty(emails)?)
}

pub fn format_stats(stats: &DatabaseStats) -> Result<String> {
    Ok(serde_json::to_string_pretty(stats)?)
}

pub fn format_check(result: &CheckResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}
