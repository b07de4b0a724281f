use chrono::{DateTime, Utc};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::connectors::CheckResult;
use crate::db::models::CachedEmail;
use crate::db::DatabaseStats;
use crate::output::AccountStatus;
use crate::sync::{SyncMode, SyncSummary};

const ADDRESS_WIDTH: usize = 30;
const PROVIDER_WIDTH: usize = 8;
const COUNT_WIDTH: usize = 7;
const FROM_WIDTH: usize = 24;
const SUBJECT_WIDTH: usize = 48;
const TYPE_WIDTH: usize = 19;
const DATE_WIDTH: usize = 12;

pub fn format_sync_summary(summary: &SyncSummary) -> String {
    if summary.results.is_empty() {
        return "No active accounts matched.".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<address$}  {:<provider$}  {:>count$}  {}\n",
        "Account",
        "Provider",
        "Synced",
        "Status",
        address = ADDRESS_WIDTH,
        provider = PROVIDER_WIDTH,
        count = COUNT_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}  {}\n",
        "-".repeat(ADDRESS_WIDTH),
        "-".repeat(PROVIDER_WIDTH),
        "-".repeat(COUNT_WIDTH),
        "-".repeat(20)
    ));

    for result in &summary.results {
        let status = match &result.error {
            Some(error) => format!("\u{1b}[31merror\u{1b}[0m: {error}"),
            None if result.hit_page_cap => "ok (page cap reached)".to_string(),
            None if result.metadata_only => "ok (metadata only)".to_string(),
            None => "ok".to_string(),
        };
        out.push_str(&format!(
            "{:<address$}  {:<provider$}  {:>count$}  {}\n",
            pad_to_width(&truncate_for_width(&result.email_address, ADDRESS_WIDTH), ADDRESS_WIDTH),
            result.provider.as_str(),
            result.synced,
            status,
            address = ADDRESS_WIDTH,
            provider = PROVIDER_WIDTH,
            count = COUNT_WIDTH
        ));
    }

    out.push('\n');
    out.push_str(&format!(
        "{} messages, {} failed account(s)\n",
        summary.total_synced(),
        summary.failures()
    ));
    match summary.mode {
        SyncMode::Reprocess if summary.has_more == Some(true) => {
            out.push_str("More history is pending; run reprocess again to continue.\n");
        }
        SyncMode::Sync => {
            let capped = summary.results.iter().filter(|r| r.hit_page_cap).count();
            if capped > 0 {
                out.push_str(&format!(
                    "Page cap reached on {capped} account(s); older messages were not fetched.\n"
                ));
            }
        }
        SyncMode::Reprocess => {}
    }
    out
}

pub fn format_accounts(accounts: &[AccountStatus]) -> String {
    if accounts.is_empty() {
        return "No accounts configured.".to_string();
    }

    let mut out = String::new();
    out.push_str("Accounts\n");
    out.push_str("========\n");
    for account in accounts {
        out.push_str(&format!(
            "{}  {}  {}  active={}  last_sync={}\n",
            account.id,
            account.email_address,
            account.provider,
            account.is_active,
            account.last_sync_at.as_deref().unwrap_or("never")
        ));
        if let Some(error) = account.sync_error.as_deref().filter(|e| !e.is_empty()) {
            out.push_str(&format!("    last error: {error}\n"));
        }
    }
    out
}

pub fn format_messages(emails: &[CachedEmail]) -> String {
    if emails.is_empty() {
        return "No messages stored.".to_string();
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{:<from$}  {:<subject$}  {:<kind$}  {:<date$}\n",
        "From",
        "Subject",
        "Type",
        "Date",
        from = FROM_WIDTH,
        subject = SUBJECT_WIDTH,
        kind = TYPE_WIDTH,
        date = DATE_WIDTH
    ));
    out.push_str(&format!(
        "{}  {}  {}  {}\n",
        "-".repeat(FROM_WIDTH),
        "-".repeat(SUBJECT_WIDTH),
        "-".repeat(TYPE_WIDTH),
        "-".repeat(DATE_WIDTH)
    ));

    for email in emails {
        let from = truncate_for_width(email.from_addr.as_deref().unwrap_or("(unknown)"), FROM_WIDTH);
        let subject = truncate_for_width(
            email
                .subject
                .as_deref()
                .filter(|s| !s.is_empty())
                .unwrap_or("(no subject)"),
            SUBJECT_WIDTH,
        );
        let kind = colorize_importance(
            email.email_type.as_deref().unwrap_or("-"),
            email.importance.as_deref().unwrap_or("normal"),
            TYPE_WIDTH,
        );
        let date = email
            .received_at
            .as_deref()
            .map(relative_date)
            .unwrap_or_else(|| "-".to_string());

        out.push_str(&format!(
            "{}  {}  {}  {}\n",
            pad_to_width(&from, FROM_WIDTH),
            pad_to_width(&subject, SUBJECT_WIDTH),
            kind,
            truncate_for_width(&date, DATE_WIDTH)
        ));
    }
    out
}

pub fn format_stats(stats: &DatabaseStats) -> String {
    let mut out = String::new();
    out.push_str("Mailsync Stats\n");
    out.push_str("==============\n");
    out.push_str(&format!(
        "Accounts: {} ({} active, {} with errors)\n",
        stats.total_accounts, stats.active_accounts, stats.accounts_with_errors
    ));
    out.push_str(&format!("Messages: {}\n", stats.total_emails));

    if !stats.emails_by_account.is_empty() {
        out.push('\n');
        out.push_str("Messages by account\n");
        out.push_str("-------------------\n");
        for row in &stats.emails_by_account {
            out.push_str(&format!(
                "{} {:>8}\n",
                pad_to_width(&truncate_for_width(&row.account, ADDRESS_WIDTH), ADDRESS_WIDTH),
                row.count
            ));
        }
    }
    out
}

pub fn format_check(result: &CheckResult) -> String {
    if result.success {
        format!("\u{1b}[32mok\u{1b}[0m  {}", result.message)
    } else {
        format!("\u{1b}[31mfailed\u{1b}[0m  {}", result.message)
    }
}

fn colorize_importance(label: &str, importance: &str, width: usize) -> String {
    let padded = pad_to_width(&truncate_for_width(label, width), width);
    match importance.trim().to_ascii_lowercase().as_str() {
        "high" => format!("\u{1b}[31m{padded}\u{1b}[0m"),
        "low" => format!("\u{1b}[32m{padded}\u{1b}[0m"),
        _ => padded,
    }
}

fn relative_date(input: &str) -> String {
    let parsed = match DateTime::parse_from_rfc3339(input) {
        Ok(value) => value.with_timezone(&Utc),
        Err(_) => return input.to_string(),
    };

    let delta = Utc::now().signed_duration_since(parsed);
    if delta.num_seconds() < 0 {
        return "in future".to_string();
    }
    if delta.num_minutes() < 1 {
        return "just now".to_string();
    }
    if delta.num_hours() < 1 {
        return format!("{}m ago", delta.num_minutes());
    }
    if delta.num_hours() < 24 {
        return format!("{}h ago", delta.num_hours());
    }
    if delta.num_days() == 1 {
        return "yesterday".to_string();
    }
    if delta.num_days() < 7 {
        return format!("{}d ago", delta.num_days());
    }
    parsed.format("%Y-%m-%d").to_string()
}

/// `format!` pads by char count; wide glyphs need display-width padding.
fn pad_to_width(value: &str, width: usize) -> String {
    let current = UnicodeWidthStr::width(value);
    if current >= width {
        return value.to_string();
    }
    format!("{value}{}", " ".repeat(width - current))
}

fn truncate_for_width(value: &str, max_width: usize) -> String {
    if UnicodeWidthStr::width(value) <= max_width {
        return value.to_string();
    }

    if max_width <= 1 {
        return "…".to_string();
    }

    let mut out = String::new();
    let mut width = 0usize;
    for c in value.chars() {
        let cw = UnicodeWidthChar::width(c).unwrap_or(0);
        if width + cw + 1 > max_width {
            break;
        }
        out.push(c);
        width += cw;
    }
    out.push('…');
    out
}
