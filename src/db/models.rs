use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{Result as SqlResult, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Gmail,
    Outlook,
    Icloud,
    Imap,
}

impl Provider {
    pub const ALL: [Provider; 4] = [Self::Gmail, Self::Outlook, Self::Icloud, Self::Imap];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gmail => "gmail",
            Self::Outlook => "outlook",
            Self::Icloud => "icloud",
            Self::Imap => "imap",
        }
    }

    /// Providers whose stored credentials can carry an OAuth token pair.
    pub fn uses_oauth(self) -> bool {
        matches!(self, Self::Gmail | Self::Outlook)
    }
}

impl Display for Provider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gmail" | "google" => Ok(Self::Gmail),
            "outlook" | "microsoft" | "office365" => Ok(Self::Outlook),
            "icloud" | "apple" => Ok(Self::Icloud),
            "imap" => Ok(Self::Imap),
            other => Err(format!("invalid provider: {other}")),
        }
    }
}

/// Credential bag stored as JSON on the account row. Which fields are set
/// depends on the provider and how the account was connected.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credentials {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Credentials {
    pub fn password(&self) -> Option<&str> {
        non_empty(self.password.as_deref())
    }

    pub fn access_token(&self) -> Option<&str> {
        non_empty(self.access_token.as_deref())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        non_empty(self.refresh_token.as_deref())
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub id: String,
    pub user_id: String,
    pub provider: Provider,
    pub email_address: String,
    pub display_name: Option<String>,
    pub credentials: Option<Credentials>,
    pub imap_host: Option<String>,
    pub imap_port: Option<u16>,
    pub is_active: bool,
    /// Raw checkpoint text exactly as stored, so it can be restored verbatim.
    pub last_sync_at: Option<String>,
    pub sync_error: Option<String>,
}

impl Account {
    pub fn credentials(&self) -> Credentials {
        self.credentials.clone().unwrap_or_default()
    }

    /// Parsed checkpoint. Unparseable stored values are treated as absent.
    pub fn checkpoint(&self) -> Option<DateTime<Utc>> {
        self.last_sync_at
            .as_deref()
            .and_then(|raw| DateTime::parse_from_rfc3339(raw.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserIntegration {
    pub user_id: String,
    pub icloud_email: Option<String>,
    pub icloud_password: Option<String>,
}

/// A row of `emails_cache` as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CachedEmail {
    pub id: String,
    pub user_id: String,
    pub account: String,
    pub message_id: String,
    pub thread_id: Option<String>,
    pub reply_to_id: Option<String>,
    pub from_addr: Option<String>,
    pub to_addr: Option<String>,
    pub cc_addr: Option<String>,
    pub bcc_addr: Option<String>,
    pub subject: Option<String>,
    pub preview: Option<String>,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: Option<String>,
    pub direction: Option<String>,
    pub has_attachments: Option<bool>,
    pub attachments_meta: Option<serde_json::Value>,
    pub is_forwarded: Option<bool>,
    pub original_sender: Option<String>,
    pub is_auto_reply: Option<bool>,
    pub email_language: Option<String>,
    pub signature_raw: Option<String>,
    pub signature_parsed: Option<serde_json::Value>,
    pub email_type: Option<String>,
    pub importance: Option<String>,
    pub synced_at: Option<String>,
    pub is_read: bool,
    pub ai_processed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyncState {
    pub key: String,
    pub value: Option<String>,
    pub updated_at: Option<String>,
}

fn parse_json_value(raw: Option<String>) -> Option<serde_json::Value> {
    raw.and_then(|s| serde_json::from_str::<serde_json::Value>(&s).ok())
}

impl Account {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        let provider_raw: String = row.get("provider")?;
        let provider = Provider::from_str(&provider_raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(
                provider_raw.len(),
                rusqlite::types::Type::Text,
                Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            )
        })?;

        let credentials = row
            .get::<_, Option<String>>("credentials")?
            .and_then(|raw| serde_json::from_str::<Credentials>(&raw).ok());

        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            provider,
            email_address: row.get("email_address")?,
            display_name: row.get("display_name")?,
            credentials,
            imap_host: row.get("imap_host")?,
            imap_port: row.get("imap_port")?,
            is_active: row.get("is_active")?,
            last_sync_at: row.get("last_sync_at")?,
            sync_error: row.get("sync_error")?,
        })
    }
}

impl UserIntegration {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            user_id: row.get("user_id")?,
            icloud_email: row.get("icloud_email")?,
            icloud_password: row.get("icloud_password")?,
        })
    }
}

impl CachedEmail {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            account: row.get("account")?,
            message_id: row.get("message_id")?,
            thread_id: row.get("thread_id")?,
            reply_to_id: row.get("reply_to_id")?,
            from_addr: row.get("from_addr")?,
            to_addr: row.get("to_addr")?,
            cc_addr: row.get("cc_addr")?,
            bcc_addr: row.get("bcc_addr")?,
            subject: row.get("subject")?,
            preview: row.get("preview")?,
            body_text: row.get("body_text")?,
            body_html: row.get("body_html")?,
            received_at: row.get("received_at")?,
            direction: row.get("direction")?,
            has_attachments: row.get("has_attachments")?,
            attachments_meta: parse_json_value(row.get("attachments_meta")?),
            is_forwarded: row.get("is_forwarded")?,
            original_sender: row.get("original_sender")?,
            is_auto_reply: row.get("is_auto_reply")?,
            email_language: row.get("email_language")?,
            signature_raw: row.get("signature_raw")?,
            signature_parsed: parse_json_value(row.get("signature_parsed")?),
            email_type: row.get("email_type")?,
            importance: row.get("importance")?,
            synced_at: row.get("synced_at")?,
            is_read: row.get("is_read")?,
            ai_processed: row.get("ai_processed")?,
        })
    }
}

impl SyncState {
    pub fn from_row(row: &Row<'_>) -> SqlResult<Self> {
        Ok(Self {
            key: row.get("key")?,
            value: row.get("value")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{Account, Credentials, Provider};

    #[test]
    fn provider_display_and_parse() {
        assert_eq!(Provider::Outlook.to_string(), "outlook");
        assert_eq!("GMAIL".parse::<Provider>().expect("parse provider"), Provider::Gmail);
        assert_eq!("microsoft".parse::<Provider>().expect("parse alias"), Provider::Outlook);
        assert!("pop3".parse::<Provider>().is_err());
    }

    #[test]
    fn credentials_treat_blank_values_as_missing() {
        let creds: Credentials =
            serde_json::from_str(r#"{"password":"  ","access_token":"tok"}"#).expect("decode");
        assert!(creds.password().is_none());
        assert_eq!(creds.access_token(), Some("tok"));
        assert!(creds.refresh_token().is_none());
    }

    #[test]
    fn checkpoint_parses_rfc3339_and_ignores_garbage() {
        let mut account = Account {
            id: "acc-1".to_string(),
            user_id: "user-1".to_string(),
            provider: Provider::Imap,
            email_address: "me@example.com".to_string(),
            display_name: None,
            credentials: None,
            imap_host: None,
            imap_port: None,
            is_active: true,
            last_sync_at: Some("2026-03-01T10:00:00+00:00".to_string()),
            sync_error: None,
        };
        assert!(account.checkpoint().is_some());

        account.last_sync_at = Some("yesterday".to_string());
        assert!(account.checkpoint().is_none());
    }
}
