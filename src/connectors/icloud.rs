use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::Config;
use crate::connectors::imap::{resolve_secret, ImapConnector, ImapTarget};
use crate::connectors::{ConnectorError, FetchOutcome, MailConnector};
use crate::db::models::{Account, Provider};
use crate::db::Database;
use crate::message::direction_for;

pub const ICLOUD_IMAP_HOST: &str = "imap.mail.me.com";
pub const ICLOUD_IMAP_PORT: u16 = 993;

/// iCloud has no REST mail API; every fetch goes over IMAP.
pub struct IcloudConnector {
    imap: ImapConnector,
}

impl IcloudConnector {
    pub fn new(config: &Config) -> Self {
        Self {
            imap: ImapConnector::new(config),
        }
    }

    /// Login address and password: the account's own, else the user's
    /// integration record.
    pub fn resolve_login(
        db: &Database,
        account: &Account,
    ) -> Result<(String, String), ConnectorError> {
        if let Some(password) = account.credentials().password() {
            return Ok((account.email_address.clone(), resolve_secret(Some(password))?));
        }

        let integration = db.get_user_integration(&account.user_id)?;
        let Some(integration) = integration else {
            return Err(ConnectorError::missing("iCloud credentials not configured"));
        };
        debug!(user = %account.user_id, "using icloud credentials from user integration");

        let Some(stored) = integration
            .icloud_password
            .as_deref()
            .filter(|password| !password.trim().is_empty())
        else {
            return Err(ConnectorError::missing("iCloud credentials not configured"));
        };
        let password = resolve_secret(Some(stored))?;
        let address = integration
            .icloud_email
            .filter(|email| !email.trim().is_empty())
            .unwrap_or_else(|| account.email_address.clone());
        Ok((address, password))
    }
}

#[async_trait(?Send)]
impl MailConnector for IcloudConnector {
    fn provider(&self) -> Provider {
        Provider::Icloud
    }

    async fn fetch(
        &self,
        db: &Database,
        account: &Account,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, ConnectorError> {
        let (address, password) = Self::resolve_login(db, account)?;
        let target = ImapTarget {
            label: "iCloud IMAP",
            host: ICLOUD_IMAP_HOST.to_string(),
            port: ICLOUD_IMAP_PORT,
            address,
            password,
        };
        let mut outcome = self.imap.fetch_mailbox(&target, since).await?;

        // direction is judged against the mailbox the account represents
        if target.address != account.email_address {
            for message in &mut outcome.messages {
                message.direction = direction_for(&message.from, &account.email_address);
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use uuid::Uuid;

    use super::IcloudConnector;
    use crate::db::models::{Account, Credentials, Provider, UserIntegration};
    use crate::db::Database;

    fn temp_db_path() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("mailsync-icloud-{}.db", Uuid::new_v4()));
        path
    }

    fn account(password: Option<&str>) -> Account {
        Account {
            id: "acc-icloud".to_string(),
            user_id: "u1".to_string(),
            provider: Provider::Icloud,
            email_address: "me@icloud.com".to_string(),
            display_name: None,
            credentials: Some(Credentials {
                password: password.map(str::to_string),
                ..Credentials::default()
            }),
            imap_host: None,
            imap_port: None,
            is_active: true,
            last_sync_at: None,
            sync_error: None,
        }
    }

    #[test]
    fn account_password_wins() {
        let path = temp_db_path();
        let db = Database::open(&path).expect("open db");
        let (address, password) =
            IcloudConnector::resolve_login(&db, &account(Some("app-pass"))).expect("login");
        assert_eq!(address, "me@icloud.com");
        assert_eq!(password, "app-pass");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn falls_back_to_user_integration() {
        let path = temp_db_path();
        let db = Database::open(&path).expect("open db");

        let err = IcloudConnector::resolve_login(&db, &account(None)).expect_err("no creds");
        assert!(err.is_terminal());
        assert_eq!(err.to_string(), "iCloud credentials not configured");

        db.upsert_user_integration(&UserIntegration {
            user_id: "u1".to_string(),
            icloud_email: Some("alias@me.com".to_string()),
            icloud_password: Some("integration-pass".to_string()),
        })
        .expect("integration");

        let (address, password) =
            IcloudConnector::resolve_login(&db, &account(None)).expect("login");
        assert_eq!(address, "alias@me.com");
        assert_eq!(password, "integration-pass");
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn unresolvable_integration_secret_is_reported_as_is() {
        let path = temp_db_path();
        let db = Database::open(&path).expect("open db");
        db.upsert_user_integration(&UserIntegration {
            user_id: "u1".to_string(),
            icloud_email: None,
            icloud_password: Some("env:MAILSYNC_ICLOUD_TEST_SECRET_UNSET".to_string()),
        })
        .expect("integration");

        let err = IcloudConnector::resolve_login(&db, &account(None)).expect_err("unset secret");
        assert!(err.is_terminal());
        assert_eq!(
            err.to_string(),
            "environment variable MAILSYNC_ICLOUD_TEST_SECRET_UNSET referenced by the stored password is not set"
        );

        db.upsert_user_integration(&UserIntegration {
            user_id: "u1".to_string(),
            icloud_email: None,
            icloud_password: Some("  ".to_string()),
        })
        .expect("blank integration");
        let err = IcloudConnector::resolve_login(&db, &account(None)).expect_err("blank");
        assert_eq!(err.to_string(), "iCloud credentials not configured");
        let _ = std::fs::remove_file(path);
    }
}
