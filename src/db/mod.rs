use std::path::{Path, PathBuf};

use rusqlite::{params, Connection, OptionalExtension, ToSql};
use serde::Serialize;
use thiserror::Error;

use self::models::{Account, CachedEmail, Credentials, Provider, SyncState, UserIntegration};

#[derive(Debug, Error)]
pub enum DbError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error("json serialization: {0}")]
    Json(#[from] serde_json::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Config(String),
}

pub mod migrations;
pub mod models;
pub mod schema;
pub mod writer;

pub use writer::{PersistenceWriter, WriteMode, WriteReport};

const ACCOUNT_COLUMNS: &str = "id, user_id, provider, email_address, display_name, credentials, \
     imap_host, imap_port, is_active, last_sync_at, sync_error";

const CACHED_EMAIL_COLUMNS: &str = "id, user_id, account, message_id, thread_id, reply_to_id, \
     from_addr, to_addr, cc_addr, bcc_addr, subject, preview, body_text, body_html, received_at, \
     direction, has_attachments, attachments_meta, is_forwarded, original_sender, is_auto_reply, \
     email_language, signature_raw, signature_parsed, email_type, importance, synced_at, is_read, \
     ai_processed";

/// Which accounts a run covers. `account_id` wins over `user_id`; with
/// neither set every active account is selected. `provider` narrows further.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountScope {
    pub account_id: Option<String>,
    pub user_id: Option<String>,
    pub provider: Option<Provider>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountEmailCount {
    pub account: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseStats {
    pub total_accounts: i64,
    pub active_accounts: i64,
    pub accounts_with_errors: i64,
    pub total_emails: i64,
    pub emails_by_account: Vec<AccountEmailCount>,
}

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        let mut db = Self {
            conn,
            path: path.to_path_buf(),
        };
        db.initialize()?;
        Ok(db)
    }

    pub fn initialize(&mut self) -> Result<(), DbError> {
        self.run_migrations()
    }

    fn run_migrations(&mut self) -> Result<(), DbError> {
        migrations::migrate(&self.conn)
            .map_err(|e| DbError::Config(format!("migration failed: {e}")))
    }

    pub fn default_db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir()
            .ok_or_else(|| DbError::Config("failed to determine home directory".to_string()))?;
        Ok(home.join(".mailsync").join("mailsync.db"))
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn insert_account(&self, account: &Account) -> Result<(), DbError> {
        let credentials_json = account
            .credentials
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        self.conn.execute(
            r#"
            INSERT INTO email_accounts (
                id, user_id, provider, email_address, display_name, credentials,
                imap_host, imap_port, is_active, last_sync_at, sync_error
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                user_id = excluded.user_id,
                provider = excluded.provider,
                email_address = excluded.email_address,
                display_name = excluded.display_name,
                credentials = excluded.credentials,
                imap_host = excluded.imap_host,
                imap_port = excluded.imap_port,
                is_active = excluded.is_active,
                last_sync_at = excluded.last_sync_at,
                sync_error = excluded.sync_error,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
            "#,
            params![
                account.id,
                account.user_id,
                account.provider.to_string(),
                account.email_address,
                account.display_name,
                credentials_json,
                account.imap_host,
                account.imap_port,
                account.is_active,
                account.last_sync_at,
                account.sync_error,
            ],
        )?;

        Ok(())
    }

    pub fn get_account(&self, account_id: &str) -> Result<Option<Account>, DbError> {
        let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM email_accounts WHERE id = ? LIMIT 1");
        let account = self
            .conn
            .query_row(&sql, [account_id], Account::from_row)
            .optional()?;
        Ok(account)
    }

    pub fn list_accounts(&self) -> Result<Vec<Account>, DbError> {
        let sql = format!(
            "SELECT {ACCOUNT_COLUMNS} FROM email_accounts ORDER BY email_address ASC, id ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let accounts = stmt
            .query_map([], Account::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    pub fn list_active_accounts(&self, scope: &AccountScope) -> Result<Vec<Account>, DbError> {
        let mut sql = format!("SELECT {ACCOUNT_COLUMNS} FROM email_accounts WHERE is_active = 1");
        let mut params_vec: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(account_id) = scope.account_id.as_deref().filter(|s| !s.trim().is_empty()) {
            sql.push_str(" AND id = ?");
            params_vec.push(Box::new(account_id.to_string()));
        } else if let Some(user_id) = scope.user_id.as_deref().filter(|s| !s.trim().is_empty()) {
            sql.push_str(" AND user_id = ?");
            params_vec.push(Box::new(user_id.to_string()));
        }

        if let Some(provider) = scope.provider {
            sql.push_str(" AND provider = ?");
            params_vec.push(Box::new(provider.to_string()));
        }

        sql.push_str(" ORDER BY email_address ASC, id ASC");

        let params_refs: Vec<&dyn ToSql> = params_vec.iter().map(|v| v.as_ref()).collect();
        let mut stmt = self.conn.prepare(&sql)?;
        let accounts = stmt
            .query_map(params_refs.as_slice(), Account::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(accounts)
    }

    pub fn set_account_credentials(
        &self,
        account_id: &str,
        credentials: &Credentials,
    ) -> Result<usize, DbError> {
        let credentials_json = serde_json::to_string(credentials)?;
        let updated = self.conn.execute(
            r#"
            UPDATE email_accounts
            SET credentials = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
            WHERE id = ?
            "#,
            params![credentials_json, account_id],
        )?;
        Ok(updated)
    }

    /// Advances the checkpoint and clears any previous error.
    pub fn mark_sync_success(&self, account_id: &str, checkpoint: &str) -> Result<(), DbError> {
        self.conn.execute(
            r#"
            UPDATE email_accounts
            SET last_sync_at = ?, sync_error = NULL,
                updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
            WHERE id = ?
            "#,
            params![checkpoint, account_id],
        )?;
        Ok(())
    }

    pub fn mark_sync_error(&self, account_id: &str, error: &str) -> Result<(), DbError> {
        self.conn.execute(
            r#"
            UPDATE email_accounts
            SET sync_error = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
            WHERE id = ?
            "#,
            params![error, account_id],
        )?;
        Ok(())
    }

    /// Writes the raw checkpoint value, `None` included, without touching
    /// the error field.
    pub fn set_checkpoint(&self, account_id: &str, raw: Option<&str>) -> Result<(), DbError> {
        self.conn.execute(
            r#"
            UPDATE email_accounts
            SET last_sync_at = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%SZ', 'now')
            WHERE id = ?
            "#,
            params![raw, account_id],
        )?;
        Ok(())
    }

    pub fn get_user_integration(&self, user_id: &str) -> Result<Option<UserIntegration>, DbError> {
        let integration = self
            .conn
            .query_row(
                "SELECT user_id, icloud_email, icloud_password FROM user_integrations WHERE user_id = ? LIMIT 1",
                [user_id],
                UserIntegration::from_row,
            )
            .optional()?;
        Ok(integration)
    }

    pub fn upsert_user_integration(&self, integration: &UserIntegration) -> Result<(), DbError> {
        self.conn.execute(
            r#"
            INSERT INTO user_integrations (user_id, icloud_email, icloud_password)
            VALUES (?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                icloud_email = excluded.icloud_email,
                icloud_password = excluded.icloud_password
            "#,
            params![
                integration.user_id,
                integration.icloud_email,
                integration.icloud_password
            ],
        )?;
        Ok(())
    }

    pub fn get_cached_email(
        &self,
        user_id: &str,
        account: &str,
        message_id: &str,
    ) -> Result<Option<CachedEmail>, DbError> {
        let sql = format!(
            "SELECT {CACHED_EMAIL_COLUMNS} FROM emails_cache WHERE user_id = ? AND account = ? AND message_id = ? LIMIT 1"
        );
        let email = self
            .conn
            .query_row(&sql, params![user_id, account, message_id], CachedEmail::from_row)
            .optional()?;
        Ok(email)
    }

    pub fn list_cached_emails(&self, account: &str, limit: usize) -> Result<Vec<CachedEmail>, DbError> {
        let sql = format!(
            "SELECT {CACHED_EMAIL_COLUMNS} FROM emails_cache WHERE account = ? ORDER BY received_at DESC LIMIT ?"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let emails = stmt
            .query_map(params![account, limit as i64], CachedEmail::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(emails)
    }

    /// Flips the downstream-owned flags; used by readers of the cache and
    /// by tests asserting that reprocessing leaves them alone.
    pub fn mark_email_read(&self, id: &str, ai_processed: bool) -> Result<usize, DbError> {
        let updated = self.conn.execute(
            "UPDATE emails_cache SET is_read = 1, ai_processed = ? WHERE id = ?",
            params![ai_processed, id],
        )?;
        Ok(updated)
    }

    pub fn count_cached_emails(&self, account: Option<&str>) -> Result<i64, DbError> {
        let count = match account {
            Some(account) => self.conn.query_row(
                "SELECT COUNT(*) FROM emails_cache WHERE account = ?",
                [account],
                |row| row.get(0),
            )?,
            None => self
                .conn
                .query_row("SELECT COUNT(*) FROM emails_cache", [], |row| row.get(0))?,
        };
        Ok(count)
    }

    pub fn get_sync_state(&self, key: &str) -> Result<Option<SyncState>, DbError> {
        let state = self
            .conn
            .query_row(
                "SELECT key, value, updated_at FROM sync_state WHERE key = ? LIMIT 1",
                [key],
                SyncState::from_row,
            )
            .optional()?;
        Ok(state)
    }

    pub fn set_sync_state(&self, key: &str, value: &str) -> Result<(), DbError> {
        self.conn.execute(
            r#"
            INSERT INTO sync_state (key, value, updated_at)
            VALUES (?, ?, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_stats(&self) -> Result<DatabaseStats, DbError> {
        let total_accounts: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM email_accounts", [], |row| row.get(0))?;
        let active_accounts: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM email_accounts WHERE is_active = 1",
            [],
            |row| row.get(0),
        )?;
        let accounts_with_errors: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM email_accounts WHERE sync_error IS NOT NULL AND sync_error != ''",
            [],
            |row| row.get(0),
        )?;
        let total_emails = self.count_cached_emails(None)?;

        let mut stmt = self.conn.prepare(
            "SELECT account, COUNT(*) AS count FROM emails_cache GROUP BY account ORDER BY count DESC, account ASC",
        )?;
        let emails_by_account = stmt
            .query_map([], |row| {
                Ok(AccountEmailCount {
                    account: row.get(0)?,
                    count: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(DatabaseStats {
            total_accounts,
            active_accounts,
            accounts_with_errors,
            total_emails,
            emails_by_account,
        })
    }
}
