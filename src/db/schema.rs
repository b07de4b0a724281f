use anyhow::Result;
use rusqlite::Connection;

pub fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS email_accounts (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            provider TEXT NOT NULL CHECK(provider IN ('gmail', 'outlook', 'icloud', 'imap')),
            email_address TEXT NOT NULL,
            display_name TEXT,
            credentials TEXT,
            imap_host TEXT,
            imap_port INTEGER,
            is_active BOOLEAN NOT NULL DEFAULT true,
            last_sync_at TEXT,
            sync_error TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE TABLE IF NOT EXISTS user_integrations (
            user_id TEXT PRIMARY KEY,
            icloud_email TEXT,
            icloud_password TEXT
        );

        CREATE TABLE IF NOT EXISTS emails_cache (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            account TEXT NOT NULL,
            message_id TEXT NOT NULL,
            thread_id TEXT,
            reply_to_id TEXT,
            from_addr TEXT,
            to_addr TEXT,
            cc_addr TEXT,
            bcc_addr TEXT,
            subject TEXT,
            preview TEXT,
            body_text TEXT,
            body_html TEXT,
            received_at TEXT,
            direction TEXT CHECK(direction IN ('sent', 'received')),
            has_attachments BOOLEAN,
            attachments_meta TEXT,
            is_forwarded BOOLEAN,
            original_sender TEXT,
            is_auto_reply BOOLEAN,
            email_language TEXT,
            signature_raw TEXT,
            signature_parsed TEXT,
            email_type TEXT NOT NULL,
            importance TEXT NOT NULL DEFAULT 'normal',
            synced_at TEXT,
            is_read BOOLEAN NOT NULL DEFAULT false,
            ai_processed BOOLEAN NOT NULL DEFAULT false,
            ai_extracted TEXT,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now')),
            UNIQUE(user_id, account, message_id)
        );

        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_email_accounts_user_id ON email_accounts(user_id);
        CREATE INDEX IF NOT EXISTS idx_emails_cache_account ON emails_cache(account);
        CREATE INDEX IF NOT EXISTS idx_emails_cache_received_at ON emails_cache(received_at);
        "#,
    )?;

    Ok(())
}

/// Lookup indexes used by downstream readers filtering on classification.
pub fn create_classification_indexes(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE INDEX IF NOT EXISTS idx_emails_cache_email_type ON emails_cache(email_type);
        CREATE INDEX IF NOT EXISTS idx_emails_cache_ai_processed ON emails_cache(ai_processed);
        "#,
    )?;

    Ok(())
}
