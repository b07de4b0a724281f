use chrono::{SecondsFormat, Utc};
use rusqlite::params;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use crate::db::{Database, DbError};
use crate::message::CanonicalMessage;

pub const DEFAULT_BATCH_SIZE: usize = 500;

const INSERT_COLUMNS: &str = r#"
    INSERT INTO emails_cache (
        id, user_id, account, message_id, thread_id, reply_to_id, from_addr, to_addr, cc_addr,
        bcc_addr, subject, preview, body_text, body_html, received_at, direction,
        has_attachments, attachments_meta, is_forwarded, original_sender, is_auto_reply,
        email_language, signature_raw, signature_parsed, email_type, importance, synced_at
    ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
"#;

const ON_CONFLICT_IGNORE: &str = "ON CONFLICT(user_id, account, message_id) DO NOTHING";

// is_read, ai_processed and ai_extracted belong to downstream readers
const ON_CONFLICT_OVERWRITE: &str = r#"
    ON CONFLICT(user_id, account, message_id) DO UPDATE SET
        thread_id = excluded.thread_id,
        reply_to_id = excluded.reply_to_id,
        from_addr = excluded.from_addr,
        to_addr = excluded.to_addr,
        cc_addr = excluded.cc_addr,
        bcc_addr = excluded.bcc_addr,
        subject = excluded.subject,
        preview = excluded.preview,
        body_text = excluded.body_text,
        body_html = excluded.body_html,
        received_at = excluded.received_at,
        direction = excluded.direction,
        has_attachments = excluded.has_attachments,
        attachments_meta = excluded.attachments_meta,
        is_forwarded = excluded.is_forwarded,
        original_sender = excluded.original_sender,
        is_auto_reply = excluded.is_auto_reply,
        email_language = excluded.email_language,
        signature_raw = excluded.signature_raw,
        signature_parsed = excluded.signature_parsed,
        email_type = excluded.email_type,
        importance = excluded.importance,
        synced_at = excluded.synced_at
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Normal sync: rows already present are left untouched.
    IgnoreDuplicates,
    /// Reprocess: rows already present get the freshly classified fields.
    Overwrite,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WriteReport {
    pub written: usize,
    pub skipped: usize,
    pub batches: usize,
}

/// Writes canonical messages for one mailbox in fixed-size transactions,
/// keyed on (user, mailbox address, provider message id).
pub struct PersistenceWriter<'a> {
    db: &'a Database,
    batch_size: usize,
}

impl<'a> PersistenceWriter<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self {
            db,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn write(
        &self,
        user_id: &str,
        account: &str,
        messages: &[CanonicalMessage],
        mode: WriteMode,
    ) -> Result<WriteReport, DbError> {
        let conflict = match mode {
            WriteMode::IgnoreDuplicates => ON_CONFLICT_IGNORE,
            WriteMode::Overwrite => ON_CONFLICT_OVERWRITE,
        };
        let sql = format!("{INSERT_COLUMNS} {conflict}");
        let synced_at = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

        let mut report = WriteReport::default();
        for batch in messages.chunks(self.batch_size) {
            let tx = self.db.conn().unchecked_transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for message in batch {
                    let changed = stmt.execute(params![
                        Uuid::new_v4().to_string(),
                        user_id,
                        account,
                        storage_message_id(message),
                        message.thread_id,
                        message.reply_to_id,
                        message.from,
                        message.to,
                        message.cc,
                        message.bcc,
                        message.subject,
                        message.preview,
                        message.body_text,
                        message.body_html,
                        message
                            .received_at
                            .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true)),
                        message.direction.to_string(),
                        message.has_attachments(),
                        attachments_json(message)?,
                        message.is_forwarded,
                        message.original_sender,
                        message.is_auto_reply,
                        message.language.to_string(),
                        message.signature_raw,
                        message
                            .signature
                            .as_ref()
                            .map(serde_json::to_string)
                            .transpose()?,
                        message.email_type.to_string(),
                        message.importance.to_string(),
                        synced_at,
                    ])?;

                    if changed == 0 {
                        report.skipped += 1;
                    } else {
                        report.written += 1;
                    }
                }
            }
            tx.commit()?;
            report.batches += 1;
            debug!(
                account = %account,
                batch = report.batches,
                size = batch.len(),
                "persisted batch"
            );
        }

        Ok(report)
    }
}

/// Provider id when present. Otherwise a content key over sender, date,
/// recipients and subject, so the same id-less message maps to the same row
/// on every run. Only a message with no date gets a random id.
fn storage_message_id(message: &CanonicalMessage) -> String {
    if let Some(id) = message
        .message_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        return id.to_string();
    }

    match message.received_at {
        Some(received_at) => {
            let mut hasher = Sha256::new();
            for part in [
                message.from.trim().to_ascii_lowercase(),
                received_at.to_rfc3339_opts(SecondsFormat::Secs, true),
                message.to.trim().to_ascii_lowercase(),
                message.subject.trim().to_string(),
            ] {
                hasher.update(part.as_bytes());
                hasher.update([0u8]);
            }
            format!("content-{}", &hex::encode(hasher.finalize())[..32])
        }
        None => format!("synthetic-{}", Uuid::new_v4()),
    }
}

fn attachments_json(message: &CanonicalMessage) -> Result<Option<String>, DbError> {
    if message.attachments.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_string(&message.attachments)?))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::{PersistenceWriter, WriteMode};
    use crate::db::Database;
    use crate::message::{AttachmentMeta, CanonicalMessage, EmailType, Importance};

    fn temp_db_path() -> PathBuf {
        let mut path = std::env::temp_dir();
        path.push(format!("mailsync-writer-{}.db", Uuid::new_v4()));
        path
    }

    fn message(id: Option<&str>, subject: &str) -> CanonicalMessage {
        CanonicalMessage {
            message_id: id.map(str::to_string),
            from: "sender@example.com".to_string(),
            to: "owner@example.com".to_string(),
            subject: subject.to_string(),
            body_text: Some("hello".to_string()),
            email_type: EmailType::Personal,
            ..CanonicalMessage::default()
        }
    }

    #[test]
    fn ignore_mode_is_idempotent() {
        let path = temp_db_path();
        let db = Database::open(&path).expect("open db");
        let writer = PersistenceWriter::new(&db);
        let batch = vec![message(Some("m1"), "one"), message(Some("m2"), "two")];

        let first = writer
            .write("u1", "owner@example.com", &batch, WriteMode::IgnoreDuplicates)
            .expect("first write");
        assert_eq!(first.written, 2);

        let second = writer
            .write("u1", "owner@example.com", &batch, WriteMode::IgnoreDuplicates)
            .expect("second write");
        assert_eq!(second.written, 0);
        assert_eq!(second.skipped, 2);
        assert_eq!(db.count_cached_emails(None).expect("count"), 2);

        // same provider id under another mailbox is a different row
        writer
            .write("u1", "other@example.com", &batch[..1], WriteMode::IgnoreDuplicates)
            .expect("other mailbox");
        assert_eq!(db.count_cached_emails(None).expect("count"), 3);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn overwrite_mode_replaces_fields_but_keeps_read_state() {
        let path = temp_db_path();
        let db = Database::open(&path).expect("open db");
        let writer = PersistenceWriter::new(&db);

        writer
            .write("u1", "owner@example.com", &[message(Some("m1"), "draft")], WriteMode::IgnoreDuplicates)
            .expect("initial write");
        let stored = db
            .get_cached_email("u1", "owner@example.com", "m1")
            .expect("get")
            .expect("exists");
        db.mark_email_read(&stored.id, true).expect("mark read");

        let mut updated = message(Some("m1"), "final");
        updated.email_type = EmailType::CalendarInvite;
        updated.importance = Importance::High;
        updated.attachments = vec![AttachmentMeta::new("invite.ics", "text/calendar", 42)];
        let report = writer
            .write("u1", "owner@example.com", &[updated], WriteMode::Overwrite)
            .expect("overwrite");
        assert_eq!(report.written, 1);

        let stored_after = db
            .get_cached_email("u1", "owner@example.com", "m1")
            .expect("get")
            .expect("exists");
        assert_eq!(stored_after.id, stored.id);
        assert_eq!(stored_after.subject.as_deref(), Some("final"));
        assert_eq!(stored_after.email_type.as_deref(), Some("calendar_invite"));
        assert_eq!(stored_after.importance.as_deref(), Some("high"));
        assert_eq!(stored_after.has_attachments, Some(true));
        assert!(stored_after.is_read);
        assert!(stored_after.ai_processed);
        assert_eq!(db.count_cached_emails(None).expect("count"), 1);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn undated_messages_without_ids_get_distinct_synthetic_ids() {
        let path = temp_db_path();
        let db = Database::open(&path).expect("open db");
        let writer = PersistenceWriter::new(&db).with_batch_size(2);
        let batch = vec![
            message(None, "a"),
            message(Some("  "), "b"),
            message(None, "c"),
        ];

        let report = writer
            .write("u1", "owner@example.com", &batch, WriteMode::IgnoreDuplicates)
            .expect("write");
        assert_eq!(report.written, 3);
        assert_eq!(report.batches, 2);

        let stored = db.list_cached_emails("owner@example.com", 10).expect("list");
        assert!(stored.iter().all(|e| e.message_id.starts_with("synthetic-")));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn dated_messages_without_ids_keep_one_row_across_writes() {
        let path = temp_db_path();
        let db = Database::open(&path).expect("open db");
        let writer = PersistenceWriter::new(&db);
        let dated = |subject: &str| CanonicalMessage {
            received_at: Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).single(),
            ..message(None, subject)
        };
        let batch = vec![dated("Weekly numbers"), dated("Lunch")];

        let first = writer
            .write("u1", "owner@example.com", &batch, WriteMode::IgnoreDuplicates)
            .expect("first write");
        assert_eq!(first.written, 2);

        let again = writer
            .write("u1", "owner@example.com", &batch, WriteMode::IgnoreDuplicates)
            .expect("second write");
        assert_eq!(again.written, 0);

        let mut reclassified = dated("Weekly numbers");
        reclassified.importance = Importance::High;
        writer
            .write("u1", "owner@example.com", &[reclassified], WriteMode::Overwrite)
            .expect("overwrite");

        assert_eq!(db.count_cached_emails(None).expect("count"), 2);
        let stored = db.list_cached_emails("owner@example.com", 10).expect("list");
        assert!(stored.iter().all(|e| e.message_id.starts_with("content-")));
        assert!(stored
            .iter()
            .any(|e| e.subject.as_deref() == Some("Weekly numbers") && e.importance.as_deref() == Some("high")));
        let _ = std::fs::remove_file(path);
    }
}
