use anyhow::{bail, Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

use crate::db::schema;

const SCHEMA_VERSION_KEY: &str = "schema_version";

struct Migration {
    version: u32,
    name: &'static str,
    apply: fn(&Connection) -> Result<()>,
}

/// Applied in order; each step runs in its own transaction together with the
/// version bump.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "accounts, integrations and message cache",
        apply: schema::create_schema,
    },
    Migration {
        version: 2,
        name: "classification indexes",
        apply: schema::create_classification_indexes,
    },
];

fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS sync_state (
            key TEXT PRIMARY KEY,
            value TEXT,
            updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        );
        "#,
    )
    .context("create sync_state table")?;

    let current = stored_version(conn)?;
    if current > latest_version() {
        bail!(
            "database schema version {current} is newer than this build supports ({})",
            latest_version()
        );
    }

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        (migration.apply)(&tx)
            .with_context(|| format!("apply migration {} ({})", migration.version, migration.name))?;
        tx.execute(
            r#"
            INSERT INTO sync_state (key, value, updated_at)
            VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
            params![SCHEMA_VERSION_KEY, migration.version.to_string()],
        )?;
        tx.commit()?;
        info!(version = migration.version, name = migration.name, "schema migrated");
    }

    Ok(())
}

fn stored_version(conn: &Connection) -> Result<u32> {
    let raw: Option<Option<String>> = conn
        .query_row(
            "SELECT value FROM sync_state WHERE key = ?1",
            params![SCHEMA_VERSION_KEY],
            |row| row.get(0),
        )
        .optional()
        .context("read schema version")?;

    match raw.flatten() {
        None => Ok(0),
        Some(version) => version
            .trim()
            .parse::<u32>()
            .with_context(|| format!("unreadable schema version {version:?}")),
    }
}
