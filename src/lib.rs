//! Mailbox synchronization engine.
//!
//! Accounts live in a SQLite store. Each run fetches new mail per account
//! through the provider's adapter (IMAP, Gmail REST, Microsoft Graph or
//! iCloud over IMAP), labels it with the heuristic classifier and upserts the
//! result into `emails_cache`.

pub mod classifier;
pub mod config;
pub mod connectors;
pub mod db;
pub mod message;
pub mod output;
pub mod ratelimit;
pub mod sync;
pub mod trigger;
