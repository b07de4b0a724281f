use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use async_imap::types::Fetch;
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use futures::StreamExt;
use mailparse::{DispositionType, MailHeaderMap, ParsedMail};
use regex::Regex;
use rustls::pki_types::ServerName;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};
use tracing::{debug, info, warn};

use crate::config::{env_string, Config};
use crate::connectors::address::{
    decode_rfc2047, html_to_text, join_addresses, parse_address_list,
};
use crate::connectors::{lookback_start, ConnectorError, FetchOutcome, MailConnector, PAGE_CAP};
use crate::db::models::{Account, Provider};
use crate::db::Database;
use crate::message::{
    direction_for, preview_from, AttachmentMeta, CanonicalMessage, MessageHeaders,
};

pub const DEFAULT_IMAP_PORT: u16 = 993;
const INBOX: &str = "INBOX";
const FETCH_CHUNK: usize = 50;
const FULL_FETCH_QUERY: &str = "(UID INTERNALDATE BODY.PEEK[])";
const ENVELOPE_FETCH_QUERY: &str = "(UID INTERNALDATE ENVELOPE)";
const SECRET_PREFIX: &str = "env:";

type ImapSession = async_imap::Session<Compat<TlsStream<TcpStream>>>;

static TRAILING_COMMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*\([^()]*\)\s*$").expect("compile trailing date comment regex")
});

/// Where and as whom to log in. `label` prefixes error messages so delegated
/// providers report as themselves.
#[derive(Debug, Clone)]
pub struct ImapTarget {
    pub label: &'static str,
    pub host: String,
    pub port: u16,
    pub address: String,
    pub password: String,
}

pub struct ImapConnector {
    timeout: Duration,
    page_cap: usize,
}

impl ImapConnector {
    pub fn new(config: &Config) -> Self {
        Self {
            timeout: config.imap_timeout,
            page_cap: PAGE_CAP,
        }
    }

    pub fn with_page_cap(mut self, page_cap: usize) -> Self {
        self.page_cap = page_cap.max(1);
        self
    }

    /// Logs in, reads the inbox newest-first up to the page cap and logs out
    /// again whether or not the read succeeded.
    pub async fn fetch_mailbox(
        &self,
        target: &ImapTarget,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, ConnectorError> {
        let mut session = self.open_session(target).await?;
        let result = self.read_inbox(&mut session, target, since).await;

        match self.bounded(target, "logout", session.logout()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(host = %target.host, error = %e, "imap logout failed"),
            Err(e) => debug!(host = %target.host, error = %e, "imap logout timed out"),
        }

        result
    }

    /// Login and logout only.
    pub async fn check_login(&self, target: &ImapTarget) -> Result<(), ConnectorError> {
        let mut session = self.open_session(target).await?;
        if let Ok(Err(e)) = self.bounded(target, "logout", session.logout()).await {
            debug!(host = %target.host, error = %e, "imap logout failed");
        }
        Ok(())
    }

    async fn open_session(&self, target: &ImapTarget) -> Result<ImapSession, ConnectorError> {
        info!(host = %target.host, port = target.port, "connecting to imap server");

        let connection_error = |message: String| ConnectorError::Connection {
            provider: target.label,
            message,
        };

        let tcp = self
            .bounded(target, "connect", TcpStream::connect((target.host.as_str(), target.port)))
            .await?
            .map_err(|e| connection_error(format!("{}:{}: {e}", target.host, target.port)))?;

        let server_name = ServerName::try_from(target.host.clone())
            .map_err(|e| connection_error(format!("invalid host {}: {e}", target.host)))?;
        let tls = self
            .bounded(target, "tls handshake", tls_connector()?.connect(server_name, tcp))
            .await?
            .map_err(|e| connection_error(format!("tls handshake with {}: {e}", target.host)))?;

        let client = async_imap::Client::new(tls.compat());
        self.bounded(target, "login", client.login(&target.address, &target.password))
            .await?
            .map_err(|(e, _)| ConnectorError::Auth {
                provider: target.label,
                message: e.to_string(),
            })
    }

    async fn read_inbox(
        &self,
        session: &mut ImapSession,
        target: &ImapTarget,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, ConnectorError> {
        let mailbox = self.bounded(target, "select", session.select(INBOX)).await??;
        let uid_validity = mailbox.uid_validity;

        let start = lookback_start(since, Utc::now());
        let query = format!("SINCE {}", imap_since_date(start));
        let found = self
            .bounded(target, "search", session.uid_search(&query))
            .await??;
        let (uids, hit_page_cap) = newest_uids(found, self.page_cap);
        debug!(host = %target.host, count = uids.len(), hit_page_cap, "imap search complete");

        let mut messages = Vec::with_capacity(uids.len());
        let mut metadata_only = false;

        for chunk in uids.chunks(FETCH_CHUNK) {
            let uid_set = uid_sequence(chunk);

            let full = match self.bounded(target, "fetch", session.uid_fetch(&uid_set, FULL_FETCH_QUERY)).await? {
                Ok(stream) => Some(self.bounded(target, "fetch read", collect_tolerant(stream)).await?),
                Err(e) => {
                    warn!(host = %target.host, error = %e, "body fetch failed, falling back to envelopes");
                    None
                }
            };

            let parsed: Vec<CanonicalMessage> = full
                .unwrap_or_default()
                .iter()
                .filter_map(|fetch| message_from_body(fetch, &target.address, uid_validity))
                .collect();

            if !parsed.is_empty() || chunk.is_empty() {
                messages.extend(parsed);
                continue;
            }

            metadata_only = true;
            let stream = self
                .bounded(target, "envelope fetch", session.uid_fetch(&uid_set, ENVELOPE_FETCH_QUERY))
                .await??;
            let envelopes = self
                .bounded(target, "envelope read", collect_tolerant(stream))
                .await?;
            messages.extend(
                envelopes
                    .iter()
                    .filter_map(|fetch| message_from_envelope(fetch, &target.address, uid_validity)),
            );
        }

        info!(
            host = %target.host,
            count = messages.len(),
            metadata_only,
            "imap inbox read"
        );

        Ok(FetchOutcome {
            messages,
            metadata_only,
            hit_page_cap,
        })
    }

    async fn bounded<F, T>(
        &self,
        target: &ImapTarget,
        step: &str,
        future: F,
    ) -> Result<T, ConnectorError>
    where
        F: Future<Output = T>,
    {
        timeout(self.timeout, future)
            .await
            .map_err(|_| ConnectorError::Connection {
                provider: target.label,
                message: format!(
                    "{step} timed out after {}s ({})",
                    self.timeout.as_secs(),
                    target.host
                ),
            })
    }
}

#[async_trait(?Send)]
impl MailConnector for ImapConnector {
    fn provider(&self) -> Provider {
        Provider::Imap
    }

    async fn fetch(
        &self,
        _db: &Database,
        account: &Account,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, ConnectorError> {
        let host = account
            .imap_host
            .as_deref()
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .ok_or_else(|| ConnectorError::missing("IMAP host not configured"))?;
        let credentials = account.credentials();
        let password = resolve_secret(credentials.password())?;

        let target = ImapTarget {
            label: "IMAP",
            host: host.to_string(),
            port: account.imap_port.unwrap_or(DEFAULT_IMAP_PORT),
            address: account.email_address.clone(),
            password,
        };
        self.fetch_mailbox(&target, since).await
    }
}

/// Resolves a stored password, following `env:NAME` references.
pub fn resolve_secret(stored: Option<&str>) -> Result<String, ConnectorError> {
    let stored = stored
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ConnectorError::missing("IMAP password not configured"))?;

    match stored.strip_prefix(SECRET_PREFIX) {
        Some(name) => env_string(name.trim()).ok_or_else(|| {
            ConnectorError::missing(format!(
                "environment variable {} referenced by the stored password is not set",
                name.trim()
            ))
        }),
        None => Ok(stored.to_string()),
    }
}

/// Parses a provider date, tolerating trailing comments such as
/// `"Tue, 1 Jul 2025 10:00:00 +0000 (UTC)"`.
pub fn parse_provider_date(raw: &str) -> Option<DateTime<Utc>> {
    let cleaned = TRAILING_COMMENT.replace(raw.trim(), "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(cleaned) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(cleaned) {
        return Some(dt.with_timezone(&Utc));
    }
    mailparse::dateparse(cleaned)
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Like `parse_provider_date` but never fails: unparseable input means now.
pub fn sanitize_date(raw: &str) -> DateTime<Utc> {
    parse_provider_date(raw).unwrap_or_else(Utc::now)
}

pub fn imap_since_date(start: DateTime<Utc>) -> String {
    start.format("%d-%b-%Y").to_string()
}

fn newest_uids(found: HashSet<u32>, cap: usize) -> (Vec<u32>, bool) {
    let mut uids: Vec<u32> = found.into_iter().collect();
    uids.sort_unstable_by(|a, b| b.cmp(a));
    let hit_cap = uids.len() > cap;
    uids.truncate(cap);
    (uids, hit_cap)
}

fn uid_sequence(uids: &[u32]) -> String {
    uids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

async fn collect_tolerant<E: std::fmt::Display>(
    stream: impl futures::Stream<Item = Result<Fetch, E>>,
) -> Vec<Fetch> {
    futures::pin_mut!(stream);
    let mut items = Vec::new();
    while let Some(result) = stream.next().await {
        match result {
            Ok(fetch) => items.push(fetch),
            Err(e) => warn!(error = %e, "skipping unparseable imap response"),
        }
    }
    items
}

fn tls_connector() -> Result<TlsConnector, ConnectorError> {
    let root_store = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    let config = rustls::ClientConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| ConnectorError::Connection {
        provider: "IMAP",
        message: format!("tls configuration: {e}"),
    })?
    .with_root_certificates(root_store)
    .with_no_client_auth();

    Ok(TlsConnector::from(Arc::new(config)))
}

fn message_from_body(
    fetch: &Fetch,
    account_address: &str,
    uid_validity: Option<u32>,
) -> Option<CanonicalMessage> {
    let raw = fetch.body()?;
    let internal_date = fetch.internal_date();
    match parse_raw_message(raw, internal_date, account_address) {
        Ok(mut message) => {
            if message.message_id.is_none() {
                message.message_id = uid_message_id(uid_validity, fetch.uid);
            }
            Some(message)
        }
        Err(e) => {
            warn!(uid = ?fetch.uid, error = %e, "failed to parse message body");
            None
        }
    }
}

/// Builds a canonical message from a full RFC 5322 message.
pub fn parse_raw_message(
    raw: &[u8],
    internal_date: Option<DateTime<FixedOffset>>,
    account_address: &str,
) -> Result<CanonicalMessage, mailparse::MailParseError> {
    let parsed = mailparse::parse_mail(raw)?;
    let header = |name: &str| parsed.headers.get_first_value(name);

    let headers: MessageHeaders = parsed
        .headers
        .iter()
        .map(|h| (h.get_key(), h.get_value()))
        .collect();

    let from = header("From").unwrap_or_default();
    let received_at = header("Date")
        .as_deref()
        .and_then(parse_provider_date)
        .or_else(|| internal_date.map(|dt| dt.with_timezone(&Utc)))
        .unwrap_or_else(Utc::now);

    let (body_text, body_html) = first_text_parts(&parsed);
    let body_text = body_text.or_else(|| body_html.as_deref().and_then(html_to_text));
    let mut attachments = Vec::new();
    collect_attachments(&parsed, &mut attachments);

    let reply_to_id = header("In-Reply-To").and_then(|v| first_message_id(&v));
    let thread_id = header("References")
        .and_then(|v| first_message_id(&v))
        .or_else(|| reply_to_id.clone());

    Ok(CanonicalMessage {
        message_id: header("Message-ID").and_then(|v| first_message_id(&v)),
        thread_id,
        reply_to_id,
        direction: direction_for(&from, account_address),
        to: join_addresses(&parse_address_list(header("To").as_deref())).unwrap_or_default(),
        cc: join_addresses(&parse_address_list(header("Cc").as_deref())),
        bcc: join_addresses(&parse_address_list(header("Bcc").as_deref())),
        subject: header("Subject").unwrap_or_default(),
        preview: body_text.as_deref().map(preview_from).unwrap_or_default(),
        from,
        body_text,
        body_html,
        received_at: Some(received_at),
        attachments,
        headers,
        ..CanonicalMessage::default()
    })
}

/// First `text/plain` and first `text/html` leaf at any depth, skipping
/// parts that are attachments.
fn first_text_parts(part: &ParsedMail<'_>) -> (Option<String>, Option<String>) {
    if part.subparts.is_empty() {
        if is_attachment(part) {
            return (None, None);
        }
        let body = part.get_body().ok().filter(|b| !b.trim().is_empty());
        return match part.ctype.mimetype.to_ascii_lowercase().as_str() {
            "text/plain" => (body, None),
            "text/html" => (None, body),
            _ => (None, None),
        };
    }

    part.subparts
        .iter()
        .map(first_text_parts)
        .fold((None, None), |(text, html), (t, h)| {
            (text.or(t), html.or(h))
        })
}

fn collect_attachments(part: &ParsedMail<'_>, out: &mut Vec<AttachmentMeta>) {
    if part.subparts.is_empty() {
        if let Some(name) = attachment_name(part) {
            let size = part.get_body_raw().map(|b| b.len() as u64).unwrap_or(0);
            out.push(AttachmentMeta::new(name, part.ctype.mimetype.clone(), size));
        } else if part.ctype.mimetype.eq_ignore_ascii_case("text/calendar") {
            let size = part.get_body_raw().map(|b| b.len() as u64).unwrap_or(0);
            out.push(AttachmentMeta::new("invite.ics", part.ctype.mimetype.clone(), size));
        }
        return;
    }
    for sub in &part.subparts {
        collect_attachments(sub, out);
    }
}

fn attachment_name(part: &ParsedMail<'_>) -> Option<String> {
    let disposition = part.get_content_disposition();
    disposition
        .params
        .get("filename")
        .or_else(|| part.ctype.params.get("name"))
        .map(|name| decode_rfc2047(name))
        .filter(|name| !name.trim().is_empty())
}

fn is_attachment(part: &ParsedMail<'_>) -> bool {
    part.get_content_disposition().disposition == DispositionType::Attachment
        || attachment_name(part).is_some()
}

fn first_message_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let id = match (trimmed.find('<'), trimmed.find('>')) {
        (Some(start), Some(end)) if start < end => &trimmed[start + 1..end],
        _ => trimmed.split_whitespace().next().unwrap_or(""),
    };
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Mailbox-scoped id for messages without a `Message-ID` header. Stable for
/// as long as the server keeps the same UIDVALIDITY.
pub fn uid_message_id(uid_validity: Option<u32>, uid: Option<u32>) -> Option<String> {
    Some(format!("uid:{}:{}", uid_validity?, uid?))
}

fn message_from_envelope(
    fetch: &Fetch,
    account_address: &str,
    uid_validity: Option<u32>,
) -> Option<CanonicalMessage> {
    let envelope = fetch.envelope()?;
    let text = |value: &Option<std::borrow::Cow<'_, [u8]>>| {
        value
            .as_ref()
            .map(|v| decode_rfc2047(&String::from_utf8_lossy(v)))
    };

    let from = envelope
        .from
        .as_ref()
        .and_then(|addrs| addrs.first())
        .map(format_address)
        .unwrap_or_default();

    let received_at = text(&envelope.date)
        .as_deref()
        .and_then(parse_provider_date)
        .or_else(|| fetch.internal_date().map(|dt| dt.with_timezone(&Utc)))
        .unwrap_or_else(Utc::now);

    let reply_to_id = text(&envelope.in_reply_to).and_then(|v| first_message_id(&v));

    Some(CanonicalMessage {
        message_id: text(&envelope.message_id)
            .and_then(|v| first_message_id(&v))
            .or_else(|| uid_message_id(uid_validity, fetch.uid)),
        thread_id: reply_to_id.clone(),
        reply_to_id,
        direction: direction_for(&from, account_address),
        to: join_addresses(&envelope_addresses(&envelope.to)).unwrap_or_default(),
        cc: join_addresses(&envelope_addresses(&envelope.cc)),
        bcc: join_addresses(&envelope_addresses(&envelope.bcc)),
        subject: text(&envelope.subject).unwrap_or_default(),
        from,
        received_at: Some(received_at),
        ..CanonicalMessage::default()
    })
}

fn envelope_addresses(addrs: &Option<Vec<async_imap::imap_proto::Address<'_>>>) -> Vec<String> {
    addrs
        .as_ref()
        .map(|list| list.iter().filter_map(address_email).collect())
        .unwrap_or_default()
}

fn address_email(addr: &async_imap::imap_proto::Address<'_>) -> Option<String> {
    let mailbox = addr.mailbox.as_ref().map(|m| String::from_utf8_lossy(m).to_string())?;
    let host = addr.host.as_ref().map(|h| String::from_utf8_lossy(h).to_string())?;
    Some(format!("{mailbox}@{host}"))
}

fn format_address(addr: &async_imap::imap_proto::Address<'_>) -> String {
    let email = address_email(addr).unwrap_or_default();
    match addr
        .name
        .as_ref()
        .map(|n| decode_rfc2047(&String::from_utf8_lossy(n)))
        .filter(|n| !n.trim().is_empty())
    {
        Some(name) => format!("{name} <{email}>"),
        None => email,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use std::time::Duration;

    use async_imap::types::Fetch;
    use chrono::{Datelike, TimeZone, Utc};

    use super::{
        collect_tolerant, imap_since_date, newest_uids, parse_provider_date, parse_raw_message,
        resolve_secret, sanitize_date, uid_message_id, ImapConnector, ImapTarget,
    };
    use crate::config::Config;
    use crate::message::Direction;

    const RAW: &str = "From: Ana Ruiz <ana@example.com>\r\n\
To: owner@example.com, \"Gil, Pedro\" <pedro@example.com>\r\n\
Subject: =?UTF-8?Q?Reuni=C3=B3n?=\r\n\
Date: Tue, 1 Jul 2025 10:00:00 +0000 (UTC)\r\n\
Message-ID: <abc123@example.com>\r\n\
In-Reply-To: <root@example.com>\r\n\
Auto-Submitted: auto-replied\r\n\
MIME-Version: 1.0\r\n\
Content-Type: multipart/mixed; boundary=\"b1\"\r\n\
\r\n\
--b1\r\n\
Content-Type: multipart/alternative; boundary=\"b2\"\r\n\
\r\n\
--b2\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Hola equipo\r\n\
--b2\r\n\
Content-Type: text/html; charset=utf-8\r\n\
\r\n\
<p>Hola equipo</p>\r\n\
--b2--\r\n\
--b1\r\n\
Content-Type: text/calendar; name=\"invite.ics\"\r\n\
Content-Disposition: attachment; filename=\"invite.ics\"\r\n\
\r\n\
BEGIN:VCALENDAR\r\n\
END:VCALENDAR\r\n\
--b1--\r\n";

    #[test]
    fn trailing_parenthetical_zone_is_sanitized() {
        let parsed = parse_provider_date("Tue, 1 Jul 2025 10:00:00 +0000 (UTC)").expect("date");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap());

        let parsed = parse_provider_date("Wed, 2 Jul 2025 08:30:00 -0700 (Pacific Daylight Time)")
            .expect("date");
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 7, 2, 15, 30, 0).unwrap());
    }

    #[test]
    fn unparseable_dates_fall_back_to_now() {
        let before = Utc::now();
        let value = sanitize_date("not a date (really)");
        assert!(value >= before);
        assert!(parse_provider_date("").is_none());
    }

    #[test]
    fn raw_message_maps_to_canonical_fields() {
        let message =
            parse_raw_message(RAW.as_bytes(), None, "owner@example.com").expect("parse");

        assert_eq!(message.message_id.as_deref(), Some("abc123@example.com"));
        assert_eq!(message.reply_to_id.as_deref(), Some("root@example.com"));
        assert_eq!(message.subject, "Reunión");
        assert_eq!(message.to, "owner@example.com, pedro@example.com");
        assert_eq!(message.direction, Direction::Received);
        assert_eq!(message.body_text.as_deref().map(str::trim), Some("Hola equipo"));
        assert!(message.body_html.as_deref().unwrap_or("").contains("<p>"));
        assert_eq!(message.attachments.len(), 1);
        assert!(message.attachments[0].is_calendar);
        assert_eq!(message.headers.get("auto-submitted"), Some("auto-replied"));
        assert_eq!(
            message.received_at,
            Some(Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap())
        );
    }

    #[test]
    fn own_messages_are_sent() {
        let raw = "From: Owner <owner@example.com>\r\nSubject: hi\r\n\r\nbody\r\n";
        let message = parse_raw_message(raw.as_bytes(), None, "owner@example.com").expect("parse");
        assert_eq!(message.direction, Direction::Sent);
        assert!(message.message_id.is_none());
    }

    #[test]
    fn page_cap_keeps_newest_uids() {
        let found: HashSet<u32> = (1..=7).collect();
        let (uids, hit) = newest_uids(found, 5);
        assert_eq!(uids, vec![7, 6, 5, 4, 3]);
        assert!(hit);

        let (uids, hit) = newest_uids((1..=3).collect(), 5);
        assert_eq!(uids.len(), 3);
        assert!(!hit);
    }

    #[test]
    fn since_date_uses_imap_format() {
        let start = Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap();
        assert_eq!(imap_since_date(start), "05-Mar-2026");
        assert_eq!(crate::connectors::lookback_start(None, start).year(), 2025);
    }

    #[test]
    fn secrets_resolve_literally_or_from_environment() {
        assert_eq!(resolve_secret(Some("hunter2")).expect("literal"), "hunter2");
        assert!(resolve_secret(None).expect_err("missing").is_terminal());
        assert!(resolve_secret(Some("   ")).is_err());

        let err = resolve_secret(Some("env:MAILSYNC_TEST_SECRET_THAT_IS_NEVER_SET"))
            .expect_err("unset reference");
        assert!(err.to_string().contains("MAILSYNC_TEST_SECRET_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn uid_ids_need_both_halves() {
        assert_eq!(uid_message_id(Some(1_700_000), Some(42)).as_deref(), Some("uid:1700000:42"));
        assert_eq!(uid_message_id(None, Some(42)), None);
        assert_eq!(uid_message_id(Some(1_700_000), None), None);

        let raw = "From: ana@example.com\r\nSubject: no id\r\n\r\nbody\r\n";
        let message = parse_raw_message(raw.as_bytes(), None, "owner@example.com").expect("parse");
        assert!(message.message_id.is_none());
    }

    #[tokio::test]
    async fn stalled_fetch_read_times_out() {
        let connector = ImapConnector::new(&Config {
            imap_timeout: Duration::from_millis(50),
            ..Config::default()
        });
        let target = ImapTarget {
            label: "IMAP",
            host: "imap.example.com".to_string(),
            port: 993,
            address: "me@example.com".to_string(),
            password: "secret".to_string(),
        };

        let stalled = futures::stream::pending::<Result<Fetch, std::io::Error>>();
        let err = match connector
            .bounded(&target, "fetch read", collect_tolerant(stalled))
            .await
        {
            Ok(_) => panic!("stalled read should time out"),
            Err(e) => e,
        };
        assert!(err.to_string().contains("fetch read timed out"), "{err}");
    }
}
