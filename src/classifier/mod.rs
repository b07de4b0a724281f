//! Heuristic labelling of canonical messages.
//!
//! Everything here is pure: a message goes in, labels come out, and the same
//! rules apply whichever adapter produced the message.

use std::sync::LazyLock;

use regex::Regex;

use crate::message::{CanonicalMessage, EmailType, Importance, MessageHeaders};

pub mod language;
pub mod signature;

pub use language::detect_language;
pub use signature::{extract_signature, ExtractedSignature};

const TRANSCRIPTION_MARKERS: &[&str] = &["plaud", "notepin"];

const BULK_SENDER_PREFIXES: &[&str] = &[
    "noreply@",
    "no-reply@",
    "donotreply@",
    "do-not-reply@",
    "newsletter@",
    "newsletters@",
    "news@",
    "marketing@",
    "mailer@",
    "digest@",
    "bulletin@",
    "boletin@",
];

const NOTIFICATION_DOMAINS: &[&str] = &[
    "github.com",
    "gitlab.com",
    "bitbucket.org",
    "atlassian.net",
    "atlassian.com",
    "slack.com",
    "notion.so",
    "trello.com",
    "asana.com",
    "linear.app",
    "figma.com",
    "clickup.com",
    "monday.com",
];

const URGENT_MARKERS: &[&str] = &[
    "urgent",
    "urgente",
    "asap",
    "action required",
    "acción requerida",
    "immediate",
    "inmediato",
    "critical",
    "crítico",
    "importante",
    "important",
];

const LOW_PRIORITY_MARKERS: &[&str] = &[
    "not urgent",
    "no urgente",
    "low priority",
    "baja prioridad",
    "fyi",
    "para tu información",
    "para su información",
];

const AUTO_REPLY_HEADERS: &[&str] = &["x-auto-response-suppress", "x-autoreply", "x-autorespond"];

const AUTO_REPLY_PRECEDENCE: &[&str] = &["bulk", "auto_reply", "auto-reply", "junk"];

static FORWARD_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:(?:re|aw)\s*:\s*)*(?:fw|fwd|rv|tr|wg|enc|reenviado)\s*:")
        .expect("compile forward prefix regex")
});

static FORWARD_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(?:-+\s*forwarded message\s*-+|-+\s*original message\s*-+|-+\s*mensaje (?:reenviado|original)\s*-+|-+\s*message transf[ée]r[ée]\s*-+|begin forwarded message:)",
    )
    .expect("compile forward block regex")
});

static FROM_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^[\s>]*\*?(?:from|de|von|da)\s*:\*?\s*(.+?)\s*$")
        .expect("compile localized from regex")
});

static ADDRESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("compile address regex")
});

/// Fills every classification field on `message`.
pub fn classify(message: &mut CanonicalMessage) {
    let body = message.text_for_analysis().to_string();

    message.is_forwarded = is_forwarded(&message.subject);
    message.original_sender = if message.is_forwarded {
        recover_original_sender(&body)
    } else {
        None
    };
    message.is_auto_reply = is_auto_reply(&message.headers);
    message.language = detect_language(&body);

    match extract_signature(&body) {
        Some(ExtractedSignature { raw, fields }) => {
            message.signature_raw = Some(raw);
            message.signature = Some(fields);
        }
        None => {
            message.signature_raw = None;
            message.signature = None;
        }
    }

    message.email_type = classify_type(message);
    message.importance = classify_importance(&message.subject);
}

/// First matching rule wins. Transcription markers are checked before the
/// bulk-sender rule so recorder mail from a marketing address keeps its type.
pub fn classify_type(message: &CanonicalMessage) -> EmailType {
    let kind = if is_transcription(&message.from, &message.subject) {
        EmailType::PlaudTranscription
    } else if is_auto_reply(&message.headers) {
        EmailType::AutoReply
    } else if is_bulk_sender(&message.from) || message.headers.contains("list-unsubscribe") {
        EmailType::Newsletter
    } else if is_notification_sender(&message.from) {
        EmailType::Notification
    } else if message.attachments.iter().any(|a| a.is_calendar) {
        EmailType::CalendarInvite
    } else {
        EmailType::Personal
    };

    if message.has_body() {
        kind
    } else {
        EmailType::MetadataOnly
    }
}

pub fn classify_importance(subject: &str) -> Importance {
    let subject = subject.to_lowercase();
    if LOW_PRIORITY_MARKERS.iter().any(|m| contains_word(&subject, m)) {
        return Importance::Low;
    }
    if URGENT_MARKERS.iter().any(|m| contains_word(&subject, m)) {
        return Importance::High;
    }
    Importance::Normal
}

pub fn is_forwarded(subject: &str) -> bool {
    FORWARD_PREFIX.is_match(subject)
}

pub fn is_auto_reply(headers: &MessageHeaders) -> bool {
    if let Some(value) = headers.get("auto-submitted") {
        if !value.trim().eq_ignore_ascii_case("no") {
            return true;
        }
    }

    if AUTO_REPLY_HEADERS.iter().any(|name| headers.contains(name)) {
        return true;
    }

    headers
        .get("precedence")
        .map(|value| {
            let value = value.trim().to_ascii_lowercase();
            AUTO_REPLY_PRECEDENCE.contains(&value.as_str())
        })
        .unwrap_or(false)
}

/// Looks for the sender of a forwarded message, preferring the `From:` line
/// inside a forwarded block over any other localized `From:` line.
pub fn recover_original_sender(body: &str) -> Option<String> {
    let search_from = FORWARD_BLOCK.find(body).map(|m| m.end()).unwrap_or(0);
    let captured = FROM_LINE
        .captures(&body[search_from..])
        .or_else(|| FROM_LINE.captures(body))?;
    let value = captured.get(1)?.as_str();

    ADDRESS
        .find(value)
        .map(|m| m.as_str().to_ascii_lowercase())
        .or_else(|| Some(value.trim_matches(|c| c == '"' || c == '*').trim().to_string()))
        .filter(|value| !value.is_empty())
}

fn is_transcription(from: &str, subject: &str) -> bool {
    let from = from.to_ascii_lowercase();
    let subject = subject.to_ascii_lowercase();
    TRANSCRIPTION_MARKERS
        .iter()
        .any(|marker| from.contains(marker) || subject.contains(marker))
}

fn is_bulk_sender(from: &str) -> bool {
    let address = sender_address(from);
    BULK_SENDER_PREFIXES
        .iter()
        .any(|prefix| address.starts_with(prefix))
}

fn is_notification_sender(from: &str) -> bool {
    let address = sender_address(from);
    let Some((_, domain)) = address.rsplit_once('@') else {
        return false;
    };
    NOTIFICATION_DOMAINS
        .iter()
        .any(|known| domain == *known || domain.ends_with(&format!(".{known}")))
}

fn sender_address(from: &str) -> String {
    ADDRESS
        .find(from)
        .map(|m| m.as_str())
        .unwrap_or(from)
        .trim()
        .to_ascii_lowercase()
}

fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(idx, _)| {
        let before = haystack[..idx].chars().next_back();
        let after = haystack[idx + needle.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}
