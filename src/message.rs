use std::fmt::{Display, Formatter};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const MAX_HEADER_CHARS: usize = 500;
pub const MAX_BODY_CHARS: usize = 50_000;
pub const MAX_SIGNATURE_CHARS: usize = 500;
pub const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Sent,
    #[default]
    Received,
}

impl Display for Direction {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sent => f.write_str("sent"),
            Self::Received => f.write_str("received"),
        }
    }
}

/// `sent` iff the sender field contains the mailbox's own address.
pub fn direction_for(from: &str, account_address: &str) -> Direction {
    let own = account_address.trim().to_ascii_lowercase();
    if !own.is_empty() && from.to_ascii_lowercase().contains(&own) {
        Direction::Sent
    } else {
        Direction::Received
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmailType {
    #[default]
    Personal,
    Newsletter,
    Notification,
    AutoReply,
    CalendarInvite,
    PlaudTranscription,
    MetadataOnly,
}

impl EmailType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Newsletter => "newsletter",
            Self::Notification => "notification",
            Self::AutoReply => "auto_reply",
            Self::CalendarInvite => "calendar_invite",
            Self::PlaudTranscription => "plaud_transcription",
            Self::MetadataOnly => "metadata_only",
        }
    }
}

impl Display for EmailType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EmailType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "personal" => Ok(Self::Personal),
            "newsletter" => Ok(Self::Newsletter),
            "notification" => Ok(Self::Notification),
            "auto_reply" => Ok(Self::AutoReply),
            "calendar_invite" => Ok(Self::CalendarInvite),
            "plaud_transcription" => Ok(Self::PlaudTranscription),
            "metadata_only" => Ok(Self::MetadataOnly),
            other => Err(format!("invalid email type: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    High,
    #[default]
    Normal,
    Low,
}

impl Display for Importance {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => f.write_str("high"),
            Self::Normal => f.write_str("normal"),
            Self::Low => f.write_str("low"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Es,
    En,
    Fr,
    #[default]
    Unknown,
}

impl Display for Language {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Es => f.write_str("es"),
            Self::En => f.write_str("en"),
            Self::Fr => f.write_str("fr"),
            Self::Unknown => f.write_str("unknown"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentMeta {
    pub name: String,
    pub mime_type: String,
    pub size: u64,
    pub is_calendar: bool,
}

impl AttachmentMeta {
    pub fn new(name: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        let name = name.into();
        let mime_type = mime_type.into();
        let is_calendar = is_calendar_attachment(&name, &mime_type);
        Self {
            name,
            mime_type,
            size,
            is_calendar,
        }
    }
}

pub fn is_calendar_attachment(name: &str, mime_type: &str) -> bool {
    let name = name.to_ascii_lowercase();
    let mime = mime_type.to_ascii_lowercase();
    name.ends_with(".ics") || name.ends_with(".vcs") || mime.starts_with("text/calendar")
}

/// Contact data recovered from a signature block. Keys keep the names the
/// downstream readers of `signature_parsed` expect.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SignatureFields {
    #[serde(rename = "telefono", skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(rename = "linkedin", skip_serializing_if = "Option::is_none")]
    pub linkedin: Option<String>,
    #[serde(rename = "web", skip_serializing_if = "Option::is_none")]
    pub website: Option<String>,
    #[serde(rename = "cargo", skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "empresa", skip_serializing_if = "Option::is_none")]
    pub organization: Option<String>,
    #[serde(rename = "email", skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl SignatureFields {
    pub fn is_empty(&self) -> bool {
        self.phone.is_none()
            && self.linkedin.is_none()
            && self.website.is_none()
            && self.title.is_none()
            && self.organization.is_none()
            && self.email.is_none()
    }
}

/// Header signals the classifier looks at. Names are stored lowercased.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageHeaders {
    entries: Vec<(String, String)>,
}

impl MessageHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: &str, value: &str) {
        self.entries
            .push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.entries
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for MessageHeaders {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Self::new();
        for (name, value) in iter {
            headers.push(name.as_ref(), value.as_ref());
        }
        headers
    }
}

/// Provider-agnostic message produced by every adapter. Classification
/// fields start at their defaults and are filled by `classifier::classify`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CanonicalMessage {
    pub message_id: Option<String>,
    pub thread_id: Option<String>,
    pub reply_to_id: Option<String>,
    pub from: String,
    pub to: String,
    pub cc: Option<String>,
    pub bcc: Option<String>,
    pub subject: String,
    pub preview: String,
    pub body_text: Option<String>,
    pub body_html: Option<String>,
    pub received_at: Option<DateTime<Utc>>,
    pub direction: Direction,
    pub attachments: Vec<AttachmentMeta>,
    pub headers: MessageHeaders,
    pub is_forwarded: bool,
    pub original_sender: Option<String>,
    pub is_auto_reply: bool,
    pub language: Language,
    pub signature_raw: Option<String>,
    pub signature: Option<SignatureFields>,
    pub email_type: EmailType,
    pub importance: Importance,
}

impl CanonicalMessage {
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    pub fn has_body(&self) -> bool {
        let present = |value: &Option<String>| {
            value
                .as_deref()
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
        };
        present(&self.body_text) || present(&self.body_html)
    }

    /// Body text, or the html body when no plain part was available.
    pub fn text_for_analysis(&self) -> &str {
        self.body_text
            .as_deref()
            .filter(|text| !text.trim().is_empty())
            .or(self.body_html.as_deref())
            .unwrap_or("")
    }

    /// Caps every stored text field to its maximum length.
    pub fn truncate_fields(&mut self) {
        truncate_in_place(&mut self.from, MAX_HEADER_CHARS);
        truncate_in_place(&mut self.subject, MAX_HEADER_CHARS);
        truncate_in_place(&mut self.preview, MAX_HEADER_CHARS);
        if let Some(text) = self.body_text.as_mut() {
            truncate_in_place(text, MAX_BODY_CHARS);
        }
        if let Some(html) = self.body_html.as_mut() {
            truncate_in_place(html, MAX_BODY_CHARS);
        }
        if let Some(signature) = self.signature_raw.as_mut() {
            truncate_in_place(signature, MAX_SIGNATURE_CHARS);
        }
    }
}

pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    value.chars().take(max_chars).collect()
}

fn truncate_in_place(value: &mut String, max_chars: usize) {
    if let Some((idx, _)) = value.char_indices().nth(max_chars) {
        value.truncate(idx);
    }
}

/// Collapses whitespace and keeps the first `PREVIEW_CHARS` characters.
pub fn preview_from(body: &str) -> String {
    let collapsed = body.split_whitespace().collect::<Vec<_>>().join(" ");
    truncate_chars(&collapsed, PREVIEW_CHARS)
}

#[cfg(test)]
mod tests {
    use super::{
        direction_for, preview_from, AttachmentMeta, CanonicalMessage, Direction, EmailType,
        MessageHeaders, SignatureFields, MAX_BODY_CHARS, MAX_HEADER_CHARS,
    };

    #[test]
    fn direction_sent_when_sender_contains_own_address() {
        assert_eq!(
            direction_for("Me <Owner@Example.com>", "owner@example.com"),
            Direction::Sent
        );
        assert_eq!(
            direction_for("Someone <someone@example.com>", "owner@example.com"),
            Direction::Received
        );
        assert_eq!(direction_for("anyone@example.com", ""), Direction::Received);
    }

    #[test]
    fn calendar_flag_from_name_or_mime() {
        assert!(AttachmentMeta::new("invite.ics", "application/octet-stream", 10).is_calendar);
        assert!(AttachmentMeta::new("event", "text/calendar; method=REQUEST", 10).is_calendar);
        assert!(!AttachmentMeta::new("report.pdf", "application/pdf", 10).is_calendar);
    }

    #[test]
    fn email_type_roundtrips_through_strings() {
        for kind in [
            EmailType::Personal,
            EmailType::AutoReply,
            EmailType::PlaudTranscription,
            EmailType::MetadataOnly,
        ] {
            assert_eq!(kind.to_string().parse::<EmailType>().expect("parse"), kind);
        }
        let json = serde_json::to_string(&EmailType::CalendarInvite).expect("serialize");
        assert_eq!(json, "\"calendar_invite\"");
    }

    #[test]
    fn signature_fields_use_stored_key_names() {
        let fields = SignatureFields {
            phone: Some("+34600123456".to_string()),
            title: Some("CTO".to_string()),
            ..SignatureFields::default()
        };
        let json = serde_json::to_value(&fields).expect("serialize");
        assert_eq!(json["telefono"], "+34600123456");
        assert_eq!(json["cargo"], "CTO");
        assert!(json.get("empresa").is_none());
    }

    #[test]
    fn headers_lookup_is_case_insensitive() {
        let headers: MessageHeaders = [("Auto-Submitted", "auto-replied")].into_iter().collect();
        assert_eq!(headers.get("auto-submitted"), Some("auto-replied"));
        assert!(!headers.contains("precedence"));
    }

    #[test]
    fn truncate_fields_caps_on_char_boundaries() {
        let mut message = CanonicalMessage {
            subject: "ñ".repeat(MAX_HEADER_CHARS + 20),
            body_text: Some("a".repeat(MAX_BODY_CHARS + 1)),
            ..CanonicalMessage::default()
        };
        message.truncate_fields();
        assert_eq!(message.subject.chars().count(), MAX_HEADER_CHARS);
        assert_eq!(
            message.body_text.as_deref().map(str::len),
            Some(MAX_BODY_CHARS)
        );
    }

    #[test]
    fn preview_collapses_whitespace() {
        assert_eq!(preview_from("Hello\n\n  world\t!"), "Hello world !");
    }
}
