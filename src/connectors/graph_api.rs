use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::{Config, OAuthClient};
use crate::connectors::address::{html_to_text, join_addresses, redact_response_body};
use crate::connectors::imap::{parse_provider_date, resolve_secret, ImapConnector, ImapTarget};
use crate::connectors::oauth::refresh_access_token;
use crate::connectors::{lookback_start, ConnectorError, FetchOutcome, MailConnector, PAGE_CAP};
use crate::db::models::{Account, Provider};
use crate::db::Database;
use crate::message::{
    direction_for, truncate_chars, AttachmentMeta, CanonicalMessage, MessageHeaders,
    PREVIEW_CHARS,
};
use crate::ratelimit::RateLimitGuard;

const PROVIDER: &str = "Outlook";
pub const OUTLOOK_IMAP_HOST: &str = "outlook.office365.com";
pub const OUTLOOK_IMAP_PORT: u16 = 993;
const MAIL_READ_SCOPE: &str = "https://graph.microsoft.com/Mail.Read";
const GRAPH_PAGE_SIZE: usize = 50;
const MESSAGE_SELECT: &str = "id,subject,from,toRecipients,ccRecipients,bccRecipients,body,\
bodyPreview,receivedDateTime,conversationId,internetMessageId,hasAttachments,internetMessageHeaders";
const ATTACHMENT_EXPAND: &str = "attachments($select=name,contentType,size)";

pub struct GraphApiConnector {
    client: Client,
    api_base: String,
    token_url: String,
    oauth: Option<OAuthClient>,
    guard: RateLimitGuard,
    imap: ImapConnector,
    page_cap: usize,
}

impl GraphApiConnector {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            api_base: config.graph_api_base.trim_end_matches('/').to_string(),
            token_url: config.microsoft_token_url.clone(),
            oauth: config.microsoft.clone(),
            guard: RateLimitGuard::new(),
            imap: ImapConnector::new(config),
            page_cap: PAGE_CAP,
        }
    }

    pub fn with_rate_limit(mut self, guard: RateLimitGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_page_cap(mut self, page_cap: usize) -> Self {
        self.page_cap = page_cap.max(1);
        self
    }

    /// `true` when `/me` accepts the token.
    pub async fn check_token(&self, token: &str) -> Result<bool, ConnectorError> {
        let url = format!("{}/me", self.api_base);
        let response = self.client.get(&url).bearer_auth(token).send().await?;
        Ok(response.status().is_success())
    }

    async fn access_token(&self, account: &Account) -> Result<String, ConnectorError> {
        let credentials = account.credentials();
        let refreshed = refresh_access_token(
            &self.client,
            &self.token_url,
            self.oauth.as_ref(),
            credentials.refresh_token(),
            Some(MAIL_READ_SCOPE),
        )
        .await;

        refreshed
            .or_else(|| credentials.access_token().map(str::to_string))
            .ok_or_else(|| ConnectorError::missing("No Outlook access token"))
    }

    async fn get_page(&self, token: &str, url: &str) -> Result<GraphMessagesPage, ConnectorError> {
        let response: Response = self
            .guard
            .execute(|| {
                self.client
                    .get(url)
                    .bearer_auth(token)
                    .header("accept", "application/json")
                    .header("Prefer", "outlook.body-content-type=\"html\"")
            })
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ConnectorError::Throttled {
                provider: PROVIDER,
                attempts: self.guard.max_attempts(),
                body: redact_response_body(&body),
            });
        }
        if !status.is_success() {
            return Err(ConnectorError::provider(PROVIDER, "messages", status.as_u16(), &body));
        }
        Ok(serde_json::from_str(&body)?)
    }

    async fn fetch_rest(
        &self,
        account: &Account,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, ConnectorError> {
        let token = self.access_token(account).await?;
        let start = lookback_start(since, Utc::now());

        let first = reqwest::Url::parse_with_params(
            &format!("{}/me/messages", self.api_base),
            &[
                (
                    "$filter",
                    format!(
                        "receivedDateTime ge {}",
                        start.to_rfc3339_opts(SecondsFormat::Secs, true)
                    ),
                ),
                ("$orderby", "receivedDateTime desc".to_string()),
                ("$top", GRAPH_PAGE_SIZE.to_string()),
                ("$select", MESSAGE_SELECT.to_string()),
                ("$expand", ATTACHMENT_EXPAND.to_string()),
            ],
        )
        .map_err(|e| ConnectorError::Connection {
            provider: PROVIDER,
            message: format!("invalid graph url: {e}"),
        })?;

        let mut next = Some(first.to_string());
        let mut messages = Vec::new();
        while let Some(url) = next.take() {
            let page = self.get_page(&token, &url).await?;
            messages.extend(
                page.value
                    .iter()
                    .map(|message| map_graph_message(message, &account.email_address)),
            );
            debug!(count = messages.len(), more = page.next_link.is_some(), "graph page");

            next = page.next_link;
            if messages.len() >= self.page_cap {
                break;
            }
        }

        let hit_page_cap = messages.len() > self.page_cap || (messages.len() >= self.page_cap && next.is_some());
        messages.truncate(self.page_cap);
        info!(
            account = %account.email_address,
            count = messages.len(),
            hit_page_cap,
            "graph messages fetched"
        );

        Ok(FetchOutcome {
            messages,
            metadata_only: false,
            hit_page_cap,
        })
    }
}

#[async_trait(?Send)]
impl MailConnector for GraphApiConnector {
    fn provider(&self) -> Provider {
        Provider::Outlook
    }

    async fn fetch(
        &self,
        _db: &Database,
        account: &Account,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, ConnectorError> {
        let credentials = account.credentials();
        if credentials.password().is_some() {
            debug!(account = %account.email_address, "outlook password configured, using imap");
            let target = ImapTarget {
                label: "Outlook IMAP",
                host: OUTLOOK_IMAP_HOST.to_string(),
                port: OUTLOOK_IMAP_PORT,
                address: account.email_address.clone(),
                password: resolve_secret(credentials.password())?,
            };
            return self.imap.fetch_mailbox(&target, since).await;
        }

        self.fetch_rest(account, since).await
    }
}

pub(crate) fn map_graph_message(message: &GraphMessage, account_address: &str) -> CanonicalMessage {
    let from = message
        .from
        .as_ref()
        .map(GraphRecipient::display)
        .unwrap_or_default();

    let headers: MessageHeaders = message
        .internet_message_headers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|h| (h.name.as_str(), h.value.as_str()))
        .collect();

    let (body_text, body_html) = body_fields(message.body.as_ref());
    let preview = message
        .body_preview
        .as_deref()
        .map(|p| truncate_chars(p.trim(), PREVIEW_CHARS))
        .unwrap_or_default();

    let received_at = message
        .received_date_time
        .as_deref()
        .and_then(parse_provider_date)
        .unwrap_or_else(Utc::now);

    let attachments = message
        .attachments
        .as_deref()
        .unwrap_or_default()
        .iter()
        .filter_map(|a| {
            let name = a.name.as_deref().filter(|n| !n.trim().is_empty())?;
            Some(AttachmentMeta::new(
                name,
                a.content_type.clone().unwrap_or_default(),
                a.size.unwrap_or(0),
            ))
        })
        .collect();

    CanonicalMessage {
        message_id: message.id.clone(),
        thread_id: message.conversation_id.clone(),
        reply_to_id: headers
            .get("in-reply-to")
            .map(|v| v.trim_matches(|c| c == '<' || c == '>').to_string()),
        direction: direction_for(&from, account_address),
        to: join_addresses(&recipient_addresses(message.to_recipients.as_deref())).unwrap_or_default(),
        cc: join_addresses(&recipient_addresses(message.cc_recipients.as_deref())),
        bcc: join_addresses(&recipient_addresses(message.bcc_recipients.as_deref())),
        subject: message.subject.clone().unwrap_or_default(),
        from,
        preview,
        body_text,
        body_html,
        received_at: Some(received_at),
        attachments,
        headers,
        ..CanonicalMessage::default()
    }
}

fn body_fields(body: Option<&GraphBody>) -> (Option<String>, Option<String>) {
    let Some(body) = body else {
        return (None, None);
    };

    let Some(content) = body
        .content
        .as_deref()
        .map(str::trim)
        .filter(|value| !value.is_empty())
    else {
        return (None, None);
    };

    if body
        .content_type
        .as_deref()
        .is_some_and(|kind| kind.eq_ignore_ascii_case("html"))
    {
        return (html_to_text(content), Some(content.to_string()));
    }

    (Some(content.to_string()), None)
}

fn recipient_addresses(recipients: Option<&[GraphRecipient]>) -> Vec<String> {
    recipients
        .unwrap_or_default()
        .iter()
        .filter_map(GraphRecipient::address)
        .map(str::to_string)
        .collect()
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GraphMessagesPage {
    pub value: Vec<GraphMessage>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GraphMessage {
    id: Option<String>,
    subject: Option<String>,
    from: Option<GraphRecipient>,
    #[serde(rename = "toRecipients")]
    to_recipients: Option<Vec<GraphRecipient>>,
    #[serde(rename = "ccRecipients")]
    cc_recipients: Option<Vec<GraphRecipient>>,
    #[serde(rename = "bccRecipients")]
    bcc_recipients: Option<Vec<GraphRecipient>>,
    body: Option<GraphBody>,
    #[serde(rename = "bodyPreview")]
    body_preview: Option<String>,
    #[serde(rename = "conversationId")]
    conversation_id: Option<String>,
    #[serde(rename = "receivedDateTime")]
    received_date_time: Option<String>,
    #[serde(rename = "internetMessageHeaders")]
    internet_message_headers: Option<Vec<GraphHeader>>,
    attachments: Option<Vec<GraphAttachment>>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphRecipient {
    #[serde(rename = "emailAddress")]
    email_address: Option<GraphEmailAddress>,
}

impl GraphRecipient {
    fn address(&self) -> Option<&str> {
        self.email_address
            .as_ref()
            .and_then(|email| email.address.as_deref())
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// `"Name <address>"`, or just the address when there is no name.
    fn display(&self) -> String {
        let address = self.address().unwrap_or_default();
        let name = self
            .email_address
            .as_ref()
            .and_then(|email| email.name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty() && *name != address);
        match name {
            Some(name) => format!("{name} <{address}>"),
            None => address.to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct GraphEmailAddress {
    name: Option<String>,
    address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphBody {
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    content: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphHeader {
    name: String,
    value: String,
}

#[derive(Debug, Clone, Deserialize)]
struct GraphAttachment {
    name: Option<String>,
    #[serde(rename = "contentType")]
    content_type: Option<String>,
    size: Option<u64>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{map_graph_message, GraphMessagesPage};
    use crate::message::Direction;

    #[test]
    fn flattened_message_maps_to_canonical_fields() {
        let page: GraphMessagesPage = serde_json::from_value(json!({
            "value": [{
                "id": "AAMk-1",
                "subject": "Status",
                "from": { "emailAddress": { "name": "Owner", "address": "owner@contoso.com" } },
                "toRecipients": [
                    { "emailAddress": { "address": "a@contoso.com" } },
                    { "emailAddress": { "address": "b@contoso.com" } }
                ],
                "body": { "contentType": "html", "content": "<p>All <b>green</b></p>" },
                "bodyPreview": "All green",
                "conversationId": "conv-1",
                "receivedDateTime": "2025-07-01T10:00:00Z",
                "internetMessageHeaders": [
                    { "name": "In-Reply-To", "value": "<root@contoso.com>" },
                    { "name": "Precedence", "value": "bulk" }
                ],
                "attachments": [
                    { "name": "meeting.ics", "contentType": "text/calendar", "size": 900 }
                ]
            }],
            "@odata.nextLink": "https://graph.example/next"
        }))
        .expect("graph fixture");

        assert!(page.next_link.is_some());
        let message = map_graph_message(&page.value[0], "owner@contoso.com");
        assert_eq!(message.message_id.as_deref(), Some("AAMk-1"));
        assert_eq!(message.thread_id.as_deref(), Some("conv-1"));
        assert_eq!(message.reply_to_id.as_deref(), Some("root@contoso.com"));
        assert_eq!(message.from, "Owner <owner@contoso.com>");
        assert_eq!(message.direction, Direction::Sent);
        assert_eq!(message.to, "a@contoso.com, b@contoso.com");
        assert!(message.body_text.as_deref().unwrap_or("").contains("green"));
        assert!(message.body_html.as_deref().unwrap_or("").contains("<b>"));
        assert_eq!(message.preview, "All green");
        assert!(message.attachments[0].is_calendar);
        assert_eq!(message.headers.get("precedence"), Some("bulk"));
    }

    #[test]
    fn long_previews_are_cut() {
        let page: GraphMessagesPage = serde_json::from_value(json!({
            "value": [{ "id": "x", "bodyPreview": "y".repeat(400) }]
        }))
        .expect("fixture");
        let message = map_graph_message(&page.value[0], "owner@contoso.com");
        assert_eq!(message.preview.chars().count(), 200);
        assert_eq!(message.direction, Direction::Received);
        assert!(message.body_text.is_none());
    }
}
