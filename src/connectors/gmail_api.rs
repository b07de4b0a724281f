use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::{Config, OAuthClient};
use crate::connectors::address::{
    html_to_text, join_addresses, parse_address_list, redact_response_body,
};
use crate::connectors::oauth::refresh_access_token;
use crate::connectors::{lookback_start, ConnectorError, FetchOutcome, MailConnector, PAGE_CAP};
use crate::db::models::{Account, Provider};
use crate::db::Database;
use crate::message::{direction_for, preview_from, AttachmentMeta, CanonicalMessage, MessageHeaders};
use crate::ratelimit::RateLimitGuard;

const PROVIDER: &str = "Gmail";
const LIST_PAGE_SIZE: usize = 100;
/// Detail fetches in flight at once.
pub const DETAIL_BATCH_SIZE: usize = 10;

pub struct GmailApiConnector {
    client: Client,
    api_base: String,
    token_url: String,
    oauth: Option<OAuthClient>,
    guard: RateLimitGuard,
    page_cap: usize,
}

impl GmailApiConnector {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            api_base: config.gmail_api_base.trim_end_matches('/').to_string(),
            token_url: config.google_token_url.clone(),
            oauth: config.google.clone(),
            guard: RateLimitGuard::new(),
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

    /// `true` when the profile endpoint accepts the token.
    pub async fn check_token(&self, token: &str) -> Result<bool, ConnectorError> {
        let url = format!("{}/users/me/profile", self.api_base);
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
            None,
        )
        .await;

        refreshed
            .or_else(|| credentials.access_token().map(str::to_string))
            .ok_or_else(|| ConnectorError::missing("No Gmail access token"))
    }

    async fn get(&self, token: &str, url: &str, query: &[(&str, String)]) -> Result<Response, ConnectorError> {
        let response = self
            .guard
            .execute(|| {
                self.client
                    .get(url)
                    .bearer_auth(token)
                    .header("accept", "application/json")
                    .query(query)
            })
            .await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectorError::Throttled {
                provider: PROVIDER,
                attempts: self.guard.max_attempts(),
                body: redact_response_body(&body),
            });
        }
        Ok(response)
    }

    async fn list_message_ids(
        &self,
        token: &str,
        after: DateTime<Utc>,
    ) -> Result<(Vec<String>, bool), ConnectorError> {
        let url = format!("{}/users/me/messages", self.api_base);
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("q", format!("after:{}", after.timestamp())),
                ("maxResults", LIST_PAGE_SIZE.to_string()),
            ];
            if let Some(pt) = &page_token {
                query.push(("pageToken", pt.clone()));
            }

            let response = self.get(token, &url, &query).await?;
            let status = response.status();
            let body = response.text().await?;
            if !status.is_success() {
                return Err(ConnectorError::provider(PROVIDER, "list", status.as_u16(), &body));
            }

            let page: GmailMessageList = serde_json::from_str(&body)?;
            ids.extend(page.messages.unwrap_or_default().into_iter().map(|stub| stub.id));
            page_token = page.next_page_token;
            debug!(count = ids.len(), more = page_token.is_some(), "gmail list page");

            if ids.len() >= self.page_cap || page_token.is_none() {
                break;
            }
        }

        let hit_cap = ids.len() > self.page_cap || (ids.len() >= self.page_cap && page_token.is_some());
        ids.truncate(self.page_cap);
        Ok((ids, hit_cap))
    }

    async fn get_message(&self, token: &str, message_id: &str) -> Result<GmailMessage, ConnectorError> {
        let url = format!("{}/users/me/messages/{message_id}", self.api_base);
        let response = self
            .get(token, &url, &[("format", "full".to_string())])
            .await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(ConnectorError::provider(PROVIDER, "message", status.as_u16(), &body));
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait(?Send)]
impl MailConnector for GmailApiConnector {
    fn provider(&self) -> Provider {
        Provider::Gmail
    }

    async fn fetch(
        &self,
        _db: &Database,
        account: &Account,
        since: Option<DateTime<Utc>>,
    ) -> Result<FetchOutcome, ConnectorError> {
        let token = self.access_token(account).await?;
        let after = lookback_start(since, Utc::now());
        let (ids, hit_page_cap) = self.list_message_ids(&token, after).await?;
        info!(
            account = %account.email_address,
            count = ids.len(),
            hit_page_cap,
            "gmail message ids listed"
        );

        let mut messages = Vec::with_capacity(ids.len());
        for batch in ids.chunks(DETAIL_BATCH_SIZE) {
            let results = join_all(batch.iter().map(|id| self.get_message(&token, id))).await;
            for (id, result) in batch.iter().zip(results) {
                match result {
                    Ok(message) => messages.push(map_gmail_message(&message, &account.email_address)),
                    Err(e @ ConnectorError::Throttled { .. }) => return Err(e),
                    Err(e) if e.is_terminal() => return Err(e),
                    Err(e) => warn!(message_id = %id, error = %e, "skipping gmail message"),
                }
            }
        }

        Ok(FetchOutcome {
            messages,
            metadata_only: false,
            hit_page_cap,
        })
    }
}

pub(crate) fn map_gmail_message(message: &GmailMessage, account_address: &str) -> CanonicalMessage {
    let headers: MessageHeaders = message
        .payload
        .headers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .map(|h| (h.name.as_str(), h.value.as_str()))
        .collect();
    let header = |name: &str| headers.get(name).map(str::to_string);

    let from = header("from").unwrap_or_default();
    let body_html = find_body(&message.payload, "text/html");
    let body_text = find_body(&message.payload, "text/plain")
        .or_else(|| body_html.as_deref().and_then(html_to_text));

    let preview = body_text
        .as_deref()
        .map(preview_from)
        .or_else(|| message.snippet.as_deref().map(preview_from))
        .unwrap_or_default();

    let received_at = message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .unwrap_or_else(Utc::now);

    let mut attachments = Vec::new();
    collect_attachments(&message.payload, &mut attachments);

    CanonicalMessage {
        message_id: Some(message.id.clone()),
        thread_id: message.thread_id.clone(),
        reply_to_id: header("in-reply-to"),
        direction: direction_for(&from, account_address),
        to: join_addresses(&parse_address_list(headers.get("to"))).unwrap_or_default(),
        cc: join_addresses(&parse_address_list(headers.get("cc"))),
        bcc: join_addresses(&parse_address_list(headers.get("bcc"))),
        subject: header("subject").unwrap_or_default(),
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

/// First part of `mime_type` with decodable data, depth-first.
fn find_body(payload: &GmailPayload, mime_type: &str) -> Option<String> {
    let is_match = payload
        .mime_type
        .as_deref()
        .is_some_and(|m| m.eq_ignore_ascii_case(mime_type));
    let named = payload.filename.as_deref().is_some_and(|f| !f.is_empty());

    if is_match && !named {
        if let Some(decoded) = payload
            .body
            .as_ref()
            .and_then(|body| body.data.as_deref())
            .filter(|data| !data.is_empty())
            .and_then(decode_body_data)
        {
            return Some(decoded);
        }
    }

    payload
        .parts
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find_map(|part| find_body(part, mime_type))
}

fn collect_attachments(payload: &GmailPayload, out: &mut Vec<AttachmentMeta>) {
    if let Some(name) = payload.filename.as_deref().filter(|f| !f.is_empty()) {
        let size = payload.body.as_ref().and_then(|b| b.size).unwrap_or(0);
        out.push(AttachmentMeta::new(
            name,
            payload.mime_type.clone().unwrap_or_default(),
            size,
        ));
    }
    for part in payload.parts.as_deref().unwrap_or_default() {
        collect_attachments(part, out);
    }
}

fn decode_body_data(data: &str) -> Option<String> {
    // Gmail sometimes pads url-safe base64
    let bytes = URL_SAFE_NO_PAD.decode(data.trim_end_matches('=')).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[derive(Debug, Clone, Deserialize)]
struct GmailMessageList {
    messages: Option<Vec<GmailMessageStub>>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct GmailMessageStub {
    id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GmailMessage {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    pub snippet: Option<String>,
    pub payload: GmailPayload,
    #[serde(rename = "internalDate")]
    pub internal_date: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct GmailPayload {
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    pub headers: Option<Vec<GmailHeader>>,
    pub body: Option<GmailBody>,
    pub parts: Option<Vec<GmailPayload>>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GmailHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct GmailBody {
    pub size: Option<u64>,
    pub data: Option<String>,
}
