use crate::EmailError;
use async_trait::async_trait;
use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use zenmail_core::MailFolder;

#[async_trait]
pub trait MailBackend: Send + Sync {
    async fn list_message_ids(
        &self,
        folder: MailFolder,
        limit: usize,
    ) -> Result<Vec<String>, EmailError>;

    async fn get_message(&self, id: &str) -> Result<GmailMessage, EmailError>;

    /// Returns the provider id of the sent message.
    async fn send_raw(&self, raw: &str, thread_id: Option<&str>) -> Result<String, EmailError>;
}

#[derive(Debug, Deserialize)]
struct GmailListMessagesResponse {
    messages: Option<Vec<GmailMessageRef>>,
}

#[derive(Debug, Deserialize)]
struct GmailMessageRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct GmailSendResponse {
    id: String,
}

#[derive(Debug, Serialize)]
struct GmailSendRequest<'a> {
    raw: &'a str,
    #[serde(rename = "threadId", skip_serializing_if = "Option::is_none")]
    thread_id: Option<&'a str>,
}

/// Message resource as returned by `format=full`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GmailMessage {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    pub payload: Option<MessagePayload>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePayload {
    #[serde(default)]
    pub headers: Vec<MessageHeader>,
    pub body: Option<MessagePartBody>,
    #[serde(default)]
    pub parts: Vec<MessagePart>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessageHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePart {
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    pub body: Option<MessagePartBody>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagePartBody {
    pub data: Option<String>,
}

impl GmailMessage {
    /// Value of the first header named `key` (case-insensitive). An empty
    /// value counts as absent.
    pub fn header(&self, key: &str) -> Option<&str> {
        self.payload
            .as_ref()?
            .headers
            .iter()
            .find(|header| header.name.eq_ignore_ascii_case(key))
            .map(|header| header.value.as_str())
            .filter(|value| !value.is_empty())
    }

    /// Encoded body: the top-level data when present, otherwise the first
    /// immediate `text/plain` part (which may itself be empty).
    pub fn body_data(&self) -> Option<&str> {
        let payload = self.payload.as_ref()?;
        let top_level = payload
            .body
            .as_ref()
            .and_then(|body| body.data.as_deref())
            .filter(|data| !data.is_empty());
        if top_level.is_some() {
            return top_level;
        }

        payload
            .parts
            .iter()
            .find(|part| part.mime_type.as_deref() == Some("text/plain"))
            .map(|part| {
                part.body
                    .as_ref()
                    .and_then(|body| body.data.as_deref())
                    .unwrap_or_default()
            })
    }
}

pub(crate) fn decode_body_data(data: &str) -> Result<String, EmailError> {
    let bytes = URL_SAFE_NO_PAD
        .decode(data.as_bytes())
        .or_else(|_| URL_SAFE.decode(data.as_bytes()))
        .map_err(|err| EmailError::Data(format!("invalid Gmail body payload: {err}")))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Gmail REST client bound to one access token. Built per request.
#[derive(Clone)]
pub struct GmailClient {
    http: reqwest::Client,
    api_base: String,
    access_token: String,
}

impl std::fmt::Debug for GmailClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmailClient")
            .field("api_base", &self.api_base)
            .field("access_token", &"[REDACTED]")
            .finish()
    }
}

impl GmailClient {
    pub fn new(
        http: reqwest::Client,
        api_base: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            access_token: access_token.into(),
        }
    }

    fn messages_url(&self) -> String {
        format!("{}/users/me/messages", self.api_base)
    }
}

/// Turns a non-2xx response into [`EmailError::Api`], preferring the
/// provider's `error.message`.
async fn api_error(response: reqwest::Response) -> EmailError {
    let status = response.status();
    let fallback = format!("Gmail request failed with status {status}");
    let message = match response.json::<serde_json::Value>().await {
        Ok(body) => body
            .pointer("/error/message")
            .and_then(|value| value.as_str())
            .map(str::to_string)
            .unwrap_or(fallback),
        Err(_) => fallback,
    };
    EmailError::Api {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl MailBackend for GmailClient {
    async fn list_message_ids(
        &self,
        folder: MailFolder,
        limit: usize,
    ) -> Result<Vec<String>, EmailError> {
        let mut query = vec![("maxResults", limit.to_string())];
        if let Some(label) = folder.label_id() {
            query.push(("labelIds", label.to_string()));
        }

        let response = self
            .http
            .get(self.messages_url())
            .bearer_auth(&self.access_token)
            .query(&query)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let payload: GmailListMessagesResponse = response.json().await?;
        Ok(payload
            .messages
            .unwrap_or_default()
            .into_iter()
            .map(|item| item.id)
            .collect())
    }

    async fn get_message(&self, id: &str) -> Result<GmailMessage, EmailError> {
        let response = self
            .http
            .get(format!("{}/{}", self.messages_url(), id))
            .bearer_auth(&self.access_token)
            .query(&[("format", "full")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        Ok(response.json().await?)
    }

    async fn send_raw(&self, raw: &str, thread_id: Option<&str>) -> Result<String, EmailError> {
        let request = GmailSendRequest {
            raw,
            thread_id: thread_id.filter(|id| !id.is_empty()),
        };

        let response = self
            .http
            .post(format!("{}/send", self.messages_url()))
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(api_error(response).await);
        }

        let payload: GmailSendResponse = response.json().await?;
        Ok(payload.id)
    }
}
