use crate::backend::decode_body_data;
use crate::{EmailError, GmailClient, GmailMessage, MailBackend};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use regex::Regex;
use std::sync::OnceLock;
use tracing::{info, warn};
use zenmail_core::{EmailSummary, GmailCredential, MailFolder};

const MAX_BODY_CHARS: usize = 500;

/// A validated outgoing message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub thread_id: Option<String>,
}

impl OutgoingMessage {
    /// Fails with [`EmailError::MissingFields`] when `to`, `subject` or `body`
    /// is absent or empty. An empty thread id is treated as absent.
    pub fn new(
        to: Option<String>,
        subject: Option<String>,
        body: Option<String>,
        thread_id: Option<String>,
    ) -> Result<Self, EmailError> {
        let present = |value: Option<String>| value.filter(|value| !value.is_empty());
        match (present(to), present(subject), present(body)) {
            (Some(to), Some(subject), Some(body)) => Ok(Self {
                to,
                subject,
                body,
                thread_id: present(thread_id),
            }),
            _ => Err(EmailError::MissingFields),
        }
    }
}

/// RFC 2822 text (CRLF line endings) encoded as URL-safe base64 without padding.
pub fn encode_raw_message(from: &str, message: &OutgoingMessage) -> String {
    let text = [
        format!("From: {from}"),
        format!("To: {}", message.to),
        format!("Subject: {}", message.subject),
        String::new(),
        message.body.clone(),
    ]
    .join("\r\n");
    URL_SAFE_NO_PAD.encode(text.as_bytes())
}

fn tag_regex() -> &'static Regex {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("valid tag regex"))
}

fn whitespace_regex() -> &'static Regex {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("valid whitespace regex"))
}

/// Strips tags, collapses whitespace and keeps the first 500 characters.
pub fn sanitize_body(raw: &str) -> String {
    let without_tags = tag_regex().replace_all(raw, "");
    let collapsed = whitespace_regex().replace_all(&without_tags, " ");
    collapsed.trim().chars().take(MAX_BODY_CHARS).collect()
}

fn summarize(message: &GmailMessage, folder: MailFolder) -> EmailSummary {
    let subject = message.header("Subject").unwrap_or("(No Subject)");
    let counterpart = message
        .header(folder.counterpart_header())
        .unwrap_or("Unknown");
    let from = match folder {
        MailFolder::Inbox => counterpart.to_string(),
        MailFolder::Sent => format!("To: {counterpart}"),
    };

    let body = match message.body_data() {
        Some(data) => match decode_body_data(data) {
            Ok(text) => sanitize_body(&text),
            Err(err) => {
                warn!(message_id = %message.id, error = %err, "undecodable message body");
                String::new()
            }
        },
        None => String::new(),
    };

    EmailSummary {
        id: message.id.clone(),
        subject: subject.to_string(),
        from,
        body,
    }
}

#[derive(Clone)]
pub struct EmailService {
    http: reqwest::Client,
    api_base: String,
}

impl std::fmt::Debug for EmailService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailService")
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl EmailService {
    pub fn new(http: reqwest::Client, api_base: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into(),
        }
    }

    /// Gmail client for one request. Expired tokens are not refreshed.
    pub fn connect(&self, credential: &GmailCredential) -> GmailClient {
        if credential.is_expired_at(Utc::now()) {
            warn!(
                email = %credential.email,
                expired_at = %credential.token_expiry,
                "access token is past its expiry; Gmail may reject it"
            );
        }
        GmailClient::new(
            self.http.clone(),
            self.api_base.clone(),
            credential.access_token.clone(),
        )
    }

    pub async fn list_messages(
        &self,
        credential: &GmailCredential,
        folder: MailFolder,
        limit: usize,
    ) -> Result<Vec<EmailSummary>, EmailError> {
        let client = self.connect(credential);
        let emails = self.list_with(&client, folder, limit).await?;
        info!(
            email = %credential.email,
            %folder,
            count = emails.len(),
            "listed messages"
        );
        Ok(emails)
    }

    /// Lists summaries through any backend. Messages that fail to load are
    /// skipped; the result never exceeds `limit`.
    pub async fn list_with(
        &self,
        backend: &dyn MailBackend,
        folder: MailFolder,
        limit: usize,
    ) -> Result<Vec<EmailSummary>, EmailError> {
        let ids = backend.list_message_ids(folder, limit).await?;
        let mut emails = Vec::with_capacity(ids.len().min(limit));

        for id in ids.into_iter().take(limit) {
            match backend.get_message(&id).await {
                Ok(message) => emails.push(summarize(&message, folder)),
                Err(err) => {
                    warn!(message_id = %id, %folder, error = %err, "skipping message");
                }
            }
        }

        Ok(emails)
    }

    pub async fn send_message(
        &self,
        credential: &GmailCredential,
        message: &OutgoingMessage,
    ) -> Result<String, EmailError> {
        let client = self.connect(credential);
        let id = self.send_with(&client, &credential.email, message).await?;
        info!(email = %credential.email, message_id = %id, "message sent");
        Ok(id)
    }

    pub async fn send_with(
        &self,
        backend: &dyn MailBackend,
        from: &str,
        message: &OutgoingMessage,
    ) -> Result<String, EmailError> {
        let raw = encode_raw_message(from, message);
        backend
            .send_raw(&raw, message.thread_id.as_deref())
            .await
    }
}
