use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use url::Url;

/// Persisted OAuth token set for one connected Gmail mailbox.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GmailCredential {
    pub email: String,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_expiry: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for GmailCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GmailCredential")
            .field("email", &self.email)
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("token_expiry", &self.token_expiry)
            .field("created_at", &self.created_at)
            .field("updated_at", &self.updated_at)
            .finish()
    }
}

impl GmailCredential {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.token_expiry <= now
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MailFolder {
    Inbox,
    Sent,
}

impl MailFolder {
    /// Gmail label used to filter the message list, if any.
    pub fn label_id(self) -> Option<&'static str> {
        match self {
            Self::Inbox => None,
            Self::Sent => Some("SENT"),
        }
    }

    /// Header that names the counterpart shown in the summary.
    pub fn counterpart_header(self) -> &'static str {
        match self {
            Self::Inbox => "From",
            Self::Sent => "To",
        }
    }
}

impl fmt::Display for MailFolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inbox => f.write_str("inbox"),
            Self::Sent => f.write_str("sent"),
        }
    }
}

/// Display-ready view of one message, built per list request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmailSummary {
    pub id: String,
    pub subject: String,
    pub from: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OAuthProfile {
    pub client_id: String,
    pub auth_url: Url,
    pub token_url: Url,
    pub redirect_url: Url,
    pub userinfo_url: Url,
    pub scopes: Vec<String>,
}
