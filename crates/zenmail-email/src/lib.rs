mod backend;
mod error;
mod service;

pub use backend::{GmailClient, GmailMessage, MailBackend, MessagePart, MessagePayload};
pub use error::EmailError;
pub use service::{encode_raw_message, sanitize_body, EmailService, OutgoingMessage};
