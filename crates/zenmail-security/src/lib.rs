mod error;
mod oauth;

pub use error::SecurityError;
pub use oauth::{google_profile, OAuthStart, OAuthTokenResult, OAuthWorkflow, GMAIL_SCOPES};
