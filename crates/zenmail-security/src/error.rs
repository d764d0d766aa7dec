use thiserror::Error;

#[derive(Debug, Error)]
pub enum SecurityError {
    #[error("oauth error: {0}")]
    OAuth(String),
    #[error("profile lookup failed: {0}")]
    Profile(String),
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),
    #[error("url parse error: {0}")]
    Url(#[from] url::ParseError),
}
