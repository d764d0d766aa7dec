use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmailError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{message}")]
    Api { status: u16, message: String },
    #[error("Missing required fields: to, subject, body")]
    MissingFields,
    #[error("invalid data: {0}")]
    Data(String),
}
