use thiserror::Error;

#[derive(Debug, Error)]
pub enum AiError {
    #[error("Missing required fields")]
    MissingFields,
    #[error("AI service not configured. Please add GEMINI_API_KEY to .env")]
    NotConfigured,
    #[error("Gemini API error: {0}")]
    Api(String),
    #[error("Unexpected response format. Safety filters may have blocked the response.")]
    UnexpectedResponse,
    #[error("Error: {0}")]
    Http(#[from] reqwest::Error),
}
