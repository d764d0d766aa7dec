mod error;
mod service;

pub use error::AiError;
pub use service::{build_reply_prompt, DraftingService, GeminiModel, GeminiRuntime, ReplyRequest};
