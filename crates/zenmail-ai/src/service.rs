use crate::AiError;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

#[derive(Clone, Serialize, Deserialize)]
pub struct GeminiRuntime {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
}

impl Default for GeminiRuntime {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model: "gemini-2.5-flash".to_string(),
            temperature: 0.7,
            max_output_tokens: 1024,
        }
    }
}

impl std::fmt::Debug for GeminiRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiRuntime")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .finish()
    }
}

/// Fields of the email being answered.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplyRequest {
    pub from: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
}

/// A model that supports `generateContent`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeminiModel {
    pub name: String,
    pub display_name: Option<String>,
    pub version: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelEntry {
    name: String,
    display_name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    #[serde(default)]
    supported_generation_methods: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ModelListResponse {
    #[serde(default)]
    models: Vec<ModelEntry>,
}

pub fn build_reply_prompt(from: &str, subject: &str, body: &str) -> String {
    format!(
        "Generate a professional, friendly reply to this email. Keep it concise and appropriate.\n\
         \n\
         Email From: {from}\n\
         Subject: {subject}\n\
         Body: {body}\n\
         \n\
         Generate only the reply text, no additional formatting or explanations."
    )
}

#[derive(Clone)]
pub struct DraftingService {
    http: reqwest::Client,
    config: GeminiRuntime,
}

impl DraftingService {
    pub fn new(http: reqwest::Client, config: GeminiRuntime) -> Self {
        Self { http, config }
    }

    pub fn is_configured(&self) -> bool {
        self.api_key().is_ok()
    }

    fn api_key(&self) -> Result<&str, AiError> {
        self.config
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(AiError::NotConfigured)
    }

    fn base(&self) -> &str {
        self.config.api_base.trim_end_matches('/')
    }

    pub async fn draft_reply(&self, request: &ReplyRequest) -> Result<String, AiError> {
        let field = |value: &Option<String>| value.clone().filter(|value| !value.is_empty());
        let (Some(from), Some(subject), Some(body)) = (
            field(&request.from),
            field(&request.subject),
            field(&request.body),
        ) else {
            return Err(AiError::MissingFields);
        };
        let api_key = self.api_key()?;

        let prompt = build_reply_prompt(&from, &subject, &body);
        let endpoint = format!("{}/models/{}:generateContent", self.base(), self.config.model);

        let response = self
            .http
            .post(endpoint)
            .query(&[("key", api_key)])
            .json(&serde_json::json!({
                "contents": [{"parts": [{"text": prompt}]}],
                "generationConfig": {
                    "temperature": self.config.temperature,
                    "maxOutputTokens": self.config.max_output_tokens,
                }
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = provider_error_message(response).await;
            warn!(status = status.as_u16(), %message, "Gemini request failed");
            return Err(AiError::Api(message));
        }

        let json: serde_json::Value = response.json().await?;
        let reply = json
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|value| value.as_str())
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                warn!(response = %json, "Gemini response had no candidate text");
                AiError::UnexpectedResponse
            })?;

        info!(model = %self.config.model, "reply drafted");
        Ok(reply.trim().to_string())
    }

    /// Models available to this key that can generate content.
    pub async fn list_models(&self) -> Result<Vec<GeminiModel>, AiError> {
        let api_key = self.api_key()?;
        let response = self
            .http
            .get(format!("{}/models", self.base()))
            .query(&[("key", api_key)])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AiError::Api(provider_error_message(response).await));
        }

        let payload: ModelListResponse = response.json().await?;
        Ok(payload
            .models
            .into_iter()
            .filter(|model| {
                model
                    .supported_generation_methods
                    .iter()
                    .any(|method| method == "generateContent")
            })
            .map(|model| GeminiModel {
                name: model.name,
                display_name: model.display_name,
                version: model.version,
                description: model.description,
            })
            .collect())
    }
}

async fn provider_error_message(response: reqwest::Response) -> String {
    response
        .json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|json| {
            json.pointer("/error/message")
                .and_then(|value| value.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| "Unknown error".to_string())
}
