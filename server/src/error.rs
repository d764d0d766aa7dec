use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use zenmail_ai::AiError;
use zenmail_email::EmailError;
use zenmail_security::SecurityError;
use zenmail_storage::StorageError;

/// Error surfaced by a JSON handler as `{success:false, message}`.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    MissingFields(String),
    #[error("No authorization code provided")]
    MissingCode,
    #[error("No account connected")]
    NoAccount,
    #[error("{0}")]
    NotConfigured(String),
    #[error("{0}")]
    Upstream(String),
    #[error("{0}")]
    Store(#[from] StorageError),
    #[error("Failed to destroy session")]
    SessionDestroy,
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::SessionDestroy | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::OK,
        }
    }

    /// Query flag appended to the frontend URL when the OAuth flow fails.
    pub fn oauth_flag(&self) -> &'static str {
        match self {
            Self::MissingCode => "no_code",
            Self::NotConfigured(_) => "oauth_not_configured",
            _ => "oauth_failed",
        }
    }
}

impl From<EmailError> for ApiError {
    fn from(err: EmailError) -> Self {
        match err {
            EmailError::MissingFields => Self::MissingFields(err.to_string()),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<AiError> for ApiError {
    fn from(err: AiError) -> Self {
        match err {
            AiError::MissingFields => Self::MissingFields(err.to_string()),
            AiError::NotConfigured => Self::NotConfigured(err.to_string()),
            other => Self::Upstream(other.to_string()),
        }
    }
}

impl From<SecurityError> for ApiError {
    fn from(err: SecurityError) -> Self {
        Self::Upstream(err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        } else {
            tracing::warn!(error = %self, "request rejected");
        }
        let body = Json(json!({ "success": false, "message": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_disconnect_failures_are_server_errors() {
        assert_eq!(ApiError::NoAccount.status(), StatusCode::OK);
        assert_eq!(
            ApiError::Upstream("Invalid Credentials".into()).status(),
            StatusCode::OK
        );
        assert_eq!(
            ApiError::SessionDestroy.status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ApiError::Internal("disk I/O error".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn oauth_failures_map_to_redirect_flags() {
        assert_eq!(ApiError::MissingCode.oauth_flag(), "no_code");
        assert_eq!(
            ApiError::NotConfigured("Google OAuth is not configured".into()).oauth_flag(),
            "oauth_not_configured"
        );
        assert_eq!(ApiError::Upstream("invalid_grant".into()).oauth_flag(), "oauth_failed");
    }

    #[test]
    fn gateway_errors_keep_their_messages() {
        let err = ApiError::from(EmailError::MissingFields);
        assert_eq!(err.to_string(), "Missing required fields: to, subject, body");

        let err = ApiError::from(AiError::NotConfigured);
        assert!(matches!(err, ApiError::NotConfigured(_)));
        assert_eq!(
            err.to_string(),
            "AI service not configured. Please add GEMINI_API_KEY to .env"
        );

        let err = ApiError::from(EmailError::Api {
            status: 401,
            message: "Invalid Credentials".into(),
        });
        assert_eq!(err.to_string(), "Invalid Credentials");
    }
}
