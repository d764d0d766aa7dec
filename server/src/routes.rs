use crate::error::ApiError;
use crate::session;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tower_sessions::{Session, SessionManagerLayer};
use tracing::{error, info, warn};
use zenmail_ai::ReplyRequest;
use zenmail_core::{GmailCredential, MailFolder};
use zenmail_email::OutgoingMessage;
use zenmail_storage::StorageError;

const MAX_LIST_LIMIT: usize = 100;

type SharedState = Arc<AppState>;

pub fn app(state: SharedState) -> anyhow::Result<Router> {
    let config = &state.config;
    let production = config.server.environment.is_production();

    let sessions = SessionManagerLayer::new(state.sessions.clone())
        .with_name(config.session.cookie_name.clone())
        .with_http_only(true)
        .with_secure(production)
        .with_same_site(session::same_site(production))
        .with_expiry(session::expiry(&config.session))
        .with_signed(session::signing_key(config.session.secret_or_default())?);

    let origin = HeaderValue::from_str(state.frontend_url())?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Ok(Router::new()
        .route("/", get(root))
        .route("/test-db", get(test_db))
        .route("/gmail/status", get(gmail_status))
        .route("/auth/google", get(auth_google))
        .route("/auth/google/callback", get(auth_google_callback))
        .route("/gmail/emails", get(list_inbox))
        .route("/gmail/sent", get(list_sent))
        .route("/gmail/send", post(send_email))
        .route("/gmail/disconnect", post(disconnect))
        .route("/ai/generate-reply", post(generate_reply))
        .route("/ai/models", get(list_models))
        .with_state(state)
        .layer(sessions)
        .layer(cors)
        .layer(TraceLayer::new_for_http()))
}

async fn root(State(state): State<SharedState>) -> Json<Value> {
    Json(json!({
        "status": "running",
        "message": "ZenMail Backend API",
        "version": env!("CARGO_PKG_VERSION"),
        "environment": state.config.server.environment.as_str(),
    }))
}

async fn test_db(State(state): State<SharedState>) -> Response {
    match state.storage.ping().await {
        Ok(now) => Json(json!({ "success": true, "time": { "now": now } })).into_response(),
        Err(err) => {
            error!(error = %err, "database probe failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "error": err.to_string() })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Serialize, PartialEq, Eq)]
struct StatusResponse {
    connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<String>,
}

async fn gmail_status(State(state): State<SharedState>, session: Session) -> Json<StatusResponse> {
    match connected_email(&state, &session).await {
        Ok(email) => Json(StatusResponse {
            connected: email.is_some(),
            email,
        }),
        Err(err) => {
            error!(error = %err, "status check failed");
            Json(StatusResponse {
                connected: false,
                email: None,
            })
        }
    }
}

/// Reconciles the session cache with the store once the reconcile window
/// has elapsed, falling back to the newest stored account.
async fn connected_email(
    state: &AppState,
    session: &Session,
) -> Result<Option<String>, StorageError> {
    let now = Utc::now();
    let window = Duration::seconds(
        i64::try_from(state.config.session.reconcile_secs).unwrap_or(i64::MAX / 1000),
    );

    if let Some(email) = session::cached_email(session).await {
        if session::is_fresh(session, now, window).await {
            return Ok(Some(email));
        }

        if state.storage.credential_by_email(&email).await?.is_some() {
            if let Err(err) = session::mark_checked(session, now).await {
                warn!(error = %err, "failed to refresh session check time");
            }
            return Ok(Some(email));
        }

        info!(%email, "cached account no longer stored");
        if let Err(err) = session::forget(session).await {
            warn!(error = %err, "failed to clear session email");
        }
    }

    match state.storage.latest_credential().await? {
        Some(credential) => {
            if let Err(err) = session::remember(session, &credential.email, now).await {
                warn!(error = %err, "failed to cache session email");
            }
            Ok(Some(credential.email))
        }
        None => Ok(None),
    }
}

fn frontend_redirect(state: &AppState, query: &str) -> Redirect {
    Redirect::to(&format!("{}?{query}", state.frontend_url()))
}

async fn auth_google(State(state): State<SharedState>) -> Redirect {
    let Some(oauth) = state.oauth.as_ref() else {
        warn!("OAuth requested but Google credentials are not configured");
        return frontend_redirect(&state, "error=oauth_not_configured");
    };

    match oauth.begin() {
        Ok(start) => {
            info!("redirecting to Google consent");
            Redirect::to(&start.authorization_url)
        }
        Err(err) => {
            error!(error = %err, "failed to build authorization url");
            frontend_redirect(&state, "error=oauth_failed")
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    error: Option<String>,
}

async fn auth_google_callback(
    State(state): State<SharedState>,
    session: Session,
    Query(params): Query<CallbackParams>,
) -> Redirect {
    if let Some(provider_error) = params.error.as_deref() {
        warn!(error = %provider_error, "Google returned an OAuth error");
    }

    let credential = match complete_oauth(&state, params.code.as_deref()).await {
        Ok(credential) => credential,
        Err(err) => {
            error!(error = %err, "OAuth callback failed");
            return frontend_redirect(&state, &format!("error={}", err.oauth_flag()));
        }
    };

    if let Err(err) = session::remember(&session, &credential.email, Utc::now()).await {
        error!(error = %err, "failed to cache connected account in session");
    }
    if let Err(err) = session.save().await {
        error!(error = %err, "failed to save session");
    }

    info!(email = %credential.email, "Gmail account connected");
    frontend_redirect(&state, "success=true")
}

async fn complete_oauth(
    state: &AppState,
    code: Option<&str>,
) -> Result<GmailCredential, ApiError> {
    let code = code
        .filter(|code| !code.is_empty())
        .ok_or(ApiError::MissingCode)?;
    let oauth = state.oauth.as_ref().ok_or_else(|| {
        ApiError::NotConfigured("Google OAuth is not configured".to_string())
    })?;

    let token = oauth.exchange_code(code).await?;
    let email = oauth.fetch_user_email(&token.access_token).await?;

    let now = Utc::now();
    let credential = GmailCredential {
        email,
        access_token: token.access_token.clone(),
        refresh_token: token.refresh_token.clone(),
        token_expiry: token.expiry_from(now),
        created_at: now,
        updated_at: now,
    };
    Ok(state.storage.upsert_credential(&credential).await?)
}

async fn require_account(state: &AppState, session: &Session) -> Result<GmailCredential, ApiError> {
    let hint = session::cached_email(session).await;
    state
        .active_account(hint.as_deref())
        .await?
        .ok_or(ApiError::NoAccount)
}

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<String>,
}

impl ListParams {
    fn limit(&self, default: usize) -> usize {
        self.limit
            .as_deref()
            .and_then(|raw| raw.trim().parse::<i64>().ok())
            .map(|limit| limit.clamp(1, MAX_LIST_LIMIT as i64) as usize)
            .unwrap_or(default)
            .clamp(1, MAX_LIST_LIMIT)
    }
}

async fn list_inbox(
    State(state): State<SharedState>,
    session: Session,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_folder(&state, &session, MailFolder::Inbox, &params).await
}

async fn list_sent(
    State(state): State<SharedState>,
    session: Session,
    Query(params): Query<ListParams>,
) -> Result<Json<Value>, ApiError> {
    list_folder(&state, &session, MailFolder::Sent, &params).await
}

async fn list_folder(
    state: &AppState,
    session: &Session,
    folder: MailFolder,
    params: &ListParams,
) -> Result<Json<Value>, ApiError> {
    let credential = require_account(state, session).await?;
    let limit = params.limit(state.config.mail.list_limit);
    let emails = state
        .email
        .list_messages(&credential, folder, limit)
        .await?;
    Ok(Json(json!({ "success": true, "emails": emails })))
}

#[derive(Debug, Default, Deserialize)]
struct SendPayload {
    to: Option<String>,
    subject: Option<String>,
    body: Option<String>,
    #[serde(rename = "threadId")]
    thread_id: Option<String>,
}

/// Unparseable bodies are treated as empty payloads.
fn lenient_json<T: DeserializeOwned + Default>(body: &Bytes) -> T {
    serde_json::from_slice(body).unwrap_or_default()
}

async fn send_email(
    State(state): State<SharedState>,
    session: Session,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let payload: SendPayload = lenient_json(&body);
    let message = OutgoingMessage::new(
        payload.to,
        payload.subject,
        payload.body,
        payload.thread_id,
    )?;

    let credential = require_account(&state, &session).await?;
    let message_id = state.email.send_message(&credential, &message).await?;
    Ok(Json(json!({ "success": true, "messageId": message_id })))
}

async fn disconnect(
    State(state): State<SharedState>,
    session: Session,
) -> Result<Json<Value>, ApiError> {
    if let Some(email) = session::cached_email(&session).await {
        let removed = state
            .storage
            .delete_credential(&email)
            .await
            .map_err(|err| ApiError::Internal(err.to_string()))?;
        info!(%email, removed, "account disconnected");
    }

    session.flush().await.map_err(|err| {
        error!(error = %err, "failed to destroy session");
        ApiError::SessionDestroy
    })?;

    Ok(Json(
        json!({ "success": true, "message": "Disconnected successfully" }),
    ))
}

async fn generate_reply(
    State(state): State<SharedState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let request: ReplyRequest = lenient_json(&body);
    let reply = state.drafting.draft_reply(&request).await?;
    Ok(Json(json!({ "success": true, "reply": reply })))
}

async fn list_models(State(state): State<SharedState>) -> Result<Json<Value>, ApiError> {
    let models = state.drafting.list_models().await?;
    Ok(Json(json!({ "success": true, "models": models })))
}
