use anyhow::Context;
use std::time::Duration;
use tower_sessions_sqlx_store::SqliteStore;
use tracing::{debug, warn};
use zenmail_ai::{DraftingService, GeminiRuntime};
use zenmail_config::{AppConfig, GeminiConfig, GoogleConfig};
use zenmail_core::GmailCredential;
use zenmail_email::EmailService;
use zenmail_security::{google_profile, OAuthWorkflow};
use zenmail_storage::{Storage, StorageError};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AppState {
    pub(crate) config: AppConfig,
    pub(crate) storage: Storage,
    pub(crate) sessions: SqliteStore,
    pub(crate) oauth: Option<OAuthWorkflow>,
    pub(crate) email: EmailService,
    pub(crate) drafting: DraftingService,
}

impl AppState {
    pub async fn initialize(config: AppConfig) -> anyhow::Result<Self> {
        let database_url = config
            .database
            .url
            .clone()
            .context("database url is not set")?;
        let storage = Storage::connect(&database_url, config.database.max_connections)
            .await
            .context("initialize sqlite storage")?;

        Self::from_parts(config, storage).await
    }

    pub async fn from_parts(config: AppConfig, storage: Storage) -> anyhow::Result<Self> {
        let sessions = SqliteStore::new(storage.pool().clone());
        sessions.migrate().await.context("migrate session store")?;

        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("build http client")?;

        let oauth = oauth_from_config(&config.google).context("configure Google OAuth")?;
        if oauth.is_none() {
            warn!("Google OAuth credentials missing; /auth/google is disabled");
        }

        let email = EmailService::new(http.clone(), config.mail.api_base.clone());
        let drafting = DraftingService::new(http, gemini_runtime_from_config(&config.gemini));
        if !drafting.is_configured() {
            warn!("GEMINI_API_KEY missing; reply drafting is disabled");
        }

        Ok(Self {
            config,
            storage,
            sessions,
            oauth,
            email,
            drafting,
        })
    }

    /// The account a request acts on: the session's cached address if that
    /// record still exists, otherwise the most recently connected one.
    pub async fn active_account(
        &self,
        session_hint: Option<&str>,
    ) -> Result<Option<GmailCredential>, StorageError> {
        if let Some(email) = session_hint {
            if let Some(credential) = self.storage.credential_by_email(email).await? {
                return Ok(Some(credential));
            }
            debug!(%email, "session account no longer stored; using latest");
        }

        self.storage.latest_credential().await
    }

    pub fn frontend_url(&self) -> &str {
        self.config.frontend.url.trim_end_matches('/')
    }
}

fn oauth_from_config(google: &GoogleConfig) -> anyhow::Result<Option<OAuthWorkflow>> {
    let (Some(client_id), Some(client_secret), Some(redirect_uri)) = (
        google.client_id.as_deref(),
        google.client_secret.as_deref(),
        google.redirect_uri.as_deref(),
    ) else {
        return Ok(None);
    };

    let profile = google_profile(
        client_id,
        redirect_uri,
        &google.auth_url,
        &google.token_url,
        &google.userinfo_url,
    )?;
    Ok(Some(OAuthWorkflow::new(profile, client_secret)?))
}

fn gemini_runtime_from_config(gemini: &GeminiConfig) -> GeminiRuntime {
    GeminiRuntime {
        api_key: gemini.api_key.clone(),
        api_base: gemini.api_base.clone(),
        model: gemini.model.clone(),
        temperature: gemini.temperature,
        max_output_tokens: gemini.max_output_tokens,
    }
}
