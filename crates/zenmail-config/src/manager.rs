use crate::{AppConfig, ConfigError, Environment};
use directories::ProjectDirs;
use std::fs;
use std::path::PathBuf;

const ORG: &str = "app";
const AUTHOR: &str = "ZenMail";
const APP: &str = "ZenMail";
const CONFIG_PATH_ENV: &str = "ZENMAIL_CONFIG";
const DATABASE_FILE: &str = "zenmail.sqlite3";

#[derive(Debug, Clone)]
pub struct ConfigManager {
    config_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
}

impl ConfigManager {
    /// Resolves the config file from `ZENMAIL_CONFIG`, falling back to the platform config dir.
    pub fn new() -> Self {
        let dirs = ProjectDirs::from(ORG, AUTHOR, APP);
        let config_path = std::env::var(CONFIG_PATH_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from)
            .or_else(|| {
                dirs.as_ref()
                    .map(|dirs| dirs.config_dir().join("config.toml"))
            });

        Self {
            config_path,
            data_dir: dirs.map(|dirs| dirs.data_dir().to_path_buf()),
        }
    }

    pub fn with_paths(config_path: Option<PathBuf>, data_dir: Option<PathBuf>) -> Self {
        Self {
            config_path,
            data_dir,
        }
    }

    /// Defaults, then the TOML file when present, then `.env` and the process environment.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env file");
        }

        let mut config = self.load_file()?;
        apply_env(&mut config, |key| std::env::var(key).ok())?;

        if config.database.url.is_none() {
            config.database.url = Some(self.default_database_url()?);
        }

        Ok(config)
    }

    fn load_file(&self) -> Result<AppConfig, ConfigError> {
        match &self.config_path {
            Some(path) if path.exists() => {
                let content = fs::read_to_string(path)?;
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(toml::from_str(&content)?)
            }
            _ => Ok(AppConfig::default()),
        }
    }

    fn default_database_url(&self) -> Result<String, ConfigError> {
        let path = match &self.data_dir {
            Some(dir) => {
                fs::create_dir_all(dir)?;
                dir.join(DATABASE_FILE)
            }
            None => PathBuf::from(DATABASE_FILE),
        };
        Ok(format!("sqlite://{}", path.to_string_lossy()))
    }
}

impl Default for ConfigManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Overlays environment values onto `config`. Blank values count as unset.
pub fn apply_env<F>(config: &mut AppConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    if let Some(host) = get("HOST") {
        config.server.host = host;
    }
    if let Some(port) = get("PORT") {
        config.server.port = port.parse().map_err(|_| ConfigError::InvalidValue {
            key: "PORT".to_string(),
            value: port.clone(),
        })?;
    }
    if let Some((key, environment)) = get("ZENMAIL_ENV")
        .map(|value| ("ZENMAIL_ENV", value))
        .or_else(|| get("NODE_ENV").map(|value| ("NODE_ENV", value)))
    {
        config.server.environment = parse_environment(key, &environment)?;
    }
    if let Some(url) = get("FRONTEND_URL") {
        config.frontend.url = url;
    }
    if let Some(secret) = get("SESSION_SECRET") {
        config.session.secret = Some(secret);
    }
    if let Some(url) = get("DATABASE_URL") {
        config.database.url = Some(url);
    }
    if let Some(client_id) = get("GOOGLE_CLIENT_ID") {
        config.google.client_id = Some(client_id);
    }
    if let Some(client_secret) = get("GOOGLE_CLIENT_SECRET") {
        config.google.client_secret = Some(client_secret);
    }
    if let Some(redirect_uri) = get("GOOGLE_REDIRECT_URI") {
        config.google.redirect_uri = Some(redirect_uri);
    }
    if let Some(api_key) = get("GEMINI_API_KEY") {
        config.gemini.api_key = Some(api_key);
    }
    if let Some(model) = get("GEMINI_MODEL") {
        config.gemini.model = model;
    }

    Ok(())
}

fn parse_environment(key: &str, raw: &str) -> Result<Environment, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "production" | "prod" => Ok(Environment::Production),
        "development" | "dev" | "test" => Ok(Environment::Development),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_the_hosted_deployment() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.frontend.url, "https://zenmail-frontend.vercel.app");
        assert_eq!(config.session.max_age_secs, 86_400);
        assert_eq!(config.gemini.model, "gemini-2.5-flash");
        assert_eq!(config.gemini.max_output_tokens, 1024);
        assert_eq!(config.mail.list_limit, 20);
        assert!(config.google.client_id.is_none());
    }

    #[test]
    fn environment_overrides_defaults() {
        let mut config = AppConfig::default();
        apply_env(
            &mut config,
            lookup(&[
                ("PORT", "8080"),
                ("ZENMAIL_ENV", "production"),
                ("FRONTEND_URL", "http://localhost:5173"),
                ("GOOGLE_CLIENT_ID", "id"),
                ("GOOGLE_CLIENT_SECRET", "secret"),
                ("GOOGLE_REDIRECT_URI", "http://localhost:8080/auth/google/callback"),
                ("GEMINI_API_KEY", "key"),
            ]),
        )
        .expect("env applied");

        assert_eq!(config.server.port, 8080);
        assert!(config.server.environment.is_production());
        assert_eq!(config.frontend.url, "http://localhost:5173");
        assert_eq!(
            config.google.redirect_uri.as_deref(),
            Some("http://localhost:8080/auth/google/callback")
        );
        assert_eq!(config.gemini.api_key.as_deref(), Some("key"));
    }

    #[test]
    fn blank_values_are_ignored() {
        let mut config = AppConfig::default();
        apply_env(&mut config, lookup(&[("GEMINI_API_KEY", "   "), ("PORT", "")]))
            .expect("env applied");
        assert!(config.gemini.api_key.is_none());
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn node_env_is_a_fallback_for_zenmail_env() {
        let mut config = AppConfig::default();
        apply_env(&mut config, lookup(&[("NODE_ENV", "production")])).expect("env applied");
        assert!(config.server.environment.is_production());

        let mut config = AppConfig::default();
        apply_env(
            &mut config,
            lookup(&[("ZENMAIL_ENV", "development"), ("NODE_ENV", "production")]),
        )
        .expect("env applied");
        assert!(!config.server.environment.is_production());

        let err = apply_env(&mut AppConfig::default(), lookup(&[("NODE_ENV", "staging")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "NODE_ENV"));
    }

    #[test]
    fn invalid_port_is_rejected() {
        let mut config = AppConfig::default();
        let err = apply_env(&mut config, lookup(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "PORT"));
    }

    #[test]
    fn partial_toml_keeps_remaining_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [gemini]
            model = "gemini-2.0-flash"

            [session]
            reconcile_secs = 60
            "#,
        )
        .expect("toml parsed");

        assert_eq!(config.gemini.model, "gemini-2.0-flash");
        assert_eq!(config.gemini.temperature, 0.7);
        assert_eq!(config.session.reconcile_secs, 60);
        assert_eq!(config.session.prune_secs, 60);
        assert_eq!(config.session.cookie_name, "zenmail.sid");
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let dir = std::env::temp_dir().join(format!("zenmail-config-test-{}", std::process::id()));
        let manager = ConfigManager::with_paths(Some(dir.join("absent.toml")), Some(dir.clone()));
        let config = manager.load_file().expect("defaults");
        assert_eq!(config.server.port, 3000);
        assert_eq!(
            manager.default_database_url().expect("url"),
            format!("sqlite://{}", dir.join("zenmail.sqlite3").to_string_lossy())
        );
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let mut config = AppConfig::default();
        config.google.client_secret = Some("google-secret".to_string());
        config.gemini.api_key = Some("gemini-key".to_string());
        config.session.secret = Some("session-secret".to_string());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("google-secret"));
        assert!(!rendered.contains("gemini-key"));
        assert!(!rendered.contains("session-secret"));
    }
}
