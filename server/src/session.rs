use anyhow::anyhow;
use chrono::{DateTime, Duration, Utc};
use sha2::{Digest, Sha512};
use tower_sessions::cookie::{Key, SameSite};
use tower_sessions::session_store::ExpiredDeletion;
use tower_sessions::{Expiry, Session};
use tracing::warn;
use zenmail_config::SessionConfig;

pub const EMAIL_KEY: &str = "gmail_email";
pub const CHECKED_AT_KEY: &str = "gmail_checked_at";

/// 64-byte signing key derived from the configured secret.
pub fn signing_key(secret: &str) -> anyhow::Result<Key> {
    let digest = Sha512::digest(secret.as_bytes());
    Key::try_from(digest.as_slice()).map_err(|err| anyhow!("derive session key: {err}"))
}

pub fn expiry(config: &SessionConfig) -> Expiry {
    let secs = i64::try_from(config.max_age_secs).unwrap_or(i64::MAX / 1000);
    Expiry::OnInactivity(time::Duration::seconds(secs))
}

pub fn same_site(production: bool) -> SameSite {
    if production {
        SameSite::None
    } else {
        SameSite::Lax
    }
}

pub async fn cached_email(session: &Session) -> Option<String> {
    match session.get::<String>(EMAIL_KEY).await {
        Ok(email) => email.filter(|email| !email.is_empty()),
        Err(err) => {
            warn!(error = %err, "failed to read session email");
            None
        }
    }
}

/// Whether the cached email was reconciled against the store within `window`.
pub async fn is_fresh(session: &Session, now: DateTime<Utc>, window: Duration) -> bool {
    match session.get::<DateTime<Utc>>(CHECKED_AT_KEY).await {
        Ok(Some(checked_at)) => now.signed_duration_since(checked_at) < window,
        Ok(None) => false,
        Err(err) => {
            warn!(error = %err, "failed to read session check time");
            false
        }
    }
}

pub async fn remember(
    session: &Session,
    email: &str,
    now: DateTime<Utc>,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(EMAIL_KEY, email).await?;
    session.insert(CHECKED_AT_KEY, now).await
}

pub async fn mark_checked(
    session: &Session,
    now: DateTime<Utc>,
) -> Result<(), tower_sessions::session::Error> {
    session.insert(CHECKED_AT_KEY, now).await
}

pub async fn forget(session: &Session) -> Result<(), tower_sessions::session::Error> {
    session.remove::<String>(EMAIL_KEY).await?;
    session.remove::<DateTime<Utc>>(CHECKED_AT_KEY).await?;
    Ok(())
}

/// Deletes expired session records every `period`, starting immediately.
pub async fn prune_expired<S: ExpiredDeletion>(store: S, period: std::time::Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        interval.tick().await;
        if let Err(err) = store.delete_expired().await {
            warn!(error = %err, "failed to prune expired sessions");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_secret_yields_a_key() {
        assert!(signing_key("").is_ok());
        assert!(signing_key("short").is_ok());
        assert_eq!(
            signing_key("same").unwrap().master(),
            signing_key("same").unwrap().master()
        );
        assert_ne!(
            signing_key("one").unwrap().master(),
            signing_key("two").unwrap().master()
        );
    }

    #[test]
    fn production_cookies_allow_cross_site() {
        assert_eq!(same_site(true), SameSite::None);
        assert_eq!(same_site(false), SameSite::Lax);
    }
}
