use crate::SecurityError;
use chrono::{DateTime, Duration, Utc};
use oauth2::{
    basic::BasicClient, AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken,
    RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use serde::{Deserialize, Serialize};
use url::Url;
use zenmail_core::OAuthProfile;

/// Read and send mail plus basic identity.
pub const GMAIL_SCOPES: &[&str] = &[
    "openid",
    "email",
    "https://www.googleapis.com/auth/gmail.readonly",
    "https://www.googleapis.com/auth/gmail.send",
];

/// Used when the provider omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthStart {
    pub authorization_url: String,
    pub csrf_state: String,
}

impl std::fmt::Debug for OAuthStart {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthStart")
            .field("authorization_url", &self.authorization_url)
            .field("csrf_state", &"[REDACTED]")
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct OAuthTokenResult {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in_secs: Option<u64>,
}

impl std::fmt::Debug for OAuthTokenResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthTokenResult")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("expires_in_secs", &self.expires_in_secs)
            .finish()
    }
}

impl OAuthTokenResult {
    pub fn expiry_from(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self
            .expires_in_secs
            .and_then(|secs| i64::try_from(secs).ok())
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        now + Duration::seconds(secs)
    }
}

#[derive(Deserialize)]
struct UserInfo {
    email: Option<String>,
}

#[derive(Clone)]
pub struct OAuthWorkflow {
    profile: OAuthProfile,
    client_secret: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for OAuthWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthWorkflow")
            .field("profile", &self.profile)
            .field("client_secret", &"[REDACTED]")
            .finish()
    }
}

/// Known overly-broad scopes that should be rejected.
const DANGEROUS_SCOPES: &[&str] = &["*", "admin", "root", "full_access"];

/// Builds the Google profile requesting [`GMAIL_SCOPES`].
pub fn google_profile(
    client_id: &str,
    redirect_url: &str,
    auth_url: &str,
    token_url: &str,
    userinfo_url: &str,
) -> Result<OAuthProfile, SecurityError> {
    Ok(OAuthProfile {
        client_id: client_id.trim().to_string(),
        auth_url: Url::parse(auth_url)?,
        token_url: Url::parse(token_url)?,
        redirect_url: Url::parse(redirect_url)?,
        userinfo_url: Url::parse(userinfo_url)?,
        scopes: GMAIL_SCOPES.iter().map(|scope| scope.to_string()).collect(),
    })
}

impl OAuthWorkflow {
    /// Create a new OAuth workflow, validating the profile for security issues.
    pub fn new(
        profile: OAuthProfile,
        client_secret: impl Into<String>,
    ) -> Result<Self, SecurityError> {
        Self::validate_profile(&profile)?;
        let client_secret = client_secret.into();
        if client_secret.trim().is_empty() {
            return Err(SecurityError::OAuth("Client secret is required".to_string()));
        }

        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            profile,
            client_secret,
            http,
        })
    }

    fn validate_profile(profile: &OAuthProfile) -> Result<(), SecurityError> {
        // Provider endpoints must use HTTPS; loopback is allowed for local stand-ins.
        for (name, url) in [
            ("Authorization URL", &profile.auth_url),
            ("Token URL", &profile.token_url),
            ("Userinfo URL", &profile.userinfo_url),
        ] {
            if url.host_str().is_none() {
                return Err(SecurityError::OAuth(format!(
                    "{name} must have a valid host"
                )));
            }
            if url.scheme() != "https" && !is_loopback(url) {
                return Err(SecurityError::OAuth(format!("{name} must use HTTPS")));
            }
        }

        let client_id = profile.client_id.trim();
        if client_id.is_empty() {
            return Err(SecurityError::OAuth("Client ID is required".to_string()));
        }
        if client_id.len() > 512 {
            return Err(SecurityError::OAuth(
                "Client ID appears invalid (too long)".to_string(),
            ));
        }

        for scope in &profile.scopes {
            let lower = scope.to_lowercase();
            if DANGEROUS_SCOPES.iter().any(|&d| lower == d) {
                return Err(SecurityError::OAuth(format!(
                    "Scope '{scope}' is too broad and not allowed"
                )));
            }
        }

        Ok(())
    }

    /// Consent URL asking for offline access so that a refresh token is issued.
    pub fn begin(&self) -> Result<OAuthStart, SecurityError> {
        let client = BasicClient::new(ClientId::new(self.profile.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(self.profile.auth_url.as_str().to_string())?)
            .set_token_uri(TokenUrl::new(self.profile.token_url.as_str().to_string())?)
            .set_redirect_uri(RedirectUrl::new(
                self.profile.redirect_url.as_str().to_string(),
            )?);

        let mut auth_request = client
            .authorize_url(CsrfToken::new_random)
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent");

        for scope in &self.profile.scopes {
            auth_request = auth_request.add_scope(Scope::new(scope.to_string()));
        }

        let (auth_url, csrf_state) = auth_request.url();

        Ok(OAuthStart {
            authorization_url: auth_url.to_string(),
            csrf_state: csrf_state.secret().to_string(),
        })
    }

    pub async fn exchange_code(&self, code: &str) -> Result<OAuthTokenResult, SecurityError> {
        let client = BasicClient::new(ClientId::new(self.profile.client_id.clone()))
            .set_client_secret(ClientSecret::new(self.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(self.profile.auth_url.as_str().to_string())?)
            .set_token_uri(TokenUrl::new(self.profile.token_url.as_str().to_string())?)
            .set_redirect_uri(RedirectUrl::new(
                self.profile.redirect_url.as_str().to_string(),
            )?);

        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|err| SecurityError::OAuth(err.to_string()))?;

        tracing::debug!(
            has_refresh_token = token.refresh_token().is_some(),
            "authorization code exchanged"
        );
        Ok(OAuthTokenResult {
            access_token: token.access_token().secret().to_string(),
            refresh_token: token
                .refresh_token()
                .map(|token| token.secret().to_string()),
            expires_in_secs: token.expires_in().map(|duration| duration.as_secs()),
        })
    }

    /// Email address of the account that granted `access_token`.
    pub async fn fetch_user_email(&self, access_token: &str) -> Result<String, SecurityError> {
        let response = self
            .http
            .get(self.profile.userinfo_url.as_str())
            .bearer_auth(access_token)
            .send()
            .await?;

        if !response.status().is_success() {
            tracing::warn!(status = %response.status(), "userinfo request rejected");
            return Err(SecurityError::Profile(format!(
                "userinfo request failed with status {}",
                response.status()
            )));
        }

        let info: UserInfo = response.json().await?;
        info.email
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty())
            .ok_or_else(|| SecurityError::Profile("userinfo response has no email".to_string()))
    }
}

fn is_loopback(url: &Url) -> bool {
    matches!(
        url.host_str(),
        Some("127.0.0.1") | Some("localhost") | Some("[::1]")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn profile_for(base: &str) -> OAuthProfile {
        google_profile(
            "client-id.apps.googleusercontent.com",
            "http://localhost:3000/auth/google/callback",
            &format!("{base}/o/oauth2/v2/auth"),
            &format!("{base}/token"),
            &format!("{base}/oauth2/v2/userinfo"),
        )
        .expect("profile")
    }

    fn google() -> OAuthWorkflow {
        let profile = google_profile(
            "client-id.apps.googleusercontent.com",
            "https://api.zenmail.test/auth/google/callback",
            "https://accounts.google.com/o/oauth2/v2/auth",
            "https://oauth2.googleapis.com/token",
            "https://www.googleapis.com/oauth2/v2/userinfo",
        )
        .expect("profile");
        OAuthWorkflow::new(profile, "shh").expect("workflow")
    }

    #[test]
    fn consent_url_requests_offline_access_and_mail_scopes() {
        let start = google().begin().expect("auth url");
        let url = Url::parse(&start.authorization_url).expect("valid url");
        let params: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        let get = |key: &str| {
            params
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
        };

        assert_eq!(url.host_str(), Some("accounts.google.com"));
        assert_eq!(get("access_type").as_deref(), Some("offline"));
        assert_eq!(get("prompt").as_deref(), Some("consent"));
        assert_eq!(get("response_type").as_deref(), Some("code"));
        assert_eq!(
            get("redirect_uri").as_deref(),
            Some("https://api.zenmail.test/auth/google/callback")
        );
        let scope = get("scope").expect("scope");
        for expected in GMAIL_SCOPES {
            assert!(scope.split(' ').any(|s| s == *expected), "missing {expected}");
        }
        assert_eq!(get("state").as_deref(), Some(start.csrf_state.as_str()));
    }

    #[test]
    fn plain_http_endpoints_are_rejected_unless_loopback() {
        let profile = profile_for("http://accounts.example.com");
        let err = OAuthWorkflow::new(profile, "shh").unwrap_err();
        assert!(err.to_string().contains("HTTPS"));

        assert!(OAuthWorkflow::new(profile_for("http://127.0.0.1:9999"), "shh").is_ok());
    }

    #[test]
    fn empty_client_credentials_are_rejected() {
        let mut profile = profile_for("https://accounts.google.com");
        assert!(OAuthWorkflow::new(profile.clone(), "  ").is_err());

        profile.client_id = " ".to_string();
        assert!(OAuthWorkflow::new(profile, "shh").is_err());
    }

    #[test]
    fn broad_scopes_are_rejected() {
        for scope in ["*", "Admin", "full_access"] {
            let mut profile = profile_for("https://accounts.google.com");
            profile.scopes.push(scope.to_string());
            let err = OAuthWorkflow::new(profile, "shh").unwrap_err();
            assert!(err.to_string().contains("too broad"), "{scope}: {err}");
        }
    }

    #[test]
    fn expiry_defaults_to_one_hour() {
        let now = Utc.with_ymd_and_hms(2025, 1, 1, 12, 0, 0).unwrap();
        let mut token = OAuthTokenResult {
            access_token: "a".to_string(),
            refresh_token: None,
            expires_in_secs: None,
        };
        assert_eq!(token.expiry_from(now), now + Duration::hours(1));

        token.expires_in_secs = Some(3599);
        assert_eq!(token.expiry_from(now), now + Duration::seconds(3599));
    }

    #[test]
    fn token_debug_output_is_redacted() {
        let token = OAuthTokenResult {
            access_token: "ya29.secret".to_string(),
            refresh_token: Some("1//refresh".to_string()),
            expires_in_secs: Some(10),
        };
        let rendered = format!("{token:?}");
        assert!(!rendered.contains("ya29.secret"));
        assert!(!rendered.contains("1//refresh"));
    }

    #[tokio::test]
    async fn exchanges_code_and_reads_profile_email() {
        let mut server = mockito::Server::new_async().await;
        let token_mock = server
            .mock("POST", "/token")
            .match_body(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("grant_type".into(), "authorization_code".into()),
                mockito::Matcher::UrlEncoded("code".into(), "abc".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"access_token":"ya29.abc","expires_in":3599,"refresh_token":"1//abc","scope":"openid email","token_type":"Bearer"}"#,
            )
            .create_async()
            .await;
        let userinfo_mock = server
            .mock("GET", "/oauth2/v2/userinfo")
            .match_header("authorization", "Bearer ya29.abc")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"1","email":"a@x.com","verified_email":true}"#)
            .create_async()
            .await;

        let workflow =
            OAuthWorkflow::new(profile_for(&server.url()), "shh").expect("workflow");
        let token = workflow.exchange_code("abc").await.expect("token");
        assert_eq!(token.access_token, "ya29.abc");
        assert_eq!(token.refresh_token.as_deref(), Some("1//abc"));
        assert_eq!(token.expires_in_secs, Some(3599));

        let email = workflow
            .fetch_user_email(&token.access_token)
            .await
            .expect("email");
        assert_eq!(email, "a@x.com");

        token_mock.assert_async().await;
        userinfo_mock.assert_async().await;
    }

    #[tokio::test]
    async fn rejected_code_is_an_oauth_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/token")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":"invalid_grant","error_description":"Bad Request"}"#)
            .create_async()
            .await;

        let workflow =
            OAuthWorkflow::new(profile_for(&server.url()), "shh").expect("workflow");
        let err = workflow.exchange_code("stale").await.unwrap_err();
        assert!(matches!(err, SecurityError::OAuth(_)));
    }

    #[tokio::test]
    async fn profile_without_email_is_an_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/oauth2/v2/userinfo")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"1"}"#)
            .create_async()
            .await;

        let workflow =
            OAuthWorkflow::new(profile_for(&server.url()), "shh").expect("workflow");
        let err = workflow.fetch_user_email("token").await.unwrap_err();
        assert!(matches!(err, SecurityError::Profile(_)));
    }
}
