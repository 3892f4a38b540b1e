use std::{fmt, path::Path};

use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::error::GoogleApiError;

pub const SCOPE_ANDROID_MANAGEMENT: &str = "https://www.googleapis.com/auth/androidmanagement";
pub const SCOPE_FIREBASE_MESSAGING: &str = "https://www.googleapis.com/auth/firebase.messaging";
pub const SCOPE_DATASTORE: &str = "https://www.googleapis.com/auth/datastore";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const EXPIRY_MARGIN_SECS: i64 = 60;

/// Anything that can hand out a bearer token for Google APIs.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, GoogleApiError>;
}

/// Fixed token, e.g. from `gcloud auth print-access-token`.
pub struct StaticTokenSource(pub String);

#[async_trait]
impl AccessTokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<String, GoogleApiError> {
        Ok(self.0.clone())
    }
}

#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
    pub private_key: String,
    pub client_email: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl ServiceAccountKey {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, GoogleApiError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GoogleApiError::Credentials(format!(
                "service account file not found at {}",
                path.display()
            )));
        }
        let raw = std::fs::read_to_string(path).map_err(|e| {
            GoogleApiError::Credentials(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, GoogleApiError> {
        let mut key: ServiceAccountKey = serde_json::from_str(raw)
            .map_err(|e| GoogleApiError::Credentials(format!("invalid service account: {e}")))?;
        key.private_key = unescape_newlines(&key.private_key);
        Ok(key)
    }

    /// `FIREBASE_PROJECT_ID`, `FIREBASE_CLIENT_EMAIL`, `FIREBASE_PRIVATE_KEY`
    /// and optionally `FIREBASE_PRIVATE_KEY_ID`.
    pub fn from_firebase_env() -> Option<Self> {
        let project_id = dotenvy::var("FIREBASE_PROJECT_ID").ok()?;
        let client_email = dotenvy::var("FIREBASE_CLIENT_EMAIL").ok()?;
        let private_key = dotenvy::var("FIREBASE_PRIVATE_KEY").ok()?;

        Some(Self {
            project_id: Some(project_id),
            private_key_id: dotenvy::var("FIREBASE_PRIVATE_KEY_ID").ok(),
            private_key: unescape_newlines(&private_key),
            client_email,
            token_uri: default_token_uri(),
        })
    }
}

/// Keys pasted into env files usually carry literal `\n` sequences.
fn unescape_newlines(key: &str) -> String {
    key.replace("\\n", "\n")
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

#[derive(Clone)]
struct CachedToken {
    value: String,
    expires_at: i64,
}

/// OAuth2 JWT-bearer flow for a service account, with the token cached
/// until shortly before it expires.
pub struct ServiceAccountTokenSource {
    key: ServiceAccountKey,
    scope: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedToken>>,
}

impl ServiceAccountTokenSource {
    pub fn new(key: ServiceAccountKey, scope: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            key,
            scope: scope.into(),
            http,
            cache: RwLock::new(None),
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        self.key.project_id.as_deref()
    }

    fn signed_assertion(&self, now: i64) -> Result<String, GoogleApiError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.key.private_key_id.clone();

        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: &self.scope,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };

        let signing_key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes())
            .map_err(|e| GoogleApiError::Credentials(format!("invalid private key: {e}")))?;

        encode(&header, &claims, &signing_key)
            .map_err(|e| GoogleApiError::Credentials(format!("JWT sign error: {e}")))
    }

    async fn fetch_token(&self, now: i64) -> Result<CachedToken, GoogleApiError> {
        let assertion = self.signed_assertion(now)?;

        let response = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        if !response.status().is_success() {
            let err = GoogleApiError::from_response(response).await;
            return Err(GoogleApiError::Auth(err.to_string()));
        }

        let token: TokenResponse = response.json().await?;
        info!(
            client_email = %self.key.client_email,
            scope = %self.scope,
            expires_in = token.expires_in,
            "obtained Google access token"
        );

        Ok(CachedToken {
            value: token.access_token,
            expires_at: now + token.expires_in - EXPIRY_MARGIN_SECS,
        })
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String, GoogleApiError> {
        let now = chrono::Utc::now().timestamp();

        {
            let cached = self.cache.read().await;
            if let Some(token) = cached.as_ref().filter(|t| t.expires_at > now) {
                return Ok(token.value.clone());
            }
        }

        let mut cache = self.cache.write().await;
        // Another request may have refreshed while we waited for the write lock.
        if let Some(token) = cache.as_ref().filter(|t| t.expires_at > now) {
            return Ok(token.value.clone());
        }

        debug!(scope = %self.scope, "refreshing Google access token");
        let fresh = self.fetch_token(now).await?;
        let value = fresh.value.clone();
        *cache = Some(fresh);
        Ok(value)
    }
}
