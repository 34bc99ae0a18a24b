use crate::domain::models::expiry_after;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub const SHEETS_SCOPES: [&str; 2] = [
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/drive",
];
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECONDS: i64 = 3600;
const REFRESH_MARGIN_SECONDS: i64 = 60;

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Supplies bearer tokens for the spreadsheet API.
#[async_trait]
pub trait BearerTokenSource: Send + Sync {
    async fn bearer_token(&self) -> Result<String, InfraError>;
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_file(path: &Path) -> Result<Self, InfraError> {
        let raw = fs::read_to_string(path).map_err(|error| {
            InfraError::InvalidConfig(format!(
                "cannot read service account file {}: {error}",
                path.display()
            ))
        })?;
        let key: Self = serde_json::from_str(&raw).map_err(|error| {
            InfraError::InvalidConfig(format!(
                "invalid service account file {}: {error}",
                path.display()
            ))
        })?;
        if key.client_email.trim().is_empty() || key.private_key.trim().is_empty() {
            return Err(InfraError::InvalidConfig(format!(
                "service account file {} is missing client_email or private_key",
                path.display()
            )));
        }
        Ok(key)
    }
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: String,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct AccessTokenPayload {
    access_token: String,
    expires_in: Option<i64>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Exchanges a signed service-account assertion for an access token and
/// caches it until shortly before expiry.
pub struct ServiceAccountTokenSource {
    key: ServiceAccountKey,
    client: Client,
    scopes: Vec<String>,
    cached: Mutex<Option<CachedToken>>,
    now_provider: NowProvider,
}

impl ServiceAccountTokenSource {
    pub fn new(key: ServiceAccountKey, client: Client) -> Self {
        Self {
            key,
            client,
            scopes: SHEETS_SCOPES.iter().map(|scope| scope.to_string()).collect(),
            cached: Mutex::new(None),
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn signed_assertion(&self, issued_at: DateTime<Utc>) -> Result<String, InfraError> {
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: self.scopes.join(" "),
            aud: &self.key.token_uri,
            iat: issued_at.timestamp(),
            exp: issued_at.timestamp() + ASSERTION_LIFETIME_SECONDS,
        };
        let key = EncodingKey::from_rsa_pem(self.key.private_key.as_bytes()).map_err(|error| {
            InfraError::InvalidConfig(format!("invalid service account private key: {error}"))
        })?;
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|error| InfraError::OAuth(format!("failed to sign service account assertion: {error}")))
    }

    fn cached_token(&self, now: DateTime<Utc>) -> Result<Option<String>, InfraError> {
        let guard = self
            .cached
            .lock()
            .map_err(|error| InfraError::Credential(format!("token cache lock poisoned: {error}")))?;
        Ok(guard
            .as_ref()
            .filter(|token| token.expires_at > now + Duration::seconds(REFRESH_MARGIN_SECONDS))
            .map(|token| token.value.clone()))
    }

    async fn request_token(&self, now: DateTime<Utc>) -> Result<CachedToken, InfraError> {
        let assertion = self.signed_assertion(now)?;
        let response = self
            .client
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|error| InfraError::network("service account token request failed", error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::network("failed reading service account token response", error))?;
        if !status.is_success() {
            return Err(InfraError::OAuth(format!(
                "service account token endpoint error: http {}; body={body}",
                status.as_u16()
            )));
        }

        let parsed: AccessTokenPayload = serde_json::from_str(&body).map_err(|error| {
            InfraError::OAuth(format!("invalid service account token payload: {error}; body={body}"))
        })?;
        Ok(CachedToken {
            value: parsed.access_token,
            expires_at: expiry_after(now, parsed.expires_in.unwrap_or(ASSERTION_LIFETIME_SECONDS)),
        })
    }
}

#[async_trait]
impl BearerTokenSource for ServiceAccountTokenSource {
    async fn bearer_token(&self) -> Result<String, InfraError> {
        let now = (self.now_provider)();
        if let Some(token) = self.cached_token(now)? {
            return Ok(token);
        }

        let fresh = self.request_token(now).await?;
        tracing::debug!(client_email = %self.key.client_email, "obtained spreadsheet access token");
        let value = fresh.value.clone();
        let mut guard = self
            .cached
            .lock()
            .map_err(|error| InfraError::Credential(format!("token cache lock poisoned: {error}")))?;
        *guard = Some(fresh);
        Ok(value)
    }
}
