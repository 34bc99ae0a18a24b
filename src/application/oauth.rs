use crate::domain::models::{OAuthToken, expiry_after};
use crate::infrastructure::credential_store::CredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::oauth_client::{
    OAuthCodeExchangeRequest, OAuthHttpClient, OAuthRefreshRequest, OAuthTokenResponse,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use url::Url;

const DEFAULT_TOKEN_ENDPOINT: &str = "https://api.prod.whoop.com/oauth/oauth2/token";
const DEFAULT_AUTHORIZATION_ENDPOINT: &str = "https://api.prod.whoop.com/oauth/oauth2/auth";
pub const WHOOP_SCOPES: [&str; 2] = ["offline", "read:workout"];
const EXPIRY_LEEWAY_SECONDS: i64 = 60;

#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub token_endpoint: String,
    pub authorization_endpoint: String,
}

impl OAuthConfig {
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: WHOOP_SCOPES.iter().map(|scope| scope.to_string()).collect(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            authorization_endpoint: DEFAULT_AUTHORIZATION_ENDPOINT.to_string(),
        }
    }

    pub fn with_token_endpoint(mut self, token_endpoint: impl Into<String>) -> Self {
        self.token_endpoint = token_endpoint.into();
        self
    }

    fn scope(&self) -> String {
        self.scopes.join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnsureTokenResult {
    Existing(OAuthToken),
    Refreshed(OAuthToken),
}

impl EnsureTokenResult {
    pub fn into_token(self) -> OAuthToken {
        match self {
            Self::Existing(token) | Self::Refreshed(token) => token,
        }
    }
}

/// Hands out a bearer token for the activity API.
#[async_trait]
pub trait AccessTokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String, InfraError>;
}

type NowProvider = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub struct OAuthManager<S, C>
where
    S: CredentialStore,
    C: OAuthHttpClient,
{
    config: OAuthConfig,
    credential_store: Arc<S>,
    oauth_client: Arc<C>,
    now_provider: NowProvider,
}

impl<S, C> OAuthManager<S, C>
where
    S: CredentialStore,
    C: OAuthHttpClient,
{
    pub fn new(config: OAuthConfig, credential_store: Arc<S>, oauth_client: Arc<C>) -> Self {
        Self {
            config,
            credential_store,
            oauth_client,
            now_provider: Arc::new(Utc::now),
        }
    }

    pub fn with_now_provider(mut self, now_provider: NowProvider) -> Self {
        self.now_provider = now_provider;
        self
    }

    pub fn is_token_valid(&self, token: &OAuthToken) -> bool {
        !token.is_expired_at((self.now_provider)(), EXPIRY_LEEWAY_SECONDS)
    }

    pub fn build_authorization_url(&self, state: &str) -> Result<String, InfraError> {
        if state.trim().is_empty() {
            return Err(InfraError::OAuth("state must not be empty".to_string()));
        }
        if self.config.scopes.is_empty() {
            return Err(InfraError::OAuth("at least one scope is required".to_string()));
        }

        let mut url = Url::parse(&self.config.authorization_endpoint)
            .map_err(|error| InfraError::OAuth(format!("invalid authorization endpoint: {error}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scope())
            .append_pair("state", state);

        Ok(url.to_string())
    }

    pub async fn authenticate_with_code(&self, authorization_code: &str) -> Result<OAuthToken, InfraError> {
        if authorization_code.trim().is_empty() {
            return Err(InfraError::OAuth("authorization code must not be empty".to_string()));
        }

        let response = self
            .oauth_client
            .exchange_authorization_code(OAuthCodeExchangeRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                redirect_uri: self.config.redirect_uri.clone(),
                authorization_code: authorization_code.to_string(),
            })
            .await?;

        let token = self.token_from_response(response, None);
        self.credential_store.save(&token)?;
        tracing::info!(store = %self.credential_store.describe(), "stored WHOOP token");
        Ok(token)
    }

    /// Loads the stored token, refreshing and persisting it when expired.
    pub async fn ensure_access_token(&self) -> Result<EnsureTokenResult, InfraError> {
        let Some(stored_token) = self.credential_store.load()? else {
            return Err(InfraError::NotAuthenticated(self.credential_store.describe()));
        };

        if self.is_token_valid(&stored_token) {
            return Ok(EnsureTokenResult::Existing(stored_token));
        }

        let Some(refresh_token) = stored_token.refresh_token.clone() else {
            return Err(InfraError::OAuth(format!(
                "stored token in {} expired and has no refresh_token; run the auth command again",
                self.credential_store.describe()
            )));
        };

        tracing::info!("access token expired, refreshing");
        let response = self
            .oauth_client
            .refresh_access_token(OAuthRefreshRequest {
                token_endpoint: self.config.token_endpoint.clone(),
                client_id: self.config.client_id.clone(),
                client_secret: self.config.client_secret.clone(),
                refresh_token: refresh_token.clone(),
                scope: Some(self.config.scope()),
            })
            .await
            .map_err(|error| match error {
                InfraError::OAuth(message) => {
                    InfraError::OAuth(format!("token refresh failed: {message}"))
                }
                other => other,
            })?;

        let token = self.token_from_response(response, Some(refresh_token));
        self.credential_store.save(&token)?;
        tracing::info!(store = %self.credential_store.describe(), "refreshed WHOOP token");
        Ok(EnsureTokenResult::Refreshed(token))
    }

    pub async fn valid_access_token(&self) -> Result<String, InfraError> {
        Ok(self.ensure_access_token().await?.into_token().access_token)
    }

    fn token_from_response(
        &self,
        response: OAuthTokenResponse,
        fallback_refresh_token: Option<String>,
    ) -> OAuthToken {
        let now = (self.now_provider)();
        OAuthToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(fallback_refresh_token),
            expires_at: response
                .expires_in
                .map(|seconds| expiry_after(now, seconds)),
            token_type: response.token_type.unwrap_or_else(|| "bearer".to_string()),
            scope: response.scope.or_else(|| Some(self.config.scope())),
        }
    }
}

#[async_trait]
impl<S, C> AccessTokenProvider for OAuthManager<S, C>
where
    S: CredentialStore,
    C: OAuthHttpClient,
{
    async fn access_token(&self) -> Result<String, InfraError> {
        self.valid_access_token().await
    }
}
