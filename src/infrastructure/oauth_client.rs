use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct OAuthCodeExchangeRequest {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorization_code: String,
}

#[derive(Debug, Clone)]
pub struct OAuthRefreshRequest {
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    pub scope: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokenResponse {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_in: Option<i64>,
    pub token_type: Option<String>,
    pub scope: Option<String>,
}

#[async_trait]
pub trait OAuthHttpClient: Send + Sync {
    async fn exchange_authorization_code(
        &self,
        request: OAuthCodeExchangeRequest,
    ) -> Result<OAuthTokenResponse, InfraError>;

    async fn refresh_access_token(
        &self,
        request: OAuthRefreshRequest,
    ) -> Result<OAuthTokenResponse, InfraError>;
}

/// Form body of one token endpoint call. WHOOP expects the client
/// credentials in the body rather than in a Basic header.
fn code_grant_form(request: OAuthCodeExchangeRequest) -> Vec<(&'static str, String)> {
    vec![
        ("grant_type", "authorization_code".to_string()),
        ("code", request.authorization_code),
        ("redirect_uri", request.redirect_uri),
        ("client_id", request.client_id),
        ("client_secret", request.client_secret),
    ]
}

fn refresh_grant_form(request: OAuthRefreshRequest) -> Vec<(&'static str, String)> {
    let mut form = vec![
        ("grant_type", "refresh_token".to_string()),
        ("refresh_token", request.refresh_token),
        ("client_id", request.client_id),
        ("client_secret", request.client_secret),
    ];
    form.extend(request.scope.map(|scope| ("scope", scope)));
    form
}

#[derive(Debug, serde::Deserialize)]
struct TokenEndpointBody {
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

/// Maps a token endpoint reply to a token or an `OAuth` error. An `error`
/// field fails the call even on a 2xx status.
pub fn parse_token_response(status: u16, body: &str) -> Result<OAuthTokenResponse, InfraError> {
    let parsed: TokenEndpointBody = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(error) if (200..300).contains(&status) => {
            return Err(InfraError::OAuth(format!(
                "unreadable token response: {error}; body={body}"
            )));
        }
        Err(_) => {
            return Err(InfraError::OAuth(format!(
                "token endpoint returned http {status}; body={body}"
            )));
        }
    };

    if let Some(code) = non_blank(parsed.error) {
        let detail = non_blank(parsed.error_description).unwrap_or_else(|| body.to_string());
        return Err(InfraError::OAuth(format!("{code} (http {status}): {detail}")));
    }
    if !(200..300).contains(&status) {
        return Err(InfraError::OAuth(format!(
            "token endpoint returned http {status}; body={body}"
        )));
    }

    let access_token = non_blank(parsed.access_token)
        .ok_or_else(|| InfraError::OAuth("token response has no access_token".to_string()))?;
    Ok(OAuthTokenResponse {
        access_token,
        refresh_token: non_blank(parsed.refresh_token),
        expires_in: parsed.expires_in.map(|seconds| seconds.max(0)),
        token_type: non_blank(parsed.token_type),
        scope: non_blank(parsed.scope),
    })
}

#[derive(Debug, Clone)]
pub struct ReqwestOAuthClient {
    client: Client,
}

impl ReqwestOAuthClient {
    pub fn new(timeout: Duration) -> Result<Self, InfraError> {
        Client::builder()
            .timeout(timeout)
            .build()
            .map(|client| Self { client })
            .map_err(|error| InfraError::InvalidConfig(format!("failed to build http client: {error}")))
    }

    async fn request_token(
        &self,
        endpoint: &str,
        form: &[(&'static str, String)],
    ) -> Result<OAuthTokenResponse, InfraError> {
        let response = self
            .client
            .post(endpoint)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(form)
            .send()
            .await
            .map_err(|error| InfraError::network("token request failed", error))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::network("failed reading token response", error))?;
        parse_token_response(status, &body)
    }
}

#[async_trait]
impl OAuthHttpClient for ReqwestOAuthClient {
    async fn exchange_authorization_code(
        &self,
        request: OAuthCodeExchangeRequest,
    ) -> Result<OAuthTokenResponse, InfraError> {
        let endpoint = request.token_endpoint.clone();
        self.request_token(&endpoint, &code_grant_form(request)).await
    }

    async fn refresh_access_token(
        &self,
        request: OAuthRefreshRequest,
    ) -> Result<OAuthTokenResponse, InfraError> {
        let endpoint = request.token_endpoint.clone();
        self.request_token(&endpoint, &refresh_grant_form(request)).await
    }
}
