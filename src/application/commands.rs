use crate::application::activity_aggregator::ActivityAggregator;
use crate::application::oauth::{OAuthConfig, OAuthManager};
use crate::application::retry::RetryPolicy;
use crate::application::running_sync::{RunningSheetSync, SyncError, SyncOutcome, SyncReport, SyncWindow};
use crate::domain::local_time::weekday_name;
use crate::infrastructure::callback_server::{
    CallbackParams, DEFAULT_CALLBACK_PORT, TlsFiles, ensure_self_signed_certificate, redirect_uri, serve_oauth_callback,
    tls_acceptor,
};
use crate::infrastructure::config::{ApiGeneration, SyncSettings, WhoopAppCredentials, load_settings};
use crate::infrastructure::credential_store::FileCredentialStore;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::oauth_client::ReqwestOAuthClient;
use crate::infrastructure::service_account::{ServiceAccountKey, ServiceAccountTokenSource};
use crate::infrastructure::sheets_client::GoogleSheetsClient;
use crate::infrastructure::whoop_client::ReqwestWhoopClient;
use chrono::{Datelike, Utc};
use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

const STATE_LENGTH: usize = 32;

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub days_ago: u32,
    pub sheet_name: String,
    pub creds_path: PathBuf,
    pub token_file: PathBuf,
    pub config_path: PathBuf,
    pub worksheet: Option<String>,
    pub api_generation: Option<ApiGeneration>,
}

#[derive(Debug, Clone)]
pub struct AuthRequest {
    pub token_file: PathBuf,
    pub port: u16,
    pub tls: TlsFiles,
    pub config_path: PathBuf,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncCommandResponse {
    pub outcome: String,
    pub start: String,
    pub end: String,
    pub running_days: usize,
    pub total_minutes: u64,
    pub cells_written: usize,
    pub skipped_zero_days: Vec<String>,
    pub unresolved_days: Vec<String>,
    pub page_ceiling_hit: bool,
}

impl From<&SyncReport> for SyncCommandResponse {
    fn from(report: &SyncReport) -> Self {
        let outcome = match &report.outcome {
            SyncOutcome::NothingToSync => "nothing_to_sync".to_string(),
            SyncOutcome::SheetMisconfigured(reason) => format!("sheet_misconfigured: {reason}"),
            SyncOutcome::Applied => "applied".to_string(),
        };
        Self {
            outcome,
            start: report.window.start.to_string(),
            end: report.window.end.to_string(),
            running_days: report.aggregation.daily.len(),
            total_minutes: report.aggregation.daily.total_minutes(),
            cells_written: report.cells_written,
            skipped_zero_days: report.skipped_zero.iter().map(ToString::to_string).collect(),
            unresolved_days: report
                .unresolved
                .iter()
                .map(|day| format!("{} ({})", day.date, weekday_name(day.date.weekday())))
                .collect(),
            page_ceiling_hit: report.aggregation.page_ceiling_hit,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCommandResponse {
    pub token_file: String,
    pub message: String,
}

fn resolve_settings(request: &SyncRequest) -> Result<SyncSettings, InfraError> {
    let mut settings = load_settings(&request.config_path)?;
    if let Some(worksheet) = request.worksheet.as_ref().filter(|value| !value.trim().is_empty()) {
        settings.worksheet = worksheet.trim().to_string();
    }
    if let Some(generation) = request.api_generation {
        settings.api_generation = generation;
    }
    Ok(settings)
}

pub async fn sync_impl(request: SyncRequest) -> Result<SyncReport, SyncError> {
    let settings = resolve_settings(&request)?;
    let app = WhoopAppCredentials::from_env()?;
    let time_zone = settings.time_zone()?;

    tracing::info!(
        sheet = %request.sheet_name,
        worksheet = %settings.worksheet,
        days_ago = request.days_ago,
        api = ?settings.api_generation,
        "loaded sync settings"
    );

    let oauth_client = ReqwestOAuthClient::new(settings.http_timeout())?;
    let tokens = OAuthManager::new(
        OAuthConfig::new(app.client_id, app.client_secret, redirect_uri(DEFAULT_CALLBACK_PORT)),
        Arc::new(FileCredentialStore::new(&request.token_file)),
        Arc::new(oauth_client),
    );

    let whoop = ReqwestWhoopClient::new(settings.api_generation, settings.http_timeout())?
        .with_page_limit(settings.page_limit);
    let aggregator = ActivityAggregator::new(Arc::new(whoop))
        .with_running_sport_ids(settings.running_sport_ids.iter().copied())
        .with_max_pages(settings.max_pages);

    let http = reqwest::Client::builder()
        .timeout(settings.http_timeout())
        .build()
        .map_err(|error| InfraError::InvalidConfig(format!("failed to build http client: {error}")))?;
    let key = ServiceAccountKey::from_file(&request.creds_path)?;
    let sheets = GoogleSheetsClient::new(
        http.clone(),
        Arc::new(ServiceAccountTokenSource::new(key, http)),
        request.sheet_name.clone(),
    )?;

    let window = SyncWindow::lookback(Utc::now(), time_zone, request.days_ago, settings.api_generation);
    RunningSheetSync::new(Arc::new(tokens), aggregator, Arc::new(sheets), settings.worksheet.clone())
        .with_retry_policy(RetryPolicy::from(settings.retry.clone()))
        .run(window)
        .await
}

fn random_state() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}

fn check_callback(params: &CallbackParams, expected_state: &str) -> Result<String, InfraError> {
    if let Some(error) = &params.error {
        return Err(InfraError::OAuth(format!("authorization was denied: {error}")));
    }
    if params.state.as_deref() != Some(expected_state) {
        return Err(InfraError::OAuth("state mismatch in OAuth callback".to_string()));
    }
    params
        .code
        .clone()
        .filter(|code| !code.trim().is_empty())
        .ok_or_else(|| InfraError::OAuth("callback did not include an authorization code".to_string()))
}

pub async fn auth_impl(request: AuthRequest) -> Result<AuthCommandResponse, InfraError> {
    let settings = load_settings(&request.config_path)?;
    let app = WhoopAppCredentials::from_env()?;
    let store = FileCredentialStore::new(&request.token_file);
    let token_file = store.path().display().to_string();

    let manager = OAuthManager::new(
        OAuthConfig::new(app.client_id, app.client_secret, redirect_uri(request.port)),
        Arc::new(store),
        Arc::new(ReqwestOAuthClient::new(settings.http_timeout())?),
    );

    let state = random_state();
    let authorization_url = manager.build_authorization_url(&state)?;

    ensure_self_signed_certificate(&request.tls).await?;
    let acceptor = tls_acceptor(&request.tls)?;

    tracing::info!(
        url = %format!("https://localhost:{}/", request.port),
        "open this address in a browser and accept the self-signed certificate"
    );
    let manager = &manager;
    let state = state.as_str();
    let token_file_ref = token_file.as_str();
    let message = serve_oauth_callback(request.port, acceptor, &authorization_url, |params| async move {
        let code = check_callback(&params, state)?;
        manager.authenticate_with_code(&code).await?;
        Ok::<_, InfraError>(format!(
            "WHOOP token saved to {token_file_ref}. You can close this window."
        ))
    })
    .await?;

    Ok(AuthCommandResponse { token_file, message })
}
