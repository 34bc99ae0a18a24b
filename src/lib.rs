pub mod application;
pub mod domain;
pub mod infrastructure;

use application::commands::{
    AuthCommandResponse, AuthRequest, SyncCommandResponse, SyncRequest, auth_impl, sync_impl,
};
use clap::{Args, Parser, Subcommand};
use infrastructure::callback_server::{DEFAULT_CALLBACK_PORT, TlsFiles};
use infrastructure::config::{ApiGeneration, DEFAULT_CONFIG_FILE};
use infrastructure::logging::{LogFormat, init_logging};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "run-sheet-sync",
    version,
    about = "Sync WHOOP running workouts into a weekly Google Sheets log",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Options for `sync`, which also runs when no command is given
    #[command(flatten)]
    sync: SyncArgs,

    /// Log filter for this crate (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

impl Cli {
    fn into_command(self) -> Commands {
        self.command.unwrap_or(Commands::Sync(self.sync))
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Aggregate recent running workouts and write them into the sheet
    Sync(SyncArgs),
    /// Obtain WHOOP OAuth tokens through a local HTTPS callback
    Auth(AuthArgs),
}

#[derive(Debug, Clone, Args)]
struct SyncArgs {
    /// Number of days ago to start syncing from (up to today)
    #[arg(long, default_value_t = 14)]
    days_ago: u32,

    /// Google Sheet name
    #[arg(long, env = "RUN_SHEET_NAME")]
    sheet_name: Option<String>,

    /// Path to Google service account credentials JSON
    #[arg(long, default_value = "google-creds.json")]
    creds_path: PathBuf,

    /// Path to WHOOP OAuth token JSON file
    #[arg(long, default_value = "whoop-tokens.json")]
    token_file: PathBuf,

    /// Settings file, used only if it exists
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Worksheet (tab) holding the weekly grid
    #[arg(long)]
    worksheet: Option<String>,

    #[arg(long, value_enum)]
    api_generation: Option<ApiGeneration>,
}

#[derive(Debug, Clone, Args)]
struct AuthArgs {
    /// Path to WHOOP OAuth token JSON file
    #[arg(long, default_value = "whoop-tokens.json")]
    token_file: PathBuf,

    /// Port for local HTTPS server
    #[arg(long, default_value_t = DEFAULT_CALLBACK_PORT)]
    port: u16,

    #[arg(long, default_value = "localhost.pem")]
    cert: PathBuf,

    #[arg(long, default_value = "localhost-key.pem")]
    key: PathBuf,

    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,
}

impl SyncArgs {
    fn into_request(self) -> Result<SyncRequest, String> {
        let sheet_name = self
            .sheet_name
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| "--sheet-name (or RUN_SHEET_NAME) is required".to_string())?;
        Ok(SyncRequest {
            days_ago: self.days_ago,
            sheet_name,
            creds_path: self.creds_path,
            token_file: self.token_file,
            config_path: self.config,
            worksheet: self.worksheet,
            api_generation: self.api_generation,
        })
    }
}

impl From<AuthArgs> for AuthRequest {
    fn from(args: AuthArgs) -> Self {
        Self {
            token_file: args.token_file,
            port: args.port,
            tls: TlsFiles {
                cert_path: args.cert,
                key_path: args.key,
            },
            config_path: args.config,
        }
    }
}

fn print_json<T: Serialize>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(rendered) => println!("{rendered}"),
        Err(error) => tracing::warn!(%error, "failed to render command output"),
    }
}

async fn run_sync(args: SyncArgs) -> ExitCode {
    let request = match args.into_request() {
        Ok(request) => request,
        Err(message) => {
            tracing::error!("{message}");
            return ExitCode::from(2);
        }
    };

    match sync_impl(request).await {
        Ok(report) => {
            print_json(&SyncCommandResponse::from(&report));
            if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            }
        }
        Err(error) => {
            tracing::error!(applied = error.applied, error = %error.source, "sync failed");
            ExitCode::FAILURE
        }
    }
}

async fn run_auth(args: AuthArgs) -> ExitCode {
    match auth_impl(args.into()).await {
        Ok(response) => {
            print_json::<AuthCommandResponse>(&response);
            ExitCode::SUCCESS
        }
        Err(error) => {
            tracing::error!(%error, "authorization failed");
            ExitCode::FAILURE
        }
    }
}

/// Command-line entry point.
pub fn run() -> ExitCode {
    // A missing .env is fine; the variables may come from the environment.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    if let Err(error) = init_logging(&cli.log_level, cli.log_format) {
        eprintln!("{error}");
        return ExitCode::from(2);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            tracing::error!(%error, "failed to start async runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        match cli.into_command() {
            Commands::Sync(args) => run_sync(args).await,
            Commands::Auth(args) => run_auth(args).await,
        }
    })
}
