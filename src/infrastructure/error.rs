use chrono::NaiveDate;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("OAuth error: {0}")]
    OAuth(String),
    #[error("Credential store error: {0}")]
    Credential(String),
    #[error("No stored WHOOP token at {0}. Please run the auth command first.")]
    NotAuthenticated(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Failed to fetch workouts: http {status}; {body}")]
    Fetch { status: u16, body: String },
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Misconfigured sheet: {0}")]
    SheetConfig(String),
    #[error("Could not find cell for {date} ({day_name}) in week starting {week_start}")]
    CellResolution {
        date: NaiveDate,
        day_name: &'static str,
        week_start: NaiveDate,
    },
    #[error("Spreadsheet API error: http {status}; {body}")]
    SheetsApi { status: u16, body: String },
    #[error("Cell write failed after {attempts} attempt(s): {message}")]
    Write { attempts: u32, message: String },
}

impl InfraError {
    /// Transport failures, rate limiting and server errors.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::SheetsApi { status, .. } => *status == 429 || (500..=599).contains(status),
            _ => false,
        }
    }

    pub(crate) fn network(context: &str, error: reqwest::Error) -> Self {
        Self::Network(format!("{context}: {error}"))
    }
}
