use crate::infrastructure::error::InfraError;
use crate::infrastructure::service_account::BearerTokenSource;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use tokio::sync::OnceCell;
use url::Url;

const SHEETS_API_BASE: &str = "https://sheets.googleapis.com/";
const DRIVE_API_BASE: &str = "https://www.googleapis.com/";
const SPREADSHEET_MIME_TYPE: &str = "application/vnd.google-apps.spreadsheet";

/// Raw cell grid of one worksheet: first row is the header row.
pub type CellGrid = Vec<Vec<String>>;

#[async_trait]
pub trait SpreadsheetStore: Send + Sync {
    async fn read_grid(&self, worksheet: &str) -> Result<CellGrid, InfraError>;

    /// `row` and `column` are 1-indexed.
    async fn write_cell(
        &self,
        worksheet: &str,
        row: u32,
        column: u32,
        value: u32,
    ) -> Result<(), InfraError>;
}

/// 1 -> A, 26 -> Z, 27 -> AA.
pub fn column_letters(column: u32) -> String {
    let mut remaining = column;
    let mut letters = Vec::new();
    while remaining > 0 {
        let index = (remaining - 1) % 26;
        letters.push(char::from(b'A' + index as u8));
        remaining = (remaining - 1) / 26;
    }
    letters.iter().rev().collect()
}

fn quoted_sheet_name(worksheet: &str) -> String {
    format!("'{}'", worksheet.replace('\'', "''"))
}

pub fn a1_cell(worksheet: &str, row: u32, column: u32) -> String {
    format!("{}!{}{}", quoted_sheet_name(worksheet), column_letters(column), row)
}

/// Pads ragged rows so every row has the width of the widest one.
pub fn rectangular(mut grid: CellGrid) -> CellGrid {
    let width = grid.iter().map(Vec::len).max().unwrap_or(0);
    for row in &mut grid {
        row.resize(width, String::new());
    }
    grid
}

#[derive(Debug, serde::Deserialize)]
struct ValueRangeResponse {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

#[derive(Debug, serde::Serialize)]
struct ValueRangeUpdate<'a> {
    range: &'a str,
    #[serde(rename = "majorDimension")]
    major_dimension: &'static str,
    values: [[u32; 1]; 1],
}

#[derive(Debug, serde::Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, serde::Deserialize)]
struct DriveFile {
    id: String,
}

/// Google Sheets spreadsheet addressed by its title. The title is resolved to
/// an id through the Drive API on first use.
pub struct GoogleSheetsClient {
    client: Client,
    tokens: Arc<dyn BearerTokenSource>,
    spreadsheet_name: String,
    spreadsheet_id: OnceCell<String>,
    sheets_base: Url,
    drive_base: Url,
}

impl GoogleSheetsClient {
    pub fn new(
        client: Client,
        tokens: Arc<dyn BearerTokenSource>,
        spreadsheet_name: impl Into<String>,
    ) -> Result<Self, InfraError> {
        Ok(Self {
            client,
            tokens,
            spreadsheet_name: spreadsheet_name.into(),
            spreadsheet_id: OnceCell::new(),
            sheets_base: parse_base(SHEETS_API_BASE)?,
            drive_base: parse_base(DRIVE_API_BASE)?,
        })
    }

    pub fn with_endpoints(mut self, sheets_base: &str, drive_base: &str) -> Result<Self, InfraError> {
        self.sheets_base = parse_base(sheets_base)?;
        self.drive_base = parse_base(drive_base)?;
        Ok(self)
    }

    fn api_error(status: reqwest::StatusCode, body: String) -> InfraError {
        InfraError::SheetsApi {
            status: status.as_u16(),
            body,
        }
    }

    async fn spreadsheet_id(&self) -> Result<&str, InfraError> {
        self.spreadsheet_id
            .get_or_try_init(|| self.find_spreadsheet_id())
            .await
            .map(String::as_str)
    }

    async fn find_spreadsheet_id(&self) -> Result<String, InfraError> {
        let token = self.tokens.bearer_token().await?;
        let url = self
            .drive_base
            .join("drive/v3/files")
            .map_err(|error| InfraError::InvalidConfig(format!("invalid drive url: {error}")))?;
        let query = format!(
            "name = '{}' and mimeType = '{SPREADSHEET_MIME_TYPE}' and trashed = false",
            self.spreadsheet_name.replace('\\', "\\\\").replace('\'', "\\'")
        );

        let response = self
            .client
            .get(url)
            .bearer_auth(&token)
            .query(&[
                ("q", query.as_str()),
                ("fields", "files(id,name)"),
                ("supportsAllDrives", "true"),
                ("includeItemsFromAllDrives", "true"),
            ])
            .send()
            .await
            .map_err(|error| InfraError::network("network error while searching spreadsheets", error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::network("failed reading spreadsheet search response", error))?;
        if !status.is_success() {
            return Err(Self::api_error(status, body));
        }

        let parsed: DriveFileList = serde_json::from_str(&body)?;
        let id = parsed
            .files
            .into_iter()
            .map(|file| file.id)
            .find(|id| !id.trim().is_empty())
            .ok_or_else(|| {
                InfraError::SheetConfig(format!(
                    "spreadsheet '{}' not found or not shared with the service account",
                    self.spreadsheet_name
                ))
            })?;
        tracing::info!(spreadsheet = %self.spreadsheet_name, spreadsheet_id = %id, "opened spreadsheet");
        Ok(id)
    }

    async fn values_url(&self, range: &str) -> Result<Url, InfraError> {
        let spreadsheet_id = self.spreadsheet_id().await?;
        let mut url = self.sheets_base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                InfraError::InvalidConfig("sheets api base URL cannot be a base".to_string())
            })?;
            segments.pop_if_empty();
            segments.push("v4");
            segments.push("spreadsheets");
            segments.push(spreadsheet_id);
            segments.push("values");
            segments.push(range);
        }
        Ok(url)
    }
}

fn parse_base(raw: &str) -> Result<Url, InfraError> {
    let normalized = if raw.ends_with('/') {
        raw.to_string()
    } else {
        format!("{raw}/")
    };
    Url::parse(&normalized).map_err(|error| InfraError::InvalidConfig(format!("invalid api base url '{raw}': {error}")))
}

fn cell_text(value: serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text,
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[async_trait]
impl SpreadsheetStore for GoogleSheetsClient {
    async fn read_grid(&self, worksheet: &str) -> Result<CellGrid, InfraError> {
        let url = self.values_url(&quoted_sheet_name(worksheet)).await?;
        let token = self.tokens.bearer_token().await?;

        let response = self
            .client
            .get(url)
            .bearer_auth(&token)
            .query(&[("majorDimension", "ROWS")])
            .send()
            .await
            .map_err(|error| InfraError::network("network error while reading worksheet", error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::network("failed reading worksheet response", error))?;
        if !status.is_success() {
            return Err(Self::api_error(status, body));
        }

        let parsed: ValueRangeResponse = serde_json::from_str(&body)?;
        Ok(rectangular(
            parsed
                .values
                .into_iter()
                .map(|row| row.into_iter().map(cell_text).collect())
                .collect(),
        ))
    }

    async fn write_cell(
        &self,
        worksheet: &str,
        row: u32,
        column: u32,
        value: u32,
    ) -> Result<(), InfraError> {
        if row == 0 || column == 0 {
            return Err(InfraError::InvalidConfig(format!(
                "cell coordinates are 1-indexed, got row={row} column={column}"
            )));
        }

        let range = a1_cell(worksheet, row, column);
        let url = self.values_url(&range).await?;
        let token = self.tokens.bearer_token().await?;

        let response = self
            .client
            .put(url)
            .bearer_auth(&token)
            .query(&[("valueInputOption", "USER_ENTERED")])
            .json(&ValueRangeUpdate {
                range: &range,
                major_dimension: "ROWS",
                values: [[value]],
            })
            .send()
            .await
            .map_err(|error| InfraError::network("network error while writing cell", error))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .map_err(|error| InfraError::network("failed reading cell write response", error))?;
            return Err(Self::api_error(status, body));
        }
        Ok(())
    }
}
