use crate::application::activity_aggregator::{ActivityAggregator, AggregationSummary};
use crate::application::oauth::AccessTokenProvider;
use crate::application::retry::RetryPolicy;
use crate::application::sheet_update::{SheetUpdater, UnresolvedDay, plan_updates};
use crate::application::week_grid::WeekGrid;
use crate::infrastructure::config::ApiGeneration;
use crate::infrastructure::error::InfraError;
use crate::infrastructure::sheets_client::SpreadsheetStore;
use crate::infrastructure::whoop_client::{RangeBound, WorkoutSource};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Offset, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncWindow {
    pub start: RangeBound,
    pub end: RangeBound,
}

impl SyncWindow {
    /// The last `days_ago` days up to now, with "today" taken in `time_zone`.
    pub fn lookback(now: DateTime<Utc>, time_zone: Tz, days_ago: u32, generation: ApiGeneration) -> Self {
        let today = now.with_timezone(&time_zone).date_naive();
        let start_date = today - Duration::days(i64::from(days_ago));

        match generation {
            ApiGeneration::V1 => Self {
                start: RangeBound::Date(start_date),
                end: RangeBound::Date(today),
            },
            ApiGeneration::V2 => Self {
                start: RangeBound::Instant(local_midnight_utc(start_date, time_zone)),
                end: RangeBound::Instant(now),
            },
        }
    }
}

fn local_midnight_utc(date: NaiveDate, time_zone: Tz) -> DateTime<Utc> {
    let midnight = date.and_time(NaiveTime::MIN);
    match time_zone.from_local_datetime(&midnight).earliest() {
        Some(local) => local.with_timezone(&Utc),
        // Midnight skipped by a DST jump: shift by the offset in force at that instant.
        None => {
            let offset = time_zone.offset_from_utc_datetime(&midnight).fix();
            Utc.from_utc_datetime(&midnight) - Duration::seconds(i64::from(offset.local_minus_utc()))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// No qualifying workouts in the window; the sheet was not touched.
    NothingToSync,
    /// The worksheet could not be laid out as a week grid; nothing written.
    SheetMisconfigured(String),
    Applied,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub window: SyncWindow,
    pub outcome: SyncOutcome,
    pub aggregation: AggregationSummary,
    pub cells_written: usize,
    pub skipped_zero: Vec<NaiveDate>,
    pub unresolved: Vec<UnresolvedDay>,
}

impl SyncReport {
    fn new(window: SyncWindow, aggregation: AggregationSummary, outcome: SyncOutcome) -> Self {
        Self {
            window,
            outcome,
            aggregation,
            cells_written: 0,
            skipped_zero: Vec::new(),
            unresolved: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        !matches!(self.outcome, SyncOutcome::SheetMisconfigured(_))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("sync failed after writing {applied} cell(s): {source}")]
pub struct SyncError {
    pub applied: usize,
    #[source]
    pub source: InfraError,
}

impl From<InfraError> for SyncError {
    fn from(source: InfraError) -> Self {
        Self { applied: 0, source }
    }
}

/// Fetch and aggregate, resolve the grid, apply updates. Strictly sequential.
pub struct RunningSheetSync<T, W, S>
where
    T: AccessTokenProvider,
    W: WorkoutSource,
    S: SpreadsheetStore,
{
    tokens: Arc<T>,
    aggregator: ActivityAggregator<W>,
    store: Arc<S>,
    updater: SheetUpdater<S>,
    worksheet: String,
}

impl<T, W, S> RunningSheetSync<T, W, S>
where
    T: AccessTokenProvider,
    W: WorkoutSource,
    S: SpreadsheetStore,
{
    pub fn new(
        tokens: Arc<T>,
        aggregator: ActivityAggregator<W>,
        store: Arc<S>,
        worksheet: impl Into<String>,
    ) -> Self {
        let worksheet = worksheet.into();
        Self {
            tokens,
            aggregator,
            updater: SheetUpdater::new(Arc::clone(&store), worksheet.clone()),
            store,
            worksheet,
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.updater = self.updater.with_retry_policy(retry_policy);
        self
    }

    pub async fn run(&self, window: SyncWindow) -> Result<SyncReport, SyncError> {
        tracing::info!(start = %window.start, end = %window.end, worksheet = %self.worksheet, "starting sync");

        let access_token = self.tokens.access_token().await?;
        let aggregation = self
            .aggregator
            .aggregate(&access_token, window.start, window.end)
            .await?;

        if aggregation.daily.is_empty() {
            tracing::info!("no running workouts in range, nothing to sync");
            return Ok(SyncReport::new(window, aggregation, SyncOutcome::NothingToSync));
        }

        let grid = match self.load_grid().await {
            Ok(grid) => grid,
            Err(InfraError::SheetConfig(reason)) => {
                tracing::error!(%reason, worksheet = %self.worksheet, "sheet is misconfigured, no updates performed");
                return Ok(SyncReport::new(
                    window,
                    aggregation,
                    SyncOutcome::SheetMisconfigured(reason),
                ));
            }
            Err(error) => return Err(error.into()),
        };

        let plan = plan_updates(&aggregation.daily, &grid);
        let cells_written = self
            .updater
            .apply(&plan)
            .await
            .map_err(|error| SyncError {
                applied: error.applied,
                source: error.source,
            })?;

        tracing::info!(
            cells_written,
            skipped_zero = plan.skipped_zero.len(),
            unresolved = plan.unresolved.len(),
            "sync complete"
        );
        Ok(SyncReport {
            window,
            outcome: SyncOutcome::Applied,
            aggregation,
            cells_written,
            skipped_zero: plan.skipped_zero,
            unresolved: plan.unresolved,
        })
    }

    async fn load_grid(&self) -> Result<WeekGrid, InfraError> {
        let cells = self.store.read_grid(&self.worksheet).await?;
        WeekGrid::resolve(&cells)
    }
}
