use crate::domain::local_time::localize_interval;
use crate::domain::models::{DailyAggregate, WorkoutRecord};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::whoop_client::{RangeBound, WorkoutQuery, WorkoutSource};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

pub const DEFAULT_MAX_PAGES: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregationSummary {
    pub daily: DailyAggregate,
    pub pages_fetched: u32,
    pub page_ceiling_hit: bool,
    pub records_seen: usize,
    pub records_counted: usize,
    pub duplicates_discarded: usize,
    pub missing_ids_discarded: usize,
    pub negative_durations_discarded: usize,
    pub zero_duration_records: usize,
}

/// Pages through the activity source and sums running minutes per local day.
pub struct ActivityAggregator<W>
where
    W: WorkoutSource,
{
    source: Arc<W>,
    running_sport_ids: BTreeSet<i64>,
    max_pages: u32,
}

impl<W> ActivityAggregator<W>
where
    W: WorkoutSource,
{
    pub fn new(source: Arc<W>) -> Self {
        Self {
            source,
            running_sport_ids: BTreeSet::from([0]),
            max_pages: DEFAULT_MAX_PAGES,
        }
    }

    pub fn with_running_sport_ids(mut self, sport_ids: impl IntoIterator<Item = i64>) -> Self {
        self.running_sport_ids = sport_ids.into_iter().collect();
        self
    }

    pub fn with_max_pages(mut self, max_pages: u32) -> Self {
        self.max_pages = max_pages.max(1);
        self
    }

    pub async fn aggregate(
        &self,
        access_token: &str,
        start: RangeBound,
        end: RangeBound,
    ) -> Result<AggregationSummary, InfraError> {
        let mut summary = AggregationSummary::default();
        let mut seen_ids = HashSet::new();
        let mut next_token: Option<String> = None;

        loop {
            if summary.pages_fetched >= self.max_pages {
                summary.page_ceiling_hit = true;
                tracing::warn!(
                    max_pages = self.max_pages,
                    "page ceiling reached, using the records collected so far"
                );
                break;
            }

            let page = self
                .source
                .fetch_page(
                    access_token,
                    &WorkoutQuery {
                        start,
                        end,
                        next_token: next_token.take(),
                    },
                )
                .await?;
            summary.pages_fetched += 1;
            tracing::debug!(
                page = summary.pages_fetched,
                records = page.records.len(),
                has_next = page.next_token.is_some(),
                "fetched workout page"
            );

            for record in &page.records {
                self.accumulate(record, &mut seen_ids, &mut summary)?;
            }

            match page.next_token {
                Some(token) => next_token = Some(token),
                None => break,
            }
        }

        tracing::info!(
            pages = summary.pages_fetched,
            seen = summary.records_seen,
            counted = summary.records_counted,
            days = summary.daily.len(),
            total_minutes = summary.daily.total_minutes(),
            "aggregated running workouts"
        );
        Ok(summary)
    }

    fn accumulate(
        &self,
        record: &WorkoutRecord,
        seen_ids: &mut HashSet<String>,
        summary: &mut AggregationSummary,
    ) -> Result<(), InfraError> {
        summary.records_seen += 1;

        let is_running = record
            .sport_code()
            .is_some_and(|code| self.running_sport_ids.contains(&code));
        if !is_running {
            return Ok(());
        }

        let Some(id) = record.record_id() else {
            summary.missing_ids_discarded += 1;
            tracing::warn!(id = %record.id, start = %record.start, "discarding workout without an id");
            return Ok(());
        };
        if !seen_ids.insert(id.clone()) {
            summary.duplicates_discarded += 1;
            tracing::info!(%id, "discarding duplicate workout");
            return Ok(());
        }

        let interval = localize_interval(&record.start, &record.end, record.timezone_offset.as_deref())
            .map_err(|message| InfraError::Parse(format!("workout {id}: {message}")))?;
        let minutes = interval.duration_minutes();
        if minutes < 0 {
            summary.negative_durations_discarded += 1;
            tracing::warn!(%id, start = %record.start, end = %record.end, "discarding workout that ends before it starts");
            return Ok(());
        }
        if minutes == 0 {
            summary.zero_duration_records += 1;
            tracing::warn!(%id, start = %record.start, end = %record.end, "suspicious zero-duration workout");
        }

        let minutes = u32::try_from(minutes).unwrap_or(u32::MAX);
        summary.daily.add(interval.local_date, minutes);
        summary.records_counted += 1;
        tracing::debug!(%id, date = %interval.local_date, minutes, "counted workout");
        Ok(())
    }
}
