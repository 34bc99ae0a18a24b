use crate::application::retry::{RetryPolicy, with_retry};
use crate::application::week_grid::WeekGrid;
use crate::domain::local_time::weekday_name;
use crate::domain::models::{CellWrite, DailyAggregate};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::sheets_client::SpreadsheetStore;
use chrono::{Datelike, NaiveDate};
use std::sync::Arc;

/// A day whose week row or weekday column is missing from the sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDay {
    pub date: NaiveDate,
    pub week_start: NaiveDate,
    pub minutes: u32,
    pub missing_week: bool,
    pub missing_weekday: bool,
}

impl UnresolvedDay {
    pub fn to_error(&self) -> InfraError {
        InfraError::CellResolution {
            date: self.date,
            day_name: weekday_name(self.date.weekday()),
            week_start: self.week_start,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatePlan {
    pub writes: Vec<CellWrite>,
    pub skipped_zero: Vec<NaiveDate>,
    pub unresolved: Vec<UnresolvedDay>,
}

pub fn plan_updates(aggregate: &DailyAggregate, grid: &WeekGrid) -> UpdatePlan {
    let mut plan = UpdatePlan::default();

    for (date, minutes) in aggregate.iter() {
        let lookup = grid.locate(date);
        let Some((row, column)) = lookup.cell() else {
            let unresolved = UnresolvedDay {
                date,
                week_start: lookup.week_start,
                minutes,
                missing_week: lookup.row.is_none(),
                missing_weekday: lookup.column.is_none(),
            };
            tracing::error!(error = %unresolved.to_error(), minutes, "skipping day without a matching cell");
            plan.unresolved.push(unresolved);
            continue;
        };

        if minutes == 0 {
            tracing::info!(%date, "zero minutes, leaving cell untouched");
            plan.skipped_zero.push(date);
            continue;
        }

        plan.writes.push(CellWrite {
            date,
            weekday: date.weekday(),
            week_start: lookup.week_start,
            row,
            column,
            minutes,
        });
    }

    plan
}

/// Fatal write failure together with the number of cells already written.
#[derive(Debug, thiserror::Error)]
#[error("{source} ({applied} cell(s) written before the failure)")]
pub struct ApplyError {
    pub applied: usize,
    #[source]
    pub source: InfraError,
}

pub struct SheetUpdater<S>
where
    S: SpreadsheetStore,
{
    store: Arc<S>,
    worksheet: String,
    retry_policy: RetryPolicy,
}

impl<S> SheetUpdater<S>
where
    S: SpreadsheetStore,
{
    pub fn new(store: Arc<S>, worksheet: impl Into<String>) -> Self {
        Self {
            store,
            worksheet: worksheet.into(),
            retry_policy: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    /// Writes the plan cell by cell. Stops at the first write that still
    /// fails after retrying.
    pub async fn apply(&self, plan: &UpdatePlan) -> Result<usize, ApplyError> {
        let mut applied = 0;

        for write in &plan.writes {
            let result = with_retry(&self.retry_policy, InfraError::is_transient, |_| {
                self.store
                    .write_cell(&self.worksheet, write.row, write.column, write.minutes)
            })
            .await;

            if let Err(exhausted) = result {
                tracing::error!(
                    date = %write.date,
                    row = write.row,
                    column = write.column,
                    attempts = exhausted.attempts,
                    error = %exhausted.error,
                    "cell write failed, aborting remaining updates"
                );
                return Err(ApplyError {
                    applied,
                    source: InfraError::Write {
                        attempts: exhausted.attempts,
                        message: exhausted.error.to_string(),
                    },
                });
            }

            applied += 1;
            tracing::info!(
                date = %write.date,
                weekday = weekday_name(write.weekday),
                row = write.row,
                column = write.column,
                minutes = write.minutes,
                "updated cell"
            );
        }

        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::sheets_client::CellGrid;
    use async_trait::async_trait;
    use chrono::Weekday;
    use proptest::prelude::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct FakeSpreadsheet {
        write_failures: Mutex<VecDeque<InfraError>>,
        rate_limited_cell: Option<(u32, u32)>,
        writes: Mutex<Vec<(u32, u32, u32)>>,
        write_calls: AtomicUsize,
    }

    impl FakeSpreadsheet {
        fn failing_with(errors: Vec<InfraError>) -> Self {
            Self {
                write_failures: Mutex::new(errors.into()),
                ..Self::default()
            }
        }

        fn written(&self) -> Vec<(u32, u32, u32)> {
            self.writes.lock().expect("writes mutex poisoned").clone()
        }
    }

    #[async_trait]
    impl SpreadsheetStore for FakeSpreadsheet {
        async fn read_grid(&self, _worksheet: &str) -> Result<CellGrid, InfraError> {
            Ok(Vec::new())
        }

        async fn write_cell(
            &self,
            _worksheet: &str,
            row: u32,
            column: u32,
            value: u32,
        ) -> Result<(), InfraError> {
            self.write_calls.fetch_add(1, Ordering::SeqCst);
            if self.rate_limited_cell == Some((row, column)) {
                return Err(transient());
            }
            if let Some(error) = self
                .write_failures
                .lock()
                .expect("failures mutex poisoned")
                .pop_front()
            {
                return Err(error);
            }
            self.writes
                .lock()
                .expect("writes mutex poisoned")
                .push((row, column, value));
            Ok(())
        }
    }

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    /// Row 5 holds the week of 2024-06-10; Monday sits in sheet column 2.
    fn june_grid() -> WeekGrid {
        let mut grid = vec![cells(&[
            "Week", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
        ])];
        grid.push(cells(&["2024-05-20"]));
        grid.push(cells(&["2024-05-27"]));
        grid.push(cells(&["2024-06-03"]));
        grid.push(cells(&["2024-06-10"]));
        WeekGrid::resolve(&grid).expect("grid")
    }

    fn transient() -> InfraError {
        InfraError::SheetsApi {
            status: 429,
            body: "quota exceeded".to_string(),
        }
    }

    fn updater(store: &Arc<FakeSpreadsheet>, max_attempts: u32) -> SheetUpdater<FakeSpreadsheet> {
        SheetUpdater::new(Arc::clone(store), "Running").with_retry_policy(RetryPolicy {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 1,
            jitter_ms: 0,
        })
    }

    #[tokio::test]
    async fn positive_days_are_written_and_zero_days_skipped() {
        let aggregate: DailyAggregate = [(date(2024, 6, 10), 30), (date(2024, 6, 11), 0)]
            .into_iter()
            .collect();
        let plan = plan_updates(&aggregate, &june_grid());

        assert_eq!(
            plan.writes,
            vec![CellWrite {
                date: date(2024, 6, 10),
                weekday: Weekday::Mon,
                week_start: date(2024, 6, 10),
                row: 5,
                column: 2,
                minutes: 30,
            }]
        );
        assert_eq!(plan.skipped_zero, vec![date(2024, 6, 11)]);

        let store = Arc::new(FakeSpreadsheet::default());
        let applied = updater(&store, 3).apply(&plan).await.expect("apply");

        assert_eq!(applied, 1);
        assert_eq!(store.written(), vec![(5, 2, 30)]);
    }

    #[test]
    fn days_outside_the_grid_are_unresolved() {
        let aggregate: DailyAggregate = [(date(2024, 6, 19), 25), (date(2024, 6, 12), 45)]
            .into_iter()
            .collect();
        let plan = plan_updates(&aggregate, &june_grid());

        assert_eq!(plan.writes.len(), 1);
        assert_eq!(plan.writes[0].row, 5);
        assert_eq!(plan.writes[0].column, 4);
        assert_eq!(plan.unresolved.len(), 1);
        let unresolved = &plan.unresolved[0];
        assert_eq!(unresolved.week_start, date(2024, 6, 17));
        assert!(unresolved.missing_week);
        assert!(!unresolved.missing_weekday);
        assert_eq!(
            unresolved.to_error().to_string(),
            "Could not find cell for 2024-06-19 (Wednesday) in week starting 2024-06-17"
        );
    }

    #[test]
    fn missing_weekday_column_is_unresolved() {
        let grid = WeekGrid::resolve(&[cells(&["", "Monday"]), cells(&["2024-06-10"])]).expect("grid");
        let aggregate: DailyAggregate = [(date(2024, 6, 15), 60)].into_iter().collect();
        let plan = plan_updates(&aggregate, &grid);

        assert!(plan.writes.is_empty());
        assert!(plan.unresolved[0].missing_weekday);
        assert!(!plan.unresolved[0].missing_week);
    }

    #[tokio::test]
    async fn transient_write_failures_are_retried() {
        let aggregate: DailyAggregate = [(date(2024, 6, 10), 30), (date(2024, 6, 12), 20)]
            .into_iter()
            .collect();
        let plan = plan_updates(&aggregate, &june_grid());
        let store = Arc::new(FakeSpreadsheet::failing_with(vec![
            transient(),
            InfraError::Network("connection reset".to_string()),
        ]));

        let applied = updater(&store, 3).apply(&plan).await.expect("apply");

        assert_eq!(applied, 2);
        assert_eq!(store.write_calls.load(Ordering::SeqCst), 4);
        assert_eq!(store.written(), vec![(5, 2, 30), (5, 4, 20)]);
    }

    #[tokio::test]
    async fn exhausted_retries_abort_with_partial_count() {
        let aggregate: DailyAggregate = [
            (date(2024, 6, 3), 15),
            (date(2024, 6, 10), 30),
            (date(2024, 6, 12), 20),
        ]
        .into_iter()
        .collect();
        let plan = plan_updates(&aggregate, &june_grid());
        let store = Arc::new(FakeSpreadsheet {
            rate_limited_cell: Some((5, 2)),
            ..FakeSpreadsheet::default()
        });

        let error = updater(&store, 2).apply(&plan).await.expect_err("write keeps failing");

        assert_eq!(error.applied, 1);
        assert!(matches!(error.source, InfraError::Write { attempts: 2, .. }));
        assert_eq!(store.written(), vec![(4, 2, 15)]);
        assert_eq!(store.write_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_write_failure_is_not_retried() {
        let aggregate: DailyAggregate = [(date(2024, 6, 10), 30), (date(2024, 6, 12), 20)]
            .into_iter()
            .collect();
        let plan = plan_updates(&aggregate, &june_grid());
        let store = Arc::new(FakeSpreadsheet::failing_with(vec![InfraError::SheetsApi {
            status: 403,
            body: "caller does not have permission".to_string(),
        }]));

        let error = updater(&store, 5).apply(&plan).await.expect_err("forbidden");

        assert_eq!(error.applied, 0);
        assert!(matches!(error.source, InfraError::Write { attempts: 1, .. }));
        assert_eq!(store.write_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_aggregate_plans_nothing() {
        let plan = plan_updates(&DailyAggregate::new(), &june_grid());
        assert_eq!(plan, UpdatePlan::default());
    }

    proptest! {
        #[test]
        fn every_day_of_a_listed_week_is_planned_into_its_row_and_weekday_column(
            weeks in prop::collection::btree_set(0i64..520, 1..20),
            pick in 0usize..20,
            day in 0i64..7,
            minutes in 1u32..600
        ) {
            let base = date(2020, 1, 6);
            let mondays: Vec<NaiveDate> = weeks
                .iter()
                .map(|week| base + chrono::Duration::weeks(*week))
                .collect();
            let mut rows = vec![cells(&[
                "", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
            ])];
            rows.extend(mondays.iter().map(|monday| vec![monday.format("%Y-%m-%d").to_string()]));
            let grid = WeekGrid::resolve(&rows).expect("grid");

            let index = pick % mondays.len();
            let target = mondays[index] + chrono::Duration::days(day);
            let aggregate: DailyAggregate = [(target, minutes)].into_iter().collect();
            let plan = plan_updates(&aggregate, &grid);

            prop_assert!(plan.unresolved.is_empty());
            prop_assert_eq!(plan.writes.len(), 1);
            let write = &plan.writes[0];
            prop_assert_eq!(write.week_start, mondays[index]);
            prop_assert_eq!(write.row, u32::try_from(index + 2).expect("row"));
            prop_assert_eq!(write.column, u32::try_from(day + 2).expect("column"));
            prop_assert_eq!(write.minutes, minutes);
        }

        #[test]
        fn days_of_unlisted_weeks_are_never_written(
            listed in 0i64..520,
            offset in 1i64..52,
            day in 0i64..7
        ) {
            let monday = date(2020, 1, 6) + chrono::Duration::weeks(listed);
            let rows = vec![
                cells(&["", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday"]),
                vec![monday.format("%d/%m/%y").to_string()],
            ];
            let grid = WeekGrid::resolve(&rows).expect("grid");
            let target = monday + chrono::Duration::weeks(offset) + chrono::Duration::days(day);
            let aggregate: DailyAggregate = [(target, 30)].into_iter().collect();
            let plan = plan_updates(&aggregate, &grid);

            prop_assert!(plan.writes.is_empty());
            prop_assert_eq!(plan.unresolved.len(), 1);
            prop_assert!(plan.unresolved[0].missing_week);
            prop_assert!(!plan.unresolved[0].missing_weekday);
        }
    }
}
