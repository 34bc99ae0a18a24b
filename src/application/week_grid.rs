use crate::domain::local_time::{monday_of_week, weekday_from_name};
use crate::infrastructure::error::InfraError;
use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::{BTreeMap, HashMap};

/// Week-start literals, tried in order. `01/02/24` reads as 1 February 2024.
const WEEK_START_FORMATS: [&str; 2] = ["%Y-%m-%d", "%d/%m/%y"];

pub fn parse_week_start(cell: &str) -> Option<NaiveDate> {
    let cell = cell.trim();
    if cell.is_empty() {
        return None;
    }
    WEEK_START_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(cell, format).ok())
}

/// Where a date lands in the sheet. `row` and `column` are 1-indexed and
/// `None` when the week row or the weekday header is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellLookup {
    pub week_start: NaiveDate,
    pub row: Option<u32>,
    pub column: Option<u32>,
}

impl CellLookup {
    pub fn cell(&self) -> Option<(u32, u32)> {
        Some((self.row?, self.column?))
    }
}

/// Snapshot of the worksheet layout. Rows are 1-indexed sheet rows (the
/// header is row 1); columns are 0-based offsets into the header row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeekGrid {
    week_start_to_row: BTreeMap<NaiveDate, u32>,
    weekday_to_column: HashMap<Weekday, u32>,
}

impl WeekGrid {
    pub fn resolve(grid: &[Vec<String>]) -> Result<Self, InfraError> {
        let Some((header, data_rows)) = grid.split_first() else {
            return Err(InfraError::SheetConfig("worksheet is empty".to_string()));
        };

        let mut weekday_to_column = HashMap::new();
        for (index, cell) in header.iter().enumerate() {
            if let Some(weekday) = weekday_from_name(cell) {
                let column = index_to_u32(index)?;
                if let Some(previous) = weekday_to_column.insert(weekday, column) {
                    tracing::warn!(weekday = %cell.trim(), previous, column, "weekday header repeated, using the later column");
                }
            }
        }
        if weekday_to_column.is_empty() {
            return Err(InfraError::SheetConfig(
                "header row has no weekday columns (expected Monday..Sunday)".to_string(),
            ));
        }

        let mut week_start_to_row = BTreeMap::new();
        for (offset, row) in data_rows.iter().enumerate() {
            let Some(week_start) = row.iter().find_map(|cell| parse_week_start(cell)) else {
                continue;
            };
            let sheet_row = index_to_u32(offset + 2)?;
            if week_start.weekday() != Weekday::Mon {
                tracing::warn!(row = sheet_row, %week_start, "week marker is not a Monday and will never match");
            }
            if let Some(previous) = week_start_to_row.insert(week_start, sheet_row) {
                tracing::warn!(%week_start, previous, row = sheet_row, "week listed twice, using the later row");
            }
        }

        tracing::debug!(
            weeks = week_start_to_row.len(),
            weekdays = weekday_to_column.len(),
            "resolved week grid"
        );
        Ok(Self {
            week_start_to_row,
            weekday_to_column,
        })
    }

    pub fn row_for_week(&self, week_start: NaiveDate) -> Option<u32> {
        self.week_start_to_row.get(&week_start).copied()
    }

    pub fn locate(&self, date: NaiveDate) -> CellLookup {
        let week_start = monday_of_week(date);
        CellLookup {
            week_start,
            row: self.row_for_week(week_start),
            column: self
                .weekday_to_column
                .get(&date.weekday())
                .map(|column| column + 1),
        }
    }
}

fn index_to_u32(index: usize) -> Result<u32, InfraError> {
    u32::try_from(index)
        .map_err(|_| InfraError::SheetConfig(format!("worksheet too large: index {index}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(year: i32, month: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
    }

    fn row(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|cell| cell.to_string()).collect()
    }

    fn weekly_header() -> Vec<String> {
        row(&[
            "", "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
        ])
    }

    #[test]
    fn header_and_date_cell_resolve() {
        let grid = vec![weekly_header(), row(&["2024-06-10", "", "", "", "", "", "", ""])];
        let resolved = WeekGrid::resolve(&grid).expect("grid");

        assert_eq!(resolved.row_for_week(date(2024, 6, 10)), Some(2));
        assert_eq!(resolved.locate(date(2024, 6, 10)).column, Some(2));
        assert_eq!(resolved.locate(date(2024, 6, 16)).column, Some(8));
        assert_eq!(resolved.locate(date(2024, 6, 12)).cell(), Some((2, 4)));
    }

    #[test]
    fn headers_match_case_insensitively_and_ignore_others() {
        let grid = vec![row(&["Week", "  monday ", "TUESDAY", "Total"])];
        let resolved = WeekGrid::resolve(&grid).expect("grid");

        assert_eq!(resolved.locate(date(2024, 6, 10)).column, Some(2));
        assert_eq!(resolved.locate(date(2024, 6, 11)).column, Some(3));
        assert_eq!(resolved.locate(date(2024, 6, 12)).column, None);
        assert!(resolved.week_start_to_row.is_empty());
    }

    #[test]
    fn first_date_in_row_is_the_week_marker() {
        let grid = vec![
            weekly_header(),
            row(&["notes", "17/06/24", "2024-06-10", "", "", "", "", ""]),
        ];
        let resolved = WeekGrid::resolve(&grid).expect("grid");

        assert_eq!(resolved.row_for_week(date(2024, 6, 17)), Some(2));
        assert_eq!(resolved.row_for_week(date(2024, 6, 10)), None);
    }

    #[test]
    fn iso_format_wins_over_day_month_year() {
        assert_eq!(parse_week_start("01/02/24"), Some(date(2024, 2, 1)));
        assert_eq!(parse_week_start(" 2024-06-10 "), Some(date(2024, 6, 10)));
        assert_eq!(parse_week_start("10/06/2024"), None);
        assert_eq!(parse_week_start("42"), None);
        assert_eq!(parse_week_start(""), None);
    }

    #[test]
    fn duplicate_week_rows_keep_the_later_row() {
        let grid = vec![
            weekly_header(),
            row(&["2024-06-10"]),
            row(&["2024-06-03"]),
            row(&["10/06/24"]),
        ];
        let resolved = WeekGrid::resolve(&grid).expect("grid");

        assert_eq!(resolved.row_for_week(date(2024, 6, 10)), Some(4));
        assert_eq!(resolved.row_for_week(date(2024, 6, 3)), Some(3));
    }

    #[test]
    fn rows_without_dates_are_skipped() {
        let grid = vec![weekly_header(), row(&["Totals", "120", ""]), row(&["2024-06-10"])];
        let resolved = WeekGrid::resolve(&grid).expect("grid");

        assert_eq!(resolved.week_start_to_row.len(), 1);
        assert_eq!(resolved.row_for_week(date(2024, 6, 10)), Some(3));
    }

    #[test]
    fn empty_sheet_is_misconfigured() {
        assert!(matches!(WeekGrid::resolve(&[]), Err(InfraError::SheetConfig(_))));
    }

    #[test]
    fn header_without_weekdays_is_misconfigured() {
        let grid = vec![row(&["Week", "Distance", "Notes"]), row(&["2024-06-10"])];
        assert!(matches!(WeekGrid::resolve(&grid), Err(InfraError::SheetConfig(_))));
    }

    #[test]
    fn missing_week_or_weekday_does_not_resolve() {
        let grid = vec![row(&["", "Monday"]), row(&["2024-06-10", ""])];
        let resolved = WeekGrid::resolve(&grid).expect("grid");

        assert_eq!(resolved.locate(date(2024, 6, 10)).cell(), Some((2, 2)));
        assert_eq!(
            resolved.locate(date(2024, 6, 11)),
            CellLookup {
                week_start: date(2024, 6, 10),
                row: Some(2),
                column: None,
            }
        );
        assert_eq!(
            resolved.locate(date(2024, 6, 17)),
            CellLookup {
                week_start: date(2024, 6, 17),
                row: None,
                column: Some(2),
            }
        );
    }
}
