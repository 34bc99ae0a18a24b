use crate::domain::models::LocalizedInterval;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, Utc, Weekday};

pub const UTC_OFFSET: &str = "+00:00";

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

/// Parses a `±HH:MM` offset. The sign must be the first character.
pub fn parse_utc_offset(raw: &str) -> Result<FixedOffset, String> {
    let malformed = || format!("invalid utc offset '{raw}': expected ±HH:MM");

    let (sign, rest) = if let Some(rest) = raw.strip_prefix('+') {
        (1, rest)
    } else if let Some(rest) = raw.strip_prefix('-') {
        (-1, rest)
    } else {
        return Err(malformed());
    };

    let (hours, minutes) = rest.split_once(':').ok_or_else(malformed)?;
    let hours = parse_offset_field(hours).ok_or_else(malformed)?;
    let minutes = parse_offset_field(minutes).ok_or_else(malformed)?;
    if hours > 23 || minutes > 59 {
        return Err(malformed());
    }

    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(malformed)
}

fn parse_offset_field(value: &str) -> Option<i32> {
    if value.is_empty() || value.len() > 2 || !value.bytes().all(|byte| byte.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Parses an RFC 3339 instant. Timestamps without a zone are taken as UTC.
pub fn parse_utc_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    let raw = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Ok(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|error| format!("invalid timestamp '{raw}': {error}"))
}

/// Applies the record's own offset to a UTC instant; a missing offset means UTC.
pub fn localize(utc_instant: &str, offset: Option<&str>) -> Result<DateTime<FixedOffset>, String> {
    let offset = parse_utc_offset(offset.unwrap_or(UTC_OFFSET))?;
    Ok(parse_utc_instant(utc_instant)?.with_timezone(&offset))
}

pub fn localize_interval(
    start: &str,
    end: &str,
    offset: Option<&str>,
) -> Result<LocalizedInterval, String> {
    let local_start = localize(start, offset)?;
    let local_end = localize(end, offset)?;
    Ok(LocalizedInterval {
        local_start,
        local_end,
        local_date: local_start.date_naive(),
    })
}

pub fn monday_of_week(date: NaiveDate) -> NaiveDate {
    date - Duration::days(i64::from(date.weekday().num_days_from_monday()))
}

pub fn weekday_name(weekday: Weekday) -> &'static str {
    match weekday {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

/// Case-insensitive match against full weekday names, ignoring surrounding whitespace.
pub fn weekday_from_name(value: &str) -> Option<Weekday> {
    let value = value.trim();
    WEEKDAYS
        .into_iter()
        .find(|weekday| weekday_name(*weekday).eq_ignore_ascii_case(value))
}
