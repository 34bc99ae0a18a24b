use chrono::{DateTime, FixedOffset, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

const RUNNING_SPORT_NAME: &str = "running";
const RUNNING_SPORT_ID: i64 = 0;

/// A workout as reported by the activity API. Both API generations decode
/// into this shape; `id` stays opaque because v1 uses integers and v2 UUIDs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkoutRecord {
    #[serde(default)]
    pub id: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sport_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sport_name: Option<String>,
    pub start: String,
    pub end: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone_offset: Option<String>,
}

impl WorkoutRecord {
    /// Identity used for de-duplication. Falsy ids (`null`, `""`, `0`,
    /// booleans, containers) yield `None`.
    pub fn record_id(&self) -> Option<String> {
        match &self.id {
            serde_json::Value::String(value) => {
                let value = value.trim();
                (!value.is_empty()).then(|| value.to_string())
            }
            serde_json::Value::Number(number) => {
                let is_zero = number.as_f64().is_some_and(|value| value == 0.0);
                (!is_zero).then(|| number.to_string())
            }
            _ => None,
        }
    }

    /// Newer payloads may omit the numeric sport id and only name the sport.
    pub fn sport_code(&self) -> Option<i64> {
        self.sport_id.or_else(|| {
            self.sport_name
                .as_deref()
                .map(str::trim)
                .filter(|name| name.eq_ignore_ascii_case(RUNNING_SPORT_NAME))
                .map(|_| RUNNING_SPORT_ID)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LocalizedInterval {
    pub local_start: DateTime<FixedOffset>,
    pub local_end: DateTime<FixedOffset>,
    pub local_date: NaiveDate,
}

impl LocalizedInterval {
    /// Whole minutes between start and end, truncated toward zero.
    pub fn duration_minutes(&self) -> i64 {
        (self.local_end - self.local_start).num_minutes()
    }
}

/// Running minutes per local calendar day.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DailyAggregate {
    days: BTreeMap<NaiveDate, u32>,
}

impl DailyAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds minutes to the bucket for `date`, creating it at zero first.
    pub fn add(&mut self, date: NaiveDate, minutes: u32) {
        let bucket = self.days.entry(date).or_insert(0);
        *bucket = bucket.saturating_add(minutes);
    }

    pub fn minutes_on(&self, date: NaiveDate) -> Option<u32> {
        self.days.get(&date).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (NaiveDate, u32)> + '_ {
        self.days.iter().map(|(date, minutes)| (*date, *minutes))
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn total_minutes(&self) -> u64 {
        self.days.values().map(|minutes| u64::from(*minutes)).sum()
    }
}

impl FromIterator<(NaiveDate, u32)> for DailyAggregate {
    fn from_iter<I: IntoIterator<Item = (NaiveDate, u32)>>(iter: I) -> Self {
        let mut aggregate = Self::new();
        for (date, minutes) in iter {
            aggregate.add(date, minutes);
        }
        aggregate
    }
}

/// One resolved spreadsheet write. `row` and `column` are 1-indexed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    pub date: NaiveDate,
    pub weekday: Weekday,
    pub week_start: NaiveDate,
    pub row: u32,
    pub column: u32,
    pub minutes: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OAuthToken {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(
        default,
        serialize_with = "serialize_epoch_seconds",
        deserialize_with = "deserialize_epoch_seconds",
        skip_serializing_if = "Option::is_none"
    )]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(
        default,
        deserialize_with = "deserialize_scope",
        skip_serializing_if = "Option::is_none"
    )]
    pub scope: Option<String>,
}

impl OAuthToken {
    /// Tokens without `expires_at` never expire locally; the API decides.
    pub fn is_expired_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.access_token.trim().is_empty()
            || self
                .expires_at
                .is_some_and(|expires_at| expires_at <= now + chrono::Duration::seconds(leeway_seconds))
    }
}

/// Longest `expires_in` honoured from a token endpoint.
pub const MAX_EXPIRES_IN_SECONDS: i64 = u32::MAX as i64;

/// Absolute expiry for a relative `expires_in`, clamped to
/// `0..=MAX_EXPIRES_IN_SECONDS`.
pub fn expiry_after(now: DateTime<Utc>, expires_in_seconds: i64) -> DateTime<Utc> {
    let seconds = expires_in_seconds.clamp(0, MAX_EXPIRES_IN_SECONDS);
    now.checked_add_signed(chrono::Duration::seconds(seconds))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn default_token_type() -> String {
    "bearer".to_string()
}

fn serialize_epoch_seconds<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(value) => serializer.serialize_i64(value.timestamp()),
        None => serializer.serialize_none(),
    }
}

// Token files written by other OAuth libraries store `expires_at` as a float.
fn deserialize_epoch_seconds<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<f64>::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(seconds) if seconds.is_finite() => DateTime::from_timestamp(seconds.trunc() as i64, 0)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("expires_at out of range: {seconds}"))),
        Some(seconds) => Err(serde::de::Error::custom(format!(
            "expires_at is not a finite number: {seconds}"
        ))),
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ScopeRepr {
    Joined(String),
    List(Vec<String>),
}

fn deserialize_scope<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<ScopeRepr>::deserialize(deserializer)?.map(|scope| match scope {
        ScopeRepr::Joined(value) => value,
        ScopeRepr::List(values) => values.join(" "),
    }))
}
