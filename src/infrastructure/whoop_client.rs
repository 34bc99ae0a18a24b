use crate::domain::models::WorkoutRecord;
use crate::infrastructure::config::ApiGeneration;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::Client;
use std::time::Duration;
use url::Url;

pub const WHOOP_API_BASE: &str = "https://api.prod.whoop.com/";
const V1_WORKOUTS_PATH: &str = "activities/v1/workouts";
const V2_WORKOUTS_PATH: &str = "developer/v2/activity/workout";

/// A range bound as the API generation expects it: a plain calendar date
/// (legacy endpoint) or a full UTC instant (current endpoint).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeBound {
    Date(NaiveDate),
    Instant(DateTime<Utc>),
}

impl RangeBound {
    pub fn to_query_value(&self) -> String {
        match self {
            Self::Date(date) => date.format("%Y-%m-%d").to_string(),
            Self::Instant(instant) => instant.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

impl std::fmt::Display for RangeBound {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_query_value())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkoutQuery {
    pub start: RangeBound,
    pub end: RangeBound,
    pub next_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkoutPage {
    pub records: Vec<WorkoutRecord>,
    pub next_token: Option<String>,
}

#[async_trait]
pub trait WorkoutSource: Send + Sync {
    async fn fetch_page(
        &self,
        access_token: &str,
        query: &WorkoutQuery,
    ) -> Result<WorkoutPage, InfraError>;
}

#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
enum WorkoutPayload {
    Bare(Vec<WorkoutRecord>),
    Paged {
        records: Vec<WorkoutRecord>,
        #[serde(default, alias = "nextToken")]
        next_token: Option<String>,
    },
}

/// Decodes either generation's body: a bare array (v1), a `records` envelope
/// (v2), or `null`. An object without `records` is a `Parse` error.
pub fn decode_workout_page(body: &str) -> Result<WorkoutPage, InfraError> {
    let payload = serde_json::from_str::<Option<WorkoutPayload>>(body)
        .map_err(|error| InfraError::Parse(format!("invalid workout payload: {error}; body={body}")))?;

    Ok(match payload {
        None => WorkoutPage::default(),
        Some(WorkoutPayload::Bare(records)) => WorkoutPage {
            records,
            next_token: None,
        },
        Some(WorkoutPayload::Paged { records, next_token }) => WorkoutPage {
            records,
            next_token: next_token.filter(|token| !token.trim().is_empty()),
        },
    })
}

#[derive(Debug, Clone)]
pub struct ReqwestWhoopClient {
    client: Client,
    base_url: Url,
    generation: ApiGeneration,
    page_limit: u32,
}

impl ReqwestWhoopClient {
    pub fn new(generation: ApiGeneration, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|error| InfraError::InvalidConfig(format!("failed to build http client: {error}")))?;
        Ok(Self {
            client,
            base_url: Url::parse(WHOOP_API_BASE)
                .map_err(|error| InfraError::InvalidConfig(format!("invalid WHOOP base url: {error}")))?,
            generation,
            page_limit: 25,
        })
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, InfraError> {
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        self.base_url = Url::parse(&normalized)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid WHOOP base url: {error}")))?;
        Ok(self)
    }

    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    fn workouts_url(&self, query: &WorkoutQuery) -> Result<Url, InfraError> {
        let path = match self.generation {
            ApiGeneration::V1 => V1_WORKOUTS_PATH,
            ApiGeneration::V2 => V2_WORKOUTS_PATH,
        };
        let mut url = self
            .base_url
            .join(path)
            .map_err(|error| InfraError::InvalidConfig(format!("invalid workouts url: {error}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("start", &query.start.to_query_value())
                .append_pair("end", &query.end.to_query_value());
            if self.generation == ApiGeneration::V2 {
                pairs.append_pair("limit", &self.page_limit.to_string());
                if let Some(next_token) = query.next_token.as_deref() {
                    pairs.append_pair("nextToken", next_token);
                }
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl WorkoutSource for ReqwestWhoopClient {
    async fn fetch_page(
        &self,
        access_token: &str,
        query: &WorkoutQuery,
    ) -> Result<WorkoutPage, InfraError> {
        if access_token.trim().is_empty() {
            return Err(InfraError::OAuth("access token must not be empty".to_string()));
        }

        let url = self.workouts_url(query)?;
        let response = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|error| InfraError::network("network error while fetching workouts", error))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|error| InfraError::network("failed reading workouts response", error))?;

        if !status.is_success() {
            return Err(InfraError::Fetch {
                status: status.as_u16(),
                body,
            });
        }

        decode_workout_page(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_legacy_bare_array() {
        let page = decode_workout_page(
            r#"[{"id": 1043, "sport_id": 0, "start": "2024-06-10T07:00:00.000Z",
                 "end": "2024-06-10T07:41:12.000Z", "timezone_offset": "-04:00"}]"#,
        )
        .expect("decode");

        assert_eq!(page.records.len(), 1);
        assert_eq!(page.records[0].record_id(), Some("1043".to_string()));
        assert_eq!(page.next_token, None);
    }

    #[test]
    fn decodes_paged_envelope_and_drops_blank_token() {
        let page = decode_workout_page(
            r#"{"records": [{"id": "a-1", "sport_name": "running", "start": "2024-06-10T07:00:00Z",
                 "end": "2024-06-10T07:30:00Z"}], "next_token": ""}"#,
        )
        .expect("decode");
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next_token, None);

        let page = decode_workout_page(r#"{"records": [], "next_token": "MTIzOjEyMzEyMw"}"#)
            .expect("decode");
        assert_eq!(page.next_token.as_deref(), Some("MTIzOjEyMzEyMw"));
    }

    #[test]
    fn null_body_is_an_empty_page() {
        assert_eq!(decode_workout_page("null").expect("decode"), WorkoutPage::default());
    }

    #[test]
    fn garbage_body_is_a_parse_error() {
        assert!(matches!(
            decode_workout_page("<html>oops</html>"),
            Err(InfraError::Parse(_))
        ));
    }

    #[test]
    fn object_without_records_is_a_parse_error() {
        assert!(matches!(
            decode_workout_page(r#"{"error": "rate limited"}"#),
            Err(InfraError::Parse(_))
        ));
        assert!(matches!(
            decode_workout_page(r#"{"next_token": "MTIzOjEyMzEyMw"}"#),
            Err(InfraError::Parse(_))
        ));
    }

    #[test]
    fn range_bounds_format_per_generation() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).expect("date");
        assert_eq!(RangeBound::Date(date).to_query_value(), "2024-06-03");

        let instant = DateTime::parse_from_rfc3339("2024-06-03T22:00:00+02:00")
            .expect("instant")
            .with_timezone(&Utc);
        assert_eq!(
            RangeBound::Instant(instant).to_query_value(),
            "2024-06-03T20:00:00.000Z"
        );
    }

    #[test]
    fn v2_url_carries_limit_and_token() {
        let client = ReqwestWhoopClient::new(ApiGeneration::V2, Duration::from_secs(5))
            .expect("client")
            .with_page_limit(10);
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).expect("date");
        let url = client
            .workouts_url(&WorkoutQuery {
                start: RangeBound::Date(date),
                end: RangeBound::Date(date),
                next_token: Some("abc".to_string()),
            })
            .expect("url");

        assert_eq!(url.path(), "/developer/v2/activity/workout");
        assert_eq!(
            url.query(),
            Some("start=2024-06-03&end=2024-06-03&limit=10&nextToken=abc")
        );
    }

    #[test]
    fn v1_url_ignores_pagination_parameters() {
        let client = ReqwestWhoopClient::new(ApiGeneration::V1, Duration::from_secs(5)).expect("client");
        let date = NaiveDate::from_ymd_opt(2024, 6, 3).expect("date");
        let url = client
            .workouts_url(&WorkoutQuery {
                start: RangeBound::Date(date),
                end: RangeBound::Date(date),
                next_token: Some("ignored".to_string()),
            })
            .expect("url");

        assert_eq!(url.path(), "/activities/v1/workouts");
        assert_eq!(url.query(), Some("start=2024-06-03&end=2024-06-03"));
    }
}
