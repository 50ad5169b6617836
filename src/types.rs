use crate::config::DefaultRange;
use crate::error::QueryError;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Absolute search window in UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Self, QueryError> {
        if from > to {
            return Err(QueryError::InvalidRange);
        }
        Ok(Self { from, to })
    }

    /// The last `frame` of this range, ending at `to`.
    pub fn trailing(&self, frame: Duration) -> Result<Self, QueryError> {
        let from = self
            .to
            .checked_sub_signed(frame)
            .ok_or(QueryError::InvalidRange)?;
        Ok(Self { from, to: self.to })
    }

    /// Graylog's absolute timerange format.
    pub fn from_iso(&self) -> String {
        self.from.format("%Y-%m-%dT%H:%M:%S.000Z").to_string()
    }

    pub fn to_iso(&self) -> String {
        self.to.format("%Y-%m-%dT%H:%M:%S.000Z").to_string()
    }
}

/// User-supplied range bounds; any part left out falls back to the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RangeInput {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
}

impl RangeInput {
    pub fn resolve(&self, defaults: &DefaultRange, tz: &FixedOffset) -> Result<TimeRange, QueryError> {
        let pick = |given: &Option<String>, fallback: &str| -> String {
            given
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .unwrap_or(fallback)
                .trim()
                .to_string()
        };

        let from = parse_date_time(
            &pick(&self.start_date, &defaults.start_date),
            &pick(&self.start_time, &defaults.start_time),
            tz,
        )
        .ok_or(QueryError::InvalidDateTime("start"))?;
        let to = parse_date_time(
            &pick(&self.end_date, &defaults.end_date),
            &pick(&self.end_time, &defaults.end_time),
            tz,
        )
        .ok_or(QueryError::InvalidDateTime("end"))?;

        TimeRange::new(from, to)
    }
}

/// `YYYY-MM-DD` plus `HH:MM` or `HH:MM:SS`, read in `tz`.
pub fn parse_date_time(date: &str, time: &str, tz: &FixedOffset) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    let time = NaiveTime::parse_from_str(time, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M"))
        .ok()?;
    let local = NaiveDateTime::new(date, time);
    tz.from_local_datetime(&local)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Entries produced by one query set.
#[derive(Debug, Clone, Serialize)]
pub struct SectionResult<T> {
    pub name: String,
    pub queries: Vec<String>,
    pub total_messages: usize,
    /// Entries produced by each query, in query-list order.
    pub per_query: Vec<usize>,
    pub messages: Vec<T>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tehran() -> FixedOffset {
        FixedOffset::east_opt(12_600).unwrap()
    }

    fn defaults() -> DefaultRange {
        DefaultRange {
            start_date: "2026-02-18".to_string(),
            start_time: "00:00".to_string(),
            end_date: "2026-02-18".to_string(),
            end_time: "23:59".to_string(),
        }
    }

    #[test]
    fn omitted_bounds_use_defaults_in_configured_offset() {
        let range = RangeInput::default().resolve(&defaults(), &tehran()).unwrap();
        assert_eq!(range.from_iso(), "2026-02-17T20:30:00.000Z");
        assert_eq!(range.to_iso(), "2026-02-18T20:29:00.000Z");
    }

    #[test]
    fn explicit_time_overrides_default_time_only() {
        let input = RangeInput {
            start_time: Some("10:15:30".to_string()),
            ..Default::default()
        };
        let range = input.resolve(&defaults(), &tehran()).unwrap();
        assert_eq!(range.from_iso(), "2026-02-18T06:45:30.000Z");
    }

    #[test]
    fn equal_bounds_are_allowed_but_reversed_are_not() {
        let same = RangeInput {
            start_time: Some("12:00".to_string()),
            end_time: Some("12:00".to_string()),
            ..Default::default()
        };
        assert!(same.resolve(&defaults(), &tehran()).is_ok());

        let reversed = RangeInput {
            start_time: Some("13:00".to_string()),
            end_time: Some("12:00".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            reversed.resolve(&defaults(), &tehran()),
            Err(QueryError::InvalidRange)
        ));
    }

    #[test]
    fn bad_input_names_the_bound() {
        let input = RangeInput {
            end_date: Some("18/02/2026".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            input.resolve(&defaults(), &tehran()),
            Err(QueryError::InvalidDateTime("end"))
        ));

        let no_default_date = DefaultRange {
            start_date: String::new(),
            ..defaults()
        };
        assert!(matches!(
            RangeInput::default().resolve(&no_default_date, &tehran()),
            Err(QueryError::InvalidDateTime("start"))
        ));
    }

    #[test]
    fn trailing_window_ends_at_range_end() {
        let range = RangeInput::default().resolve(&defaults(), &tehran()).unwrap();
        let window = range.trailing(Duration::seconds(4)).unwrap();
        assert_eq!(window.to, range.to);
        assert_eq!(window.to - window.from, Duration::seconds(4));
    }

    #[test]
    fn trailing_window_before_min_date_is_rejected() {
        let range = RangeInput::default().resolve(&defaults(), &tehran()).unwrap();
        let frame = Duration::try_hours(2_000_000_000_000).unwrap();
        assert!(matches!(range.trailing(frame), Err(QueryError::InvalidRange)));
    }
}
