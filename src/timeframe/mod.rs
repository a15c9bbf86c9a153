//! Temporal filters for search
//!
//! A [`Timeframe`] is a half-open `[begin, end)` UTC range. Queries can carry
//! natural-language phrases ("yesterday", "last 3 days") that the extractor
//! turns into a timeframe, and callers can pass explicit or loosely-typed
//! inputs that [`normalize`] resolves into a [`TimeFilter`].

mod extractor;
mod normalize;

pub use extractor::{extract, extract_at, Extraction, TimeframeExtractor};
pub use normalize::{
    normalize, normalize_at, normalize_value, normalize_value_at, parse_value, NormalizedTimeframe,
    TimeframeInput,
};

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeframeError {
    #[error("Auto-detected timeframe requires a non-empty query")]
    MissingQuery,

    #[error("Invalid time range: begin {begin} is not before end {end}")]
    InvalidRange {
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Unsupported timeframe input: {0}")]
    Unsupported(String),

    #[error("Failed to compile timeframe pattern: {0}")]
    Pattern(String),
}

/// Half-open `[begin, end)` UTC range with `begin < end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawTimeframe")]
pub struct Timeframe {
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct RawTimeframe {
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TryFrom<RawTimeframe> for Timeframe {
    type Error = TimeframeError;

    fn try_from(raw: RawTimeframe) -> Result<Self, Self::Error> {
        Timeframe::new(raw.begin, raw.end)
    }
}

impl Timeframe {
    pub fn new(begin: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, TimeframeError> {
        if begin >= end {
            return Err(TimeframeError::InvalidRange { begin, end });
        }
        Ok(Self { begin, end })
    }

    /// The UTC calendar day `date`
    pub fn day(date: NaiveDate) -> Result<Self, TimeframeError> {
        Self::days(date, 1)
    }

    /// `count` whole UTC days starting at `start`
    pub fn days(start: NaiveDate, count: u64) -> Result<Self, TimeframeError> {
        let end = start
            .checked_add_days(Days::new(count))
            .ok_or_else(|| TimeframeError::InvalidDate(format!("{} + {} days", start, count)))?;
        Self::new(midnight(start), midnight(end))
    }

    /// Whole UTC days `[start, end)`
    pub fn between_dates(start: NaiveDate, end: NaiveDate) -> Result<Self, TimeframeError> {
        Self::new(midnight(start), midnight(end))
    }

    pub fn begin(&self) -> DateTime<Utc> {
        self.begin
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.begin <= instant && instant < self.end
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.begin.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Time restriction applied to search branches
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeFilter {
    Single(Timeframe),
    /// Matches when any window contains the instant
    Multi(Vec<Timeframe>),
}

impl TimeFilter {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.ranges().iter().any(|range| range.contains(instant))
    }

    pub fn ranges(&self) -> &[Timeframe] {
        match self {
            Self::Single(range) => std::slice::from_ref(range),
            Self::Multi(ranges) => ranges,
        }
    }
}

impl From<Timeframe> for TimeFilter {
    fn from(range: Timeframe) -> Self {
        Self::Single(range)
    }
}

/// UTC midnight at the start of `date`
pub(crate) fn midnight(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(NaiveTime::MIN).and_utc()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_begin_must_precede_end() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        assert!(matches!(
            Timeframe::new(t, t),
            Err(TimeframeError::InvalidRange { .. })
        ));
    }

    #[test]
    fn test_day_is_half_open() {
        let day = Timeframe::day(date(2024, 3, 1)).unwrap();
        assert!(day.contains(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()));
        assert!(day.contains(Utc.with_ymd_and_hms(2024, 3, 1, 23, 59, 59).unwrap()));
        assert!(!day.contains(Utc.with_ymd_and_hms(2024, 3, 2, 0, 0, 0).unwrap()));
    }

    #[test]
    fn test_multi_filter_matches_any_window() {
        let filter = TimeFilter::Multi(vec![
            Timeframe::day(date(2024, 1, 1)).unwrap(),
            Timeframe::day(date(2024, 1, 10)).unwrap(),
        ]);
        assert!(filter.contains(Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap()));
        assert!(!filter.contains(Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap()));
    }

    #[test]
    fn test_deserialize_rejects_inverted_range() {
        let json = r#"{"begin":"2024-01-02T00:00:00Z","end":"2024-01-01T00:00:00Z"}"#;
        assert!(serde_json::from_str::<Timeframe>(json).is_err());

        let json = r#"{"begin":"2024-01-01T00:00:00Z","end":"2024-01-02T00:00:00Z"}"#;
        let range: Timeframe = serde_json::from_str(json).unwrap();
        assert_eq!(range, Timeframe::day(date(2024, 1, 1)).unwrap());
    }
}
