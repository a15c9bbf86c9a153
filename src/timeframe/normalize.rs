//! Resolution of caller-supplied timeframe inputs into a filter

use super::{extract_at, midnight, TimeFilter, Timeframe, TimeframeError};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timeframe as requested by a caller
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeframeInput {
    #[default]
    None,
    Range {
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// A whole UTC day
    Date(NaiveDate),
    /// The UTC day containing this instant
    DateTime(DateTime<Utc>),
    /// Detect a phrase in the query text
    AutoDetect,
    Ranges(Vec<(DateTime<Utc>, DateTime<Utc>)>),
}

/// Resolved timeframe plus the query to search with
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedTimeframe {
    pub filter: Option<TimeFilter>,
    /// Query with any detected phrase removed; unchanged otherwise
    pub query: String,
    pub matched_expression: Option<String>,
}

impl NormalizedTimeframe {
    fn explicit(filter: Option<TimeFilter>, query: &str) -> Self {
        Self {
            filter,
            query: query.to_string(),
            matched_expression: None,
        }
    }
}

/// Resolve `input` relative to the current time
pub fn normalize(input: &TimeframeInput, query: &str) -> Result<NormalizedTimeframe, TimeframeError> {
    normalize_at(input, query, Utc::now())
}

/// Resolve `input` relative to `now`
pub fn normalize_at(
    input: &TimeframeInput,
    query: &str,
    now: DateTime<Utc>,
) -> Result<NormalizedTimeframe, TimeframeError> {
    let filter = match input {
        TimeframeInput::None => None,
        TimeframeInput::Range { begin, end } => Some(Timeframe::new(*begin, *end)?.into()),
        TimeframeInput::Date(date) => Some(Timeframe::day(*date)?.into()),
        TimeframeInput::DateTime(instant) => Some(Timeframe::day(instant.date_naive())?.into()),
        TimeframeInput::AutoDetect => {
            if query.trim().is_empty() {
                return Err(TimeframeError::MissingQuery);
            }
            let extraction = extract_at(query, now);
            return Ok(NormalizedTimeframe {
                filter: extraction.timeframe.map(TimeFilter::Single),
                query: extraction.query,
                matched_expression: extraction.matched_expression,
            });
        }
        TimeframeInput::Ranges(ranges) => {
            let ranges = ranges
                .iter()
                .map(|(begin, end)| Timeframe::new(*begin, *end))
                .collect::<Result<Vec<_>, _>>()?;
            match ranges.len() {
                0 => None,
                1 => Some(TimeFilter::Single(ranges[0])),
                _ => Some(TimeFilter::Multi(ranges)),
            }
        }
    };

    Ok(NormalizedTimeframe::explicit(filter, query))
}

/// Resolve a loosely-typed JSON timeframe relative to the current time
pub fn normalize_value(value: &Value, query: &str) -> Result<NormalizedTimeframe, TimeframeError> {
    normalize_value_at(value, query, Utc::now())
}

pub fn normalize_value_at(
    value: &Value,
    query: &str,
    now: DateTime<Utc>,
) -> Result<NormalizedTimeframe, TimeframeError> {
    let input = parse_value(value)?;
    normalize_at(&input, query, now)
}

/// Interpret a JSON timeframe
///
/// Accepts `null`, `"auto"`, an ISO date, an RFC 3339 date-time,
/// `{"begin": .., "end": ..}` or an array of such objects.
pub fn parse_value(value: &Value) -> Result<TimeframeInput, TimeframeError> {
    match value {
        Value::Null => Ok(TimeframeInput::None),
        Value::String(s) => parse_string(s),
        Value::Object(_) => {
            let (begin, end) = parse_range_object(value)?;
            Ok(TimeframeInput::Range { begin, end })
        }
        Value::Array(items) => items
            .iter()
            .map(parse_range_object)
            .collect::<Result<Vec<_>, _>>()
            .map(TimeframeInput::Ranges),
        other => Err(TimeframeError::Unsupported(kind_of(other).to_string())),
    }
}

fn parse_string(s: &str) -> Result<TimeframeInput, TimeframeError> {
    let trimmed = s.trim();
    if trimmed.eq_ignore_ascii_case("auto") {
        return Ok(TimeframeInput::AutoDetect);
    }
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
        return Ok(TimeframeInput::None);
    }
    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        return Ok(TimeframeInput::DateTime(instant.with_timezone(&Utc)));
    }
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return Ok(TimeframeInput::Date(date));
    }
    Err(TimeframeError::InvalidDate(trimmed.to_string()))
}

/// A range bound given either as a date (midnight) or a date-time
fn parse_bound(value: Option<&Value>, field: &str) -> Result<DateTime<Utc>, TimeframeError> {
    let raw = value
        .and_then(Value::as_str)
        .ok_or_else(|| TimeframeError::Unsupported(format!("range is missing string field '{}'", field)))?;

    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(midnight)
        .map_err(|_| TimeframeError::InvalidDate(raw.to_string()))
}

fn parse_range_object(value: &Value) -> Result<(DateTime<Utc>, DateTime<Utc>), TimeframeError> {
    let Value::Object(map) = value else {
        return Err(TimeframeError::Unsupported(format!(
            "expected range object, got {}",
            kind_of(value)
        )));
    };
    Ok((
        parse_bound(map.get("begin"), "begin")?,
        parse_bound(map.get("end"), "end")?,
    ))
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
