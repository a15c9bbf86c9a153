//! Natural-language timeframe detection
//!
//! All day arithmetic is done on UTC calendar dates; weeks start on Monday.

use super::{Timeframe, TimeframeError};
use chrono::{DateTime, Datelike, Days, NaiveDate, Utc};
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Window used for "recent" and "recently"
const RECENT_DAYS: u64 = 7;

/// "a few days ago" covers 2 to 5 days back
const FEW_DAYS_FROM: u64 = 5;
const FEW_DAYS_TO: u64 = 1;

/// Result of scanning a query for a temporal phrase
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Extraction {
    /// Query with the matched phrase removed
    pub query: String,
    pub timeframe: Option<Timeframe>,
    /// The phrase as written in the original query
    pub matched_expression: Option<String>,
}

impl Extraction {
    fn unmatched(query: &str) -> Self {
        Self {
            query: query.to_string(),
            timeframe: None,
            matched_expression: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phrase {
    DaysAgo,
    FewDaysAgo,
    LastDays,
    LastWeeks,
    WeeksAgo,
    LastWeek,
    LastMonth,
    ThisWeek,
    ThisMonth,
    Yesterday,
    Today,
    Recent,
}

/// Rules are tried in order; the first one that matches and resolves wins.
const RULES: &[(Phrase, &str)] = &[
    (Phrase::DaysAgo, r"(?i)\b(\d+)\s+days?\s+ago\b"),
    (Phrase::FewDaysAgo, r"(?i)\ba\s+few\s+days\s+ago\b"),
    (Phrase::LastDays, r"(?i)\b(?:last|past)\s+(\d+)\s+days?\b"),
    (Phrase::LastWeeks, r"(?i)\b(?:last|past)\s+(\d+)\s+weeks?\b"),
    (Phrase::WeeksAgo, r"(?i)\b(\d+)\s+weeks?\s+ago\b"),
    (Phrase::LastWeek, r"(?i)\b(?:last|past)\s+week\b"),
    (Phrase::LastMonth, r"(?i)\b(?:last|past)\s+month\b"),
    (Phrase::ThisWeek, r"(?i)\bthis\s+week\b"),
    (Phrase::ThisMonth, r"(?i)\bthis\s+month\b"),
    (Phrase::Yesterday, r"(?i)\byesterday\b"),
    (Phrase::Today, r"(?i)\btoday\b"),
    (Phrase::Recent, r"(?i)\brecent(?:ly)?\b"),
];

#[derive(Debug)]
struct CompiledRule {
    phrase: Phrase,
    regex: Regex,
}

/// Compiled set of timeframe phrase rules
#[derive(Debug)]
pub struct TimeframeExtractor {
    rules: Vec<CompiledRule>,
}

impl TimeframeExtractor {
    pub fn new() -> Result<Self, TimeframeError> {
        let rules = RULES
            .iter()
            .map(|(phrase, pattern)| {
                Regex::new(pattern)
                    .map(|regex| CompiledRule {
                        phrase: *phrase,
                        regex,
                    })
                    .map_err(|e| TimeframeError::Pattern(format!("{:?}: {}", phrase, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    /// Extract a timeframe relative to the current time
    pub fn extract(&self, query: &str) -> Extraction {
        self.extract_at(query, Utc::now())
    }

    /// Extract a timeframe relative to `now`
    pub fn extract_at(&self, query: &str, now: DateTime<Utc>) -> Extraction {
        let today = now.date_naive();

        for rule in &self.rules {
            let Some(captures) = rule.regex.captures(query) else {
                continue;
            };
            let Some(whole) = captures.get(0) else {
                continue;
            };

            let count = captures.get(1).and_then(|m| m.as_str().parse::<u64>().ok());
            let Some(timeframe) = resolve(rule.phrase, count, today) else {
                debug!("Phrase '{}' matched but does not resolve to a range", whole.as_str());
                continue;
            };

            let remaining = format!("{} {}", &query[..whole.start()], &query[whole.end()..]);
            let cleaned = remaining.split_whitespace().collect::<Vec<_>>().join(" ");

            debug!(
                "Detected timeframe '{}' -> {}",
                whole.as_str(),
                timeframe
            );

            return Extraction {
                query: cleaned,
                timeframe: Some(timeframe),
                matched_expression: Some(whole.as_str().to_string()),
            };
        }

        Extraction::unmatched(query)
    }
}

fn shared() -> &'static Result<TimeframeExtractor, TimeframeError> {
    static EXTRACTOR: OnceLock<Result<TimeframeExtractor, TimeframeError>> = OnceLock::new();
    EXTRACTOR.get_or_init(TimeframeExtractor::new)
}

/// Extract a timeframe from `query` relative to the current time
pub fn extract(query: &str) -> Extraction {
    extract_at(query, Utc::now())
}

/// Extract a timeframe from `query` relative to `now`
pub fn extract_at(query: &str, now: DateTime<Utc>) -> Extraction {
    match shared() {
        Ok(extractor) => extractor.extract_at(query, now),
        Err(e) => {
            warn!("Timeframe detection unavailable: {}", e);
            Extraction::unmatched(query)
        }
    }
}

fn resolve(phrase: Phrase, count: Option<u64>, today: NaiveDate) -> Option<Timeframe> {
    let tomorrow = today.checked_add_days(Days::new(1))?;
    let back = |days: u64| today.checked_sub_days(Days::new(days));

    let range = match phrase {
        Phrase::DaysAgo => Timeframe::day(back(count?)?),
        Phrase::FewDaysAgo => Timeframe::between_dates(back(FEW_DAYS_FROM)?, back(FEW_DAYS_TO)?),
        Phrase::LastDays => Timeframe::between_dates(back(count?.max(1))?, tomorrow),
        Phrase::LastWeeks => {
            Timeframe::between_dates(back(count?.max(1).checked_mul(7)?)?, tomorrow)
        }
        Phrase::WeeksAgo => {
            let day = back(count?.checked_mul(7)?)?;
            Timeframe::days(week_start(day)?, 7)
        }
        Phrase::LastWeek => {
            let this_week = week_start(today)?;
            Timeframe::between_dates(this_week.checked_sub_days(Days::new(7))?, this_week)
        }
        Phrase::LastMonth => {
            let this_month = month_start(today)?;
            let previous = month_start(this_month.pred_opt()?)?;
            Timeframe::between_dates(previous, this_month)
        }
        Phrase::ThisWeek => Timeframe::between_dates(week_start(today)?, tomorrow),
        Phrase::ThisMonth => Timeframe::between_dates(month_start(today)?, tomorrow),
        Phrase::Yesterday => Timeframe::day(back(1)?),
        Phrase::Today => Timeframe::day(today),
        Phrase::Recent => Timeframe::between_dates(back(RECENT_DAYS)?, tomorrow),
    };

    range.ok()
}

fn week_start(date: NaiveDate) -> Option<NaiveDate> {
    date.checked_sub_days(Days::new(u64::from(date.weekday().num_days_from_monday())))
}

fn month_start(date: NaiveDate) -> Option<NaiveDate> {
    NaiveDate::from_ymd_opt(date.year(), date.month(), 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    /// Wednesday 2024-03-13, mid-afternoon
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 13, 15, 30, 0).unwrap()
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn range(from: NaiveDate, to: NaiveDate) -> Option<Timeframe> {
        Some(Timeframe::between_dates(from, to).unwrap())
    }

    #[test]
    fn test_yesterday_is_removed_from_query() {
        let extraction = extract_at("what happened yesterday about X", now());
        assert_eq!(extraction.query, "what happened about X");
        assert_eq!(extraction.matched_expression.as_deref(), Some("yesterday"));
        assert_eq!(extraction.timeframe, range(date(2024, 3, 12), date(2024, 3, 13)));
    }

    #[test]
    fn test_no_phrase_leaves_query_untouched() {
        let extraction = extract_at("  rust  ownership rules", now());
        assert_eq!(extraction.query, "  rust  ownership rules");
        assert_eq!(extraction.timeframe, None);
        assert_eq!(extraction.matched_expression, None);
    }

    #[test]
    fn test_case_insensitive_and_word_bounded() {
        let extraction = extract_at("notes from TODAY", now());
        assert_eq!(extraction.timeframe, range(date(2024, 3, 13), date(2024, 3, 14)));
        assert_eq!(extraction.matched_expression.as_deref(), Some("TODAY"));

        // "todays" and "yesterdays" are not the standalone words
        assert_eq!(extract_at("todays yesterdays", now()).timeframe, None);
    }

    #[test]
    fn test_calendar_week_and_month() {
        let last_week = extract_at("last week deploys", now());
        assert_eq!(last_week.timeframe, range(date(2024, 3, 4), date(2024, 3, 11)));
        assert_eq!(last_week.query, "deploys");

        let last_month = extract_at("incidents last month", now());
        assert_eq!(last_month.timeframe, range(date(2024, 2, 1), date(2024, 3, 1)));

        let this_week = extract_at("this week", now());
        assert_eq!(this_week.timeframe, range(date(2024, 3, 11), date(2024, 3, 14)));
        assert_eq!(this_week.query, "");
    }

    #[test]
    fn test_last_month_in_january_wraps_year() {
        let january = Utc.with_ymd_and_hms(2024, 1, 20, 8, 0, 0).unwrap();
        let extraction = extract_at("last month", january);
        assert_eq!(extraction.timeframe, range(date(2023, 12, 1), date(2024, 1, 1)));
    }

    #[test]
    fn test_counted_phrases() {
        let ago = extract_at("3 days ago standup", now());
        assert_eq!(ago.timeframe, range(date(2024, 3, 10), date(2024, 3, 11)));

        let last = extract_at("errors in the last 7 days", now());
        assert_eq!(last.timeframe, range(date(2024, 3, 6), date(2024, 3, 14)));
        assert_eq!(last.query, "errors in the");

        let past = extract_at("past 2 weeks", now());
        assert_eq!(past.timeframe, range(date(2024, 2, 28), date(2024, 3, 14)));

        let weeks_ago = extract_at("2 weeks ago", now());
        assert_eq!(weeks_ago.timeframe, range(date(2024, 2, 26), date(2024, 3, 4)));
    }

    #[test]
    fn test_few_days_ago_and_recent() {
        let few = extract_at("a few days ago", now());
        assert_eq!(few.timeframe, range(date(2024, 3, 8), date(2024, 3, 12)));

        let recent = extract_at("recently merged PRs", now());
        assert_eq!(recent.timeframe, range(date(2024, 3, 6), date(2024, 3, 14)));
        assert_eq!(recent.query, "merged PRs");
    }

    #[test]
    fn test_huge_count_does_not_match() {
        let extraction = extract_at("99999999999999 days ago", now());
        assert_eq!(extraction.timeframe, None);
        assert_eq!(extraction.query, "99999999999999 days ago");
    }
}
