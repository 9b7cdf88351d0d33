//! Date and timestamp handling.
//!
//! Timestamps are stored as second-precision UTC with a `Z` suffix
//! (`2024-03-01T08:15:00Z`); calendar dates as `YYYY-MM-DD`.

use chrono::{DateTime, NaiveDate, SecondsFormat, Timelike, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use strum::{AsRefStr, Display, EnumString};

/// Parses a plain ISO calendar date, ignoring surrounding whitespace.
pub fn parse_iso_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

/// Today's date in UTC.
pub fn today_utc() -> NaiveDate {
    Utc::now().date_naive()
}

/// A UTC instant truncated to whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        Self(value.with_nanosecond(0).unwrap_or(value))
    }

    /// Parses an RFC 3339 timestamp; offsets are normalized to UTC.
    pub fn parse(text: &str) -> Option<Self> {
        DateTime::parse_from_rfc3339(text.trim())
            .ok()
            .map(|value| Self::from_datetime(value.with_timezone(&Utc)))
    }

    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Timestamp::parse(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid UTC timestamp '{}'", text)))
    }
}

/// Kind of discovery crawl that first saw (or re-saw) a record.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunType {
    #[default]
    Daily,
    Monthly,
}

/// Crawl provenance passed to insert/upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CrawlContext {
    pub run_type: RunType,
    pub crawl_date: NaiveDate,
}

impl CrawlContext {
    pub fn new(run_type: RunType, crawl_date: NaiveDate) -> Self {
        Self {
            run_type,
            crawl_date,
        }
    }

    /// Crawl context dated today (UTC).
    pub fn today(run_type: RunType) -> Self {
        Self::new(run_type, today_utc())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_iso_date() {
        assert_eq!(
            parse_iso_date("2024-03-01"),
            NaiveDate::from_ymd_opt(2024, 3, 1)
        );
        assert_eq!(parse_iso_date("  "), None);
        assert_eq!(parse_iso_date("2024/03/01"), None);
        assert_eq!(parse_iso_date("2023-02-29"), None);
    }

    #[test]
    fn test_timestamp_is_second_precision_z_suffixed() {
        let ts = Timestamp::parse("2024-03-01T08:15:42.987+00:00").unwrap();
        assert_eq!(ts.to_string(), "2024-03-01T08:15:42Z");

        let json = serde_json::to_string(&ts).unwrap();
        assert_eq!(json, "\"2024-03-01T08:15:42Z\"");
        let back: Timestamp = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ts);
    }

    #[test]
    fn test_timestamp_normalizes_offsets() {
        let ts = Timestamp::parse("2024-03-01T10:00:00+02:00").unwrap();
        assert_eq!(ts.to_string(), "2024-03-01T08:00:00Z");
    }

    #[test]
    fn test_timestamp_rejects_garbage() {
        assert!(Timestamp::parse("yesterday").is_none());
        assert!(serde_json::from_str::<Timestamp>("\"2024-03-01\"").is_err());
    }

    #[test]
    fn test_run_type_wire_names() {
        assert_eq!(serde_json::to_string(&RunType::Monthly).unwrap(), "\"monthly\"");
        assert_eq!("daily".parse::<RunType>().unwrap(), RunType::Daily);
        assert!("weekly".parse::<RunType>().is_err());
    }
}
