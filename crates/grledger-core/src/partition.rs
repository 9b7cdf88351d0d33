//! # Partition and Namespace Keys
//!
//! Every row of the ledger lives in exactly one partition file:
//!
//! ```text
//! <root>/
//! ├── urlinfos/        # identity rows (title, department, date, source URL)
//! │   ├── 2025.jsonl
//! │   ├── 2024.jsonl
//! │   └── unknown.jsonl
//! ├── uploadinfos/     # pipeline rows (lifecycle state + stage objects)
//! │   └── <partition>.jsonl
//! └── pdfinfos/        # extraction rows (PDF metrics)
//!     └── <partition>.jsonl
//! ```
//!
//! The partition is the year of the record's `gr_date`, or `unknown` when the
//! date is missing or unparseable. A record keeps the same partition in every
//! namespace it appears in.

use crate::dates::parse_iso_date;
use chrono::Datelike;
use serde::{Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use strum::{Display, IntoStaticStr};

/// File extension of partition files.
pub const PARTITION_EXTENSION: &str = "jsonl";

const UNKNOWN_PARTITION: &str = "unknown";

/// Year bucket a record belongs to.
///
/// Ordering puts the most recent year first and `Unknown` last, which is the
/// order `list_partitions` reports and the order partition files are scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionKey {
    Year(u16),
    Unknown,
}

impl PartitionKey {
    /// Derives the partition for an effective date string (`YYYY-MM-DD`).
    pub fn for_date(gr_date: &str) -> Self {
        parse_iso_date(gr_date)
            .and_then(|date| u16::try_from(date.year()).ok())
            .filter(|year| *year <= 9999)
            .map(PartitionKey::Year)
            .unwrap_or(PartitionKey::Unknown)
    }

    /// Name of this partition's file inside a namespace directory.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self, PARTITION_EXTENSION)
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::Year(year) => write!(f, "{:04}", year),
            PartitionKey::Unknown => f.write_str(UNKNOWN_PARTITION),
        }
    }
}

impl FromStr for PartitionKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s == UNKNOWN_PARTITION {
            return Ok(PartitionKey::Unknown);
        }
        if s.len() == 4 && s.bytes().all(|b| b.is_ascii_digit()) {
            return s
                .parse::<u16>()
                .map(PartitionKey::Year)
                .map_err(|e| format!("invalid partition '{}': {}", s, e));
        }
        Err(format!(
            "invalid partition '{}': expected a 4-digit year or '{}'",
            s, UNKNOWN_PARTITION
        ))
    }
}

impl Ord for PartitionKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (PartitionKey::Year(a), PartitionKey::Year(b)) => b.cmp(a),
            (PartitionKey::Year(_), PartitionKey::Unknown) => Ordering::Less,
            (PartitionKey::Unknown, PartitionKey::Year(_)) => Ordering::Greater,
            (PartitionKey::Unknown, PartitionKey::Unknown) => Ordering::Equal,
        }
    }
}

impl PartialOrd for PartitionKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Serialize for PartitionKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One of the three physical row sets kept per record.
///
/// Displays as the on-disk directory name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, IntoStaticStr)]
pub enum Namespace {
    #[strum(serialize = "urlinfos")]
    Identity,
    #[strum(serialize = "uploadinfos")]
    Pipeline,
    #[strum(serialize = "pdfinfos")]
    Extraction,
}

impl Namespace {
    pub const ALL: [Namespace; 3] = [
        Namespace::Identity,
        Namespace::Pipeline,
        Namespace::Extraction,
    ];

    /// Directory name of this namespace under the ledger root.
    pub fn dir_name(&self) -> &'static str {
        (*self).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partition_for_date() {
        assert_eq!(PartitionKey::for_date("2024-03-01"), PartitionKey::Year(2024));
        assert_eq!(PartitionKey::for_date(" 1999-12-31 "), PartitionKey::Year(1999));
        assert_eq!(PartitionKey::for_date(""), PartitionKey::Unknown);
        assert_eq!(PartitionKey::for_date("01-03-2024"), PartitionKey::Unknown);
        assert_eq!(PartitionKey::for_date("2024-02-30"), PartitionKey::Unknown);
    }

    #[test]
    fn test_partition_parse_and_display() {
        assert_eq!("2024".parse::<PartitionKey>(), Ok(PartitionKey::Year(2024)));
        assert_eq!("unknown".parse::<PartitionKey>(), Ok(PartitionKey::Unknown));
        assert!("24".parse::<PartitionKey>().is_err());
        assert!("20x4".parse::<PartitionKey>().is_err());
        assert!("misc".parse::<PartitionKey>().is_err());

        assert_eq!(PartitionKey::Year(2024).to_string(), "2024");
        assert_eq!(PartitionKey::Unknown.file_name(), "unknown.jsonl");
    }

    #[test]
    fn test_partition_ordering_recent_first_unknown_last() {
        let mut keys = vec![
            PartitionKey::Unknown,
            PartitionKey::Year(2019),
            PartitionKey::Year(2025),
            PartitionKey::Year(2021),
        ];
        keys.sort();
        assert_eq!(
            keys,
            vec![
                PartitionKey::Year(2025),
                PartitionKey::Year(2021),
                PartitionKey::Year(2019),
                PartitionKey::Unknown,
            ]
        );
    }

    #[test]
    fn test_namespace_dir_names() {
        assert_eq!(Namespace::Identity.dir_name(), "urlinfos");
        assert_eq!(Namespace::Pipeline.dir_name(), "uploadinfos");
        assert_eq!(Namespace::Extraction.dir_name(), "pdfinfos");
        for namespace in Namespace::ALL {
            assert_eq!(namespace.dir_name(), namespace.to_string());
        }
    }
}
