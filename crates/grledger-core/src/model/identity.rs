use crate::dates::{CrawlContext, RunType, Timestamp};
use crate::partition::PartitionKey;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

const UNKNOWN_DEPARTMENT_CODE: &str = "unknown";

fn default_department_code() -> String {
    UNKNOWN_DEPARTMENT_CODE.to_string()
}

/// Discovery metadata for one document (`urlinfos/`).
///
/// `record_key`, `unique_code`, `created_at_utc`, `first_seen_crawl_date`
/// and `first_seen_run_type` never change once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdentityRow {
    pub record_key: String,
    #[serde(default)]
    pub unique_code: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub department_name: String,
    #[serde(default = "default_department_code")]
    pub department_code: String,
    /// Effective date (`YYYY-MM-DD`); decides the partition.
    #[serde(default)]
    pub gr_date: String,
    #[serde(default)]
    pub source_url: String,
    pub first_seen_crawl_date: NaiveDate,
    pub last_seen_crawl_date: NaiveDate,
    #[serde(default)]
    pub first_seen_run_type: RunType,
    pub created_at_utc: Timestamp,
    pub updated_at_utc: Timestamp,
}

impl IdentityRow {
    /// Skeleton row for a record first seen by `crawl`.
    pub fn new(record_key: &str, crawl: &CrawlContext, now: Timestamp) -> Self {
        Self {
            record_key: record_key.to_string(),
            unique_code: record_key.to_string(),
            title: String::new(),
            department_name: String::new(),
            department_code: default_department_code(),
            gr_date: String::new(),
            source_url: String::new(),
            first_seen_crawl_date: crawl.crawl_date,
            last_seen_crawl_date: crawl.crawl_date,
            first_seen_run_type: crawl.run_type,
            created_at_utc: now,
            updated_at_utc: now,
        }
    }

    pub fn partition(&self) -> PartitionKey {
        PartitionKey::for_date(&self.gr_date)
    }

    /// Moves `last_seen_crawl_date` forward; older or equal dates are ignored.
    pub fn mark_seen(&mut self, crawl_date: NaiveDate) -> bool {
        if crawl_date > self.last_seen_crawl_date {
            self.last_seen_crawl_date = crawl_date;
            true
        } else {
            false
        }
    }
}
