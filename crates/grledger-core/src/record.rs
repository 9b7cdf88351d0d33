//! Unified record view.
//!
//! A [`Record`] is composed on read from the three namespace rows. Missing
//! pipeline or extraction rows are synthesized, so callers always see a full
//! record; the `has_*_row` flags say what is actually stored.

use crate::dates::parse_iso_date;
use crate::lifecycle::{LifecycleState, Stage};
use crate::model::{
    ExtractionInfo, ExtractionRow, IdentityRow, MAX_STAGE_ATTEMPTS, PipelineRow,
};
use crate::partition::PartitionKey;
use chrono::NaiveDate;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    pub identity: IdentityRow,
    pub pipeline: PipelineRow,
    pub extraction: ExtractionInfo,
    pub has_pipeline_row: bool,
    pub has_extraction_row: bool,
}

/// Builds the unified view of one record. Pure: no I/O, no clock.
///
/// A synthesized pipeline row is stamped with the identity row's
/// `updated_at_utc`.
pub fn compose(
    identity: &IdentityRow,
    pipeline: Option<&PipelineRow>,
    extraction: Option<&ExtractionRow>,
) -> Record {
    let pipeline_row = match pipeline {
        Some(row) => row.clone(),
        None => PipelineRow::new(&identity.record_key, identity.updated_at_utc),
    };
    let extraction_info = extraction.map(ExtractionRow::info).unwrap_or_default();

    let mut identity = identity.clone();
    if identity.unique_code.trim().is_empty() {
        identity.unique_code = identity.record_key.clone();
    }

    Record {
        identity,
        pipeline: pipeline_row,
        extraction: extraction_info,
        has_pipeline_row: pipeline.is_some(),
        has_extraction_row: extraction.is_some(),
    }
}

impl Record {
    pub fn key(&self) -> &str {
        &self.identity.record_key
    }

    pub fn partition(&self) -> PartitionKey {
        self.identity.partition()
    }

    pub fn state(&self) -> LifecycleState {
        self.pipeline.state
    }

    pub fn stage_attempts(&self, stage: Stage) -> u32 {
        self.pipeline.attempts(stage)
    }

    /// True while `stage` still has attempts left.
    pub fn is_eligible_for(&self, stage: Stage) -> bool {
        self.stage_attempts(stage) < MAX_STAGE_ATTEMPTS
    }

    /// True if the record was seen, or is dated, on or after `cutoff`.
    pub fn seen_since(&self, cutoff: NaiveDate) -> bool {
        self.identity.last_seen_crawl_date >= cutoff
            || self.identity.first_seen_crawl_date >= cutoff
            || parse_iso_date(&self.identity.gr_date).is_some_and(|date| date >= cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::{CrawlContext, RunType, Timestamp};
    use crate::model::{ExtractionStatus, StageStatus};

    fn ts(text: &str) -> Timestamp {
        Timestamp::parse(text).unwrap()
    }

    fn identity() -> IdentityRow {
        let crawl = CrawlContext::new(
            RunType::Daily,
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
        );
        let mut row = IdentityRow::new("123", &crawl, ts("2024-03-05T10:00:00Z"));
        row.gr_date = "2024-03-01".to_string();
        row.updated_at_utc = ts("2024-03-06T10:00:00Z");
        row
    }

    #[test]
    fn test_compose_synthesizes_missing_rows() {
        let record = compose(&identity(), None, None);

        assert!(!record.has_pipeline_row);
        assert!(!record.has_extraction_row);
        assert_eq!(record.state(), LifecycleState::Fetched);
        assert_eq!(record.pipeline.download.status, StageStatus::NotAttempted);
        assert_eq!(record.pipeline.created_at_utc, ts("2024-03-06T10:00:00Z"));
        assert_eq!(record.extraction.status, ExtractionStatus::NotAttempted);
        assert_eq!(record.partition(), PartitionKey::Year(2024));
    }

    #[test]
    fn test_compose_uses_stored_rows() {
        let mut pipeline = PipelineRow::new("123", ts("2024-03-05T10:00:00Z"));
        pipeline.state = LifecycleState::DownloadSuccess;
        pipeline.download.attempts = 2;
        let extraction = ExtractionRow::from_info(
            "123",
            &ExtractionInfo::with_status(ExtractionStatus::Failed),
            ts("2024-03-05T10:00:00Z"),
            ts("2024-03-07T10:00:00Z"),
        );

        let record = compose(&identity(), Some(&pipeline), Some(&extraction));

        assert!(record.has_pipeline_row);
        assert!(record.has_extraction_row);
        assert_eq!(record.state(), LifecycleState::DownloadSuccess);
        assert_eq!(record.extraction.status, ExtractionStatus::Failed);
        assert!(!record.is_eligible_for(Stage::Download));
        assert!(record.is_eligible_for(Stage::Wayback));
    }

    #[test]
    fn test_compose_backfills_blank_unique_code() {
        let mut row = identity();
        row.unique_code = String::new();
        assert_eq!(compose(&row, None, None).identity.unique_code, "123");
    }

    #[test]
    fn test_seen_since() {
        let record = compose(&identity(), None, None);
        assert!(record.seen_since(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap()));
        assert!(!record.seen_since(NaiveDate::from_ymd_opt(2024, 3, 6).unwrap()));
    }
}
