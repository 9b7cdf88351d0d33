//! Record patches.
//!
//! A [`RecordPatch`] names a record and carries the fields to set. `None`
//! means "leave as is". Identity fields are applied with immutability rules;
//! pipeline stage objects replace the stored ones wholesale, subject to the
//! attempt-counter and transition checks.

use crate::dates::{RunType, Timestamp};
use crate::error::{LedgerError, Result};
use crate::lifecycle::{LifecycleState, Stage, validate_transition};
use crate::model::{
    ArchiveStage, DownloadStage, ExtractionInfo, HfStage, IdentityRow, MAX_STAGE_ATTEMPTS,
    PipelineRow, WaybackStage,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Pipeline part of a patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelinePatch {
    pub state: Option<LifecycleState>,
    pub download: Option<DownloadStage>,
    pub wayback: Option<WaybackStage>,
    pub archive: Option<ArchiveStage>,
    pub hf: Option<HfStage>,
}

impl PipelinePatch {
    pub fn with_state(mut self, state: LifecycleState) -> Self {
        self.state = Some(state);
        self
    }

    /// Writes the patch into `row`.
    ///
    /// # Errors
    ///
    /// `InvalidPatch` if a stage object would lower or overflow its attempt
    /// counter, `InvalidTransition` if the requested state is not reachable
    /// from the stored one. `row` is untouched on error.
    pub fn apply(&self, row: &mut PipelineRow) -> Result<()> {
        let key = row.record_key.clone();
        for (stage, attempts) in [
            (Stage::Download, self.download.as_ref().map(|s| s.attempts)),
            (Stage::Wayback, self.wayback.as_ref().map(|s| s.attempts)),
            (Stage::Archive, self.archive.as_ref().map(|s| s.attempts)),
            (Stage::Hf, self.hf.as_ref().map(|s| s.attempts)),
        ] {
            let Some(attempts) = attempts else { continue };
            let current = row.attempts(stage);
            if attempts < current || attempts > MAX_STAGE_ATTEMPTS {
                return Err(LedgerError::InvalidPatch {
                    key,
                    reason: format!(
                        "{} attempts {} -> {} (must not decrease or exceed {})",
                        stage, current, attempts, MAX_STAGE_ATTEMPTS
                    ),
                });
            }
        }
        if let Some(state) = self.state {
            validate_transition(&key, row.state, state)?;
        }

        if let Some(state) = self.state {
            row.state = state;
        }
        if let Some(stage) = &self.download {
            row.download = stage.clone();
        }
        if let Some(stage) = &self.wayback {
            row.wayback = stage.clone();
        }
        if let Some(stage) = &self.archive {
            row.archive = stage.clone();
        }
        if let Some(stage) = &self.hf {
            row.hf = stage.clone();
        }
        Ok(())
    }
}

/// Fields to set on one record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecordPatch {
    pub record_key: String,
    pub title: Option<String>,
    pub department_name: Option<String>,
    pub department_code: Option<String>,
    pub gr_date: Option<String>,
    pub source_url: Option<String>,
    pub last_seen_crawl_date: Option<NaiveDate>,

    // Immutable once stored. Accepted so that a full row can be replayed as
    // a patch; a differing value is an error on update.
    pub unique_code: Option<String>,
    pub created_at_utc: Option<Timestamp>,
    pub first_seen_crawl_date: Option<NaiveDate>,
    pub first_seen_run_type: Option<RunType>,

    pub pipeline: Option<PipelinePatch>,
    pub extraction: Option<ExtractionInfo>,
}

impl RecordPatch {
    pub fn new(record_key: impl Into<String>) -> Self {
        Self {
            record_key: record_key.into(),
            ..Default::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn department(mut self, name: impl Into<String>, code: impl Into<String>) -> Self {
        self.department_name = Some(name.into());
        self.department_code = Some(code.into());
        self
    }

    pub fn gr_date(mut self, gr_date: impl Into<String>) -> Self {
        self.gr_date = Some(gr_date.into());
        self
    }

    pub fn source_url(mut self, source_url: impl Into<String>) -> Self {
        self.source_url = Some(source_url.into());
        self
    }

    pub fn last_seen(mut self, date: NaiveDate) -> Self {
        self.last_seen_crawl_date = Some(date);
        self
    }

    pub fn pipeline(mut self, pipeline: PipelinePatch) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn extraction(mut self, extraction: ExtractionInfo) -> Self {
        self.extraction = Some(extraction);
        self
    }

    /// The trimmed record key.
    pub fn key(&self) -> Result<&str> {
        let key = self.record_key.trim();
        if key.is_empty() {
            return Err(LedgerError::InvalidPatch {
                key: self.record_key.clone(),
                reason: "record_key is empty".to_string(),
            });
        }
        Ok(key)
    }

    /// Fills a freshly created identity row. Immutable fields keep the
    /// values `row` was created with.
    pub(crate) fn apply_to_new_identity(&self, row: &mut IdentityRow) -> Result<()> {
        if let Some(code) = &self.unique_code {
            let code = code.trim();
            if !code.is_empty() && code != row.record_key {
                return Err(LedgerError::InvalidPatch {
                    key: row.record_key.clone(),
                    reason: format!("unique_code {:?} differs from record_key", code),
                });
            }
        }
        self.apply_mutable(row);
        Ok(())
    }

    /// Applies the patch to a stored identity row. Returns whether anything
    /// changed.
    pub(crate) fn apply_to_identity(&self, row: &mut IdentityRow) -> Result<bool> {
        let key = &row.record_key;
        let violation = |field| LedgerError::ImmutableFieldViolation {
            key: key.clone(),
            field,
        };

        let mut backfill_code = None;
        if let Some(code) = &self.unique_code {
            let code = code.trim();
            if row.unique_code.is_empty() {
                backfill_code = Some(code.to_string());
            } else if !code.is_empty() && code != row.unique_code {
                return Err(violation("unique_code"));
            }
        }
        if self.created_at_utc.is_some_and(|v| v != row.created_at_utc) {
            return Err(violation("created_at_utc"));
        }
        if self
            .first_seen_crawl_date
            .is_some_and(|v| v != row.first_seen_crawl_date)
        {
            return Err(violation("first_seen_crawl_date"));
        }
        if self
            .first_seen_run_type
            .is_some_and(|v| v != row.first_seen_run_type)
        {
            return Err(violation("first_seen_run_type"));
        }

        let before = row.clone();
        if let Some(code) = backfill_code {
            row.unique_code = code;
        }
        self.apply_mutable(row);
        Ok(*row != before)
    }

    fn apply_mutable(&self, row: &mut IdentityRow) {
        let fields = [
            (&self.title, &mut row.title),
            (&self.department_name, &mut row.department_name),
            (&self.department_code, &mut row.department_code),
            (&self.gr_date, &mut row.gr_date),
            (&self.source_url, &mut row.source_url),
        ];
        for (value, target) in fields {
            if let Some(value) = value {
                *target = value.trim().to_string();
            }
        }
        if let Some(date) = self.last_seen_crawl_date {
            row.last_seen_crawl_date = date;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dates::CrawlContext;
    use crate::model::StageStatus;

    fn ts(text: &str) -> Timestamp {
        Timestamp::parse(text).unwrap()
    }

    fn stored() -> IdentityRow {
        let crawl = CrawlContext::new(
            RunType::Daily,
            NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
        );
        IdentityRow::new("123", &crawl, ts("2024-03-05T10:00:00Z"))
    }

    #[test]
    fn test_key_is_trimmed_and_required() {
        assert_eq!(RecordPatch::new(" 123 ").key().unwrap(), "123");
        assert!(matches!(
            RecordPatch::new("  ").key(),
            Err(LedgerError::InvalidPatch { .. })
        ));
    }

    #[test]
    fn test_update_sets_mutable_fields() {
        let mut row = stored();
        let patch = RecordPatch::new("123")
            .title("  Budget circular ")
            .department("Finance", "FIN")
            .gr_date("2024-03-01");

        assert!(patch.apply_to_identity(&mut row).unwrap());
        assert_eq!(row.title, "Budget circular");
        assert_eq!(row.department_code, "FIN");
        assert_eq!(row.gr_date, "2024-03-01");

        assert!(!patch.apply_to_identity(&mut row).unwrap());
    }

    #[test]
    fn test_update_rejects_changed_immutable_field() {
        let mut row = stored();
        let patch = RecordPatch {
            first_seen_crawl_date: NaiveDate::from_ymd_opt(2020, 1, 1),
            ..RecordPatch::new("123").title("changed")
        };

        let err = patch.apply_to_identity(&mut row).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::ImmutableFieldViolation {
                field: "first_seen_crawl_date",
                ..
            }
        ));
        assert_eq!(row.title, "", "row must be untouched on error");
    }

    #[test]
    fn test_update_accepts_equal_immutable_values() {
        let mut row = stored();
        let patch = RecordPatch {
            unique_code: Some("123".to_string()),
            created_at_utc: Some(row.created_at_utc),
            first_seen_run_type: Some(RunType::Daily),
            ..RecordPatch::new("123")
        };
        assert!(!patch.apply_to_identity(&mut row).unwrap());
    }

    #[test]
    fn test_update_backfills_empty_unique_code() {
        let mut row = stored();
        row.unique_code.clear();
        let patch = RecordPatch {
            unique_code: Some("123".to_string()),
            ..RecordPatch::new("123")
        };
        assert!(patch.apply_to_identity(&mut row).unwrap());
        assert_eq!(row.unique_code, "123");
    }

    #[test]
    fn test_insert_rejects_mismatched_unique_code() {
        let mut row = stored();
        let patch = RecordPatch {
            unique_code: Some("999".to_string()),
            ..RecordPatch::new("123")
        };
        assert!(matches!(
            patch.apply_to_new_identity(&mut row),
            Err(LedgerError::InvalidPatch { .. })
        ));
    }

    #[test]
    fn test_pipeline_patch_checks_attempts_and_state() {
        let mut row = PipelineRow::new("123", ts("2024-03-05T10:00:00Z"));
        row.download.attempts = 1;

        let lowered = PipelinePatch {
            download: Some(DownloadStage::default()),
            ..Default::default()
        };
        assert!(matches!(
            lowered.apply(&mut row),
            Err(LedgerError::InvalidPatch { .. })
        ));

        let too_many = PipelinePatch {
            wayback: Some(WaybackStage {
                attempts: 3,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(too_many.apply(&mut row).is_err());

        let skip_ahead = PipelinePatch::default().with_state(LifecycleState::WaybackUploaded);
        assert!(matches!(
            skip_ahead.apply(&mut row),
            Err(LedgerError::InvalidTransition { .. })
        ));
        assert_eq!(row.state, LifecycleState::Fetched);

        let valid = PipelinePatch {
            download: Some(DownloadStage {
                status: StageStatus::Success,
                attempts: 2,
                ..Default::default()
            }),
            ..PipelinePatch::default().with_state(LifecycleState::DownloadSuccess)
        };
        valid.apply(&mut row).unwrap();
        assert_eq!(row.state, LifecycleState::DownloadSuccess);
        assert_eq!(row.download.attempts, 2);
    }
}
