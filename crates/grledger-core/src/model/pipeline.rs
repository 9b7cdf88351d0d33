use crate::dates::Timestamp;
use crate::lifecycle::{LifecycleState, Stage};
use crate::stage_result::StageResult;
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Attempts allowed per stage before the record is skipped for good.
pub const MAX_STAGE_ATTEMPTS: u32 = 2;

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
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StageStatus {
    #[default]
    NotAttempted,
    Success,
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DownloadStage {
    pub status: StageStatus,
    pub error: String,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Web-archive capture.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WaybackStage {
    pub status: StageStatus,
    pub url: String,
    pub content_url: String,
    pub archive_time: String,
    pub archive_sha1: String,
    pub archive_length: Option<u64>,
    pub archive_mimetype: String,
    pub archive_status_code: String,
    pub error: String,
    pub attempts: u32,
}

/// Long-term archival upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ArchiveStage {
    pub status: StageStatus,
    pub identifier: String,
    pub url: String,
    pub error: String,
    pub attempts: u32,
}

/// Remote dataset sync.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HfStage {
    pub status: StageStatus,
    pub path: Option<String>,
    pub hash: Option<String>,
    pub backend: Option<String>,
    pub commit_hash: Option<String>,
    pub error: Option<String>,
    pub synced_at_utc: Option<Timestamp>,
    pub attempts: u32,
}

/// Lifecycle state plus per-stage progress (`uploadinfos/`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineRow {
    pub record_key: String,
    #[serde(default)]
    pub state: LifecycleState,
    #[serde(default)]
    pub download: DownloadStage,
    #[serde(default)]
    pub wayback: WaybackStage,
    #[serde(default)]
    pub archive: ArchiveStage,
    #[serde(default)]
    pub hf: HfStage,
    pub created_at_utc: Timestamp,
    pub updated_at_utc: Timestamp,
}

impl PipelineRow {
    /// A `FETCHED` row with every stage untouched.
    pub fn new(record_key: &str, now: Timestamp) -> Self {
        Self {
            record_key: record_key.to_string(),
            state: LifecycleState::Fetched,
            download: DownloadStage::default(),
            wayback: WaybackStage::default(),
            archive: ArchiveStage::default(),
            hf: HfStage::default(),
            created_at_utc: now,
            updated_at_utc: now,
        }
    }

    pub fn attempts(&self, stage: Stage) -> u32 {
        match stage {
            Stage::Download => self.download.attempts,
            Stage::Wayback => self.wayback.attempts,
            Stage::Archive => self.archive.attempts,
            Stage::Hf => self.hf.attempts,
        }
    }

    pub fn attempts_mut(&mut self, stage: Stage) -> &mut u32 {
        match stage {
            Stage::Download => &mut self.download.attempts,
            Stage::Wayback => &mut self.wayback.attempts,
            Stage::Archive => &mut self.archive.attempts,
            Stage::Hf => &mut self.hf.attempts,
        }
    }

    pub fn status(&self, stage: Stage) -> StageStatus {
        match stage {
            Stage::Download => self.download.status,
            Stage::Wayback => self.wayback.status,
            Stage::Archive => self.archive.status,
            Stage::Hf => self.hf.status,
        }
    }

    /// True once the wayback stage has produced a capture URL.
    pub fn has_wayback_url(&self) -> bool {
        !self.wayback.url.trim().is_empty()
    }

    /// Writes the stage fields of `result`. Attempt counting and the state
    /// transition are the caller's job.
    pub fn record_outcome(&mut self, result: &StageResult, now: Timestamp) {
        let meta = &result.metadata;
        if !result.success {
            let message = result.failure_message();
            match result.stage {
                Stage::Download => {
                    self.download.status = StageStatus::Failed;
                    self.download.error = message;
                }
                Stage::Wayback => {
                    self.wayback.status = StageStatus::Failed;
                    self.wayback.error = message;
                }
                Stage::Archive => {
                    self.archive.status = StageStatus::Failed;
                    self.archive.error = message;
                }
                Stage::Hf => {
                    self.hf.status = StageStatus::Failed;
                    self.hf.error = Some(message);
                }
            }
            return;
        }

        match result.stage {
            Stage::Download => {
                let stage = &mut self.download;
                stage.status = StageStatus::Success;
                stage.error.clear();
                set_opt(&mut stage.path, &meta.path);
                set_opt(&mut stage.hash, &meta.hash);
                if meta.size.is_some() {
                    stage.size = meta.size;
                }
            }
            Stage::Wayback => {
                let stage = &mut self.wayback;
                stage.status = StageStatus::Success;
                stage.error.clear();
                set_text(&mut stage.url, &meta.url);
                set_text(&mut stage.content_url, &meta.content_url);
                set_text(&mut stage.archive_time, &meta.archive_time);
                set_text(&mut stage.archive_sha1, &meta.archive_sha1);
                set_text(&mut stage.archive_mimetype, &meta.archive_mimetype);
                set_text(&mut stage.archive_status_code, &meta.archive_status_code);
                if meta.archive_length.is_some() {
                    stage.archive_length = meta.archive_length;
                }
            }
            Stage::Archive => {
                let stage = &mut self.archive;
                stage.status = StageStatus::Success;
                stage.error.clear();
                set_text(&mut stage.identifier, &meta.identifier);
                set_text(&mut stage.url, &meta.url);
            }
            Stage::Hf => {
                let stage = &mut self.hf;
                stage.status = StageStatus::Success;
                stage.error = None;
                set_opt(&mut stage.path, &meta.path);
                set_opt(&mut stage.hash, &meta.hash);
                set_opt(&mut stage.backend, &meta.backend);
                set_opt(&mut stage.commit_hash, &meta.commit_hash);
                stage.synced_at_utc = Some(now);
            }
        }
    }
}

fn set_text(target: &mut String, value: &Option<String>) {
    if let Some(value) = value {
        *target = value.trim().to_string();
    }
}

// Blank strings clear the field.
fn set_opt(target: &mut Option<String>, value: &Option<String>) {
    if let Some(value) = value {
        let value = value.trim();
        *target = (!value.is_empty()).then(|| value.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage_result::StageMetadata;

    fn now() -> Timestamp {
        Timestamp::parse("2024-05-01T12:00:00Z").unwrap()
    }

    #[test]
    fn test_default_row_wire_shape() {
        let row = PipelineRow::new("123", now());
        let value = serde_json::to_value(&row).unwrap();

        assert_eq!(value["state"], "FETCHED");
        assert_eq!(
            value["download"],
            serde_json::json!({"status": "not_attempted", "error": "", "attempts": 0})
        );
        assert_eq!(value["wayback"]["archive_length"], serde_json::Value::Null);
        assert_eq!(value["hf"]["synced_at_utc"], serde_json::Value::Null);
        assert_eq!(value["archive"]["identifier"], "");
    }

    #[test]
    fn test_missing_stage_objects_default() {
        let row: PipelineRow = serde_json::from_str(
            r#"{"record_key":"9","state":"DOWNLOAD_FAILED","download":{"status":"failed","attempts":1},
                "created_at_utc":"2024-01-01T00:00:00Z","updated_at_utc":"2024-01-02T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(row.state, LifecycleState::DownloadFailed);
        assert_eq!(row.attempts(Stage::Download), 1);
        assert_eq!(row.download.error, "");
        assert_eq!(row.attempts(Stage::Hf), 0);
    }

    #[test]
    fn test_stage_rejects_unknown_fields() {
        let parsed: Result<DownloadStage, _> =
            serde_json::from_str(r#"{"status":"success","attempts":1,"lfs_path":"x"}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_record_download_success_then_failure() {
        let mut row = PipelineRow::new("123", now());
        let ok = StageResult::succeeded(Stage::Download)
            .with_metadata(StageMetadata::default().with_path("a.pdf").with_hash("ABC"));
        row.record_outcome(&ok, now());
        assert_eq!(row.download.status, StageStatus::Success);
        assert_eq!(row.download.path.as_deref(), Some("a.pdf"));
        assert_eq!(row.download.hash.as_deref(), Some("ABC"));

        row.record_outcome(&StageResult::failed(Stage::Download), now());
        assert_eq!(row.download.status, StageStatus::Failed);
        assert_eq!(row.download.error, "download_failed");
        assert_eq!(row.download.path.as_deref(), Some("a.pdf"));
    }

    #[test]
    fn test_record_wayback_success_copies_capture_fields() {
        let mut row = PipelineRow::new("123", now());
        let meta = StageMetadata {
            url: Some("https://web.archive.org/web/2024/x".to_string()),
            archive_length: Some(1024),
            archive_status_code: Some("200".to_string()),
            ..Default::default()
        };
        row.record_outcome(&StageResult::succeeded(Stage::Wayback).with_metadata(meta), now());

        assert!(row.has_wayback_url());
        assert_eq!(row.wayback.archive_length, Some(1024));
        assert_eq!(row.wayback.archive_status_code, "200");
        assert_eq!(row.wayback.content_url, "");
    }

    #[test]
    fn test_record_archive_failure_keeps_identifier() {
        let mut row = PipelineRow::new("123", now());
        row.archive.identifier = "gr-123".to_string();
        row.record_outcome(
            &StageResult::failed(Stage::Archive).with_error("quota"),
            now(),
        );
        assert_eq!(row.archive.status, StageStatus::Failed);
        assert_eq!(row.archive.error, "quota");
        assert_eq!(row.archive.identifier, "gr-123");
    }

    #[test]
    fn test_record_hf_sync() {
        let mut row = PipelineRow::new("123", now());
        let meta = StageMetadata {
            path: Some("pdfs/2024/123.pdf".to_string()),
            backend: Some("lfs".to_string()),
            commit_hash: Some("deadbeef".to_string()),
            ..Default::default()
        };
        row.record_outcome(&StageResult::succeeded(Stage::Hf).with_metadata(meta), now());
        assert_eq!(row.hf.status, StageStatus::Success);
        assert_eq!(row.hf.synced_at_utc, Some(now()));
        assert_eq!(row.hf.backend.as_deref(), Some("lfs"));

        row.record_outcome(&StageResult::failed(Stage::Hf), now());
        assert_eq!(row.hf.error.as_deref(), Some("hf_sync_failed"));
    }
}
