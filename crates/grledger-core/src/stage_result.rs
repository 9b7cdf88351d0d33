//! Outcome reports sent by stage workers.

use crate::lifecycle::{Stage, StageOutcome};
use serde::{Deserialize, Serialize};

/// Stage-specific result fields.
///
/// Only the fields relevant to the reporting stage are read; a `None` field
/// leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StageMetadata {
    // download / hf
    pub path: Option<String>,
    pub hash: Option<String>,
    pub size: Option<u64>,
    // wayback / archive
    pub url: Option<String>,
    pub content_url: Option<String>,
    pub archive_time: Option<String>,
    pub archive_sha1: Option<String>,
    pub archive_length: Option<u64>,
    pub archive_mimetype: Option<String>,
    pub archive_status_code: Option<String>,
    pub identifier: Option<String>,
    // hf
    pub backend: Option<String>,
    pub commit_hash: Option<String>,
    /// Failure text, used when the report itself carries none.
    pub error: Option<String>,
}

impl StageMetadata {
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_hash(mut self, hash: impl Into<String>) -> Self {
        self.hash = Some(hash.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }
}

/// One attempt of one stage, as reported to
/// [`RecordStore::apply_stage_result`](crate::RecordStore::apply_stage_result).
#[derive(Debug, Clone, PartialEq)]
pub struct StageResult {
    pub stage: Stage,
    pub success: bool,
    pub metadata: StageMetadata,
    pub error: Option<String>,
    /// Whether a source document exists; only the archive stage reads it.
    pub has_document: bool,
    /// Overrides the wayback URL check for the archive stage.
    pub has_wayback_url: Option<bool>,
}

impl StageResult {
    pub fn succeeded(stage: Stage) -> Self {
        Self {
            stage,
            success: true,
            metadata: StageMetadata::default(),
            error: None,
            has_document: true,
            has_wayback_url: None,
        }
    }

    pub fn failed(stage: Stage) -> Self {
        Self {
            success: false,
            ..Self::succeeded(stage)
        }
    }

    pub fn with_metadata(mut self, metadata: StageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_document(mut self, has_document: bool) -> Self {
        self.has_document = has_document;
        self
    }

    pub fn with_wayback_url(mut self, has_wayback_url: bool) -> Self {
        self.has_wayback_url = Some(has_wayback_url);
        self
    }

    /// Error text to record on failure: the explicit error, then the
    /// metadata's, then the stage default. Blank strings don't count.
    pub fn failure_message(&self) -> String {
        [self.error.as_deref(), self.metadata.error.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|text| !text.is_empty())
            .unwrap_or_else(|| self.stage.default_error())
            .to_string()
    }

    pub(crate) fn outcome(&self, has_wayback_url: bool) -> StageOutcome {
        StageOutcome {
            success: self.success,
            has_document: self.has_document,
            has_wayback_url,
        }
    }
}
