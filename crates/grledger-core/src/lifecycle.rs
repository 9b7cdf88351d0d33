//! # Lifecycle State Machine
//!
//! A record's overall pipeline position is derived from stage outcomes:
//!
//! ```text
//!             download ok                wayback ok
//! FETCHED ───────────────▶ DOWNLOAD_SUCCESS ─────────▶ WAYBACK_UPLOADED
//!    │  download failed          │  wayback failed            │ archive ok
//!    ├──────────▶ DOWNLOAD_FAILED  └──▶ WAYBACK_UPLOAD_FAILED   ▼
//!    │                 │                     │ archive ok   ARCHIVE_UPLOADED_WITH_WAYBACK_URL
//!    │   archive ok,   │                     ▼
//!    │   no document   │           ARCHIVE_UPLOADED_WITHOUT_WAYBACK_URL
//!    └─────────────────┴──▶ ARCHIVE_UPLOADED_WITHOUT_DOCUMENT ──▶ (download retry)
//! ```
//!
//! [`next_state`] is a pure function of the current state and the reported
//! outcome. [`validate_transition`] checks the result against the legality
//! table; staying in the same state is always legal.

use crate::error::{LedgerError, Result};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Default,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum LifecycleState {
    #[default]
    Fetched,
    DownloadSuccess,
    DownloadFailed,
    WaybackUploaded,
    WaybackUploadFailed,
    ArchiveUploadedWithWaybackUrl,
    ArchiveUploadedWithoutWaybackUrl,
    ArchiveUploadedWithoutDocument,
}

impl LifecycleState {
    pub const ALL: [LifecycleState; 8] = [
        LifecycleState::Fetched,
        LifecycleState::DownloadSuccess,
        LifecycleState::DownloadFailed,
        LifecycleState::WaybackUploaded,
        LifecycleState::WaybackUploadFailed,
        LifecycleState::ArchiveUploadedWithWaybackUrl,
        LifecycleState::ArchiveUploadedWithoutWaybackUrl,
        LifecycleState::ArchiveUploadedWithoutDocument,
    ];

    /// States other than `self` reachable in one step.
    pub fn allowed_targets(&self) -> &'static [LifecycleState] {
        use LifecycleState::*;
        match self {
            Fetched => &[DownloadSuccess, DownloadFailed, ArchiveUploadedWithoutDocument],
            // A second download attempt may reverse the first outcome.
            DownloadSuccess => &[
                DownloadFailed,
                WaybackUploaded,
                WaybackUploadFailed,
                ArchiveUploadedWithWaybackUrl,
                ArchiveUploadedWithoutWaybackUrl,
                ArchiveUploadedWithoutDocument,
            ],
            DownloadFailed => &[DownloadSuccess, ArchiveUploadedWithoutDocument],
            WaybackUploaded => &[ArchiveUploadedWithWaybackUrl],
            WaybackUploadFailed => &[ArchiveUploadedWithoutWaybackUrl],
            ArchiveUploadedWithWaybackUrl | ArchiveUploadedWithoutWaybackUrl => &[],
            // No-document archival can be retried once a document turns up.
            ArchiveUploadedWithoutDocument => &[
                DownloadSuccess,
                DownloadFailed,
                ArchiveUploadedWithWaybackUrl,
                ArchiveUploadedWithoutWaybackUrl,
            ],
        }
    }

    pub fn can_transition_to(&self, next: LifecycleState) -> bool {
        *self == next || self.allowed_targets().contains(&next)
    }

    /// True for states with no outgoing transition besides the self-loop.
    pub fn is_terminal(&self) -> bool {
        self.allowed_targets().is_empty()
    }

    /// True for the three archival end states.
    pub fn is_archived(&self) -> bool {
        matches!(
            self,
            LifecycleState::ArchiveUploadedWithWaybackUrl
                | LifecycleState::ArchiveUploadedWithoutWaybackUrl
                | LifecycleState::ArchiveUploadedWithoutDocument
        )
    }
}

/// One pipeline step with its own sub-object in the pipeline row.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    PartialOrd,
    Ord,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Stage {
    Download,
    Wayback,
    Archive,
    /// Remote dataset sync; never moves the lifecycle state.
    Hf,
}

impl Stage {
    pub const ALL: [Stage; 4] = [Stage::Download, Stage::Wayback, Stage::Archive, Stage::Hf];

    /// Error text recorded when a failure is reported without one.
    pub fn default_error(&self) -> &'static str {
        match self {
            Stage::Download => "download_failed",
            Stage::Wayback => "wayback_upload_failed",
            Stage::Archive => "archive_upload_failed",
            Stage::Hf => "hf_sync_failed",
        }
    }
}

/// Outcome flags that drive [`next_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageOutcome {
    pub success: bool,
    pub has_document: bool,
    pub has_wayback_url: bool,
}

/// Computes the state a record moves to after a stage reports `outcome`.
pub fn next_state(current: LifecycleState, stage: Stage, outcome: StageOutcome) -> LifecycleState {
    match stage {
        Stage::Download if outcome.success => LifecycleState::DownloadSuccess,
        Stage::Download => LifecycleState::DownloadFailed,
        Stage::Wayback if outcome.success => LifecycleState::WaybackUploaded,
        Stage::Wayback => LifecycleState::WaybackUploadFailed,
        Stage::Archive if !outcome.success => current,
        Stage::Archive if !outcome.has_document => LifecycleState::ArchiveUploadedWithoutDocument,
        Stage::Archive if outcome.has_wayback_url => LifecycleState::ArchiveUploadedWithWaybackUrl,
        Stage::Archive => LifecycleState::ArchiveUploadedWithoutWaybackUrl,
        Stage::Hf => current,
    }
}

/// Rejects `from -> to` unless the legality table allows it.
pub fn validate_transition(key: &str, from: LifecycleState, to: LifecycleState) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(LedgerError::InvalidTransition {
            key: key.to_string(),
            from,
            to,
        })
    }
}
