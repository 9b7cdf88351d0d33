//! Typed rows for the three namespaces.
//!
//! Each namespace has its own row struct with the exact on-disk field names.
//! Rows reject unknown fields, so a typo or a schema drift in a partition file
//! surfaces as [`LedgerError::Corrupt`](crate::LedgerError::Corrupt) instead
//! of being carried along silently.

mod extraction;
mod identity;
mod pipeline;

pub use extraction::{ExtractionInfo, ExtractionRow, ExtractionStatus, FontInfo, LanguageInfo};
pub use identity::IdentityRow;
pub use pipeline::{
    ArchiveStage, DownloadStage, HfStage, MAX_STAGE_ATTEMPTS, PipelineRow, StageStatus,
    WaybackStage,
};

use crate::dates::Timestamp;
use crate::partition::Namespace;
use serde::Serialize;
use serde::de::DeserializeOwned;

/// A row stored in one namespace's partition files.
pub trait LedgerRow: Clone + Serialize + DeserializeOwned {
    const NAMESPACE: Namespace;

    fn record_key(&self) -> &str;

    fn created_at(&self) -> Timestamp;

    fn updated_at(&self) -> Option<Timestamp>;
}

impl LedgerRow for IdentityRow {
    const NAMESPACE: Namespace = Namespace::Identity;

    fn record_key(&self) -> &str {
        &self.record_key
    }

    fn created_at(&self) -> Timestamp {
        self.created_at_utc
    }

    fn updated_at(&self) -> Option<Timestamp> {
        Some(self.updated_at_utc)
    }
}

impl LedgerRow for PipelineRow {
    const NAMESPACE: Namespace = Namespace::Pipeline;

    fn record_key(&self) -> &str {
        &self.record_key
    }

    fn created_at(&self) -> Timestamp {
        self.created_at_utc
    }

    fn updated_at(&self) -> Option<Timestamp> {
        Some(self.updated_at_utc)
    }
}

impl LedgerRow for ExtractionRow {
    const NAMESPACE: Namespace = Namespace::Extraction;

    fn record_key(&self) -> &str {
        &self.record_key
    }

    fn created_at(&self) -> Timestamp {
        self.created_at_utc
    }

    fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at_utc
    }
}
