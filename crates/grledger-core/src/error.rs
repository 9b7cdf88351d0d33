//! Error type shared by every ledger operation.
//!
//! Each variant is fatal to the single operation that raised it: the store
//! never retries internally and never persists a partial result.

use crate::lifecycle::{LifecycleState, Stage};
use crate::partition::{Namespace, PartitionKey};
use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("record not found: {key}")]
    NotFound { key: String },

    #[error("duplicate record_key={key} in {namespace} partitions {existing} and {incoming}")]
    DuplicateKey {
        namespace: Namespace,
        key: String,
        existing: PartitionKey,
        incoming: PartitionKey,
    },

    #[error("cannot change immutable field {field} of record {key}")]
    ImmutableFieldViolation { key: String, field: &'static str },

    #[error("invalid transition for record {key}: {from} -> {to}")]
    InvalidTransition {
        key: String,
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("retry limit exceeded for record {key} stage {stage}")]
    RetryLimitExceeded { key: String, stage: Stage },

    #[error(
        "record {key} has pipeline or extraction rows in partition {from}; moving it to {to} is not supported"
    )]
    RepartitionUnsupported {
        key: String,
        from: PartitionKey,
        to: PartitionKey,
    },

    #[error("invalid patch for record {key:?}: {reason}")]
    InvalidPatch { key: String, reason: String },

    #[error("partition {partition} is excluded by this store's partition filter")]
    PartitionNotLoaded { partition: PartitionKey },

    #[error("{}:{}: malformed row: {}", .path.display(), .line, .message)]
    Corrupt {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LedgerError {
    /// True for the one error stage workers skip instead of failing the batch.
    pub fn is_retry_exhausted(&self) -> bool {
        matches!(self, LedgerError::RetryLimitExceeded { .. })
    }
}
