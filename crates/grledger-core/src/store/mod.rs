//! # Record Store
//!
//! [`RecordStore`] owns the three namespace tables of one ledger root and
//! is the only writer that keeps them consistent with each other:
//!
//! - a record key appears at most once per namespace;
//! - pipeline and extraction rows sit in the same partition as the
//!   identity row, which is the year of its `gr_date`;
//! - stage attempts never decrease and never exceed
//!   [`MAX_STAGE_ATTEMPTS`](crate::MAX_STAGE_ATTEMPTS);
//! - the lifecycle state only moves along legal transitions.
//!
//! Every mutating operation stages its changes on a private copy of the
//! affected partitions, validates them, and only then rewrites files. A
//! failing operation leaves both disk and memory unchanged. The store
//! assumes it is the only writer of its root directory.

mod batch;
mod stage;


use crate::config::LedgerConfig;
use crate::dates::{CrawlContext, Timestamp};
use crate::error::Result;
use crate::model::{ExtractionRow, IdentityRow, LedgerRow, PipelineRow};
use crate::partition::{Namespace, PartitionKey};
use crate::patch::RecordPatch;
use crate::record::{Record, compose};
use crate::safe_io::commit_all;
use crate::stage_result::StageResult;
use crate::table::NamespaceTable;
use batch::{Batch, StagedBatch};
use log::{debug, warn};
use serde::Serialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use strum::{AsRefStr, Display};

/// What a write did to the record's identity row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Operation {
    Inserted,
    Updated,
    /// Identity-only record moved to the partition of its new date.
    Moved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertResult {
    pub operation: Operation,
    pub partition: PartitionKey,
    pub key: String,
}

pub struct RecordStore {
    root: PathBuf,
    identity: NamespaceTable<IdentityRow>,
    pipeline: NamespaceTable<PipelineRow>,
    extraction: NamespaceTable<ExtractionRow>,
}

impl RecordStore {
    /// Opens the ledger described by `config`, loading and indexing every
    /// admitted partition.
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        let root = config.root_dir();
        let filter = config.partition_filter()?;
        let fsync = config.fsync_enabled();

        let store = Self {
            identity: NamespaceTable::open(&root, filter.clone(), fsync)?,
            pipeline: NamespaceTable::open(&root, filter.clone(), fsync)?,
            extraction: NamespaceTable::open(&root, filter, fsync)?,
            root,
        };
        store.warn_on_partition_mismatch();
        Ok(store)
    }

    /// Opens the ledger at `root` with default settings.
    pub fn open_dir(root: impl Into<PathBuf>) -> Result<Self> {
        Self::open(&LedgerConfig::with_root(root))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Reloads all three namespaces from disk.
    pub fn refresh(&mut self) -> Result<()> {
        self.identity.refresh()?;
        self.pipeline.refresh()?;
        self.extraction.refresh()?;
        self.warn_on_partition_mismatch();
        Ok(())
    }

    /// Re-reads one partition file after an out-of-band write.
    pub fn reindex_partition(&mut self, namespace: Namespace, partition: PartitionKey) -> Result<()> {
        match namespace {
            Namespace::Identity => self.identity.reindex_partition(partition),
            Namespace::Pipeline => self.pipeline.reindex_partition(partition),
            Namespace::Extraction => self.extraction.reindex_partition(partition),
        }
    }

    fn warn_on_partition_mismatch(&self) {
        let mismatched = mismatched_keys(&self.identity, &self.pipeline)
            + mismatched_keys(&self.identity, &self.extraction);
        if mismatched > 0 {
            warn!(
                "{} rows under {} sit in a different partition than their identity row",
                mismatched,
                self.root.display()
            );
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn exists(&self, key: &str) -> bool {
        self.identity.contains(key.trim())
    }

    pub fn find(&self, key: &str) -> Option<Record> {
        let key = key.trim();
        let identity = self.identity.get(key)?;
        Some(compose(
            identity,
            self.pipeline.get(key),
            self.extraction.get(key),
        ))
    }

    /// All records ordered by key. Each call starts over from the current
    /// index.
    pub fn iter_records(&self) -> impl Iterator<Item = Record> + '_ {
        self.identity
            .sorted_keys()
            .into_iter()
            .filter_map(move |key| self.find(key))
    }

    /// Partitions holding at least one row in any namespace, most recent
    /// year first. A partition file emptied by a move is not listed.
    pub fn list_partitions(&self) -> Vec<PartitionKey> {
        let partitions: BTreeSet<PartitionKey> = self
            .identity
            .partitions()
            .filter(|p| !self.identity.read_partition(*p).is_empty())
            .chain(
                self.pipeline
                    .partitions()
                    .filter(|p| !self.pipeline.read_partition(*p).is_empty()),
            )
            .chain(
                self.extraction
                    .partitions()
                    .filter(|p| !self.extraction.read_partition(*p).is_empty()),
            )
            .collect();
        partitions.into_iter().collect()
    }

    pub fn identity(&self) -> &NamespaceTable<IdentityRow> {
        &self.identity
    }

    pub fn pipeline(&self) -> &NamespaceTable<PipelineRow> {
        &self.pipeline
    }

    pub fn extraction(&self) -> &NamespaceTable<ExtractionRow> {
        &self.extraction
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Creates a record first seen by `crawl`.
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if the key exists. Pipeline and extraction rows are
    /// only written when the patch carries those parts.
    pub fn insert(&mut self, patch: &RecordPatch, crawl: &CrawlContext) -> Result<UpsertResult> {
        self.transact(|batch| batch.insert(patch, crawl))
    }

    /// Applies `patch` to an existing record.
    ///
    /// # Errors
    ///
    /// `NotFound`, `ImmutableFieldViolation`, and `RepartitionUnsupported`
    /// when a new `gr_date` would move a record that has pipeline or
    /// extraction rows.
    pub fn update(&mut self, patch: &RecordPatch) -> Result<UpsertResult> {
        self.transact(|batch| batch.update(patch, None))
    }

    /// Applies every patch, or none of them.
    pub fn update_many(&mut self, patches: &[RecordPatch]) -> Result<Vec<UpsertResult>> {
        let result = self.transact(|batch| {
            patches
                .iter()
                .map(|patch| batch.update(patch, None))
                .collect::<Result<Vec<_>>>()
        });
        if let Err(e) = &result {
            warn!("discarded batch of {} updates: {}", patches.len(), e);
        }
        result
    }

    /// Inserts the record if absent, else updates it. Monthly crawls advance
    /// `last_seen_crawl_date` when newer.
    pub fn upsert(&mut self, patch: &RecordPatch, crawl: &CrawlContext) -> Result<UpsertResult> {
        self.transact(|batch| batch.upsert(patch, crawl))
    }

    /// Records one stage attempt and advances the lifecycle state.
    ///
    /// # Errors
    ///
    /// `NotFound`; `RetryLimitExceeded` when the stage already used its
    /// attempts (nothing is changed); `InvalidTransition` when the outcome
    /// is not reachable from the current state.
    pub fn apply_stage_result(&mut self, key: &str, result: &StageResult) -> Result<UpsertResult> {
        self.transact(|batch| batch.apply_stage_result(key, result))
    }

    fn transact<T>(&mut self, op: impl FnOnce(&mut Batch<'_>) -> Result<T>) -> Result<T> {
        let mut batch = Batch::new(
            &self.identity,
            &self.pipeline,
            &self.extraction,
            Timestamp::now(),
        );
        let out = match op(&mut batch) {
            Ok(out) => out,
            Err(e) => {
                debug!("discarding staged changes: {}", e);
                return Err(e);
            }
        };
        let staged = batch.finish();
        self.commit(staged)?;
        Ok(out)
    }

    /// Validates staged partitions of all namespaces, then writes them.
    ///
    /// Every temporary file is written before any is renamed into place, so
    /// a failed write leaves disk and memory untouched. A failed rename
    /// reloads everything from disk, so memory matches whatever made it to
    /// storage.
    fn commit(&mut self, staged: StagedBatch) -> Result<()> {
        let identity = self.identity.prepare(staged.identity)?;
        let pipeline = self.pipeline.prepare(staged.pipeline)?;
        let extraction = self.extraction.prepare(staged.extraction)?;
        if identity.is_empty() && pipeline.is_empty() && extraction.is_empty() {
            return Ok(());
        }

        let mut pending = self.identity.stage_files(&identity)?;
        pending.extend(self.pipeline.stage_files(&pipeline)?);
        pending.extend(self.extraction.stage_files(&extraction)?);

        if let Err(e) = commit_all(pending) {
            warn!(
                "commit to {} failed, reloading from disk: {}",
                self.root.display(),
                e
            );
            if let Err(reload) = self.refresh() {
                warn!("reload of {} failed: {}", self.root.display(), reload);
            }
            return Err(e.into());
        }

        self.identity.install(identity);
        self.pipeline.install(pipeline);
        self.extraction.install(extraction);
        debug!("committed changes under {}", self.root.display());
        Ok(())
    }
}

fn mismatched_keys<R: LedgerRow>(
    identity: &NamespaceTable<IdentityRow>,
    other: &NamespaceTable<R>,
) -> usize {
    other
        .sorted_keys()
        .into_iter()
        .filter(|key| {
            let here = other.location(key).map(|loc| loc.partition);
            let owner = identity.location(key).map(|loc| loc.partition);
            owner.is_some() && here != owner
        })
        .count()
}
