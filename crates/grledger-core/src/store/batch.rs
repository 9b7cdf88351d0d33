//! Staged working copy for one store transaction.
//!
//! Every mutating store operation runs against a [`Batch`]: partitions it
//! writes are cloned from the live tables into per-namespace [`Staged`] sets
//! and modified there. The live tables are only read. Dropping the batch
//! discards everything; [`Batch::finish`] hands the modified partitions to
//! the store for commit.

use super::{Operation, UpsertResult};
use crate::dates::{CrawlContext, RunType, Timestamp};
use crate::error::{LedgerError, Result};
use crate::model::{ExtractionRow, IdentityRow, LedgerRow, PipelineRow};
use crate::partition::{Namespace, PartitionKey};
use crate::patch::RecordPatch;
use crate::table::NamespaceTable;
use std::collections::{BTreeMap, HashMap};

/// Modified partitions of one namespace.
pub(super) struct Staged<'t, R> {
    table: &'t NamespaceTable<R>,
    partitions: BTreeMap<PartitionKey, Vec<R>>,
    positions: HashMap<String, (PartitionKey, usize)>,
}

impl<'t, R: LedgerRow> Staged<'t, R> {
    fn new(table: &'t NamespaceTable<R>) -> Self {
        Self {
            table,
            partitions: BTreeMap::new(),
            positions: HashMap::new(),
        }
    }

    fn stage_partition(&mut self, partition: PartitionKey) {
        if self.partitions.contains_key(&partition) {
            return;
        }
        let rows = self.table.read_partition(partition).to_vec();
        for (offset, row) in rows.iter().enumerate() {
            self.positions
                .insert(row.record_key().to_string(), (partition, offset));
        }
        self.partitions.insert(partition, rows);
    }

    /// Current row for `key`, staged or live, with its partition.
    pub(super) fn find(&self, key: &str) -> Option<(PartitionKey, &R)> {
        if let Some(&(partition, offset)) = self.positions.get(key) {
            return self
                .partitions
                .get(&partition)
                .and_then(|rows| rows.get(offset))
                .map(|row| (partition, row));
        }
        let loc = self.table.location(key)?;
        if self.partitions.contains_key(&loc.partition) {
            return None;
        }
        self.table.get(key).map(|row| (loc.partition, row))
    }

    /// Partition of `key` when it lives outside the loaded partitions.
    pub(super) fn excluded(&self, key: &str) -> Option<PartitionKey> {
        self.table.excluded_partition(key)
    }

    /// Error for a key with no loaded row: `PartitionNotLoaded` if the
    /// filter hides it, `NotFound` otherwise.
    pub(super) fn missing(&self, key: &str) -> LedgerError {
        match self.excluded(key) {
            Some(partition) => LedgerError::PartitionNotLoaded { partition },
            None => LedgerError::NotFound {
                key: key.to_string(),
            },
        }
    }

    /// Places `row` in `partition`, replacing or moving any existing row
    /// with the same key.
    pub(super) fn put(&mut self, partition: PartitionKey, row: R) -> Result<()> {
        if !self.table.is_loaded(partition) {
            return Err(LedgerError::PartitionNotLoaded { partition });
        }
        let key = row.record_key().to_string();
        if let Some(loc) = self.table.location(&key) {
            self.stage_partition(loc.partition);
        }
        self.stage_partition(partition);

        match self.positions.get(&key).copied() {
            Some((current, offset)) if current == partition => {
                if let Some(slot) = self
                    .partitions
                    .get_mut(&current)
                    .and_then(|rows| rows.get_mut(offset))
                {
                    *slot = row;
                }
            }
            Some((current, offset)) => {
                self.remove_at(current, offset);
                self.push(partition, key, row);
            }
            None => self.push(partition, key, row),
        }
        Ok(())
    }

    fn remove_at(&mut self, partition: PartitionKey, offset: usize) {
        let Some(rows) = self.partitions.get_mut(&partition) else {
            return;
        };
        if offset >= rows.len() {
            return;
        }
        let removed = rows.swap_remove(offset);
        self.positions.remove(removed.record_key());
        if let Some(moved) = rows.get(offset) {
            self.positions
                .insert(moved.record_key().to_string(), (partition, offset));
        }
    }

    fn push(&mut self, partition: PartitionKey, key: String, row: R) {
        let rows = self.partitions.entry(partition).or_default();
        rows.push(row);
        self.positions.insert(key, (partition, rows.len() - 1));
    }
}

/// Staged partition contents of a finished batch.
pub(super) struct StagedBatch {
    pub(super) identity: BTreeMap<PartitionKey, Vec<IdentityRow>>,
    pub(super) pipeline: BTreeMap<PartitionKey, Vec<PipelineRow>>,
    pub(super) extraction: BTreeMap<PartitionKey, Vec<ExtractionRow>>,
}

pub(super) struct Batch<'t> {
    pub(super) identity: Staged<'t, IdentityRow>,
    pub(super) pipeline: Staged<'t, PipelineRow>,
    pub(super) extraction: Staged<'t, ExtractionRow>,
    pub(super) now: Timestamp,
}

impl<'t> Batch<'t> {
    pub(super) fn new(
        identity: &'t NamespaceTable<IdentityRow>,
        pipeline: &'t NamespaceTable<PipelineRow>,
        extraction: &'t NamespaceTable<ExtractionRow>,
        now: Timestamp,
    ) -> Self {
        Self {
            identity: Staged::new(identity),
            pipeline: Staged::new(pipeline),
            extraction: Staged::new(extraction),
            now,
        }
    }

    pub(super) fn finish(self) -> StagedBatch {
        StagedBatch {
            identity: self.identity.partitions,
            pipeline: self.pipeline.partitions,
            extraction: self.extraction.partitions,
        }
    }

    pub(super) fn insert(
        &mut self,
        patch: &RecordPatch,
        crawl: &CrawlContext,
    ) -> Result<UpsertResult> {
        let key = patch.key()?;
        let mut row = IdentityRow::new(key, crawl, self.now);
        patch.apply_to_new_identity(&mut row)?;
        let partition = row.partition();

        let existing = self
            .identity
            .find(key)
            .map(|(p, _)| p)
            .or_else(|| self.identity.excluded(key));
        if let Some(existing) = existing {
            return Err(LedgerError::DuplicateKey {
                namespace: Namespace::Identity,
                key: key.to_string(),
                existing,
                incoming: partition,
            });
        }
        self.check_companions(key, partition)?;

        let created_at = row.created_at_utc;
        self.identity.put(partition, row)?;
        self.write_companions(key, patch, partition, created_at)?;

        Ok(UpsertResult {
            operation: Operation::Inserted,
            partition,
            key: key.to_string(),
        })
    }

    /// Applies `patch` to a stored record. With a monthly `crawl`, the
    /// last-seen date advances if the crawl is newer.
    pub(super) fn update(
        &mut self,
        patch: &RecordPatch,
        crawl: Option<&CrawlContext>,
    ) -> Result<UpsertResult> {
        let key = patch.key()?;
        let (current, stored) = self
            .identity
            .find(key)
            .ok_or_else(|| self.identity.missing(key))?;
        let mut row = stored.clone();

        let mut changed = patch.apply_to_identity(&mut row)?;
        if let Some(crawl) = crawl
            && crawl.run_type == RunType::Monthly
        {
            changed |= row.mark_seen(crawl.crawl_date);
        }
        if changed {
            row.updated_at_utc = self.now;
        }

        let target = row.partition();
        self.check_companions(key, target)?;

        let created_at = row.created_at_utc;
        if changed || target != current {
            self.identity.put(target, row)?;
        }
        self.write_companions(key, patch, target, created_at)?;

        Ok(UpsertResult {
            operation: if target != current {
                Operation::Moved
            } else {
                Operation::Updated
            },
            partition: target,
            key: key.to_string(),
        })
    }

    pub(super) fn upsert(
        &mut self,
        patch: &RecordPatch,
        crawl: &CrawlContext,
    ) -> Result<UpsertResult> {
        let key = patch.key()?;
        if self.identity.find(key).is_some() || self.identity.excluded(key).is_some() {
            self.update(patch, Some(crawl))
        } else {
            self.insert(patch, crawl)
        }
    }

    /// Fails if a pipeline or extraction row for `key` lives outside
    /// `partition`; those rows are never moved.
    fn check_companions(&self, key: &str, partition: PartitionKey) -> Result<()> {
        let existing = [
            self.pipeline
                .find(key)
                .map(|(p, _)| p)
                .or_else(|| self.pipeline.excluded(key)),
            self.extraction
                .find(key)
                .map(|(p, _)| p)
                .or_else(|| self.extraction.excluded(key)),
        ];
        for from in existing.into_iter().flatten() {
            if from != partition {
                return Err(LedgerError::RepartitionUnsupported {
                    key: key.to_string(),
                    from,
                    to: partition,
                });
            }
        }
        Ok(())
    }

    fn write_companions(
        &mut self,
        key: &str,
        patch: &RecordPatch,
        partition: PartitionKey,
        created_at: Timestamp,
    ) -> Result<()> {
        if let Some(pipeline_patch) = &patch.pipeline {
            let mut row = self
                .pipeline
                .find(key)
                .map(|(_, row)| row.clone())
                .unwrap_or_else(|| PipelineRow::new(key, created_at));
            pipeline_patch.apply(&mut row)?;
            row.updated_at_utc = self.now;
            self.pipeline.put(partition, row)?;
        }

        if let Some(info) = &patch.extraction {
            let created = self
                .extraction
                .find(key)
                .map(|(_, row)| row.created_at_utc)
                .unwrap_or(created_at);
            let row = ExtractionRow::from_info(key, info, created, self.now);
            self.extraction.put(partition, row)?;
        }
        Ok(())
    }
}
