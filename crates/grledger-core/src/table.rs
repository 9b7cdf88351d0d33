//! # Namespace Tables
//!
//! A [`NamespaceTable`] owns one namespace directory: the cached rows of
//! every loaded partition file and the [`NamespaceIndex`] over them.
//!
//! Writes are split in three steps so the store can commit several
//! namespaces together:
//!
//! 1. [`prepare`](NamespaceTable::prepare) sorts the new partition contents
//!    and validates them against the index (no I/O, no mutation);
//! 2. [`stage_files`](NamespaceTable::stage_files) writes the new files
//!    next to the live ones; nothing is visible until the returned
//!    [`PendingWrite`]s are committed;
//! 3. [`install`](NamespaceTable::install) swaps the new rows and index
//!    entries into memory.
//!
//! Partitions left out by the filter are not cached, but their record keys
//! are, so a filtered table still refuses a key that exists elsewhere.

use crate::error::{LedgerError, Result};
use crate::index::{IndexUpdate, NamespaceIndex, RecordLocation};
use crate::jsonl::{read_jsonl_file, stage_jsonl_file};
use crate::model::LedgerRow;
use crate::partition::{Namespace, PARTITION_EXTENSION, PartitionKey};
use crate::safe_io::{PendingWrite, TEMP_SUFFIX, commit_all};
use log::{debug, info, warn};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Partition contents validated by [`NamespaceTable::prepare`].
#[derive(Debug)]
pub struct PreparedCommit<R> {
    partitions: BTreeMap<PartitionKey, Vec<R>>,
    update: IndexUpdate,
}

impl<R> PreparedCommit<R> {
    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }
}

#[derive(Debug)]
pub struct NamespaceTable<R> {
    dir: PathBuf,
    filter: Option<BTreeSet<PartitionKey>>,
    fsync: bool,
    partitions: BTreeMap<PartitionKey, Vec<R>>,
    index: NamespaceIndex,
    /// Record keys of the partitions the filter leaves out.
    excluded: HashMap<String, PartitionKey>,
}

/// Just the key of a row in a filtered-out partition.
#[derive(Deserialize)]
struct KeyRow {
    record_key: String,
}

impl<R: LedgerRow> NamespaceTable<R> {
    /// Opens `<root>/<namespace dir>`, creating it if needed, and loads every
    /// partition the filter admits.
    pub fn open(root: &Path, filter: Option<BTreeSet<PartitionKey>>, fsync: bool) -> Result<Self> {
        let dir = root.join(R::NAMESPACE.dir_name());
        fs::create_dir_all(&dir)?;
        let mut table = Self {
            dir,
            filter,
            fsync,
            partitions: BTreeMap::new(),
            index: NamespaceIndex::new(R::NAMESPACE),
            excluded: HashMap::new(),
        };
        table.refresh()?;
        Ok(table)
    }

    pub fn namespace(&self) -> Namespace {
        R::NAMESPACE
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn partition_path(&self, partition: PartitionKey) -> PathBuf {
        self.dir.join(partition.file_name())
    }

    /// True if the partition filter admits `partition`.
    pub fn is_loaded(&self, partition: PartitionKey) -> bool {
        self.filter
            .as_ref()
            .is_none_or(|filter| filter.contains(&partition))
    }

    fn ensure_loaded(&self, partition: PartitionKey) -> Result<()> {
        if self.is_loaded(partition) {
            Ok(())
        } else {
            Err(LedgerError::PartitionNotLoaded { partition })
        }
    }

    /// Re-reads every partition file and rebuilds the index.
    ///
    /// On error the previous in-memory state is kept.
    pub fn refresh(&mut self) -> Result<()> {
        let (loaded, skipped) = self.scan_partition_files()?;
        let mut partitions = BTreeMap::new();
        for partition in loaded {
            let rows: Vec<R> = read_jsonl_file(&self.partition_path(partition))?;
            partitions.insert(partition, rows);
        }

        let index = NamespaceIndex::build(
            R::NAMESPACE,
            partitions.iter().map(|(p, rows)| (*p, rows.as_slice())),
        )?;
        let excluded = self.read_excluded_keys(&skipped)?;
        check_excluded(
            &excluded,
            partitions.iter().map(|(p, rows)| (*p, rows.as_slice())),
        )?;
        info!(
            "indexed {} rows in {} partitions of {} ({} keys in {} filtered partitions)",
            index.len(),
            partitions.len(),
            R::NAMESPACE,
            excluded.len(),
            skipped.len()
        );
        self.partitions = partitions;
        self.index = index;
        self.excluded = excluded;
        Ok(())
    }

    /// Partition files on disk, split into loaded and filtered-out.
    fn scan_partition_files(&self) -> Result<(Vec<PartitionKey>, Vec<PartitionKey>)> {
        let mut loaded = Vec::new();
        let mut skipped = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with('.') && name.ends_with(TEMP_SUFFIX) {
                warn!(
                    "stale temp file {} (interrupted write?)",
                    entry.path().display()
                );
                continue;
            }
            let Some(stem) = name.strip_suffix(&format!(".{}", PARTITION_EXTENSION)) else {
                continue;
            };
            match stem.parse::<PartitionKey>() {
                Ok(partition) if self.is_loaded(partition) => loaded.push(partition),
                Ok(partition) => {
                    debug!("skipping filtered partition {} of {}", partition, R::NAMESPACE);
                    skipped.push(partition);
                }
                Err(e) => warn!("ignoring {}: {}", entry.path().display(), e),
            }
        }
        loaded.sort();
        skipped.sort();
        Ok((loaded, skipped))
    }

    fn read_excluded_keys(&self, skipped: &[PartitionKey]) -> Result<HashMap<String, PartitionKey>> {
        let mut excluded = HashMap::new();
        for &partition in skipped {
            let rows: Vec<KeyRow> = read_jsonl_file(&self.partition_path(partition))?;
            for row in rows {
                if let Some(existing) = excluded.insert(row.record_key.clone(), partition) {
                    return Err(LedgerError::DuplicateKey {
                        namespace: R::NAMESPACE,
                        key: row.record_key,
                        existing,
                        incoming: partition,
                    });
                }
            }
        }
        Ok(excluded)
    }

    /// Re-reads a single partition file and updates its index entries.
    pub fn reindex_partition(&mut self, partition: PartitionKey) -> Result<()> {
        self.ensure_loaded(partition)?;
        let rows: Vec<R> = read_jsonl_file(&self.partition_path(partition))?;
        let update = self
            .index
            .stage(std::iter::once((partition, rows.as_slice())))?;
        check_excluded(&self.excluded, std::iter::once((partition, rows.as_slice())))?;
        let stale = self.partitions.insert(partition, rows).unwrap_or_default();
        self.index
            .apply(update, stale.iter().map(|row| row.record_key()));
        Ok(())
    }

    /// Cached rows of `partition`, in file order. Empty if it has no file.
    pub fn read_partition(&self, partition: PartitionKey) -> &[R] {
        self.partitions
            .get(&partition)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Loaded partitions, most recent first.
    pub fn partitions(&self) -> impl Iterator<Item = PartitionKey> + '_ {
        self.partitions.keys().copied()
    }

    pub fn location(&self, key: &str) -> Option<RecordLocation> {
        self.index.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.index.contains(key)
    }

    /// Partition holding `key` when the filter leaves that partition out.
    pub fn excluded_partition(&self, key: &str) -> Option<PartitionKey> {
        self.excluded.get(key).copied()
    }

    pub fn get(&self, key: &str) -> Option<&R> {
        let loc = self.index.get(key)?;
        self.partitions.get(&loc.partition)?.get(loc.offset)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn sorted_keys(&self) -> Vec<&str> {
        self.index.sorted_keys()
    }

    /// Sorts and validates new contents for `partitions`.
    pub fn prepare(
        &self,
        mut partitions: BTreeMap<PartitionKey, Vec<R>>,
    ) -> Result<PreparedCommit<R>> {
        for (partition, rows) in partitions.iter_mut() {
            self.ensure_loaded(*partition)?;
            rows.sort_by(|a, b| a.record_key().cmp(b.record_key()));
        }
        let update = self
            .index
            .stage(partitions.iter().map(|(p, rows)| (*p, rows.as_slice())))?;
        check_excluded(
            &self.excluded,
            partitions.iter().map(|(p, rows)| (*p, rows.as_slice())),
        )?;
        Ok(PreparedCommit { partitions, update })
    }

    /// Writes every prepared partition to its temporary file.
    ///
    /// On error the temporary files written so far are removed.
    pub fn stage_files(&self, prepared: &PreparedCommit<R>) -> Result<Vec<PendingWrite>> {
        prepared
            .partitions
            .iter()
            .map(|(partition, rows)| {
                stage_jsonl_file(&self.partition_path(*partition), rows, self.fsync)
            })
            .collect()
    }

    /// Makes committed contents visible to readers.
    pub fn install(&mut self, prepared: PreparedCommit<R>) {
        let mut stale: Vec<R> = Vec::new();
        for (partition, rows) in prepared.partitions {
            if let Some(old) = self.partitions.insert(partition, rows) {
                stale.extend(old);
            }
        }
        self.index
            .apply(prepared.update, stale.iter().map(|row| row.record_key()));
    }

    /// Replaces one partition file with `rows` (sorted by key first).
    ///
    /// If the rename fails the table is reloaded from disk.
    pub fn write_partition(&mut self, partition: PartitionKey, rows: Vec<R>) -> Result<()> {
        let prepared = self.prepare(BTreeMap::from([(partition, rows)]))?;
        let pending = self.stage_files(&prepared)?;
        if let Err(e) = commit_all(pending) {
            warn!("write to {} {} failed: {}", R::NAMESPACE, partition, e);
            if let Err(reload) = self.refresh() {
                warn!("reloading {} failed: {}", R::NAMESPACE, reload);
            }
            return Err(e.into());
        }
        self.install(prepared);
        Ok(())
    }
}

/// Fails if a row in `partitions` reuses a key held by a filtered-out
/// partition.
fn check_excluded<'a, R: LedgerRow + 'a>(
    excluded: &HashMap<String, PartitionKey>,
    partitions: impl Iterator<Item = (PartitionKey, &'a [R])>,
) -> Result<()> {
    if excluded.is_empty() {
        return Ok(());
    }
    for (partition, rows) in partitions {
        for row in rows {
            if let Some(&existing) = excluded.get(row.record_key()) {
                return Err(LedgerError::DuplicateKey {
                    namespace: R::NAMESPACE,
                    key: row.record_key().to_string(),
                    existing,
                    incoming: partition,
                });
            }
        }
    }
    Ok(())
}
