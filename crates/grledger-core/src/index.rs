//! In-memory key index for one namespace.
//!
//! Maps every record key to the partition and row offset holding it. Updates
//! go through two steps: [`NamespaceIndex::stage`] validates a set of
//! rewritten partitions against the rest of the index without touching it,
//! and [`NamespaceIndex::apply`] installs the result. A collision therefore
//! leaves the index exactly as it was.

use crate::error::{LedgerError, Result};
use crate::model::LedgerRow;
use crate::partition::{Namespace, PartitionKey};
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordLocation {
    pub partition: PartitionKey,
    pub offset: usize,
}

/// Validated index entries for a set of rewritten partitions.
#[derive(Debug)]
pub struct IndexUpdate {
    replaced: HashSet<PartitionKey>,
    entries: HashMap<String, RecordLocation>,
}

#[derive(Debug, Clone)]
pub struct NamespaceIndex {
    namespace: Namespace,
    entries: HashMap<String, RecordLocation>,
}

impl NamespaceIndex {
    pub fn new(namespace: Namespace) -> Self {
        Self {
            namespace,
            entries: HashMap::new(),
        }
    }

    /// Builds an index over complete partition contents.
    pub fn build<'a, R: LedgerRow + 'a>(
        namespace: Namespace,
        partitions: impl IntoIterator<Item = (PartitionKey, &'a [R])>,
    ) -> Result<Self> {
        let mut index = Self::new(namespace);
        let update = index.stage(partitions)?;
        index.apply(update, std::iter::empty());
        Ok(index)
    }

    /// Computes entries for `partitions` as they will be after a rewrite.
    ///
    /// # Errors
    ///
    /// `DuplicateKey` if a key appears twice within the new contents, or if
    /// it is already indexed in a partition not being rewritten.
    pub fn stage<'a, R: LedgerRow + 'a>(
        &self,
        partitions: impl IntoIterator<Item = (PartitionKey, &'a [R])>,
    ) -> Result<IndexUpdate> {
        let partitions: Vec<(PartitionKey, &'a [R])> = partitions.into_iter().collect();
        let replaced: HashSet<PartitionKey> = partitions.iter().map(|(p, _)| *p).collect();
        let mut entries: HashMap<String, RecordLocation> = HashMap::new();

        for (partition, rows) in partitions {
            for (offset, row) in rows.iter().enumerate() {
                let key = row.record_key();
                let existing = entries.get(key).copied().or_else(|| {
                    self.entries
                        .get(key)
                        .filter(|loc| !replaced.contains(&loc.partition))
                        .copied()
                });
                if let Some(existing) = existing {
                    return Err(LedgerError::DuplicateKey {
                        namespace: self.namespace,
                        key: key.to_string(),
                        existing: existing.partition,
                        incoming: partition,
                    });
                }
                entries.insert(key.to_string(), RecordLocation { partition, offset });
            }
        }

        Ok(IndexUpdate { replaced, entries })
    }

    /// Installs a staged update. `stale_keys` are the keys the replaced
    /// partitions held before the rewrite.
    pub fn apply<'a>(&mut self, update: IndexUpdate, stale_keys: impl IntoIterator<Item = &'a str>) {
        for key in stale_keys {
            if self
                .entries
                .get(key)
                .is_some_and(|loc| update.replaced.contains(&loc.partition))
            {
                self.entries.remove(key);
            }
        }
        self.entries.extend(update.entries);
    }

    pub fn get(&self, key: &str) -> Option<RecordLocation> {
        self.entries.get(key).copied()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in sorted order.
    pub fn sorted_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}
