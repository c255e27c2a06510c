//! Keyed collections of partitions bound to a reduction operator.

use crate::combiner::Combiner;
use crate::partition::{ElementKind, Partition, PartitionStatus};
use chorus_common::{ChorusError, Result};
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

/// An ordered-by-key collection of [`Partition`]s for one logical dataset.
///
/// Iteration is always in ascending key order. All partitions share one
/// element kind; the first partition inserted fixes it.
#[derive(Debug, Clone)]
pub struct Table {
    id: i32,
    combiner: Combiner,
    partitions: BTreeMap<i32, Partition>,
}

impl Table {
    pub fn new(id: i32, combiner: Combiner) -> Self {
        Self {
            id,
            combiner,
            partitions: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn combiner(&self) -> &Combiner {
        &self.combiner
    }

    /// Element kind shared by every partition, `None` while empty.
    pub fn kind(&self) -> Option<ElementKind> {
        self.partitions.values().next().map(Partition::kind)
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = i32> + '_ {
        self.partitions.keys().copied()
    }

    /// Partitions in ascending key order.
    pub fn partitions(&self) -> impl Iterator<Item = &Partition> + '_ {
        self.partitions.values()
    }

    pub fn get_partition(&self, key: i32) -> Option<&Partition> {
        self.partitions.get(&key)
    }

    pub fn get_partition_mut(&mut self, key: i32) -> Option<&mut Partition> {
        self.partitions.get_mut(&key)
    }

    /// Insert `partition`, combining it with the partition already stored at
    /// its key if there is one.
    ///
    /// Returns [`PartitionStatus::Normal`] for a fresh insert and
    /// [`PartitionStatus::Combined`] when the partition was merged.
    pub fn add_partition(&mut self, partition: Partition) -> Result<PartitionStatus> {
        if let Some(kind) = self.kind() {
            if kind != partition.kind() {
                return Err(ChorusError::type_mismatch(kind, partition.kind()));
            }
        }
        insert_or_combine(&self.combiner, &mut self.partitions, partition)
    }

    pub fn add_partitions<I>(&mut self, partitions: I) -> Result<()>
    where
        I: IntoIterator<Item = Partition>,
    {
        for partition in partitions {
            self.add_partition(partition)?;
        }
        Ok(())
    }

    /// Remove and release the partition at `key`.
    pub fn remove_partition(&mut self, key: i32) -> bool {
        match self.partitions.remove(&key) {
            Some(mut partition) => {
                partition.release();
                true
            }
            None => false,
        }
    }

    /// Remove the partition at `key` and hand it to the caller unreleased.
    pub fn take_partition(&mut self, key: i32) -> Option<Partition> {
        self.partitions.remove(&key)
    }

    /// Release every partition and clear the table. The table stays usable.
    pub fn release(&mut self) {
        for partition in self.partitions.values_mut() {
            partition.release();
        }
        self.partitions.clear();
    }

    /// Owned copies of all partitions in ascending key order.
    pub fn snapshot(&self) -> Vec<Partition> {
        self.partitions.values().cloned().collect()
    }

    /// An independent copy of this table, with the same id and operator.
    pub fn duplicate(&self) -> Table {
        self.clone()
    }

    /// Replace this table's partitions with those of `other`.
    ///
    /// The id and combiner of `self` are kept.
    pub fn replace_contents(&mut self, other: Table) {
        self.partitions = other.partitions;
    }

    /// Merge `incoming` into the table in order, all or nothing.
    ///
    /// Only the partitions whose keys collide are cloned for staging; if any
    /// merge fails the table is left exactly as it was.
    pub fn absorb(&mut self, incoming: Vec<Partition>) -> Result<()> {
        let mut kind = self.kind();
        let mut staged: BTreeMap<i32, Partition> = BTreeMap::new();

        for partition in incoming {
            match kind {
                Some(k) if k != partition.kind() => {
                    return Err(ChorusError::type_mismatch(k, partition.kind()));
                }
                None => kind = Some(partition.kind()),
                _ => {}
            }
            let key = partition.key();
            if !staged.contains_key(&key) {
                if let Some(existing) = self.partitions.get(&key) {
                    staged.insert(key, existing.clone());
                }
            }
            insert_or_combine(&self.combiner, &mut staged, partition)?;
        }

        self.partitions.extend(staged);
        Ok(())
    }

    /// Replace the contents with the fold of `blocks`, all or nothing.
    ///
    /// Blocks are folded in the order given, each block's partitions in their
    /// own order, so callers pass blocks in ascending peer rank to get a
    /// deterministic combine order.
    pub fn rebuild(&mut self, blocks: Vec<Vec<Partition>>) -> Result<()> {
        let mut kind: Option<ElementKind> = None;
        let mut rebuilt = BTreeMap::new();

        for partition in blocks.into_iter().flatten() {
            match kind {
                Some(k) if k != partition.kind() => {
                    return Err(ChorusError::type_mismatch(k, partition.kind()));
                }
                None => kind = Some(partition.kind()),
                _ => {}
            }
            insert_or_combine(&self.combiner, &mut rebuilt, partition)?;
        }

        self.partitions = rebuilt;
        Ok(())
    }
}

fn insert_or_combine(
    combiner: &Combiner,
    partitions: &mut BTreeMap<i32, Partition>,
    partition: Partition,
) -> Result<PartitionStatus> {
    match partitions.entry(partition.key()) {
        Entry::Vacant(slot) => {
            slot.insert(partition);
            Ok(PartitionStatus::Normal)
        }
        Entry::Occupied(mut slot) => {
            combiner.merge_into(slot.get_mut(), partition)?;
            Ok(PartitionStatus::Combined)
        }
    }
}
