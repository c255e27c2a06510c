//! Defines partitioners that assign partition keys to owning ranks.

use std::fmt::Debug;
use std::hash::{DefaultHasher, Hash, Hasher};

/// Maps a partition key to the rank that owns it during a regroup.
pub trait Partitioner: Send + Sync + Debug {
    fn num_partitions(&self) -> usize;

    /// Owner of `key`, in `0..num_partitions()`.
    fn get_partition(&self, key: i32) -> usize;
}

/// `key mod n`, with negative keys wrapped into range.
#[derive(Clone, Debug)]
pub struct ModuloPartitioner {
    num_partitions: usize,
}

impl ModuloPartitioner {
    pub fn new(num_partitions: usize) -> Self {
        assert!(num_partitions > 0, "Number of partitions must be positive.");
        Self { num_partitions }
    }
}

impl Partitioner for ModuloPartitioner {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn get_partition(&self, key: i32) -> usize {
        (key as i64).rem_euclid(self.num_partitions as i64) as usize
    }
}

/// A partitioner that uses the seeded hash of the key to spread keys that
/// follow a stride pattern.
#[derive(Clone, Debug)]
pub struct HashPartitioner {
    num_partitions: usize,
    seed: u64,
}

impl HashPartitioner {
    pub fn new(num_partitions: usize) -> Self {
        Self::with_seed(num_partitions, 0)
    }

    pub fn with_seed(num_partitions: usize, seed: u64) -> Self {
        assert!(num_partitions > 0, "Number of partitions must be positive.");
        Self {
            num_partitions,
            seed,
        }
    }
}

impl Partitioner for HashPartitioner {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn get_partition(&self, key: i32) -> usize {
        // DefaultHasher::new() uses fixed keys, so every rank agrees.
        let mut hasher = DefaultHasher::new();
        self.seed.hash(&mut hasher);
        key.hash(&mut hasher);
        (hasher.finish() % self.num_partitions as u64) as usize
    }
}

/// A partitioner backed by a plain function.
#[derive(Clone, Debug)]
pub struct CustomPartitioner {
    num_partitions: usize,
    partition_func: fn(i32, usize) -> usize,
}

impl CustomPartitioner {
    /// `partition_func(key, num_partitions)` must return a value below
    /// `num_partitions`; larger values are wrapped.
    pub fn new(num_partitions: usize, partition_func: fn(i32, usize) -> usize) -> Self {
        assert!(num_partitions > 0, "Number of partitions must be positive.");
        Self {
            num_partitions,
            partition_func,
        }
    }
}

impl Partitioner for CustomPartitioner {
    fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    fn get_partition(&self, key: i32) -> usize {
        (self.partition_func)(key, self.num_partitions) % self.num_partitions
    }
}
