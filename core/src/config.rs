//! Worker configuration.
//!
//! A worker is started with its rank, the group size and the leader rank by
//! whatever launches it. Everything else has defaults, so a JSON document
//! only needs to name what differs.

use crate::collective::AllreduceAlgorithm;
use crate::group::GroupMembership;
use crate::wire::MAX_FRAME_BYTES;
use chorus_common::{ChorusError, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;

/// Top-level configuration of one worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChorusConfig {
    pub group: GroupConfig,
    pub transport: TransportConfig,
    pub scheduler: SchedulerConfig,
    pub collective: CollectiveConfig,
}

/// Group membership handed to the worker at bootstrap.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupConfig {
    /// Zero-based rank of this worker
    pub rank: usize,
    /// Number of workers in the group
    pub size: usize,
    /// Rank of the group leader
    pub leader: usize,
    /// Listen address of every rank, indexed by rank. Empty when the
    /// transport is supplied directly.
    pub peers: Vec<SocketAddr>,
}

/// Connection settings for the TCP transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// How many times to retry dialing a peer that is not listening yet
    pub connect_retries: u32,
    /// Pause between dial attempts in milliseconds
    pub retry_interval_ms: u64,
    /// Largest frame accepted from a peer
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Default number of task instances for a worker's scheduler
    pub num_threads: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectiveConfig {
    /// Algorithm used by allreduce
    pub allreduce: AllreduceAlgorithm,
    /// Whether broadcast ends with a group barrier
    pub broadcast_barrier: bool,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            rank: 0,
            size: 1,
            leader: 0,
            peers: Vec::new(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_retries: 30,
            retry_interval_ms: 200,
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            num_threads: num_cpus::get(),
        }
    }
}

impl Default for CollectiveConfig {
    fn default() -> Self {
        Self {
            allreduce: AllreduceAlgorithm::default(),
            broadcast_barrier: true,
        }
    }
}

impl ChorusConfig {
    /// Configuration for `rank` in a group of `size` led by rank 0.
    pub fn for_rank(rank: usize, size: usize) -> Self {
        Self {
            group: GroupConfig {
                rank,
                size,
                ..GroupConfig::default()
            },
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ChorusConfig = serde_json::from_str(json)
            .with_configuration_context(|| "parse configuration json".to_string())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_configuration_context(|| format!("read configuration {}", path.display()))?;
        Self::from_json_str(&json)
    }

    /// Check the group settings for consistency.
    pub fn validate(&self) -> Result<()> {
        let group = &self.group;
        if group.size == 0 {
            return Err(ChorusError::configuration_error("group size must be positive"));
        }
        if group.rank >= group.size {
            return Err(ChorusError::configuration_error(format!(
                "rank {} is outside a group of {}",
                group.rank, group.size
            )));
        }
        if group.leader >= group.size {
            return Err(ChorusError::configuration_error(format!(
                "leader {} is outside a group of {}",
                group.leader, group.size
            )));
        }
        if !group.peers.is_empty() && group.peers.len() != group.size {
            return Err(ChorusError::configuration_error(format!(
                "expected {} peer addresses, got {}",
                group.size,
                group.peers.len()
            )));
        }
        if self.transport.max_frame_bytes == 0 || self.transport.max_frame_bytes > MAX_FRAME_BYTES {
            return Err(ChorusError::configuration_error(format!(
                "max_frame_bytes must be between 1 and {}, got {}",
                MAX_FRAME_BYTES, self.transport.max_frame_bytes
            )));
        }
        if self.scheduler.num_threads == 0 {
            return Err(ChorusError::configuration_error(
                "scheduler needs at least one thread",
            ));
        }
        Ok(())
    }

    pub fn membership(&self) -> Result<GroupMembership> {
        GroupMembership::new(self.group.rank, self.group.size, self.group.leader)
    }
}
