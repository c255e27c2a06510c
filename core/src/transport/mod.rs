//! Point-to-point byte transport between the ranks of a group.
//!
//! Collectives only need a reliable, ordered `send(rank, bytes)` /
//! `receive(rank)` pair. Retries and reliability belong to the
//! implementation underneath.

use async_trait::async_trait;
use bytes::Bytes;
use chorus_common::{ChorusError, Result};
use std::fmt::Debug;

pub mod local;
pub mod tcp;

pub use local::LocalTransport;
pub use tcp::TcpTransport;

/// Reliable, ordered point-to-point channel to every other rank.
///
/// Messages between one ordered pair of ranks arrive in the order they were
/// sent. `receive(from)` must only be driven by one caller per peer at a
/// time.
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// This endpoint's rank.
    fn rank(&self) -> usize;

    /// Number of ranks reachable through this transport, including self.
    fn size(&self) -> usize;

    async fn send(&self, to: usize, payload: Bytes) -> Result<()>;

    async fn receive(&self, from: usize) -> Result<Bytes>;
}

pub(crate) fn check_peer(rank: usize, size: usize, peer: usize) -> Result<()> {
    if peer >= size || peer == rank {
        return Err(ChorusError::protocol_error(format!(
            "rank {} cannot address peer {} in a group of {}",
            rank, peer, size
        )));
    }
    Ok(())
}
