//! Collective operations over [`Table`](crate::table::Table)s.
//!
//! Every operation is called by all ranks of the group with the same
//! operation name. The name routes frames, so it must be unique among the
//! operations in flight; [`WorkerContext::next_op_name`] produces such names
//! for iterative algorithms.
//!
//! Operations either fully apply to the caller's table or leave it
//! untouched: incoming partitions are staged and committed only after every
//! exchange of the operation succeeded.
//!
//! [`WorkerContext::next_op_name`]: crate::context::WorkerContext::next_op_name

use crate::group::GroupCommunicator;
use crate::wire::FrameKind;
use chorus_common::{ChorusError, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

pub mod broadcast;
pub mod gather;
pub mod reduce;
pub mod regroup;

pub use broadcast::{broadcast, broadcast_with};
pub use gather::{allgather, gather};
pub use reduce::{allreduce, reduce};
pub use regroup::{regroup, rotate};

/// Table id carried by frames of a standalone barrier.
pub const BARRIER_TABLE_ID: i32 = -1;

/// How allreduce reaches the fully reduced table on every rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllreduceAlgorithm {
    /// Each key is reduced by its owner rank, then owners exchange results
    /// around a ring. No rank handles more than its share of the keys.
    #[default]
    RegroupAllgather,
    /// Tree reduction to the leader followed by a tree broadcast.
    ReduceBroadcast,
}

/// Block until every rank of the group has entered the barrier.
pub async fn barrier(comm: &GroupCommunicator, op: &str) -> Result<()> {
    let _guard = comm.begin(op)?;
    debug!("rank {} entering barrier '{}'", comm.rank(), op);
    barrier_phase(comm, op, BARRIER_TABLE_ID).await?;
    debug!("rank {} left barrier '{}'", comm.rank(), op);
    Ok(())
}

/// Leader-coordinated barrier: every rank reports to the leader, which
/// releases all of them once the last report is in.
pub(crate) async fn barrier_phase(comm: &GroupCommunicator, op: &str, table_id: i32) -> Result<()> {
    let leader = comm.leader();
    if comm.size() == 1 {
        return Ok(());
    }

    if comm.rank() == leader {
        for peer in comm.membership().peers() {
            comm.recv_frame(op, peer, FrameKind::Barrier, table_id)
                .await?;
        }
        for peer in comm.membership().peers() {
            comm.send_control(peer, op, table_id, FrameKind::Release)
                .await?;
        }
    } else {
        comm.send_control(leader, op, table_id, FrameKind::Barrier)
            .await?;
        comm.recv_frame(op, leader, FrameKind::Release, table_id)
            .await?;
    }
    Ok(())
}

pub(crate) fn check_root(comm: &GroupCommunicator, root: usize) -> Result<()> {
    if root >= comm.size() {
        return Err(ChorusError::protocol_error(format!(
            "root {} is outside a group of {}",
            root,
            comm.size()
        )));
    }
    Ok(())
}

pub(crate) fn check_origin(op: &str, expected: usize, origin: u32) -> Result<()> {
    if origin as usize != expected {
        return Err(ChorusError::protocol_error(format!(
            "op '{}' expected partitions of rank {}, got rank {}",
            op, expected, origin
        )));
    }
    Ok(())
}

/// Position of `rank` in a tree rooted at `root`.
pub(crate) fn relative_rank(rank: usize, root: usize, size: usize) -> usize {
    (rank + size - root) % size
}

pub(crate) fn absolute_rank(relative: usize, root: usize, size: usize) -> usize {
    (relative + root) % size
}

/// Parent and children of `relative` in a binomial tree over `size` ranks
/// rooted at relative rank 0. Children come largest subtree first.
pub(crate) fn binomial_tree(relative: usize, size: usize) -> (Option<usize>, Vec<usize>) {
    let mut parent = None;
    let mut mask = 1;
    while mask < size {
        if relative & mask != 0 {
            parent = Some(relative - mask);
            break;
        }
        mask <<= 1;
    }

    let mut children = Vec::new();
    mask >>= 1;
    while mask > 0 {
        if relative + mask < size {
            children.push(relative + mask);
        }
        mask >>= 1;
    }
    (parent, children)
}
