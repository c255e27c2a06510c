//! Tree reduce and allreduce.

use super::broadcast::broadcast_phase;
use super::gather::allgather_phase;
use super::regroup::regroup_phase;
use super::{AllreduceAlgorithm, absolute_rank, binomial_tree, check_origin, check_root, relative_rank};
use crate::group::GroupCommunicator;
use crate::partition::Partition;
use crate::partitioner::ModuloPartitioner;
use crate::table::Table;
use crate::wire::FrameKind;
use chorus_common::Result;
use tracing::debug;

/// Reduce every rank's table into `root`'s along a binomial tree.
///
/// Each rank merges its own partitions first, then the partial results of
/// its children in ascending rank. Intermediate partial tables are dropped
/// once sent. Only the root's table changes.
pub async fn reduce(
    comm: &GroupCommunicator,
    op: &str,
    table: &mut Table,
    root: usize,
) -> Result<()> {
    let _guard = comm.begin(op)?;
    debug!(
        "rank {} reduce '{}' of table {} to root {}",
        comm.rank(),
        op,
        table.id(),
        root
    );
    reduce_phase(comm, op, table, root).await?;
    debug!("rank {} finished reduce '{}'", comm.rank(), op);
    Ok(())
}

pub(crate) async fn reduce_phase(
    comm: &GroupCommunicator,
    op: &str,
    table: &mut Table,
    root: usize,
) -> Result<()> {
    check_root(comm, root)?;
    let size = comm.size();
    let (parent, children) = binomial_tree(relative_rank(comm.rank(), root, size), size);

    let mut children: Vec<usize> = children
        .into_iter()
        .map(|child| absolute_rank(child, root, size))
        .collect();
    children.sort_unstable();

    let mut incoming = Vec::new();
    for child in children {
        let frame = comm
            .recv_frame(op, child, FrameKind::Data, table.id())
            .await?;
        check_origin(op, child, frame.origin)?;
        incoming.extend(frame.partitions);
    }

    match parent {
        None => table.absorb(incoming),
        Some(parent) => {
            let mut partial = table.duplicate();
            partial.absorb(incoming)?;
            let outgoing: Vec<&Partition> = partial.partitions().collect();
            comm.send_partitions(
                absolute_rank(parent, root, size),
                op,
                table.id(),
                FrameKind::Data,
                comm.rank(),
                &outgoing,
            )
            .await
        }
    }
}

/// Leave every rank holding the fully reduced table.
///
/// The combiner must be associative and commutative. Either algorithm
/// computes each key's reduction on exactly one rank and distributes that
/// result, so all ranks end with identical payloads regardless of network
/// arrival order.
pub async fn allreduce(
    comm: &GroupCommunicator,
    op: &str,
    table: &mut Table,
    algorithm: AllreduceAlgorithm,
) -> Result<()> {
    let _guard = comm.begin(op)?;
    debug!(
        "rank {} allreduce '{}' of table {} using {:?}",
        comm.rank(),
        op,
        table.id(),
        algorithm
    );

    let mut work = table.duplicate();
    match algorithm {
        AllreduceAlgorithm::RegroupAllgather => {
            let owners = ModuloPartitioner::new(comm.size());
            regroup_phase(comm, op, &mut work, &owners).await?;
            allgather_phase(comm, op, &mut work).await?;
        }
        AllreduceAlgorithm::ReduceBroadcast => {
            let leader = comm.leader();
            reduce_phase(comm, op, &mut work, leader).await?;
            broadcast_phase(comm, op, &mut work, leader).await?;
        }
    }
    table.replace_contents(work);

    debug!("rank {} finished allreduce '{}'", comm.rank(), op);
    Ok(())
}
