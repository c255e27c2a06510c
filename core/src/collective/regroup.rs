//! Key-owner regroup and ring rotation.

use super::check_origin;
use crate::group::GroupCommunicator;
use crate::partition::Partition;
use crate::partitioner::Partitioner;
use crate::table::Table;
use crate::wire::FrameKind;
use chorus_common::{ChorusError, Result};
use futures::future::try_join_all;
use tracing::debug;

/// Move every partition to the rank `partitioner` assigns its key to.
///
/// Afterwards each rank holds exactly the keys it owns, with partitions
/// that arrived from several ranks merged in ascending source rank.
pub async fn regroup(
    comm: &GroupCommunicator,
    op: &str,
    table: &mut Table,
    partitioner: &dyn Partitioner,
) -> Result<()> {
    let _guard = comm.begin(op)?;
    debug!(
        "rank {} regroup '{}' of table {} with {:?}",
        comm.rank(),
        op,
        table.id(),
        partitioner
    );
    regroup_phase(comm, op, table, partitioner).await?;
    debug!("rank {} finished regroup '{}'", comm.rank(), op);
    Ok(())
}

pub(crate) async fn regroup_phase(
    comm: &GroupCommunicator,
    op: &str,
    table: &mut Table,
    partitioner: &dyn Partitioner,
) -> Result<()> {
    let size = comm.size();
    let rank = comm.rank();
    if partitioner.num_partitions() != size {
        return Err(ChorusError::protocol_error(format!(
            "regroup '{}' needs one partition per rank ({}), partitioner has {}",
            op,
            size,
            partitioner.num_partitions()
        )));
    }

    let mut outgoing: Vec<Vec<&Partition>> = vec![Vec::new(); size];
    for partition in table.partitions() {
        let owner = partitioner.get_partition(partition.key());
        if owner >= size {
            return Err(ChorusError::protocol_error(format!(
                "regroup '{}' assigned key {} to rank {} in a group of {}",
                op,
                partition.key(),
                owner,
                size
            )));
        }
        outgoing[owner].push(partition);
    }
    let kept: Vec<Partition> = outgoing[rank].iter().map(|p| (*p).clone()).collect();

    // Every peer gets a frame, empty or not, so receivers know when they
    // have heard from everyone.
    let table_id = table.id();
    let sends = comm.membership().peers().map(|peer| {
        comm.send_partitions(peer, op, table_id, FrameKind::Data, rank, &outgoing[peer])
    });
    let receives = comm
        .membership()
        .peers()
        .map(|peer| comm.recv_frame(op, peer, FrameKind::Data, table_id));
    let (_, frames) = tokio::try_join!(try_join_all(sends), try_join_all(receives))?;

    let mut blocks: Vec<Vec<Partition>> = vec![Vec::new(); size];
    blocks[rank] = kept;
    for (peer, frame) in comm.membership().peers().zip(frames) {
        check_origin(op, peer, frame.origin)?;
        blocks[peer] = frame.partitions;
    }
    table.rebuild(blocks)
}

/// Hand this rank's table to the next rank on the ring and take over the
/// previous rank's table.
pub async fn rotate(comm: &GroupCommunicator, op: &str, table: &mut Table) -> Result<()> {
    let _guard = comm.begin(op)?;
    debug!(
        "rank {} rotate '{}' of table {}",
        comm.rank(),
        op,
        table.id()
    );
    rotate_phase(comm, op, table).await?;
    debug!("rank {} finished rotate '{}'", comm.rank(), op);
    Ok(())
}

pub(crate) async fn rotate_phase(comm: &GroupCommunicator, op: &str, table: &mut Table) -> Result<()> {
    if comm.size() == 1 {
        return Ok(());
    }
    let left = comm.membership().left();
    let right = comm.membership().right();

    let outgoing: Vec<&Partition> = table.partitions().collect();
    let (_, frame) = tokio::try_join!(
        comm.send_partitions(right, op, table.id(), FrameKind::Data, comm.rank(), &outgoing),
        comm.recv_frame(op, left, FrameKind::Data, table.id()),
    )?;
    check_origin(op, left, frame.origin)?;
    table.rebuild(vec![frame.partitions])
}
