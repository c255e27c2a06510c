//! Gather to one root and ring allgather.

use super::{check_origin, check_root};
use crate::group::GroupCommunicator;
use crate::partition::Partition;
use crate::table::Table;
use crate::wire::FrameKind;
use chorus_common::Result;
use tracing::debug;

/// Collect every rank's partitions into `root`'s table.
///
/// Partitions from different ranks that share a key are merged with the
/// table's combiner: the root's own first, then peers in ascending rank.
/// Non-root tables are left as they were.
pub async fn gather(
    comm: &GroupCommunicator,
    op: &str,
    table: &mut Table,
    root: usize,
) -> Result<()> {
    let _guard = comm.begin(op)?;
    debug!(
        "rank {} gather '{}' of table {} to root {}",
        comm.rank(),
        op,
        table.id(),
        root
    );
    gather_phase(comm, op, table, root).await?;
    debug!("rank {} finished gather '{}'", comm.rank(), op);
    Ok(())
}

pub(crate) async fn gather_phase(
    comm: &GroupCommunicator,
    op: &str,
    table: &mut Table,
    root: usize,
) -> Result<()> {
    check_root(comm, root)?;
    let rank = comm.rank();

    if rank != root {
        let outgoing: Vec<&Partition> = table.partitions().collect();
        return comm
            .send_partitions(root, op, table.id(), FrameKind::Data, rank, &outgoing)
            .await;
    }

    let mut incoming = Vec::new();
    for peer in comm.membership().peers() {
        let frame = comm
            .recv_frame(op, peer, FrameKind::Data, table.id())
            .await?;
        check_origin(op, peer, frame.origin)?;
        incoming.extend(frame.partitions);
    }
    table.absorb(incoming)
}

/// Give every rank the union of all ranks' partitions.
///
/// Blocks travel around the ring `rank -> rank + 1`, so no rank relays more
/// than one block per step. Same-key partitions are merged in ascending
/// rank order on every rank, so all ranks end with identical tables.
pub async fn allgather(comm: &GroupCommunicator, op: &str, table: &mut Table) -> Result<()> {
    let _guard = comm.begin(op)?;
    debug!(
        "rank {} allgather '{}' of table {}",
        comm.rank(),
        op,
        table.id()
    );
    allgather_phase(comm, op, table).await?;
    debug!("rank {} finished allgather '{}'", comm.rank(), op);
    Ok(())
}

pub(crate) async fn allgather_phase(
    comm: &GroupCommunicator,
    op: &str,
    table: &mut Table,
) -> Result<()> {
    let size = comm.size();
    let rank = comm.rank();
    let left = comm.membership().left();
    let right = comm.membership().right();

    let mut blocks: Vec<Vec<Partition>> = vec![Vec::new(); size];
    blocks[rank] = table.snapshot();

    for step in 0..size.saturating_sub(1) {
        let send_origin = (rank + size - step) % size;
        let recv_origin = (rank + size - step - 1) % size;

        let outgoing: Vec<&Partition> = blocks[send_origin].iter().collect();
        let (_, frame) = tokio::try_join!(
            comm.send_partitions(right, op, table.id(), FrameKind::Data, send_origin, &outgoing),
            comm.recv_frame(op, left, FrameKind::Data, table.id()),
        )?;
        check_origin(op, recv_origin, frame.origin)?;
        blocks[recv_origin] = frame.partitions;
    }

    table.rebuild(blocks)
}
