//! Binomial-tree broadcast.

use super::{absolute_rank, barrier_phase, binomial_tree, check_origin, check_root, relative_rank};
use crate::group::GroupCommunicator;
use crate::partition::Partition;
use crate::table::Table;
use crate::wire::FrameKind;
use chorus_common::Result;
use tracing::debug;

/// Copy `root`'s table to every rank, then wait on a group barrier.
///
/// On non-root ranks the table contents are replaced by the root's. When
/// this returns on any rank, every rank has received the root's table.
pub async fn broadcast(
    comm: &GroupCommunicator,
    op: &str,
    table: &mut Table,
    root: usize,
) -> Result<()> {
    broadcast_with(comm, op, table, root, true).await
}

/// [`broadcast`] with the trailing barrier optional.
pub async fn broadcast_with(
    comm: &GroupCommunicator,
    op: &str,
    table: &mut Table,
    root: usize,
    barrier: bool,
) -> Result<()> {
    let _guard = comm.begin(op)?;
    debug!(
        "rank {} broadcast '{}' of table {} from root {}",
        comm.rank(),
        op,
        table.id(),
        root
    );
    let mut work = table.duplicate();
    broadcast_phase(comm, op, &mut work, root).await?;
    if barrier {
        barrier_phase(comm, op, table.id()).await?;
    }
    table.replace_contents(work);
    debug!("rank {} finished broadcast '{}'", comm.rank(), op);
    Ok(())
}

pub(crate) async fn broadcast_phase(
    comm: &GroupCommunicator,
    op: &str,
    table: &mut Table,
    root: usize,
) -> Result<()> {
    check_root(comm, root)?;
    let size = comm.size();
    let (parent, children) = binomial_tree(relative_rank(comm.rank(), root, size), size);

    let received = match parent {
        Some(parent) => {
            let parent = absolute_rank(parent, root, size);
            let frame = comm
                .recv_frame(op, parent, FrameKind::Data, table.id())
                .await?;
            check_origin(op, root, frame.origin)?;
            Some(frame.partitions)
        }
        None => None,
    };

    {
        let outgoing: Vec<&Partition> = match &received {
            Some(partitions) => partitions.iter().collect(),
            None => table.partitions().collect(),
        };
        for child in children {
            let child = absolute_rank(child, root, size);
            comm.send_partitions(child, op, table.id(), FrameKind::Data, root, &outgoing)
                .await?;
        }
    }

    if let Some(partitions) = received {
        table.rebuild(vec![partitions])?;
    }
    Ok(())
}
