//! WorkerContext - explicit per-worker runtime handle
//!
//! Everything a worker needs for one computation phase (configuration,
//! group communicator, event queue) hangs off one value that the
//! application creates, passes around, and shuts down.

use crate::collective::{self, AllreduceAlgorithm};
use crate::config::ChorusConfig;
use crate::event_queue::EventQueue;
use crate::group::GroupCommunicator;
use crate::partitioner::Partitioner;
use crate::scheduler::{DynamicScheduler, Task};
use crate::table::Table;
use crate::transport::{TcpTransport, Transport};
use chorus_common::{ChorusError, ErrorContext, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::net::TcpListener;
use tracing::info;
use uuid::Uuid;

/// Runtime handle of one worker.
///
/// The collective helpers name each call `"<collective>-<n>"` from a shared
/// counter, so every rank must issue the same sequence of calls.
#[derive(Debug)]
pub struct WorkerContext {
    id: Uuid,
    config: ChorusConfig,
    comm: GroupCommunicator,
    events: Arc<EventQueue>,
    op_counter: AtomicU64,
}

impl WorkerContext {
    /// Build a context over an already connected transport.
    ///
    /// Must be called from within a tokio runtime.
    pub fn init(config: ChorusConfig, transport: Arc<dyn Transport>) -> Result<Self> {
        config.validate()?;
        let comm = GroupCommunicator::new(config.membership()?, transport)?;
        let id = Uuid::new_v4();
        info!(
            "worker {} initialized as rank {} of {} (leader {})",
            id,
            comm.rank(),
            comm.size(),
            comm.leader()
        );
        Ok(Self {
            id,
            config,
            comm,
            events: Arc::new(EventQueue::new()),
            op_counter: AtomicU64::new(0),
        })
    }

    /// Listen on this rank's peer address and connect to every other rank
    /// over TCP.
    pub async fn connect(config: ChorusConfig) -> Result<Self> {
        config.validate()?;
        let group = &config.group;
        let addr = *group.peers.get(group.rank).ok_or_else(|| {
            ChorusError::configuration_error("tcp transport needs one peer address per rank")
        })?;
        let listener = TcpListener::bind(addr)
            .await
            .with_communication_context(|| format!("bind {}", addr))?;
        let transport =
            TcpTransport::establish(group.rank, listener, &group.peers, &config.transport).await?;
        Self::init(config, Arc::new(transport))
    }

    /// Unique id of this worker instance, used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn config(&self) -> &ChorusConfig {
        &self.config
    }

    pub fn communicator(&self) -> &GroupCommunicator {
        &self.comm
    }

    pub fn rank(&self) -> usize {
        self.comm.rank()
    }

    pub fn size(&self) -> usize {
        self.comm.size()
    }

    pub fn leader(&self) -> usize {
        self.comm.leader()
    }

    pub fn is_leader(&self) -> bool {
        self.comm.membership().is_leader()
    }

    /// Queue shared by this worker's computation and communication threads.
    pub fn events(&self) -> &Arc<EventQueue> {
        &self.events
    }

    /// Next operation name for `prefix`, e.g. `"allgather-3"`.
    pub fn next_op_name(&self, prefix: &str) -> String {
        let n = self.op_counter.fetch_add(1, Ordering::Relaxed);
        format!("{}-{}", prefix, n)
    }

    pub fn num_threads(&self) -> usize {
        self.config.scheduler.num_threads
    }

    /// A scheduler over `tasks`, typically `num_threads()` of them.
    pub fn scheduler<I, O, T>(&self, tasks: Vec<T>) -> DynamicScheduler<I, O, T>
    where
        I: Send + 'static,
        O: Send + 'static,
        T: Task<I, O> + 'static,
    {
        DynamicScheduler::new(tasks)
    }

    pub async fn broadcast(&self, table: &mut Table, root: usize) -> Result<()> {
        let op = self.next_op_name("broadcast");
        let barrier = self.config.collective.broadcast_barrier;
        collective::broadcast_with(&self.comm, &op, table, root, barrier).await
    }

    pub async fn gather(&self, table: &mut Table, root: usize) -> Result<()> {
        let op = self.next_op_name("gather");
        collective::gather(&self.comm, &op, table, root).await
    }

    pub async fn allgather(&self, table: &mut Table) -> Result<()> {
        let op = self.next_op_name("allgather");
        collective::allgather(&self.comm, &op, table).await
    }

    pub async fn reduce(&self, table: &mut Table, root: usize) -> Result<()> {
        let op = self.next_op_name("reduce");
        collective::reduce(&self.comm, &op, table, root).await
    }

    /// Allreduce with the configured algorithm.
    pub async fn allreduce(&self, table: &mut Table) -> Result<()> {
        self.allreduce_with(table, self.config.collective.allreduce)
            .await
    }

    pub async fn allreduce_with(
        &self,
        table: &mut Table,
        algorithm: AllreduceAlgorithm,
    ) -> Result<()> {
        let op = self.next_op_name("allreduce");
        collective::allreduce(&self.comm, &op, table, algorithm).await
    }

    pub async fn regroup(&self, table: &mut Table, partitioner: &dyn Partitioner) -> Result<()> {
        let op = self.next_op_name("regroup");
        collective::regroup(&self.comm, &op, table, partitioner).await
    }

    pub async fn rotate(&self, table: &mut Table) -> Result<()> {
        let op = self.next_op_name("rotate");
        collective::rotate(&self.comm, &op, table).await
    }

    pub async fn barrier(&self) -> Result<()> {
        let op = self.next_op_name("barrier");
        collective::barrier(&self.comm, &op).await
    }

    /// Stop routing peer frames. Collectives fail afterwards.
    pub fn shutdown(&self) {
        info!("worker {} (rank {}) shutting down", self.id, self.rank());
        self.comm.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalTransport;

    #[tokio::test]
    async fn test_single_rank_context() {
        let mesh = LocalTransport::mesh(1);
        let ctx = WorkerContext::init(ChorusConfig::for_rank(0, 1), mesh[0].clone()).unwrap();
        assert!(ctx.is_leader());
        assert_eq!(ctx.next_op_name("allreduce"), "allreduce-0");
        assert_eq!(ctx.next_op_name("broadcast"), "broadcast-1");

        let mut table = Table::new(0, crate::Combiner::Sum);
        table
            .add_partition(crate::Partition::new(0, vec![2.0f64]))
            .unwrap();
        ctx.allreduce(&mut table).await.unwrap();
        ctx.broadcast(&mut table, 0).await.unwrap();
        assert_eq!(
            table.get_partition(0).unwrap().values::<f64>().unwrap(),
            &[2.0]
        );
        ctx.shutdown();
    }

    #[tokio::test]
    async fn test_mismatched_transport_is_rejected() {
        let mesh = LocalTransport::mesh(2);
        let err = WorkerContext::init(ChorusConfig::for_rank(0, 3), mesh[0].clone()).unwrap_err();
        assert!(matches!(err, ChorusError::Configuration { .. }));
    }

    #[test]
    fn test_init_outside_runtime_is_rejected() {
        let mesh = LocalTransport::mesh(1);
        let err = WorkerContext::init(ChorusConfig::for_rank(0, 1), mesh[0].clone()).unwrap_err();
        assert!(matches!(err, ChorusError::InvalidState { .. }));
    }
}
