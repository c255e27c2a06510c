//! Common test utilities and helpers for integration tests

use chorus_core::{
    ChorusConfig, Combiner, GroupCommunicator, GroupMembership, LocalTransport, Partition, Table,
    WorkerContext,
};
use std::future::Future;

/// Run `f` once per rank of an in-memory group of `size` ranks led by rank 0
/// and return the results indexed by rank.
#[allow(dead_code)]
pub async fn run_group<F, Fut, R>(size: usize, f: F) -> Vec<R>
where
    F: Fn(GroupCommunicator) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    let mut handles = Vec::with_capacity(size);
    for (rank, transport) in LocalTransport::mesh(size).into_iter().enumerate() {
        let membership = GroupMembership::new(rank, size, 0).unwrap();
        let comm = GroupCommunicator::new(membership, transport).unwrap();
        handles.push(tokio::spawn(f(comm)));
    }

    let mut results = Vec::with_capacity(size);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

/// Like [`run_group`] but hands each rank a full [`WorkerContext`].
#[allow(dead_code)] // not every test binary uses contexts
pub async fn run_workers<F, Fut, R>(size: usize, f: F) -> Vec<R>
where
    F: Fn(WorkerContext) -> Fut,
    Fut: Future<Output = R> + Send + 'static,
    R: Send + 'static,
{
    let mut handles = Vec::with_capacity(size);
    for (rank, transport) in LocalTransport::mesh(size).into_iter().enumerate() {
        let ctx = WorkerContext::init(ChorusConfig::for_rank(rank, size), transport).unwrap();
        handles.push(tokio::spawn(f(ctx)));
    }

    let mut results = Vec::with_capacity(size);
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

/// A table holding one f64 partition per `(key, values)` pair.
#[allow(dead_code)]
pub fn f64_table(id: i32, combiner: Combiner, partitions: &[(i32, Vec<f64>)]) -> Table {
    let mut table = Table::new(id, combiner);
    for (key, values) in partitions {
        table
            .add_partition(Partition::new(*key, values.clone()))
            .unwrap();
    }
    table
}

/// `(key, values)` pairs of a table of f64 partitions, ascending by key.
#[allow(dead_code)]
pub fn f64_contents(table: &Table) -> Vec<(i32, Vec<f64>)> {
    table
        .partitions()
        .map(|p| (p.key(), p.values::<f64>().unwrap().to_vec()))
        .collect()
}
