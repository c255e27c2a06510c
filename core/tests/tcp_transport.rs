//! Integration tests for collectives over real TCP connections

mod common;

use bytes::Bytes;
use chorus_core::collective::{allreduce, broadcast};
use chorus_core::{
    AllreduceAlgorithm, ChorusConfig, Combiner, GroupCommunicator, GroupMembership, TcpTransport,
    TransportConfig, Transport, WorkerContext,
};
use common::{f64_contents, f64_table};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_test::traced_test;

async fn bind_listeners(size: usize) -> (Vec<TcpListener>, Vec<SocketAddr>) {
    let mut listeners = Vec::with_capacity(size);
    let mut addrs = Vec::with_capacity(size);
    for _ in 0..size {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        addrs.push(listener.local_addr().unwrap());
        listeners.push(listener);
    }
    (listeners, addrs)
}

async fn tcp_mesh(size: usize) -> Vec<Arc<TcpTransport>> {
    let (listeners, addrs) = bind_listeners(size).await;
    let mut handles = Vec::with_capacity(size);
    for (rank, listener) in listeners.into_iter().enumerate() {
        let addrs = addrs.clone();
        handles.push(tokio::spawn(async move {
            TcpTransport::establish(rank, listener, &addrs, &TransportConfig::default())
                .await
                .unwrap()
        }));
    }

    let mut transports = Vec::with_capacity(size);
    for handle in handles {
        transports.push(Arc::new(handle.await.unwrap()));
    }
    transports
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_point_to_point_frames() {
    let mesh = tcp_mesh(2).await;
    assert_eq!(mesh[0].rank(), 0);
    assert_eq!(mesh[1].size(), 2);

    mesh[0].send(1, Bytes::from_static(b"ping")).await.unwrap();
    mesh[1].send(0, Bytes::from_static(b"pong")).await.unwrap();
    assert_eq!(mesh[1].receive(0).await.unwrap(), Bytes::from_static(b"ping"));
    assert_eq!(mesh[0].receive(1).await.unwrap(), Bytes::from_static(b"pong"));

    assert!(mesh[0].send(0, Bytes::new()).await.is_err());
    assert!(mesh[0].receive(5).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_allreduce_over_tcp() {
    let size = 3;
    let mut handles = Vec::new();
    for (rank, transport) in tcp_mesh(size).await.into_iter().enumerate() {
        handles.push(tokio::spawn(async move {
            let membership = GroupMembership::new(rank, size, 0).unwrap();
            let comm = GroupCommunicator::new(membership, transport).unwrap();

            let mut table = f64_table(
                0,
                Combiner::Sum,
                &[(0, vec![rank as f64]), (rank as i32 + 1, vec![1.0; 1000])],
            );
            allreduce(
                &comm,
                "allreduce-0",
                &mut table,
                AllreduceAlgorithm::RegroupAllgather,
            )
            .await
            .unwrap();

            let mut model = f64_table(1, Combiner::Sum, &[(rank as i32, vec![0.5])]);
            broadcast(&comm, "broadcast-1", &mut model, 1).await.unwrap();
            (f64_contents(&table), f64_contents(&model))
        }));
    }

    for handle in handles {
        let (table, model) = handle.await.unwrap();
        assert_eq!(
            table,
            vec![
                (0, vec![3.0]),
                (1, vec![1.0; 1000]),
                (2, vec![1.0; 1000]),
                (3, vec![1.0; 1000]),
            ]
        );
        assert_eq!(model, vec![(1, vec![0.5])]);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_worker_context_connects_from_config() {
    let size = 2;
    // Reserve two free ports, then release them for the workers to bind.
    let addrs = {
        let (_listeners, addrs) = bind_listeners(size).await;
        addrs
    };

    let mut handles = Vec::new();
    for rank in 0..size {
        let mut config = ChorusConfig::for_rank(rank, size);
        config.group.peers = addrs.clone();
        handles.push(tokio::spawn(async move {
            let ctx = WorkerContext::connect(config).await.unwrap();
            let mut table = f64_table(0, Combiner::Max, &[(7, vec![ctx.rank() as f64])]);
            ctx.allreduce(&mut table).await.unwrap();
            ctx.barrier().await.unwrap();
            f64_contents(&table)
        }));
    }

    for handle in handles {
        assert_eq!(handle.await.unwrap(), vec![(7, vec![1.0])]);
    }
}
