//! Chorus Core - collective communication and dynamic task scheduling
//!
//! Workers of a group keep their state in keyed, typed [`Table`]s and
//! synchronize them with collective operations (broadcast, gather,
//! allgather, reduce, allreduce, regroup). Inside one worker, the
//! [`DynamicScheduler`] balances variable-cost work over a fixed thread pool
//! and the [`EventQueue`] hands results between threads.

pub mod collective;
pub mod combiner;
pub mod config;
pub mod context;
pub mod event;
pub mod event_queue;
pub mod group;
pub mod partition;
pub mod partitioner;
pub mod scheduler;
pub mod table;
pub mod transport;
pub mod wire;

pub use chorus_common::{ChorusError, Result};
pub use collective::AllreduceAlgorithm;
pub use combiner::{CombineFn, Combiner};
pub use config::{ChorusConfig, CollectiveConfig, GroupConfig, SchedulerConfig, TransportConfig};
pub use context::WorkerContext;
pub use event::{Event, EventBody, EventType};
pub use event_queue::EventQueue;
pub use group::{GroupCommunicator, GroupMembership, OpGuard};
pub use partition::{ArrayData, Element, ElementKind, Partition, PartitionStatus};
pub use partitioner::{CustomPartitioner, HashPartitioner, ModuloPartitioner, Partitioner};
pub use scheduler::{DynamicScheduler, SchedulerState, Task, TaskOutput};
pub use table::Table;
pub use transport::{LocalTransport, TcpTransport, Transport};
pub use wire::{Frame, FrameKind};
