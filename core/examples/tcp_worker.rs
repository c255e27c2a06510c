//! One worker of a TCP group
//!
//! Start one process per rank with the same peer list, e.g. for two ranks:
//!
//! ```text
//! cargo run --example tcp_worker -- 0 127.0.0.1:7000 127.0.0.1:7001
//! cargo run --example tcp_worker -- 1 127.0.0.1:7000 127.0.0.1:7001
//! ```
//!
//! or with `--config worker.json` to read everything from a JSON file.

use anyhow::Context;
use chorus_common::init_tracing;
use chorus_core::{ChorusConfig, Combiner, Partition, Table, WorkerContext};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Run one rank of a TCP group, allreduce a small table and exit
#[derive(Parser, Debug)]
#[command(name = "tcp_worker")]
struct Args {
    /// JSON configuration file
    #[arg(long, conflicts_with_all = ["rank", "peers"])]
    config: Option<PathBuf>,

    /// Rank of this worker
    #[arg(required_unless_present = "config")]
    rank: Option<usize>,

    /// Listen address of every rank, in rank order
    #[arg(requires = "rank", num_args = 1..)]
    peers: Vec<SocketAddr>,
}

impl Args {
    fn into_config(self) -> anyhow::Result<ChorusConfig> {
        if let Some(path) = self.config {
            return Ok(ChorusConfig::from_file(path)?);
        }
        let rank = self.rank.context("a rank is required without --config")?;
        let mut config = ChorusConfig::for_rank(rank, self.peers.len());
        config.group.peers = self.peers;
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info,chorus_core=debug");
    let config = Args::parse().into_config()?;
    let ctx = WorkerContext::connect(config).await?;
    println!("worker {} is rank {} of {}", ctx.id(), ctx.rank(), ctx.size());

    // Every rank contributes its rank to key 0 and owns one key of its own.
    let mut table = Table::new(0, Combiner::Sum);
    table.add_partition(Partition::new(0, vec![ctx.rank() as i64]))?;
    table.add_partition(Partition::new(ctx.rank() as i32 + 1, vec![1i64; 4]))?;

    ctx.allreduce(&mut table).await?;
    for partition in table.partitions() {
        println!("key {}: {:?}", partition.key(), partition.values::<i64>()?);
    }

    ctx.barrier().await?;
    ctx.shutdown();
    Ok(())
}
