//! K-means over an in-memory group of workers
//!
//! Each worker assigns its own points to the nearest centroid using a
//! dynamic scheduler, then the per-centroid partial sums are combined with
//! allreduce so that every worker computes the same new centroids.

use chorus_common::init_tracing;
use chorus_core::{
    ChorusConfig, Combiner, DynamicScheduler, LocalTransport, Partition, Table, Task,
    WorkerContext,
};
use std::collections::BTreeMap;

const WORKERS: usize = 4;
const CLUSTERS: usize = 3;
const ITERATIONS: usize = 5;

type Point = [f64; 2];

/// Accumulates `[sum_x, sum_y, count]` per centroid for the points it sees.
struct AssignPoints {
    centroids: Vec<Point>,
    sums: BTreeMap<i32, [f64; 3]>,
}

impl Task<Vec<Point>, usize> for AssignPoints {
    fn run(&mut self, chunk: &Vec<Point>) -> anyhow::Result<usize> {
        for point in chunk {
            let nearest = nearest_centroid(&self.centroids, point);
            let entry = self.sums.entry(nearest as i32).or_insert([0.0; 3]);
            entry[0] += point[0];
            entry[1] += point[1];
            entry[2] += 1.0;
        }
        Ok(chunk.len())
    }
}

fn nearest_centroid(centroids: &[Point], point: &Point) -> usize {
    let distance = |c: &Point| (c[0] - point[0]).powi(2) + (c[1] - point[1]).powi(2);
    (0..centroids.len())
        .min_by(|a, b| distance(&centroids[*a]).total_cmp(&distance(&centroids[*b])))
        .unwrap_or(0)
}

/// Deterministic points scattered around three cluster centers.
fn local_points(rank: usize) -> Vec<Point> {
    let centers = [[0.0, 0.0], [10.0, 10.0], [-8.0, 6.0]];
    (0..300)
        .map(|i| {
            let center = centers[(i + rank) % centers.len()];
            let jitter = ((i * 37 + rank * 11) % 100) as f64 / 50.0 - 1.0;
            [center[0] + jitter, center[1] - jitter * 0.5]
        })
        .collect()
}

async fn run_worker(ctx: WorkerContext) -> anyhow::Result<Vec<Point>> {
    let points = local_points(ctx.rank());
    let chunks: Vec<Vec<Point>> = points.chunks(32).map(|c| c.to_vec()).collect();
    let mut centroids: Vec<Point> = points[..CLUSTERS].to_vec();

    let tasks = (0..ctx.num_threads().min(4))
        .map(|_| AssignPoints {
            centroids: Vec::new(),
            sums: BTreeMap::new(),
        })
        .collect();
    let scheduler: DynamicScheduler<Vec<Point>, usize, AssignPoints> = ctx.scheduler(tasks);

    for iteration in 0..ITERATIONS {
        let mut sums = Table::new(0, Combiner::Sum);

        // The scheduler blocks on its worker threads.
        tokio::task::block_in_place(|| -> anyhow::Result<()> {
            for task in scheduler.tasks()?.iter_mut() {
                task.centroids = centroids.clone();
                task.sums.clear();
            }
            scheduler.start()?;
            scheduler.submit_all(chunks.iter().cloned())?;
            scheduler.stop()?;
            for output in scheduler.drain_outputs() {
                output.result?;
            }
            for task in scheduler.tasks()?.iter() {
                for (key, sum) in &task.sums {
                    sums.add_partition(Partition::new(*key, sum.to_vec()))?;
                }
            }
            Ok(())
        })?;

        ctx.allreduce(&mut sums).await?;

        for partition in sums.partitions() {
            let [x, y, count] = partition.values::<f64>()? else {
                anyhow::bail!("partition {} has the wrong shape", partition.key());
            };
            centroids[partition.key() as usize] = [x / count, y / count];
        }
        if ctx.is_leader() {
            println!("iteration {}: {:?}", iteration, centroids);
        }
    }

    ctx.barrier().await?;
    ctx.shutdown();
    Ok(centroids)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing("info");
    println!("=== K-means over {} workers ===", WORKERS);

    let mut handles = Vec::new();
    for (rank, transport) in LocalTransport::mesh(WORKERS).into_iter().enumerate() {
        let ctx = WorkerContext::init(ChorusConfig::for_rank(rank, WORKERS), transport)?;
        handles.push(tokio::spawn(run_worker(ctx)));
    }

    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await??);
    }

    let agree = results.windows(2).all(|pair| pair[0] == pair[1]);
    println!("workers agree on final centroids: {}", agree);
    Ok(())
}
