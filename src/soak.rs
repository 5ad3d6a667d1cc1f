use async_stream::stream;
use futures::stream::Stream;
use futures::stream::StreamExt;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::{Duration, Instant};
use strata::{CounterAlgebra, DeltaLog, LogConfig, MemoryStore};

/// Statistics collected during a soak run
#[derive(Clone, Debug)]
pub struct SoakStats {
    pub writers: usize,
    pub patches: usize,
    pub compactions: usize,
    pub total_time: Duration,
    pub avg_patch_time: Duration,
    pub ops_per_second: f64,
}

impl SoakStats {
    pub fn print(&self) {
        println!("\n╔════════════════════════════════════════════════════════════╗");
        println!("║                  Soak Run Statistics                        ║");
        println!("╠════════════════════════════════════════════════════════════╣");
        println!("║  Writers:                   {:>38} ║", self.writers);
        println!("║  Patches Committed:         {:>38} ║", self.patches);
        println!("║  Compaction Steps:          {:>38} ║", self.compactions);
        println!("║  Total Time:                {:>39}s ║", format!("{:.3}", self.total_time.as_secs_f64()));
        println!("║  Average Patch Time:        {:>36}µs ║", format!("{:.2}", self.avg_patch_time.as_micros()));
        println!("║  Operations/Second:         {:>38.0} ║", self.ops_per_second);
        println!("╚════════════════════════════════════════════════════════════╝");
    }
}

async fn open_counter(granularity: u64) -> DeltaLog<CounterAlgebra, MemoryStore> {
    let config = LogConfig {
        granularity,
        ..Default::default()
    };
    DeltaLog::open(config, CounterAlgebra, MemoryStore::new(), 0)
        .await
        .expect("open in-memory log")
}

/// One step of the mixed workload
#[derive(Clone, Copy, Debug)]
enum Op {
    Patch(i64),
    Compact,
}

/// Generator that yields a randomized patch/compact interleaving
fn workload_generator(num_ops: usize, compact_ratio: f64) -> impl Stream<Item = Op> {
    stream! {
        let mut rng = StdRng::from_entropy();
        for _ in 0..num_ops {
            if rng.gen_bool(compact_ratio) {
                yield Op::Compact;
            } else {
                yield Op::Patch(rng.gen_range(1..=10));
            }
        }
    }
}

/// Sequential append run: one writer, verified snapshot at the end
pub async fn soak_sequential(num_patches: usize, granularity: u64) -> SoakStats {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Sequential Append Soak                              ║");
    println!("║  Patches: {} | Granularity: {} ║", num_patches, granularity);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let log = open_counter(granularity).await;

    let mut patch_times = vec![];
    let mut expected: i64 = 0;
    let mut rng = StdRng::from_entropy();

    for i in 0..num_patches {
        let amount = rng.gen_range(1..=10);
        expected += amount;

        let patch_start = Instant::now();
        log.patch(amount).await.expect("patch");
        patch_times.push(patch_start.elapsed());

        if i % 1000 == 0 {
            tokio::task::yield_now().await;
        }
    }

    let snapshot = log.snapshot().await.expect("snapshot");
    assert_eq!(snapshot, expected, "snapshot must equal the patch sum");
    assert_eq!(log.stats().head as usize, num_patches);

    let total_time = start.elapsed();
    let avg_patch_time = if patch_times.is_empty() {
        Duration::ZERO
    } else {
        patch_times.iter().sum::<Duration>() / patch_times.len() as u32
    };

    SoakStats {
        writers: 1,
        patches: num_patches,
        compactions: 0,
        total_time,
        avg_patch_time,
        ops_per_second: num_patches as f64 / total_time.as_secs_f64(),
    }
}

/// Concurrent append run: many writers racing through the commit gate
pub async fn soak_concurrent(
    num_writers: usize,
    patches_per_writer: usize,
    granularity: u64,
) -> SoakStats {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Concurrent Append Soak                              ║");
    println!("║  Writers: {} | Patches/Writer: {} | Granularity: {} ║",
             num_writers, patches_per_writer, granularity);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let log = open_counter(granularity).await;

    println!("\n[Phase 1/2] Committing patches from all writers...");

    let mut handles = vec![];
    for _ in 0..num_writers {
        let log = log.clone();
        let handle = tokio::spawn(async move {
            for i in 0..patches_per_writer {
                log.patch(1).await.expect("patch");

                if i % 100 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        });
        handles.push(handle);
    }

    for handle in handles {
        let _ = handle.await;
    }

    println!("[Phase 1/2] ✓ Completed");
    println!("[Phase 2/2] Verifying the committed history...");

    // Every commit got a distinct index and the state reflects all of them.
    let total = num_writers * patches_per_writer;
    assert_eq!(log.stats().head as usize, total);
    assert_eq!(log.snapshot().await.expect("snapshot") as usize, total);

    println!("[Phase 2/2] ✓ Completed");

    let total_time = start.elapsed();

    SoakStats {
        writers: num_writers,
        patches: total,
        compactions: 0,
        total_time,
        avg_patch_time: total_time / total.max(1) as u32,
        ops_per_second: total as f64 / total_time.as_secs_f64(),
    }
}

/// Mixed run: patches interleaved with compaction steps, queries checked
/// against a running oracle along the way
pub async fn soak_compaction_churn(num_ops: usize, granularity: u64) -> SoakStats {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        Compaction Churn Soak                               ║");
    println!("║  Operations: {} | Granularity: {} ║", num_ops, granularity);
    println!("╚════════════════════════════════════════════════════════════╝");

    let start = Instant::now();
    let log = open_counter(granularity).await;

    let mut expected: i64 = 0;
    let mut patches = 0usize;
    let mut compactions = 0usize;

    let mut workload = Box::pin(workload_generator(num_ops, 0.3));
    while let Some(op) = workload.next().await {
        match op {
            Op::Patch(amount) => {
                expected += amount;
                log.patch(amount).await.expect("patch");
                patches += 1;
            }
            Op::Compact => {
                log.compact().await.expect("compact");
                compactions += 1;
            }
        }

        if (patches + compactions) % 50 == 0 {
            // Compaction must never disturb what survives: the head
            // snapshot stays the full sum, and the delta across the
            // retained window still bridges tail to head exactly.
            let stats = log.stats();
            let head_state = log.snapshot().await.expect("snapshot");
            assert_eq!(head_state, expected);

            let tail_state = log.snapshot_at(stats.tail).await.expect("tail snapshot");
            let window = log.delta_since(stats.tail).await.expect("window delta");
            assert_eq!(tail_state + window, expected);
        }
    }

    let stats = log.stats();
    println!("  Final marks: head={} tail={}", stats.head, stats.tail);

    let total_time = start.elapsed();

    SoakStats {
        writers: 1,
        patches,
        compactions,
        total_time,
        avg_patch_time: total_time / (patches + compactions).max(1) as u32,
        ops_per_second: (patches + compactions) as f64 / total_time.as_secs_f64(),
    }
}

/// Sequential runs across a range of granularities
pub async fn soak_granularity_sweep(num_patches: usize) {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║      Granularity Sweep - Append Cost vs Branching          ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    for granularity in [2, 3, 5, 10] {
        let stats = soak_sequential(num_patches, granularity).await;
        stats.print();
    }
}
