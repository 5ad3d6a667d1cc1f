use soak::{soak_compaction_churn, soak_concurrent, soak_granularity_sweep, soak_sequential};
pub mod soak;

fn main() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async_main());
}

async fn async_main() {

    // Run async soak workloads
    println!("\n\n╔════════════════════════════════════════════════════════════╗");
    println!("║            ASYNC SOAK WORKLOADS                             ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Run 1: sequential append, small scale
    let stats = soak_sequential(1_000, 5).await;
    stats.print();

    // Run 2: concurrent append, small scale
    let stats = soak_concurrent(4, 250, 5).await;
    stats.print();

    // Run 3: concurrent append, medium scale
    let stats = soak_concurrent(10, 1_000, 5).await;
    stats.print();

    // Run 4: compaction churn with query verification
    let stats = soak_compaction_churn(2_000, 2).await;
    stats.print();

    // Run 5: granularity sweep
    soak_granularity_sweep(5_000).await;

    println!("\n✓ All soak workloads completed successfully!");
}
