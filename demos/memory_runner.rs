//! Example: Running work under a lock with the in-memory backend
//!
//! Run with: `RUST_LOG=locker_core=debug cargo run --example memory_runner`
//!
//! Two "processes" (clones of one backend) compete for the same key, then a
//! lease is stolen while work runs under it.

use std::time::Duration;

use locker::*;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let backend = MemoryBackend::new();
    let options = LockOptions::builder()
        .strategy(StrategyKind::Lease)
        .renew_every(Duration::from_millis(200))
        .lock_for(Duration::from_secs(1))
        .build()?;

    let worker_a = LockRunner::from_backend(backend.clone(), options.clone())?;
    let worker_b = LockRunner::from_backend(backend.clone(), options)?;

    println!("=== Contention ===");
    let (a, b) = tokio::join!(
        worker_a.run("nightly-report", |ctx| async move {
            println!("worker A building report, run #{}", ctx.sequence().unwrap_or_default());
            tokio::time::sleep(Duration::from_millis(500)).await;
        }),
        worker_b.run("nightly-report", |_| async {
            println!("worker B building report");
        })
    );
    println!("worker A ran: {}, worker B ran: {}", a?.is_some(), b?.is_some());

    println!("\n=== Lost lease ===");
    let result = worker_a
        .run("nightly-report", |ctx| {
            let backend = backend.clone();
            async move {
                println!("run #{}; another process takes the lease", ctx.sequence().unwrap_or_default());
                backend.steal(ctx.key().as_str(), "host:elsewhere pid:1 guid:0");
                tokio::time::sleep(Duration::from_secs(10)).await;
                println!("never printed");
            }
        })
        .await;
    match result {
        Err(LockError::LockLost { key, reason }) => println!("work on '{key}' cancelled: {reason}"),
        other => println!("unexpected outcome: {other:?}"),
    }

    Ok(())
}
