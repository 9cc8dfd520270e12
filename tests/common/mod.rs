//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::time::Duration;

use locker::{LockOptions, LockOptionsBuilder, LockRunner, MemoryBackend, Strategy, StrategyKind};

pub type MemoryRunner = LockRunner<Strategy<MemoryBackend>>;

pub const ALL_STRATEGIES: [StrategyKind; 3] = [
    StrategyKind::SessionScoped,
    StrategyKind::Transactional,
    StrategyKind::Lease,
];

/// Installs a test-friendly subscriber once; later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Options with watchdog intervals short enough for tests.
pub fn fast_options(kind: StrategyKind) -> LockOptionsBuilder {
    LockOptions::builder()
        .strategy(kind)
        .check_every(Duration::from_millis(50))
        .renew_every(Duration::from_millis(50))
        .lock_for(Duration::from_millis(500))
}

pub fn runner(backend: &MemoryBackend, options: LockOptions) -> MemoryRunner {
    LockRunner::from_backend(backend.clone(), options).unwrap()
}

pub fn fast_runner(backend: &MemoryBackend, kind: StrategyKind) -> MemoryRunner {
    runner(backend, fast_options(kind).build().unwrap())
}
