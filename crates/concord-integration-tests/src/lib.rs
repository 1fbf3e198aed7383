//! Shared harness for the cross-crate tests in `tests/`.
//!
//! Set `RUST_LOG` to see the engine's decisions while a test runs, e.g.
//! `RUST_LOG=concord_engine=debug`.

use concord_engine::{CycleId, Engine, EngineConfig, ParticipantId};
use concord_store::{MemoryStore, RocksStore};
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Install a fmt subscriber once per test binary. Later calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "concord_engine=info,concord_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Engine over a fresh in-memory store.
pub fn memory_engine(config: EngineConfig) -> Engine<MemoryStore> {
    init_tracing();
    Engine::new(Arc::new(MemoryStore::new()), config).expect("valid test config")
}

/// Engine over RocksDB in a temporary directory. Keep the [`TempDir`] alive
/// for as long as the engine is used.
pub fn rocks_engine(config: EngineConfig) -> (Engine<RocksStore>, TempDir) {
    init_tracing();
    let dir = tempfile::tempdir().expect("create tempdir");
    let store = RocksStore::open(dir.path()).expect("open rocksdb");
    let engine = Engine::new(Arc::new(store), config).expect("valid test config");
    (engine, dir)
}

/// `participant-{n}`.
pub fn participant(n: usize) -> ParticipantId {
    ParticipantId::new(format!("participant-{n}")).expect("valid participant id")
}

/// Parse a `YYYY-MM-DD` cycle id.
pub fn cycle(day: &str) -> CycleId {
    day.parse().expect("valid cycle id")
}
