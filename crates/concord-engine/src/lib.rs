//! Concord Engine - once-per-cycle settlement
//!
//! Participants each make one binary choice per UTC day. The engine turns the
//! day's tallies into a scored outcome exactly once and credits each
//! participant exactly once, no matter how many uncoordinated callers trigger
//! settlement at the same time.
//!
//! # Architecture
//!
//! - **Finalizer**: lock, double-check, settle, single atomic write
//! - **Awarder**: lock, then an optimistic commit of flag and score together
//! - **Ledger**: score plus streaks recomputed from the choice log
//! - **Engine**: the facade a presentation layer calls
//!
//! All state lives in a [`KvStore`](concord_store::KvStore); the engine
//! itself is stateless between calls.
//!
//! # Example
//!
//! ```no_run
//! use concord_engine::{Choice, Engine, EngineConfig, ParticipantId};
//! use concord_store::MemoryStore;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::new(Arc::new(MemoryStore::new()), EngineConfig::from_env()?)?;
//!     let alice = ParticipantId::new("alice")?;
//!
//!     engine.submit_vote(&alice, engine.current_cycle_id(), Choice::Cooperate).await?;
//!     let report = engine.visit(&alice).await?;
//!     println!("score {}", report.ledger.cumulative_score);
//!     Ok(())
//! }
//! ```

pub mod awarder;
pub mod config;
pub mod engine;
pub mod error;
pub mod finalizer;
pub mod keys;
pub mod ledger;
pub mod models;

pub use concord_outcome::{Choice, OutcomeCategory};

pub use awarder::{AwardOutcome, ParticipantAwarder};
pub use config::EngineConfig;
pub use engine::{Engine, VisitReport};
pub use error::{Error, Result};
pub use finalizer::{CycleFinalizer, Finalization};
pub use keys::Keys;
pub use ledger::LedgerProjection;
pub use models::{
    AggregateView, CycleAggregate, CycleId, FinalizationMarker, ParticipantId, ParticipantLedger, Rejection,
    SettledOutcome, SubmitReceipt, Vote, MAX_PARTICIPANT_ID_LEN,
};
