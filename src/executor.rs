//! Mediation executor.
//!
//! The public surface is [`MediationExecutor`] and its builder. Waterfall
//! orchestration, single-source attempts and the run state machine live in
//! submodules under `src/executor/`.

pub mod builder;
pub mod core;
mod attempt;
pub mod state;

pub use builder::MediationExecutorBuilder;
pub use self::core::{MediationExecutor, BELOW_FLOOR_REASON, DEFAULT_PLACEMENT};
pub use state::ExecutionPhase;
