//! # byo-mediation
//!
//! 客户端广告聚合弹性引擎：优先级瀑布流、加权选择、熔断、对冲请求与自适应超时。
//!
//! Client-side mediation resilience engine for Bring-Your-Own ad mediation.
//!
//! ## Overview
//!
//! Publisher SDKs hold accounts with several ad networks ("sources"). For every
//! ad request this crate decides which source to call, in what order, how long
//! to wait, when to retry, when to hedge and when to stop calling a source that
//! keeps failing. The network adapters themselves are external: the engine
//! only sees them through the [`AdLoader`] trait.
//!
//! ## Core Behavior
//!
//! - **Priority waterfall**: sources are grouped by priority; a group is fully
//!   tried before the next one, and the first fill ends the run
//! - **Weighted selection**: inside a group sources are drawn at random by
//!   weight, optionally adjusted by observed fill rate
//! - **Circuit breaking**: repeated failures on a `partner:placement` key
//!   short-circuit further calls for a recovery period
//! - **Hedging and timeouts**: slow sources get a second parallel call after
//!   their p95 latency, and timeouts tighten from observed latency
//! - **Never fails**: every run returns an [`ExecutionResult`] with a full
//!   attempt timeline, even when nothing filled
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use byo_mediation::loader::{loader_fn, LoadError, LoadedAd};
//! use byo_mediation::{MediationExecutor, Source};
//!
//! #[tokio::main]
//! async fn main() -> byo_mediation::Result<()> {
//!     let executor = MediationExecutor::builder().build()?;
//!     let sources = vec![
//!         Source::builder("admob").priority(0).weight(3.0).build()?,
//!         Source::builder("applovin").priority(1).build()?,
//!     ];
//!     let loader = loader_fn(|source, _cancel| async move {
//!         if source.id() == "applovin" {
//!             Ok(LoadedAd::new(1.8))
//!         } else {
//!             Err(LoadError::NoFill("no_fill".into()))
//!         }
//!     });
//!
//!     let result = executor
//!         .execute_placement("interstitial_main", &sources, &loader, None)
//!         .await;
//!     println!("{:?} after {} attempts", result.outcome, result.attempts_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`executor`] | Waterfall orchestration and the executor builder |
//! | [`routing`] | Priority grouping and weighted draws |
//! | [`resilience`] | Circuit breaker, retry, hedging and timeouts |
//! | [`tracker`] | Per-source performance stats |
//! | [`registry`] | Hot-swappable source list |
//! | [`loader`] | Adapter loader contract |
//! | [`telemetry`] | Mediation debugger sinks |
//! | [`config`] | Aggregate configuration and env overrides |
//! | [`types`] | Sources, outcomes and results |

pub mod clock;
pub mod config;
pub mod error;
pub mod error_code;
pub mod executor;
pub mod loader;
pub mod registry;
pub mod resilience;
pub mod routing;
pub mod telemetry;
pub mod tracker;
pub mod types;
pub mod utils;

// Re-export main types for convenience
pub use config::MediationConfig;
pub use error::{Error, ErrorContext};
pub use error_code::NoBidReason;
pub use executor::{ExecutionPhase, MediationExecutor, MediationExecutorBuilder};
pub use loader::{loader_fn, AdLoader, LoadError, LoadedAd};
pub use registry::SourceRegistry;
pub use tracker::{PerformanceTracker, SourceStats};
pub use types::{AttemptDetail, AttemptOutcome, ExecutionResult, ResultKind, Source, SourceSpec};

pub use tokio_util::sync::CancellationToken;

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;
