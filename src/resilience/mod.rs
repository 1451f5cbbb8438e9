//! 弹性模块：熔断器、重试策略、对冲请求与超时控制。
//!
//! # Resilience Primitives Module
//!
//! The building blocks the executor composes around every source attempt.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`circuit_breaker`] | Sliding-window breaker per `partner:placement` key |
//! | [`retry`] | One jittered retry for transient failures |
//! | [`hedge`] | Per-source p95 latency windows that schedule hedge attempts |
//! | [`timeout`] | Deadline racing and adaptive timeouts |
//!
//! ## Circuit Breaker
//!
//! - **Closed**: attempts pass through; failures accumulate in a trailing window
//! - **Open**: the threshold was reached; attempts short-circuit to `CircuitOpen`
//! - **Half-Open**: the recovery time elapsed; the next outcome decides
//!
//! ```rust
//! use byo_mediation::clock::ManualClock;
//! use byo_mediation::resilience::circuit_breaker::{
//!     BreakerState, CircuitBreakerBank, CircuitBreakerConfig,
//! };
//! use std::sync::Arc;
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let bank = CircuitBreakerBank::new(CircuitBreakerConfig::default(), clock.clone());
//! let key = CircuitBreakerBank::key("network-a", "banner_home");
//!
//! for _ in 0..3 {
//!     bank.record_failure(&key);
//! }
//! assert!(bank.is_open(&key));
//!
//! clock.advance(15_000);
//! assert_eq!(bank.state(&key), BreakerState::HalfOpen);
//! ```

pub mod circuit_breaker;
pub mod hedge;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{BreakerState, CircuitBreakerBank, CircuitBreakerConfig, CircuitBreakerSnapshot};
pub use hedge::{HedgeConfig, HedgeTracker};
pub use retry::{RetryConfig, RetryDecision, RetryPolicy};
pub use timeout::{run_with_deadline, AdaptiveTimeoutConfig};
