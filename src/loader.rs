//! 广告加载器接口：执行器通过该 trait 调用各广告网络适配器。
//!
//! Adapter loader contract.
//!
//! The executor never talks to ad networks directly. For every attempt it calls
//! an [`AdLoader`] with the source and a cancellation token; the loader reports a
//! bid or a [`LoadError`]. Latency measurement, deadlines and panic handling
//! happen on the executor side.

use crate::error_code::NoBidReason;
use crate::types::{AttemptOutcome, Source};
use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// A filled ad response.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadedAd {
    /// Bid in the publisher's currency units (CPM).
    pub bid: f64,
}

impl LoadedAd {
    pub fn new(bid: f64) -> Self {
        Self { bid }
    }
}

/// Failure reported by an adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// The network had nothing to serve.
    NoFill(String),
    /// Connection-level failure.
    Network(String),
    /// Non-success HTTP status from the network.
    Status(u16),
    /// Anything else; the message is classified for retryability.
    Other(String),
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::NoFill(r) => write!(f, "no fill: {}", r),
            LoadError::Network(m) => write!(f, "network error: {}", m),
            LoadError::Status(code) => write!(f, "status_{}", code),
            LoadError::Other(m) => f.write_str(m),
        }
    }
}

impl std::error::Error for LoadError {}

impl LoadError {
    /// Convert into the outcome recorded for the attempt.
    pub fn into_outcome(self) -> AttemptOutcome {
        match self {
            LoadError::NoFill(reason) => AttemptOutcome::no_fill(reason),
            LoadError::Network(m) => AttemptOutcome::error(NoBidReason::NetworkError, m),
            LoadError::Status(code) => {
                AttemptOutcome::error(NoBidReason::Status(code), format!("status_{}", code))
            }
            LoadError::Other(m) => {
                let reason = match NoBidReason::classify(&m) {
                    r @ (NoBidReason::NetworkError | NoBidReason::Status(_)) => r,
                    _ => NoBidReason::Error,
                };
                AttemptOutcome::error(reason, m)
            }
        }
    }
}

/// Loads one ad from one source.
///
/// Implementations should stop work when `cancel` fires; the executor stops
/// waiting either way.
#[async_trait]
pub trait AdLoader: Send + Sync {
    async fn load(
        &self,
        source: &Source,
        cancel: CancellationToken,
    ) -> std::result::Result<LoadedAd, LoadError>;
}

/// Adapts an async closure into an [`AdLoader`].
pub struct FnLoader<F> {
    f: F,
}

/// Builds an [`AdLoader`] from `Fn(Source, CancellationToken) -> Future`.
///
/// ```rust
/// use byo_mediation::loader::{loader_fn, LoadError, LoadedAd};
///
/// let loader = loader_fn(|source, _cancel| async move {
///     if source.id() == "network-a" {
///         Ok(LoadedAd::new(1.25))
///     } else {
///         Err(LoadError::NoFill("no_fill".into()))
///     }
/// });
/// # let _ = loader;
/// ```
pub fn loader_fn<F, Fut>(f: F) -> FnLoader<F>
where
    F: Fn(Source, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<LoadedAd, LoadError>> + Send,
{
    FnLoader { f }
}

#[async_trait]
impl<F, Fut> AdLoader for FnLoader<F>
where
    F: Fn(Source, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<LoadedAd, LoadError>> + Send,
{
    async fn load(
        &self,
        source: &Source,
        cancel: CancellationToken,
    ) -> std::result::Result<LoadedAd, LoadError> {
        (self.f)(source.clone(), cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_conversion() {
        assert_eq!(
            LoadError::NoFill("no_fill".into()).into_outcome(),
            AttemptOutcome::no_fill("no_fill")
        );
        assert_eq!(
            LoadError::Status(503).into_outcome().no_bid_reason(),
            Some(NoBidReason::Status(503))
        );
        assert_eq!(
            LoadError::Network("reset".into()).into_outcome().no_bid_reason(),
            Some(NoBidReason::NetworkError)
        );
        assert_eq!(
            LoadError::Other("upstream status_502".into())
                .into_outcome()
                .no_bid_reason(),
            Some(NoBidReason::Status(502))
        );
        assert_eq!(
            LoadError::Other("bad creative".into())
                .into_outcome()
                .no_bid_reason(),
            Some(NoBidReason::Error)
        );
    }

    #[tokio::test]
    async fn test_fn_loader() {
        let loader = loader_fn(|source: Source, _cancel| async move {
            Ok(LoadedAd::new(source.weight()))
        });
        let source = Source::builder("a").weight(2.0).build().unwrap();
        let ad = loader.load(&source, CancellationToken::new()).await.unwrap();
        assert_eq!(ad.bid, 2.0);
    }

    #[test]
    fn test_fn_loader_blocking() {
        let loader = loader_fn(|_source: Source, cancel: CancellationToken| async move {
            if cancel.is_cancelled() {
                Err(LoadError::Other("cancelled".into()))
            } else {
                Ok(LoadedAd::new(0.5))
            }
        });
        let source = Source::builder("b").build().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = tokio_test::block_on(loader.load(&source, token)).unwrap_err();
        assert_eq!(err.to_string(), "cancelled");
    }
}
