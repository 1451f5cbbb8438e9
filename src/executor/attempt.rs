//! One attempt against one source, optionally hedged.

use super::state::{ExecutionPhase, RunState};
use crate::loader::AdLoader;
use crate::resilience::timeout::run_with_deadline;
use crate::types::{AttemptOutcome, Source};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub(crate) struct AttemptReport {
    pub outcome: AttemptOutcome,
    /// A hedge leg was launched.
    pub hedged: bool,
}

/// Single loader call under a deadline. Latency is measured around the load.
async fn call_once<L>(
    loader: &L,
    source: &Source,
    deadline: Duration,
    parent: &CancellationToken,
) -> AttemptOutcome
where
    L: AdLoader + ?Sized,
{
    run_with_deadline(deadline, parent, |child| async move {
        let started = Instant::now();
        match loader.load(source, child).await {
            Ok(ad) => AttemptOutcome::Success {
                latency_ms: started.elapsed().as_millis() as u64,
                bid: ad.bid,
            },
            Err(e) => e.into_outcome(),
        }
    })
    .await
}

/// Run one attempt. With a `hedge_delay`, a second call to the same source
/// starts once the delay elapses without a result; whichever leg settles
/// first wins and the other leg's token is cancelled. Both legs share the
/// attempt deadline.
pub(crate) async fn run_attempt<L>(
    loader: &L,
    source: &Source,
    timeout: Duration,
    hedge_delay: Option<Duration>,
    cancel: &CancellationToken,
    run: &mut RunState,
) -> AttemptReport
where
    L: AdLoader + ?Sized,
{
    let Some(delay) = hedge_delay.filter(|d| *d < timeout) else {
        return AttemptReport {
            outcome: call_once(loader, source, timeout, cancel).await,
            hedged: false,
        };
    };

    let primary_leg = cancel.child_token();
    let primary = call_once(loader, source, timeout, &primary_leg);
    tokio::pin!(primary);

    tokio::select! {
        biased;
        outcome = &mut primary => {
            return AttemptReport { outcome, hedged: false };
        }
        _ = tokio::time::sleep(delay) => {}
    }

    run.transition(ExecutionPhase::HedgeWaiting);
    debug!(
        source_id = source.id(),
        hedge_delay_ms = delay.as_millis() as u64,
        "launching hedge attempt"
    );

    let secondary_leg = cancel.child_token();
    let secondary = call_once(loader, source, timeout - delay, &secondary_leg);
    tokio::pin!(secondary);

    let outcome = tokio::select! {
        biased;
        o = &mut primary => o,
        o = &mut secondary => include_hedge_delay(o, delay),
    };
    primary_leg.cancel();
    secondary_leg.cancel();

    AttemptReport {
        outcome,
        hedged: true,
    }
}

/// The secondary leg's latency counts from its own launch; the caller also
/// waited `delay` before it started.
fn include_hedge_delay(outcome: AttemptOutcome, delay: Duration) -> AttemptOutcome {
    match outcome {
        AttemptOutcome::Success { latency_ms, bid } => AttemptOutcome::Success {
            latency_ms: latency_ms + delay.as_millis() as u64,
            bid,
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{loader_fn, LoadError, LoadedAd};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn source() -> Source {
        Source::builder("net").timeout_ms(1000).build().unwrap()
    }

    fn attempting_run() -> RunState {
        let mut run = RunState::new("p");
        run.transition(ExecutionPhase::SelectingGroup);
        run.transition(ExecutionPhase::Attempting);
        run
    }

    #[tokio::test]
    async fn test_unhedged_success_measures_latency() {
        let loader = loader_fn(|_s: Source, _c| async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(LoadedAd::new(1.0))
        });
        let mut run = attempting_run();
        let token = CancellationToken::new();
        let report = run_attempt(&loader, &source(), Duration::from_secs(1), None, &token, &mut run).await;
        match report.outcome {
            AttemptOutcome::Success { latency_ms, bid } => {
                assert!(latency_ms >= 15);
                assert_eq!(bid, 1.0);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(!report.hedged);
    }

    #[tokio::test]
    async fn test_hedge_leg_wins_over_slow_primary() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let loader = loader_fn(move |_s: Source, _c| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_millis(800)).await;
                    Ok(LoadedAd::new(1.0))
                } else {
                    Ok(LoadedAd::new(2.0))
                }
            }
        });
        let mut run = attempting_run();
        let token = CancellationToken::new();
        let report = run_attempt(
            &loader,
            &source(),
            Duration::from_secs(1),
            Some(Duration::from_millis(30)),
            &token,
            &mut run,
        )
        .await;
        assert!(report.hedged);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        match report.outcome {
            AttemptOutcome::Success { latency_ms, bid } => {
                assert_eq!(bid, 2.0);
                // Measured from the start of the attempt, not of the hedge leg.
                assert!(latency_ms >= 30, "latency {}ms excludes hedge delay", latency_ms);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(run.phase(), ExecutionPhase::HedgeWaiting);
    }

    #[test]
    fn test_include_hedge_delay() {
        let won = AttemptOutcome::Success {
            latency_ms: 5,
            bid: 1.0,
        };
        assert_eq!(
            include_hedge_delay(won, Duration::from_millis(100)),
            AttemptOutcome::Success {
                latency_ms: 105,
                bid: 1.0
            }
        );
        assert_eq!(
            include_hedge_delay(AttemptOutcome::Timeout, Duration::from_millis(100)),
            AttemptOutcome::Timeout
        );
    }

    #[tokio::test]
    async fn test_fast_primary_skips_hedge() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let loader = loader_fn(move |_s: Source, _c| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(LoadError::NoFill("no_fill".into())) }
        });
        let mut run = attempting_run();
        let token = CancellationToken::new();
        let report = run_attempt(
            &loader,
            &source(),
            Duration::from_secs(1),
            Some(Duration::from_millis(200)),
            &token,
            &mut run,
        )
        .await;
        assert!(!report.hedged);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(report.outcome, AttemptOutcome::no_fill("no_fill"));
    }

    #[tokio::test]
    async fn test_hedge_delay_not_below_timeout_is_ignored() {
        let loader = loader_fn(|_s: Source, _c| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(LoadedAd::new(1.0))
        });
        let mut run = attempting_run();
        let token = CancellationToken::new();
        let report = run_attempt(
            &loader,
            &source(),
            Duration::from_millis(50),
            Some(Duration::from_millis(50)),
            &token,
            &mut run,
        )
        .await;
        assert!(!report.hedged);
        assert_eq!(report.outcome, AttemptOutcome::Timeout);
    }
}
