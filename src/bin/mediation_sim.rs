//! Mediation simulator.
//!
//! Runs a YAML scenario of simulated ad networks through the executor and
//! prints aggregate results as JSON. Log verbosity follows `RUST_LOG`.
//!
//! Usage: `mediation-sim <scenario.yaml>`

use anyhow::{bail, Context};
use async_trait::async_trait;
use byo_mediation::{
    AdLoader, LoadError, LoadedAd, MediationConfig, MediationExecutor, ResultKind, Source,
    SourceRegistry, SourceSpec,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
struct Scenario {
    #[serde(default = "default_runs")]
    runs: usize,
    #[serde(default = "default_placement")]
    placement: String,
    #[serde(default)]
    seed: Option<u64>,
    #[serde(default)]
    config: MediationConfig,
    sources: Vec<SimSource>,
}

fn default_runs() -> usize {
    100
}

fn default_placement() -> String {
    "sim_placement".to_string()
}

#[derive(Debug, Deserialize)]
struct SimSource {
    #[serde(flatten)]
    spec: SourceSpec,
    #[serde(default)]
    sim: SimBehavior,
}

/// How a simulated network responds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct SimBehavior {
    latency_ms: u64,
    jitter_ms: u64,
    fill_rate: f64,
    error_rate: f64,
    bid_min: f64,
    bid_max: f64,
}

impl Default for SimBehavior {
    fn default() -> Self {
        Self {
            latency_ms: 100,
            jitter_ms: 50,
            fill_rate: 0.5,
            error_rate: 0.0,
            bid_min: 0.5,
            bid_max: 2.0,
        }
    }
}

enum Planned {
    Fill(f64),
    NoFill,
    Fail,
}

struct SimLoader {
    behaviors: HashMap<String, SimBehavior>,
    rng: Mutex<StdRng>,
}

impl SimLoader {
    fn plan(&self, source_id: &str) -> (Duration, Planned) {
        let b = self.behaviors.get(source_id).cloned().unwrap_or_default();
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        let latency = b.latency_ms + rng.gen_range(0..=b.jitter_ms);
        let roll: f64 = rng.gen();
        let planned = if roll < b.error_rate {
            Planned::Fail
        } else if roll < b.error_rate + b.fill_rate {
            let hi = b.bid_max.max(b.bid_min);
            Planned::Fill(rng.gen_range(b.bid_min..=hi))
        } else {
            Planned::NoFill
        };
        (Duration::from_millis(latency), planned)
    }
}

#[async_trait]
impl AdLoader for SimLoader {
    async fn load(&self, source: &Source, cancel: CancellationToken) -> Result<LoadedAd, LoadError> {
        let (latency, planned) = self.plan(source.id());
        tokio::select! {
            _ = cancel.cancelled() => return Err(LoadError::Other("cancelled".into())),
            _ = tokio::time::sleep(latency) => {}
        }
        match planned {
            Planned::Fill(bid) => Ok(LoadedAd::new(bid)),
            Planned::NoFill => Err(LoadError::NoFill("no_fill".into())),
            Planned::Fail => Err(LoadError::Status(503)),
        }
    }
}

#[derive(Debug, Default, Serialize)]
struct Summary {
    runs: usize,
    outcomes: BTreeMap<String, usize>,
    wins_by_source: BTreeMap<String, usize>,
    avg_attempts: f64,
    avg_duration_ms: f64,
    source_stats: BTreeMap<String, serde_json::Value>,
    breakers: Vec<serde_json::Value>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let Some(path) = std::env::args().nth(1) else {
        bail!("usage: mediation-sim <scenario.yaml>");
    };
    let text = std::fs::read_to_string(&path).with_context(|| format!("reading {}", path))?;
    let scenario: Scenario = serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path))?;

    let mut config = scenario.config.with_env_overrides();
    if let Some(seed) = scenario.seed {
        config.selection.seed = Some(seed);
    }
    let executor = MediationExecutor::builder()
        .config(config)
        .build()
        .context("invalid mediation config")?;

    let mut behaviors = HashMap::new();
    let mut specs = Vec::with_capacity(scenario.sources.len());
    for s in scenario.sources {
        behaviors.insert(s.spec.id.clone(), s.sim);
        specs.push(s.spec);
    }
    let registry = SourceRegistry::from_specs(specs).context("invalid sources")?;
    let loader = SimLoader {
        behaviors,
        rng: Mutex::new(match scenario.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(1)),
            None => StdRng::from_entropy(),
        }),
    };

    let mut summary = Summary {
        runs: scenario.runs,
        ..Default::default()
    };
    let mut attempts_total = 0usize;
    let mut duration_total = 0u64;
    for _ in 0..scenario.runs {
        let result = executor
            .execute_registry(&scenario.placement, &registry, &loader, None)
            .await;
        *summary
            .outcomes
            .entry(result.outcome.kind().to_string())
            .or_default() += 1;
        if result.outcome.kind() == ResultKind::Success {
            if let Some(id) = &result.source_id {
                *summary.wins_by_source.entry(id.clone()).or_default() += 1;
            }
        }
        attempts_total += result.attempts_count;
        duration_total += result.total_duration_ms;
    }

    if scenario.runs > 0 {
        summary.avg_attempts = attempts_total as f64 / scenario.runs as f64;
        summary.avg_duration_ms = duration_total as f64 / scenario.runs as f64;
    }
    for (id, stats) in executor.performance_stats() {
        summary.source_stats.insert(
            id,
            serde_json::json!({
                "attempts": stats.attempts,
                "fill_rate": stats.fill_rate(),
                "avg_latency_ms": stats.avg_latency_ms(),
                "avg_bid": stats.avg_bid(),
                "timeouts": stats.timeouts,
                "errors": stats.errors,
            }),
        );
    }
    for snap in executor.breaker_snapshots() {
        summary.breakers.push(serde_json::to_value(snap)?);
    }

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
