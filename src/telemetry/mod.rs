//! 调试遥测：每次执行后向调试接收器报告一条记录（默认不收集）。
//!
//! Mediation debugger telemetry.
//!
//! After every run the executor hands a [`DebugRecord`] to its [`DebugSink`].
//! Nothing is collected unless a sink is installed, either on the executor
//! builder or process-wide with [`set_debug_sink`].
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`DebugRecord`] | One execution result with placement and request ids |
//! | [`DebugSink`] | Trait for record destinations |
//! | [`NoopDebugSink`] | Default sink, drops everything |
//! | [`InMemoryDebugger`] | Per-placement ring buffer with optional sampling |

use crate::clock::unix_ms;
use crate::types::ExecutionResult;
use crate::Result;
use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};

/// Bucket for records without a placement id.
pub const UNKNOWN_PLACEMENT: &str = "__unknown__";

/// Default ring capacity per placement.
pub const DEFAULT_PER_PLACEMENT_CAP: usize = 100;

/// One mediation run as seen by the debugger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugRecord {
    pub placement_id: String,
    pub request_id: String,
    pub created_at_ms: u64,
    pub result: ExecutionResult,
}

impl DebugRecord {
    /// New record with a fresh v4 request id.
    pub fn new(placement_id: impl Into<String>, result: ExecutionResult) -> Self {
        Self {
            placement_id: placement_id.into(),
            request_id: uuid::Uuid::new_v4().to_string(),
            created_at_ms: unix_ms(),
            result,
        }
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }
}

/// Destination for debug records.
#[async_trait]
pub trait DebugSink: Send + Sync {
    async fn report(&self, record: DebugRecord) -> Result<()>;
    async fn report_batch(&self, records: Vec<DebugRecord>) -> Result<()> {
        for r in records {
            self.report(r).await?;
        }
        Ok(())
    }
}

/// No-op sink (always available).
pub struct NoopDebugSink;

#[async_trait]
impl DebugSink for NoopDebugSink {
    async fn report(&self, _: DebugRecord) -> Result<()> {
        Ok(())
    }
}

/// Returns a no-op debug sink.
pub fn noop_sink() -> Arc<dyn DebugSink> {
    Arc::new(NoopDebugSink)
}

/// In-memory ring buffer keyed by placement id.
pub struct InMemoryDebugger {
    per_placement_cap: usize,
    /// Retained share in basis points; 0 keeps everything.
    sample_bps: u32,
    store: Mutex<HashMap<String, VecDeque<DebugRecord>>>,
}

impl InMemoryDebugger {
    /// `cap == 0` falls back to [`DEFAULT_PER_PLACEMENT_CAP`].
    pub fn new(per_placement_cap: usize) -> Self {
        Self::with_sampling(per_placement_cap, 0)
    }

    /// Keep roughly `sample_bps / 10_000` of the records. Values above 10 000
    /// are clamped.
    pub fn with_sampling(per_placement_cap: usize, sample_bps: u32) -> Self {
        let cap = if per_placement_cap == 0 {
            DEFAULT_PER_PLACEMENT_CAP
        } else {
            per_placement_cap
        };
        Self {
            per_placement_cap: cap,
            sample_bps: sample_bps.min(10_000),
            store: Mutex::new(HashMap::new()),
        }
    }

    fn capture(&self, record: DebugRecord) {
        if self.sample_bps > 0 && rand::thread_rng().gen_range(0..10_000) >= self.sample_bps {
            return;
        }
        let key = if record.placement_id.is_empty() {
            UNKNOWN_PLACEMENT.to_string()
        } else {
            record.placement_id.clone()
        };
        let mut store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let buf = store.entry(key).or_default();
        buf.push_back(record);
        while buf.len() > self.per_placement_cap {
            buf.pop_front();
        }
    }

    /// Up to `n` most recent records for a placement, oldest first. `n == 0`
    /// returns the whole buffer.
    pub fn last(&self, placement_id: &str, n: usize) -> Vec<DebugRecord> {
        let key = if placement_id.is_empty() {
            UNKNOWN_PLACEMENT
        } else {
            placement_id
        };
        let store = self.store.lock().unwrap_or_else(|e| e.into_inner());
        let Some(buf) = store.get(key) else {
            return Vec::new();
        };
        let skip = if n == 0 || n >= buf.len() {
            0
        } else {
            buf.len() - n
        };
        buf.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self, placement_id: &str) -> usize {
        self.last(placement_id, 0).len()
    }

    pub fn clear(&self) {
        self.store.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl Default for InMemoryDebugger {
    fn default() -> Self {
        Self::new(DEFAULT_PER_PLACEMENT_CAP)
    }
}

#[async_trait]
impl DebugSink for InMemoryDebugger {
    async fn report(&self, record: DebugRecord) -> Result<()> {
        self.capture(record);
        Ok(())
    }
}

static GLOBAL_SINK: once_cell::sync::Lazy<RwLock<Arc<dyn DebugSink>>> =
    once_cell::sync::Lazy::new(|| RwLock::new(Arc::new(NoopDebugSink)));

/// Returns the process-wide debug sink.
pub fn get_debug_sink() -> Arc<dyn DebugSink> {
    GLOBAL_SINK
        .read()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
}

/// Installs the process-wide debug sink used by executors built without one.
pub fn set_debug_sink(sink: Arc<dyn DebugSink>) {
    *GLOBAL_SINK.write().unwrap_or_else(|e| e.into_inner()) = sink;
}
