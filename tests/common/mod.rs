//! Shared helpers for the integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use byo_mediation::{AdLoader, LoadError, LoadedAd, Source};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn src(id: &str, priority: i64, weight: f64) -> Source {
    Source::builder(id)
        .priority(priority)
        .weight(weight)
        .build()
        .unwrap()
}

#[derive(Debug, Clone)]
pub enum Reply {
    Fill(f64),
    NoFill,
    Status(u16),
    Network,
    Panic,
}

/// Loader answering from per-source scripts and recording every call.
///
/// One-shot replies queued with [`then`](Self::then) are consumed first; after
/// that the source's [`always`](Self::always) reply applies. Unknown sources
/// answer `NoFill` immediately.
#[derive(Default)]
pub struct ScriptedLoader {
    queued: Mutex<HashMap<String, VecDeque<(u64, Reply)>>>,
    fallback: HashMap<String, (u64, Reply)>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn always(mut self, id: &str, delay_ms: u64, reply: Reply) -> Self {
        self.fallback.insert(id.to_string(), (delay_ms, reply));
        self
    }

    pub fn then(self, id: &str, delay_ms: u64, reply: Reply) -> Self {
        self.queued
            .lock()
            .unwrap()
            .entry(id.to_string())
            .or_default()
            .push_back((delay_ms, reply));
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, id: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == id).count()
    }

    fn next_reply(&self, id: &str) -> (u64, Reply) {
        if let Some(r) = self
            .queued
            .lock()
            .unwrap()
            .get_mut(id)
            .and_then(|q| q.pop_front())
        {
            return r;
        }
        self.fallback.get(id).cloned().unwrap_or((0, Reply::NoFill))
    }
}

#[async_trait]
impl AdLoader for ScriptedLoader {
    async fn load(&self, source: &Source, cancel: CancellationToken) -> Result<LoadedAd, LoadError> {
        self.calls.lock().unwrap().push(source.id().to_string());
        let (delay_ms, reply) = self.next_reply(source.id());
        if delay_ms > 0 {
            tokio::select! {
                _ = cancel.cancelled() => return Err(LoadError::Other("cancelled".into())),
                _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
            }
        }
        match reply {
            Reply::Fill(bid) => Ok(LoadedAd::new(bid)),
            Reply::NoFill => Err(LoadError::NoFill("no_fill".into())),
            Reply::Status(code) => Err(LoadError::Status(code)),
            Reply::Network => Err(LoadError::Network("connection reset".into())),
            Reply::Panic => panic!("scripted adapter panic"),
        }
    }
}
