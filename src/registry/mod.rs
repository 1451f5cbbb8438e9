//! 来源注册表：持有当前生效的来源列表，配置刷新时整体原子替换。
//!
//! Source registry.
//!
//! Holds the validated source list in an [`ArcSwap`]. A refresh replaces the
//! whole list at once; runs that already took a [`snapshot`](SourceRegistry::snapshot)
//! keep using the list they started with.

use crate::types::{Source, SourceSpec};
use crate::{Error, ErrorContext, Result};
use arc_swap::ArcSwap;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

pub struct SourceRegistry {
    sources: ArcSwap<Vec<Source>>,
    version: AtomicU64,
}

impl SourceRegistry {
    /// Create a registry, rejecting duplicate source ids.
    pub fn new(sources: Vec<Source>) -> Result<Self> {
        check_unique(&sources)?;
        Ok(Self {
            sources: ArcSwap::from_pointee(sources),
            version: AtomicU64::new(1),
        })
    }

    pub fn empty() -> Self {
        Self {
            sources: ArcSwap::from_pointee(Vec::new()),
            version: AtomicU64::new(0),
        }
    }

    /// Validate and build sources from their wire records.
    pub fn from_specs(specs: Vec<SourceSpec>) -> Result<Self> {
        Self::new(build_all(specs)?)
    }

    /// Parse a JSON array of source records.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let specs: Vec<SourceSpec> = serde_json::from_str(json)?;
        Self::from_specs(specs)
    }

    /// Parse a YAML sequence of source records.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let specs: Vec<SourceSpec> = serde_yaml::from_str(yaml)?;
        Self::from_specs(specs)
    }

    /// Load source records from a `.json`, `.yaml` or `.yml` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        }
    }

    /// Swap in a new source list. The previous list stays valid for runs that
    /// already hold it.
    pub fn replace(&self, sources: Vec<Source>) -> Result<u64> {
        check_unique(&sources)?;
        let count = sources.len();
        self.sources.store(Arc::new(sources));
        let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
        info!(version, sources = count, "source registry refreshed");
        Ok(version)
    }

    pub fn replace_specs(&self, specs: Vec<SourceSpec>) -> Result<u64> {
        self.replace(build_all(specs)?)
    }

    /// Immutable view of the current list.
    pub fn snapshot(&self) -> Arc<Vec<Source>> {
        self.sources.load_full()
    }

    /// Enabled sources of the current list.
    pub fn enabled(&self) -> Vec<Source> {
        self.sources
            .load()
            .iter()
            .filter(|s| s.enabled())
            .cloned()
            .collect()
    }

    pub fn get(&self, id: &str) -> Option<Source> {
        self.sources.load().iter().find(|s| s.id() == id).cloned()
    }

    /// Number of refreshes applied, starting at 1 for a populated registry.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        self.sources.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::empty()
    }
}

fn build_all(specs: Vec<SourceSpec>) -> Result<Vec<Source>> {
    specs.into_iter().map(Source::try_from).collect()
}

fn check_unique(sources: &[Source]) -> Result<()> {
    let mut seen = HashSet::new();
    for s in sources {
        if !seen.insert(s.id()) {
            return Err(Error::validation_with_context(
                format!("duplicate source id '{}'", s.id()),
                ErrorContext::new()
                    .with_field_path("sources.id")
                    .with_source("source_registry"),
            ));
        }
    }
    Ok(())
}
