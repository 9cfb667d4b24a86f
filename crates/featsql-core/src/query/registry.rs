//! Registry of compiled feature types.
//!
//! The registry is constructed explicitly and handed to request handling.
//! Entries are immutable [`CompiledQueries`] behind an `Arc`, so a request
//! keeps using the templates it started with even if a reload replaces them.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use super::template::{CompiledQueries, QueryCompiler};
use crate::config::{FeatureTypeConfig, ProviderConfig};
use crate::error::{ConfigError, Result};
use crate::schema::FilterParser;

struct Entry {
    fingerprint: blake3::Hash,
    compiled: Arc<CompiledQueries>,
}

/// Outcome of a [`TemplateRegistry::reload`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReloadSummary {
    pub compiled: Vec<String>,
    pub unchanged: Vec<String>,
    pub removed: Vec<String>,
}

/// Compiled feature types keyed by name.
pub struct TemplateRegistry {
    config: ProviderConfig,
    parser: Option<Arc<dyn FilterParser>>,
    entries: DashMap<String, Entry>,
    reload_lock: Mutex<()>,
}

impl TemplateRegistry {
    pub fn new(config: ProviderConfig) -> Self {
        Self {
            config,
            parser: None,
            entries: DashMap::new(),
            reload_lock: Mutex::new(()),
        }
    }

    /// Set the parser used for `{filter=...}` flags.
    pub fn with_filter_parser(mut self, parser: Arc<dyn FilterParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    fn compile(&self, feature_type: &FeatureTypeConfig) -> Result<CompiledQueries> {
        let mut compiler = QueryCompiler::new(&self.config);
        if let Some(parser) = &self.parser {
            compiler = compiler.with_filter_parser(parser.as_ref());
        }
        compiler.compile(feature_type)
    }

    fn cached(&self, name: &str, fingerprint: &blake3::Hash) -> Option<Arc<CompiledQueries>> {
        self.entries
            .get(name)
            .filter(|entry| entry.fingerprint == *fingerprint)
            .map(|entry| entry.compiled.clone())
    }

    /// Compile and activate a feature type. An unchanged configuration
    /// returns the active templates without recompiling.
    pub fn register(&self, feature_type: &FeatureTypeConfig) -> Result<Arc<CompiledQueries>> {
        let fingerprint = fingerprint(feature_type)?;
        if let Some(compiled) = self.cached(&feature_type.name, &fingerprint) {
            return Ok(compiled);
        }
        let compiled = Arc::new(self.compile(feature_type)?);
        self.entries.insert(
            feature_type.name.clone(),
            Entry {
                fingerprint,
                compiled: compiled.clone(),
            },
        );
        info!(feature_type = %feature_type.name, "activated feature type");
        Ok(compiled)
    }

    /// Replace the registered feature types by `feature_types`.
    ///
    /// Changed and new types are compiled first; if any fails nothing is
    /// replaced. Types missing from `feature_types` are removed.
    pub fn reload(&self, feature_types: &[FeatureTypeConfig]) -> Result<ReloadSummary> {
        let _guard = self.reload_lock.lock();
        let mut summary = ReloadSummary::default();
        let mut staged = Vec::new();

        for feature_type in feature_types {
            let fingerprint = fingerprint(feature_type)?;
            if self.cached(&feature_type.name, &fingerprint).is_some() {
                summary.unchanged.push(feature_type.name.clone());
                continue;
            }
            let compiled = Arc::new(self.compile(feature_type)?);
            staged.push((feature_type.name.clone(), Entry { fingerprint, compiled }));
        }

        for (name, entry) in staged {
            self.entries.insert(name.clone(), entry);
            summary.compiled.push(name);
        }
        let stale: Vec<String> = self
            .entries
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| !feature_types.iter().any(|f| &f.name == name))
            .collect();
        for name in stale {
            self.entries.remove(&name);
            summary.removed.push(name);
        }

        info!(
            compiled = summary.compiled.len(),
            unchanged = summary.unchanged.len(),
            removed = summary.removed.len(),
            "reloaded feature types"
        );
        Ok(summary)
    }

    pub fn get(&self, name: &str) -> Option<Arc<CompiledQueries>> {
        self.entries.get(name).map(|entry| entry.compiled.clone())
    }

    /// Like [`get`](Self::get), failing with `UnknownFeatureType`.
    pub fn require(&self, name: &str) -> Result<Arc<CompiledQueries>> {
        self.get(name)
            .ok_or_else(|| ConfigError::UnknownFeatureType(name.to_string()).into())
    }

    /// Drop a feature type. Requests already holding it are unaffected.
    pub fn invalidate(&self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest number of value queries any registered type needs.
    pub fn max_value_queries(&self) -> usize {
        self.entries
            .iter()
            .map(|e| e.compiled.value_templates().len())
            .max()
            .unwrap_or(0)
    }
}

fn fingerprint(feature_type: &FeatureTypeConfig) -> Result<blake3::Hash> {
    let bytes = serde_json::to_vec(feature_type)
        .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
    Ok(blake3::hash(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PropertyConfig, PropertyType};
    use crate::error::Error;

    fn feature_type(name: &str) -> FeatureTypeConfig {
        FeatureTypeConfig::new(name, format!("/{}", name))
            .with_property(PropertyConfig::value("name", PropertyType::String, "name"))
    }

    #[test]
    fn test_register_and_get() {
        let registry = TemplateRegistry::new(ProviderConfig::default());
        let first = registry.register(&feature_type("a")).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(Arc::ptr_eq(&first, &registry.get("a").unwrap()));

        // same configuration, same templates
        let again = registry.register(&feature_type("a")).unwrap();
        assert!(Arc::ptr_eq(&first, &again));

        let changed = feature_type("a")
            .with_property(PropertyConfig::value("b", PropertyType::String, "b"));
        let recompiled = registry.register(&changed).unwrap();
        assert!(!Arc::ptr_eq(&first, &recompiled));
        // holders of the old templates keep them
        assert_eq!(first.value_templates()[0].columns.len(), 1);
    }

    #[test]
    fn test_invalidate() {
        let registry = TemplateRegistry::new(ProviderConfig::default());
        registry.register(&feature_type("a")).unwrap();
        assert!(registry.invalidate("a"));
        assert!(!registry.invalidate("a"));
        assert!(registry.is_empty());
        assert!(matches!(
            registry.require("a"),
            Err(Error::Config(ConfigError::UnknownFeatureType(_)))
        ));
    }

    #[test]
    fn test_reload() {
        let registry = TemplateRegistry::new(ProviderConfig::default());
        registry.register(&feature_type("a")).unwrap();
        registry.register(&feature_type("b")).unwrap();

        let summary = registry
            .reload(&[feature_type("a"), feature_type("c")])
            .unwrap();
        assert_eq!(summary.unchanged, vec!["a"]);
        assert_eq!(summary.compiled, vec!["c"]);
        assert_eq!(summary.removed, vec!["b"]);
        assert_eq!(registry.names(), vec!["a", "c"]);
    }

    #[test]
    fn test_failed_reload_changes_nothing() {
        let registry = TemplateRegistry::new(ProviderConfig::default());
        registry.register(&feature_type("a")).unwrap();
        let broken = FeatureTypeConfig::new("b", "/b")
            .with_property(PropertyConfig::value("v", PropertyType::String, "[id=b_id c/v"));
        assert!(registry.reload(&[feature_type("c"), broken]).is_err());
        assert_eq!(registry.names(), vec!["a"]);
    }

    #[test]
    fn test_max_value_queries() {
        let registry = TemplateRegistry::new(ProviderConfig::default());
        assert_eq!(registry.max_value_queries(), 0);
        registry.register(&feature_type("a")).unwrap();
        let nested = feature_type("b").with_property(PropertyConfig::value(
            "tags",
            PropertyType::ValueArray,
            "[id=b_id]tag/value",
        ));
        registry.register(&nested).unwrap();
        assert_eq!(registry.max_value_queries(), 2);
    }
}
