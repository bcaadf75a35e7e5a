// src/engine/registry.rs
// Engine lookup by name: name -> factory(config) -> instance

use crate::engine::debug::DebugEngine;
use crate::engine::traits::TranslationEngine;
use crate::error::{Result, TransHubError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;

/// Builds an engine from its opaque configuration blob.
pub type EngineFactory =
    Arc<dyn Fn(&Value) -> Result<Arc<dyn TranslationEngine>> + Send + Sync>;

/// Registry of engine factories. The coordinator instantiates engines lazily
/// on `initialize` and `switch_engine`.
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
}

impl EngineRegistry {
    /// An empty registry (no built-ins). Mostly useful in tests.
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Registry with the built-in engines registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("debug", |config| {
            Ok(Arc::new(DebugEngine::from_config(config)?) as Arc<dyn TranslationEngine>)
        });
        registry
    }

    /// Register (or replace) a factory under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&Value) -> Result<Arc<dyn TranslationEngine>> + Send + Sync + 'static,
    {
        let name = name.into();
        info!(engine = %name, "Engine factory registered");
        self.factories.insert(name, Arc::new(factory));
    }

    /// Instantiate the named engine from its config blob.
    pub fn create(&self, name: &str, config: &Value) -> Result<Arc<dyn TranslationEngine>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| TransHubError::EngineNotFound(name.to_string()))?;
        factory(config)
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered engine names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}
