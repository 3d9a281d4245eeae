//! The `kind -> executor` map (spec.md §4.3).

use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::error::EngineError;
use crate::payload::NodeSpec;

use super::Executor;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("unknown node kind '{0}'")]
    UnknownKind(String),
    #[error("node kind '{0}' is already registered")]
    DuplicateKind(String),
}

#[derive(Default)]
pub struct NodeExecutorRegistry {
    executors: FxHashMap<String, Arc<dyn Executor>>,
}

impl NodeExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn Executor>) -> Result<(), RegistryError> {
        let kind = kind.into();
        if self.executors.contains_key(&kind) {
            return Err(RegistryError::DuplicateKind(kind));
        }
        self.executors.insert(kind, executor);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn Executor>, RegistryError> {
        self.executors.get(kind).cloned().ok_or_else(|| RegistryError::UnknownKind(kind.to_string()))
    }

    pub fn kinds(&self) -> Vec<&str> {
        self.executors.keys().map(String::as_str).collect()
    }

    /// Eagerly validate every node in the payload (spec.md §4.6 "Setup
    /// phase"). Returns the first validation failure encountered.
    pub fn validate_all(&self, nodes: &[NodeSpec]) -> Result<(), EngineError> {
        for node in nodes {
            let executor = self
                .get(&node.kind)
                .map_err(|e| EngineError::Validation(format!("node '{}': {e}", node.id)))?;
            executor.validate(node).map_err(|e| match e {
                EngineError::Validation(msg) => EngineError::Validation(format!("node '{}': {msg}", node.id)),
                other => other,
            })?;
        }
        Ok(())
    }
}
