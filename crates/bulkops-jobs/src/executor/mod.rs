pub mod messaging;

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bulkops_common::error::Result;

use crate::{job::Job, outcome::ItemError, types::JobItem};

pub use messaging::{HttpSessionExecutor, SessionAction};

pub type ActionResult = std::result::Result<serde_json::Value, ItemError>;

/// The per-item operation behind a job kind. The engine bounds every `apply`
/// call with its own timeout; implementations need not self-limit.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    /// Job-level precondition, checked once before any item runs.
    async fn preflight(&self, _job: &Job) -> Result<()> {
        Ok(())
    }

    async fn apply(&self, item: &JobItem, parameters: &serde_json::Value) -> ActionResult;
}

#[derive(Clone, Default)]
pub struct ActionRegistry {
    executors: HashMap<String, Arc<dyn ActionExecutor>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, kind: impl Into<String>, executor: Arc<dyn ActionExecutor>) {
        self.executors.insert(kind.into(), executor);
    }

    pub fn with(mut self, kind: impl Into<String>, executor: Arc<dyn ActionExecutor>) -> Self {
        self.register(kind, executor);
        self
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ActionExecutor>> {
        self.executors.get(kind).cloned()
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.executors.contains_key(kind)
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.executors.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
