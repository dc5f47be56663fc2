use crate::{ExecutionEnvironment, ToolError};
use lathe_llm::ToolDefinition;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, RwLock};

pub type ToolFuture = Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send>>;

/// Executors take the parsed JSON arguments and the environment handle;
/// argument validation happens inside each executor so the registry stays
/// monomorphic.
pub type ToolExecutor =
    Arc<dyn Fn(Value, Arc<dyn ExecutionEnvironment>) -> ToolFuture + Send + Sync>;

#[derive(Clone)]
pub struct RegisteredTool {
    pub definition: ToolDefinition,
    pub executor: ToolExecutor,
}

/// Concurrent-safe name → tool mapping. Registration is latest-wins;
/// lookups clone the entry out so dispatch never holds the lock across
/// an await.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, RegisteredTool>>,
}

impl Clone for ToolRegistry {
    fn clone(&self) -> Self {
        Self {
            tools: RwLock::new(self.read_guard().clone()),
        }
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, RegisteredTool>> {
        self.tools.read().expect("tool registry lock poisoned")
    }

    pub fn register(&self, tool: RegisteredTool) {
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .insert(tool.definition.name.clone(), tool);
    }

    pub fn unregister(&self, name: &str) -> Option<RegisteredTool> {
        self.tools
            .write()
            .expect("tool registry lock poisoned")
            .remove(name)
    }

    pub fn get(&self, name: &str) -> Option<RegisteredTool> {
        self.read_guard().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read_guard().contains_key(name)
    }

    /// Definition snapshot for an LLM request, sorted by name for a
    /// stable prompt layout.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut definitions: Vec<ToolDefinition> = self
            .read_guard()
            .values()
            .map(|tool| tool.definition.clone())
            .collect();
        definitions.sort_by(|a, b| a.name.cmp(&b.name));
        definitions
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_guard().keys().cloned().collect();
        names.sort_unstable();
        names
    }

    pub fn count(&self) -> usize {
        self.read_guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Copy every tool from `other`, overwriting same-name entries.
    pub fn merge_from(&self, other: &ToolRegistry) {
        let imported: Vec<RegisteredTool> = other.read_guard().values().cloned().collect();
        let mut guard = self.tools.write().expect("tool registry lock poisoned");
        for tool in imported {
            guard.insert(tool.definition.name.clone(), tool);
        }
    }
}
