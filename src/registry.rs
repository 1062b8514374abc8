//! Action registry: named asynchronous executors for task runs.
//!
//! Each task names an action; the registry resolves that name to an executor
//! when a run is dispatched, not when the task is added. The registry is
//! populated once at construction and immutable afterwards, so lookups need
//! no locking.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// An asynchronous operation a task repeatedly invokes.
///
/// Expected failures must be reported as `Ok(false)`; an `Err` is treated as
/// a failed run but logged distinctly as a thrown error.
#[async_trait]
pub trait TaskAction: Send + Sync {
    async fn execute(&self, params: &Value) -> anyhow::Result<bool>;
}

struct FnAction<F>(F);

#[async_trait]
impl<F, Fut> TaskAction for FnAction<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<bool>> + Send,
{
    async fn execute(&self, params: &Value) -> anyhow::Result<bool> {
        (self.0)(params.clone()).await
    }
}

/// Wrap an async closure as a [`TaskAction`].
pub fn action_fn<F, Fut>(f: F) -> Arc<dyn TaskAction>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
{
    Arc::new(FnAction(f))
}

/// Immutable mapping from action name to executor.
#[derive(Clone, Default)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn TaskAction>>,
}

impl ActionRegistry {
    pub fn builder() -> ActionRegistryBuilder {
        ActionRegistryBuilder::default()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn TaskAction>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn action_names(&self) -> Vec<&str> {
        self.actions.keys().map(String::as_str).collect()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.action_names())
            .finish()
    }
}

/// Builder for [`ActionRegistry`]; registration happens only here.
#[derive(Default)]
pub struct ActionRegistryBuilder {
    actions: HashMap<String, Arc<dyn TaskAction>>,
}

impl ActionRegistryBuilder {
    pub fn register(mut self, name: impl Into<String>, action: Arc<dyn TaskAction>) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    pub fn register_fn<F, Fut>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<bool>> + Send + 'static,
    {
        self.register(name, action_fn(f))
    }

    pub fn build(self) -> ActionRegistry {
        ActionRegistry {
            actions: self.actions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn registered_action_executes() {
        let registry = ActionRegistry::builder()
            .register_fn("echo-flag", |params| async move {
                Ok(params["flag"].as_bool().unwrap_or(false))
            })
            .build();

        assert_eq!(registry.len(), 1);
        assert!(registry.contains("echo-flag"));

        let action = registry.get("echo-flag").unwrap();
        assert!(action.execute(&json!({"flag": true})).await.unwrap());
        assert!(!action.execute(&json!({"flag": false})).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_action_is_absent() {
        let registry = ActionRegistry::builder()
            .register_fn("noop", |_| async { Ok(true) })
            .build();
        assert!(registry.get("missing").is_none());
    }

    #[tokio::test]
    async fn action_errors_surface_as_err() {
        let registry = ActionRegistry::builder()
            .register_fn("always-throws", |_| async {
                Err(anyhow::anyhow!("connection refused"))
            })
            .build();
        let action = registry.get("always-throws").unwrap();
        assert!(action.execute(&json!({})).await.is_err());
    }
}
