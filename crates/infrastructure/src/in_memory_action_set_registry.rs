use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use permsync_application::ActionSetRegistry;
use permsync_domain::{ActionSet, action_set_name, default_action_sets};

/// Process-lifetime action-set registry behind a read/write lock.
#[derive(Debug, Default)]
pub struct InMemoryActionSetRegistry {
    sets: RwLock<HashMap<String, Vec<String>>>,
}

impl InMemoryActionSetRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the given action sets.
    #[must_use]
    pub fn with_action_sets(action_sets: Vec<ActionSet>) -> Self {
        let sets = action_sets
            .into_iter()
            .map(|action_set| (action_set.name, action_set.actions))
            .collect();

        Self {
            sets: RwLock::new(sets),
        }
    }

    /// Creates a registry holding the folder and dashboard action sets.
    #[must_use]
    pub fn with_default_action_sets() -> Self {
        Self::with_action_sets(default_action_sets())
    }
}

#[async_trait]
impl ActionSetRegistry for InMemoryActionSetRegistry {
    async fn store_action_set(&self, resource: &str, permission: &str, actions: Vec<String>) {
        self.sets
            .write()
            .await
            .insert(action_set_name(resource, permission), actions);
    }

    async fn action_set(&self, name: &str) -> Vec<String> {
        self.sets
            .read()
            .await
            .get(name)
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use permsync_application::ActionSetRegistry;

    use super::InMemoryActionSetRegistry;

    #[tokio::test]
    async fn unknown_level_expands_to_nothing() {
        let registry = InMemoryActionSetRegistry::new();
        assert!(registry.expand("folders", "edit").await.is_empty());
    }

    #[tokio::test]
    async fn last_store_wins() {
        let registry = InMemoryActionSetRegistry::new();
        registry
            .store_action_set("folders", "edit", vec!["folders:read".to_owned()])
            .await;
        registry
            .store_action_set("Folders", "Edit", vec!["folders:write".to_owned()])
            .await;

        assert_eq!(
            registry.action_set("folders:edit").await,
            vec!["folders:write".to_owned()]
        );
    }

    #[tokio::test]
    async fn default_sets_expand_by_level() {
        let registry = InMemoryActionSetRegistry::with_default_action_sets();
        let actions = registry.expand("dashboards", "view").await;
        assert_eq!(actions, vec!["dashboards:read".to_owned()]);
    }
}
