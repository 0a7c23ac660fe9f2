use async_trait::async_trait;

use permsync_core::AppResult;
use permsync_domain::action_set_name;

/// Process-lifetime registry of action sets.
#[async_trait]
pub trait ActionSetRegistry: Send + Sync {
    /// Stores the actions of a permission level, replacing any previous set.
    async fn store_action_set(&self, resource: &str, permission: &str, actions: Vec<String>);

    /// Returns the actions stored under a composite name, empty when unknown.
    async fn action_set(&self, name: &str) -> Vec<String>;

    /// Expands a permission level into its atomic actions.
    async fn expand(&self, resource: &str, permission: &str) -> Vec<String> {
        self.action_set(&action_set_name(resource, permission)).await
    }
}

/// Source of candidate role UIDs.
pub trait UidGenerator: Send + Sync {
    /// Returns a new candidate UID. Uniqueness is checked by the caller.
    fn generate(&self) -> AppResult<String>;
}
