use chrono::{DateTime, Utc};
use permsync_core::OrgId;
use serde::{Deserialize, Serialize};

/// Name prefix reserved for roles owned by the permission store.
pub const MANAGED_ROLE_PREFIX: &str = "managed:";

/// Returns whether a role name carries the managed prefix.
#[must_use]
pub fn is_managed_role_name(name: &str) -> bool {
    name.starts_with(MANAGED_ROLE_PREFIX)
}

/// Stored role row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    /// Store-assigned identifier.
    pub id: i64,
    /// External short identifier, unique per org.
    pub uid: String,
    /// Owning organization.
    pub org_id: OrgId,
    /// Role name, unique per org.
    pub name: String,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last update timestamp.
    pub updated: DateTime<Utc>,
}

impl Role {
    /// Returns whether this role is managed by the permission store.
    #[must_use]
    pub fn is_managed(&self) -> bool {
        is_managed_role_name(&self.name)
    }

    /// Returns the tuple reference for the role, e.g. `role:ab12`.
    #[must_use]
    pub fn tuple_reference(&self) -> String {
        format!("role:{}", self.uid)
    }
}
