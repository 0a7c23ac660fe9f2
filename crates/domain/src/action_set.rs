use serde::{Deserialize, Serialize};

/// Returns the action-set name for a resource and permission level,
/// e.g. `folders:edit`.
#[must_use]
pub fn action_set_name(resource: &str, permission: &str) -> String {
    format!("{}:{}", resource.to_lowercase(), permission.to_lowercase())
}

/// Named bundle of atomic actions granted by one permission level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSet {
    /// Composite name, see [`action_set_name`].
    pub name: String,
    /// Atomic actions in grant order.
    pub actions: Vec<String>,
}

impl ActionSet {
    /// Builds an action set for a resource and permission level.
    #[must_use]
    pub fn new(resource: &str, permission: &str, actions: &[&str]) -> Self {
        Self {
            name: action_set_name(resource, permission),
            actions: actions.iter().map(|action| (*action).to_owned()).collect(),
        }
    }
}

/// Action sets provisioned at startup for folders and dashboards.
#[must_use]
pub fn default_action_sets() -> Vec<ActionSet> {
    const DASHBOARD_VIEW: &[&str] = &["dashboards:read"];
    const DASHBOARD_EDIT: &[&str] = &["dashboards:read", "dashboards:write", "dashboards:delete"];
    const DASHBOARD_ADMIN: &[&str] = &[
        "dashboards:read",
        "dashboards:write",
        "dashboards:delete",
        "dashboards.permissions:read",
        "dashboards.permissions:write",
    ];
    const FOLDER_VIEW: &[&str] = &["folders:read", "dashboards:read"];
    const FOLDER_EDIT: &[&str] = &[
        "folders:read",
        "folders:write",
        "folders:delete",
        "dashboards:read",
        "dashboards:write",
        "dashboards:create",
        "dashboards:delete",
    ];
    const FOLDER_ADMIN: &[&str] = &[
        "folders:read",
        "folders:write",
        "folders:delete",
        "folders.permissions:read",
        "folders.permissions:write",
        "dashboards:read",
        "dashboards:write",
        "dashboards:create",
        "dashboards:delete",
        "dashboards.permissions:read",
        "dashboards.permissions:write",
    ];

    vec![
        ActionSet::new("dashboards", "view", DASHBOARD_VIEW),
        ActionSet::new("dashboards", "edit", DASHBOARD_EDIT),
        ActionSet::new("dashboards", "admin", DASHBOARD_ADMIN),
        ActionSet::new("folders", "view", FOLDER_VIEW),
        ActionSet::new("folders", "edit", FOLDER_EDIT),
        ActionSet::new("folders", "admin", FOLDER_ADMIN),
    ]
}
