use permsync_core::OrgId;
use permsync_domain::{
    ManagedSubject, Permission, ResourceContainer, ResourcePermission, Role, Scope, TeamId, UserId,
};

/// Desired permissions of one subject on one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetResourcePermissionCommand {
    /// Atomic actions to grant. An empty list with an empty level revokes everything.
    pub actions: Vec<String>,
    /// Resource kind, e.g. `dashboards`.
    pub resource: String,
    /// Resource attribute, e.g. `uid`.
    pub resource_attribute: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Optional permission level expanded through the action-set registry.
    pub permission: String,
}

impl SetResourcePermissionCommand {
    /// Returns the targeted scope.
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope::new(
            self.resource.as_str(),
            self.resource_attribute.as_str(),
            self.resource_id.as_str(),
        )
    }

    /// Returns the container used to derive tuples for this resource.
    #[must_use]
    pub fn container(&self) -> ResourceContainer {
        ResourceContainer::for_resource(&self.resource)
    }
}

/// Batch entry pairing a resolved subject with its command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPermissionCommand {
    /// Subject receiving the permissions.
    pub subject: ManagedSubject,
    /// Desired permissions.
    pub command: SetResourcePermissionCommand,
}

/// Fully expanded desired state handed to the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesiredPermissions {
    /// Subject owning the managed role.
    pub subject: ManagedSubject,
    /// Targeted scope.
    pub scope: Scope,
    /// Complete desired action set, action-set records included.
    pub actions: Vec<String>,
}

/// Change set applied for one desired state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedPermissions {
    /// Subject owning the managed role.
    pub subject: ManagedSubject,
    /// Managed role the permissions belong to.
    pub role: Role,
    /// Whether the role and its assignment were created in this transaction.
    pub role_created: bool,
    /// Actions inserted.
    pub inserted: Vec<String>,
    /// Actions deleted.
    pub removed: Vec<String>,
    /// Aggregated permission at the scope, `None` once nothing remains.
    pub permission: Option<ResourcePermission>,
}

impl AppliedPermissions {
    /// Returns whether the transaction changed any row.
    #[must_use]
    pub fn changed(&self) -> bool {
        self.role_created || !self.inserted.is_empty() || !self.removed.is_empty()
    }
}

/// Query for the permissions holders have on one resource.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourcePermissionQuery {
    /// Actions to filter on. No actions yields no results.
    pub actions: Vec<String>,
    /// Resource kind.
    pub resource: String,
    /// Resource attribute.
    pub resource_attribute: String,
    /// Resource identifier.
    pub resource_id: String,
    /// Restricts results to managed roles.
    pub only_managed: bool,
    /// Ancestor scopes whose grants also apply.
    pub inherited_scopes: Vec<String>,
}

impl ResourcePermissionQuery {
    /// Returns the queried scope.
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope::new(
            self.resource.as_str(),
            self.resource_attribute.as_str(),
            self.resource_id.as_str(),
        )
    }

    /// Returns every stored scope that matches the queried resource.
    #[must_use]
    pub fn scope_candidates(&self) -> Vec<String> {
        self.scope().query_candidates(&self.inherited_scopes)
    }
}

/// Permission removed from storage, kept for tuple retraction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemovedGrant {
    /// UID of the owning role.
    pub role_uid: String,
    /// Name of the owning role.
    pub role_name: String,
    /// Removed action.
    pub action: String,
    /// Removed scope.
    pub scope: String,
}

/// Result of removing every grant of a subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubjectCleanup {
    /// UIDs of the deleted managed roles; a user cleaned up in the global
    /// org may lose one per org.
    pub removed_role_uids: Vec<String>,
    /// Deleted permissions of the managed role and on the subject itself.
    pub removed_grants: Vec<RemovedGrant>,
}

/// Managed role of a subject with all its permissions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectGrants {
    /// Managed role.
    pub role: Role,
    /// Stored permissions of the role.
    pub permissions: Vec<Permission>,
}

/// Effective permission lookup for explicit assignment inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserPermissionsQuery {
    /// Organization to resolve in; global assignments always apply.
    pub org_id: OrgId,
    /// Directly assigned user.
    pub user_id: Option<UserId>,
    /// Teams the user belongs to.
    pub team_ids: Vec<TeamId>,
    /// Built-in roles the user holds.
    pub roles: Vec<String>,
    /// Optional role name prefixes restricting the roles considered.
    pub role_prefixes: Vec<String>,
}

/// Search over the permissions of every user in an org.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchUsersPermissionsQuery {
    /// Restricts the search to one user.
    pub user_id: Option<UserId>,
    /// Keeps actions starting with this prefix.
    pub action_prefix: Option<String>,
    /// Keeps one exact action.
    pub action: Option<String>,
    /// Keeps permissions whose scope matches this scope or one of its wildcards.
    pub scope: Option<String>,
    /// Optional role name prefixes restricting the roles considered.
    pub role_prefixes: Vec<String>,
}
