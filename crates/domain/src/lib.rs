//! Domain entities and invariants.

#![forbid(unsafe_code)]

mod action_set;
mod permission;
mod role;
mod scope;
mod subject;
mod tuple;

pub use action_set::{ActionSet, action_set_name, default_action_sets};
pub use permission::{
    FlatResourcePermission, Permission, PermissionClass, PermissionDiff, PermissionHolder,
    ResourcePermission, ScopedAction, aggregate_resource_permissions,
};
pub use role::{MANAGED_ROLE_PREFIX, Role, is_managed_role_name};
pub use scope::{SCOPE_DELIMITER, Scope, WILDCARD, compose_scope, scope_matches, split_scope};
pub use subject::{BuiltinRole, ManagedSubject, TeamId, UserId, basic_role_object};
pub use tuple::{
    ASSIGNEE_RELATION, MEMBER_RELATION, RelationshipCondition, ResourceContainer, TupleKey,
    relation_object_for_action,
};
