use std::collections::BTreeMap;

use async_trait::async_trait;

use permsync_core::{AppResult, OrgId};
use permsync_domain::{ManagedSubject, ResourcePermission, ScopedAction, UserId};

use super::commands::{
    AppliedPermissions, DesiredPermissions, RemovedGrant, ResourcePermissionQuery,
    SearchUsersPermissionsQuery, SubjectCleanup, SubjectGrants, UserPermissionsQuery,
};

/// Relational store of managed roles, permissions and assignments.
///
/// Every mutation runs in one transaction; a failure leaves no partial rows.
#[async_trait]
pub trait ResourcePermissionRepository: Send + Sync {
    /// Applies desired states in one transaction, creating managed roles and
    /// their assignments on first use.
    async fn set_resource_permissions(
        &self,
        org_id: OrgId,
        changes: Vec<DesiredPermissions>,
    ) -> AppResult<Vec<AppliedPermissions>>;

    /// Resolves holders with permissions on one resource.
    async fn get_resource_permissions(
        &self,
        org_id: OrgId,
        query: &ResourcePermissionQuery,
    ) -> AppResult<Vec<ResourcePermission>>;

    /// Deletes every permission at an exact scope in the org.
    async fn delete_resource_permissions(
        &self,
        org_id: OrgId,
        scope: &str,
    ) -> AppResult<Vec<RemovedGrant>>;

    /// Removes the assignments, owned-scope permissions and managed role of a subject.
    async fn delete_all_for_subject(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<SubjectCleanup>;

    /// Finds the managed role of a subject with its permissions.
    async fn find_subject_grants(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<Option<SubjectGrants>>;

    /// Lists permissions reachable from explicit user, team and role inputs.
    async fn get_user_permissions(
        &self,
        query: &UserPermissionsQuery,
    ) -> AppResult<Vec<ScopedAction>>;

    /// Lists permissions of org users across direct, team, basic role and
    /// server admin assignments, indexed by user.
    async fn search_users_permissions(
        &self,
        org_id: OrgId,
        query: &SearchUsersPermissionsQuery,
    ) -> AppResult<BTreeMap<UserId, Vec<ScopedAction>>>;

    /// Lists basic roles per user, server admins included.
    async fn get_users_basic_roles(
        &self,
        org_id: OrgId,
        user_filter: &[UserId],
    ) -> AppResult<BTreeMap<UserId, Vec<String>>>;
}
