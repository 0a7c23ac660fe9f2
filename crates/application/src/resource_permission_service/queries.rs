use super::*;

use std::collections::BTreeMap;

use permsync_domain::{ScopedAction, UserId};

use crate::{ResourcePermissionQuery, SearchUsersPermissionsQuery, SyncState, UserPermissionsQuery};

impl ResourcePermissionService {
    /// Returns the managed, inherited and provisioned permissions holders
    /// have on one resource. A query without actions returns nothing.
    pub async fn get_resource_permissions(
        &self,
        org_id: OrgId,
        query: &ResourcePermissionQuery,
    ) -> AppResult<Vec<ResourcePermission>> {
        if query.actions.is_empty() {
            return Ok(Vec::new());
        }

        self.repository
            .get_resource_permissions(org_id, query)
            .await
    }

    /// Returns permissions reachable from explicit user, team and role inputs.
    pub async fn get_user_permissions(
        &self,
        query: &UserPermissionsQuery,
    ) -> AppResult<Vec<ScopedAction>> {
        if query.user_id.is_none() && query.team_ids.is_empty() && query.roles.is_empty() {
            return Ok(Vec::new());
        }

        self.repository.get_user_permissions(query).await
    }

    /// Returns permissions of org users indexed by user.
    pub async fn search_users_permissions(
        &self,
        org_id: OrgId,
        query: &SearchUsersPermissionsQuery,
    ) -> AppResult<BTreeMap<UserId, Vec<ScopedAction>>> {
        self.repository
            .search_users_permissions(org_id, query)
            .await
    }

    /// Returns basic roles per user, server admins included.
    pub async fn get_users_basic_roles(
        &self,
        org_id: OrgId,
        user_filter: &[UserId],
    ) -> AppResult<BTreeMap<UserId, Vec<String>>> {
        self.repository
            .get_users_basic_roles(org_id, user_filter)
            .await
    }

    /// Returns the tuple synchronization marker of a subject.
    pub async fn sync_state(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<Option<SyncState>> {
        self.sync_state.find_state(org_id, subject).await
    }
}
