use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use permsync_application::{
    AppliedPermissions, DesiredPermissions, MembershipRepository, OrgMembership,
    RandomUidGenerator, RemovedGrant, ResourcePermissionQuery, ResourcePermissionRepository,
    SearchUsersPermissionsQuery, SubjectCleanup, SubjectGrants, TeamMembership, UidGenerator,
    UserPermissionsQuery,
};
use permsync_core::{AppResult, OrgId};
use permsync_domain::{ManagedSubject, ResourcePermission, Role, ScopedAction, TeamId, UserId};

mod queries;
mod tables;


use tables::{AssignmentHolder, PermissionTables};

/// User account row known to the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserAccount {
    /// User identifier.
    pub id: UserId,
    /// Login name.
    pub login: String,
    /// Email address.
    pub email: String,
    /// Whether the account is a service account.
    pub is_service_account: bool,
    /// Whether the user is a server administrator.
    pub is_admin: bool,
}

impl UserAccount {
    /// Creates a regular user with a derived email address.
    #[must_use]
    pub fn new(id: i64, login: &str) -> Self {
        Self {
            id: UserId::new(id),
            login: login.to_owned(),
            email: format!("{login}@example.com"),
            is_service_account: false,
            is_admin: false,
        }
    }
}

/// Team row known to the in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamRecord {
    /// Team identifier.
    pub id: TeamId,
    /// Owning organization.
    pub org_id: OrgId,
    /// Team name.
    pub name: String,
    /// Team email address.
    pub email: String,
}

/// In-memory permission store.
///
/// Each operation holds one lock and mutates a working copy of the tables
/// that replaces the stored tables only when the operation succeeds.
pub struct InMemoryResourcePermissionRepository {
    tables: Mutex<PermissionTables>,
    uid_generator: Arc<dyn UidGenerator>,
}

impl Default for InMemoryResourcePermissionRepository {
    fn default() -> Self {
        Self::new(Arc::new(RandomUidGenerator))
    }
}

impl InMemoryResourcePermissionRepository {
    /// Creates an empty store drawing role UIDs from the given generator.
    #[must_use]
    pub fn new(uid_generator: Arc<dyn UidGenerator>) -> Self {
        Self {
            tables: Mutex::new(PermissionTables::default()),
            uid_generator,
        }
    }

    /// Adds or replaces a user account.
    pub async fn insert_user(&self, user: UserAccount) {
        self.tables.lock().await.users.insert(user.id, user);
    }

    /// Adds or replaces a team.
    pub async fn insert_team(&self, team: TeamRecord) {
        self.tables.lock().await.teams.insert(team.id, team);
    }

    /// Adds a user to an org with a basic role.
    pub async fn add_org_member(&self, membership: OrgMembership) {
        self.tables.lock().await.org_members.push(membership);
    }

    /// Adds a user to a team.
    pub async fn add_team_member(&self, membership: TeamMembership) {
        self.tables.lock().await.team_members.push(membership);
    }

    /// Creates a role defined outside the permission store, assigns it to a
    /// subject and grants it the given actions.
    pub async fn insert_provisioned_role(
        &self,
        org_id: OrgId,
        name: &str,
        subject: ManagedSubject,
        grants: &[ScopedAction],
    ) -> AppResult<Role> {
        self.transaction(|tables| {
            let uid = tables.free_uid(org_id, self.uid_generator.as_ref())?;
            let role = tables.create_role(org_id, name, &uid, Utc::now())?;
            tables.add_assignment(org_id, AssignmentHolder::from(subject), role.id)?;
            for grant in grants {
                tables.insert_permission(role.id, &grant.action, &grant.scope, Utc::now());
            }
            Ok(role)
        })
        .await
    }

    /// Runs a mutation against a working copy and keeps it only on success.
    async fn transaction<T>(
        &self,
        mutation: impl FnOnce(&mut PermissionTables) -> AppResult<T>,
    ) -> AppResult<T> {
        let mut tables = self.tables.lock().await;
        let mut working_copy = tables.clone();
        let result = mutation(&mut working_copy)?;
        *tables = working_copy;
        Ok(result)
    }
}

#[async_trait]
impl ResourcePermissionRepository for InMemoryResourcePermissionRepository {
    async fn set_resource_permissions(
        &self,
        org_id: OrgId,
        changes: Vec<DesiredPermissions>,
    ) -> AppResult<Vec<AppliedPermissions>> {
        self.transaction(|tables| {
            changes
                .into_iter()
                .map(|change| {
                    tables.apply_desired(org_id, change, self.uid_generator.as_ref(), Utc::now())
                })
                .collect()
        })
        .await
    }

    async fn get_resource_permissions(
        &self,
        org_id: OrgId,
        query: &ResourcePermissionQuery,
    ) -> AppResult<Vec<ResourcePermission>> {
        Ok(self.tables.lock().await.resource_permissions(org_id, query))
    }

    async fn delete_resource_permissions(
        &self,
        org_id: OrgId,
        scope: &str,
    ) -> AppResult<Vec<RemovedGrant>> {
        self.transaction(|tables| Ok(tables.delete_scope(org_id, scope)))
            .await
    }

    async fn delete_all_for_subject(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<SubjectCleanup> {
        self.transaction(|tables| Ok(tables.delete_subject(org_id, subject)))
            .await
    }

    async fn find_subject_grants(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<Option<SubjectGrants>> {
        Ok(self.tables.lock().await.subject_grants(org_id, subject))
    }

    async fn get_user_permissions(
        &self,
        query: &UserPermissionsQuery,
    ) -> AppResult<Vec<ScopedAction>> {
        Ok(self.tables.lock().await.user_permissions(query))
    }

    async fn search_users_permissions(
        &self,
        org_id: OrgId,
        query: &SearchUsersPermissionsQuery,
    ) -> AppResult<BTreeMap<UserId, Vec<ScopedAction>>> {
        Ok(self.tables.lock().await.search_users_permissions(org_id, query))
    }

    async fn get_users_basic_roles(
        &self,
        org_id: OrgId,
        user_filter: &[UserId],
    ) -> AppResult<BTreeMap<UserId, Vec<String>>> {
        Ok(self.tables.lock().await.users_basic_roles(org_id, user_filter))
    }
}

#[async_trait]
impl MembershipRepository for InMemoryResourcePermissionRepository {
    async fn list_org_memberships(&self) -> AppResult<Vec<OrgMembership>> {
        Ok(self.tables.lock().await.org_members.clone())
    }

    async fn list_team_memberships(&self) -> AppResult<Vec<TeamMembership>> {
        Ok(self.tables.lock().await.team_members.clone())
    }
}
