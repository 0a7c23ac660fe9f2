use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, Postgres, Transaction};

use permsync_application::{
    AppliedPermissions, DesiredPermissions, RemovedGrant, ResourcePermissionQuery,
    ResourcePermissionRepository, SearchUsersPermissionsQuery, SubjectCleanup, SubjectGrants,
    UidGenerator, UserPermissionsQuery,
};
use permsync_core::{AppError, AppResult, OrgId};
use permsync_domain::{
    FlatResourcePermission, ManagedSubject, Permission, PermissionHolder, ResourcePermission,
    Role, ScopedAction, TeamId, UserId,
};

mod cleanup;
mod managed_roles;
mod queries;
mod set_permissions;

#[cfg(test)]
mod tests;

/// PostgreSQL-backed store of managed roles, permissions and assignments.
#[derive(Clone)]
pub struct PostgresResourcePermissionRepository {
    pool: PgPool,
    uid_generator: Arc<dyn UidGenerator>,
}

impl PostgresResourcePermissionRepository {
    /// Creates a repository with the provided connection pool and role UID source.
    #[must_use]
    pub fn new(pool: PgPool, uid_generator: Arc<dyn UidGenerator>) -> Self {
        Self {
            pool,
            uid_generator,
        }
    }

    async fn begin(&self) -> AppResult<Transaction<'_, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|error| AppError::Storage(format!("failed to begin transaction: {error}")))
    }
}

#[derive(Debug, FromRow)]
struct RoleRow {
    id: i64,
    uid: String,
    org_id: i64,
    name: String,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

impl RoleRow {
    fn into_role(self) -> Role {
        Role {
            id: self.id,
            uid: self.uid,
            org_id: OrgId::new(self.org_id),
            name: self.name,
            created: self.created,
            updated: self.updated,
        }
    }
}

#[derive(Debug, FromRow)]
struct PermissionRow {
    id: i64,
    role_id: i64,
    action: String,
    scope: String,
    kind: String,
    attribute: String,
    identifier: String,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

impl PermissionRow {
    fn into_permission(self) -> Permission {
        Permission {
            id: self.id,
            role_id: self.role_id,
            action: self.action,
            scope: self.scope,
            kind: self.kind,
            attribute: self.attribute,
            identifier: self.identifier,
            created: self.created,
            updated: self.updated,
        }
    }
}

#[derive(Debug, FromRow)]
struct ResourcePermissionRow {
    id: i64,
    role_name: String,
    action: String,
    scope: String,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
    holder_kind: String,
    user_id: Option<i64>,
    user_login: Option<String>,
    user_email: Option<String>,
    is_service_account: Option<bool>,
    team_id: Option<i64>,
    team_name: Option<String>,
    team_email: Option<String>,
    builtin_role: Option<String>,
}

impl ResourcePermissionRow {
    fn into_flat(self) -> AppResult<FlatResourcePermission> {
        let holder = match self.holder_kind.as_str() {
            "user" => PermissionHolder::User {
                user_id: UserId::new(self.user_id.ok_or_else(|| missing_column("user_id"))?),
                login: self.user_login.unwrap_or_default(),
                email: self.user_email.unwrap_or_default(),
                is_service_account: self.is_service_account.unwrap_or(false),
            },
            "team" => PermissionHolder::Team {
                team_id: TeamId::new(self.team_id.ok_or_else(|| missing_column("team_id"))?),
                name: self.team_name.unwrap_or_default(),
                email: self.team_email.unwrap_or_default(),
            },
            "builtin" => PermissionHolder::BuiltinRole(
                self.builtin_role
                    .ok_or_else(|| missing_column("builtin_role"))?,
            ),
            other => {
                return Err(AppError::Storage(format!(
                    "unknown permission holder kind '{other}'"
                )));
            }
        };

        Ok(FlatResourcePermission {
            id: self.id,
            role_name: self.role_name,
            action: self.action,
            scope: self.scope,
            holder,
            created: self.created,
            updated: self.updated,
        })
    }
}

#[derive(Debug, FromRow)]
struct RemovedGrantRow {
    role_uid: String,
    role_name: String,
    action: String,
    scope: String,
}

impl From<RemovedGrantRow> for RemovedGrant {
    fn from(row: RemovedGrantRow) -> Self {
        Self {
            role_uid: row.role_uid,
            role_name: row.role_name,
            action: row.action,
            scope: row.scope,
        }
    }
}

#[derive(Debug, FromRow)]
struct ScopedActionRow {
    action: String,
    scope: String,
}

#[derive(Debug, FromRow)]
struct UserScopedActionRow {
    user_id: i64,
    action: String,
    scope: String,
}

#[derive(Debug, FromRow)]
struct UserBasicRoleRow {
    user_id: i64,
    role: String,
}

fn missing_column(column: &str) -> AppError {
    AppError::Storage(format!("resource permission row is missing '{column}'"))
}

#[async_trait]
impl ResourcePermissionRepository for PostgresResourcePermissionRepository {
    async fn set_resource_permissions(
        &self,
        org_id: OrgId,
        changes: Vec<DesiredPermissions>,
    ) -> AppResult<Vec<AppliedPermissions>> {
        self.set_resource_permissions_impl(org_id, changes).await
    }

    async fn get_resource_permissions(
        &self,
        org_id: OrgId,
        query: &ResourcePermissionQuery,
    ) -> AppResult<Vec<ResourcePermission>> {
        self.get_resource_permissions_impl(org_id, query).await
    }

    async fn delete_resource_permissions(
        &self,
        org_id: OrgId,
        scope: &str,
    ) -> AppResult<Vec<RemovedGrant>> {
        self.delete_resource_permissions_impl(org_id, scope).await
    }

    async fn delete_all_for_subject(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<SubjectCleanup> {
        self.delete_all_for_subject_impl(org_id, subject).await
    }

    async fn find_subject_grants(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<Option<SubjectGrants>> {
        self.find_subject_grants_impl(org_id, subject).await
    }

    async fn get_user_permissions(
        &self,
        query: &UserPermissionsQuery,
    ) -> AppResult<Vec<ScopedAction>> {
        self.get_user_permissions_impl(query).await
    }

    async fn search_users_permissions(
        &self,
        org_id: OrgId,
        query: &SearchUsersPermissionsQuery,
    ) -> AppResult<BTreeMap<UserId, Vec<ScopedAction>>> {
        self.search_users_permissions_impl(org_id, query).await
    }

    async fn get_users_basic_roles(
        &self,
        org_id: OrgId,
        user_filter: &[UserId],
    ) -> AppResult<BTreeMap<UserId, Vec<String>>> {
        self.get_users_basic_roles_impl(org_id, user_filter).await
    }
}
