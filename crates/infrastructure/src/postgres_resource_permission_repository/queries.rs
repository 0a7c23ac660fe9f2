use super::*;

use permsync_domain::{BuiltinRole, Scope, aggregate_resource_permissions};

impl PostgresResourcePermissionRepository {
    pub(super) async fn get_resource_permissions_impl(
        &self,
        org_id: OrgId,
        query: &ResourcePermissionQuery,
    ) -> AppResult<Vec<ResourcePermission>> {
        if query.actions.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query_as::<_, ResourcePermissionRow>(
            r#"
            SELECT
                p.id,
                r.name AS role_name,
                p.action,
                p.scope,
                p.created,
                p.updated,
                'user' AS holder_kind,
                u.id AS user_id,
                u.login AS user_login,
                u.email AS user_email,
                u.is_service_account,
                NULL::BIGINT AS team_id,
                NULL::TEXT AS team_name,
                NULL::TEXT AS team_email,
                NULL::TEXT AS builtin_role
            FROM permission AS p
            INNER JOIN role AS r ON r.id = p.role_id
            INNER JOIN user_role AS ur ON ur.role_id = r.id
            INNER JOIN user_account AS u ON u.id = ur.user_id
            WHERE ur.org_id IN ($1, 0)
              AND r.org_id IN ($1, 0)
              AND p.action = ANY($2)
              AND p.scope = ANY($3)
              AND ($4 = false OR r.name LIKE 'managed:%')
            UNION ALL
            SELECT
                p.id,
                r.name AS role_name,
                p.action,
                p.scope,
                p.created,
                p.updated,
                'team' AS holder_kind,
                NULL::BIGINT AS user_id,
                NULL::TEXT AS user_login,
                NULL::TEXT AS user_email,
                NULL::BOOLEAN AS is_service_account,
                t.id AS team_id,
                t.name AS team_name,
                t.email AS team_email,
                NULL::TEXT AS builtin_role
            FROM permission AS p
            INNER JOIN role AS r ON r.id = p.role_id
            INNER JOIN team_role AS tr ON tr.role_id = r.id
            INNER JOIN team AS t ON t.id = tr.team_id
            WHERE tr.org_id IN ($1, 0)
              AND r.org_id IN ($1, 0)
              AND p.action = ANY($2)
              AND p.scope = ANY($3)
              AND ($4 = false OR r.name LIKE 'managed:%')
            UNION ALL
            SELECT
                p.id,
                r.name AS role_name,
                p.action,
                p.scope,
                p.created,
                p.updated,
                'builtin' AS holder_kind,
                NULL::BIGINT AS user_id,
                NULL::TEXT AS user_login,
                NULL::TEXT AS user_email,
                NULL::BOOLEAN AS is_service_account,
                NULL::BIGINT AS team_id,
                NULL::TEXT AS team_name,
                NULL::TEXT AS team_email,
                br.role AS builtin_role
            FROM permission AS p
            INNER JOIN role AS r ON r.id = p.role_id
            INNER JOIN builtin_role AS br ON br.role_id = r.id
            WHERE br.org_id IN ($1, 0)
              AND r.org_id IN ($1, 0)
              AND p.action = ANY($2)
              AND p.scope = ANY($3)
              AND ($4 = false OR r.name LIKE 'managed:%')
            ORDER BY id
            "#,
        )
        .bind(org_id.as_i64())
        .bind(query.actions.as_slice())
        .bind(query.scope_candidates())
        .bind(query.only_managed)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Storage(format!("failed to load resource permissions: {error}"))
        })?;

        let flat = rows
            .into_iter()
            .map(ResourcePermissionRow::into_flat)
            .collect::<AppResult<Vec<_>>>()?;

        Ok(aggregate_resource_permissions(
            &query.scope().to_string(),
            &flat,
        ))
    }

    pub(super) async fn get_user_permissions_impl(
        &self,
        query: &UserPermissionsQuery,
    ) -> AppResult<Vec<ScopedAction>> {
        let team_ids: Vec<i64> = query.team_ids.iter().map(TeamId::as_i64).collect();

        let rows = sqlx::query_as::<_, ScopedActionRow>(
            r#"
            SELECT p.action, p.scope
            FROM permission AS p
            INNER JOIN role AS r ON r.id = p.role_id
            WHERE p.role_id IN (
                SELECT ur.role_id
                FROM user_role AS ur
                WHERE ur.user_id = $2 AND ur.org_id IN ($1, 0)
                UNION
                SELECT tr.role_id
                FROM team_role AS tr
                WHERE tr.team_id = ANY($3) AND tr.org_id = $1
                UNION
                SELECT br.role_id
                FROM builtin_role AS br
                WHERE br.role = ANY($4) AND br.org_id IN ($1, 0)
            )
              AND (
                  cardinality($5::TEXT[]) = 0
                  OR EXISTS (
                      SELECT 1 FROM unnest($5::TEXT[]) AS prefix
                      WHERE starts_with(r.name, prefix)
                  )
              )
            ORDER BY p.id
            "#,
        )
        .bind(query.org_id.as_i64())
        .bind(query.user_id.map(|user_id| user_id.as_i64()))
        .bind(team_ids)
        .bind(query.roles.as_slice())
        .bind(query.role_prefixes.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Storage(format!("failed to load user permissions: {error}")))?;

        Ok(rows
            .into_iter()
            .map(|row| ScopedAction {
                action: row.action,
                scope: row.scope,
            })
            .collect())
    }

    pub(super) async fn search_users_permissions_impl(
        &self,
        org_id: OrgId,
        query: &SearchUsersPermissionsQuery,
    ) -> AppResult<BTreeMap<UserId, Vec<ScopedAction>>> {
        let scopes = query
            .scope
            .as_deref()
            .map(|scope| Scope::parse(scope).query_candidates(&[]))
            .unwrap_or_default();

        let rows = sqlx::query_as::<_, UserScopedActionRow>(
            r#"
            WITH assignments AS (
                SELECT ur.user_id, ur.role_id
                FROM user_role AS ur
                WHERE ur.org_id IN ($1, 0)
                UNION ALL
                SELECT tm.user_id, tr.role_id
                FROM team_role AS tr
                INNER JOIN team_member AS tm
                    ON tm.team_id = tr.team_id AND tm.org_id = $1
                WHERE tr.org_id = $1
                UNION ALL
                SELECT ou.user_id, br.role_id
                FROM builtin_role AS br
                INNER JOIN org_user AS ou
                    ON ou.role = br.role AND ou.org_id = $1
                WHERE br.org_id IN ($1, 0)
                UNION ALL
                SELECT ua.id AS user_id, br.role_id
                FROM builtin_role AS br
                INNER JOIN user_account AS ua ON ua.is_admin
                WHERE br.role = $2 AND br.org_id IN ($1, 0)
            )
            SELECT DISTINCT a.user_id, p.action, p.scope
            FROM assignments AS a
            INNER JOIN permission AS p ON p.role_id = a.role_id
            INNER JOIN role AS r ON r.id = a.role_id
            WHERE ($3::BIGINT IS NULL OR a.user_id = $3)
              AND ($4::TEXT IS NULL OR starts_with(p.action, $4))
              AND ($5::TEXT IS NULL OR p.action = $5)
              AND (cardinality($6::TEXT[]) = 0 OR p.scope = ANY($6))
              AND (
                  cardinality($7::TEXT[]) = 0
                  OR EXISTS (
                      SELECT 1 FROM unnest($7::TEXT[]) AS prefix
                      WHERE starts_with(r.name, prefix)
                  )
              )
            ORDER BY a.user_id, p.action, p.scope
            "#,
        )
        .bind(org_id.as_i64())
        .bind(BuiltinRole::ServerAdmin.as_str())
        .bind(query.user_id.map(|user_id| user_id.as_i64()))
        .bind(query.action_prefix.as_deref())
        .bind(query.action.as_deref())
        .bind(scopes)
        .bind(query.role_prefixes.as_slice())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Storage(format!("failed to search users permissions: {error}"))
        })?;

        let mut by_user: BTreeMap<UserId, Vec<ScopedAction>> = BTreeMap::new();
        for row in rows {
            by_user
                .entry(UserId::new(row.user_id))
                .or_default()
                .push(ScopedAction {
                    action: row.action,
                    scope: row.scope,
                });
        }

        Ok(by_user)
    }

    pub(super) async fn get_users_basic_roles_impl(
        &self,
        org_id: OrgId,
        user_filter: &[UserId],
    ) -> AppResult<BTreeMap<UserId, Vec<String>>> {
        let user_ids: Vec<i64> = user_filter.iter().map(UserId::as_i64).collect();

        let rows = sqlx::query_as::<_, UserBasicRoleRow>(
            r#"
            SELECT ou.user_id, ou.role
            FROM org_user AS ou
            WHERE ou.org_id = $1
              AND (cardinality($2::BIGINT[]) = 0 OR ou.user_id = ANY($2))
            UNION ALL
            SELECT ua.id AS user_id, $3::TEXT AS role
            FROM user_account AS ua
            WHERE ua.is_admin
              AND (cardinality($2::BIGINT[]) = 0 OR ua.id = ANY($2))
            ORDER BY user_id, role
            "#,
        )
        .bind(org_id.as_i64())
        .bind(user_ids)
        .bind(BuiltinRole::ServerAdmin.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Storage(format!("failed to load basic roles: {error}")))?;

        let mut by_user: BTreeMap<UserId, Vec<String>> = BTreeMap::new();
        for row in rows {
            by_user
                .entry(UserId::new(row.user_id))
                .or_default()
                .push(row.role);
        }

        Ok(by_user)
    }
}
