use super::*;

use super::managed_roles::find_role_by_name;

impl PostgresResourcePermissionRepository {
    pub(super) async fn delete_resource_permissions_impl(
        &self,
        org_id: OrgId,
        scope: &str,
    ) -> AppResult<Vec<RemovedGrant>> {
        let rows = sqlx::query_as::<_, RemovedGrantRow>(
            r#"
            DELETE FROM permission AS p
            USING role AS r
            WHERE r.id = p.role_id
              AND r.org_id = $1
              AND p.scope = $2
            RETURNING r.uid AS role_uid, r.name AS role_name, p.action, p.scope
            "#,
        )
        .bind(org_id.as_i64())
        .bind(scope)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Storage(format!(
                "failed to delete permissions at scope '{scope}': {error}"
            ))
        })?;

        Ok(rows.into_iter().map(RemovedGrant::from).collect())
    }

    pub(super) async fn delete_all_for_subject_impl(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<SubjectCleanup> {
        let mut transaction = self.begin().await?;
        let roles = find_cleanup_roles(&mut transaction, org_id, subject).await?;
        let role_ids: Vec<i64> = roles.iter().map(|role| role.id).collect();

        delete_assignments(&mut transaction, org_id, subject, &role_ids).await?;

        let mut removed_grants = Vec::new();
        if let Some(owned_scope) = owned_scope_to_clear(org_id, subject) {
            let rows = sqlx::query_as::<_, RemovedGrantRow>(
                r#"
                DELETE FROM permission AS p
                USING role AS r
                WHERE r.id = p.role_id
                  AND p.scope = $1
                  AND ($2 = 0 OR r.org_id = $2)
                RETURNING r.uid AS role_uid, r.name AS role_name, p.action, p.scope
                "#,
            )
            .bind(owned_scope.as_str())
            .bind(org_id.as_i64())
            .fetch_all(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Storage(format!(
                    "failed to delete permissions on {subject}: {error}"
                ))
            })?;
            removed_grants.extend(rows.into_iter().map(RemovedGrant::from));
        }

        if !role_ids.is_empty() {
            let rows = sqlx::query_as::<_, RemovedGrantRow>(
                r#"
                DELETE FROM permission AS p
                USING role AS r
                WHERE r.id = p.role_id
                  AND p.role_id = ANY($1)
                RETURNING r.uid AS role_uid, r.name AS role_name, p.action, p.scope
                "#,
            )
            .bind(role_ids.as_slice())
            .fetch_all(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Storage(format!(
                    "failed to delete permissions of managed roles of {subject}: {error}"
                ))
            })?;
            removed_grants.extend(rows.into_iter().map(RemovedGrant::from));

            sqlx::query(
                r#"
                DELETE FROM role
                WHERE id = ANY($1)
                "#,
            )
            .bind(role_ids.as_slice())
            .execute(&mut *transaction)
            .await
            .map_err(|error| {
                AppError::Storage(format!(
                    "failed to delete managed roles of {subject}: {error}"
                ))
            })?;
        }

        transaction
            .commit()
            .await
            .map_err(|error| AppError::Storage(format!("failed to commit transaction: {error}")))?;

        Ok(SubjectCleanup {
            removed_role_uids: roles.into_iter().map(|role| role.uid).collect(),
            removed_grants,
        })
    }

    pub(super) async fn find_subject_grants_impl(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<Option<SubjectGrants>> {
        let Some(role) =
            find_role_by_name(&self.pool, org_id, &subject.managed_role_name()).await?
        else {
            return Ok(None);
        };

        let permissions = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT id, role_id, action, scope, kind, attribute, identifier, created, updated
            FROM permission
            WHERE role_id = $1
            ORDER BY id
            "#,
        )
        .bind(role.id)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Storage(format!(
                "failed to load permissions of managed role '{}': {error}",
                role.name
            ))
        })?
        .into_iter()
        .map(PermissionRow::into_permission)
        .collect();

        Ok(Some(SubjectGrants { role, permissions }))
    }
}

/// Returns the scope addressing the subject whose permissions are cleared:
/// users only in the global org, teams always, built-in roles never.
fn owned_scope_to_clear(org_id: OrgId, subject: ManagedSubject) -> Option<String> {
    match subject {
        ManagedSubject::User(_) if !org_id.is_global() => None,
        _ => subject.owned_scope(),
    }
}

/// Loads the managed roles removed with the subject. A user cleaned up in the
/// global org loses its managed role in every org.
async fn find_cleanup_roles(
    transaction: &mut Transaction<'_, Postgres>,
    org_id: OrgId,
    subject: ManagedSubject,
) -> AppResult<Vec<Role>> {
    let every_org = org_id.is_global() && matches!(subject, ManagedSubject::User(_));
    let role_name = subject.managed_role_name();

    let rows = sqlx::query_as::<_, RoleRow>(
        r#"
        SELECT id, uid, org_id, name, created, updated
        FROM role
        WHERE name = $1 AND ($3 OR org_id = $2)
        ORDER BY id
        FOR UPDATE
        "#,
    )
    .bind(role_name.as_str())
    .bind(org_id.as_i64())
    .bind(every_org)
    .fetch_all(&mut **transaction)
    .await
    .map_err(|error| {
        AppError::Storage(format!("failed to find role '{role_name}': {error}"))
    })?;

    Ok(rows.into_iter().map(RoleRow::into_role).collect())
}

async fn delete_assignments(
    transaction: &mut Transaction<'_, Postgres>,
    org_id: OrgId,
    subject: ManagedSubject,
    managed_role_ids: &[i64],
) -> AppResult<()> {
    let result = match subject {
        ManagedSubject::User(user_id) => {
            sqlx::query(
                r#"
                DELETE FROM user_role
                WHERE user_id = $1 AND ($2 = 0 OR org_id = $2)
                "#,
            )
            .bind(user_id.as_i64())
            .bind(org_id.as_i64())
            .execute(&mut **transaction)
            .await
        }
        ManagedSubject::Team(team_id) => {
            sqlx::query(
                r#"
                DELETE FROM team_role
                WHERE team_id = $1 AND org_id = $2
                "#,
            )
            .bind(team_id.as_i64())
            .bind(org_id.as_i64())
            .execute(&mut **transaction)
            .await
        }
        ManagedSubject::BuiltinRole(_) => {
            if managed_role_ids.is_empty() {
                return Ok(());
            }

            sqlx::query(
                r#"
                DELETE FROM builtin_role
                WHERE role_id = ANY($1)
                "#,
            )
            .bind(managed_role_ids)
            .execute(&mut **transaction)
            .await
        }
    };

    result.map(|_| ()).map_err(|error| {
        AppError::Storage(format!(
            "failed to delete assignments of {subject}: {error}"
        ))
    })
}
