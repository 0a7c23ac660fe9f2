use super::*;

use permsync_domain::PermissionDiff;

impl PostgresResourcePermissionRepository {
    pub(super) async fn set_resource_permissions_impl(
        &self,
        org_id: OrgId,
        changes: Vec<DesiredPermissions>,
    ) -> AppResult<Vec<AppliedPermissions>> {
        let mut transaction = self.begin().await?;

        let mut applied = Vec::with_capacity(changes.len());
        for change in changes {
            applied.push(self.apply_desired(&mut transaction, org_id, change).await?);
        }

        transaction
            .commit()
            .await
            .map_err(|error| AppError::Storage(format!("failed to commit transaction: {error}")))?;

        Ok(applied)
    }

    async fn apply_desired(
        &self,
        transaction: &mut Transaction<'_, Postgres>,
        org_id: OrgId,
        change: DesiredPermissions,
    ) -> AppResult<AppliedPermissions> {
        let (role, role_created) = self
            .get_or_create_managed_role(transaction, org_id, change.subject)
            .await?;
        let scope = change.scope.to_string();

        let current: Vec<Permission> = sqlx::query_as::<_, PermissionRow>(
            r#"
            SELECT id, role_id, action, scope, kind, attribute, identifier, created, updated
            FROM permission
            WHERE role_id = $1 AND scope = $2
            ORDER BY id
            "#,
        )
        .bind(role.id)
        .bind(scope.as_str())
        .fetch_all(&mut **transaction)
        .await
        .map_err(|error| AppError::Storage(format!("failed to load permissions: {error}")))?
        .into_iter()
        .map(PermissionRow::into_permission)
        .collect();

        let diff = PermissionDiff::compute(&change.actions, &current);

        if !diff.to_remove.is_empty() {
            sqlx::query(
                r#"
                DELETE FROM permission
                WHERE id = ANY($1)
                "#,
            )
            .bind(diff.to_remove.as_slice())
            .execute(&mut **transaction)
            .await
            .map_err(|error| AppError::Storage(format!("failed to delete permissions: {error}")))?;
        }

        let inserted: Vec<Permission> = if diff.missing.is_empty() {
            Vec::new()
        } else {
            sqlx::query_as::<_, PermissionRow>(
                r#"
                INSERT INTO permission (
                    role_id,
                    action,
                    scope,
                    kind,
                    attribute,
                    identifier,
                    created,
                    updated
                )
                SELECT $1, missing.action, $2, $3, $4, $5, now(), now()
                FROM UNNEST($6::TEXT[]) WITH ORDINALITY AS missing(action, position)
                ORDER BY missing.position
                RETURNING id, role_id, action, scope, kind, attribute, identifier, created, updated
                "#,
            )
            .bind(role.id)
            .bind(scope.as_str())
            .bind(change.scope.kind())
            .bind(change.scope.attribute())
            .bind(change.scope.identifier())
            .bind(diff.missing.as_slice())
            .fetch_all(&mut **transaction)
            .await
            .map_err(|error| AppError::Storage(format!("failed to insert permissions: {error}")))?
            .into_iter()
            .map(PermissionRow::into_permission)
            .collect()
        };

        let removed: Vec<String> = current
            .iter()
            .filter(|permission| diff.to_remove.contains(&permission.id))
            .map(|permission| permission.action.clone())
            .collect();
        let remaining: Vec<Permission> = current
            .into_iter()
            .filter(|permission| !diff.to_remove.contains(&permission.id))
            .chain(inserted)
            .collect();

        let permission = if remaining.is_empty() {
            None
        } else {
            let holder = load_holder(transaction, change.subject).await?;
            let rows: Vec<FlatResourcePermission> = remaining
                .iter()
                .map(|permission| FlatResourcePermission {
                    id: permission.id,
                    role_name: role.name.clone(),
                    action: permission.action.clone(),
                    scope: permission.scope.clone(),
                    holder: holder.clone(),
                    created: permission.created,
                    updated: permission.updated,
                })
                .collect();
            let references: Vec<&FlatResourcePermission> = rows.iter().collect();
            ResourcePermission::collapse(&scope, &references)
        };

        Ok(AppliedPermissions {
            subject: change.subject,
            role,
            role_created,
            inserted: diff.missing,
            removed,
            permission,
        })
    }
}

async fn load_holder(
    transaction: &mut Transaction<'_, Postgres>,
    subject: ManagedSubject,
) -> AppResult<PermissionHolder> {
    #[derive(Debug, FromRow)]
    struct UserHolderRow {
        login: String,
        email: String,
        is_service_account: bool,
    }

    #[derive(Debug, FromRow)]
    struct TeamHolderRow {
        name: String,
        email: String,
    }

    match subject {
        ManagedSubject::User(user_id) => {
            let row = sqlx::query_as::<_, UserHolderRow>(
                r#"
                SELECT login, email, is_service_account
                FROM user_account
                WHERE id = $1
                "#,
            )
            .bind(user_id.as_i64())
            .fetch_optional(&mut **transaction)
            .await
            .map_err(|error| AppError::Storage(format!("failed to load user: {error}")))?
            .ok_or_else(|| AppError::SubjectNotFound(format!("{subject} does not exist")))?;

            Ok(PermissionHolder::User {
                user_id,
                login: row.login,
                email: row.email,
                is_service_account: row.is_service_account,
            })
        }
        ManagedSubject::Team(team_id) => {
            let row = sqlx::query_as::<_, TeamHolderRow>(
                r#"
                SELECT name, email
                FROM team
                WHERE id = $1
                "#,
            )
            .bind(team_id.as_i64())
            .fetch_optional(&mut **transaction)
            .await
            .map_err(|error| AppError::Storage(format!("failed to load team: {error}")))?
            .ok_or_else(|| AppError::SubjectNotFound(format!("{subject} does not exist")))?;

            Ok(PermissionHolder::Team {
                team_id,
                name: row.name,
                email: row.email,
            })
        }
        ManagedSubject::BuiltinRole(role) => {
            Ok(PermissionHolder::BuiltinRole(role.as_str().to_owned()))
        }
    }
}
