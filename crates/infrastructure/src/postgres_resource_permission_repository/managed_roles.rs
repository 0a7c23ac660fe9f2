use super::*;

/// Attempts to find a free role UID before giving up.
const UID_ATTEMPTS: usize = 3;

impl PostgresResourcePermissionRepository {
    /// Returns the managed role of a subject, creating it and its assignment
    /// on first use. The boolean reports whether the role was created.
    pub(super) async fn get_or_create_managed_role(
        &self,
        transaction: &mut Transaction<'_, Postgres>,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<(Role, bool)> {
        let name = subject.managed_role_name();
        if let Some(role) = find_role_by_name(&mut **transaction, org_id, &name).await? {
            return Ok((role, false));
        }

        let uid = self.generate_role_uid(transaction, org_id).await?;
        let inserted = sqlx::query_as::<_, RoleRow>(
            r#"
            INSERT INTO role (org_id, uid, name, created, updated)
            VALUES ($1, $2, $3, now(), now())
            ON CONFLICT (org_id, name) DO NOTHING
            RETURNING id, uid, org_id, name, created, updated
            "#,
        )
        .bind(org_id.as_i64())
        .bind(uid.as_str())
        .bind(name.as_str())
        .fetch_optional(&mut **transaction)
        .await
        .map_err(|error| {
            if let sqlx::Error::Database(database_error) = &error
                && database_error.code().as_deref() == Some("23505")
            {
                return AppError::Conflict(format!(
                    "role uid '{uid}' is already taken in org '{org_id}'"
                ));
            }

            AppError::Storage(format!("failed to create managed role '{name}': {error}"))
        })?;

        let Some(row) = inserted else {
            let role = find_role_by_name(&mut **transaction, org_id, &name)
                .await?
                .ok_or_else(|| {
                    AppError::Storage(format!(
                        "managed role '{name}' missing after conflicting insert"
                    ))
                })?;
            return Ok((role, false));
        };

        let role = row.into_role();
        insert_assignment(transaction, org_id, subject, role.id).await?;

        Ok((role, true))
    }

    async fn generate_role_uid(
        &self,
        transaction: &mut Transaction<'_, Postgres>,
        org_id: OrgId,
    ) -> AppResult<String> {
        for _ in 0..UID_ATTEMPTS {
            let uid = self.uid_generator.generate()?;
            let taken = sqlx::query_scalar::<_, bool>(
                r#"
                SELECT EXISTS (
                    SELECT 1 FROM role WHERE org_id = $1 AND uid = $2
                )
                "#,
            )
            .bind(org_id.as_i64())
            .bind(uid.as_str())
            .fetch_one(&mut **transaction)
            .await
            .map_err(|error| AppError::Storage(format!("failed to check role uid: {error}")))?;

            if !taken {
                return Ok(uid);
            }
        }

        Err(AppError::IdGenerationExhausted(format!(
            "no free role uid in org '{org_id}' after {UID_ATTEMPTS} attempts"
        )))
    }
}

/// Loads a role by its unique name in one org.
pub(super) async fn find_role_by_name<'e, E>(
    executor: E,
    org_id: OrgId,
    name: &str,
) -> AppResult<Option<Role>>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let row = sqlx::query_as::<_, RoleRow>(
        r#"
        SELECT id, uid, org_id, name, created, updated
        FROM role
        WHERE org_id = $1 AND name = $2
        "#,
    )
    .bind(org_id.as_i64())
    .bind(name)
    .fetch_optional(executor)
    .await
    .map_err(|error| AppError::Storage(format!("failed to find role '{name}': {error}")))?;

    Ok(row.map(RoleRow::into_role))
}

async fn insert_assignment(
    transaction: &mut Transaction<'_, Postgres>,
    org_id: OrgId,
    subject: ManagedSubject,
    role_id: i64,
) -> AppResult<()> {
    let result = match subject {
        ManagedSubject::User(user_id) => {
            sqlx::query(
                r#"
                INSERT INTO user_role (org_id, user_id, role_id, created)
                VALUES ($1, $2, $3, now())
                "#,
            )
            .bind(org_id.as_i64())
            .bind(user_id.as_i64())
            .bind(role_id)
            .execute(&mut **transaction)
            .await
        }
        ManagedSubject::Team(team_id) => {
            sqlx::query(
                r#"
                INSERT INTO team_role (org_id, team_id, role_id, created)
                VALUES ($1, $2, $3, now())
                "#,
            )
            .bind(org_id.as_i64())
            .bind(team_id.as_i64())
            .bind(role_id)
            .execute(&mut **transaction)
            .await
        }
        ManagedSubject::BuiltinRole(role) => {
            sqlx::query(
                r#"
                INSERT INTO builtin_role (org_id, role, role_id, created, updated)
                VALUES ($1, $2, $3, now(), now())
                "#,
            )
            .bind(org_id.as_i64())
            .bind(role.as_str())
            .bind(role_id)
            .execute(&mut **transaction)
            .await
        }
    };

    if let Err(error) = result {
        if let sqlx::Error::Database(database_error) = &error {
            match database_error.code().as_deref() {
                Some("23505") => {
                    return Err(AppError::DuplicateAssignment(format!(
                        "{subject} already holds managed role '{role_id}' in org '{org_id}'"
                    )));
                }
                Some("23503") => {
                    return Err(AppError::SubjectNotFound(format!(
                        "{subject} does not exist"
                    )));
                }
                _ => {}
            }
        }

        return Err(AppError::Storage(format!(
            "failed to assign managed role to {subject}: {error}"
        )));
    }

    Ok(())
}
