use async_trait::async_trait;
use sqlx::{FromRow, PgPool};

use permsync_application::{MembershipRepository, OrgMembership, TeamMembership};
use permsync_core::{AppError, AppResult, OrgId};
use permsync_domain::{TeamId, UserId};

/// PostgreSQL-backed reader of org and team memberships.
#[derive(Clone)]
pub struct PostgresMembershipRepository {
    pool: PgPool,
}

impl PostgresMembershipRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct OrgMembershipRow {
    org_id: i64,
    user_id: i64,
    role: String,
}

#[derive(Debug, FromRow)]
struct TeamMembershipRow {
    org_id: i64,
    team_id: i64,
    user_id: i64,
}

#[async_trait]
impl MembershipRepository for PostgresMembershipRepository {
    async fn list_org_memberships(&self) -> AppResult<Vec<OrgMembership>> {
        let rows = sqlx::query_as::<_, OrgMembershipRow>(
            r#"
            SELECT org_id, user_id, role
            FROM org_user
            ORDER BY org_id, user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Storage(format!("failed to list org memberships: {error}")))?;

        Ok(rows
            .into_iter()
            .map(|row| OrgMembership {
                org_id: OrgId::new(row.org_id),
                user_id: UserId::new(row.user_id),
                role: row.role,
            })
            .collect())
    }

    async fn list_team_memberships(&self) -> AppResult<Vec<TeamMembership>> {
        let rows = sqlx::query_as::<_, TeamMembershipRow>(
            r#"
            SELECT org_id, team_id, user_id
            FROM team_member
            ORDER BY org_id, team_id, user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|error| {
            AppError::Storage(format!("failed to list team memberships: {error}"))
        })?;

        Ok(rows
            .into_iter()
            .map(|row| TeamMembership {
                org_id: OrgId::new(row.org_id),
                team_id: TeamId::new(row.team_id),
                user_id: UserId::new(row.user_id),
            })
            .collect())
    }
}
