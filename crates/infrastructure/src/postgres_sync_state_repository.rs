use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};

use permsync_application::{
    StaleSubject, SyncFailure, SyncState, SyncStateRepository, SyncStatus,
};
use permsync_core::{AppError, AppResult, OrgId};
use permsync_domain::{ManagedSubject, TupleKey};

/// PostgreSQL-backed storage of tuple synchronization markers.
#[derive(Clone)]
pub struct PostgresSyncStateRepository {
    pool: PgPool,
}

impl PostgresSyncStateRepository {
    /// Creates a repository with the provided connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, FromRow)]
struct SyncStateRow {
    org_id: i64,
    subject_key: String,
    status: String,
    attempt_count: i32,
    last_synced_at: Option<DateTime<Utc>>,
    last_attempt_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
    pending_deletes: Json<Vec<TupleKey>>,
}

#[derive(Debug, FromRow)]
struct ClaimedRow {
    org_id: i64,
    subject_key: String,
    attempt_count: i32,
    pending_deletes: Json<Vec<TupleKey>>,
}

fn parse_subject(subject_key: &str) -> AppResult<ManagedSubject> {
    ManagedSubject::from_str(subject_key).map_err(|error| {
        AppError::Storage(format!(
            "invalid subject key '{subject_key}' in tuple sync state: {error}"
        ))
    })
}

#[async_trait]
impl SyncStateRepository for PostgresSyncStateRepository {
    async fn mark_stale(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
        error: &str,
        pending_deletes: Vec<TupleKey>,
    ) -> AppResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tuple_sync_state (
                org_id,
                subject_key,
                status,
                attempt_count,
                last_attempt_at,
                next_attempt_at,
                last_error,
                pending_deletes,
                updated_at
            )
            VALUES ($1, $2, 'stale', 0, now(), now(), $3, $4, now())
            ON CONFLICT (org_id, subject_key) DO UPDATE
            SET
                status = 'stale',
                attempt_count = 0,
                last_attempt_at = now(),
                next_attempt_at = now(),
                last_error = EXCLUDED.last_error,
                pending_deletes = tuple_sync_state.pending_deletes || EXCLUDED.pending_deletes,
                updated_at = now()
            "#,
        )
        .bind(org_id.as_i64())
        .bind(subject.to_string())
        .bind(error)
        .bind(Json(pending_deletes))
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Storage(format!("failed to mark {subject} stale: {error}"))
        })?;

        Ok(())
    }

    async fn mark_synced(&self, org_id: OrgId, subject: ManagedSubject) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE tuple_sync_state
            SET
                status = 'synced',
                attempt_count = 0,
                last_synced_at = now(),
                last_attempt_at = now(),
                next_attempt_at = NULL,
                last_error = NULL,
                pending_deletes = '[]'::jsonb,
                updated_at = now()
            WHERE org_id = $1
              AND subject_key = $2
              AND status <> 'synced'
            "#,
        )
        .bind(org_id.as_i64())
        .bind(subject.to_string())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Storage(format!("failed to mark {subject} synced: {error}"))
        })?;

        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> AppResult<Vec<StaleSubject>> {
        let limit = i64::try_from(limit)
            .map_err(|error| AppError::Validation(format!("invalid claim limit: {error}")))?;

        // Claimed rows are leased for two minutes; concurrent reconcilers skip them.
        let rows = sqlx::query_as::<_, ClaimedRow>(
            r#"
            WITH due AS (
                SELECT org_id, subject_key
                FROM tuple_sync_state
                WHERE status = 'stale'
                  AND next_attempt_at <= $1
                ORDER BY next_attempt_at, org_id, subject_key
                LIMIT $2
                FOR UPDATE SKIP LOCKED
            )
            UPDATE tuple_sync_state AS state
            SET
                next_attempt_at = $1 + interval '2 minutes',
                updated_at = now()
            FROM due
            WHERE state.org_id = due.org_id
              AND state.subject_key = due.subject_key
            RETURNING state.org_id, state.subject_key, state.attempt_count, state.pending_deletes
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| AppError::Storage(format!("failed to claim stale subjects: {error}")))?;

        rows.into_iter()
            .map(|row| {
                Ok(StaleSubject {
                    org_id: OrgId::new(row.org_id),
                    subject: parse_subject(&row.subject_key)?,
                    attempt_count: row.attempt_count,
                    pending_deletes: row.pending_deletes.0,
                })
            })
            .collect()
    }

    async fn record_failure(&self, failure: SyncFailure) -> AppResult<()> {
        sqlx::query(
            r#"
            UPDATE tuple_sync_state
            SET
                status = $3,
                attempt_count = $4,
                last_attempt_at = now(),
                next_attempt_at = $5,
                last_error = $6,
                updated_at = now()
            WHERE org_id = $1
              AND subject_key = $2
            "#,
        )
        .bind(failure.org_id.as_i64())
        .bind(failure.subject.to_string())
        .bind(failure.status.as_str())
        .bind(failure.attempt_count)
        .bind(failure.next_attempt_at)
        .bind(failure.error.as_str())
        .execute(&self.pool)
        .await
        .map_err(|error| {
            AppError::Storage(format!(
                "failed to record sync failure for {}: {error}",
                failure.subject
            ))
        })?;

        Ok(())
    }

    async fn find_state(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<Option<SyncState>> {
        let row = sqlx::query_as::<_, SyncStateRow>(
            r#"
            SELECT
                org_id,
                subject_key,
                status,
                attempt_count,
                last_synced_at,
                last_attempt_at,
                next_attempt_at,
                last_error,
                pending_deletes
            FROM tuple_sync_state
            WHERE org_id = $1 AND subject_key = $2
            "#,
        )
        .bind(org_id.as_i64())
        .bind(subject.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|error| {
            AppError::Storage(format!("failed to load sync state of {subject}: {error}"))
        })?;

        row.map(|row| {
            Ok(SyncState {
                org_id: OrgId::new(row.org_id),
                subject: parse_subject(&row.subject_key)?,
                status: SyncStatus::parse(&row.status)?,
                attempt_count: row.attempt_count,
                last_synced_at: row.last_synced_at,
                last_attempt_at: row.last_attempt_at,
                next_attempt_at: row.next_attempt_at,
                last_error: row.last_error,
                pending_deletes: row.pending_deletes.0,
            })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use chrono::{Duration, Utc};
    use permsync_application::{SyncFailure, SyncStateRepository, SyncStatus};
    use permsync_core::OrgId;
    use permsync_domain::{ManagedSubject, TupleKey, UserId};
    use sqlx::PgPool;
    use sqlx::migrate::Migrator;
    use sqlx::postgres::PgPoolOptions;

    use super::PostgresSyncStateRepository;

    static MIGRATOR: Migrator = sqlx::migrate!("./migrations");
    static ORG_SEQUENCE: AtomicI64 = AtomicI64::new(0);

    async fn test_pool() -> Option<PgPool> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            return None;
        };

        let pool = match PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url.as_str())
            .await
        {
            Ok(pool) => pool,
            Err(error) => panic!("failed to connect to DATABASE_URL in test: {error}"),
        };

        if let Err(error) = MIGRATOR.run(&pool).await {
            panic!("failed to run migrations for postgres sync state tests: {error}");
        }

        Some(pool)
    }

    fn unique_org() -> OrgId {
        let sequence = ORG_SEQUENCE.fetch_add(1, Ordering::Relaxed) % 100;
        OrgId::new(Utc::now().timestamp_micros() * 100 + sequence)
    }

    #[tokio::test]
    async fn stale_subject_is_claimed_once_and_synced() {
        let Some(pool) = test_pool().await else {
            return;
        };

        let repository = PostgresSyncStateRepository::new(pool);
        let org_id = unique_org();
        let subject = ManagedSubject::User(UserId::new(7));
        let first = TupleKey::new("role:ab12", "read", "dashboard:abc");
        let second = TupleKey::new("role:ab12", "write", "dashboard:abc");

        assert!(
            repository
                .mark_stale(org_id, subject, "engine unavailable", vec![first.clone()])
                .await
                .is_ok()
        );
        assert!(
            repository
                .mark_stale(org_id, subject, "engine unavailable", vec![second.clone()])
                .await
                .is_ok()
        );

        let state = repository.find_state(org_id, subject).await;
        assert!(state.is_ok());
        let state = state.unwrap_or_default();
        assert_eq!(state.as_ref().map(|state| state.status), Some(SyncStatus::Stale));
        assert_eq!(
            state.map(|state| state.pending_deletes).unwrap_or_default(),
            vec![first, second]
        );

        let now = Utc::now() + Duration::seconds(1);
        let claimed = repository.claim_due(now, 1000).await;
        assert!(claimed.is_ok());
        assert!(
            claimed
                .unwrap_or_default()
                .iter()
                .any(|stale| stale.org_id == org_id && stale.subject == subject)
        );

        let reclaimed = repository.claim_due(now, 1000).await;
        assert!(
            !reclaimed
                .unwrap_or_default()
                .iter()
                .any(|stale| stale.org_id == org_id)
        );

        assert!(repository.mark_synced(org_id, subject).await.is_ok());
        let state = repository.find_state(org_id, subject).await;
        let state = state.unwrap_or_default();
        assert_eq!(state.as_ref().map(|state| state.status), Some(SyncStatus::Synced));
        assert!(
            state
                .map(|state| state.pending_deletes.is_empty())
                .unwrap_or(false)
        );
    }

    #[tokio::test]
    async fn recorded_failure_defers_next_attempt() {
        let Some(pool) = test_pool().await else {
            return;
        };

        let repository = PostgresSyncStateRepository::new(pool);
        let org_id = unique_org();
        let subject = ManagedSubject::User(UserId::new(9));

        assert!(
            repository
                .mark_stale(org_id, subject, "engine unavailable", Vec::new())
                .await
                .is_ok()
        );

        let next_attempt_at = Utc::now() + Duration::minutes(10);
        assert!(
            repository
                .record_failure(SyncFailure {
                    org_id,
                    subject,
                    attempt_count: 1,
                    status: SyncStatus::Stale,
                    next_attempt_at,
                    error: "still unavailable".to_owned(),
                })
                .await
                .is_ok()
        );

        let claimed = repository.claim_due(Utc::now(), 1000).await;
        assert!(
            !claimed
                .unwrap_or_default()
                .iter()
                .any(|stale| stale.org_id == org_id)
        );

        let state = repository.find_state(org_id, subject).await.unwrap_or_default();
        assert_eq!(state.as_ref().map(|state| state.attempt_count), Some(1));
        assert_eq!(
            state.and_then(|state| state.last_error),
            Some("still unavailable".to_owned())
        );

        assert!(repository.mark_synced(org_id, subject).await.is_ok());
    }
}
