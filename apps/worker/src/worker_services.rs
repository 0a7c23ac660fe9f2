use std::sync::Arc;
use std::time::Duration;

use permsync_application::{RandomUidGenerator, ResourcePermissionService, TupleSynchronizer};
use permsync_core::{AppError, AppResult};
use permsync_infrastructure::{
    HttpTupleWriter, InMemoryActionSetRegistry, PostgresMembershipRepository,
    PostgresResourcePermissionRepository, PostgresSyncStateRepository,
};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::worker_config::WorkerConfig;

pub async fn connect_and_migrate(database_url: &str) -> AppResult<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(|error| AppError::Internal(format!("failed to connect to database: {error}")))?;

    sqlx::migrate!("../../crates/infrastructure/migrations")
        .run(&pool)
        .await
        .map_err(|error| AppError::Internal(format!("failed to run migrations: {error}")))?;

    Ok(pool)
}

pub fn build_synchronizer(pool: PgPool, config: &WorkerConfig) -> AppResult<TupleSynchronizer> {
    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_millis(config.http_timeout_ms))
        .build()
        .map_err(|error| AppError::Internal(format!("failed to build HTTP client: {error}")))?;
    let writer = Arc::new(HttpTupleWriter::new(http_client, config.tuple_writer.clone()));
    let memberships = Arc::new(PostgresMembershipRepository::new(pool));

    Ok(TupleSynchronizer::new(writer, memberships))
}

pub fn build_permission_service(
    pool: PgPool,
    synchronizer: TupleSynchronizer,
    config: &WorkerConfig,
) -> ResourcePermissionService {
    let repository = Arc::new(PostgresResourcePermissionRepository::new(
        pool.clone(),
        Arc::new(RandomUidGenerator),
    ));
    let sync_state = Arc::new(PostgresSyncStateRepository::new(pool));
    let action_sets = Arc::new(InMemoryActionSetRegistry::with_default_action_sets());

    ResourcePermissionService::new(
        repository,
        sync_state,
        action_sets,
        synchronizer,
        config.options,
    )
}
