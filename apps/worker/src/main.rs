//! Permission tuple reconciler and full-sync runtime.

#![forbid(unsafe_code)]

mod worker_config;
mod worker_services;

use std::time::Duration;

use permsync_application::{ResourcePermissionService, TupleSynchronizer};
use permsync_core::AppError;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{info, warn};

use crate::worker_config::{WorkerConfig, WorkerMode, init_tracing};
use crate::worker_services::{build_permission_service, build_synchronizer, connect_and_migrate};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = WorkerConfig::load()?;
    let pool = connect_and_migrate(config.database_url.as_str()).await?;

    if config.mode == WorkerMode::Migrate {
        info!("database migrations applied successfully");
        return Ok(());
    }

    let synchronizer = build_synchronizer(pool.clone(), &config)?;

    if config.mode == WorkerMode::FullSync {
        let report = synchronizer.synchronize_user_data().await?;
        info!(
            tuples = report.tuples,
            batches = report.batches,
            "full sync completed"
        );
        return Ok(());
    }

    let service = build_permission_service(pool, synchronizer.clone(), &config);
    let run_id = uuid::Uuid::new_v4();

    info!(
        run_id = %run_id,
        store_id = %config.tuple_writer.store_id,
        reconcile_interval_ms = config.reconcile_interval_ms,
        reconcile_batch_size = config.reconcile_batch_size,
        full_sync_interval_secs = config.full_sync_interval_secs,
        "permsync-worker started"
    );

    let mut reconcile_tick =
        tokio::time::interval(Duration::from_millis(config.reconcile_interval_ms));
    reconcile_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut full_sync_tick = (config.full_sync_interval_secs > 0).then(|| {
        let mut tick = tokio::time::interval(Duration::from_secs(config.full_sync_interval_secs));
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tick
    });

    loop {
        tokio::select! {
            _ = reconcile_tick.tick() => {
                reconcile(&service, config.reconcile_batch_size, run_id).await;
            }
            () = next_full_sync(&mut full_sync_tick) => {
                full_sync(&synchronizer, run_id).await;
            }
        }
    }
}

async fn next_full_sync(tick: &mut Option<Interval>) {
    match tick {
        Some(tick) => {
            tick.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Drains due subjects, claiming another batch while batches come back full.
async fn reconcile(service: &ResourcePermissionService, batch_size: usize, run_id: uuid::Uuid) {
    loop {
        match service.reconcile_stale_subjects(batch_size).await {
            Ok(report) => {
                if report.claimed > 0 {
                    info!(
                        run_id = %run_id,
                        claimed = report.claimed,
                        synced = report.synced,
                        retried = report.retried,
                        failed = report.failed,
                        "reconciled stale subjects"
                    );
                }
                if report.claimed < batch_size {
                    return;
                }
            }
            Err(error) => {
                warn!(run_id = %run_id, error = %error, "failed to reconcile stale subjects");
                return;
            }
        }
    }
}

async fn full_sync(synchronizer: &TupleSynchronizer, run_id: uuid::Uuid) {
    match synchronizer.synchronize_user_data().await {
        Ok(report) => info!(
            run_id = %run_id,
            tuples = report.tuples,
            batches = report.batches,
            "full sync completed"
        ),
        Err(error) => warn!(run_id = %run_id, error = %error, "full sync failed"),
    }
}
