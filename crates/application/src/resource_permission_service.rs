use std::sync::Arc;

use permsync_core::{AppError, AppResult, OrgId};
use permsync_domain::{ManagedSubject, ResourcePermission};
use tracing::{info, warn};

use crate::{
    ActionSetRegistry, ResourcePermissionRepository, SyncStateRepository, SyncStatus,
    TupleSynchronizer, TupleWrite,
};

mod cleanup;
mod grants;
mod queries;
mod reconcile;


pub use reconcile::{ReconcileReport, retry_backoff_seconds};

/// Runtime switches of the resource permission service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourcePermissionOptions {
    /// Stores the action-set record of a permission level next to its actions.
    pub action_sets_enabled: bool,
    /// Reconcile attempts before a stale subject is marked failed.
    pub max_sync_attempts: i32,
}

impl Default for ResourcePermissionOptions {
    fn default() -> Self {
        Self {
            action_sets_enabled: true,
            max_sync_attempts: 10,
        }
    }
}

/// Tuple synchronization result attached to a committed change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TupleSyncStatus {
    /// Tuples were written.
    Synced,
    /// Nothing changed, so nothing was written.
    Unchanged,
    /// Relational state committed but the tuple write failed; the subject is
    /// queued for reconciliation.
    Degraded {
        /// Write failure message.
        reason: String,
    },
}

impl TupleSyncStatus {
    /// Returns whether the relationship engine may lag relational state.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        matches!(self, Self::Degraded { .. })
    }
}

/// Result of a committed grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantOutcome {
    /// Subject the grant applied to.
    pub subject: ManagedSubject,
    /// Aggregated permission at the scope, `None` after a full revoke.
    pub permission: Option<ResourcePermission>,
    /// Tuple synchronization result.
    pub sync: TupleSyncStatus,
}

/// Result of a committed deletion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupOutcome {
    /// Deleted permission rows.
    pub removed_permissions: usize,
    /// Tuple synchronization result.
    pub sync: TupleSyncStatus,
}

/// Caller-facing API of the permission store.
#[derive(Clone)]
pub struct ResourcePermissionService {
    repository: Arc<dyn ResourcePermissionRepository>,
    sync_state: Arc<dyn SyncStateRepository>,
    action_sets: Arc<dyn ActionSetRegistry>,
    synchronizer: TupleSynchronizer,
    options: ResourcePermissionOptions,
}

impl ResourcePermissionService {
    /// Creates a new service from ports.
    #[must_use]
    pub fn new(
        repository: Arc<dyn ResourcePermissionRepository>,
        sync_state: Arc<dyn SyncStateRepository>,
        action_sets: Arc<dyn ActionSetRegistry>,
        synchronizer: TupleSynchronizer,
        options: ResourcePermissionOptions,
    ) -> Self {
        Self {
            repository,
            sync_state,
            action_sets,
            synchronizer,
            options,
        }
    }

    /// Writes tuples for a subject after commit and tracks the outcome.
    ///
    /// A failed write marks the subject stale with its retractions queued and
    /// is reported as degraded rather than as an error. A successful write
    /// leaves an existing stale marker for the reconcile pass to clear.
    async fn sync_subject(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
        request: TupleWrite,
    ) -> TupleSyncStatus {
        if request.is_empty() {
            return TupleSyncStatus::Unchanged;
        }

        let deletes = request.deletes.clone();
        match self.synchronizer.write(request).await {
            Ok(()) => match self.rearm_failed_subject(org_id, subject).await {
                Ok(()) => TupleSyncStatus::Synced,
                Err(error) => sync_state_unavailable(org_id, subject, &error),
            },
            Err(error) => {
                let reason = error.to_string();
                warn!(
                    org_id = %org_id,
                    subject = %subject,
                    error = %reason,
                    "tuple write failed after commit, subject marked stale"
                );
                match self
                    .sync_state
                    .mark_stale(org_id, subject, &reason, deletes)
                    .await
                {
                    Ok(()) => TupleSyncStatus::Degraded { reason },
                    Err(error) => sync_state_unavailable(org_id, subject, &error),
                }
            }
        }
    }

    /// Queues a subject whose retries were exhausted for another reconcile pass.
    async fn rearm_failed_subject(&self, org_id: OrgId, subject: ManagedSubject) -> AppResult<()> {
        let Some(state) = self.sync_state.find_state(org_id, subject).await? else {
            return Ok(());
        };
        if state.status != SyncStatus::Failed {
            return Ok(());
        }

        info!(
            org_id = %org_id,
            subject = %subject,
            "re-queuing failed subject after successful write"
        );
        let reason = state
            .last_error
            .unwrap_or_else(|| "earlier tuple writes failed".to_owned());
        self.sync_state
            .mark_stale(org_id, subject, &reason, Vec::new())
            .await
    }
}

fn validate_subject(subject: ManagedSubject) -> AppResult<()> {
    match subject {
        ManagedSubject::User(user_id) if user_id.as_i64() == 0 => Err(AppError::SubjectNotFound(
            "user id must not be zero".to_owned(),
        )),
        ManagedSubject::Team(team_id) if team_id.as_i64() == 0 => Err(AppError::SubjectNotFound(
            "team id must not be zero".to_owned(),
        )),
        _ => Ok(()),
    }
}

fn sync_state_unavailable(
    org_id: OrgId,
    subject: ManagedSubject,
    error: &AppError,
) -> TupleSyncStatus {
    let reason = format!("failed to update tuple sync state: {error}");
    warn!(
        org_id = %org_id,
        subject = %subject,
        error = %reason,
        "tuple sync state not recorded"
    );
    TupleSyncStatus::Degraded { reason }
}
