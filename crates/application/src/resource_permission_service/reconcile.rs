use super::*;

use chrono::{Duration, Utc};
use permsync_domain::{ResourceContainer, Scope, TupleKey};
use tracing::info;

use crate::tuple_synchronizer::dedupe_tuples;
use crate::{StaleSubject, SyncFailure, SyncStatus};

/// Totals of one reconcile pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Stale subjects claimed.
    pub claimed: usize,
    /// Subjects whose tuples were rewritten.
    pub synced: usize,
    /// Subjects scheduled for another attempt.
    pub retried: usize,
    /// Subjects whose retries are exhausted.
    pub failed: usize,
}

/// Returns the delay before the next reconcile attempt: `2^attempt` seconds,
/// capped at thirty minutes.
#[must_use]
pub fn retry_backoff_seconds(attempt_count: i32) -> i64 {
    let capped_step = u32::try_from(attempt_count.clamp(0, 11)).unwrap_or(11);
    2_i64.pow(capped_step).min(1800)
}

impl ResourcePermissionService {
    /// Rewrites the tuples of stale subjects from relational state.
    ///
    /// Each claimed subject gets its assignee and grant tuples rewritten and
    /// its queued retractions replayed. Failures are recorded with backoff.
    pub async fn reconcile_stale_subjects(&self, limit: usize) -> AppResult<ReconcileReport> {
        let now = Utc::now();
        let claimed = self.sync_state.claim_due(now, limit).await?;
        let mut report = ReconcileReport {
            claimed: claimed.len(),
            ..ReconcileReport::default()
        };

        for stale in claimed {
            let result = match self.rebuild_request(&stale).await {
                Ok(request) => self.synchronizer.write(request).await,
                Err(error) => Err(error),
            };

            match result {
                Ok(()) => {
                    self.sync_state
                        .mark_synced(stale.org_id, stale.subject)
                        .await?;
                    report.synced += 1;
                }
                Err(error) => {
                    let attempt_count = stale.attempt_count + 1;
                    let status = if attempt_count >= self.options.max_sync_attempts {
                        report.failed += 1;
                        SyncStatus::Failed
                    } else {
                        report.retried += 1;
                        SyncStatus::Stale
                    };
                    warn!(
                        org_id = %stale.org_id,
                        subject = %stale.subject,
                        attempt_count,
                        status = status.as_str(),
                        error = %error,
                        "reconcile attempt failed"
                    );

                    self.sync_state
                        .record_failure(SyncFailure {
                            org_id: stale.org_id,
                            subject: stale.subject,
                            attempt_count,
                            status,
                            next_attempt_at: now
                                + Duration::seconds(retry_backoff_seconds(attempt_count)),
                            error: error.to_string(),
                        })
                        .await?;
                }
            }
        }

        if report.claimed > 0 {
            info!(
                claimed = report.claimed,
                synced = report.synced,
                retried = report.retried,
                failed = report.failed,
                "reconciled stale subjects"
            );
        }

        Ok(report)
    }

    async fn rebuild_request(&self, stale: &StaleSubject) -> AppResult<TupleWrite> {
        let mut writes = Vec::new();
        if let Some(grants) = self
            .repository
            .find_subject_grants(stale.org_id, stale.subject)
            .await?
        {
            writes.push(TupleKey::assignee(
                stale.subject.tuple_subject(stale.org_id),
                &grants.role.uid,
            ));
            for permission in &grants.permissions {
                let scope = Scope::parse(&permission.scope);
                let container = ResourceContainer::for_resource(scope.kind());
                writes.push(TupleKey::grant(
                    &grants.role.uid,
                    &permission.action,
                    &scope,
                    container,
                ));
            }
        }

        Ok(TupleWrite {
            writes: dedupe_tuples(writes),
            deletes: dedupe_tuples(stale.pending_deletes.clone()),
        })
    }
}
