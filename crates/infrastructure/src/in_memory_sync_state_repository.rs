use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use permsync_application::{
    StaleSubject, SyncFailure, SyncState, SyncStateRepository, SyncStatus,
};
use permsync_core::{AppResult, OrgId};
use permsync_domain::{ManagedSubject, TupleKey};

/// In-memory storage of tuple synchronization markers.
#[derive(Default)]
pub struct InMemorySyncStateRepository {
    states: Mutex<HashMap<(OrgId, ManagedSubject), SyncState>>,
}

impl InMemorySyncStateRepository {
    /// Creates an empty repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SyncStateRepository for InMemorySyncStateRepository {
    async fn mark_stale(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
        error: &str,
        pending_deletes: Vec<TupleKey>,
    ) -> AppResult<()> {
        let now = Utc::now();
        let mut states = self.states.lock().await;
        let state = states.entry((org_id, subject)).or_insert_with(|| SyncState {
            org_id,
            subject,
            status: SyncStatus::Stale,
            attempt_count: 0,
            last_synced_at: None,
            last_attempt_at: None,
            next_attempt_at: None,
            last_error: None,
            pending_deletes: Vec::new(),
        });

        state.status = SyncStatus::Stale;
        state.attempt_count = 0;
        state.last_attempt_at = Some(now);
        state.next_attempt_at = Some(now);
        state.last_error = Some(error.to_owned());
        state.pending_deletes.extend(pending_deletes);

        Ok(())
    }

    async fn mark_synced(&self, org_id: OrgId, subject: ManagedSubject) -> AppResult<()> {
        let now = Utc::now();
        let mut states = self.states.lock().await;
        let Some(state) = states.get_mut(&(org_id, subject)) else {
            return Ok(());
        };
        if state.status == SyncStatus::Synced {
            return Ok(());
        }

        state.status = SyncStatus::Synced;
        state.attempt_count = 0;
        state.last_synced_at = Some(now);
        state.last_attempt_at = Some(now);
        state.next_attempt_at = None;
        state.last_error = None;
        state.pending_deletes.clear();

        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> AppResult<Vec<StaleSubject>> {
        let mut states = self.states.lock().await;
        let mut due: Vec<&mut SyncState> = states
            .values_mut()
            .filter(|state| {
                state.status == SyncStatus::Stale
                    && state.next_attempt_at.is_some_and(|next| next <= now)
            })
            .collect();
        due.sort_by_key(|state| (state.next_attempt_at, state.org_id, state.subject));

        Ok(due
            .into_iter()
            .take(limit)
            .map(|state| {
                state.next_attempt_at = Some(now + Duration::minutes(2));
                StaleSubject {
                    org_id: state.org_id,
                    subject: state.subject,
                    attempt_count: state.attempt_count,
                    pending_deletes: state.pending_deletes.clone(),
                }
            })
            .collect())
    }

    async fn record_failure(&self, failure: SyncFailure) -> AppResult<()> {
        let mut states = self.states.lock().await;
        if let Some(state) = states.get_mut(&(failure.org_id, failure.subject)) {
            state.status = failure.status;
            state.attempt_count = failure.attempt_count;
            state.last_attempt_at = Some(Utc::now());
            state.next_attempt_at = Some(failure.next_attempt_at);
            state.last_error = Some(failure.error);
        }

        Ok(())
    }

    async fn find_state(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<Option<SyncState>> {
        Ok(self.states.lock().await.get(&(org_id, subject)).cloned())
    }
}
