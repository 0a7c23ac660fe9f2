use std::collections::HashSet;
use std::sync::Arc;

use permsync_core::{AppError, AppResult};
use permsync_domain::{ResourceContainer, Role, Scope, TupleKey};
use tracing::{debug, info};

use crate::{MembershipRepository, TupleWrite, TupleWriter};

mod full_sync;


/// Number of tuples sent per write call during full synchronization.
pub const FULL_SYNC_BATCH_SIZE: usize = 100;

/// Totals of one full synchronization run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FullSyncReport {
    /// Distinct tuples written.
    pub tuples: usize,
    /// Write calls issued.
    pub batches: usize,
}

impl FullSyncReport {
    fn merge(self, other: Self) -> Self {
        Self {
            tuples: self.tuples + other.tuples,
            batches: self.batches + other.batches,
        }
    }
}

/// Derives tuples from relational state and writes them to the relationship engine.
#[derive(Clone)]
pub struct TupleSynchronizer {
    writer: Arc<dyn TupleWriter>,
    memberships: Arc<dyn MembershipRepository>,
    batch_size: usize,
}

impl TupleSynchronizer {
    /// Creates a synchronizer writing full-sync batches of [`FULL_SYNC_BATCH_SIZE`].
    #[must_use]
    pub fn new(writer: Arc<dyn TupleWriter>, memberships: Arc<dyn MembershipRepository>) -> Self {
        Self {
            writer,
            memberships,
            batch_size: FULL_SYNC_BATCH_SIZE,
        }
    }

    /// Builds one grant tuple per action for a role on a scope.
    #[must_use]
    pub fn grant_tuples(
        role: &Role,
        scope: &Scope,
        actions: &[String],
        container: ResourceContainer,
    ) -> Vec<TupleKey> {
        actions
            .iter()
            .map(|action| TupleKey::grant(&role.uid, action, scope, container))
            .collect()
    }

    /// Builds the write of one grant change: the assignee tuple when the role
    /// was just assigned, grant tuples for every action and retractions for
    /// removed ones.
    #[must_use]
    pub fn grant_write(
        role: &Role,
        scope: &Scope,
        actions: &[String],
        removed: &[String],
        container: ResourceContainer,
        assignee: Option<&str>,
    ) -> TupleWrite {
        let mut writes = match assignee {
            Some(subject_reference) => Self::assignment_write(subject_reference, &role.uid).writes,
            None => Vec::new(),
        };
        writes.extend(Self::grant_tuples(role, scope, actions, container));
        for tuple in &writes {
            debug!(
                role_uid = %role.uid,
                relation = %tuple.relation,
                object = %tuple.object,
                "adding grant tuple"
            );
        }

        TupleWrite {
            writes,
            deletes: Self::grant_tuples(role, scope, removed, container),
        }
    }

    /// Builds the write of the assignee tuple linking a subject reference to a role.
    #[must_use]
    pub fn assignment_write(subject_reference: &str, role_uid: &str) -> TupleWrite {
        TupleWrite {
            writes: vec![TupleKey::assignee(subject_reference, role_uid)],
            deletes: Vec::new(),
        }
    }

    /// Writes the grant tuples of a role and retracts those of removed actions
    /// in a single call.
    pub async fn sync_grant(
        &self,
        role: &Role,
        scope: &Scope,
        actions: &[String],
        removed: &[String],
        container: ResourceContainer,
    ) -> AppResult<()> {
        self.write(Self::grant_write(role, scope, actions, removed, container, None))
            .await
    }

    /// Writes the assignee tuple linking a subject reference to a role.
    pub async fn sync_assignment(&self, subject_reference: &str, role_uid: &str) -> AppResult<()> {
        self.write(Self::assignment_write(subject_reference, role_uid))
            .await
    }

    /// Sends one write call; empty requests are skipped.
    ///
    /// Retractions that are also written in the same call are dropped.
    pub async fn write(&self, request: TupleWrite) -> AppResult<()> {
        if request.is_empty() {
            return Ok(());
        }

        let written: HashSet<(&str, &str, &str)> =
            request.writes.iter().map(TupleKey::key).collect();
        let deletes: Vec<TupleKey> = request
            .deletes
            .iter()
            .filter(|tuple| !written.contains(&tuple.key()))
            .cloned()
            .collect();

        self.writer
            .write(TupleWrite {
                writes: request.writes,
                deletes,
            })
            .await
            .map_err(|error| match error {
                AppError::SyncWrite(message) => AppError::SyncWrite(message),
                other => AppError::SyncWrite(other.to_string()),
            })
    }

    /// Writes deduplicated tuples in sequential batches; the first failing
    /// batch aborts the rest.
    async fn write_batches(&self, tuples: Vec<TupleKey>) -> AppResult<FullSyncReport> {
        let total = tuples.len();
        let mut batches = 0;

        for (index, chunk) in tuples.chunks(self.batch_size).enumerate() {
            self.write(TupleWrite {
                writes: chunk.to_vec(),
                deletes: Vec::new(),
            })
            .await
            .map_err(|error| {
                AppError::SyncWrite(format!(
                    "batch {} of {} failed after {batches} written: {error}",
                    index + 1,
                    total.div_ceil(self.batch_size)
                ))
            })?;
            batches += 1;
        }

        info!(tuples = total, batches, "wrote tuple batches");
        Ok(FullSyncReport {
            tuples: total,
            batches,
        })
    }
}

/// Removes repeated tuples, keeping the first occurrence of each
/// user, relation and object combination.
pub(crate) fn dedupe_tuples(tuples: impl IntoIterator<Item = TupleKey>) -> Vec<TupleKey> {
    let mut seen: HashSet<(String, String, String)> = HashSet::new();
    tuples
        .into_iter()
        .filter(|tuple| {
            seen.insert((
                tuple.user.clone(),
                tuple.relation.clone(),
                tuple.object.clone(),
            ))
        })
        .collect()
}
