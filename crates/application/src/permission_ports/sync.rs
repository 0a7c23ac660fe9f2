use async_trait::async_trait;
use chrono::{DateTime, Utc};

use permsync_core::{AppError, AppResult, OrgId};
use permsync_domain::{ManagedSubject, TupleKey};

/// One write call against the relationship engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TupleWrite {
    /// Tuples to upsert.
    pub writes: Vec<TupleKey>,
    /// Tuples to retract.
    pub deletes: Vec<TupleKey>,
}

impl TupleWrite {
    /// Returns whether the call would carry no tuples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.deletes.is_empty()
    }

    /// Returns the number of tuples carried.
    #[must_use]
    pub fn len(&self) -> usize {
        self.writes.len() + self.deletes.len()
    }
}

/// Write port of the relationship engine.
#[async_trait]
pub trait TupleWriter: Send + Sync {
    /// Writes and retracts tuples in one call; either all apply or the call fails.
    async fn write(&self, request: TupleWrite) -> AppResult<()>;
}

/// Tuple synchronization status of a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncStatus {
    /// Tuples match relational state.
    Synced,
    /// A tuple write failed and a retry is due.
    Stale,
    /// Retries are exhausted.
    Failed,
}

impl SyncStatus {
    /// Returns the stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Synced => "synced",
            Self::Stale => "stale",
            Self::Failed => "failed",
        }
    }

    /// Parses a storage value.
    pub fn parse(value: &str) -> AppResult<Self> {
        match value {
            "synced" => Ok(Self::Synced),
            "stale" => Ok(Self::Stale),
            "failed" => Ok(Self::Failed),
            _ => Err(AppError::Internal(format!(
                "unknown tuple sync status '{value}'"
            ))),
        }
    }
}

/// Synchronization marker of one subject in one org.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// Organization.
    pub org_id: OrgId,
    /// Subject.
    pub subject: ManagedSubject,
    /// Current status.
    pub status: SyncStatus,
    /// Failed reconcile attempts since the subject became stale.
    pub attempt_count: i32,
    /// Last successful tuple write.
    pub last_synced_at: Option<DateTime<Utc>>,
    /// Last write attempt.
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Earliest next reconcile attempt.
    pub next_attempt_at: Option<DateTime<Utc>>,
    /// Last write error.
    pub last_error: Option<String>,
    /// Retractions that still have to reach the engine.
    pub pending_deletes: Vec<TupleKey>,
}

/// Stale subject claimed for reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaleSubject {
    /// Organization.
    pub org_id: OrgId,
    /// Subject.
    pub subject: ManagedSubject,
    /// Failed reconcile attempts so far.
    pub attempt_count: i32,
    /// Retractions that still have to reach the engine.
    pub pending_deletes: Vec<TupleKey>,
}

/// Failed reconcile attempt to record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    /// Organization.
    pub org_id: OrgId,
    /// Subject.
    pub subject: ManagedSubject,
    /// Attempt count including this failure.
    pub attempt_count: i32,
    /// `Stale` to retry later, `Failed` once retries are exhausted.
    pub status: SyncStatus,
    /// Next attempt time for stale subjects.
    pub next_attempt_at: DateTime<Utc>,
    /// Error message.
    pub error: String,
}

/// Storage of per-subject synchronization markers.
#[async_trait]
pub trait SyncStateRepository: Send + Sync {
    /// Marks a subject stale after a failed write, queuing retractions.
    ///
    /// Pending retractions accumulate until the subject is synced.
    async fn mark_stale(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
        error: &str,
        pending_deletes: Vec<TupleKey>,
    ) -> AppResult<()>;

    /// Marks a subject synced and clears pending retractions.
    ///
    /// Subjects without a marker or already synced are left untouched.
    async fn mark_synced(&self, org_id: OrgId, subject: ManagedSubject) -> AppResult<()>;

    /// Claims stale subjects whose next attempt is due.
    async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> AppResult<Vec<StaleSubject>>;

    /// Records a failed reconcile attempt.
    async fn record_failure(&self, failure: SyncFailure) -> AppResult<()>;

    /// Returns the marker of a subject.
    async fn find_state(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<Option<SyncState>>;
}
