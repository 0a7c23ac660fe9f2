//! Shared primitives for all Rust crates in permsync.

#![forbid(unsafe_code)]

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across permsync crates.
pub type AppResult<T> = Result<T, AppError>;

/// Organization identifier used as the partition key for roles and assignments.
///
/// The value `0` denotes the global organization: assignments stored under it
/// apply to every organization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrgId(i64);

impl OrgId {
    /// The global (cross-org) organization.
    pub const GLOBAL: Self = Self(0);

    /// Creates an organization identifier from a raw value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }

    /// Returns whether this is the global organization.
    #[must_use]
    pub const fn is_global(&self) -> bool {
        self.0 == 0
    }
}

impl Display for OrgId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Invalid input or violated invariant.
    #[error("validation error: {0}")]
    Validation(String),

    /// Requested resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Grant targets a user or team that cannot be resolved.
    #[error("subject not found: {0}")]
    SubjectNotFound(String),

    /// Built-in role name is unknown or reserved.
    #[error("invalid built-in role: {0}")]
    InvalidBuiltinRole(String),

    /// Subject already holds the managed role being created.
    #[error("duplicate assignment: {0}")]
    DuplicateAssignment(String),

    /// Unique role identifier could not be generated.
    #[error("role uid generation exhausted: {0}")]
    IdGenerationExhausted(String),

    /// Relational storage failure; the enclosing transaction was rolled back.
    #[error("storage error: {0}")]
    Storage(String),

    /// Authorization engine write failure; relational state may be ahead of tuples.
    #[error("tuple sync write error: {0}")]
    SyncWrite(String),

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}
