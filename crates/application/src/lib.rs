//! Application services and ports.

#![forbid(unsafe_code)]

mod permission_ports;
mod resource_permission_service;
mod role_uid;
mod tuple_synchronizer;

pub use permission_ports::{
    ActionSetRegistry, AppliedPermissions, DesiredPermissions, MembershipRepository,
    OrgMembership, RemovedGrant, ResourcePermissionQuery, ResourcePermissionRepository,
    SearchUsersPermissionsQuery, SetResourcePermissionCommand, StaleSubject, SubjectCleanup,
    SubjectGrants, SubjectPermissionCommand, SyncFailure, SyncState, SyncStateRepository,
    SyncStatus, TeamMembership, TupleWrite, TupleWriter, UidGenerator, UserPermissionsQuery,
};
pub use resource_permission_service::{
    CleanupOutcome, GrantOutcome, ReconcileReport, ResourcePermissionOptions,
    ResourcePermissionService, TupleSyncStatus, retry_backoff_seconds,
};
pub use role_uid::{ROLE_UID_LENGTH, RandomUidGenerator};
pub use tuple_synchronizer::{FULL_SYNC_BATCH_SIZE, FullSyncReport, TupleSynchronizer};
