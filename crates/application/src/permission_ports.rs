mod commands;
mod membership;
mod registry;
mod repositories;
mod sync;

pub use commands::{
    AppliedPermissions, DesiredPermissions, RemovedGrant, ResourcePermissionQuery,
    SearchUsersPermissionsQuery, SetResourcePermissionCommand, SubjectCleanup, SubjectGrants,
    SubjectPermissionCommand, UserPermissionsQuery,
};
pub use membership::{MembershipRepository, OrgMembership, TeamMembership};
pub use registry::{ActionSetRegistry, UidGenerator};
pub use repositories::ResourcePermissionRepository;
pub use sync::{
    StaleSubject, SyncFailure, SyncState, SyncStateRepository, SyncStatus, TupleWrite, TupleWriter,
};
