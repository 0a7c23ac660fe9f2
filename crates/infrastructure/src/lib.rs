//! Infrastructure adapters for application ports.

#![forbid(unsafe_code)]

mod http_tuple_writer;
mod in_memory_action_set_registry;
mod in_memory_resource_permission_repository;
mod in_memory_sync_state_repository;
mod postgres_membership_repository;
mod postgres_resource_permission_repository;
mod postgres_sync_state_repository;

pub use http_tuple_writer::{HttpTupleWriter, HttpTupleWriterConfig};
pub use in_memory_action_set_registry::InMemoryActionSetRegistry;
pub use in_memory_resource_permission_repository::{
    InMemoryResourcePermissionRepository, TeamRecord, UserAccount,
};
pub use in_memory_sync_state_repository::InMemorySyncStateRepository;
pub use postgres_membership_repository::PostgresMembershipRepository;
pub use postgres_resource_permission_repository::PostgresResourcePermissionRepository;
pub use postgres_sync_state_repository::PostgresSyncStateRepository;
