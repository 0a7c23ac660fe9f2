use super::*;

use std::collections::BTreeMap;

use permsync_domain::{ResourceContainer, Scope, TupleKey};
use tracing::info;

use crate::RemovedGrant;
use crate::tuple_synchronizer::dedupe_tuples;

impl ResourcePermissionService {
    /// Deletes every permission at an exact scope and retracts their tuples.
    ///
    /// Roles and assignments are kept. Retractions are grouped per managed
    /// subject so a failed write can be reconciled.
    pub async fn delete_resource_permissions(
        &self,
        org_id: OrgId,
        scope: &str,
    ) -> AppResult<CleanupOutcome> {
        let removed = self
            .repository
            .delete_resource_permissions(org_id, scope)
            .await?;
        info!(
            org_id = %org_id,
            scope = %scope,
            removed = removed.len(),
            "deleted resource permissions"
        );

        let mut by_role: BTreeMap<&str, Vec<&RemovedGrant>> = BTreeMap::new();
        for grant in &removed {
            by_role.entry(grant.role_name.as_str()).or_default().push(grant);
        }

        let mut sync = TupleSyncStatus::Unchanged;
        for (role_name, grants) in by_role {
            let deletes: Vec<TupleKey> = grants.into_iter().map(retraction_tuple).collect();
            let status = match ManagedSubject::from_managed_role_name(role_name) {
                Some(subject) => {
                    self.sync_subject(
                        org_id,
                        subject,
                        TupleWrite {
                            writes: Vec::new(),
                            deletes,
                        },
                    )
                    .await
                }
                None => self.retract_unmanaged(role_name, deletes).await,
            };
            sync = merge_status(sync, status);
        }

        Ok(CleanupOutcome {
            removed_permissions: removed.len(),
            sync,
        })
    }

    /// Removes every assignment, owned-scope permission and the managed role
    /// of a subject, then retracts their tuples.
    ///
    /// A user cleaned up in the global org loses its managed role in every org.
    pub async fn delete_all_for_subject(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> AppResult<CleanupOutcome> {
        validate_subject(subject)?;

        let cleanup = self
            .repository
            .delete_all_for_subject(org_id, subject)
            .await?;
        info!(
            org_id = %org_id,
            subject = %subject,
            removed = cleanup.removed_grants.len(),
            roles_removed = cleanup.removed_role_uids.len(),
            "deleted subject permissions"
        );

        let mut deletes: Vec<TupleKey> =
            cleanup.removed_grants.iter().map(retraction_tuple).collect();
        let subject_reference = subject.tuple_subject(org_id);
        for role_uid in &cleanup.removed_role_uids {
            deletes.push(TupleKey::assignee(subject_reference.as_str(), role_uid));
        }

        let sync = self
            .sync_subject(
                org_id,
                subject,
                TupleWrite {
                    writes: Vec::new(),
                    deletes: dedupe_tuples(deletes),
                },
            )
            .await;

        Ok(CleanupOutcome {
            removed_permissions: cleanup.removed_grants.len(),
            sync,
        })
    }

    /// Retracts tuples of a role defined outside the permission store.
    ///
    /// Such roles have no sync marker, so failures are only reported.
    async fn retract_unmanaged(&self, role_name: &str, deletes: Vec<TupleKey>) -> TupleSyncStatus {
        match self
            .synchronizer
            .write(TupleWrite {
                writes: Vec::new(),
                deletes,
            })
            .await
        {
            Ok(()) => TupleSyncStatus::Synced,
            Err(error) => {
                let reason = error.to_string();
                warn!(
                    role_name = %role_name,
                    error = %reason,
                    "failed to retract tuples of provisioned role"
                );
                TupleSyncStatus::Degraded { reason }
            }
        }
    }
}

fn retraction_tuple(grant: &RemovedGrant) -> TupleKey {
    let scope = Scope::parse(&grant.scope);
    let container = ResourceContainer::for_resource(scope.kind());
    TupleKey::grant(&grant.role_uid, &grant.action, &scope, container)
}

fn merge_status(current: TupleSyncStatus, next: TupleSyncStatus) -> TupleSyncStatus {
    match (current, next) {
        (TupleSyncStatus::Degraded { reason }, _) | (_, TupleSyncStatus::Degraded { reason }) => {
            TupleSyncStatus::Degraded { reason }
        }
        (TupleSyncStatus::Synced, _) | (_, TupleSyncStatus::Synced) => TupleSyncStatus::Synced,
        _ => TupleSyncStatus::Unchanged,
    }
}
