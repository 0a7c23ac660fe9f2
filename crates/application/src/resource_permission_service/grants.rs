use super::*;

use permsync_domain::action_set_name;
use tracing::info;

use crate::{
    AppliedPermissions, DesiredPermissions, SetResourcePermissionCommand,
    SubjectPermissionCommand,
};

impl ResourcePermissionService {
    /// Sets the permissions of a user on one resource.
    pub async fn set_user_resource_permission(
        &self,
        org_id: OrgId,
        user_id: i64,
        command: SetResourcePermissionCommand,
    ) -> AppResult<GrantOutcome> {
        let subject = ManagedSubject::user(user_id)?;
        self.set_subject_resource_permission(org_id, subject, command)
            .await
    }

    /// Sets the permissions of a team on one resource.
    pub async fn set_team_resource_permission(
        &self,
        org_id: OrgId,
        team_id: i64,
        command: SetResourcePermissionCommand,
    ) -> AppResult<GrantOutcome> {
        let subject = ManagedSubject::team(team_id)?;
        self.set_subject_resource_permission(org_id, subject, command)
            .await
    }

    /// Sets the permissions of a built-in role on one resource.
    ///
    /// The reserved super-admin role is rejected here; only the batch form accepts it.
    pub async fn set_builtin_resource_permission(
        &self,
        org_id: OrgId,
        builtin_role: &str,
        command: SetResourcePermissionCommand,
    ) -> AppResult<GrantOutcome> {
        let subject = ManagedSubject::builtin_role(builtin_role, false)?;
        self.set_subject_resource_permission(org_id, subject, command)
            .await
    }

    /// Sets permissions for several subjects in one transaction.
    ///
    /// Tuples are written per subject after the commit. A tuple write failure
    /// is reported on the affected outcome instead of failing the batch.
    pub async fn set_resource_permissions(
        &self,
        org_id: OrgId,
        commands: Vec<SubjectPermissionCommand>,
    ) -> AppResult<Vec<GrantOutcome>> {
        for entry in &commands {
            validate_subject(entry.subject)?;
        }

        let mut changes = Vec::with_capacity(commands.len());
        for entry in &commands {
            changes.push(DesiredPermissions {
                subject: entry.subject,
                scope: entry.command.scope(),
                actions: self.desired_actions(&entry.command).await,
            });
        }

        let applied = self
            .repository
            .set_resource_permissions(org_id, changes.clone())
            .await?;
        if applied.len() != changes.len() {
            return Err(AppError::Internal(format!(
                "repository applied {} of {} permission changes",
                applied.len(),
                changes.len()
            )));
        }

        let mut outcomes = Vec::with_capacity(applied.len());
        for ((entry, desired), applied) in commands.iter().zip(&changes).zip(applied) {
            info!(
                org_id = %org_id,
                subject = %applied.subject,
                scope = %desired.scope,
                role_created = applied.role_created,
                inserted = applied.inserted.len(),
                removed = applied.removed.len(),
                "applied resource permission"
            );

            let sync = if applied.changed() {
                let request = grant_request(org_id, &entry.command, desired, &applied);
                self.sync_subject(org_id, applied.subject, request).await
            } else {
                TupleSyncStatus::Unchanged
            };

            outcomes.push(GrantOutcome {
                subject: applied.subject,
                permission: applied.permission,
                sync,
            });
        }

        Ok(outcomes)
    }

    async fn set_subject_resource_permission(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
        command: SetResourcePermissionCommand,
    ) -> AppResult<GrantOutcome> {
        self.set_resource_permissions(org_id, vec![SubjectPermissionCommand { subject, command }])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal("missing grant outcome".to_owned()))
    }

    /// Returns base actions, the expansion of the permission level and, when
    /// enabled, the action-set record itself, without duplicates.
    async fn desired_actions(&self, command: &SetResourcePermissionCommand) -> Vec<String> {
        let mut actions = command.actions.clone();
        if !command.permission.is_empty() {
            actions.extend(
                self.action_sets
                    .expand(&command.resource, &command.permission)
                    .await,
            );
            if self.options.action_sets_enabled {
                actions.push(action_set_name(&command.resource, &command.permission));
            }
        }

        let mut unique = Vec::with_capacity(actions.len());
        for action in actions {
            if !unique.contains(&action) {
                unique.push(action);
            }
        }
        unique
    }
}

/// Builds the post-commit write of one applied change. A newly created role
/// also needs the assignee tuple of its subject.
fn grant_request(
    org_id: OrgId,
    command: &SetResourcePermissionCommand,
    desired: &DesiredPermissions,
    applied: &AppliedPermissions,
) -> TupleWrite {
    let assignee = applied
        .role_created
        .then(|| applied.subject.tuple_subject(org_id));
    TupleSynchronizer::grant_write(
        &applied.role,
        &desired.scope,
        &desired.actions,
        &applied.removed,
        command.container(),
        assignee.as_deref(),
    )
}
