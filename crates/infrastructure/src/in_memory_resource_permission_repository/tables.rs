use std::collections::{BTreeMap, HashSet};
use std::fmt::{Display, Formatter};

use chrono::{DateTime, Utc};

use permsync_application::{
    AppliedPermissions, DesiredPermissions, OrgMembership, RemovedGrant, SubjectCleanup,
    SubjectGrants, TeamMembership, UidGenerator,
};
use permsync_core::{AppError, AppResult, OrgId};
use permsync_domain::{
    FlatResourcePermission, ManagedSubject, Permission, PermissionDiff, PermissionHolder,
    ResourcePermission, Role, TeamId, UserId,
};

use super::{TeamRecord, UserAccount};

const UID_ATTEMPTS: usize = 3;

/// Holder side of a role assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum AssignmentHolder {
    User(UserId),
    Team(TeamId),
    BuiltinRole(String),
}

impl From<ManagedSubject> for AssignmentHolder {
    fn from(subject: ManagedSubject) -> Self {
        match subject {
            ManagedSubject::User(user_id) => Self::User(user_id),
            ManagedSubject::Team(team_id) => Self::Team(team_id),
            ManagedSubject::BuiltinRole(role) => Self::BuiltinRole(role.as_str().to_owned()),
        }
    }
}

impl Display for AssignmentHolder {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(user_id) => write!(formatter, "user:{user_id}"),
            Self::Team(team_id) => write!(formatter, "team:{team_id}"),
            Self::BuiltinRole(role) => write!(formatter, "builtin:{role}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Assignment {
    pub(super) org_id: OrgId,
    pub(super) holder: AssignmentHolder,
    pub(super) role_id: i64,
}

#[derive(Debug, Clone, Default)]
pub(super) struct PermissionTables {
    next_role_id: i64,
    next_permission_id: i64,
    pub(super) roles: BTreeMap<i64, Role>,
    pub(super) permissions: BTreeMap<i64, Permission>,
    pub(super) assignments: Vec<Assignment>,
    pub(super) users: BTreeMap<UserId, UserAccount>,
    pub(super) teams: BTreeMap<TeamId, TeamRecord>,
    pub(super) org_members: Vec<OrgMembership>,
    pub(super) team_members: Vec<TeamMembership>,
}

impl PermissionTables {
    fn find_role(&self, org_id: OrgId, name: &str) -> Option<&Role> {
        self.roles
            .values()
            .find(|role| role.org_id == org_id && role.name == name)
    }

    pub(super) fn free_uid(
        &self,
        org_id: OrgId,
        uid_generator: &dyn UidGenerator,
    ) -> AppResult<String> {
        for _ in 0..UID_ATTEMPTS {
            let uid = uid_generator.generate()?;
            if !self
                .roles
                .values()
                .any(|role| role.org_id == org_id && role.uid == uid)
            {
                return Ok(uid);
            }
        }

        Err(AppError::IdGenerationExhausted(format!(
            "no free role uid in org '{org_id}' after {UID_ATTEMPTS} attempts"
        )))
    }

    pub(super) fn create_role(
        &mut self,
        org_id: OrgId,
        name: &str,
        uid: &str,
        now: DateTime<Utc>,
    ) -> AppResult<Role> {
        if self.find_role(org_id, name).is_some() {
            return Err(AppError::Conflict(format!(
                "role '{name}' already exists in org '{org_id}'"
            )));
        }

        self.next_role_id += 1;
        let role = Role {
            id: self.next_role_id,
            uid: uid.to_owned(),
            org_id,
            name: name.to_owned(),
            created: now,
            updated: now,
        };
        self.roles.insert(role.id, role.clone());

        Ok(role)
    }

    pub(super) fn add_assignment(
        &mut self,
        org_id: OrgId,
        holder: AssignmentHolder,
        role_id: i64,
    ) -> AppResult<()> {
        let exists = match &holder {
            AssignmentHolder::User(user_id) => self.users.contains_key(user_id),
            AssignmentHolder::Team(team_id) => self.teams.contains_key(team_id),
            AssignmentHolder::BuiltinRole(_) => true,
        };
        if !exists {
            return Err(AppError::SubjectNotFound(format!("{holder} does not exist")));
        }

        let assignment = Assignment {
            org_id,
            holder,
            role_id,
        };
        if self.assignments.contains(&assignment) {
            return Err(AppError::DuplicateAssignment(format!(
                "{} already holds role '{role_id}' in org '{org_id}'",
                assignment.holder
            )));
        }

        self.assignments.push(assignment);
        Ok(())
    }

    pub(super) fn insert_permission(
        &mut self,
        role_id: i64,
        action: &str,
        scope: &str,
        now: DateTime<Utc>,
    ) -> Permission {
        self.next_permission_id += 1;
        let permission = Permission::new(self.next_permission_id, role_id, action, scope, now);
        self.permissions.insert(permission.id, permission.clone());
        permission
    }

    fn get_or_create_managed_role(
        &mut self,
        org_id: OrgId,
        subject: ManagedSubject,
        uid_generator: &dyn UidGenerator,
        now: DateTime<Utc>,
    ) -> AppResult<(Role, bool)> {
        let name = subject.managed_role_name();
        if let Some(role) = self.find_role(org_id, &name) {
            return Ok((role.clone(), false));
        }

        let uid = self.free_uid(org_id, uid_generator)?;
        let role = self.create_role(org_id, &name, &uid, now)?;
        self.add_assignment(org_id, AssignmentHolder::from(subject), role.id)?;

        Ok((role, true))
    }

    pub(super) fn apply_desired(
        &mut self,
        org_id: OrgId,
        change: DesiredPermissions,
        uid_generator: &dyn UidGenerator,
        now: DateTime<Utc>,
    ) -> AppResult<AppliedPermissions> {
        let (role, role_created) =
            self.get_or_create_managed_role(org_id, change.subject, uid_generator, now)?;
        let scope = change.scope.to_string();

        let current: Vec<Permission> = self
            .permissions
            .values()
            .filter(|permission| permission.role_id == role.id && permission.scope == scope)
            .cloned()
            .collect();
        let diff = PermissionDiff::compute(&change.actions, &current);

        let mut removed = Vec::with_capacity(diff.to_remove.len());
        for id in &diff.to_remove {
            if let Some(permission) = self.permissions.remove(id) {
                removed.push(permission.action);
            }
        }
        for action in &diff.missing {
            self.insert_permission(role.id, action, &scope, now);
        }

        let remaining: Vec<&Permission> = self
            .permissions
            .values()
            .filter(|permission| permission.role_id == role.id && permission.scope == scope)
            .collect();
        let permission = if remaining.is_empty() {
            None
        } else {
            let holder = self.holder(change.subject)?;
            let rows: Vec<FlatResourcePermission> = remaining
                .into_iter()
                .map(|permission| FlatResourcePermission {
                    id: permission.id,
                    role_name: role.name.clone(),
                    action: permission.action.clone(),
                    scope: permission.scope.clone(),
                    holder: holder.clone(),
                    created: permission.created,
                    updated: permission.updated,
                })
                .collect();
            let references: Vec<&FlatResourcePermission> = rows.iter().collect();
            ResourcePermission::collapse(&scope, &references)
        };

        Ok(AppliedPermissions {
            subject: change.subject,
            role,
            role_created,
            inserted: diff.missing,
            removed,
            permission,
        })
    }

    fn holder(&self, subject: ManagedSubject) -> AppResult<PermissionHolder> {
        match subject {
            ManagedSubject::User(user_id) => self
                .users
                .get(&user_id)
                .map(user_holder)
                .ok_or_else(|| AppError::SubjectNotFound(format!("{subject} does not exist"))),
            ManagedSubject::Team(team_id) => self
                .teams
                .get(&team_id)
                .map(team_holder)
                .ok_or_else(|| AppError::SubjectNotFound(format!("{subject} does not exist"))),
            ManagedSubject::BuiltinRole(role) => {
                Ok(PermissionHolder::BuiltinRole(role.as_str().to_owned()))
            }
        }
    }

    fn removed_grant(&self, permission: &Permission) -> Option<RemovedGrant> {
        self.roles.get(&permission.role_id).map(|role| RemovedGrant {
            role_uid: role.uid.clone(),
            role_name: role.name.clone(),
            action: permission.action.clone(),
            scope: permission.scope.clone(),
        })
    }

    fn remove_permissions(
        &mut self,
        predicate: impl Fn(&Permission, &Role) -> bool,
    ) -> Vec<RemovedGrant> {
        let ids: Vec<i64> = self
            .permissions
            .values()
            .filter(|permission| {
                self.roles
                    .get(&permission.role_id)
                    .is_some_and(|role| predicate(permission, role))
            })
            .map(|permission| permission.id)
            .collect();

        let mut removed = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(permission) = self.permissions.remove(&id)
                && let Some(grant) = self.removed_grant(&permission)
            {
                removed.push(grant);
            }
        }
        removed
    }

    pub(super) fn delete_scope(&mut self, org_id: OrgId, scope: &str) -> Vec<RemovedGrant> {
        self.remove_permissions(|permission, role| {
            role.org_id == org_id && permission.scope == scope
        })
    }

    pub(super) fn delete_subject(
        &mut self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> SubjectCleanup {
        let role_name = subject.managed_role_name();
        let every_org = org_id.is_global() && matches!(subject, ManagedSubject::User(_));
        let roles: Vec<Role> = self
            .roles
            .values()
            .filter(|role| role.name == role_name && (every_org || role.org_id == org_id))
            .cloned()
            .collect();
        let role_ids: HashSet<i64> = roles.iter().map(|role| role.id).collect();

        let holder = AssignmentHolder::from(subject);
        self.assignments.retain(|assignment| match subject {
            ManagedSubject::User(_) => {
                !(assignment.holder == holder
                    && (org_id.is_global() || assignment.org_id == org_id))
            }
            ManagedSubject::Team(_) => {
                !(assignment.holder == holder && assignment.org_id == org_id)
            }
            ManagedSubject::BuiltinRole(_) => !role_ids.contains(&assignment.role_id),
        });

        let owned_scope = match subject {
            ManagedSubject::User(_) if !org_id.is_global() => None,
            _ => subject.owned_scope(),
        };
        let mut removed_grants = Vec::new();
        if let Some(owned_scope) = owned_scope {
            removed_grants.extend(self.remove_permissions(|permission, role| {
                permission.scope == owned_scope && (org_id.is_global() || role.org_id == org_id)
            }));
        }

        removed_grants.extend(
            self.remove_permissions(|permission, _| role_ids.contains(&permission.role_id)),
        );
        self.roles.retain(|id, _| !role_ids.contains(id));

        SubjectCleanup {
            removed_role_uids: roles.into_iter().map(|role| role.uid).collect(),
            removed_grants,
        }
    }

    pub(super) fn subject_grants(
        &self,
        org_id: OrgId,
        subject: ManagedSubject,
    ) -> Option<SubjectGrants> {
        let role = self.find_role(org_id, &subject.managed_role_name())?.clone();
        let permissions = self
            .permissions
            .values()
            .filter(|permission| permission.role_id == role.id)
            .cloned()
            .collect();

        Some(SubjectGrants { role, permissions })
    }
}

pub(super) fn user_holder(user: &UserAccount) -> PermissionHolder {
    PermissionHolder::User {
        user_id: user.id,
        login: user.login.clone(),
        email: user.email.clone(),
        is_service_account: user.is_service_account,
    }
}

pub(super) fn team_holder(team: &TeamRecord) -> PermissionHolder {
    PermissionHolder::Team {
        team_id: team.id,
        name: team.name.clone(),
        email: team.email.clone(),
    }
}
