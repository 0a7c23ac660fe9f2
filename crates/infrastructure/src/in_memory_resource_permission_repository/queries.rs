use std::collections::{BTreeMap, BTreeSet, HashSet};

use permsync_application::{
    ResourcePermissionQuery, SearchUsersPermissionsQuery, UserPermissionsQuery,
};
use permsync_core::OrgId;
use permsync_domain::{
    BuiltinRole, FlatResourcePermission, PermissionHolder, ResourcePermission, Role, Scope,
    ScopedAction, UserId, aggregate_resource_permissions, is_managed_role_name,
};

use super::tables::{AssignmentHolder, PermissionTables, team_holder, user_holder};

fn in_org_or_global(assigned: OrgId, org_id: OrgId) -> bool {
    assigned == org_id || assigned.is_global()
}

fn matches_prefixes(role: &Role, prefixes: &[String]) -> bool {
    prefixes.is_empty() || prefixes.iter().any(|prefix| role.name.starts_with(prefix))
}

impl PermissionTables {
    pub(super) fn resource_permissions(
        &self,
        org_id: OrgId,
        query: &ResourcePermissionQuery,
    ) -> Vec<ResourcePermission> {
        if query.actions.is_empty() {
            return Vec::new();
        }

        let candidates = query.scope_candidates();
        let mut rows: Vec<FlatResourcePermission> = Vec::new();
        for assignment in &self.assignments {
            if !in_org_or_global(assignment.org_id, org_id) {
                continue;
            }
            let Some(role) = self.roles.get(&assignment.role_id) else {
                continue;
            };
            if !in_org_or_global(role.org_id, org_id)
                || (query.only_managed && !is_managed_role_name(&role.name))
            {
                continue;
            }

            let holder = match &assignment.holder {
                AssignmentHolder::User(user_id) => self.users.get(user_id).map(user_holder),
                AssignmentHolder::Team(team_id) => self.teams.get(team_id).map(team_holder),
                AssignmentHolder::BuiltinRole(name) => {
                    Some(PermissionHolder::BuiltinRole(name.clone()))
                }
            };
            let Some(holder) = holder else {
                continue;
            };

            rows.extend(
                self.permissions
                    .values()
                    .filter(|permission| {
                        permission.role_id == role.id
                            && query.actions.contains(&permission.action)
                            && candidates.contains(&permission.scope)
                    })
                    .map(|permission| FlatResourcePermission {
                        id: permission.id,
                        role_name: role.name.clone(),
                        action: permission.action.clone(),
                        scope: permission.scope.clone(),
                        holder: holder.clone(),
                        created: permission.created,
                        updated: permission.updated,
                    }),
            );
        }
        rows.sort_by_key(|row| row.id);

        aggregate_resource_permissions(&query.scope().to_string(), &rows)
    }

    pub(super) fn user_permissions(&self, query: &UserPermissionsQuery) -> Vec<ScopedAction> {
        let role_ids: HashSet<i64> = self
            .assignments
            .iter()
            .filter(|assignment| match &assignment.holder {
                AssignmentHolder::User(user_id) => {
                    query.user_id == Some(*user_id)
                        && in_org_or_global(assignment.org_id, query.org_id)
                }
                AssignmentHolder::Team(team_id) => {
                    query.team_ids.contains(team_id) && assignment.org_id == query.org_id
                }
                AssignmentHolder::BuiltinRole(role) => {
                    query.roles.contains(role)
                        && in_org_or_global(assignment.org_id, query.org_id)
                }
            })
            .map(|assignment| assignment.role_id)
            .collect();

        self.permissions
            .values()
            .filter(|permission| {
                role_ids.contains(&permission.role_id)
                    && self
                        .roles
                        .get(&permission.role_id)
                        .is_some_and(|role| matches_prefixes(role, &query.role_prefixes))
            })
            .map(|permission| ScopedAction {
                action: permission.action.clone(),
                scope: permission.scope.clone(),
            })
            .collect()
    }

    /// Resolves the (user, role) pairs reachable in an org through direct,
    /// team, basic role and server admin assignments.
    fn user_role_pairs(&self, org_id: OrgId) -> Vec<(UserId, i64)> {
        let mut pairs = Vec::new();
        for assignment in &self.assignments {
            match &assignment.holder {
                AssignmentHolder::User(user_id) => {
                    if in_org_or_global(assignment.org_id, org_id) {
                        pairs.push((*user_id, assignment.role_id));
                    }
                }
                AssignmentHolder::Team(team_id) => {
                    if assignment.org_id != org_id {
                        continue;
                    }
                    pairs.extend(
                        self.team_members
                            .iter()
                            .filter(|member| {
                                member.team_id == *team_id && member.org_id == org_id
                            })
                            .map(|member| (member.user_id, assignment.role_id)),
                    );
                }
                AssignmentHolder::BuiltinRole(role) => {
                    if !in_org_or_global(assignment.org_id, org_id) {
                        continue;
                    }
                    pairs.extend(
                        self.org_members
                            .iter()
                            .filter(|member| member.org_id == org_id && &member.role == role)
                            .map(|member| (member.user_id, assignment.role_id)),
                    );
                    if role == BuiltinRole::ServerAdmin.as_str() {
                        pairs.extend(
                            self.users
                                .values()
                                .filter(|user| user.is_admin)
                                .map(|user| (user.id, assignment.role_id)),
                        );
                    }
                }
            }
        }
        pairs
    }

    pub(super) fn search_users_permissions(
        &self,
        org_id: OrgId,
        query: &SearchUsersPermissionsQuery,
    ) -> BTreeMap<UserId, Vec<ScopedAction>> {
        let scopes = query
            .scope
            .as_deref()
            .map(|scope| Scope::parse(scope).query_candidates(&[]))
            .unwrap_or_default();

        let mut found: BTreeSet<(UserId, ScopedAction)> = BTreeSet::new();
        for (user_id, role_id) in self.user_role_pairs(org_id) {
            if query.user_id.is_some_and(|wanted| wanted != user_id) {
                continue;
            }
            let Some(role) = self.roles.get(&role_id) else {
                continue;
            };
            if !matches_prefixes(role, &query.role_prefixes) {
                continue;
            }

            for permission in self
                .permissions
                .values()
                .filter(|permission| permission.role_id == role_id)
            {
                let prefix_matches = query
                    .action_prefix
                    .as_deref()
                    .is_none_or(|prefix| permission.action.starts_with(prefix));
                let action_matches = query
                    .action
                    .as_deref()
                    .is_none_or(|action| permission.action == action);
                let scope_matches = scopes.is_empty() || scopes.contains(&permission.scope);

                if prefix_matches && action_matches && scope_matches {
                    found.insert((
                        user_id,
                        ScopedAction {
                            action: permission.action.clone(),
                            scope: permission.scope.clone(),
                        },
                    ));
                }
            }
        }

        let mut by_user: BTreeMap<UserId, Vec<ScopedAction>> = BTreeMap::new();
        for (user_id, scoped_action) in found {
            by_user.entry(user_id).or_default().push(scoped_action);
        }
        by_user
    }

    pub(super) fn users_basic_roles(
        &self,
        org_id: OrgId,
        user_filter: &[UserId],
    ) -> BTreeMap<UserId, Vec<String>> {
        let wanted = |user_id: &UserId| user_filter.is_empty() || user_filter.contains(user_id);

        let mut roles: BTreeMap<UserId, Vec<String>> = BTreeMap::new();
        for member in &self.org_members {
            if member.org_id == org_id && wanted(&member.user_id) {
                roles
                    .entry(member.user_id)
                    .or_default()
                    .push(member.role.clone());
            }
        }
        for user in self.users.values() {
            if user.is_admin && wanted(&user.id) {
                roles
                    .entry(user.id)
                    .or_default()
                    .push(BuiltinRole::ServerAdmin.as_str().to_owned());
            }
        }
        for user_roles in roles.values_mut() {
            user_roles.sort();
        }
        roles
    }
}
