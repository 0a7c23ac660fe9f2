use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::role::is_managed_role_name;
use crate::scope::split_scope;
use crate::subject::{TeamId, UserId};

/// Stored permission row owned by a role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    /// Store-assigned identifier.
    pub id: i64,
    /// Owning role identifier.
    pub role_id: i64,
    /// Granted action, e.g. `dashboards:read`.
    pub action: String,
    /// Targeted scope.
    pub scope: String,
    /// Cached scope kind.
    pub kind: String,
    /// Cached scope attribute.
    pub attribute: String,
    /// Cached scope identifier.
    pub identifier: String,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last update timestamp.
    pub updated: DateTime<Utc>,
}

impl Permission {
    /// Builds a permission row with its scope decomposition filled in.
    #[must_use]
    pub fn new(
        id: i64,
        role_id: i64,
        action: impl Into<String>,
        scope: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let scope = scope.into();
        let (kind, attribute, identifier) = split_scope(&scope);

        Self {
            id,
            role_id,
            action: action.into(),
            scope,
            kind,
            attribute,
            identifier,
            created: now,
            updated: now,
        }
    }
}

/// Action and scope pair as resolved for a subject.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScopedAction {
    /// Granted action.
    pub action: String,
    /// Targeted scope.
    pub scope: String,
}

/// Delta between a desired action set and the stored permissions of one
/// role at one scope.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionDiff {
    /// Desired actions without a stored permission, in request order.
    pub missing: Vec<String>,
    /// Identifiers of stored permissions to delete.
    pub to_remove: Vec<i64>,
}

impl PermissionDiff {
    /// Computes the diff.
    ///
    /// Comparison is case-sensitive. A stored action that is not desired is
    /// removed, and so is every repeated occurrence of an action already seen.
    #[must_use]
    pub fn compute(desired: &[String], current: &[Permission]) -> Self {
        let desired_set: HashSet<&str> = desired.iter().map(String::as_str).collect();
        let mut kept: HashSet<&str> = HashSet::with_capacity(current.len());
        let mut to_remove = Vec::new();

        for permission in current {
            let action = permission.action.as_str();
            if desired_set.contains(action) && kept.insert(action) {
                continue;
            }
            to_remove.push(permission.id);
        }

        let mut seen = HashSet::with_capacity(desired.len());
        let missing = desired
            .iter()
            .filter(|action| !kept.contains(action.as_str()) && seen.insert(action.as_str()))
            .cloned()
            .collect();

        Self { missing, to_remove }
    }

    /// Returns whether the stored state already matches the desired state.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.missing.is_empty() && self.to_remove.is_empty()
    }
}

/// Identity that holds a resource permission through an assignment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PermissionHolder {
    /// Directly assigned user or service account.
    User {
        /// User identifier.
        user_id: UserId,
        /// Login name.
        login: String,
        /// Email address.
        email: String,
        /// Whether the account is a service account.
        is_service_account: bool,
    },
    /// Team assignment.
    Team {
        /// Team identifier.
        team_id: TeamId,
        /// Team name.
        name: String,
        /// Team email address.
        email: String,
    },
    /// Built-in role assignment.
    BuiltinRole(String),
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum HolderKey {
    User(UserId),
    Team(TeamId),
    BuiltinRole(String),
}

impl PermissionHolder {
    fn key(&self) -> HolderKey {
        match self {
            Self::User { user_id, .. } => HolderKey::User(*user_id),
            Self::Team { team_id, .. } => HolderKey::Team(*team_id),
            Self::BuiltinRole(role) => HolderKey::BuiltinRole(role.clone()),
        }
    }
}

/// How a permission relates to the queried scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionClass {
    /// Managed role permission at exactly the queried scope.
    Managed,
    /// Managed role permission at another scope, typically an ancestor.
    Inherited,
    /// Permission from a role defined outside the permission store.
    Provisioned,
}

impl PermissionClass {
    /// Classifies a permission row against the queried scope.
    #[must_use]
    pub fn classify(role_name: &str, permission_scope: &str, queried_scope: &str) -> Self {
        if !is_managed_role_name(role_name) {
            return Self::Provisioned;
        }

        if permission_scope == queried_scope {
            Self::Managed
        } else {
            Self::Inherited
        }
    }
}

/// One permission row joined with its role and holder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlatResourcePermission {
    /// Permission identifier.
    pub id: i64,
    /// Owning role name.
    pub role_name: String,
    /// Granted action.
    pub action: String,
    /// Stored scope.
    pub scope: String,
    /// Assignment holder.
    pub holder: PermissionHolder,
    /// Creation timestamp.
    pub created: DateTime<Utc>,
    /// Last update timestamp.
    pub updated: DateTime<Utc>,
}

impl FlatResourcePermission {
    /// Classifies this row against the queried scope.
    #[must_use]
    pub fn class(&self, queried_scope: &str) -> PermissionClass {
        PermissionClass::classify(&self.role_name, &self.scope, queried_scope)
    }
}

/// Aggregated view of the permissions a holder has on a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourcePermission {
    /// Identifier of the first aggregated permission.
    pub id: i64,
    /// Name of the role granting the permissions.
    pub role_name: String,
    /// Granted actions.
    pub actions: Vec<String>,
    /// Scope of the first aggregated permission.
    pub scope: String,
    /// Assignment holder.
    pub holder: PermissionHolder,
    /// Creation timestamp of the first aggregated permission.
    pub created: DateTime<Utc>,
    /// Update timestamp of the first aggregated permission.
    pub updated: DateTime<Utc>,
    /// Managed permission at the queried scope.
    pub is_managed: bool,
    /// Managed permission inherited from another scope.
    pub is_inherited: bool,
}

impl ResourcePermission {
    /// Collapses rows of one holder and class into a single view.
    ///
    /// Returns `None` when no rows are given.
    #[must_use]
    pub fn collapse(queried_scope: &str, rows: &[&FlatResourcePermission]) -> Option<Self> {
        let first = rows.first()?;

        let mut actions: Vec<String> = Vec::with_capacity(rows.len());
        for row in rows {
            if !actions.contains(&row.action) {
                actions.push(row.action.clone());
            }
        }

        let class = first.class(queried_scope);
        Some(Self {
            id: first.id,
            role_name: first.role_name.clone(),
            actions,
            scope: first.scope.clone(),
            holder: first.holder.clone(),
            created: first.created,
            updated: first.updated,
            is_managed: class == PermissionClass::Managed,
            is_inherited: class == PermissionClass::Inherited,
        })
    }

    /// Returns the classification of this view.
    #[must_use]
    pub fn class(&self) -> PermissionClass {
        if self.is_managed {
            PermissionClass::Managed
        } else if self.is_inherited {
            PermissionClass::Inherited
        } else {
            PermissionClass::Provisioned
        }
    }
}

/// Groups joined rows by holder and partitions each group into managed,
/// inherited and provisioned views.
///
/// Users come first, then teams, then built-in roles; within a holder the
/// order is managed, inherited, provisioned.
#[must_use]
pub fn aggregate_resource_permissions(
    queried_scope: &str,
    rows: &[FlatResourcePermission],
) -> Vec<ResourcePermission> {
    let mut grouped: BTreeMap<HolderKey, Vec<&FlatResourcePermission>> = BTreeMap::new();
    for row in rows {
        grouped.entry(row.holder.key()).or_default().push(row);
    }

    let mut result = Vec::new();
    for holder_rows in grouped.values() {
        for class in [
            PermissionClass::Managed,
            PermissionClass::Inherited,
            PermissionClass::Provisioned,
        ] {
            let bucket: Vec<&FlatResourcePermission> = holder_rows
                .iter()
                .copied()
                .filter(|row| row.class(queried_scope) == class)
                .collect();

            if let Some(permission) = ResourcePermission::collapse(queried_scope, &bucket) {
                result.push(permission);
            }
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use proptest::prelude::*;

    use super::{
        FlatResourcePermission, Permission, PermissionClass, PermissionDiff, PermissionHolder,
        aggregate_resource_permissions,
    };
    use crate::subject::{TeamId, UserId};

    fn stored(id: i64, action: &str) -> Permission {
        Permission::new(id, 1, action, "dashboards:uid:abc", Utc::now())
    }

    fn actions(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| (*value).to_owned()).collect()
    }

    fn flat(
        id: i64,
        role_name: &str,
        action: &str,
        scope: &str,
        holder: PermissionHolder,
    ) -> FlatResourcePermission {
        let now = Utc::now();
        FlatResourcePermission {
            id,
            role_name: role_name.to_owned(),
            action: action.to_owned(),
            scope: scope.to_owned(),
            holder,
            created: now,
            updated: now,
        }
    }

    fn user_holder(user_id: i64) -> PermissionHolder {
        PermissionHolder::User {
            user_id: UserId::new(user_id),
            login: format!("user{user_id}"),
            email: format!("user{user_id}@example.com"),
            is_service_account: false,
        }
    }

    #[test]
    fn diff_reports_missing_and_removed_actions() {
        let diff = PermissionDiff::compute(
            &actions(&["read", "write"]),
            &[stored(10, "write"), stored(11, "delete")],
        );

        assert_eq!(diff.missing, actions(&["read"]));
        assert_eq!(diff.to_remove, vec![11]);
    }

    #[test]
    fn empty_desired_set_revokes_everything() {
        let diff = PermissionDiff::compute(&[], &[stored(1, "read"), stored(2, "write")]);

        assert!(diff.missing.is_empty());
        assert_eq!(diff.to_remove, vec![1, 2]);
    }

    #[test]
    fn matching_state_yields_empty_diff() {
        let diff = PermissionDiff::compute(
            &actions(&["read", "write"]),
            &[stored(1, "write"), stored(2, "read")],
        );

        assert!(diff.is_empty());
    }

    #[test]
    fn duplicated_stored_action_is_removed_once_seen() {
        let diff = PermissionDiff::compute(
            &actions(&["read"]),
            &[stored(1, "read"), stored(2, "read")],
        );

        assert!(diff.missing.is_empty());
        assert_eq!(diff.to_remove, vec![2]);
    }

    #[test]
    fn diff_is_case_sensitive() {
        let diff = PermissionDiff::compute(&actions(&["Read"]), &[stored(1, "read")]);

        assert_eq!(diff.missing, actions(&["Read"]));
        assert_eq!(diff.to_remove, vec![1]);
    }

    #[test]
    fn classification_follows_role_name_and_scope() {
        let queried = "dashboards:uid:abc";
        assert_eq!(
            PermissionClass::classify("managed:users:5", queried, queried),
            PermissionClass::Managed
        );
        assert_eq!(
            PermissionClass::classify("managed:users:5", "folders:uid:parent", queried),
            PermissionClass::Inherited
        );
        assert_eq!(
            PermissionClass::classify("custom-role", queried, queried),
            PermissionClass::Provisioned
        );
    }

    #[test]
    fn aggregation_partitions_each_holder_by_class() {
        let queried = "dashboards:uid:abc";
        let rows = vec![
            flat(3, "managed:teams:2", "dashboards:read", queried, PermissionHolder::Team {
                team_id: TeamId::new(2),
                name: "ops".to_owned(),
                email: String::new(),
            }),
            flat(1, "managed:users:5", "dashboards:read", queried, user_holder(5)),
            flat(2, "managed:users:5", "dashboards:write", queried, user_holder(5)),
            flat(4, "managed:users:5", "dashboards:read", "folders:uid:parent", user_holder(5)),
            flat(5, "custom-role", "dashboards:read", "dashboards:*", user_holder(5)),
            flat(
                6,
                "managed:builtins:viewer",
                "dashboards:read",
                queried,
                PermissionHolder::BuiltinRole("Viewer".to_owned()),
            ),
        ];

        let result = aggregate_resource_permissions(queried, &rows);

        assert_eq!(result.len(), 5);
        assert_eq!(result[0].actions, actions(&["dashboards:read", "dashboards:write"]));
        assert_eq!(result[0].class(), PermissionClass::Managed);
        assert_eq!(result[1].class(), PermissionClass::Inherited);
        assert_eq!(result[1].scope, "folders:uid:parent");
        assert_eq!(result[2].class(), PermissionClass::Provisioned);
        assert_eq!(result[3].role_name, "managed:teams:2");
        assert_eq!(
            result[4].holder,
            PermissionHolder::BuiltinRole("Viewer".to_owned())
        );
    }

    proptest! {
        #[test]
        fn applying_the_diff_reaches_the_desired_set(
            desired in proptest::collection::vec("[a-c]:(read|write)", 0..6),
            current in proptest::collection::vec("[a-c]:(read|write)", 0..6),
        ) {
            let stored_rows: Vec<Permission> = current
                .iter()
                .enumerate()
                .map(|(index, action)| stored(index as i64, action))
                .collect();
            let diff = PermissionDiff::compute(&desired, &stored_rows);

            let mut remaining: Vec<String> = stored_rows
                .iter()
                .filter(|row| !diff.to_remove.contains(&row.id))
                .map(|row| row.action.clone())
                .collect();
            remaining.extend(diff.missing.iter().cloned());
            remaining.sort();

            let mut expected = desired.clone();
            expected.sort();
            expected.dedup();

            prop_assert_eq!(remaining, expected);
        }
    }
}
