use permsync_core::OrgId;
use serde::{Deserialize, Serialize};

use crate::scope::Scope;
use crate::subject::{TeamId, UserId, basic_role_object};

/// Relation linking a subject to a role it holds.
pub const ASSIGNEE_RELATION: &str = "assignee";

/// Relation linking a user to an org or team.
pub const MEMBER_RELATION: &str = "member";

/// Optional condition attached to a relationship tuple.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipCondition {
    /// Condition name declared in the authorization model.
    pub name: String,
    /// Context values bound at write time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Map<String, serde_json::Value>>,
}

/// Subject/relation/object record consumed by the relationship engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TupleKey {
    /// Subject reference, e.g. `user:7` or `role:ab12`.
    pub user: String,
    /// Relation name.
    pub relation: String,
    /// Object reference, e.g. `org:1` or `dashboard:abc`.
    pub object: String,
    /// Optional condition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<RelationshipCondition>,
}

impl TupleKey {
    /// Creates an unconditional tuple.
    #[must_use]
    pub fn new(
        user: impl Into<String>,
        relation: impl Into<String>,
        object: impl Into<String>,
    ) -> Self {
        Self {
            user: user.into(),
            relation: relation.into(),
            object: object.into(),
            condition: None,
        }
    }

    /// Links a subject reference to a role as its assignee.
    #[must_use]
    pub fn assignee(subject_reference: impl Into<String>, role_uid: &str) -> Self {
        Self::new(subject_reference, ASSIGNEE_RELATION, format!("role:{role_uid}"))
    }

    /// Makes a user a member of an org.
    #[must_use]
    pub fn org_member(user_id: UserId, org_id: OrgId) -> Self {
        Self::new(
            format!("user:{user_id}"),
            MEMBER_RELATION,
            format!("org:{org_id}"),
        )
    }

    /// Makes a user a member of a team.
    #[must_use]
    pub fn team_member(user_id: UserId, team_id: TeamId) -> Self {
        Self::new(
            format!("user:{user_id}"),
            MEMBER_RELATION,
            format!("team:{team_id}"),
        )
    }

    /// Assigns a user the synthesized basic role of an org.
    #[must_use]
    pub fn basic_role_assignee(user_id: UserId, role: &str, org_id: OrgId) -> Self {
        Self::new(
            format!("user:{user_id}"),
            ASSIGNEE_RELATION,
            basic_role_object(role, org_id),
        )
    }

    /// Grants a role one action on a scope.
    #[must_use]
    pub fn grant(
        role_uid: &str,
        action: &str,
        scope: &Scope,
        container: ResourceContainer,
    ) -> Self {
        let (relation, object) = relation_object_for_action(action, scope, container);
        Self::new(format!("role:{role_uid}"), relation, object)
    }

    /// Returns the identity used for deduplication.
    #[must_use]
    pub fn key(&self) -> (&str, &str, &str) {
        (&self.user, &self.relation, &self.object)
    }
}

/// Parent resource a permission target may live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceContainer {
    /// Top-level resource.
    None,
    /// Folder that contains other resources.
    Folder,
}

impl ResourceContainer {
    /// Returns the container used when granting on a resource kind.
    #[must_use]
    pub fn for_resource(resource: &str) -> Self {
        if resource == "folders" {
            Self::Folder
        } else {
            Self::None
        }
    }
}

/// Converts an action on a scope into the relation and object of a tuple.
///
/// Actions inside a folder container that target other kinds become
/// `<kind>_<verb>` relations on the folder object. Actions matching the scope
/// kind use the bare verb.
#[must_use]
pub fn relation_object_for_action(
    action: &str,
    scope: &Scope,
    container: ResourceContainer,
) -> (String, String) {
    let (action_kind, verb) = action.rsplit_once(':').unwrap_or(("", action));
    let object_type = scope.kind().strip_suffix('s').unwrap_or(scope.kind());
    let qualified = || format!("{action_kind}_{verb}").replace('.', "_");

    if container == ResourceContainer::Folder && action_kind != "folders" {
        return (qualified(), format!("folder:{}", scope.identifier()));
    }

    let relation = if action_kind == scope.kind() {
        verb.replace('.', "_")
    } else {
        qualified()
    };

    (relation, format!("{object_type}:{}", scope.identifier()))
}

#[cfg(test)]
mod tests {
    use permsync_core::OrgId;

    use super::{ResourceContainer, TupleKey, relation_object_for_action};
    use crate::scope::Scope;
    use crate::subject::{TeamId, UserId};

    #[test]
    fn action_on_matching_kind_uses_bare_verb() {
        let scope = Scope::new("dashboards", "uid", "abc");
        assert_eq!(
            relation_object_for_action("dashboards:read", &scope, ResourceContainer::None),
            ("read".to_owned(), "dashboard:abc".to_owned())
        );
    }

    #[test]
    fn action_on_other_kind_is_qualified() {
        let scope = Scope::new("dashboards", "uid", "abc");
        assert_eq!(
            relation_object_for_action(
                "dashboards.permissions:write",
                &scope,
                ResourceContainer::None
            ),
            (
                "dashboards_permissions_write".to_owned(),
                "dashboard:abc".to_owned()
            )
        );
    }

    #[test]
    fn folder_container_targets_folder_object() {
        let scope = Scope::new("folders", "uid", "f1");
        assert_eq!(
            relation_object_for_action("dashboards:read", &scope, ResourceContainer::Folder),
            ("dashboards_read".to_owned(), "folder:f1".to_owned())
        );
        assert_eq!(
            relation_object_for_action("folders:read", &scope, ResourceContainer::Folder),
            ("read".to_owned(), "folder:f1".to_owned())
        );
    }

    #[test]
    fn grant_tuple_references_role_uid() {
        let tuple = TupleKey::grant(
            "ab12",
            "dashboards:read",
            &Scope::new("dashboards", "uid", "abc"),
            ResourceContainer::for_resource("dashboards"),
        );

        assert_eq!(tuple.user, "role:ab12");
        assert_eq!(tuple.relation, "read");
        assert_eq!(tuple.object, "dashboard:abc");
        assert!(tuple.condition.is_none());
    }

    #[test]
    fn membership_tuples_reference_org_and_team() {
        let org_member = TupleKey::org_member(UserId::new(7), OrgId::new(1));
        assert_eq!(org_member.key(), ("user:7", "member", "org:1"));

        let team_member = TupleKey::team_member(UserId::new(7), TeamId::new(3));
        assert_eq!(team_member.key(), ("user:7", "member", "team:3"));

        let basic = TupleKey::basic_role_assignee(UserId::new(7), "Editor", OrgId::new(1));
        assert_eq!(basic.key(), ("user:7", "assignee", "role:basic_editor_1"));
    }

    #[test]
    fn tuple_serializes_without_empty_condition() {
        let payload = serde_json::to_value(TupleKey::assignee("user:7", "ab12"));
        assert!(payload.is_ok());
        assert_eq!(
            payload.unwrap_or_default(),
            serde_json::json!({
                "user": "user:7",
                "relation": "assignee",
                "object": "role:ab12",
            })
        );
    }
}
