use std::fmt::{Display, Formatter};
use std::str::FromStr;

use permsync_core::{AppError, AppResult, OrgId};
use serde::{Deserialize, Serialize};

use crate::role::MANAGED_ROLE_PREFIX;
use crate::scope::compose_scope;

/// Identifier of a user account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(i64);

impl UserId {
    /// Creates a user identifier from a raw value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for UserId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Identifier of a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamId(i64);

impl TeamId {
    /// Creates a team identifier from a raw value.
    #[must_use]
    pub const fn new(value: i64) -> Self {
        Self(value)
    }

    /// Returns the raw identifier value.
    #[must_use]
    pub const fn as_i64(&self) -> i64 {
        self.0
    }
}

impl Display for TeamId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", self.0)
    }
}

/// Basic organization roles every member holds one of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BuiltinRole {
    /// Read-only organization member.
    Viewer,
    /// Member allowed to edit content.
    Editor,
    /// Organization administrator.
    Admin,
    /// Member without a basic role.
    None,
    /// Reserved server-wide super administrator.
    ServerAdmin,
}

impl BuiltinRole {
    /// Returns the stable storage value.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Viewer => "Viewer",
            Self::Editor => "Editor",
            Self::Admin => "Admin",
            Self::None => "None",
            Self::ServerAdmin => "Server Admin",
        }
    }

    /// Returns whether this is the reserved super-admin role.
    #[must_use]
    pub fn is_reserved(&self) -> bool {
        matches!(self, Self::ServerAdmin)
    }

    /// Returns the tuple object of the synthesized basic role in one org,
    /// e.g. `role:basic_editor_1`.
    #[must_use]
    pub fn basic_role_object(&self, org_id: OrgId) -> String {
        basic_role_object(self.as_str(), org_id)
    }
}

/// Returns the tuple object for a basic role name in one org.
#[must_use]
pub fn basic_role_object(role: &str, org_id: OrgId) -> String {
    let normalized = role.trim().to_lowercase().replace(' ', "_");
    format!("role:basic_{normalized}_{org_id}")
}

impl FromStr for BuiltinRole {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "Viewer" => Ok(Self::Viewer),
            "Editor" => Ok(Self::Editor),
            "Admin" => Ok(Self::Admin),
            "None" => Ok(Self::None),
            "Server Admin" => Ok(Self::ServerAdmin),
            _ => Err(AppError::InvalidBuiltinRole(format!(
                "unknown built-in role '{value}'"
            ))),
        }
    }
}

/// Subject that owns a managed role.
///
/// Exactly one case is populated; callers resolve the subject kind once at
/// the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ManagedSubject {
    /// A single user account.
    User(UserId),
    /// A team and, transitively, its members.
    Team(TeamId),
    /// Every org member holding the built-in role.
    BuiltinRole(BuiltinRole),
}

impl ManagedSubject {
    /// Validates a user subject.
    pub fn user(user_id: i64) -> AppResult<Self> {
        if user_id == 0 {
            return Err(AppError::SubjectNotFound("user id must not be zero".to_owned()));
        }

        Ok(Self::User(UserId::new(user_id)))
    }

    /// Validates a team subject.
    pub fn team(team_id: i64) -> AppResult<Self> {
        if team_id == 0 {
            return Err(AppError::SubjectNotFound("team id must not be zero".to_owned()));
        }

        Ok(Self::Team(TeamId::new(team_id)))
    }

    /// Validates a built-in role subject.
    ///
    /// The reserved super-admin role is accepted only when `allow_reserved` is set.
    pub fn builtin_role(role: &str, allow_reserved: bool) -> AppResult<Self> {
        let role = BuiltinRole::from_str(role)?;
        if role.is_reserved() && !allow_reserved {
            return Err(AppError::InvalidBuiltinRole(format!(
                "built-in role '{}' cannot hold resource permissions",
                role.as_str()
            )));
        }

        Ok(Self::BuiltinRole(role))
    }

    /// Returns the managed role name, e.g. `managed:users:7`.
    #[must_use]
    pub fn managed_role_name(&self) -> String {
        match self {
            Self::User(user_id) => format!("{MANAGED_ROLE_PREFIX}users:{user_id}"),
            Self::Team(team_id) => format!("{MANAGED_ROLE_PREFIX}teams:{team_id}"),
            Self::BuiltinRole(role) => format!(
                "{MANAGED_ROLE_PREFIX}builtins:{}",
                role.as_str().to_lowercase().replace(' ', "_")
            ),
        }
    }

    /// Recovers the subject from a managed role name.
    ///
    /// Returns `None` for names without the managed prefix or with an
    /// unknown subject segment.
    #[must_use]
    pub fn from_managed_role_name(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(MANAGED_ROLE_PREFIX)?;
        let (kind, key) = rest.split_once(':')?;

        match kind {
            "users" => key.parse().ok().map(|id| Self::User(UserId::new(id))),
            "teams" => key.parse().ok().map(|id| Self::Team(TeamId::new(id))),
            "builtins" => [
                BuiltinRole::Viewer,
                BuiltinRole::Editor,
                BuiltinRole::Admin,
                BuiltinRole::None,
                BuiltinRole::ServerAdmin,
            ]
            .into_iter()
            .map(Self::BuiltinRole)
            .find(|subject| subject.managed_role_name() == name),
            _ => None,
        }
    }

    /// Returns the tuple subject reference used for the assignee relation.
    #[must_use]
    pub fn tuple_subject(&self, org_id: OrgId) -> String {
        match self {
            Self::User(user_id) => format!("user:{user_id}"),
            Self::Team(team_id) => format!("team:{team_id}"),
            Self::BuiltinRole(role) => role.basic_role_object(org_id),
        }
    }

    /// Returns the scope that addresses the subject itself as a resource.
    #[must_use]
    pub fn owned_scope(&self) -> Option<String> {
        match self {
            Self::User(user_id) => Some(compose_scope("users", "id", &user_id.to_string())),
            Self::Team(team_id) => Some(compose_scope("teams", "id", &team_id.to_string())),
            Self::BuiltinRole(_) => None,
        }
    }
}

impl Display for ManagedSubject {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User(user_id) => write!(formatter, "user:{user_id}"),
            Self::Team(team_id) => write!(formatter, "team:{team_id}"),
            Self::BuiltinRole(role) => write!(formatter, "builtin:{}", role.as_str()),
        }
    }
}

impl FromStr for ManagedSubject {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let Some((kind, key)) = value.split_once(':') else {
            return Err(AppError::Validation(format!(
                "invalid subject key '{value}'"
            )));
        };

        let parse_id = |raw: &str| {
            raw.parse::<i64>().map_err(|error| {
                AppError::Validation(format!("invalid subject id in '{value}': {error}"))
            })
        };

        match kind {
            "user" => Self::user(parse_id(key)?),
            "team" => Self::team(parse_id(key)?),
            "builtin" => Self::builtin_role(key, true),
            _ => Err(AppError::Validation(format!(
                "unknown subject kind in '{value}'"
            ))),
        }
    }
}
