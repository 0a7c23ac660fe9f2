use async_trait::async_trait;

use permsync_core::{AppResult, OrgId};
use permsync_domain::{TeamId, UserId};

/// Org membership row with the member's basic role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrgMembership {
    /// Organization.
    pub org_id: OrgId,
    /// Member.
    pub user_id: UserId,
    /// Basic role name, e.g. `Editor`.
    pub role: String,
}

/// Team membership row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamMembership {
    /// Organization owning the team.
    pub org_id: OrgId,
    /// Team.
    pub team_id: TeamId,
    /// Member.
    pub user_id: UserId,
}

/// Read port over membership tables used by full synchronization.
#[async_trait]
pub trait MembershipRepository: Send + Sync {
    /// Lists every org membership.
    async fn list_org_memberships(&self) -> AppResult<Vec<OrgMembership>>;

    /// Lists every team membership.
    async fn list_team_memberships(&self) -> AppResult<Vec<TeamMembership>>;
}
