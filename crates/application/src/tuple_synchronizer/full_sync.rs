use super::*;

use crate::{OrgMembership, TeamMembership};

impl TupleSynchronizer {
    /// Overrides the full-sync batch size.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Builds the member and basic-role tuples of org memberships, deduplicated.
    #[must_use]
    pub fn org_membership_tuples(memberships: &[OrgMembership]) -> Vec<TupleKey> {
        dedupe_tuples(memberships.iter().flat_map(|membership| {
            [
                TupleKey::org_member(membership.user_id, membership.org_id),
                TupleKey::basic_role_assignee(
                    membership.user_id,
                    &membership.role,
                    membership.org_id,
                ),
            ]
        }))
    }

    /// Builds the member tuples of team memberships, deduplicated.
    #[must_use]
    pub fn team_membership_tuples(memberships: &[TeamMembership]) -> Vec<TupleKey> {
        dedupe_tuples(
            memberships
                .iter()
                .map(|membership| TupleKey::team_member(membership.user_id, membership.team_id)),
        )
    }

    /// Rewrites the tuples of every org membership.
    pub async fn full_sync_org_memberships(&self) -> AppResult<FullSyncReport> {
        let memberships = self.memberships.list_org_memberships().await?;
        let tuples = Self::org_membership_tuples(&memberships);
        info!(
            memberships = memberships.len(),
            tuples = tuples.len(),
            "syncing org memberships"
        );

        self.write_batches(tuples).await
    }

    /// Rewrites the tuples of every team membership.
    pub async fn full_sync_team_memberships(&self) -> AppResult<FullSyncReport> {
        let memberships = self.memberships.list_team_memberships().await?;
        let tuples = Self::team_membership_tuples(&memberships);
        info!(
            memberships = memberships.len(),
            tuples = tuples.len(),
            "syncing team memberships"
        );

        self.write_batches(tuples).await
    }

    /// Rewrites org memberships, then team memberships.
    pub async fn synchronize_user_data(&self) -> AppResult<FullSyncReport> {
        let orgs = self.full_sync_org_memberships().await?;
        let teams = self.full_sync_team_memberships().await?;

        Ok(orgs.merge(teams))
    }
}
