//! Visibility filtering of endpoints per caller

use registry_api::{CallerContext, CallerRole, Endpoint};
use std::collections::HashSet;

/// Return the endpoints the caller may see, in input order.
///
/// Administrators see everything. Other callers see an endpoint when they
/// are listed in its authorized users or share at least one team with its
/// authorized teams. Endpoints with both lists empty are hidden from them.
pub fn filter_visible(endpoints: Vec<Endpoint>, caller: &CallerContext) -> Vec<Endpoint> {
    match caller.role {
        CallerRole::Administrator => endpoints,
        CallerRole::Standard => {
            let teams: HashSet<_> = caller.teams.iter().copied().collect();
            endpoints
                .into_iter()
                .filter(|endpoint| {
                    endpoint.authorized_users.contains(&caller.user_id)
                        || endpoint
                            .authorized_teams
                            .iter()
                            .any(|team| teams.contains(team))
                })
                .collect()
        }
    }
}
