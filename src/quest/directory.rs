//! Team membership lookup.
//!
//! Authentication happens elsewhere; the directory only answers which team
//! a user belongs to and which team a user leads.

use std::collections::HashMap;

use crate::config::schema::TeamConfig;
use crate::error::ProgressionError;
use crate::quest::progress::TeamId;

/// Membership and leadership lookup.
pub trait TeamDirectory: Send + Sync {
    /// Team the user belongs to, leaders included.
    fn team_of(&self, user: &str) -> Option<TeamId>;

    /// Team the user leads.
    fn team_led_by(&self, user: &str) -> Option<TeamId>;
}

/// Resolves a user who must lead their team.
///
/// # Errors
///
/// Returns [`ProgressionError::NotLeader`] for a plain member and
/// [`ProgressionError::UnknownRequester`] for a user without a team.
pub fn resolve_leader(
    directory: &dyn TeamDirectory,
    user: &str,
) -> Result<TeamId, ProgressionError> {
    if let Some(team) = directory.team_led_by(user) {
        return Ok(team);
    }
    Err(directory.team_of(user).map_or_else(
        || ProgressionError::UnknownRequester(user.to_string()),
        |team| ProgressionError::NotLeader {
            user: user.to_string(),
            team,
        },
    ))
}

/// Resolves a user who must belong to a team.
///
/// # Errors
///
/// Returns [`ProgressionError::UnknownRequester`] for a user without a team.
pub fn resolve_member(
    directory: &dyn TeamDirectory,
    user: &str,
) -> Result<TeamId, ProgressionError> {
    directory
        .team_of(user)
        .ok_or_else(|| ProgressionError::UnknownRequester(user.to_string()))
}

/// Static roster, usually built from configuration.
#[derive(Debug, Clone, Default)]
pub struct RosterDirectory {
    members: HashMap<String, TeamId>,
    leaders: HashMap<String, TeamId>,
}

impl RosterDirectory {
    /// Creates an empty roster.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a team. The leader is also registered as a member.
    #[must_use]
    pub fn with_team<I, S>(mut self, team: impl Into<String>, leader: &str, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let team = TeamId::new(team);
        self.leaders.insert(leader.to_string(), team.clone());
        self.members.insert(leader.to_string(), team.clone());
        for member in members {
            self.members.insert(member.into(), team.clone());
        }
        self
    }

    /// Builds the roster from configured teams.
    #[must_use]
    pub fn from_config(teams: &[TeamConfig]) -> Self {
        teams.iter().fold(Self::new(), |roster, t| {
            roster.with_team(t.id.as_str(), &t.leader, t.members.iter().cloned())
        })
    }

    /// Number of distinct teams.
    #[must_use]
    pub fn team_count(&self) -> usize {
        self.leaders.len()
    }

    /// Number of registered users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.members.len()
    }
}

impl TeamDirectory for RosterDirectory {
    fn team_of(&self, user: &str) -> Option<TeamId> {
        self.members.get(user).cloned()
    }

    fn team_led_by(&self, user: &str) -> Option<TeamId> {
        self.leaders.get(user).cloned()
    }
}
