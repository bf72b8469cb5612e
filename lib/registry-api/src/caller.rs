//! Caller identity facts supplied by the authorization layer

use crate::{TeamId, UserId};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

/// Role of the caller issuing a request
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallerRole {
    /// Unrestricted visibility, may manage endpoints
    Administrator,
    /// Sees only endpoints it is authorized for
    Standard,
}

impl CallerRole {
    pub fn is_administrator(&self) -> bool {
        matches!(self, CallerRole::Administrator)
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Unknown caller role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for CallerRole {
    type Err = UnknownRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "administrator" | "admin" => Ok(CallerRole::Administrator),
            "standard" | "user" => Ok(CallerRole::Standard),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// Per-request caller context. Never cached between requests.
#[derive(Clone, Debug, PartialEq)]
pub struct CallerContext {
    pub user_id: UserId,
    pub role: CallerRole,
    /// Teams the caller belongs to
    pub teams: Vec<TeamId>,
}

impl CallerContext {
    pub fn administrator(user_id: UserId) -> Self {
        Self {
            user_id,
            role: CallerRole::Administrator,
            teams: Vec::new(),
        }
    }

    pub fn standard(user_id: UserId, teams: Vec<TeamId>) -> Self {
        Self {
            user_id,
            role: CallerRole::Standard,
            teams,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_str() {
        assert_eq!("administrator".parse::<CallerRole>(), Ok(CallerRole::Administrator));
        assert_eq!("Admin".parse::<CallerRole>(), Ok(CallerRole::Administrator));
        assert_eq!("standard".parse::<CallerRole>(), Ok(CallerRole::Standard));
        assert!("root".parse::<CallerRole>().is_err());
    }

    #[test]
    fn test_context_constructors() {
        let admin = CallerContext::administrator(UserId(1));
        assert!(admin.role.is_administrator());
        assert!(admin.teams.is_empty());

        let user = CallerContext::standard(UserId(2), vec![TeamId(10)]);
        assert!(!user.role.is_administrator());
        assert_eq!(user.teams, vec![TeamId(10)]);
    }
}
