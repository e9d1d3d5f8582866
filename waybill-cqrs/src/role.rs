//! Operation roles and operating modes.

use crate::error::RoutingError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Declared intent of a repository call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Query; may be served by a replica
    Read,
    /// Mutation; must reach the primary
    Write,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Read => f.write_str("read"),
            Role::Write => f.write_str("write"),
        }
    }
}

/// Which physical connections a deployment provisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CqrsMode {
    /// Write connection only
    Write,
    /// Read connection only
    Read,
    /// Both connections; write is the default target
    #[default]
    Both,
}

impl CqrsMode {
    /// Whether this mode provisions a connection for `role`.
    pub fn provisions(&self, role: Role) -> bool {
        matches!(
            (self, role),
            (CqrsMode::Both, _) | (CqrsMode::Write, Role::Write) | (CqrsMode::Read, Role::Read)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CqrsMode::Write => "write",
            CqrsMode::Read => "read",
            CqrsMode::Both => "both",
        }
    }
}

impl fmt::Display for CqrsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CqrsMode {
    type Err = RoutingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "write" => Ok(CqrsMode::Write),
            "read" => Ok(CqrsMode::Read),
            "both" => Ok(CqrsMode::Both),
            other => Err(RoutingError::InvalidMode(other.to_string())),
        }
    }
}
