//! Domain enums shared across crates

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Error returned when a string does not name a known variant
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: '{value}'")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

/// Status of a user's local workflow (agent) record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Inactive,
    Paused,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Active => "active",
            AgentStatus::Inactive => "inactive",
            AgentStatus::Paused => "paused",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(AgentStatus::Active),
            "inactive" => Ok(AgentStatus::Inactive),
            "paused" => Ok(AgentStatus::Paused),
            other => Err(ParseEnumError {
                kind: "agent status",
                value: other.to_string(),
            }),
        }
    }
}

/// Requested change to a workflow's subscription line item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowAction {
    Activate,
    Deactivate,
}

impl WorkflowAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowAction::Activate => "activate",
            WorkflowAction::Deactivate => "deactivate",
        }
    }

    /// Local agent status that mirrors this action once it succeeds
    pub fn target_status(&self) -> AgentStatus {
        match self {
            WorkflowAction::Activate => AgentStatus::Active,
            WorkflowAction::Deactivate => AgentStatus::Inactive,
        }
    }
}

impl fmt::Display for WorkflowAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkflowAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "activate" => Ok(WorkflowAction::Activate),
            "deactivate" => Ok(WorkflowAction::Deactivate),
            other => Err(ParseEnumError {
                kind: "action",
                value: other.to_string(),
            }),
        }
    }
}

/// Application roles. Assigned externally, never self-service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppRole {
    Superadmin,
}

impl AppRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppRole::Superadmin => "superadmin",
        }
    }
}

impl FromStr for AppRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "superadmin" => Ok(AppRole::Superadmin),
            other => Err(ParseEnumError {
                kind: "role",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_maps_to_agent_status() {
        assert_eq!(WorkflowAction::Activate.target_status(), AgentStatus::Active);
        assert_eq!(
            WorkflowAction::Deactivate.target_status(),
            AgentStatus::Inactive
        );
    }

    #[test]
    fn test_parse_rejects_unknown_action() {
        let err = "pause".parse::<WorkflowAction>().unwrap_err();
        assert_eq!(err.to_string(), "invalid action: 'pause'");
    }

    #[test]
    fn test_agent_status_round_trips_through_str() {
        for status in [AgentStatus::Active, AgentStatus::Inactive, AgentStatus::Paused] {
            assert_eq!(status.as_str().parse::<AgentStatus>().unwrap(), status);
        }
    }
}
