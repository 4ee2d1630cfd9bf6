//! Intent and entity taxonomies.
//!
//! Model outputs are indexed by the position of a label in [`IntentType::LABELS`]
//! and [`EntityType::ALL`]; the order of those arrays is part of the model
//! contract and must not change.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Supported intents for agent-management requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentType {
    /// "create a sales agent for zoho crm"
    CreateAgent,
    /// "rename the billing agent"
    ModifyAgent,
    /// "remove the onboarding agent"
    DeleteAgent,
    /// "what is the status of my agents"
    QueryStatus,
    /// "connect salesforce"
    ConfigureIntegration,
    /// "help"
    Help,
    /// Assigned when the top prediction falls below the confidence threshold
    Unknown,
}

impl IntentType {
    /// Labels a model can predict, in logit order
    pub const LABELS: [IntentType; 6] = [
        IntentType::CreateAgent,
        IntentType::ModifyAgent,
        IntentType::DeleteAgent,
        IntentType::QueryStatus,
        IntentType::ConfigureIntegration,
        IntentType::Help,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreateAgent => "create_agent",
            Self::ModifyAgent => "modify_agent",
            Self::DeleteAgent => "delete_agent",
            Self::QueryStatus => "query_status",
            Self::ConfigureIntegration => "configure_integration",
            Self::Help => "help",
            Self::Unknown => "unknown",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::CreateAgent => "Create a new agent",
            Self::ModifyAgent => "Modify an existing agent",
            Self::DeleteAgent => "Delete an agent",
            Self::QueryStatus => "Query agent status",
            Self::ConfigureIntegration => "Configure an integration",
            Self::Help => "Ask for help",
            Self::Unknown => "Unknown or unclear intent",
        }
    }
}

impl fmt::Display for IntentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IntentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create_agent" => Ok(Self::CreateAgent),
            "modify_agent" => Ok(Self::ModifyAgent),
            "delete_agent" => Ok(Self::DeleteAgent),
            "query_status" => Ok(Self::QueryStatus),
            "configure_integration" => Ok(Self::ConfigureIntegration),
            "help" => Ok(Self::Help),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown intent label '{}'", other)),
        }
    }
}

/// Entity categories recognized in agent-management requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
    AgentName,
    IntegrationType,
    Parameter,
    Schedule,
    Action,
    Condition,
}

impl EntityType {
    /// Entity classes in logit order
    pub const ALL: [EntityType; 6] = [
        EntityType::AgentName,
        EntityType::IntegrationType,
        EntityType::Parameter,
        EntityType::Schedule,
        EntityType::Action,
        EntityType::Condition,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AgentName => "AGENT_NAME",
            Self::IntegrationType => "INTEGRATION_TYPE",
            Self::Parameter => "PARAMETER",
            Self::Schedule => "SCHEDULE",
            Self::Action => "ACTION",
            Self::Condition => "CONDITION",
        }
    }

    pub fn index(&self) -> usize {
        match self {
            Self::AgentName => 0,
            Self::IntegrationType => 1,
            Self::Parameter => 2,
            Self::Schedule => 3,
            Self::Action => 4,
            Self::Condition => 5,
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown entity type '{}'", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intent_serde_uses_snake_case() {
        let json = serde_json::to_string(&IntentType::ConfigureIntegration).unwrap();
        assert_eq!(json, "\"configure_integration\"");

        let parsed: IntentType = serde_json::from_str("\"unknown\"").unwrap();
        assert_eq!(parsed, IntentType::Unknown);
    }

    #[test]
    fn test_intent_round_trips_through_str() {
        for label in IntentType::LABELS {
            assert_eq!(label.as_str().parse::<IntentType>().unwrap(), label);
        }
        assert!("create agent".parse::<IntentType>().is_err());
    }

    #[test]
    fn test_entity_index_matches_logit_order() {
        for (i, entity_type) in EntityType::ALL.iter().enumerate() {
            assert_eq!(entity_type.index(), i);
        }
    }

    #[test]
    fn test_entity_serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&EntityType::IntegrationType).unwrap();
        assert_eq!(json, "\"INTEGRATION_TYPE\"");
        assert_eq!("SCHEDULE".parse::<EntityType>().unwrap(), EntityType::Schedule);
    }
}
