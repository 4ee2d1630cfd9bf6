//! Business-rule validation of merged intent and entity output.

use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use tracing::warn;

use crate::entity::Entity;
use crate::error::{NluError, Result};
use crate::intent::IntentResult;
use crate::labels::{EntityType, IntentType};

lazy_static! {
    /// Entity types an intent cannot be acted on without
    pub static ref REQUIRED_ENTITIES: HashMap<IntentType, BTreeSet<EntityType>> = {
        let mut table = HashMap::new();
        table.insert(
            IntentType::CreateAgent,
            BTreeSet::from([EntityType::AgentName, EntityType::IntegrationType]),
        );
        table.insert(IntentType::ModifyAgent, BTreeSet::from([EntityType::AgentName]));
        table.insert(IntentType::DeleteAgent, BTreeSet::from([EntityType::AgentName]));
        table.insert(
            IntentType::ConfigureIntegration,
            BTreeSet::from([EntityType::IntegrationType]),
        );
        table
    };
}

pub fn required_entities(intent: IntentType) -> Option<&'static BTreeSet<EntityType>> {
    REQUIRED_ENTITIES.get(&intent)
}

/// Advisory outcome of the business rules
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetails {
    pub intent_valid: bool,
    pub entities_valid: bool,
    /// Required entity types that were not found, in stable order
    pub missing_entities: Vec<EntityType>,
}

/// Scores derived from one intent result and its entities
#[derive(Debug, Clone, PartialEq)]
pub struct MergedOutput {
    pub overall_confidence: f64,
    pub average_entity_confidence: f64,
    pub details: ValidationDetails,
}

fn check_confidence(what: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(NluError::merge_validation(format!(
            "{} confidence {} is outside [0, 1]",
            what, value
        )));
    }
    Ok(())
}

/// Reconcile intent and entity output against the required-entities table.
///
/// Malformed input (non-finite or out-of-range confidences, entities out of
/// positional order) is rejected; rule violations are only reported.
pub fn validate_results(
    intent: &IntentResult,
    entities: &[Entity],
    threshold: f64,
) -> Result<MergedOutput> {
    check_confidence("intent", intent.confidence)?;
    for entity in entities {
        check_confidence(entity.entity_type.as_str(), entity.confidence)?;
    }
    if entities.windows(2).any(|w| w[1].position < w[0].position) {
        return Err(NluError::merge_validation("entities are not in positional order"));
    }

    let average_entity_confidence = if entities.is_empty() {
        0.0
    } else {
        entities.iter().map(|e| e.confidence).sum::<f64>() / entities.len() as f64
    };

    let missing_entities: Vec<EntityType> = match required_entities(intent.intent) {
        Some(required) => {
            let present: BTreeSet<EntityType> = entities.iter().map(|e| e.entity_type).collect();
            required.difference(&present).copied().collect()
        }
        None => Vec::new(),
    };

    if !missing_entities.is_empty() {
        warn!(
            intent = %intent.intent,
            missing = ?missing_entities,
            "Required entities missing"
        );
    }

    Ok(MergedOutput {
        overall_confidence: (intent.confidence + average_entity_confidence) / 2.0,
        average_entity_confidence,
        details: ValidationDetails {
            intent_valid: intent.confidence >= threshold,
            entities_valid: average_entity_confidence >= threshold,
            missing_entities,
        },
    })
}
