//! Built-in lexicon backend.
//!
//! A pattern-weighted intent model and a gazetteer token model, plus a
//! hashing tokenizer. The default lexicon is compiled in; a JSON artifact
//! with the same shape can replace it at startup.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::{info, trace};

use nlu_core::hash_text;
use nlu_infra::{retry_blocking, RetryConfig, RetryPolicy};

use crate::error::{NluError, Result};
use crate::labels::{EntityType, IntentType};
use crate::model::{IntentModel, TokenModel, Tokenizer};
use crate::preprocessor::Encoding;

/// Artifact load attempts at initialization
pub const MODEL_LOAD_ATTEMPTS: u32 = 3;

const UNKNOWN_TOKEN_ID: u32 = 1;
const FIRST_WORD_ID: u32 = 2;
const DEFAULT_VOCAB_SIZE: u32 = 30_522;
const DEFAULT_LOGIT_SCALE: f32 = 8.0;
const DEFAULT_TERM_STRENGTH: f32 = 8.0;

const AGENT_NAMES: &[&str] = &[
    "sales", "support", "marketing", "billing", "onboarding", "hr", "finance", "recruiting",
];
const INTEGRATIONS: &[&str] = &["zoho", "rms", "salesforce", "hubspot", "slack", "jira", "zendesk"];
const WEAK_INTEGRATIONS: &[&str] = &["crm"];
const SCHEDULES: &[&str] = &[
    "daily", "weekly", "hourly", "monthly", "tomorrow", "morning", "evening", "tonight",
];
const ACTIONS: &[&str] = &["send", "notify", "sync", "fetch", "generate", "remind", "escalate"];
const CONDITIONS: &[&str] = &["when", "if", "whenever", "unless", "after", "before"];

lazy_static! {
    static ref BUILTIN_INTENT_PATTERNS: Vec<(IntentType, &'static str, f32)> = vec![
        (
            IntentType::CreateAgent,
            r"\b(create|build|make|new|add|setup|set up|spin up)\b.*\bagents?\b",
            1.0,
        ),
        (
            IntentType::ModifyAgent,
            r"\b(modify|update|change|edit|rename|reconfigure)\b.*\bagents?\b",
            1.0,
        ),
        (
            IntentType::DeleteAgent,
            r"\b(delete|remove|destroy|deactivate|retire)\b.*\bagents?\b",
            1.0,
        ),
        (IntentType::QueryStatus, r"\b(status|progress|running|health|uptime)\b", 1.0),
        (
            IntentType::ConfigureIntegration,
            r"\b(connect|integrate|configure|link)\b",
            0.9,
        ),
        (IntentType::ConfigureIntegration, r"\bintegrations?\b", 0.8),
        (IntentType::Help, r"\b(help|how do i|what can you do)\b", 1.0),
    ];

    static ref BUILTIN_GAZETTEER: Vec<(EntityType, &'static [&'static str], f32)> = vec![
        (EntityType::AgentName, AGENT_NAMES, DEFAULT_TERM_STRENGTH),
        (EntityType::IntegrationType, INTEGRATIONS, DEFAULT_TERM_STRENGTH),
        // Too generic on its own to be confident
        (EntityType::IntegrationType, WEAK_INTEGRATIONS, 2.0),
        (EntityType::Schedule, SCHEDULES, DEFAULT_TERM_STRENGTH),
        (EntityType::Action, ACTIONS, DEFAULT_TERM_STRENGTH),
        (EntityType::Condition, CONDITIONS, DEFAULT_TERM_STRENGTH),
    ];
}

/// Hashes each word into a fixed-size vocabulary
#[derive(Debug, Clone)]
pub struct HashingTokenizer {
    vocab_size: u32,
}

impl Default for HashingTokenizer {
    fn default() -> Self {
        Self::new(DEFAULT_VOCAB_SIZE)
    }
}

impl HashingTokenizer {
    pub fn new(vocab_size: u32) -> Self {
        Self {
            vocab_size: vocab_size.max(FIRST_WORD_ID + 1),
        }
    }

    fn word_id(&self, word: &str) -> u32 {
        if word.is_empty() {
            return UNKNOWN_TOKEN_ID;
        }
        let span = u64::from(self.vocab_size - FIRST_WORD_ID);
        // The remainder is below vocab_size, so the cast cannot truncate
        FIRST_WORD_ID + (hash_text(word) % span) as u32
    }
}

impl Tokenizer for HashingTokenizer {
    fn encode_words(&self, words: &[&str]) -> Result<Vec<u32>> {
        Ok(words.iter().map(|w| self.word_id(w)).collect())
    }
}

/// One weighted intent rule in an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRule {
    pub intent: IntentType,
    pub pattern: String,
    pub weight: f32,
}

/// One gazetteer term in an artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GazetteerTerm {
    pub term: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(default = "default_term_strength")]
    pub strength: f32,
}

fn default_term_strength() -> f32 {
    DEFAULT_TERM_STRENGTH
}

fn default_logit_scale() -> f32 {
    DEFAULT_LOGIT_SCALE
}

fn default_numeric_parameters() -> bool {
    true
}

/// Serializable lexicon model definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifacts {
    pub version: String,
    /// Multiplier applied to intent rule weights to form logits
    #[serde(default = "default_logit_scale")]
    pub logit_scale: f32,
    pub intent_rules: Vec<IntentRule>,
    pub gazetteer: Vec<GazetteerTerm>,
    /// Tag purely numeric tokens as PARAMETER
    #[serde(default = "default_numeric_parameters")]
    pub numeric_parameters: bool,
}

impl ModelArtifacts {
    /// The compiled-in lexicon
    pub fn builtin() -> Self {
        let intent_rules = BUILTIN_INTENT_PATTERNS
            .iter()
            .map(|(intent, pattern, weight)| IntentRule {
                intent: *intent,
                pattern: (*pattern).to_string(),
                weight: *weight,
            })
            .collect();

        let gazetteer = BUILTIN_GAZETTEER
            .iter()
            .flat_map(|(entity_type, terms, strength)| {
                terms.iter().map(move |term| GazetteerTerm {
                    term: (*term).to_string(),
                    entity_type: *entity_type,
                    strength: *strength,
                })
            })
            .collect();

        Self {
            version: "builtin".to_string(),
            logit_scale: DEFAULT_LOGIT_SCALE,
            intent_rules,
            gazetteer,
            numeric_parameters: true,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let artifacts: Self = serde_json::from_str(json)
            .map_err(|e| NluError::initialization(format!("invalid model artifact: {}", e)))?;
        artifacts.validate()?;
        Ok(artifacts)
    }

    /// Read an artifact file once
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            NluError::initialization(format!("cannot read model artifact {}: {}", path.display(), e))
        })?;
        Self::from_json(&json)
    }

    /// Read an artifact file, retrying transient failures
    pub fn load_with_retry(path: &Path) -> Result<Self> {
        let policy = RetryPolicy::new(
            RetryConfig::new(MODEL_LOAD_ATTEMPTS - 1)
                .with_initial_delay(Duration::from_millis(100))
                .with_max_delay(Duration::from_secs(1)),
        );
        let artifacts = retry_blocking(&policy, "load_model_artifacts", || Self::load(path))?;
        info!(
            path = %path.display(),
            version = %artifacts.version,
            rules = artifacts.intent_rules.len(),
            terms = artifacts.gazetteer.len(),
            "Model artifacts loaded"
        );
        Ok(artifacts)
    }

    fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(NluError::initialization("model artifact version must not be empty"));
        }
        if !self.logit_scale.is_finite() || self.logit_scale <= 0.0 {
            return Err(NluError::initialization("logit_scale must be a positive number"));
        }
        if self.intent_rules.iter().any(|r| r.intent == IntentType::Unknown) {
            return Err(NluError::initialization("intent rules cannot target 'unknown'"));
        }
        Ok(())
    }
}

struct CompiledRule {
    regex: Regex,
    label_index: usize,
    logit: f32,
}

/// Intent model scoring weighted regular expressions over the cleaned text
pub struct LexiconIntentModel {
    rules: Vec<CompiledRule>,
}

impl LexiconIntentModel {
    pub fn from_artifacts(artifacts: &ModelArtifacts) -> Result<Self> {
        let rules = artifacts
            .intent_rules
            .iter()
            .map(|rule| {
                let regex = Regex::new(&rule.pattern).map_err(|e| {
                    NluError::initialization(format!("invalid intent pattern '{}': {}", rule.pattern, e))
                })?;
                let label_index = IntentType::LABELS
                    .iter()
                    .position(|l| *l == rule.intent)
                    .ok_or_else(|| {
                        NluError::initialization(format!("intent '{}' has no logit slot", rule.intent))
                    })?;
                Ok(CompiledRule {
                    regex,
                    label_index,
                    logit: rule.weight * artifacts.logit_scale,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { rules })
    }

    pub fn builtin() -> Result<Self> {
        Self::from_artifacts(&ModelArtifacts::builtin())
    }
}

impl IntentModel for LexiconIntentModel {
    fn logits(&self, encoding: &Encoding) -> Result<Vec<f32>> {
        let text = encoding.joined();
        let mut logits = vec![0.0f32; IntentType::LABELS.len()];

        for rule in &self.rules {
            if rule.regex.is_match(&text) {
                let slot = &mut logits[rule.label_index];
                *slot = slot.max(rule.logit);
            }
        }

        trace!(?logits, "Intent logits computed");
        Ok(logits)
    }
}

/// Token model looking each token up in a gazetteer
pub struct LexiconTokenModel {
    terms: HashMap<String, (EntityType, f32)>,
    numeric_parameters: bool,
}

impl LexiconTokenModel {
    pub fn from_artifacts(artifacts: &ModelArtifacts) -> Self {
        let terms = artifacts
            .gazetteer
            .iter()
            .map(|t| (t.term.to_lowercase(), (t.entity_type, t.strength)))
            .collect();

        Self {
            terms,
            numeric_parameters: artifacts.numeric_parameters,
        }
    }

    pub fn builtin() -> Self {
        Self::from_artifacts(&ModelArtifacts::builtin())
    }

    fn classify_token(&self, token: &str) -> Option<(EntityType, f32)> {
        if let Some(hit) = self.terms.get(token) {
            return Some(*hit);
        }
        if self.numeric_parameters && !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
            return Some((EntityType::Parameter, DEFAULT_TERM_STRENGTH));
        }
        None
    }
}

impl TokenModel for LexiconTokenModel {
    fn logits(&self, encoding: &Encoding) -> Result<Vec<Vec<f32>>> {
        let rows = (0..encoding.input_ids.len())
            .map(|position| {
                let mut row = vec![0.0f32; EntityType::ALL.len()];
                if !encoding.is_padding(position) {
                    if let Some((entity_type, strength)) = encoding
                        .tokens
                        .get(position)
                        .and_then(|token| self.classify_token(token))
                    {
                        row[entity_type.index()] = strength;
                    }
                }
                row
            })
            .collect();
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{softmax, top};
    use crate::preprocessor::TextPreprocessor;
    use nlu_infra::{MemoryCache, MemoryCacheConfig};
    use std::io::Write;
    use std::sync::Arc;

    fn encode(text: &str) -> Arc<Encoding> {
        let preprocessor = TextPreprocessor::new(
            Arc::new(HashingTokenizer::default()),
            Arc::new(MemoryCache::<nlu_core::CacheKey, Arc<Encoding>>::new(
                MemoryCacheConfig::new("test", None, 10),
            )),
            16,
        );
        preprocessor.transform(text).unwrap()
    }

    fn top_intent(model: &LexiconIntentModel, text: &str) -> (IntentType, f64) {
        let probs = softmax(&model.logits(&encode(text)).unwrap());
        let (idx, p) = top(&probs).unwrap();
        (IntentType::LABELS[idx], p)
    }

    #[test]
    fn test_hashing_tokenizer_is_deterministic() {
        let tokenizer = HashingTokenizer::default();
        let a = tokenizer.encode_words(&["zoho", "crm"]).unwrap();
        let b = tokenizer.encode_words(&["zoho", "crm"]).unwrap();

        assert_eq!(a, b);
        assert!(a.iter().all(|&id| id >= FIRST_WORD_ID && id < DEFAULT_VOCAB_SIZE));
    }

    #[test]
    fn test_builtin_intents() {
        let model = LexiconIntentModel::builtin().unwrap();

        let (intent, confidence) = top_intent(&model, "Create a sales agent for Zoho CRM");
        assert_eq!(intent, IntentType::CreateAgent);
        assert!(confidence >= 0.95);

        assert_eq!(top_intent(&model, "please delete the billing agent").0, IntentType::DeleteAgent);
        assert_eq!(top_intent(&model, "what is the status").0, IntentType::QueryStatus);
        assert_eq!(top_intent(&model, "connect salesforce").0, IntentType::ConfigureIntegration);
        assert_eq!(top_intent(&model, "help").0, IntentType::Help);
    }

    #[test]
    fn test_unmatched_text_is_uniform() {
        let model = LexiconIntentModel::builtin().unwrap();
        let (_, confidence) = top_intent(&model, "hello world");
        assert!((confidence - 1.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_gazetteer_rows() {
        let model = LexiconTokenModel::builtin();
        let encoding = encode("sync zoho crm daily 42");
        let rows = model.logits(&encoding).unwrap();

        assert_eq!(rows.len(), 16);
        assert_eq!(rows[0][EntityType::Action.index()], DEFAULT_TERM_STRENGTH);
        assert_eq!(rows[1][EntityType::IntegrationType.index()], DEFAULT_TERM_STRENGTH);
        assert_eq!(rows[2][EntityType::IntegrationType.index()], 2.0);
        assert_eq!(rows[3][EntityType::Schedule.index()], DEFAULT_TERM_STRENGTH);
        assert_eq!(rows[4][EntityType::Parameter.index()], DEFAULT_TERM_STRENGTH);
        assert!(rows[10].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_artifact_round_trip_through_file() {
        let artifacts = ModelArtifacts {
            version: "2024-test".to_string(),
            logit_scale: 10.0,
            intent_rules: vec![IntentRule {
                intent: IntentType::Help,
                pattern: r"\bassist\b".to_string(),
                weight: 1.0,
            }],
            gazetteer: vec![GazetteerTerm {
                term: "Pipedrive".to_string(),
                entity_type: EntityType::IntegrationType,
                strength: 9.0,
            }],
            numeric_parameters: false,
        };

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(serde_json::to_string(&artifacts).unwrap().as_bytes())
            .unwrap();

        let loaded = ModelArtifacts::load_with_retry(file.path()).unwrap();
        assert_eq!(loaded, artifacts);

        let model = LexiconIntentModel::from_artifacts(&loaded).unwrap();
        assert_eq!(top_intent(&model, "can you assist").0, IntentType::Help);

        let tokens = LexiconTokenModel::from_artifacts(&loaded);
        assert_eq!(
            tokens.classify_token("pipedrive"),
            Some((EntityType::IntegrationType, 9.0))
        );
        assert_eq!(tokens.classify_token("42"), None);
    }

    #[test]
    fn test_invalid_artifacts_are_initialization_errors() {
        let err = ModelArtifacts::from_json("{not json").unwrap_err();
        assert_eq!(err.code(), "INITIALIZATION_ERROR");

        let mut artifacts = ModelArtifacts::builtin();
        artifacts.intent_rules[0].pattern = "(unclosed".to_string();
        assert!(LexiconIntentModel::from_artifacts(&artifacts).is_err());
    }

    #[test]
    fn test_missing_file_fails_after_retries() {
        let err = ModelArtifacts::load_with_retry(Path::new("/nonexistent/model.json")).unwrap_err();
        assert_eq!(err.code(), "INITIALIZATION_ERROR");
    }
}
