//! Intent classification.
//!
//! Runs the intent model over the preprocessed encoding, applies softmax,
//! and gates the top label on the confidence threshold. Results are cached
//! per input text.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

use nlu_core::{hash_text, Cache, CacheKey};

use crate::error::{NluError, Result};
use crate::labels::IntentType;
use crate::model::{softmax, top, IntentModel};
use crate::preprocessor::{Encoding, TextPreprocessor};

/// Items sent to the model per call in batch mode
pub const CLASSIFY_CHUNK_SIZE: usize = 32;

/// Probability per predictable intent label
pub type IntentDistribution = BTreeMap<IntentType, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Success,
    LowConfidence,
}

/// Classified intent with its confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: IntentType,
    /// Probability of the top label, kept even when the label is gated to unknown
    pub confidence: f64,
    pub status: IntentStatus,
}

impl IntentResult {
    pub fn is_confident(&self) -> bool {
        self.status == IntentStatus::Success
    }
}

/// Threshold-gated classifier over an [`IntentModel`]
pub struct IntentClassifier {
    model: Arc<dyn IntentModel>,
    preprocessor: Arc<TextPreprocessor>,
    cache: Arc<dyn Cache<CacheKey, IntentResult>>,
    threshold: f64,
}

impl IntentClassifier {
    pub fn new(
        model: Arc<dyn IntentModel>,
        preprocessor: Arc<TextPreprocessor>,
        cache: Arc<dyn Cache<CacheKey, IntentResult>>,
        threshold: f64,
    ) -> Self {
        Self {
            model,
            preprocessor,
            cache,
            threshold,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Classify one text
    pub fn classify(&self, text: &str) -> Result<IntentResult> {
        ensure_text(text)?;

        let key = hash_text(text);
        if let Some(cached) = self.cache.get(&key) {
            trace!(intent = %cached.intent, "Intent cache hit");
            return Ok(cached);
        }

        let encoding = self.preprocessor.transform(text)?;
        let probabilities = self.probabilities(&encoding)?;
        let result = self.gate(&probabilities)?;

        debug!(
            intent = %result.intent,
            confidence = result.confidence,
            "Intent classified"
        );
        self.cache.insert(key, result.clone());
        Ok(result)
    }

    /// Classify several texts; results align with the input.
    ///
    /// Cached items are answered from the cache, the rest go to the model in
    /// sub-batches. Each item produces the same result as [`Self::classify`].
    pub fn classify_batch(&self, texts: &[&str]) -> Result<Vec<IntentResult>> {
        if texts.is_empty() {
            return Err(NluError::invalid_input("batch must contain at least one text"));
        }
        for text in texts {
            ensure_text(text)?;
        }

        let mut results: Vec<Option<IntentResult>> =
            texts.iter().map(|t| self.cache.get(&hash_text(t))).collect();
        let misses: Vec<usize> = results
            .iter()
            .enumerate()
            .filter_map(|(i, r)| r.is_none().then_some(i))
            .collect();

        for chunk in misses.chunks(CLASSIFY_CHUNK_SIZE) {
            let chunk_texts: Vec<&str> = chunk.iter().map(|&i| texts[i]).collect();
            let batch = self.preprocessor.batch_transform(&chunk_texts)?;
            let logits = self.model.logits_batch(&batch.encodings)?;

            if logits.len() != chunk.len() {
                return Err(NluError::inference(format!(
                    "intent model returned {} outputs for {} inputs",
                    logits.len(),
                    chunk.len()
                )));
            }

            for (&index, row) in chunk.iter().zip(logits) {
                let result = self.gate(&checked_softmax(&row)?)?;
                self.cache.insert(hash_text(texts[index]), result.clone());
                results[index] = Some(result);
            }
        }

        debug!(
            batch_size = texts.len(),
            cache_hits = texts.len() - misses.len(),
            "Intent batch classified"
        );

        results
            .into_iter()
            .map(|r| r.ok_or_else(|| NluError::internal("intent batch result missing")))
            .collect()
    }

    /// Full probability distribution over the predictable labels
    pub fn predict_distribution(&self, text: &str) -> Result<IntentDistribution> {
        ensure_text(text)?;

        let encoding = self.preprocessor.transform(text)?;
        let probabilities = self.probabilities(&encoding)?;

        Ok(IntentType::LABELS
            .iter()
            .copied()
            .zip(probabilities)
            .collect())
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    fn probabilities(&self, encoding: &Encoding) -> Result<Vec<f64>> {
        let logits = self.model.logits(encoding)?;
        checked_softmax(&logits)
    }

    fn gate(&self, probabilities: &[f64]) -> Result<IntentResult> {
        let (index, confidence) =
            top(probabilities).ok_or_else(|| NluError::inference("intent model returned no logits"))?;

        // NaN confidence is passed through for merge validation to reject
        if confidence < self.threshold {
            return Ok(IntentResult {
                intent: IntentType::Unknown,
                confidence,
                status: IntentStatus::LowConfidence,
            });
        }

        Ok(IntentResult {
            intent: IntentType::LABELS[index],
            confidence,
            status: IntentStatus::Success,
        })
    }
}

fn ensure_text(text: &str) -> Result<()> {
    if text.trim().is_empty() {
        return Err(NluError::invalid_input("text must not be empty"));
    }
    Ok(())
}

fn checked_softmax(logits: &[f32]) -> Result<Vec<f64>> {
    if logits.len() != IntentType::LABELS.len() {
        return Err(NluError::inference(format!(
            "intent model returned {} logits, expected {}",
            logits.len(),
            IntentType::LABELS.len()
        )));
    }
    Ok(softmax(logits))
}
