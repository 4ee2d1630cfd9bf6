//! Entity extraction.
//!
//! Every real token position whose top entity class clears the confidence
//! threshold becomes an [`Entity`]. Padding is never considered.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{NluError, Result};
use crate::labels::EntityType;
use crate::model::{softmax, top, TokenModel};
use crate::preprocessor::{Encoding, TextPreprocessor};

/// Upper bound on items sent to the token model per call
pub const MAX_EXTRACT_BATCH: usize = 32;

/// Typed span found in the input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub confidence: f64,
    /// Token index in the encoded sequence
    pub position: usize,
    /// Substring of the original input the token came from
    pub text: String,
    /// Byte offsets of `text` in the original input
    pub start: usize,
    pub end: usize,
}

/// Running counters, reset by [`EntityExtractor::cleanup`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractorStats {
    pub processed_texts: u64,
    pub successful_extractions: u64,
}

pub struct EntityExtractor {
    model: Arc<dyn TokenModel>,
    preprocessor: Arc<TextPreprocessor>,
    threshold: f64,
    batch_size: usize,
    stats: Mutex<ExtractorStats>,
}

impl EntityExtractor {
    pub fn new(
        model: Arc<dyn TokenModel>,
        preprocessor: Arc<TextPreprocessor>,
        threshold: f64,
        batch_size: usize,
    ) -> Self {
        Self {
            model,
            preprocessor,
            threshold,
            batch_size: batch_size.clamp(1, MAX_EXTRACT_BATCH),
            stats: Mutex::new(ExtractorStats::default()),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Entities of one text, ordered by position
    pub fn extract(&self, text: &str) -> Result<Vec<Entity>> {
        if text.trim().is_empty() {
            return Err(NluError::invalid_input("text must not be empty"));
        }

        let encoding = self.preprocessor.transform(text)?;
        let rows = self.model.logits(&encoding)?;
        let entities = self.decode(text, &encoding, &rows)?;

        self.record(1, entities.len());
        debug!(entities = entities.len(), "Entities extracted");
        Ok(entities)
    }

    /// Entities of several texts, outer order aligned with the input
    pub fn extract_batch(&self, texts: &[&str]) -> Result<Vec<Vec<Entity>>> {
        if texts.is_empty() {
            return Err(NluError::invalid_input("batch must contain at least one text"));
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(NluError::invalid_input("text must not be empty"));
        }

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            let batch = self.preprocessor.batch_transform(chunk)?;
            let outputs = self.model.logits_batch(&batch.encodings)?;

            if outputs.len() != chunk.len() {
                return Err(NluError::inference(format!(
                    "token model returned {} outputs for {} inputs",
                    outputs.len(),
                    chunk.len()
                )));
            }

            for ((text, encoding), rows) in chunk.iter().zip(&batch.encodings).zip(&outputs) {
                results.push(self.decode(text, encoding, rows)?);
            }
        }

        let found: usize = results.iter().map(Vec::len).sum();
        self.record(texts.len() as u64, found);
        debug!(batch_size = texts.len(), entities = found, "Entity batch extracted");
        Ok(results)
    }

    fn decode(&self, text: &str, encoding: &Encoding, rows: &[Vec<f32>]) -> Result<Vec<Entity>> {
        if rows.len() != encoding.input_ids.len() {
            return Err(NluError::inference(format!(
                "token model returned {} rows for {} positions",
                rows.len(),
                encoding.input_ids.len()
            )));
        }

        let mut entities = Vec::new();
        for (position, row) in rows.iter().enumerate() {
            if encoding.is_padding(position) {
                continue;
            }
            if row.len() != EntityType::ALL.len() {
                return Err(NluError::inference(format!(
                    "token model returned {} classes at position {}, expected {}",
                    row.len(),
                    position,
                    EntityType::ALL.len()
                )));
            }

            let Some((class, confidence)) = top(&softmax(row)) else {
                continue;
            };
            if confidence.is_nan() || confidence < self.threshold {
                continue;
            }

            let Some(span) = encoding.offsets.get(position) else {
                continue;
            };
            entities.push(Entity {
                entity_type: EntityType::ALL[class],
                confidence,
                position,
                text: text.get(span.clone()).unwrap_or_default().to_string(),
                start: span.start,
                end: span.end,
            });
        }
        Ok(entities)
    }

    fn record(&self, texts: u64, entities: usize) {
        let mut stats = self.stats.lock();
        stats.processed_texts += texts;
        stats.successful_extractions += entities as u64;
    }

    pub fn stats(&self) -> ExtractorStats {
        *self.stats.lock()
    }

    /// Drop cached encodings and reset counters. Safe to call repeatedly.
    pub fn cleanup(&self) {
        self.preprocessor.clear_cache();
        *self.stats.lock() = ExtractorStats::default();
        info!("Entity extractor resources released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::{HashingTokenizer, LexiconTokenModel};
    use nlu_core::CacheKey;
    use nlu_infra::{MemoryCache, MemoryCacheConfig};

    fn preprocessor() -> Arc<TextPreprocessor> {
        Arc::new(TextPreprocessor::new(
            Arc::new(HashingTokenizer::default()),
            Arc::new(MemoryCache::<CacheKey, Arc<Encoding>>::new(
                MemoryCacheConfig::new("encodings", None, 100),
            )),
            16,
        ))
    }

    fn extractor(batch_size: usize) -> EntityExtractor {
        EntityExtractor::new(Arc::new(LexiconTokenModel::builtin()), preprocessor(), 0.95, batch_size)
    }

    #[test]
    fn test_extract_zoho_request() {
        let text = "Create a Sales agent for Zoho CRM";
        let entities = extractor(32).extract(text).unwrap();

        assert_eq!(entities.len(), 2);
        assert_eq!(entities[0].entity_type, EntityType::AgentName);
        assert_eq!(entities[0].text, "Sales");
        assert_eq!(entities[0].position, 2);
        assert_eq!(&text[entities[0].start..entities[0].end], "Sales");
        assert_eq!(entities[1].entity_type, EntityType::IntegrationType);
        assert_eq!(entities[1].text, "Zoho");
        assert!(entities.iter().all(|e| e.confidence >= 0.95));
    }

    #[test]
    fn test_weak_terms_are_below_threshold() {
        let entities = extractor(32).extract("crm").unwrap();
        assert!(entities.is_empty());
    }

    #[test]
    fn test_batch_aligns_with_input() {
        let extractor = extractor(2);
        let texts = ["notify sales daily", "hello", "sync hubspot when 5 leads arrive"];

        let batch = extractor.extract_batch(&texts).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(batch[0].len(), 3);
        assert!(batch[1].is_empty());

        let types: Vec<_> = batch[2].iter().map(|e| e.entity_type).collect();
        assert_eq!(
            types,
            vec![
                EntityType::Action,
                EntityType::IntegrationType,
                EntityType::Condition,
                EntityType::Parameter
            ]
        );

        for (text, entities) in texts.iter().zip(&batch) {
            assert_eq!(&extractor.extract(text).unwrap(), entities);
        }
    }

    #[test]
    fn test_batch_size_is_capped() {
        assert_eq!(extractor(128).batch_size(), MAX_EXTRACT_BATCH);
        assert_eq!(extractor(0).batch_size(), 1);
    }

    #[test]
    fn test_stats_and_cleanup() {
        let extractor = extractor(32);
        extractor.extract("notify sales").unwrap();
        extractor.extract_batch(&["sync zoho", "hello"]).unwrap();

        assert_eq!(
            extractor.stats(),
            ExtractorStats {
                processed_texts: 3,
                successful_extractions: 4,
            }
        );

        extractor.cleanup();
        extractor.cleanup();
        assert_eq!(extractor.stats(), ExtractorStats::default());
        assert_eq!(extractor.preprocessor.cache_len(), 0);
    }

    #[test]
    fn test_blank_text_is_rejected() {
        assert_eq!(extractor(32).extract("").unwrap_err().code(), "INVALID_INPUT");
        assert!(extractor(32).extract_batch(&[]).is_err());
    }

    #[test]
    fn test_row_count_mismatch_is_inference_error() {
        struct Truncated;
        impl TokenModel for Truncated {
            fn logits(&self, _: &Encoding) -> Result<Vec<Vec<f32>>> {
                Ok(vec![vec![0.0; 6]])
            }
        }

        let extractor = EntityExtractor::new(Arc::new(Truncated), preprocessor(), 0.95, 32);
        assert_eq!(extractor.extract("notify sales").unwrap_err().code(), "INFERENCE_ERROR");
    }

    #[test]
    fn test_entity_serializes_type_field() {
        let entity = Entity {
            entity_type: EntityType::Schedule,
            confidence: 0.99,
            position: 0,
            text: "daily".to_string(),
            start: 0,
            end: 5,
        };
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["type"], "SCHEDULE");
    }
}
