//! Request orchestration.
//!
//! A request is validated, admitted through the concurrency bulkhead, fanned
//! out to the intent classifier and the entity extractor on the blocking
//! pool, and the two outputs are merged and checked against the business
//! rules. Every request, successful or not, is recorded exactly once.

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use nlu_core::{CacheKey, NlpConfig, RequestId};
use nlu_infra::{Bulkhead, BulkheadConfig, BulkheadSnapshot, Exposition, MemoryCache, MemoryCacheConfig};

use crate::entity::{Entity, EntityExtractor, ExtractorStats};
use crate::error::{NluError, RequestFailure, Result};
use crate::intent::{IntentClassifier, IntentDistribution, IntentResult};
use crate::lexicon::{HashingTokenizer, LexiconIntentModel, LexiconTokenModel, ModelArtifacts};
use crate::metrics::{MetricsRecorder, PerformanceMetrics};
use crate::model::{IntentModel, TokenModel, Tokenizer};
use crate::preprocessor::{Encoding, TextPreprocessor};
use crate::validation::{validate_results, ValidationDetails};

/// Requests slower than this are logged as over budget
pub const LATENCY_BUDGET: Duration = Duration::from_millis(200);

const HEALTH_PROBE_TEXT: &str = "test";

/// Prefix of every metric the processor renders
pub const METRICS_PREFIX: &str = "nlp";

/// Per-request switches
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessOptions {
    /// Attach the full intent probability distribution to the result
    #[serde(default)]
    pub include_distribution: bool,
}

/// Single-text request as received at the transport boundary
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProcessRequest {
    pub text: String,
    #[serde(default)]
    pub options: ProcessOptions,
    #[serde(default)]
    pub request_id: Option<RequestId>,
}

impl ProcessRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            options: ProcessOptions::default(),
            request_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BatchRequest {
    pub texts: Vec<String>,
    #[serde(default)]
    pub options: ProcessOptions,
    /// Batch id; item ids are derived from it
    #[serde(default)]
    pub request_id: Option<RequestId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Success,
    Error,
}

/// Merged, rule-checked understanding of one text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidatedResult {
    pub request_id: RequestId,
    pub status: RecordStatus,
    pub intent: IntentResult,
    pub entities: Vec<Entity>,
    pub overall_confidence: f64,
    pub validation_details: ValidationDetails,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distribution: Option<IntentDistribution>,
    /// Seconds from receipt to merge
    pub processing_time: f64,
}

/// Inline failure of one batch item
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorRecord {
    pub status: RecordStatus,
    pub error_code: &'static str,
    pub error: String,
    pub request_id: RequestId,
    pub original_text: String,
}

impl ErrorRecord {
    fn new(failure: RequestFailure, original_text: &str) -> Self {
        Self {
            status: RecordStatus::Error,
            error_code: failure.code(),
            error: failure.error.to_string(),
            request_id: failure.request_id,
            original_text: original_text.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchItem {
    Success(ValidatedResult),
    Error(ErrorRecord),
}

impl BatchItem {
    pub fn is_success(&self) -> bool {
        matches!(self, BatchItem::Success(_))
    }

    pub fn as_success(&self) -> Option<&ValidatedResult> {
        match self {
            BatchItem::Success(result) => Some(result),
            BatchItem::Error(_) => None,
        }
    }

    pub fn as_error(&self) -> Option<&ErrorRecord> {
        match self {
            BatchItem::Success(_) => None,
            BatchItem::Error(record) => Some(record),
        }
    }
}

/// Per-item outcomes of a batch, aligned with the input
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub batch_id: RequestId,
    pub items: Vec<BatchItem>,
    pub success_rate: f64,
    pub processing_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub processor_status: &'static str,
    pub metrics: PerformanceMetrics,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Orchestrates preprocessing, inference and validation for every request
pub struct LanguageProcessor {
    classifier: Arc<IntentClassifier>,
    extractor: Arc<EntityExtractor>,
    preprocessor: Arc<TextPreprocessor>,
    admission: Bulkhead,
    metrics: MetricsRecorder,
    threshold: f64,
    max_text_length: usize,
    max_batch_size: usize,
    model_version: String,
    shut_down: AtomicBool,
}

impl LanguageProcessor {
    /// Build the processor with the lexicon backend, loading the model
    /// artifact from `model_path` when one is configured.
    pub fn from_config(config: &NlpConfig) -> Result<Self> {
        config.validate()?;

        let artifacts = match &config.model_path {
            Some(path) => ModelArtifacts::load_with_retry(path)?,
            None => ModelArtifacts::builtin(),
        };
        let intent_model = Arc::new(LexiconIntentModel::from_artifacts(&artifacts)?);
        let token_model = Arc::new(LexiconTokenModel::from_artifacts(&artifacts));

        info!(artifacts = %artifacts.version, "Lexicon models ready");
        Self::from_parts(
            config,
            Arc::new(HashingTokenizer::default()),
            intent_model,
            token_model,
        )
    }

    /// Build the processor around caller-supplied model runtimes
    pub fn from_parts(
        config: &NlpConfig,
        tokenizer: Arc<dyn Tokenizer>,
        intent_model: Arc<dyn IntentModel>,
        token_model: Arc<dyn TokenModel>,
    ) -> Result<Self> {
        config.validate()?;

        let encoding_cache = MemoryCache::<CacheKey, Arc<Encoding>>::new(MemoryCacheConfig::new(
            "encodings",
            Some(config.cache_ttl()),
            config.cache_capacity,
        ));
        let intent_cache = MemoryCache::<CacheKey, IntentResult>::new(MemoryCacheConfig::new(
            "intents",
            Some(config.cache_ttl()),
            config.cache_capacity,
        ));

        let preprocessor = Arc::new(TextPreprocessor::new(
            tokenizer,
            Arc::new(encoding_cache),
            config.max_sequence_length,
        ));
        let classifier = Arc::new(IntentClassifier::new(
            intent_model,
            Arc::clone(&preprocessor),
            Arc::new(intent_cache),
            config.confidence_threshold,
        ));
        let extractor = Arc::new(EntityExtractor::new(
            token_model,
            Arc::clone(&preprocessor),
            config.confidence_threshold,
            config.batch_size,
        ));

        let mut admission = BulkheadConfig::new("language_processor", config.max_concurrency);
        if let Some(wait) = config.admission_timeout() {
            admission = admission.with_max_wait(wait);
        }
        if let Some(depth) = config.max_queue_depth {
            admission = admission.with_max_queue_depth(depth);
        }

        info!(
            max_concurrency = config.max_concurrency,
            max_sequence_length = config.max_sequence_length,
            batch_size = config.batch_size,
            confidence_threshold = config.confidence_threshold,
            model_version = %config.model_version,
            "Language processor initialized"
        );

        Ok(Self {
            classifier,
            extractor,
            preprocessor,
            admission: Bulkhead::new(admission),
            metrics: MetricsRecorder::new(),
            threshold: config.confidence_threshold,
            max_text_length: config.max_sequence_length,
            max_batch_size: config.batch_size,
            model_version: config.model_version.clone(),
            shut_down: AtomicBool::new(false),
        })
    }

    pub async fn process_text(&self, text: &str) -> std::result::Result<ValidatedResult, RequestFailure> {
        self.process_text_with(text, &ProcessOptions::default(), None).await
    }

    /// Understand one text.
    ///
    /// Suspends while all concurrency slots are taken. Fails without calling
    /// any model when the text is blank or too long.
    #[instrument(skip(self, text, options, request_id), fields(request_id, text_len = text.len()))]
    pub async fn process_text_with(
        &self,
        text: &str,
        options: &ProcessOptions,
        request_id: Option<RequestId>,
    ) -> std::result::Result<ValidatedResult, RequestFailure> {
        let request_id = request_id.unwrap_or_else(RequestId::generate);
        tracing::Span::current().record("request_id", request_id.as_str());

        let started = Instant::now();
        let outcome = self.run(text, options, &request_id).await;
        let elapsed = started.elapsed();
        let latency_ms = elapsed.as_secs_f64() * 1000.0;

        match outcome {
            Ok(mut result) => {
                result.processing_time = elapsed.as_secs_f64();
                self.metrics.record(elapsed, None);

                if elapsed > LATENCY_BUDGET {
                    warn!(request_id = %request_id, latency_ms, "Request exceeded latency budget");
                }
                info!(
                    request_id = %request_id,
                    intent = %result.intent.intent,
                    entities = result.entities.len(),
                    overall_confidence = result.overall_confidence,
                    latency_ms,
                    "Request processed"
                );
                Ok(result)
            }
            Err(err) => {
                self.metrics.record(elapsed, Some(&err));
                if err.is_client_error() {
                    warn!(request_id = %request_id, code = err.code(), error = %err, "Request rejected");
                } else {
                    error!(request_id = %request_id, code = err.code(), error = %err, latency_ms, "Request failed");
                }
                Err(RequestFailure::new(request_id, err))
            }
        }
    }

    async fn run(
        &self,
        text: &str,
        options: &ProcessOptions,
        request_id: &RequestId,
    ) -> Result<ValidatedResult> {
        self.validate_text(text)?;

        // Both blocking tasks hold a clone, so the slot stays taken until
        // the slower one has finished even when the other fails first.
        let permit = Arc::new(self.admission.acquire().await?);
        let text: Arc<str> = Arc::from(text);

        let intent_task = {
            let classifier = Arc::clone(&self.classifier);
            let text = Arc::clone(&text);
            let permit = Arc::clone(&permit);
            let include_distribution = options.include_distribution;
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                let intent = classifier.classify(&text)?;
                let distribution = if include_distribution {
                    Some(classifier.predict_distribution(&text)?)
                } else {
                    None
                };
                Ok::<_, NluError>((intent, distribution))
            })
        };

        let entity_task = {
            let extractor = Arc::clone(&self.extractor);
            let text = Arc::clone(&text);
            let permit = Arc::clone(&permit);
            tokio::task::spawn_blocking(move || {
                let _permit = permit;
                extractor.extract(&text)
            })
        };
        drop(permit);

        let ((intent, distribution), entities) =
            tokio::try_join!(joined(intent_task), joined(entity_task))?;

        let merged = validate_results(&intent, &entities, self.threshold)?;
        debug!(
            request_id = %request_id,
            missing = merged.details.missing_entities.len(),
            "Results merged"
        );

        Ok(ValidatedResult {
            request_id: request_id.clone(),
            status: RecordStatus::Success,
            intent,
            entities,
            overall_confidence: merged.overall_confidence,
            validation_details: merged.details,
            distribution,
            processing_time: 0.0,
        })
    }

    fn validate_text(&self, text: &str) -> Result<()> {
        if text.trim().is_empty() {
            return Err(NluError::invalid_input("text must not be empty"));
        }
        let length = text.chars().count();
        if length > self.max_text_length {
            return Err(NluError::invalid_input(format!(
                "text is {} characters, maximum is {}",
                length, self.max_text_length
            )));
        }
        Ok(())
    }

    pub async fn process_batch(&self, texts: &[String]) -> std::result::Result<BatchOutcome, RequestFailure> {
        self.process_batch_with(texts, &ProcessOptions::default(), None).await
    }

    /// Understand several texts concurrently.
    ///
    /// An empty or oversized batch fails as a whole before any item runs.
    /// Otherwise every item yields either a result or an inline error record
    /// at its own position.
    #[instrument(skip(self, texts, options, batch_id), fields(batch_id, batch_size = texts.len()))]
    pub async fn process_batch_with(
        &self,
        texts: &[String],
        options: &ProcessOptions,
        batch_id: Option<RequestId>,
    ) -> std::result::Result<BatchOutcome, RequestFailure> {
        let batch_id = batch_id.unwrap_or_else(RequestId::generate_batch);
        tracing::Span::current().record("batch_id", batch_id.as_str());
        let started = Instant::now();

        if let Err(err) = self.validate_batch(texts) {
            self.metrics.record(started.elapsed(), Some(&err));
            warn!(batch_id = %batch_id, code = err.code(), error = %err, "Batch rejected");
            return Err(RequestFailure::new(batch_id, err));
        }

        let items = join_all(texts.iter().enumerate().map(|(index, text)| {
            let item_id = batch_id.item(index);
            async move {
                match self.process_text_with(text, options, Some(item_id)).await {
                    Ok(result) => BatchItem::Success(result),
                    Err(failure) => BatchItem::Error(ErrorRecord::new(failure, text)),
                }
            }
        }))
        .await;

        let successes = items.iter().filter(|item| item.is_success()).count();
        let success_rate = successes as f64 / texts.len() as f64;
        let elapsed = started.elapsed();

        info!(
            batch_id = %batch_id,
            batch_size = texts.len(),
            success_rate,
            latency_ms = elapsed.as_secs_f64() * 1000.0,
            "Batch processed"
        );

        Ok(BatchOutcome {
            batch_id,
            items,
            success_rate,
            processing_time: elapsed.as_secs_f64(),
        })
    }

    fn validate_batch(&self, texts: &[String]) -> Result<()> {
        if texts.is_empty() {
            return Err(NluError::invalid_input("batch must contain at least one text"));
        }
        if texts.len() > self.max_batch_size {
            return Err(NluError::invalid_input(format!(
                "batch has {} texts, maximum is {}",
                texts.len(),
                self.max_batch_size
            )));
        }
        Ok(())
    }

    /// Probe the pipeline with a fixed text.
    ///
    /// The probe is recorded like any other request.
    pub async fn health(&self) -> HealthReport {
        let probe = self.process_text(HEALTH_PROBE_TEXT).await;
        let (status, processor_status, error) = match probe {
            Ok(_) => (HealthStatus::Healthy, "operational", None),
            Err(failure) => (HealthStatus::Unhealthy, "failing", Some(failure.error.to_string())),
        };

        HealthReport {
            status,
            processor_status,
            metrics: self.metrics.snapshot(),
            version: self.model_version.clone(),
            error,
        }
    }

    pub fn metrics_snapshot(&self) -> PerformanceMetrics {
        self.metrics.snapshot()
    }

    pub fn admission_snapshot(&self) -> BulkheadSnapshot {
        self.admission.snapshot()
    }

    pub fn extractor_stats(&self) -> ExtractorStats {
        self.extractor.stats()
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn version(&self) -> &str {
        &self.model_version
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Prometheus text for the processor's own state
    pub fn render_metrics(&self) -> String {
        let admission = self.admission.snapshot();
        let stats = self.extractor.stats();

        let mut exposition = Exposition::new(METRICS_PREFIX);
        self.metrics.render_into(&mut exposition);
        exposition
            .gauge(
                "admission_in_flight",
                "Requests holding a concurrency slot",
                admission.in_flight as f64,
            )
            .gauge(
                "admission_waiting",
                "Requests waiting for a concurrency slot",
                admission.waiting as f64,
            )
            .gauge(
                "admission_capacity",
                "Concurrency slots",
                admission.max_concurrent as f64,
            )
            .gauge(
                "intent_cache_entries",
                "Cached intent results",
                self.classifier.cache_len() as f64,
            )
            .gauge(
                "encoding_cache_entries",
                "Cached text encodings",
                self.preprocessor.cache_len() as f64,
            )
            .counter(
                "extractor_processed_texts_total",
                "Texts run through the entity extractor",
                stats.processed_texts,
            )
            .counter(
                "extractor_entities_total",
                "Entities produced by the entity extractor",
                stats.successful_extractions,
            );
        exposition.finish()
    }

    /// Stop admitting requests and release caches and counters.
    ///
    /// Requests already holding a slot finish normally. Calling this more
    /// than once has no further effect.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            debug!("Language processor already shut down");
            return;
        }

        self.admission.close();
        self.extractor.cleanup();
        self.classifier.clear_cache();
        self.preprocessor.clear_cache();
        self.metrics.reset();
        info!("Language processor shut down");
    }
}

async fn joined<T>(handle: JoinHandle<Result<T>>) -> Result<T> {
    match handle.await {
        Ok(result) => result,
        Err(err) => Err(NluError::internal(format!("inference task failed: {}", err))),
    }
}
