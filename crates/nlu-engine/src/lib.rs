//! # NLU Engine
//!
//! Natural language understanding for agent management requests.
//!
//! Each request is classified into an intent and scanned for typed entities
//! concurrently, then the two outputs are merged and checked against the
//! entities each intent requires.
//!
//! ## Features
//!
//! - **Intent Classification**: Threshold-gated labels with a cached, bit-stable result per text
//! - **Entity Extraction**: Per-token typed spans with offsets into the original input
//! - **Validation**: Required-entity rules and an overall confidence score
//! - **Admission Control**: A bounded number of requests reach the models at once
//!
//! ## Example
//!
//! ```rust,no_run
//! use nlu_core::NlpConfig;
//! use nlu_engine::LanguageProcessor;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let processor = LanguageProcessor::from_config(&NlpConfig::default())?;
//!
//!     let result = processor.process_text("create a sales agent for zoho crm").await?;
//!     println!("Intent: {}, Confidence: {}", result.intent.intent, result.overall_confidence);
//!
//!     Ok(())
//! }
//! ```

pub mod entity;
pub mod error;
pub mod intent;
pub mod labels;
pub mod lexicon;
pub mod metrics;
pub mod model;
pub mod preprocessor;
pub mod processor;
pub mod validation;

use async_trait::async_trait;

pub use entity::{Entity, EntityExtractor, ExtractorStats};
pub use error::{NluError, RequestFailure, Result};
pub use intent::{IntentClassifier, IntentDistribution, IntentResult, IntentStatus};
pub use labels::{EntityType, IntentType};
pub use lexicon::{HashingTokenizer, LexiconIntentModel, LexiconTokenModel, ModelArtifacts};
pub use metrics::{MetricsRecorder, PerformanceMetrics};
pub use model::{IntentModel, TokenModel, Tokenizer};
pub use preprocessor::{BatchEncoding, Encoding, TextPreprocessor};
pub use processor::{
    BatchItem, BatchOutcome, BatchRequest, ErrorRecord, HealthReport, HealthStatus,
    LanguageProcessor, ProcessOptions, ProcessRequest, RecordStatus, ValidatedResult,
};
pub use validation::{validate_results, MergedOutput, ValidationDetails};

/// Request-level surface of the engine, as consumed by transports.
#[async_trait]
pub trait NluEngine: Send + Sync {
    /// Understand one text.
    ///
    /// # Errors
    ///
    /// The failure carries the request id and a stable error code.
    async fn process(&self, request: ProcessRequest) -> std::result::Result<ValidatedResult, RequestFailure>;

    /// Understand several texts; per-item failures are reported inline.
    async fn process_batch(&self, request: BatchRequest) -> std::result::Result<BatchOutcome, RequestFailure>;

    async fn health(&self) -> HealthReport;

    /// Prometheus text exposition of the engine's state
    fn render_metrics(&self) -> String;

    fn model_version(&self) -> &str;

    /// Stop admitting work. Idempotent.
    fn shutdown(&self);
}

#[async_trait]
impl NluEngine for LanguageProcessor {
    async fn process(&self, request: ProcessRequest) -> std::result::Result<ValidatedResult, RequestFailure> {
        self.process_text_with(&request.text, &request.options, request.request_id)
            .await
    }

    async fn process_batch(&self, request: BatchRequest) -> std::result::Result<BatchOutcome, RequestFailure> {
        self.process_batch_with(&request.texts, &request.options, request.request_id)
            .await
    }

    async fn health(&self) -> HealthReport {
        LanguageProcessor::health(self).await
    }

    fn render_metrics(&self) -> String {
        LanguageProcessor::render_metrics(self)
    }

    fn model_version(&self) -> &str {
        self.version()
    }

    fn shutdown(&self) {
        LanguageProcessor::shutdown(self)
    }
}
