use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Correlation id carried by every request, result and error record.
///
/// Callers may supply their own id; otherwise one is generated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generate a fresh id for a single-text request.
    pub fn generate() -> Self {
        Self(format!("req_{}", Uuid::new_v4().simple()))
    }

    /// Generate a fresh id for a batch.
    pub fn generate_batch() -> Self {
        Self(format!("batch_{}", Uuid::new_v4().simple()))
    }

    /// Id of the item at `index` inside the batch identified by `self`.
    pub fn item(&self, index: usize) -> Self {
        Self(format!("{}-{}", self.0, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}
