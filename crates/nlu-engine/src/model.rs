//! Model runtime seams.
//!
//! The engine talks to its tokenizer and models only through these traits.
//! Implementations must be safe for concurrent read-only use; they are
//! called from the blocking thread pool.

use std::sync::Arc;

use crate::error::Result;
use crate::preprocessor::Encoding;

/// Id used for padding positions
pub const PAD_TOKEN_ID: u32 = 0;

/// Maps cleaned words to vocabulary ids, one id per word
pub trait Tokenizer: Send + Sync {
    fn encode_words(&self, words: &[&str]) -> Result<Vec<u32>>;
}

/// Sequence classifier producing one logit per intent label
pub trait IntentModel: Send + Sync {
    /// Logits in [`IntentType::LABELS`](crate::IntentType::LABELS) order
    fn logits(&self, encoding: &Encoding) -> Result<Vec<f32>>;

    fn logits_batch(&self, encodings: &[Arc<Encoding>]) -> Result<Vec<Vec<f32>>> {
        encodings.iter().map(|e| self.logits(e)).collect()
    }
}

/// Token classifier producing a logit row per sequence position
pub trait TokenModel: Send + Sync {
    /// One row per position (padding included), each in
    /// [`EntityType::ALL`](crate::EntityType::ALL) order
    fn logits(&self, encoding: &Encoding) -> Result<Vec<Vec<f32>>>;

    fn logits_batch(&self, encodings: &[Arc<Encoding>]) -> Result<Vec<Vec<Vec<f32>>>> {
        encodings.iter().map(|e| self.logits(e)).collect()
    }
}

/// Numerically stable softmax.
///
/// Non-finite logits are not filtered; they surface as non-finite
/// probabilities so later validation can reject them.
pub fn softmax(logits: &[f32]) -> Vec<f64> {
    let max = logits
        .iter()
        .map(|&x| f64::from(x))
        .fold(f64::NEG_INFINITY, f64::max);

    let exps: Vec<f64> = logits.iter().map(|&x| (f64::from(x) - max).exp()).collect();
    let sum: f64 = exps.iter().sum();

    exps.into_iter().map(|e| e / sum).collect()
}

/// Index and value of the largest probability.
///
/// A NaN anywhere wins, so corrupted output is never mistaken for a
/// confident prediction.
pub fn top(probabilities: &[f64]) -> Option<(usize, f64)> {
    let mut best: Option<(usize, f64)> = None;
    for (i, &p) in probabilities.iter().enumerate() {
        best = match best {
            Some((_, b)) if b.is_nan() => best,
            Some((_, b)) if !p.is_nan() && p <= b => best,
            _ => Some((i, p)),
        };
    }
    best
}
