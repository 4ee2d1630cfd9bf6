//! Text cleaning and tokenization.
//!
//! Raw text is reduced to lower-cased word segments (URLs, email addresses
//! and punctuation dropped), each remembering the byte range it came from in
//! the original input, and then encoded into a fixed-length id sequence that
//! both models consume.

use lazy_static::lazy_static;
use regex::Regex;
use std::ops::Range;
use std::sync::Arc;
use tracing::{debug, trace};

use nlu_core::{hash_text, Cache, CacheKey};
use nlu_infra::{retry_blocking, RetryPolicy};

use crate::error::{NluError, Result};
use crate::model::{Tokenizer, PAD_TOKEN_ID};

/// Texts encoded together per internal sub-batch
pub const PREPROCESS_CHUNK_SIZE: usize = 32;

/// Tokenizer attempts before giving up (first try plus retries)
pub const TOKENIZER_ATTEMPTS: u32 = 3;

lazy_static! {
    static ref URL_PATTERN: Regex = Regex::new(
        r"(?i)https?://(?:www\.)?[-a-z0-9@:%._+~#=]{1,256}\.[a-z0-9()]{1,6}\b[-a-z0-9()@:%_+.~#?&/=]*"
    )
    .unwrap();
    static ref EMAIL_PATTERN: Regex =
        Regex::new(r"(?i)[a-z0-9._%+-]+@[a-z0-9.-]+\.[a-z]{2,}").unwrap();
    static ref WORD_PATTERN: Regex = Regex::new(r"\w+").unwrap();
}

/// A cleaned word and where it sits in the original text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub text: String,
    pub span: Range<usize>,
}

/// Fixed-length model input for one text
#[derive(Debug, Clone, PartialEq)]
pub struct Encoding {
    /// Token ids padded with [`PAD_TOKEN_ID`] to the sequence length
    pub input_ids: Vec<u32>,
    /// 1 for real tokens, 0 for padding
    pub attention_mask: Vec<u8>,
    /// Cleaned token strings, real positions only
    pub tokens: Vec<String>,
    /// Byte ranges into the original text, real positions only
    pub offsets: Vec<Range<usize>>,
    /// Length of the original text in characters
    pub original_length: usize,
    /// Length of the encoded sequence, padding included
    pub processed_length: usize,
}

impl Encoding {
    /// Number of non-padding positions
    pub fn real_len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_padding(&self, position: usize) -> bool {
        self.attention_mask.get(position).map_or(true, |&m| m == 0)
    }

    /// Cleaned text as the models see it
    pub fn joined(&self) -> String {
        self.tokens.join(" ")
    }
}

/// Encodings for several texts, in input order
#[derive(Debug, Clone)]
pub struct BatchEncoding {
    pub encodings: Vec<Arc<Encoding>>,
}

impl BatchEncoding {
    pub fn batch_size(&self) -> usize {
        self.encodings.len()
    }
}

/// Split text into cleaned word segments.
///
/// URLs and email addresses are dropped entirely; every other run of word
/// characters becomes one lower-cased segment.
pub fn segments(text: &str) -> Vec<Segment> {
    let mut masked: Vec<Range<usize>> = URL_PATTERN
        .find_iter(text)
        .chain(EMAIL_PATTERN.find_iter(text))
        .map(|m| m.range())
        .collect();
    masked.sort_by_key(|r| r.start);

    WORD_PATTERN
        .find_iter(text)
        .filter(|m| {
            !masked
                .iter()
                .any(|r| m.start() < r.end && r.start < m.end())
        })
        .map(|m| Segment {
            text: m.as_str().to_lowercase(),
            span: m.range(),
        })
        .collect()
}

/// Cleaned form of `text`: lower case, no URLs, emails or punctuation,
/// single spaces between words.
pub fn clean(text: &str) -> String {
    segments(text)
        .into_iter()
        .map(|s| s.text)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Turns raw text into model input, caching per distinct input
pub struct TextPreprocessor {
    tokenizer: Arc<dyn Tokenizer>,
    cache: Arc<dyn Cache<CacheKey, Arc<Encoding>>>,
    max_length: usize,
    retry: RetryPolicy,
}

impl TextPreprocessor {
    pub fn new(
        tokenizer: Arc<dyn Tokenizer>,
        cache: Arc<dyn Cache<CacheKey, Arc<Encoding>>>,
        max_length: usize,
    ) -> Self {
        Self {
            tokenizer,
            cache,
            max_length: max_length.max(1),
            retry: RetryPolicy::fixed(TOKENIZER_ATTEMPTS - 1, std::time::Duration::ZERO),
        }
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Encode one text, truncating or padding to the sequence length.
    pub fn transform(&self, text: &str) -> Result<Arc<Encoding>> {
        if text.trim().is_empty() {
            return Err(NluError::invalid_input("text must not be empty"));
        }

        let key = hash_text(text);
        if let Some(encoding) = self.cache.get(&key) {
            trace!("Encoding cache hit");
            return Ok(encoding);
        }

        let encoding = Arc::new(self.encode(text)?);
        self.cache.insert(key, Arc::clone(&encoding));

        debug!(
            original_length = encoding.original_length,
            tokens = encoding.real_len(),
            processed_length = encoding.processed_length,
            "Text transformed"
        );
        Ok(encoding)
    }

    /// Encode several texts, working through them in fixed-size chunks.
    pub fn batch_transform(&self, texts: &[&str]) -> Result<BatchEncoding> {
        if texts.is_empty() {
            return Err(NluError::invalid_input("batch must contain at least one text"));
        }

        let mut encodings = Vec::with_capacity(texts.len());
        for (chunk_index, chunk) in texts.chunks(PREPROCESS_CHUNK_SIZE).enumerate() {
            for text in chunk {
                encodings.push(self.transform(text)?);
            }
            trace!(chunk = chunk_index, size = chunk.len(), "Chunk preprocessed");
        }

        debug!(batch_size = encodings.len(), "Batch transformed");
        Ok(BatchEncoding { encodings })
    }

    fn encode(&self, text: &str) -> Result<Encoding> {
        let mut segments = segments(text);
        segments.truncate(self.max_length);

        let words: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
        let mut input_ids = retry_blocking(&self.retry, "tokenize", || {
            self.tokenizer.encode_words(&words)
        })
        .map_err(|e| {
            NluError::processing(format!(
                "tokenization failed after {} attempts: {}",
                self.retry.max_attempts(),
                e
            ))
        })?;

        if input_ids.len() != words.len() {
            return Err(NluError::processing(format!(
                "tokenizer returned {} ids for {} words",
                input_ids.len(),
                words.len()
            )));
        }

        let real = input_ids.len();
        input_ids.resize(self.max_length, PAD_TOKEN_ID);
        let mut attention_mask = vec![1u8; real];
        attention_mask.resize(self.max_length, 0);

        let (tokens, offsets): (Vec<String>, Vec<Range<usize>>) =
            segments.into_iter().map(|s| (s.text, s.span)).unzip();

        Ok(Encoding {
            input_ids,
            attention_mask,
            tokens,
            offsets,
            original_length: text.chars().count(),
            processed_length: self.max_length,
        })
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexicon::HashingTokenizer;
    use nlu_infra::{MemoryCache, MemoryCacheConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn cache() -> Arc<dyn Cache<CacheKey, Arc<Encoding>>> {
        Arc::new(MemoryCache::<CacheKey, Arc<Encoding>>::new(MemoryCacheConfig::new(
            "encodings",
            None,
            100,
        )))
    }

    fn preprocessor(max_length: usize) -> TextPreprocessor {
        TextPreprocessor::new(Arc::new(HashingTokenizer::default()), cache(), max_length)
    }

    struct FlakyTokenizer {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    impl Tokenizer for FlakyTokenizer {
        fn encode_words(&self, words: &[&str]) -> Result<Vec<u32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(NluError::processing("tokenizer unavailable"));
            }
            Ok(words.iter().map(|_| 7).collect())
        }
    }

    #[test]
    fn test_clean_strips_urls_emails_and_punctuation() {
        let cleaned = clean("  Create an Agent!! See https://example.com/docs or mail ops@example.com ");
        assert_eq!(cleaned, "create an agent see or mail");
    }

    #[test]
    fn test_clean_is_deterministic() {
        let text = "Sync HubSpot, hourly; notify #sales";
        assert_eq!(clean(text), clean(text));
        assert_eq!(clean(text), "sync hubspot hourly notify sales");
    }

    #[test]
    fn test_segments_keep_original_offsets() {
        let text = "Create a Sales agent";
        let segments = segments(text);

        assert_eq!(segments.len(), 4);
        assert_eq!(segments[2].text, "sales");
        assert_eq!(&text[segments[2].span.clone()], "Sales");
    }

    #[test]
    fn test_transform_pads_to_max_length() {
        let encoding = preprocessor(8).transform("create a sales agent").unwrap();

        assert_eq!(encoding.input_ids.len(), 8);
        assert_eq!(encoding.attention_mask, vec![1, 1, 1, 1, 0, 0, 0, 0]);
        assert_eq!(encoding.real_len(), 4);
        assert_eq!(encoding.original_length, 20);
        assert_eq!(encoding.processed_length, 8);
        assert!(encoding.input_ids[4..].iter().all(|&id| id == PAD_TOKEN_ID));
        assert!(encoding.is_padding(5));
    }

    #[test]
    fn test_transform_truncates_long_input() {
        let encoding = preprocessor(3).transform("one two three four five").unwrap();

        assert_eq!(encoding.input_ids.len(), 3);
        assert_eq!(encoding.tokens, vec!["one", "two", "three"]);
        assert!(encoding.attention_mask.iter().all(|&m| m == 1));
    }

    #[test]
    fn test_transform_rejects_blank_text() {
        let err = preprocessor(8).transform("   ").unwrap_err();
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn test_transform_uses_cache() {
        let preprocessor = preprocessor(8);
        let first = preprocessor.transform("delete the billing agent").unwrap();
        let second = preprocessor.transform("delete the billing agent").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(preprocessor.cache_len(), 1);

        preprocessor.clear_cache();
        assert_eq!(preprocessor.cache_len(), 0);
    }

    #[test]
    fn test_batch_transform_preserves_order() {
        let texts: Vec<String> = (0..70).map(|i| format!("agent number {}", i)).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();

        let batch = preprocessor(4).batch_transform(&refs).unwrap();

        assert_eq!(batch.batch_size(), 70);
        assert_eq!(batch.encodings[69].tokens, vec!["agent", "number", "69"]);
    }

    #[test]
    fn test_batch_transform_rejects_empty_batch() {
        assert!(preprocessor(4).batch_transform(&[]).is_err());
    }

    #[test]
    fn test_tokenizer_is_retried() {
        let tokenizer = Arc::new(FlakyTokenizer {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        });
        let preprocessor = TextPreprocessor::new(tokenizer.clone(), cache(), 4);

        let encoding = preprocessor.transform("status please").unwrap();
        assert_eq!(encoding.input_ids[..2], [7, 7]);
        assert_eq!(tokenizer.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_tokenizer_failure_after_retries_is_processing_error() {
        let tokenizer = Arc::new(FlakyTokenizer {
            failures_left: AtomicU32::new(10),
            calls: AtomicU32::new(0),
        });
        let preprocessor = TextPreprocessor::new(tokenizer.clone(), cache(), 4);

        let err = preprocessor.transform("status please").unwrap_err();
        assert_eq!(err.code(), "PROCESSING_ERROR");
        assert_eq!(tokenizer.calls.load(Ordering::SeqCst), 3);
    }
}
