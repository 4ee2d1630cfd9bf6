//! Cache abstraction shared by the preprocessing and inference components.

use ahash::RandomState;
use std::hash::BuildHasher;

/// Key under which per-text results are cached.
///
/// Derived from the raw input text with a fast, well-distributed,
/// non-cryptographic hash. Resistance to crafted collisions is not a goal.
pub type CacheKey = u64;

// Fixed seeds keep keys stable for the lifetime of the process.
const KEY_SEEDS: (u64, u64, u64, u64) = (
    0x243f_6a88_85a3_08d3,
    0x1319_8a2e_0370_7344,
    0xa409_3822_299f_31d0,
    0x082e_fa98_ec4e_6c89,
);

/// Hash raw input text into a [`CacheKey`].
pub fn hash_text(text: &str) -> CacheKey {
    let state = RandomState::with_seeds(KEY_SEEDS.0, KEY_SEEDS.1, KEY_SEEDS.2, KEY_SEEDS.3);
    BuildHasher::hash_one(&state, text)
}

/// Generic key-value cache used by components that memoize per-input work.
///
/// Implementations must be safe to call from many threads at once; inference
/// runs on the blocking pool, so the interface is synchronous.
pub trait Cache<K, V>: Send + Sync {
    /// Get a live (non-expired) value
    fn get(&self, key: &K) -> Option<V>;

    /// Insert or replace a value
    fn insert(&self, key: K, value: V);

    /// Number of stored entries, expired ones included until evicted
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every entry
    fn clear(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct MockCache {
        data: Mutex<HashMap<CacheKey, String>>,
    }

    impl Cache<CacheKey, String> for MockCache {
        fn get(&self, key: &CacheKey) -> Option<String> {
            self.data.lock().unwrap().get(key).cloned()
        }

        fn insert(&self, key: CacheKey, value: String) {
            self.data.lock().unwrap().insert(key, value);
        }

        fn len(&self) -> usize {
            self.data.lock().unwrap().len()
        }

        fn clear(&self) {
            self.data.lock().unwrap().clear();
        }
    }

    #[test]
    fn test_mock_cache() {
        let cache = MockCache {
            data: Mutex::new(HashMap::new()),
        };

        let key = hash_text("create a sales agent");
        cache.insert(key, "value".to_string());
        assert_eq!(cache.get(&key), Some("value".to_string()));
        assert!(!cache.is_empty());

        cache.clear();
        assert_eq!(cache.get(&key), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_hash_text_is_stable() {
        assert_eq!(hash_text("zoho crm"), hash_text("zoho crm"));
        assert_ne!(hash_text("zoho crm"), hash_text("Zoho crm"));
        assert_ne!(hash_text(""), hash_text(" "));
    }
}
