//! Semantic weight cache.
//!
//! ## Responsibility
//! Cache computed routing weights keyed by a quantized embedding of the
//! request text, so near-identical requests skip the weight computation.
//! Entries expire lazily on read after a configurable TTL; a capacity bound
//! evicts arbitrary entries when exceeded.
//!
//! ## Guarantees
//! - Lookups and inserts are lock-free reads/writes on a concurrent map
//! - Concurrent misses for the same key at worst recompute; entries are
//!   idempotent so the race is harmless
//! - With no embedder configured, every lookup is a miss and inserts are
//!   dropped (caching disabled)
//!
//! ## NOT Responsible For
//! - Computing weights (that belongs to `engine`)

use dashmap::DashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::WeightPair;

/// Produces a fixed-length embedding for request text.
pub trait Embedder: Send + Sync {
    /// Embed `text` into a vector of `dim` components.
    fn embed(&self, text: &str, dim: usize) -> Vec<f64>;
}

/// Deterministic hash-based pseudo-embedder.
///
/// Projects word hashes through sine/cosine so that texts sharing vocabulary
/// land near each other. Not a real embedding model, but deterministic and
/// dependency-free, which is what the cache key needs.
#[derive(Debug, Clone, Default)]
pub struct HashEmbedder;

impl Embedder for HashEmbedder {
    fn embed(&self, text: &str, dim: usize) -> Vec<f64> {
        let mut vector = vec![0.0f64; dim.max(1)];
        for word in text.to_lowercase().split_whitespace() {
            let mut hash: u64 = 5381;
            for byte in word.bytes() {
                hash = hash.wrapping_mul(33).wrapping_add(u64::from(byte));
            }
            for (i, slot) in vector.iter_mut().enumerate() {
                let phase = (hash.wrapping_add(i as u64 * 0x9e37_79b9)) as f64;
                *slot += if i % 2 == 0 {
                    (phase * 0.001).sin()
                } else {
                    (phase * 0.001).cos()
                };
            }
        }
        vector
    }
}

/// Quantize an embedding into a stable string key.
///
/// Components are min-max normalized within the vector, then truncated to
/// `levels` buckets each. Normalization is per-vector, so the same level
/// pattern can arise from different vectors; collisions only cost a shared
/// cache entry, never incorrect weights beyond the approximation the cache
/// already accepts.
pub fn quantize_key(embedding: &[f64], levels: u8) -> String {
    let levels = levels.max(2);
    let (mut min, mut max) = (f64::INFINITY, f64::NEG_INFINITY);
    for &v in embedding {
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }
    let range = max - min;
    let mut key = String::with_capacity(embedding.len() * 2);
    for &v in embedding {
        let bucket = if range <= f64::EPSILON {
            0
        } else {
            (((v - min) / range) * f64::from(levels - 1)).round() as u8
        };
        let _ = write!(key, "{bucket:02x}");
    }
    key
}

#[derive(Debug, Clone)]
struct CacheEntry {
    weights: WeightPair,
    created_at: SystemTime,
}

/// Hit/miss counters, updated atomically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of lookups answered from the cache.
    pub hits: u64,
    /// Number of lookups that missed (including expired entries).
    pub misses: u64,
}

/// TTL-bounded concurrent cache of computed weights.
pub struct SemanticCache {
    entries: DashMap<String, CacheEntry>,
    embedder: Option<Arc<dyn Embedder>>,
    ttl: Duration,
    embedding_dim: usize,
    quant_levels: u8,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl SemanticCache {
    /// Create a cache with the given embedder and limits.
    ///
    /// Passing `None` for `embedder` disables caching entirely.
    pub fn new(
        embedder: Option<Arc<dyn Embedder>>,
        ttl: Duration,
        embedding_dim: usize,
        quant_levels: u8,
        max_entries: usize,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            embedder,
            ttl,
            embedding_dim: embedding_dim.max(1),
            quant_levels,
            max_entries: max_entries.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// A disabled cache (no embedder): always misses, drops inserts.
    pub fn disabled() -> Self {
        Self::new(None, Duration::from_secs(0), 1, 2, 1)
    }

    /// Compute the quantized cache key for `text`, or `None` when disabled.
    pub fn key_for(&self, text: &str) -> Option<String> {
        let embedder = self.embedder.as_ref()?;
        let embedding = embedder.embed(text, self.embedding_dim);
        Some(quantize_key(&embedding, self.quant_levels))
    }

    /// Look up cached weights for `text`, applying lazy TTL expiry.
    pub fn get(&self, text: &str) -> Option<WeightPair> {
        let key = match self.key_for(text) {
            Some(k) => k,
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
        };

        if let Some(entry) = self.entries.get(&key) {
            let age = SystemTime::now()
                .duration_since(entry.created_at)
                .unwrap_or(Duration::ZERO);
            if age <= self.ttl {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.weights);
            }
            drop(entry);
            self.entries.remove(&key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Insert computed weights for `text`. No-op when caching is disabled.
    pub fn insert(&self, text: &str, weights: WeightPair) {
        let Some(key) = self.key_for(text) else {
            return;
        };
        if self.entries.len() >= self.max_entries && !self.entries.contains_key(&key) {
            // Evict one arbitrary entry to stay bounded. Bind the victim key
            // in its own statement so the iterator's shard guard drops before
            // the removal takes a write lock on the same shard.
            let victim = self.entries.iter().next().map(|e| e.key().clone());
            if let Some(victim) = victim {
                self.entries.remove(&victim);
            }
        }
        self.entries.insert(
            key,
            CacheEntry {
                weights,
                created_at: SystemTime::now(),
            },
        );
    }

    /// Number of live entries (including not-yet-expired ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the cache currently holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Snapshot of hit/miss counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled_cache(ttl: Duration) -> SemanticCache {
        SemanticCache::new(Some(Arc::new(HashEmbedder)), ttl, 16, 8, 64)
    }

    #[test]
    fn test_hash_embedder_deterministic() {
        let a = HashEmbedder.embed("fix the build error", 16);
        let b = HashEmbedder.embed("fix the build error", 16);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_quantize_key_stable_and_sized() {
        let v = HashEmbedder.embed("hello world", 16);
        let k1 = quantize_key(&v, 8);
        let k2 = quantize_key(&v, 8);
        assert_eq!(k1, k2);
        assert_eq!(k1.len(), 32);
    }

    #[test]
    fn test_quantize_key_flat_vector_all_zero_buckets() {
        let key = quantize_key(&[0.5, 0.5, 0.5], 8);
        assert_eq!(key, "000000");
    }

    #[test]
    fn test_get_miss_then_hit() {
        let cache = enabled_cache(Duration::from_secs(60));
        assert!(cache.get("deploy failed again").is_none());
        cache.insert("deploy failed again", WeightPair::new(0.95, 0.05));
        let hit = cache.get("deploy failed again").expect("test: cache hit");
        assert!((hit.alpha - 0.95).abs() < 1e-12);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_ttl_expiry_is_lazy_miss() {
        let cache = enabled_cache(Duration::ZERO);
        cache.insert("ephemeral", WeightPair::balanced());
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("ephemeral").is_none());
        assert!(cache.is_empty(), "expired entry removed on read");
    }

    #[test]
    fn test_disabled_cache_always_misses() {
        let cache = SemanticCache::disabled();
        cache.insert("anything", WeightPair::balanced());
        assert!(cache.get("anything").is_none());
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_capacity_bound_enforced() {
        let cache = SemanticCache::new(
            Some(Arc::new(HashEmbedder)),
            Duration::from_secs(60),
            16,
            8,
            2,
        );
        cache.insert("first request text", WeightPair::balanced());
        cache.insert("second completely different", WeightPair::balanced());
        cache.insert("third wholly unrelated words", WeightPair::balanced());
        assert!(cache.len() <= 2);
    }

    #[test]
    fn test_same_text_same_key() {
        let cache = enabled_cache(Duration::from_secs(60));
        let k1 = cache.key_for("identical input").expect("test: key");
        let k2 = cache.key_for("identical input").expect("test: key");
        assert_eq!(k1, k2);
    }
}
