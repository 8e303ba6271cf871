//! Per-group cache of fetched bulk-annotation buffers.
//!
//! Buffers are cached write-once per group UID: a repeat fetch overwrites
//! wholesale, never merges. Stored buffers are immutable after insertion
//! (shared via `Arc`), so concurrent readers need no coordination beyond
//! the lock that guards the LRU bookkeeping.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::RwLock;
use tracing::debug;

use crate::annotation::BulkAnnotationBuffers;
use crate::config::DEFAULT_GROUP_CACHE_CAPACITY;

/// LRU cache of raw annotation buffers keyed by group UID.
pub struct AnnotationCache {
    cache: RwLock<LruCache<String, Arc<BulkAnnotationBuffers>>>,
}

impl AnnotationCache {
    /// Create a cache holding up to the default number of groups.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_GROUP_CACHE_CAPACITY)
    }

    /// Create a cache holding up to `capacity` groups.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            cache: RwLock::new(LruCache::new(
                NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Buffers cached for a group, marking the entry recently used.
    pub async fn get_cached_bulk_annotations(
        &self,
        group_uid: &str,
    ) -> Option<Arc<BulkAnnotationBuffers>> {
        let mut cache = self.cache.write().await;
        cache.get(group_uid).cloned()
    }

    /// Check for a cached entry without updating LRU order.
    pub async fn contains(&self, group_uid: &str) -> bool {
        let cache = self.cache.read().await;
        cache.contains(group_uid)
    }

    /// Store buffers for a group, overwriting any previous entry.
    pub async fn cache_bulk_annotations(
        &self,
        group_uid: &str,
        buffers: Arc<BulkAnnotationBuffers>,
    ) {
        let mut cache = self.cache.write().await;
        cache.put(group_uid.to_string(), buffers);
        debug!(group_uid, "bulk annotation buffers cached");
    }

    /// Drop the cached buffers for a group.
    pub async fn invalidate(&self, group_uid: &str) -> bool {
        let mut cache = self.cache.write().await;
        cache.pop(group_uid).is_some()
    }

    /// Number of cached groups.
    pub async fn len(&self) -> usize {
        let cache = self.cache.read().await;
        cache.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for AnnotationCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotation::buffers::{encode_f64, FloatPrecision, GraphicDataBuffer};

    fn buffers(values: &[f64]) -> Arc<BulkAnnotationBuffers> {
        Arc::new(BulkAnnotationBuffers {
            graphic_data: GraphicDataBuffer::new(
                encode_f64(values),
                FloatPrecision::F64,
                2,
                None,
            )
            .unwrap(),
            graphic_index: None,
            measurements: Vec::new(),
        })
    }

    #[tokio::test]
    async fn test_get_put_and_invalidate() {
        let cache = AnnotationCache::new();
        assert!(cache.get_cached_bulk_annotations("g1").await.is_none());

        cache.cache_bulk_annotations("g1", buffers(&[1.0, 2.0])).await;
        assert!(cache.contains("g1").await);
        let stored = cache.get_cached_bulk_annotations("g1").await.unwrap();
        assert_eq!(stored.graphic_data.point_count(), 1);

        assert!(cache.invalidate("g1").await);
        assert!(!cache.contains("g1").await);
        assert!(!cache.invalidate("g1").await);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_wholesale() {
        let cache = AnnotationCache::new();
        cache.cache_bulk_annotations("g1", buffers(&[1.0, 2.0])).await;
        cache
            .cache_bulk_annotations("g1", buffers(&[1.0, 2.0, 3.0, 4.0]))
            .await;

        let stored = cache.get_cached_bulk_annotations("g1").await.unwrap();
        assert_eq!(stored.graphic_data.point_count(), 2);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let cache = AnnotationCache::with_capacity(2);
        cache.cache_bulk_annotations("a", buffers(&[1.0, 2.0])).await;
        cache.cache_bulk_annotations("b", buffers(&[3.0, 4.0])).await;

        // Touch "a" so "b" is the eviction candidate.
        cache.get_cached_bulk_annotations("a").await;
        cache.cache_bulk_annotations("c", buffers(&[5.0, 6.0])).await;

        assert!(cache.contains("a").await);
        assert!(!cache.contains("b").await);
        assert!(cache.contains("c").await);
    }
}
