//! Tunables for the annotation processing pipeline.
//!
//! All values default to the thresholds the pipeline was profiled with;
//! construct a [`ProcessorConfig`] and override fields to tune a deployment.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Annotation count at or below which groups build synchronously in one pass.
pub const DEFAULT_SYNC_THRESHOLD: usize = 500;

/// Default chunk size for asynchronous builds.
pub const DEFAULT_CHUNK_SIZE: usize = 500;

/// Chunk size once a group exceeds 1 000 annotations.
pub const LARGE_GROUP_CHUNK_SIZE: usize = 200;

/// Chunk size once a group exceeds 5 000 annotations.
pub const HUGE_GROUP_CHUNK_SIZE: usize = 100;

/// Window within which chunk outputs are coalesced into one sink delivery.
pub const DEFAULT_DEBOUNCE_WINDOW: Duration = Duration::from_millis(16);

/// Default number of groups whose raw buffers stay cached.
pub const DEFAULT_GROUP_CACHE_CAPACITY: usize = 32;

/// Retry policy for bulk-data retrieval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first (so 3 means up to 2 retries)
    pub max_attempts: u32,

    /// Delay before the first retry; doubles each retry
    pub initial_delay: Duration,

    /// Upper bound on the backoff delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryConfig {
    /// Backoff delay before retry number `retry` (0-based), capped.
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.initial_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Configuration for [`crate::processor::AnnotationProcessor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Groups at or below this annotation count build synchronously
    pub sync_threshold: usize,

    /// Chunk size for asynchronous builds of moderately sized groups
    pub chunk_size: usize,

    /// Chunk size above `large_group_threshold` annotations
    pub large_group_chunk_size: usize,

    /// Chunk size above `huge_group_threshold` annotations
    pub huge_group_chunk_size: usize,

    pub large_group_threshold: usize,
    pub huge_group_threshold: usize,

    /// Coalescing window for incremental feature delivery
    pub debounce_window: Duration,

    /// Pending-batch bound for the delivery channel
    pub batch_capacity: usize,

    /// Bulk-data fetch retry policy
    pub retry: RetryConfig,

    /// Number of groups whose raw buffers stay cached
    pub group_cache_capacity: usize,

    /// Rendered resolution above which viewport culling activates
    pub culling_resolution_threshold: f64,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            sync_threshold: DEFAULT_SYNC_THRESHOLD,
            chunk_size: DEFAULT_CHUNK_SIZE,
            large_group_chunk_size: LARGE_GROUP_CHUNK_SIZE,
            huge_group_chunk_size: HUGE_GROUP_CHUNK_SIZE,
            large_group_threshold: 1_000,
            huge_group_threshold: 5_000,
            debounce_window: DEFAULT_DEBOUNCE_WINDOW,
            batch_capacity: 64,
            retry: RetryConfig::default(),
            group_cache_capacity: DEFAULT_GROUP_CACHE_CAPACITY,
            culling_resolution_threshold: 0.25,
        }
    }
}

impl ProcessorConfig {
    /// Chunk size for a group of `annotation_count` annotations.
    ///
    /// Larger groups get smaller chunks so the consumer yields more often
    /// while they build.
    pub fn chunk_size_for(&self, annotation_count: usize) -> usize {
        if annotation_count > self.huge_group_threshold {
            self.huge_group_chunk_size
        } else if annotation_count > self.large_group_threshold {
            self.large_group_chunk_size
        } else {
            self.chunk_size
        }
    }

    /// Whether a group of this size should build in one synchronous pass.
    pub fn builds_synchronously(&self, annotation_count: usize) -> bool {
        annotation_count <= self.sync_threshold
    }
}
