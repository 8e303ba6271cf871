//! Debounced delivery of feature batches to the rendering sink.
//!
//! Chunked builds emit features in bursts. Delivering every chunk directly
//! would flood the sink with small updates, so batches flow through a
//! bounded channel into a flusher task that coalesces everything received
//! within a short window (or up to a size bound) into one sink delivery.
//! Flush policy is explicit: flush-on-timeout and flush-on-size, no captured
//! mutable counters.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use super::FeatureRecord;

/// Number of features that forces a flush before the window elapses.
const DEFAULT_FLUSH_SIZE: usize = 10_000;

/// Receiving end of the pipeline: the rendering layer.
///
/// Features accumulate per group and are removed only by whole-group
/// invalidation.
#[async_trait]
pub trait FeatureSink: Send + Sync {
    /// Deliver a coalesced batch of features.
    async fn publish(&self, features: Vec<FeatureRecord>);

    /// Remove every feature previously delivered for a group.
    async fn remove_group(&self, group_uid: &str);
}

/// Coalesces feature bursts into debounced sink deliveries.
pub struct FeatureBatcher {
    tx: mpsc::Sender<Vec<FeatureRecord>>,
    flusher: JoinHandle<()>,
}

impl FeatureBatcher {
    /// Spawn the flusher task.
    ///
    /// # Arguments
    /// * `sink` - Delivery target
    /// * `window` - Coalescing window after the first pending batch
    /// * `capacity` - Bound on queued (not yet coalesced) batches
    pub fn new(sink: Arc<dyn FeatureSink>, window: Duration, capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let flusher = tokio::spawn(Self::run_flusher(sink, rx, window, DEFAULT_FLUSH_SIZE));
        Self { tx, flusher }
    }

    /// Queue a burst of features for delivery.
    ///
    /// Applies backpressure when the channel is full. Returns `false` if the
    /// flusher has already shut down.
    pub async fn push(&self, features: Vec<FeatureRecord>) -> bool {
        if features.is_empty() {
            return true;
        }
        self.tx.send(features).await.is_ok()
    }

    /// Close the intake and wait until every queued feature reaches the
    /// sink.
    pub async fn finish(self) {
        drop(self.tx);
        // Flusher only ends after draining the channel.
        let _ = self.flusher.await;
    }

    async fn run_flusher(
        sink: Arc<dyn FeatureSink>,
        mut rx: mpsc::Receiver<Vec<FeatureRecord>>,
        window: Duration,
        flush_size: usize,
    ) {
        while let Some(first) = rx.recv().await {
            let mut buffer = first;
            let deadline = tokio::time::sleep(window);
            tokio::pin!(deadline);

            // Coalesce until the window elapses, the size bound is hit, or
            // the intake closes.
            loop {
                if buffer.len() >= flush_size {
                    break;
                }
                tokio::select! {
                    _ = &mut deadline => break,
                    more = rx.recv() => match more {
                        Some(batch) => buffer.extend(batch),
                        None => break,
                    },
                }
            }

            debug!(features = buffer.len(), "flushing feature batch");
            sink.publish(buffer).await;
        }
    }
}
