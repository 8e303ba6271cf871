//! Orchestration of the annotation processing pipeline.
//!
//! [`AnnotationProcessor`] ties together fetch, cache, statistics, feature
//! building, and incremental delivery:
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                     AnnotationProcessor                        │
//! │  load_bulk_annotations(request)                                │
//! │    1. Cache probe selects task priority                        │
//! │    2. ProcessingQueue runs the group task                      │
//! │    3. Fetch graphic data + index concurrently (with backoff)   │
//! │    4. Statistics via ComputeBackend                            │
//! │    5. FeatureBuilder, sync or chunked per group size           │
//! │    6. Debounced delivery to the FeatureSink                    │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Each group is one task; one group's failure rejects only its own handle
//! and never disturbs sibling in-flight or queued groups. Delivery is
//! all-or-nothing per group: when a chunked build fails midway, the features
//! already flushed are retracted through whole-group invalidation.

pub mod cache;
pub mod fetch;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::annotation::{
    AnnotationGroup, BulkAnnotationBuffers, CodedConcept, GraphicIndexBuffer,
    MeasurementValueBuffer, MeasurementSeries,
};
use crate::annotation::buffers::GraphicDataBuffer;
use crate::config::ProcessorConfig;
use crate::error::{AnnotationError, ProcessError};
use crate::feature::{BuildOptions, FeatureBatcher, FeatureBuilder, FeatureSink};
use crate::queue::{ProcessingQueue, QueueStatus, TaskDescriptor, TaskHandle};
use crate::transform::AffineTransform;
use crate::worker::{ComputeBackend, SeriesStatistics};

use cache::AnnotationCache;
use fetch::{resolve_payload, BulkDataClient};

/// Priority for groups whose buffers are already cached.
const CACHED_TASK_PRIORITY: i32 = 10;

/// Priority for groups that still need a fetch.
const FETCH_TASK_PRIORITY: i32 = 0;

/// Queue-level retries for fetch-and-process tasks (the fetch itself also
/// retries with backoff).
const FETCH_TASK_RETRIES: u32 = 1;

/// Progress callback: `(processed, total)` annotation counts.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Everything needed to load and process one annotation group.
#[derive(Clone)]
pub struct ProcessRequest {
    /// The group descriptor
    pub group: Arc<AnnotationGroup>,

    /// Forward transform of the annotation's source image; required for
    /// pixel-space (`2D`) groups
    pub source_transform: Option<AffineTransform>,

    /// Transform of the rendered image (its inverse maps into display space)
    pub display_transform: AffineTransform,

    /// Viewport and culling parameters
    pub build: BuildOptions,

    /// Optional progress observer for chunked builds
    pub progress: Option<ProgressCallback>,
}

/// Min/max summary for one measurement series of a group.
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSummary {
    pub name: CodedConcept,
    pub statistics: SeriesStatistics,
}

/// Outcome of processing one group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub group_uid: String,

    /// Features delivered to the sink (after any viewport culling)
    pub feature_count: usize,

    /// Per-series value ranges, for value-driven styling
    pub statistics: Vec<SeriesSummary>,
}

/// Orchestrates fetch, cache, statistics, building, and delivery.
pub struct AnnotationProcessor {
    client: Arc<dyn BulkDataClient>,
    sink: Arc<dyn FeatureSink>,
    backend: Arc<dyn ComputeBackend>,
    cache: Arc<AnnotationCache>,
    queue: ProcessingQueue<GroupSummary>,
    config: ProcessorConfig,
}

impl AnnotationProcessor {
    /// Create a processor with its own queue and cache.
    ///
    /// The queue's consumer lives as long as the processor; dropping the
    /// processor rejects pending groups.
    pub fn new(
        client: Arc<dyn BulkDataClient>,
        sink: Arc<dyn FeatureSink>,
        backend: Arc<dyn ComputeBackend>,
        config: ProcessorConfig,
    ) -> Self {
        let cache = Arc::new(AnnotationCache::with_capacity(config.group_cache_capacity));
        Self {
            client,
            sink,
            backend,
            cache,
            queue: ProcessingQueue::new(),
            config,
        }
    }

    /// Enqueue loading and processing of one annotation group.
    ///
    /// Groups with cached raw buffers are queued at high priority
    /// ("process-cached"); everything else becomes a normal-priority
    /// fetch-and-process task whose graphic data and graphic index are
    /// retrieved concurrently, each with capped exponential backoff.
    pub async fn load_bulk_annotations(&self, request: ProcessRequest) -> TaskHandle<GroupSummary> {
        let cached = self.cache.contains(&request.group.uid).await;
        let (priority, retries) = if cached {
            (CACHED_TASK_PRIORITY, 0)
        } else {
            (FETCH_TASK_PRIORITY, FETCH_TASK_RETRIES)
        };
        debug!(
            group_uid = %request.group.uid,
            cached,
            priority,
            "enqueueing annotation group"
        );

        let client = Arc::clone(&self.client);
        let sink = Arc::clone(&self.sink);
        let backend = Arc::clone(&self.backend);
        let cache = Arc::clone(&self.cache);
        let config = self.config.clone();

        self.queue
            .add_task(TaskDescriptor::new(priority, retries, move |ctx| {
                let client = Arc::clone(&client);
                let sink = Arc::clone(&sink);
                let backend = Arc::clone(&backend);
                let cache = Arc::clone(&cache);
                let config = config.clone();
                let request = request.clone();
                async move {
                    run_group(client, sink, backend, cache, config, request, ctx.priority).await
                }
            }))
    }

    /// Drop a group's cached buffers and retract its delivered features.
    pub async fn invalidate_group(&self, group_uid: &str) {
        self.cache.invalidate(group_uid).await;
        self.sink.remove_group(group_uid).await;
        info!(group_uid, "annotation group invalidated");
    }

    /// Cancel a queued or in-flight group task by id.
    pub fn cancel_task(&self, id: u64) -> bool {
        self.queue.cancel_task(id)
    }

    /// Cancel every pending group task.
    pub fn cancel_all(&self) {
        self.queue.cancel_all();
    }

    /// Snapshot of the underlying queue.
    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    /// Access to the raw-buffer cache (for tests and diagnostics).
    pub fn cache(&self) -> &Arc<AnnotationCache> {
        &self.cache
    }
}

/// One full group pass: buffers from cache or archive, statistics, build,
/// delivery.
async fn run_group(
    client: Arc<dyn BulkDataClient>,
    sink: Arc<dyn FeatureSink>,
    backend: Arc<dyn ComputeBackend>,
    cache: Arc<AnnotationCache>,
    config: ProcessorConfig,
    request: ProcessRequest,
    priority: i32,
) -> Result<GroupSummary, ProcessError> {
    let group = &request.group;

    let buffers = match cache.get_cached_bulk_annotations(&group.uid).await {
        Some(buffers) => buffers,
        None => {
            let buffers = Arc::new(fetch_group_buffers(client.as_ref(), group, &config).await?);
            cache
                .cache_bulk_annotations(&group.uid, Arc::clone(&buffers))
                .await;
            buffers
        }
    };

    process_bulk_annotations(sink, backend, config, request, buffers, priority).await
}

/// Retrieve and decode a group's raw buffers.
///
/// Graphic data and graphic index are fetched concurrently; measurement
/// series follow.
async fn fetch_group_buffers(
    client: &dyn BulkDataClient,
    group: &AnnotationGroup,
    config: &ProcessorConfig,
) -> Result<BulkAnnotationBuffers, ProcessError> {
    let data_source =
        group
            .graphic_data
            .as_ref()
            .ok_or_else(|| AnnotationError::MalformedMetadata {
                reason: format!(
                    "group {} carries neither inline nor bulk graphic data",
                    group.uid
                ),
            })?;

    let index_source = if group.requires_index() {
        Some(group.graphic_index.as_ref().ok_or(
            AnnotationError::MissingBulkData {
                field: "LongPrimitivePointIndexList",
                graphic_type: group.graphic_type.as_str(),
            },
        )?)
    } else {
        None
    };

    let data_fut = resolve_payload(client, data_source, &config.retry);
    let index_fut = async {
        match index_source {
            Some(source) => resolve_payload(client, source, &config.retry)
                .await
                .map(Some),
            None => Ok(None),
        }
    };
    let (data_bytes, index_bytes) = tokio::join!(data_fut, index_fut);

    let graphic_data = GraphicDataBuffer::new(
        data_bytes?,
        group.precision,
        group.dimensionality(),
        group.common_z,
    )?;
    let graphic_index = match index_bytes? {
        Some(bytes) => Some(GraphicIndexBuffer::new(bytes)?),
        None => None,
    };

    let mut measurements = Vec::with_capacity(group.measurements.len());
    for descriptor in &group.measurements {
        let value_bytes = resolve_payload(client, &descriptor.values, &config.retry).await?;
        let values = MeasurementValueBuffer::new(value_bytes, group.precision)?;
        let indices = match &descriptor.indices {
            Some(source) => {
                let bytes = resolve_payload(client, source, &config.retry).await?;
                Some(GraphicIndexBuffer::new(bytes)?)
            }
            None => None,
        };
        measurements.push(MeasurementSeries::new(
            descriptor.name.clone(),
            values,
            indices.as_ref(),
        )?);
    }

    Ok(BulkAnnotationBuffers {
        graphic_data,
        graphic_index,
        measurements,
    })
}

/// Statistics, mode selection, building, and delivery for one group.
async fn process_bulk_annotations(
    sink: Arc<dyn FeatureSink>,
    backend: Arc<dyn ComputeBackend>,
    config: ProcessorConfig,
    request: ProcessRequest,
    buffers: Arc<BulkAnnotationBuffers>,
    priority: i32,
) -> Result<GroupSummary, ProcessError> {
    let group = Arc::clone(&request.group);

    let mut statistics = Vec::with_capacity(buffers.measurements.len());
    for series in &buffers.measurements {
        let stats = backend.statistics(series.values(), priority).await;
        statistics.push(SeriesSummary {
            name: series.name().clone(),
            statistics: stats,
        });
    }

    let builder = FeatureBuilder::new(
        Arc::clone(&group),
        Arc::clone(&buffers),
        request.source_transform,
        request.display_transform,
        request.build,
    )?;

    let total = group.number_of_annotations;
    let feature_count = if config.builds_synchronously(total) {
        let features = builder.build_sync()?;
        let count = features.len();
        if let Some(progress) = &request.progress {
            progress(total, total);
        }
        sink.publish(features).await;
        count
    } else {
        let batcher = FeatureBatcher::new(
            Arc::clone(&sink),
            config.debounce_window,
            config.batch_capacity,
        );
        let progress = request.progress.clone();
        let result = builder
            .build_chunked(config.chunk_size_for(total), &batcher, move |done, total| {
                if let Some(progress) = &progress {
                    progress(done, total);
                }
            })
            .await;
        batcher.finish().await;

        match result {
            Ok(count) => count,
            Err(error) => {
                // All-or-nothing per group: retract anything already flushed.
                warn!(group_uid = %group.uid, %error, "chunked build failed, retracting group");
                sink.remove_group(&group.uid).await;
                return Err(error);
            }
        }
    };

    info!(
        group_uid = %group.uid,
        feature_count,
        series = statistics.len(),
        "annotation group processed"
    );
    Ok(GroupSummary {
        group_uid: group.uid.clone(),
        feature_count,
        statistics,
    })
}
