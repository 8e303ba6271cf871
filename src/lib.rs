//! # WSI Annotations
//!
//! A processing engine for bulk microscopy annotations attached to Whole
//! Slide Images (WSI).
//!
//! Computational pipelines routinely attach 10^5-10^6 graphical annotations
//! (cell nuclei, tissue regions) to a single slide. This library turns those
//! raw annotation payloads (packed little-endian coordinate buffers
//! referenced from archive metadata) into render-ready vector features
//! without blocking the caller.
//!
//! ## Features
//!
//! - **Zero-copy buffer views**: Coordinates and indices are read in place
//!   from fetched bytes, never re-encoded
//! - **Coordinate transforms**: Pixel-matrix ↔ slide-space affine mapping
//!   with precomputed inverses and a fixed rounding contract
//! - **Geometry derivation**: Centroids and areas per graphic type, plus
//!   polygon approximation of ellipses
//! - **Incremental builds**: Large groups are built in chunks with scheduler
//!   yields, viewport culling, and debounced delivery
//! - **Priority scheduling**: A single-consumer task queue with retry,
//!   priority decay, cancellation, and status query
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`transform`] - Affine transforms between pixel and slide space
//! - [`annotation`] - Group metadata, buffer views, and geometry derivation
//! - [`feature`] - Feature construction, culling, and batched delivery
//! - [`queue`] - Priority task queue with handle-based settlement
//! - [`worker`] - Compute backends for CPU-bound subtasks
//! - [`processor`] - Fetch, cache, and pipeline orchestration
//! - [`config`] - Tuning knobs and retry policy
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsi_annotations::{
//!     AnnotationProcessor, BuildOptions, ProcessRequest, ProcessorConfig,
//!     ThreadPoolBackend,
//! };
//! # use wsi_annotations::processor::fetch::BulkDataClient;
//! # use wsi_annotations::FeatureSink;
//!
//! # async fn run(
//! #     client: Arc<dyn BulkDataClient>,
//! #     sink: Arc<dyn FeatureSink>,
//! #     request: ProcessRequest,
//! # ) {
//! let processor = AnnotationProcessor::new(
//!     client,
//!     sink,
//!     Arc::new(ThreadPoolBackend),
//!     ProcessorConfig::default(),
//! );
//!
//! let handle = processor.load_bulk_annotations(request).await;
//! let summary = handle.wait().await.unwrap();
//! println!("{} features delivered", summary.feature_count);
//! # }
//! ```

pub mod annotation;
pub mod config;
pub mod error;
pub mod feature;
pub mod processor;
pub mod queue;
pub mod transform;
pub mod worker;

// Re-export commonly used types
pub use annotation::{
    AlgorithmIdentification, AnnotationGroup, BulkAnnotationBuffers, BulkDataReference,
    CodedConcept, CoordinateType, FloatPrecision, GraphicDataBuffer, GraphicIndexBuffer,
    GraphicType, MeasurementDescriptor, MeasurementSeries, MeasurementValueBuffer, PayloadSource,
};
pub use annotation::derive::{derive_area, derive_centroid};
pub use config::{ProcessorConfig, RetryConfig};
pub use error::{AnnotationError, FetchError, ProcessError, TaskError, TransformError};
pub use feature::{
    BuildOptions, FeatureBatcher, FeatureBuilder, FeatureGeometry, FeatureRecord, FeatureSink,
    ViewportBounds,
};
pub use processor::cache::AnnotationCache;
pub use processor::fetch::{fetch_with_retry, BulkDataClient};
pub use processor::{
    AnnotationProcessor, GroupSummary, ProcessRequest, ProgressCallback, SeriesSummary,
};
pub use queue::{ProcessingQueue, QueueStatus, TaskContext, TaskDescriptor, TaskHandle};
pub use transform::{
    apply_inverse_transform, apply_transform, apply_transform_batch, AffineMatrix,
    AffineTransform, TransformParameters,
};
pub use worker::{ComputeBackend, InlineBackend, SeriesStatistics, ThreadPoolBackend};
