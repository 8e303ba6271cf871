//! Background offload for CPU-bound subtasks.
//!
//! Statistics and batch coordinate transforms can dominate a frame budget
//! for groups with 10^5+ annotations, so they route through a
//! [`ComputeBackend`]. The backend is a capability interface with two
//! interchangeable implementations selected at construction, keeping the
//! orchestrator backend-agnostic:
//!
//! - [`ThreadPoolBackend`] hands the computation to tokio's blocking pool
//!   and falls back to the inline kernel if the pool rejects or the worker
//!   panics, so the result contract is identical either way.
//! - [`InlineBackend`] computes synchronously on the calling task.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::transform::{apply_transform_batch, AffineMatrix};

/// Kind tag for an offloaded computation, used for tracing and as a
/// priority hint to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerTaskKind {
    /// Per-series min/max over measurement values
    Statistics,

    /// Batch application of an affine matrix to a coordinate buffer
    TransformCoordinates,
}

impl WorkerTaskKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerTaskKind::Statistics => "statistics",
            WorkerTaskKind::TransformCoordinates => "transform-coordinates",
        }
    }
}

/// Min/max summary of one measurement series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SeriesStatistics {
    pub min: f64,
    pub max: f64,
}

/// Inline kernel: min/max in one pass, ignoring NaN values.
pub fn compute_statistics(values: &[f64]) -> SeriesStatistics {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for &v in values {
        if v.is_nan() {
            continue;
        }
        if v < min {
            min = v;
        }
        if v > max {
            max = v;
        }
    }
    SeriesStatistics { min, max }
}

/// Capability interface for CPU-bound subtasks.
///
/// Both implementations produce identical results; only the execution
/// placement differs.
#[async_trait]
pub trait ComputeBackend: Send + Sync {
    /// Min/max over a measurement series.
    async fn statistics(&self, values: Vec<f64>, priority: i32) -> SeriesStatistics;

    /// Transform a batch of points through the given matrix.
    async fn transform_points(
        &self,
        points: Vec<[f64; 2]>,
        matrix: AffineMatrix,
        priority: i32,
    ) -> Vec<[f64; 2]>;
}

/// Synchronous in-place computation on the calling task.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineBackend;

#[async_trait]
impl ComputeBackend for InlineBackend {
    async fn statistics(&self, values: Vec<f64>, _priority: i32) -> SeriesStatistics {
        compute_statistics(&values)
    }

    async fn transform_points(
        &self,
        points: Vec<[f64; 2]>,
        matrix: AffineMatrix,
        _priority: i32,
    ) -> Vec<[f64; 2]> {
        apply_transform_batch(&points, &matrix)
    }
}

/// Offloads computations to tokio's blocking pool, with inline fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadPoolBackend;

impl ThreadPoolBackend {
    async fn dispatch<T, F>(&self, kind: WorkerTaskKind, priority: i32, compute: F) -> T
    where
        T: Send + 'static,
        F: Fn() -> T + Send + Sync + Clone + 'static,
    {
        debug!(task = kind.as_str(), priority, "dispatching to worker pool");
        let offloaded = compute.clone();
        match tokio::task::spawn_blocking(offloaded).await {
            Ok(result) => result,
            Err(join_error) => {
                warn!(
                    task = kind.as_str(),
                    %join_error,
                    "worker dispatch failed, computing inline"
                );
                compute()
            }
        }
    }
}

#[async_trait]
impl ComputeBackend for ThreadPoolBackend {
    async fn statistics(&self, values: Vec<f64>, priority: i32) -> SeriesStatistics {
        let values = std::sync::Arc::new(values);
        self.dispatch(WorkerTaskKind::Statistics, priority, move || {
            compute_statistics(&values)
        })
        .await
    }

    async fn transform_points(
        &self,
        points: Vec<[f64; 2]>,
        matrix: AffineMatrix,
        priority: i32,
    ) -> Vec<[f64; 2]> {
        let points = std::sync::Arc::new(points);
        self.dispatch(WorkerTaskKind::TransformCoordinates, priority, move || {
            apply_transform_batch(&points, &matrix)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::{AffineTransform, TransformParameters};

    fn identityish() -> AffineMatrix {
        let params = TransformParameters {
            offset: [0.0, 0.0],
            orientation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
            spacing: [1.0, 1.0],
        };
        AffineTransform::new(&params).unwrap().matrix
    }

    #[test]
    fn test_statistics_min_max() {
        let stats = compute_statistics(&[3.0, -1.0, 7.5, 0.0]);
        assert_eq!(stats.min, -1.0);
        assert_eq!(stats.max, 7.5);
    }

    #[test]
    fn test_statistics_skips_nan() {
        let stats = compute_statistics(&[f64::NAN, 2.0, 5.0]);
        assert_eq!(stats.min, 2.0);
        assert_eq!(stats.max, 5.0);
    }

    #[tokio::test]
    async fn test_backends_agree_on_statistics() {
        let values = vec![10.0, 20.0, 15.0];
        let pooled = ThreadPoolBackend.statistics(values.clone(), 0).await;
        let inline = InlineBackend.statistics(values, 0).await;
        assert_eq!(pooled, inline);
    }

    #[tokio::test]
    async fn test_backends_agree_on_transform() {
        let matrix = identityish();
        let points = vec![[0.0, 0.0], [3.0, 4.0], [100.5, -2.25]];
        let pooled = ThreadPoolBackend
            .transform_points(points.clone(), matrix, 1)
            .await;
        let inline = InlineBackend.transform_points(points, matrix, 1).await;
        assert_eq!(pooled, inline);
    }
}
