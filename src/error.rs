use thiserror::Error;

/// Errors from building or applying affine coordinate transforms
#[derive(Debug, Clone, Error)]
pub enum TransformError {
    /// The orientation/spacing combination has no inverse
    #[error("Singular transform: orientation/spacing matrix is not invertible (det = {determinant})")]
    Singular { determinant: f64 },
}

/// Errors from decoding annotation metadata and bulk buffers
#[derive(Debug, Clone, Error)]
pub enum AnnotationError {
    /// A graphic type mandates an out-of-line field that is absent
    /// (e.g. POLYGON without a graphic index list)
    #[error("Missing bulk data: {field} is required for graphic type {graphic_type}")]
    MissingBulkData {
        field: &'static str,
        graphic_type: &'static str,
    },

    /// Neither an inline nor a bulk field is present where one is required
    #[error("Malformed metadata: {reason}")]
    MalformedMetadata { reason: String },

    /// Graphic type tag is not one of the supported primitives
    #[error("Unsupported graphic type: {0:?}")]
    UnsupportedGraphicType(String),

    /// An annotation index points outside the coordinate buffer
    #[error("Annotation {index} out of bounds: buffer holds {count} annotations")]
    IndexOutOfBounds { index: usize, count: usize },
}

/// Errors from retrieving bulk data payloads.
///
/// Transient variants are retried with capped exponential backoff;
/// everything else fails the owning task on first occurrence.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Network or connection failure (retryable)
    #[error("Connection error: {0}")]
    Connection(String),

    /// Request timed out (retryable)
    #[error("Timeout retrieving {0}")]
    Timeout(String),

    /// Server-side failure, HTTP 5xx class (retryable)
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Referenced bulk data does not exist
    #[error("Bulk data not found: {0}")]
    NotFound(String),

    /// Client-side failure, HTTP 4xx class other than 404
    #[error("Rejected ({status}): {message}")]
    Rejected { status: u16, message: String },
}

impl FetchError {
    /// Whether this failure class is worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FetchError::Connection(_) | FetchError::Timeout(_) | FetchError::Server { .. }
        )
    }
}

/// Errors surfaced through task completion handles
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// Task was cancelled before or between processor runs
    #[error("Task {0} cancelled")]
    Cancelled(u64),

    /// The owning queue was dropped before the task settled
    #[error("Queue shut down before task {0} settled")]
    QueueClosed(u64),

    /// The processor failed (after exhausting any retries)
    #[error(transparent)]
    Failed(#[from] ProcessError),
}

/// Top-level error for the annotation processing pipeline.
///
/// Only [`ProcessError::Fetch`] with a transient inner error is retryable;
/// geometry, metadata, and transform failures are fatal on first occurrence.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    #[error(transparent)]
    Transform(#[from] TransformError),

    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl ProcessError {
    /// Whether the queue should requeue the owning task.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProcessError::Fetch(e) => e.is_transient(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(FetchError::Connection("reset".into()).is_transient());
        assert!(FetchError::Timeout("uri".into()).is_transient());
        assert!(FetchError::Server {
            status: 503,
            message: "unavailable".into()
        }
        .is_transient());

        assert!(!FetchError::NotFound("uri".into()).is_transient());
        assert!(!FetchError::Rejected {
            status: 403,
            message: "forbidden".into()
        }
        .is_transient());
    }

    #[test]
    fn test_retryability_propagates_through_process_error() {
        let transient: ProcessError = FetchError::Timeout("uri".into()).into();
        assert!(transient.is_retryable());

        let fatal: ProcessError = AnnotationError::MissingBulkData {
            field: "PointIndexList",
            graphic_type: "POLYGON",
        }
        .into();
        assert!(!fatal.is_retryable());

        let singular: ProcessError = TransformError::Singular { determinant: 0.0 }.into();
        assert!(!singular.is_retryable());
    }
}
