//! End-to-end pipeline tests: fetch → decode → build → deliver.

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::Bytes;

use wsi_annotations::{
    AnnotationError, AnnotationProcessor, CodedConcept, FeatureGeometry, FetchError, InlineBackend,
    MeasurementDescriptor, PayloadSource, ProcessError, ProcessorConfig, RetryConfig,
    SeriesStatistics, TaskError,
};

use super::test_utils::{
    bulk, encode_f64, encode_i32, init_tracing, point_group, polygon_group, slide_request,
    RecordingSink, TrackingMockClient,
};

fn processor(
    client: Arc<TrackingMockClient>,
    sink: Arc<RecordingSink>,
    config: ProcessorConfig,
) -> AnnotationProcessor {
    init_tracing();
    AnnotationProcessor::new(client, sink, Arc::new(InlineBackend), config)
}

fn fast_retry() -> RetryConfig {
    RetryConfig {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
    }
}

/// Chunked-path config: everything builds asynchronously in small chunks.
fn chunked_config(chunk_size: usize) -> ProcessorConfig {
    ProcessorConfig {
        sync_threshold: 0,
        chunk_size,
        debounce_window: Duration::from_millis(1),
        retry: fast_retry(),
        ..ProcessorConfig::default()
    }
}

// =============================================================================
// End-to-End Builds
// =============================================================================

#[tokio::test]
async fn test_point_group_end_to_end() {
    let coordinates = encode_f64(&[1.0, 2.0, 0.0, 3.0, 4.0, 0.0, 5.0, 6.0, 0.0]);
    let client = Arc::new(TrackingMockClient::new().with_payload("s3://bulk/points", coordinates));
    let sink = Arc::new(RecordingSink::new());
    let processor = processor(client.clone(), sink.clone(), ProcessorConfig::default());

    let group = point_group("1.2.3.4", 3, bulk("s3://bulk/points"));
    let handle = processor.load_bulk_annotations(slide_request(group)).await;
    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.group_uid, "1.2.3.4");
    assert_eq!(summary.feature_count, 3);
    assert!(summary.statistics.is_empty());

    let features = sink.features().await;
    assert_eq!(features.len(), 3);
    assert_eq!(features[0].id, "1.2.3.4-0");
    assert_eq!(features[0].geometry, FeatureGeometry::Point([1.0, 2.0, 0.0]));
    assert_eq!(features[2].geometry, FeatureGeometry::Point([5.0, 6.0, 0.0]));
}

#[tokio::test]
async fn test_polygon_group_end_to_end() {
    // Two triangles, 3D vertices, 1-based element offsets.
    let coordinates = encode_f64(&[
        0.0, 0.0, 0.0, 4.0, 0.0, 0.0, 0.0, 3.0, 0.0, // first
        10.0, 10.0, 0.0, 14.0, 10.0, 0.0, 10.0, 13.0, 0.0, // second
    ]);
    let index = encode_i32(&[1, 10]);
    let client = Arc::new(
        TrackingMockClient::new()
            .with_payload("s3://bulk/polys", coordinates)
            .with_payload("s3://bulk/polys-index", index),
    );
    let sink = Arc::new(RecordingSink::new());
    let processor = processor(client.clone(), sink.clone(), ProcessorConfig::default());

    let group = polygon_group(
        "1.2.3.5",
        2,
        bulk("s3://bulk/polys"),
        bulk("s3://bulk/polys-index"),
    );
    let summary = processor
        .load_bulk_annotations(slide_request(group))
        .await
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.feature_count, 2);

    let features = sink.features().await;
    match &features[1].geometry {
        FeatureGeometry::Polygon(ring) => {
            assert_eq!(ring.len(), 4);
            assert_eq!(ring.first(), ring.last());
            assert_eq!(ring[0], [10.0, 10.0, 0.0]);
        }
        other => panic!("expected polygon, got {other:?}"),
    }
}

// =============================================================================
// Caching
// =============================================================================

#[tokio::test]
async fn test_repeat_load_issues_single_fetch() {
    let coordinates = encode_f64(&[1.0, 2.0, 0.0, 3.0, 4.0, 0.0]);
    let client = Arc::new(TrackingMockClient::new().with_payload("s3://bulk/points", coordinates));
    let sink = Arc::new(RecordingSink::new());
    let processor = processor(client.clone(), sink.clone(), ProcessorConfig::default());

    let group = point_group("1.2.3.4", 2, bulk("s3://bulk/points"));
    let first = processor
        .load_bulk_annotations(slide_request(group.clone()))
        .await
        .wait()
        .await
        .unwrap();
    let second = processor
        .load_bulk_annotations(slide_request(group))
        .await
        .wait()
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(client.requests_for("s3://bulk/points"), 1);
    assert!(processor.cache().contains("1.2.3.4").await);
}

#[tokio::test]
async fn test_invalidation_retracts_features_and_drops_cache() {
    let coordinates = encode_f64(&[1.0, 2.0, 0.0]);
    let client = Arc::new(TrackingMockClient::new().with_payload("s3://bulk/points", coordinates));
    let sink = Arc::new(RecordingSink::new());
    let processor = processor(client.clone(), sink.clone(), ProcessorConfig::default());

    let group = point_group("1.2.3.4", 1, bulk("s3://bulk/points"));
    processor
        .load_bulk_annotations(slide_request(group.clone()))
        .await
        .wait()
        .await
        .unwrap();
    assert_eq!(sink.features().await.len(), 1);

    processor.invalidate_group("1.2.3.4").await;
    assert!(sink.features().await.is_empty());
    assert_eq!(sink.removals().await, vec!["1.2.3.4".to_string()]);
    assert!(!processor.cache().contains("1.2.3.4").await);

    // Next load fetches again.
    processor
        .load_bulk_annotations(slide_request(group))
        .await
        .wait()
        .await
        .unwrap();
    assert_eq!(client.requests_for("s3://bulk/points"), 2);
}

// =============================================================================
// Retry and Failure Isolation
// =============================================================================

#[tokio::test]
async fn test_transient_fetch_failures_recover() {
    let coordinates = encode_f64(&[1.0, 2.0, 0.0]);
    let client = Arc::new(
        TrackingMockClient::new()
            .with_payload("s3://bulk/points", coordinates)
            .with_transient_failures("s3://bulk/points", 2),
    );
    let sink = Arc::new(RecordingSink::new());
    let config = ProcessorConfig {
        retry: fast_retry(),
        ..ProcessorConfig::default()
    };
    let processor = processor(client.clone(), sink.clone(), config);

    let group = point_group("1.2.3.4", 1, bulk("s3://bulk/points"));
    let summary = processor
        .load_bulk_annotations(slide_request(group))
        .await
        .wait()
        .await
        .unwrap();

    assert_eq!(summary.feature_count, 1);
    assert_eq!(client.requests_for("s3://bulk/points"), 3);
}

#[tokio::test]
async fn test_failed_group_does_not_disturb_siblings() {
    let coordinates = encode_f64(&[1.0, 2.0, 0.0]);
    let client = Arc::new(TrackingMockClient::new().with_payload("s3://bulk/good", coordinates));
    let sink = Arc::new(RecordingSink::new());
    let processor = processor(client.clone(), sink.clone(), ProcessorConfig::default());

    let bad = point_group("bad-group", 1, bulk("s3://bulk/missing"));
    let good = point_group("good-group", 1, bulk("s3://bulk/good"));
    let bad_handle = processor.load_bulk_annotations(slide_request(bad)).await;
    let good_handle = processor.load_bulk_annotations(slide_request(good)).await;

    assert!(matches!(
        bad_handle.wait().await,
        Err(TaskError::Failed(ProcessError::Fetch(FetchError::NotFound(_))))
    ));
    let summary = good_handle.wait().await.unwrap();
    assert_eq!(summary.feature_count, 1);

    let features = sink.features().await;
    assert_eq!(features.len(), 1);
    assert_eq!(features[0].group_uid, "good-group");
}

// =============================================================================
// Chunked Builds
// =============================================================================

#[tokio::test]
async fn test_chunked_build_delivers_everything_with_progress() {
    let coordinates: Vec<f64> = (0..36).map(|i| i as f64).collect();
    let client = Arc::new(
        TrackingMockClient::new().with_payload("s3://bulk/points", encode_f64(&coordinates)),
    );
    let sink = Arc::new(RecordingSink::new());
    let processor = processor(client.clone(), sink.clone(), chunked_config(5));

    let progress = Arc::new(StdMutex::new(Vec::new()));
    let recorder = Arc::clone(&progress);
    let mut request = slide_request(point_group("1.2.3.4", 12, bulk("s3://bulk/points")));
    request.progress = Some(Arc::new(move |done, total| {
        recorder.lock().unwrap().push((done, total));
    }));

    let summary = processor
        .load_bulk_annotations(request)
        .await
        .wait()
        .await
        .unwrap();
    assert_eq!(summary.feature_count, 12);

    let features = sink.features().await;
    assert_eq!(features.len(), 12);
    let mut ids: Vec<_> = features.iter().map(|f| f.id.clone()).collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 12);

    assert_eq!(*progress.lock().unwrap(), vec![(5, 12), (10, 12), (12, 12)]);
}

#[tokio::test]
async fn test_failed_chunked_build_retracts_partial_delivery() {
    // Group claims 10 annotations but the payload holds only 5 points, so
    // the build fails midway through.
    let coordinates: Vec<f64> = (0..15).map(|i| i as f64).collect();
    let client = Arc::new(
        TrackingMockClient::new().with_payload("s3://bulk/truncated", encode_f64(&coordinates)),
    );
    let sink = Arc::new(RecordingSink::new());
    let processor = processor(client.clone(), sink.clone(), chunked_config(2));

    let group = point_group("1.2.3.4", 10, bulk("s3://bulk/truncated"));
    let result = processor
        .load_bulk_annotations(slide_request(group))
        .await
        .wait()
        .await;

    assert!(matches!(
        result,
        Err(TaskError::Failed(ProcessError::Annotation(
            AnnotationError::IndexOutOfBounds { .. }
        )))
    ));
    assert!(sink.features().await.is_empty());
    assert_eq!(sink.removals().await, vec!["1.2.3.4".to_string()]);
}

// =============================================================================
// Measurements
// =============================================================================

#[tokio::test]
async fn test_inline_group_with_measurements_needs_no_client() {
    let mut group = point_group(
        "1.2.3.4",
        3,
        PayloadSource::Inline(encode_f64(&[1.0, 2.0, 0.0, 3.0, 4.0, 0.0, 5.0, 6.0, 0.0])),
    );
    group.measurements.push(MeasurementDescriptor {
        name: CodedConcept::new("42798000", "SCT", "Area"),
        values: PayloadSource::Inline(encode_f64(&[0.25, 0.75, 0.5])),
        indices: None,
    });

    let client = Arc::new(TrackingMockClient::new());
    let sink = Arc::new(RecordingSink::new());
    let processor = processor(client.clone(), sink.clone(), ProcessorConfig::default());

    let summary = processor
        .load_bulk_annotations(slide_request(group))
        .await
        .wait()
        .await
        .unwrap();

    assert_eq!(client.request_count(), 0);
    assert_eq!(summary.statistics.len(), 1);
    assert_eq!(summary.statistics[0].name.meaning, "Area");
    assert_eq!(
        summary.statistics[0].statistics,
        SeriesStatistics { min: 0.25, max: 0.75 }
    );

    let features = sink.features().await;
    assert_eq!(features[0].properties, vec![("measurementValue0".to_string(), 0.25)]);
    assert_eq!(features[1].properties, vec![("measurementValue0".to_string(), 0.75)]);
}
