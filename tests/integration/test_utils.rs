//! Test utilities for integration tests.
//!
//! This module provides mock implementations and helper functions for
//! building annotation groups with encoded coordinate payloads.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, Once};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::Mutex;

use wsi_annotations::{
    AffineTransform, AlgorithmIdentification, AnnotationGroup, BuildOptions, BulkDataClient,
    BulkDataReference, CodedConcept, CoordinateType, FeatureRecord, FeatureSink, FetchError,
    FloatPrecision, GraphicType, PayloadSource, ProcessRequest, TransformParameters,
};

static TRACING: Once = Once::new();

/// Install a log subscriber honoring `RUST_LOG`, once per test process.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
            )
            .with_test_writer()
            .try_init();
    });
}

// =============================================================================
// Payload Encoding
// =============================================================================

pub fn encode_f64(values: &[f64]) -> Bytes {
    let mut out = Vec::with_capacity(values.len() * 8);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Bytes::from(out)
}

pub fn encode_i32(values: &[i32]) -> Bytes {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Bytes::from(out)
}

// =============================================================================
// Mock Bulk Data Client with Request Tracking
// =============================================================================

/// A mock archive client that serves pre-configured payloads and tracks
/// every request, useful for verifying cache and retry behavior.
#[derive(Default)]
pub struct TrackingMockClient {
    payloads: HashMap<String, Bytes>,
    /// URI → number of transient failures to serve before succeeding
    transient_failures: StdMutex<HashMap<String, u32>>,
    requests: StdMutex<Vec<String>>,
}

impl TrackingMockClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_payload(mut self, uri: impl Into<String>, payload: Bytes) -> Self {
        self.payloads.insert(uri.into(), payload);
        self
    }

    pub fn with_transient_failures(self, uri: impl Into<String>, count: u32) -> Self {
        self.transient_failures.lock().unwrap().insert(uri.into(), count);
        self
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests_for(&self, uri: &str) -> usize {
        self.requests.lock().unwrap().iter().filter(|u| *u == uri).count()
    }
}

#[async_trait]
impl BulkDataClient for TrackingMockClient {
    async fn retrieve_bulk_data(&self, reference: &BulkDataReference) -> Result<Bytes, FetchError> {
        self.requests.lock().unwrap().push(reference.uri.clone());

        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(&reference.uri) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(FetchError::Timeout(reference.uri.clone()));
                }
            }
        }

        self.payloads
            .get(&reference.uri)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(reference.uri.clone()))
    }
}

// =============================================================================
// Recording Feature Sink
// =============================================================================

/// A sink that accumulates delivered features per group, honors group
/// removal, and counts deliveries.
#[derive(Default)]
pub struct RecordingSink {
    features: Mutex<Vec<FeatureRecord>>,
    removals: Mutex<Vec<String>>,
    publishes: AtomicUsize,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn features(&self) -> Vec<FeatureRecord> {
        self.features.lock().await.clone()
    }

    pub async fn removals(&self) -> Vec<String> {
        self.removals.lock().await.clone()
    }

    pub fn publish_count(&self) -> usize {
        self.publishes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeatureSink for RecordingSink {
    async fn publish(&self, features: Vec<FeatureRecord>) {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        self.features.lock().await.extend(features);
    }

    async fn remove_group(&self, group_uid: &str) {
        self.features
            .lock()
            .await
            .retain(|f| f.group_uid != group_uid);
        self.removals.lock().await.push(group_uid.to_string());
    }
}

// =============================================================================
// Group and Request Builders
// =============================================================================

fn base_group(uid: &str, graphic_type: GraphicType, count: usize) -> AnnotationGroup {
    AnnotationGroup {
        uid: uid.to_string(),
        number: 1,
        label: "nuclei".to_string(),
        property_category: CodedConcept::new("91723000", "SCT", "Anatomical structure"),
        property_type: CodedConcept::new("84640000", "SCT", "Nucleus"),
        algorithm: AlgorithmIdentification {
            algorithm_type: "AUTOMATIC".to_string(),
            name: "segmenter".to_string(),
        },
        study_instance_uid: "1.2".to_string(),
        series_instance_uid: "1.2.3".to_string(),
        sop_instance_uids: vec!["1.2.3.4.5".to_string()],
        graphic_type,
        coordinate_type: CoordinateType::Slide3D,
        number_of_annotations: count,
        precision: FloatPrecision::F64,
        common_z: None,
        graphic_data: None,
        graphic_index: None,
        measurements: Vec::new(),
    }
}

/// A 3D point group with the given graphic data source.
pub fn point_group(uid: &str, count: usize, graphic_data: PayloadSource) -> AnnotationGroup {
    let mut group = base_group(uid, GraphicType::Point, count);
    group.graphic_data = Some(graphic_data);
    group
}

/// A 3D polygon group with graphic data and index sources.
pub fn polygon_group(
    uid: &str,
    count: usize,
    graphic_data: PayloadSource,
    graphic_index: PayloadSource,
) -> AnnotationGroup {
    let mut group = base_group(uid, GraphicType::Polygon, count);
    group.graphic_data = Some(graphic_data);
    group.graphic_index = Some(graphic_index);
    group
}

pub fn bulk(uri: &str) -> PayloadSource {
    PayloadSource::Bulk(BulkDataReference {
        uri: uri.to_string(),
    })
}

/// Display transform whose slide → display mapping is the identity.
pub fn identity_transform() -> AffineTransform {
    AffineTransform::new(&TransformParameters {
        offset: [-0.5, -0.5],
        orientation: [1.0, 0.0, 0.0, 0.0, 1.0, 0.0],
        spacing: [1.0, 1.0],
    })
    .unwrap()
}

/// A request with identity display mapping and no viewport culling.
pub fn slide_request(group: AnnotationGroup) -> ProcessRequest {
    ProcessRequest {
        group: Arc::new(group),
        source_transform: None,
        display_transform: identity_transform(),
        build: BuildOptions::default(),
        progress: None,
    }
}
