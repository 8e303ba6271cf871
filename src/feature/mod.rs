//! Vector feature construction and incremental delivery.
//!
//! A *feature* is the renderable form of one annotation: an id, a typed
//! geometry in display coordinates, and one named scalar property per
//! aligned measurement value. Features are built per group, synchronously
//! for small groups and in cooperatively yielded chunks for large ones, and
//! flow to the rendering sink through a debounced batcher.

pub mod batch;
pub mod builder;

pub use batch::{FeatureBatcher, FeatureSink};
pub use builder::{BuildOptions, FeatureBuilder, ViewportBounds};

/// Typed geometry of one feature, in display coordinates.
#[derive(Debug, Clone, PartialEq)]
pub enum FeatureGeometry {
    /// A single point
    Point([f64; 3]),

    /// An open polyline
    LineString(Vec<[f64; 3]>),

    /// A closed ring (first vertex repeated at the end)
    Polygon(Vec<[f64; 3]>),
}

/// One renderable annotation.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    /// `<groupUID>-<annotationIndex>`
    pub id: String,

    /// UID of the owning annotation group
    pub group_uid: String,

    /// Geometry in display coordinates
    pub geometry: FeatureGeometry,

    /// `measurementValue{k}` → value, one entry per aligned series
    pub properties: Vec<(String, f64)>,
}

impl FeatureRecord {
    /// Compose the feature id for an annotation of a group.
    pub fn feature_id(group_uid: &str, annotation_index: usize) -> String {
        format!("{group_uid}-{annotation_index}")
    }
}
