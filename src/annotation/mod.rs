//! Annotation group metadata and bulk payload model.
//!
//! An annotation group is a named collection of same-type graphical
//! annotations distributed with an image series. The compact metadata
//! descriptor ([`AnnotationGroup`]) is parsed once from the archive and never
//! mutated; the large coordinate payloads are referenced out-of-line and
//! fetched on demand as [`buffers::GraphicDataBuffer`] /
//! [`buffers::GraphicIndexBuffer`] views.

pub mod buffers;
pub mod derive;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::AnnotationError;

pub use buffers::{FloatPrecision, GraphicDataBuffer, GraphicIndexBuffer, MeasurementValueBuffer};

// =============================================================================
// Graphic & Coordinate Types
// =============================================================================

/// Geometric primitive kind of every annotation in a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GraphicType {
    Point,
    Polyline,
    Polygon,
    Rectangle,
    Ellipse,
}

impl GraphicType {
    /// Fixed-length types store a constant number of points per annotation
    /// and need no graphic index buffer.
    pub fn is_fixed_length(self) -> bool {
        !matches!(self, GraphicType::Polygon | GraphicType::Polyline)
    }

    /// Points per annotation for fixed-length types.
    pub fn points_per_annotation(self) -> Option<usize> {
        match self {
            GraphicType::Point => Some(1),
            GraphicType::Rectangle | GraphicType::Ellipse => Some(4),
            GraphicType::Polygon | GraphicType::Polyline => None,
        }
    }

    /// Whether an annotation of this type spans more than one point.
    pub fn is_multi_point(self) -> bool {
        !matches!(self, GraphicType::Point)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GraphicType::Point => "POINT",
            GraphicType::Polyline => "POLYLINE",
            GraphicType::Polygon => "POLYGON",
            GraphicType::Rectangle => "RECTANGLE",
            GraphicType::Ellipse => "ELLIPSE",
        }
    }
}

impl fmt::Display for GraphicType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GraphicType {
    type Err = AnnotationError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag {
            "POINT" => Ok(GraphicType::Point),
            "POLYLINE" => Ok(GraphicType::Polyline),
            "POLYGON" => Ok(GraphicType::Polygon),
            "RECTANGLE" => Ok(GraphicType::Rectangle),
            "ELLIPSE" => Ok(GraphicType::Ellipse),
            other => Err(AnnotationError::UnsupportedGraphicType(other.to_string())),
        }
    }
}

/// Coordinate space the stored points live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoordinateType {
    /// (column, row) positions on the full-resolution pixel matrix
    #[serde(rename = "2D")]
    Image2D,

    /// (x, y, z) millimeter positions in the slide frame of reference
    #[serde(rename = "3D")]
    Slide3D,
}

// =============================================================================
// Metadata Descriptors
// =============================================================================

/// A coded concept: value, coding scheme, and human-readable meaning.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodedConcept {
    pub value: String,
    pub scheme_designator: String,
    pub meaning: String,
}

impl CodedConcept {
    pub fn new(
        value: impl Into<String>,
        scheme_designator: impl Into<String>,
        meaning: impl Into<String>,
    ) -> Self {
        Self {
            value: value.into(),
            scheme_designator: scheme_designator.into(),
            meaning: meaning.into(),
        }
    }
}

/// Identification of the algorithm that produced a group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlgorithmIdentification {
    pub algorithm_type: String,
    pub name: String,
}

/// Reference to an out-of-line binary payload in the archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkDataReference {
    pub uri: String,
}

/// Where a payload can be obtained: carried inline in the metadata, or
/// referenced out-of-line for on-demand retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PayloadSource {
    Inline(#[serde(with = "serde_bytes_b64")] Bytes),
    Bulk(BulkDataReference),
}

/// Base64 wire form for inline payloads, matching how archives inline small
/// binary fields into metadata documents.
mod serde_bytes_b64 {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use bytes::Bytes;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let s = String::deserialize(deserializer)?;
        let decoded = STANDARD.decode(&s).map_err(serde::de::Error::custom)?;
        Ok(Bytes::from(decoded))
    }
}

/// Immutable descriptor of one annotation group, created once from archive
/// metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationGroup {
    /// Unique identifier of the group
    pub uid: String,

    /// Ordinal number of the group within its annotation object
    pub number: u32,

    /// Human-readable label
    pub label: String,

    /// What category of property the annotations describe
    pub property_category: CodedConcept,

    /// The specific property type
    pub property_type: CodedConcept,

    /// Algorithm that generated the annotations
    pub algorithm: AlgorithmIdentification,

    pub study_instance_uid: String,
    pub series_instance_uid: String,
    pub sop_instance_uids: Vec<String>,

    /// Geometric primitive kind shared by every annotation in the group
    pub graphic_type: GraphicType,

    /// Coordinate space of the stored points
    pub coordinate_type: CoordinateType,

    /// Total number of annotations in the group
    pub number_of_annotations: usize,

    /// Float width of the coordinate payload (selected by which of the two
    /// mutually exclusive metadata fields is present)
    pub precision: FloatPrecision,

    /// Shared Z coordinate when every point carries the same one
    pub common_z: Option<f64>,

    /// Coordinate payload: inline or referenced out-of-line
    pub graphic_data: Option<PayloadSource>,

    /// Per-annotation offsets for variable-length graphic types
    pub graphic_index: Option<PayloadSource>,

    /// Measurement payload descriptors attached to the group
    pub measurements: Vec<MeasurementDescriptor>,
}

impl AnnotationGroup {
    /// Coordinate components per point implied by the coordinate type.
    pub fn dimensionality(&self) -> usize {
        match self.coordinate_type {
            CoordinateType::Image2D => 2,
            CoordinateType::Slide3D => 3,
        }
    }

    /// Whether this group's graphic type requires a graphic index buffer.
    pub fn requires_index(&self) -> bool {
        !self.graphic_type.is_fixed_length()
    }
}

impl FloatPrecision {
    fn as_bits(self) -> u8 {
        match self {
            FloatPrecision::F32 => 32,
            FloatPrecision::F64 => 64,
        }
    }

    fn from_bits(bits: u8) -> Result<Self, String> {
        match bits {
            32 => Ok(FloatPrecision::F32),
            64 => Ok(FloatPrecision::F64),
            other => Err(format!("unsupported float width: {other}")),
        }
    }
}

impl Serialize for FloatPrecision {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.as_bits())
    }
}

impl<'de> Deserialize<'de> for FloatPrecision {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u8::deserialize(deserializer)?;
        FloatPrecision::from_bits(bits).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Measurements
// =============================================================================

/// Metadata descriptor for one measurement series attached to a group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeasurementDescriptor {
    /// Concept the values quantify (e.g. area, cell count)
    pub name: CodedConcept,

    /// Value payload (one float per covered annotation)
    pub values: PayloadSource,

    /// Optional 1-based annotation indices when the series covers a subset
    pub indices: Option<PayloadSource>,
}

/// A fully materialized measurement series: named values aligned to
/// annotation indices.
#[derive(Debug, Clone)]
pub struct MeasurementSeries {
    name: CodedConcept,
    values: MeasurementValueBuffer,
    /// Maps 0-based annotation index → position in `values`
    index_map: Option<HashMap<usize, usize>>,
}

impl MeasurementSeries {
    /// Build a series from decoded buffers.
    ///
    /// `indices`, when present, holds 1-based annotation indices: entry `k`
    /// assigns `values[k]` to annotation `indices[k] - 1`.
    pub fn new(
        name: CodedConcept,
        values: MeasurementValueBuffer,
        indices: Option<&GraphicIndexBuffer>,
    ) -> Result<Self, AnnotationError> {
        let index_map = match indices {
            Some(idx) => {
                // Entry k assigns values[k]; the buffers must line up.
                if idx.len() > values.len() {
                    return Err(AnnotationError::MalformedMetadata {
                        reason: format!(
                            "measurement subset has {} indices but only {} values",
                            idx.len(),
                            values.len()
                        ),
                    });
                }
                let mut map = HashMap::with_capacity(idx.len());
                for k in 0..idx.len() {
                    let raw = idx.offset_of(k)?;
                    if raw < 1 {
                        return Err(AnnotationError::MalformedMetadata {
                            reason: format!("measurement index entry {k} is {raw}; 1-based"),
                        });
                    }
                    map.insert((raw - 1) as usize, k);
                }
                Some(map)
            }
            None => None,
        };
        Ok(Self {
            name,
            values,
            index_map,
        })
    }

    pub fn name(&self) -> &CodedConcept {
        &self.name
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// All stored values widened to f64 (for statistics computation).
    pub fn values(&self) -> Vec<f64> {
        (0..self.values.len()).map(|i| self.values.value(i)).collect()
    }

    /// The value assigned to a 0-based annotation index, resolving through
    /// the subset mapping when present.
    pub fn value_for_annotation(&self, annotation_index: usize) -> Option<f64> {
        match &self.index_map {
            Some(map) => map
                .get(&annotation_index)
                .map(|&pos| self.values.value(pos)),
            None => {
                if annotation_index < self.values.len() {
                    Some(self.values.value(annotation_index))
                } else {
                    None
                }
            }
        }
    }
}

/// Raw per-group payloads after retrieval, cached immutably per group UID.
#[derive(Debug, Clone)]
pub struct BulkAnnotationBuffers {
    pub graphic_data: GraphicDataBuffer,
    pub graphic_index: Option<GraphicIndexBuffer>,
    pub measurements: Vec<MeasurementSeries>,
}
