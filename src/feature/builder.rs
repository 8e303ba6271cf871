//! Per-group feature construction.
//!
//! The builder slices each annotation's coordinates out of the raw buffers,
//! maps them through the coordinate transforms, and produces one
//! [`FeatureRecord`] per visible annotation:
//!
//! 1. Source points in pixel-matrix space (`2D` groups) are first mapped to
//!    slide space through the source image's forward transform; `3D` groups
//!    already store slide coordinates.
//! 2. Slide coordinates map into display space through the inverse of the
//!    rendered image's transform.
//!
//! Above a resolution threshold, multi-point annotations are viewport
//! culled before their full geometry is constructed: only the first
//! coordinate is computed and tested against the viewport box, once as
//! given and once with its corners swapped, to tolerate axis inversion from
//! image rotation.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::annotation::{AnnotationGroup, BulkAnnotationBuffers, CoordinateType, GraphicType};
use crate::error::{AnnotationError, ProcessError};
use crate::transform::{apply_inverse_transform, apply_transform, AffineTransform};

use super::batch::FeatureBatcher;
use super::{FeatureGeometry, FeatureRecord};

/// Vertices in an ellipse's polygon approximation (excluding the closing
/// vertex).
const ELLIPSE_POLYGON_VERTICES: usize = 32;

/// Viewport bounding box in slide coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ViewportBounds {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl ViewportBounds {
    /// Membership test against the box exactly as given (no min/max
    /// normalization; see the two-pass check in the builder).
    fn contains(&self, point: [f64; 2]) -> bool {
        point[0] >= self.x1 && point[0] <= self.x2 && point[1] >= self.y1 && point[1] <= self.y2
    }

    /// The same box with its corners swapped, matching what an axis
    /// inversion from image rotation produces.
    fn corners_swapped(&self) -> Self {
        Self {
            x1: self.x2,
            y1: self.y2,
            x2: self.x1,
            y2: self.y1,
        }
    }
}

/// Per-build view parameters.
#[derive(Debug, Clone, Copy)]
pub struct BuildOptions {
    /// Current viewport in slide coordinates; `None` disables culling
    pub viewport: Option<ViewportBounds>,

    /// Rendered resolution (display pixels per slide unit)
    pub resolution: f64,

    /// Resolution above which culling activates
    pub culling_resolution_threshold: f64,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            viewport: None,
            resolution: 0.0,
            culling_resolution_threshold: 0.25,
        }
    }
}

/// Builds vector features for one annotation group.
pub struct FeatureBuilder {
    group: Arc<AnnotationGroup>,
    buffers: Arc<BulkAnnotationBuffers>,

    /// Forward transform of the annotation's source image; required for
    /// pixel-space (`2D`) groups
    pixel_to_slide: Option<AffineTransform>,

    /// Transform of the rendered image; its inverse maps slide → display
    display: AffineTransform,

    options: BuildOptions,
}

impl FeatureBuilder {
    pub fn new(
        group: Arc<AnnotationGroup>,
        buffers: Arc<BulkAnnotationBuffers>,
        pixel_to_slide: Option<AffineTransform>,
        display: AffineTransform,
        options: BuildOptions,
    ) -> Result<Self, ProcessError> {
        if group.coordinate_type == CoordinateType::Image2D && pixel_to_slide.is_none() {
            return Err(AnnotationError::MalformedMetadata {
                reason: format!(
                    "group {} stores pixel-matrix coordinates but no source transform is available",
                    group.uid
                ),
            }
            .into());
        }
        if group.requires_index() && buffers.graphic_index.is_none() {
            return Err(AnnotationError::MissingBulkData {
                field: "LongPrimitivePointIndexList",
                graphic_type: group.graphic_type.as_str(),
            }
            .into());
        }
        Ok(Self {
            group,
            buffers,
            pixel_to_slide,
            display,
            options,
        })
    }

    /// Slide-space coordinates of the point at `element_offset`.
    fn slide_coordinates(&self, element_offset: usize) -> Result<[f64; 3], AnnotationError> {
        let raw = self.buffers.graphic_data.coordinates_at(element_offset)?;
        match (self.group.coordinate_type, &self.pixel_to_slide) {
            (CoordinateType::Image2D, Some(t)) => {
                let mapped = apply_transform([raw[0], raw[1]], &t.matrix);
                Ok([mapped[0], mapped[1], raw[2]])
            }
            _ => Ok(raw),
        }
    }

    /// Map a slide-space point into display space.
    fn display_point(&self, slide: [f64; 3]) -> [f64; 3] {
        let mapped = apply_inverse_transform([slide[0], slide[1]], &self.display.inverse);
        [mapped[0], mapped[1], slide[2]]
    }

    /// Element range `[start, end)` of annotation `index` in the graphic
    /// data buffer.
    fn element_range(&self, index: usize) -> Result<(usize, usize), AnnotationError> {
        let dim = self.buffers.graphic_data.dimensionality();
        match self.group.graphic_type.points_per_annotation() {
            Some(points) => {
                let start = index * dim * points;
                Ok((start, start + dim * points))
            }
            None => {
                // Checked at construction.
                let graphic_index = self.buffers.graphic_index.as_ref().ok_or(
                    AnnotationError::MissingBulkData {
                        field: "LongPrimitivePointIndexList",
                        graphic_type: self.group.graphic_type.as_str(),
                    },
                )?;
                graphic_index.element_range(index, self.buffers.graphic_data.len())
            }
        }
    }

    /// Whether culling is active for this build.
    fn culling_active(&self) -> bool {
        self.options.viewport.is_some()
            && self.group.graphic_type.is_multi_point()
            && self.options.resolution > self.options.culling_resolution_threshold
    }

    /// Two-pass viewport test on the annotation's first coordinate.
    fn is_visible(&self, index: usize) -> Result<bool, AnnotationError> {
        let Some(viewport) = self.options.viewport else {
            return Ok(true);
        };
        let (start, _) = self.element_range(index)?;
        let slide = self.slide_coordinates(start)?;
        let point = [slide[0], slide[1]];
        Ok(viewport.contains(point) || viewport.corners_swapped().contains(point))
    }

    /// Build one feature, or `None` when the annotation is culled.
    pub fn build_feature(&self, index: usize) -> Result<Option<FeatureRecord>, ProcessError> {
        if index >= self.group.number_of_annotations {
            return Err(AnnotationError::IndexOutOfBounds {
                index,
                count: self.group.number_of_annotations,
            }
            .into());
        }

        if self.culling_active() && !self.is_visible(index)? {
            return Ok(None);
        }

        let (start, end) = self.element_range(index)?;
        let geometry = self.build_geometry(start, end)?;

        let mut properties = Vec::with_capacity(self.buffers.measurements.len());
        for (k, series) in self.buffers.measurements.iter().enumerate() {
            if let Some(value) = series.value_for_annotation(index) {
                properties.push((format!("measurementValue{k}"), value));
            }
        }

        Ok(Some(FeatureRecord {
            id: FeatureRecord::feature_id(&self.group.uid, index),
            group_uid: self.group.uid.clone(),
            geometry,
            properties,
        }))
    }

    fn build_geometry(
        &self,
        start: usize,
        end: usize,
    ) -> Result<FeatureGeometry, AnnotationError> {
        let dim = self.buffers.graphic_data.dimensionality();
        match self.group.graphic_type {
            GraphicType::Point => {
                let slide = self.slide_coordinates(start)?;
                Ok(FeatureGeometry::Point(self.display_point(slide)))
            }

            GraphicType::Polyline => {
                let points = self.mapped_vertices(start, end, dim)?;
                Ok(FeatureGeometry::LineString(points))
            }

            GraphicType::Polygon => {
                let mut points = self.mapped_vertices(start, end, dim)?;
                if points.first() != points.last() {
                    if let Some(first) = points.first().copied() {
                        points.push(first);
                    }
                }
                Ok(FeatureGeometry::Polygon(points))
            }

            GraphicType::Rectangle => {
                let mut points = self.mapped_vertices(start, end, dim)?;
                if let Some(first) = points.first().copied() {
                    points.push(first);
                }
                Ok(FeatureGeometry::Polygon(points))
            }

            GraphicType::Ellipse => {
                let endpoints = self.mapped_vertices(start, end, dim)?;
                if endpoints.len() != 4 {
                    return Err(AnnotationError::MalformedMetadata {
                        reason: format!(
                            "ellipse annotation stores {} points, expected 4",
                            endpoints.len()
                        ),
                    });
                }
                Ok(ellipse_polygon(&endpoints))
            }
        }
    }

    /// Map every vertex in `[start, end)` into display space.
    fn mapped_vertices(
        &self,
        start: usize,
        end: usize,
        dim: usize,
    ) -> Result<Vec<[f64; 3]>, AnnotationError> {
        let mut points = Vec::with_capacity((end - start) / dim);
        let mut offset = start;
        while offset + dim <= end {
            let slide = self.slide_coordinates(offset)?;
            points.push(self.display_point(slide));
            offset += dim;
        }
        if points.is_empty() {
            return Err(AnnotationError::MalformedMetadata {
                reason: format!("annotation has no vertices in slice [{start}, {end})"),
            });
        }
        Ok(points)
    }

    /// Build every feature in one pass.
    ///
    /// All-or-nothing: the first extraction error aborts the build and no
    /// features are returned.
    pub fn build_sync(&self) -> Result<Vec<FeatureRecord>, ProcessError> {
        let total = self.group.number_of_annotations;
        let mut features = Vec::with_capacity(total);
        for index in 0..total {
            if let Some(feature) = self.build_feature(index)? {
                features.push(feature);
            }
        }
        debug!(
            group_uid = %self.group.uid,
            built = features.len(),
            total,
            "synchronous build complete"
        );
        Ok(features)
    }

    /// Build in chunks, yielding to the scheduler between chunks and
    /// delivering each chunk's features through the batcher.
    ///
    /// `progress` is invoked after every chunk with
    /// `(processed, total)` annotation counts. Returns the number of
    /// features delivered. On error the caller owns cleanup (whole-group
    /// invalidation at the sink); no further chunks are delivered.
    pub async fn build_chunked<P>(
        &self,
        chunk_size: usize,
        batcher: &FeatureBatcher,
        progress: P,
    ) -> Result<usize, ProcessError>
    where
        P: Fn(usize, usize) + Send + Sync,
    {
        let total = self.group.number_of_annotations;
        let chunk_size = chunk_size.max(1);
        let mut delivered = 0usize;
        let mut processed = 0usize;

        while processed < total {
            let chunk_end = (processed + chunk_size).min(total);
            let mut chunk = Vec::with_capacity(chunk_end - processed);
            for index in processed..chunk_end {
                if let Some(feature) = self.build_feature(index)? {
                    chunk.push(feature);
                }
            }
            delivered += chunk.len();
            if !batcher.push(chunk).await {
                warn!(group_uid = %self.group.uid, "feature sink gone, stopping chunked build");
                return Ok(delivered);
            }

            processed = chunk_end;
            progress(processed, total);
            tokio::task::yield_now().await;
        }

        debug!(
            group_uid = %self.group.uid,
            delivered,
            total,
            "chunked build complete"
        );
        Ok(delivered)
    }
}

/// Approximate an ellipse by a closed polygon from its two axis endpoint
/// pairs (major first).
fn ellipse_polygon(endpoints: &[[f64; 3]]) -> FeatureGeometry {
    let center = [
        (endpoints[0][0] + endpoints[1][0]) / 2.0,
        (endpoints[0][1] + endpoints[1][1]) / 2.0,
    ];
    let semi_major = [
        (endpoints[1][0] - endpoints[0][0]) / 2.0,
        (endpoints[1][1] - endpoints[0][1]) / 2.0,
    ];
    let semi_minor = [
        (endpoints[3][0] - endpoints[2][0]) / 2.0,
        (endpoints[3][1] - endpoints[2][1]) / 2.0,
    ];
    let z = endpoints[0][2];

    let mut ring = Vec::with_capacity(ELLIPSE_POLYGON_VERTICES + 1);
    for k in 0..ELLIPSE_POLYGON_VERTICES {
        let t = 2.0 * std::f64::consts::PI * (k as f64) / (ELLIPSE_POLYGON_VERTICES as f64);
        ring.push([
            center[0] + semi_major[0] * t.cos() + semi_minor[0] * t.sin(),
            center[1] + semi_major[1] * t.cos() + semi_minor[1] * t.sin(),
            z,
        ]);
    }
    ring.push(ring[0]);
    FeatureGeometry::Polygon(ring)
}
