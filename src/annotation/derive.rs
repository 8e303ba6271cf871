//! Derivation of centroids and areas from raw coordinate buffers.
//!
//! Each graphic type stores its points differently, so derivation dispatches
//! on [`GraphicType`]. Two quirks of the upstream viewer are preserved on
//! purpose (changing them would desynchronize rendered overlays from
//! deployments of the original):
//!
//! - RECTANGLE mixes its corner indices asymmetrically: the y term mirrors
//!   the top-left corner against the bottom-left instead of averaging.
//! - ELLIPSE yields half the *vector* between the major-axis endpoints, not
//!   the midpoint of the axis.

use crate::error::AnnotationError;

use super::buffers::{GraphicDataBuffer, GraphicIndexBuffer};
use super::GraphicType;

/// Reference point for one annotation, derived from its raw coordinates.
///
/// Used for viewport culling and for positioning value-driven markers; not
/// necessarily a true geometric centroid (see the module docs).
pub fn derive_centroid(
    graphic_type: GraphicType,
    data: &GraphicDataBuffer,
    index: Option<&GraphicIndexBuffer>,
    annotation_index: usize,
    number_of_annotations: usize,
) -> Result<[f64; 3], AnnotationError> {
    if annotation_index >= number_of_annotations {
        return Err(AnnotationError::IndexOutOfBounds {
            index: annotation_index,
            count: number_of_annotations,
        });
    }
    let dim = data.dimensionality();

    match graphic_type {
        GraphicType::Point => data.coordinates_at(annotation_index * dim),

        GraphicType::Rectangle => {
            let offset = annotation_index * dim * 4;
            let top_left = data.coordinates_at(offset)?;
            let top_right = data.coordinates_at(offset + dim)?;
            let bottom_left = data.coordinates_at(offset + 3 * dim)?;
            Ok([
                top_left[0] + (top_right[0] - top_left[0]) / 2.0,
                top_left[1] + (top_left[1] - bottom_left[1]) / 2.0,
                top_left[2],
            ])
        }

        GraphicType::Ellipse => {
            let offset = annotation_index * dim * 4;
            let major_start = data.coordinates_at(offset)?;
            let major_end = data.coordinates_at(offset + dim)?;
            Ok([
                (major_end[0] - major_start[0]) / 2.0,
                (major_end[1] - major_start[1]) / 2.0,
                major_start[2],
            ])
        }

        GraphicType::Polygon => {
            let index = index.ok_or(AnnotationError::MissingBulkData {
                field: "LongPrimitivePointIndexList",
                graphic_type: "POLYGON",
            })?;
            let (start, end) = index.element_range(annotation_index, data.len())?;
            polygon_centroid(data, start, end)
        }

        // Open polylines have no defined centroid in the upstream viewer.
        GraphicType::Polyline => Err(AnnotationError::UnsupportedGraphicType(
            GraphicType::Polyline.as_str().to_string(),
        )),
    }
}

/// Shoelace centroid over the vertex slice `[start, end)`.
///
/// Consecutive vertices are one dimensionality stride apart; the last vertex
/// wraps around to the first. Signed area and first-moment sums accumulate
/// in one pass; the centroid is `moment / (6 · area)`.
fn polygon_centroid(
    data: &GraphicDataBuffer,
    start: usize,
    end: usize,
) -> Result<[f64; 3], AnnotationError> {
    let dim = data.dimensionality();
    if end <= start || end - start < dim {
        return Err(AnnotationError::MalformedMetadata {
            reason: format!("empty polygon vertex slice [{start}, {end})"),
        });
    }

    let first = data.coordinates_at(start)?;
    let mut area_sum = 0.0;
    let mut moment_x = 0.0;
    let mut moment_y = 0.0;

    let mut j = start;
    while j < end {
        let p0 = data.coordinates_at(j)?;
        let p1 = if j + dim < end {
            data.coordinates_at(j + dim)?
        } else {
            first
        };
        let cross = p0[0] * p1[1] - p1[0] * p0[1];
        area_sum += cross;
        moment_x += (p0[0] + p1[0]) * cross;
        moment_y += (p0[1] + p1[1]) * cross;
        j += dim;
    }

    let area = area_sum / 2.0;
    if area.abs() < f64::EPSILON {
        // Degenerate ring; the first vertex is the only stable anchor.
        return Ok(first);
    }
    Ok([moment_x / (6.0 * area), moment_y / (6.0 * area), first[2]])
}

/// Unsigned shoelace area of the vertex slice `[start, end)`.
pub fn derive_area(
    data: &GraphicDataBuffer,
    start: usize,
    end: usize,
) -> Result<f64, AnnotationError> {
    let dim = data.dimensionality();
    if end <= start || end - start < dim {
        return Err(AnnotationError::MalformedMetadata {
            reason: format!("empty polygon vertex slice [{start}, {end})"),
        });
    }
    let first = data.coordinates_at(start)?;
    let mut area_sum = 0.0;
    let mut j = start;
    while j < end {
        let p0 = data.coordinates_at(j)?;
        let p1 = if j + dim < end {
            data.coordinates_at(j + dim)?
        } else {
            first
        };
        area_sum += p0[0] * p1[1] - p1[0] * p0[1];
        j += dim;
    }
    Ok((area_sum / 2.0).abs())
}
