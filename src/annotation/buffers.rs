//! Zero-copy views over binary bulk-data payloads.
//!
//! Annotation coordinates arrive as flat little-endian buffers of IEEE-754
//! floats (32- or 64-bit, selected by which metadata field carried the
//! payload); per-annotation offsets arrive as signed 32-bit integers. All
//! views slice the underlying [`Bytes`] by byte offset without copying.

use bytes::Bytes;

use crate::error::AnnotationError;

/// Read a little-endian f32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_f32_le(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Read a little-endian f64 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 8 bytes.
#[inline]
pub fn read_f64_le(bytes: &[u8]) -> f64 {
    f64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ])
}

/// Read a little-endian i32 from a byte slice.
///
/// # Panics
/// Panics if the slice has fewer than 4 bytes.
#[inline]
pub fn read_i32_le(bytes: &[u8]) -> i32 {
    i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Floating point width of a coordinate or measurement payload.
///
/// Selected by which of the two mutually exclusive metadata fields is
/// present on the group (single vs double precision value list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FloatPrecision {
    F32,
    F64,
}

impl FloatPrecision {
    /// Size of one element in bytes.
    #[inline]
    pub fn element_size(self) -> usize {
        match self {
            FloatPrecision::F32 => 4,
            FloatPrecision::F64 => 8,
        }
    }
}

/// Flat numeric buffer of point coordinates for one annotation group.
///
/// Each point has `dimensionality` components (2 or 3). When
/// `common_z` is set, every point shares that Z and the buffer stores only
/// two components per point.
#[derive(Debug, Clone)]
pub struct GraphicDataBuffer {
    data: Bytes,
    precision: FloatPrecision,
    dimensionality: usize,
    common_z: Option<f64>,
}

impl GraphicDataBuffer {
    pub fn new(
        data: Bytes,
        precision: FloatPrecision,
        dimensionality: usize,
        common_z: Option<f64>,
    ) -> Result<Self, AnnotationError> {
        if dimensionality != 2 && dimensionality != 3 {
            return Err(AnnotationError::MalformedMetadata {
                reason: format!("coordinate dimensionality must be 2 or 3, got {dimensionality}"),
            });
        }
        if data.len() % precision.element_size() != 0 {
            return Err(AnnotationError::MalformedMetadata {
                reason: format!(
                    "graphic data length {} is not a multiple of element size {}",
                    data.len(),
                    precision.element_size()
                ),
            });
        }
        Ok(Self {
            data,
            precision,
            dimensionality,
            common_z,
        })
    }

    /// Number of scalar elements in the buffer.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.precision.element_size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Number of coordinate components per point (2 or 3).
    #[inline]
    pub fn dimensionality(&self) -> usize {
        self.dimensionality
    }

    /// Shared Z coordinate, if every point carries the same one.
    #[inline]
    pub fn common_z(&self) -> Option<f64> {
        self.common_z
    }

    /// Number of complete points stored in the buffer.
    #[inline]
    pub fn point_count(&self) -> usize {
        self.len() / self.dimensionality
    }

    /// Scalar element at `index`, widened to f64.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds; callers bound-check against
    /// [`GraphicDataBuffer::len`] when indices come from untrusted input.
    #[inline]
    pub fn value(&self, index: usize) -> f64 {
        let size = self.precision.element_size();
        let start = index * size;
        match self.precision {
            FloatPrecision::F32 => read_f32_le(&self.data[start..start + 4]) as f64,
            FloatPrecision::F64 => read_f64_le(&self.data[start..start + 8]),
        }
    }

    /// The (x, y, z) coordinates of the point whose first component sits at
    /// scalar `element_offset`. Z is substituted from `common_z` for 2-component
    /// layouts and defaults to 0 for plain 2D data.
    pub fn coordinates_at(&self, element_offset: usize) -> Result<[f64; 3], AnnotationError> {
        if element_offset + self.dimensionality > self.len() {
            return Err(AnnotationError::IndexOutOfBounds {
                index: element_offset,
                count: self.len(),
            });
        }
        let x = self.value(element_offset);
        let y = self.value(element_offset + 1);
        let z = if self.dimensionality == 3 {
            self.value(element_offset + 2)
        } else {
            self.common_z.unwrap_or(0.0)
        };
        Ok([x, y, z])
    }
}

/// Flat buffer of scalar measurement values.
#[derive(Debug, Clone)]
pub struct MeasurementValueBuffer {
    data: Bytes,
    precision: FloatPrecision,
}

impl MeasurementValueBuffer {
    pub fn new(data: Bytes, precision: FloatPrecision) -> Result<Self, AnnotationError> {
        if data.len() % precision.element_size() != 0 {
            return Err(AnnotationError::MalformedMetadata {
                reason: format!(
                    "measurement value length {} is not a multiple of element size {}",
                    data.len(),
                    precision.element_size()
                ),
            });
        }
        Ok(Self { data, precision })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / self.precision.element_size()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Value at `index`, widened to f64.
    ///
    /// # Panics
    /// Panics if `index` is out of bounds.
    #[inline]
    pub fn value(&self, index: usize) -> f64 {
        let size = self.precision.element_size();
        let start = index * size;
        match self.precision {
            FloatPrecision::F32 => read_f32_le(&self.data[start..start + 4]) as f64,
            FloatPrecision::F64 => read_f64_le(&self.data[start..start + 8]),
        }
    }
}

/// Optional buffer mapping annotation index → 1-based scalar element offset
/// into the graphic data. Required for variable-length graphic types
/// (POLYGON/POLYLINE); fixed-length types locate points arithmetically.
#[derive(Debug, Clone)]
pub struct GraphicIndexBuffer {
    data: Bytes,
}

impl GraphicIndexBuffer {
    pub fn new(data: Bytes) -> Result<Self, AnnotationError> {
        if data.len() % 4 != 0 {
            return Err(AnnotationError::MalformedMetadata {
                reason: format!("graphic index length {} is not a multiple of 4", data.len()),
            });
        }
        Ok(Self { data })
    }

    /// Number of index entries.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() / 4
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// 1-based element offset recorded for `annotation_index`.
    pub fn offset_of(&self, annotation_index: usize) -> Result<i64, AnnotationError> {
        if annotation_index >= self.len() {
            return Err(AnnotationError::IndexOutOfBounds {
                index: annotation_index,
                count: self.len(),
            });
        }
        let start = annotation_index * 4;
        Ok(read_i32_le(&self.data[start..start + 4]) as i64)
    }

    /// Element range `[start, end)` for `annotation_index`, converting the
    /// stored 1-based offsets to 0-based and closing the final entry at
    /// `total_elements`.
    pub fn element_range(
        &self,
        annotation_index: usize,
        total_elements: usize,
    ) -> Result<(usize, usize), AnnotationError> {
        let raw_start = self.offset_of(annotation_index)?;
        if raw_start < 1 {
            return Err(AnnotationError::MalformedMetadata {
                reason: format!(
                    "graphic index entry {annotation_index} is {raw_start}; offsets are 1-based"
                ),
            });
        }
        let start = (raw_start - 1) as usize;

        let end = if annotation_index + 1 < self.len() {
            let raw_end = self.offset_of(annotation_index + 1)?;
            if raw_end < raw_start {
                return Err(AnnotationError::MalformedMetadata {
                    reason: format!(
                        "graphic index is not monotonic at entry {}",
                        annotation_index + 1
                    ),
                });
            }
            (raw_end - 1) as usize
        } else {
            total_elements
        };

        if start > total_elements || end > total_elements {
            return Err(AnnotationError::IndexOutOfBounds {
                index: start,
                count: total_elements,
            });
        }
        Ok((start, end))
    }
}

/// Helper to encode a slice of f64 values as a little-endian F32 payload.
#[cfg(test)]
pub(crate) fn encode_f32(values: &[f64]) -> Bytes {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&(*v as f32).to_le_bytes());
    }
    Bytes::from(out)
}

#[cfg(test)]
pub(crate) fn encode_f64(values: &[f64]) -> Bytes {
    let mut out = Vec::with_capacity(values.len() * 8);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Bytes::from(out)
}

#[cfg(test)]
pub(crate) fn encode_i32(values: &[i32]) -> Bytes {
    let mut out = Vec::with_capacity(values.len() * 4);
    for v in values {
        out.extend_from_slice(&v.to_le_bytes());
    }
    Bytes::from(out)
}
