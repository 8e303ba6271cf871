//! Affine transforms between pixel-matrix and slide coordinates.
//!
//! A whole slide image has two coordinate systems:
//!
//! - **Pixel-matrix coordinates**: (column, row) positions on the
//!   full-resolution pixel grid of the image.
//! - **Slide (frame of reference) coordinates**: physical millimeter
//!   positions on the glass, shared across all images of one specimen.
//!
//! The relation between the two is a 3×3 affine matrix built from the image
//! origin offset, the row/column direction cosines, and the pixel spacing.
//! Pixel indices address pixel *centers*, so the forward transform composes
//! a fixed +0.5 centering correction and the inverse composes the opposite
//! correction; round-tripping a point is exact up to the rounding contract.
//!
//! Applied results are rounded to 4 decimal digits. This is a contract, not
//! an implementation detail: downstream code compares transformed
//! coordinates for equality and relies on the fixed precision.

use crate::error::TransformError;

/// Row-major 3×3 affine matrix in homogeneous coordinates.
pub type AffineMatrix = [[f64; 3]; 3];

/// Determinant magnitude below which a transform is considered singular.
const SINGULARITY_EPSILON: f64 = 1e-12;

/// Number of decimal digits retained by [`apply_transform`] and
/// [`apply_inverse_transform`].
const OUTPUT_DECIMALS: i32 = 4;

/// Parameters relating the pixel matrix to the slide frame of reference.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformParameters {
    /// Slide-space position of the image origin, in millimeters (X, Y)
    pub offset: [f64; 2],

    /// Direction cosines: `[0..3]` is the unit vector along which the
    /// column index increases, `[3..6]` along which the row index increases
    pub orientation: [f64; 6],

    /// Pixel spacing in millimeters: `[0]` between rows, `[1]` between columns
    pub spacing: [f64; 2],
}

/// A pixel↔slide affine transform with its precomputed inverse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    /// Maps pixel-matrix coordinates to slide coordinates
    pub matrix: AffineMatrix,

    /// Maps slide coordinates back to pixel-matrix coordinates
    pub inverse: AffineMatrix,
}

impl AffineTransform {
    /// Build the forward and inverse transforms from image geometry.
    ///
    /// # Errors
    ///
    /// Returns [`TransformError::Singular`] when the orientation/spacing
    /// combination has no inverse (zero spacing, collinear direction
    /// cosines).
    pub fn new(params: &TransformParameters) -> Result<Self, TransformError> {
        Ok(Self {
            matrix: build_transform(params)?,
            inverse: build_inverse_transform(params)?,
        })
    }
}

/// Multiply two 3×3 matrices (`a · b`).
fn matrix_multiply(a: &AffineMatrix, b: &AffineMatrix) -> AffineMatrix {
    let mut out = [[0.0; 3]; 3];
    for (i, row) in out.iter_mut().enumerate() {
        for (j, cell) in row.iter_mut().enumerate() {
            *cell = a[i][0] * b[0][j] + a[i][1] * b[1][j] + a[i][2] * b[2][j];
        }
    }
    out
}

/// Translation-only affine matrix.
fn translation(tx: f64, ty: f64) -> AffineMatrix {
    [[1.0, 0.0, tx], [0.0, 1.0, ty], [0.0, 0.0, 1.0]]
}

/// Rotation/scale block and its determinant for the given geometry.
///
/// Column 0 is the column-direction cosine scaled by the spacing between
/// columns; column 1 is the row-direction cosine scaled by the spacing
/// between rows.
fn linear_block(params: &TransformParameters) -> ([[f64; 2]; 2], f64) {
    let o = &params.orientation;
    let s = &params.spacing;
    let block = [[o[0] * s[1], o[3] * s[0]], [o[1] * s[1], o[4] * s[0]]];
    let det = block[0][0] * block[1][1] - block[0][1] * block[1][0];
    (block, det)
}

/// Build the pixel-matrix → slide matrix.
///
/// Composed as `offset ∘ rotation/scale ∘ (+0.5 centering)` so that integer
/// pixel indices map from pixel centers.
pub fn build_transform(params: &TransformParameters) -> Result<AffineMatrix, TransformError> {
    let (block, det) = linear_block(params);
    if det.abs() < SINGULARITY_EPSILON {
        return Err(TransformError::Singular { determinant: det });
    }

    let affine = [
        [block[0][0], block[0][1], params.offset[0]],
        [block[1][0], block[1][1], params.offset[1]],
        [0.0, 0.0, 1.0],
    ];
    Ok(matrix_multiply(&affine, &translation(0.5, 0.5)))
}

/// Build the slide → pixel-matrix matrix.
///
/// The inverse of the rotation/scale/offset composition, followed by the
/// opposite-sign centering correction.
pub fn build_inverse_transform(
    params: &TransformParameters,
) -> Result<AffineMatrix, TransformError> {
    let (block, det) = linear_block(params);
    if det.abs() < SINGULARITY_EPSILON {
        return Err(TransformError::Singular { determinant: det });
    }

    // Closed-form inverse of the 2x2 block, then the inverted translation.
    let inv = [
        [block[1][1] / det, -block[0][1] / det],
        [-block[1][0] / det, block[0][0] / det],
    ];
    let tx = -(inv[0][0] * params.offset[0] + inv[0][1] * params.offset[1]);
    let ty = -(inv[1][0] * params.offset[0] + inv[1][1] * params.offset[1]);

    let affine_inv = [
        [inv[0][0], inv[0][1], tx],
        [inv[1][0], inv[1][1], ty],
        [0.0, 0.0, 1.0],
    ];
    Ok(matrix_multiply(&translation(-0.5, -0.5), &affine_inv))
}

/// Round to the fixed output precision.
#[inline]
fn round_output(v: f64) -> f64 {
    let scale = 10f64.powi(OUTPUT_DECIMALS);
    (v * scale).round() / scale
}

/// Map a (column, row) pixel coordinate into slide space.
///
/// The result is rounded to 4 decimal digits.
pub fn apply_transform(point: [f64; 2], matrix: &AffineMatrix) -> [f64; 2] {
    let x = matrix[0][0] * point[0] + matrix[0][1] * point[1] + matrix[0][2];
    let y = matrix[1][0] * point[0] + matrix[1][1] * point[1] + matrix[1][2];
    [round_output(x), round_output(y)]
}

/// Map an (x, y) slide coordinate back into pixel-matrix space.
///
/// The result is rounded to 4 decimal digits.
pub fn apply_inverse_transform(point: [f64; 2], inverse: &AffineMatrix) -> [f64; 2] {
    apply_transform(point, inverse)
}

/// Transform a batch of points through the given matrix.
///
/// Same contract as [`apply_transform`], used for the worker offload path
/// where whole coordinate buffers are transformed at once.
pub fn apply_transform_batch(points: &[[f64; 2]], matrix: &AffineMatrix) -> Vec<[f64; 2]> {
    points.iter().map(|p| apply_transform(*p, matrix)).collect()
}
