//! SE(2) - Special Euclidean Group in 2D
//!
//! Conversions between the `[x, y, θ]` pose vector used in the state vector and the
//! 3×3 homogeneous matrix
//!
//! ```text
//!     ┌ cosθ  -sinθ  x ┐
//! T = │ sinθ   cosθ  y │
//!     └  0      0    1 ┘
//! ```
//!
//! All functions are pure. Angles returned from [`transform_to_vector`] and
//! [`normalize_angle`] lie in (−π, π].

use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};
use std::f64::consts::PI;

/// Build the homogeneous transform of a pose vector `[x, y, θ]`.
pub fn vector_to_transform(pose: &Vector3<f64>) -> Matrix3<f64> {
    let (s, c) = pose[2].sin_cos();
    Matrix3::new(c, -s, pose[0], s, c, pose[1], 0.0, 0.0, 1.0)
}

/// Recover `[x, y, θ]` from a homogeneous transform.
///
/// The translation is read from the last column and the heading is
/// `atan2(T[1,0], T[0,0])`, folded into (−π, π].
pub fn transform_to_vector(transform: &Matrix3<f64>) -> Vector3<f64> {
    let theta = transform[(1, 0)].atan2(transform[(0, 0)]);
    Vector3::new(
        transform[(0, 2)],
        transform[(1, 2)],
        normalize_angle(theta),
    )
}

/// Closed-form inverse of a rigid transform: `[Rᵀ, -Rᵀt; 0 1]`.
pub fn invert_transform(transform: &Matrix3<f64>) -> Matrix3<f64> {
    let rotation_t = transform.fixed_view::<2, 2>(0, 0).transpose();
    let translation = Vector2::new(transform[(0, 2)], transform[(1, 2)]);
    let inv_translation = -(rotation_t * translation);

    let mut inverse = Matrix3::identity();
    inverse.fixed_view_mut::<2, 2>(0, 0).copy_from(&rotation_t);
    inverse[(0, 2)] = inv_translation.x;
    inverse[(1, 2)] = inv_translation.y;
    inverse
}

/// The 2×2 rotation block `[[cosθ, -sinθ], [sinθ, cosθ]]`.
pub fn rotation_matrix(theta: f64) -> Matrix2<f64> {
    let (s, c) = theta.sin_cos();
    Matrix2::new(c, -s, s, c)
}

/// Derivative of [`rotation_matrix`] with respect to θ: `[[-sinθ, -cosθ], [cosθ, -sinθ]]`.
pub fn rotation_derivative(theta: f64) -> Matrix2<f64> {
    let (s, c) = theta.sin_cos();
    Matrix2::new(-s, -c, c, -s)
}

/// Wrap an angle into (−π, π].
pub fn normalize_angle(theta: f64) -> f64 {
    let wrapped = (theta + PI).rem_euclid(2.0 * PI) - PI;
    // rem_euclid maps +π onto -π
    if wrapped <= -PI { wrapped + 2.0 * PI } else { wrapped }
}
