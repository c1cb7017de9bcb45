use super::{Factor, Linearization};
use crate::manifold::se2::{
    invert_transform, rotation_matrix, transform_to_vector, vector_to_transform,
};
use nalgebra::{DMatrix, DVector, DVectorView, Matrix2, Matrix3, Vector2, Vector3};

/// Relative pose constraint between two SE(2) poses.
///
/// # Mathematical Formulation
///
/// Given poses `x₁ = [t₁, θ₁]`, `x₂ = [t₂, θ₂]` and the measured relative pose `z`
/// (the pose of `x₂` expressed in the frame of `x₁`), the residual is
///
/// ```text
/// e = t2v( Z⁻¹ · X₁⁻¹ · X₂ )
/// ```
///
/// where `X = v2t(x)` is the homogeneous transform of a pose vector. Written out:
///
/// ```text
/// e_t = R_zᵀ (R₁ᵀ (t₂ − t₁) − t_z)
/// e_θ = θ₂ − θ₁ − θ_z              (wrapped to (−π, π])
/// ```
///
/// # Jacobians
///
/// ```text
///     ┌ −R_zᵀR₁ᵀ   R_zᵀ·(dR₁/dθ)ᵀ·(t₂ − t₁) ┐        ┌ R_zᵀR₁ᵀ   0 ┐
/// A = │                                    │    B = │             │
///     └  0    0              −1            ┘        └  0   0    1 ┘
/// ```
///
/// # Example
///
/// ```
/// use pose_graph_slam::factors::BetweenFactor;
/// use nalgebra::Vector3;
///
/// // Robot moved 1m forward and turned 0.1 rad
/// let factor = BetweenFactor::new(Vector3::new(1.0, 0.0, 0.1));
///
/// let x1 = Vector3::new(0.0, 0.0, 0.0);
/// let x2 = Vector3::new(0.95, 0.05, 0.12);
///
/// let e = factor.error(&x1, &x2);
/// let (a, b) = factor.jacobians(&x1, &x2);
/// assert!(e.norm() < 0.1);
/// assert_eq!(a[(2, 2)], -1.0);
/// assert_eq!(b[(2, 2)], 1.0);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct BetweenFactor {
    /// Measured relative pose `[dx, dy, dθ]`
    pub measurement: Vector3<f64>,
}

impl BetweenFactor {
    pub fn new(measurement: Vector3<f64>) -> Self {
        Self { measurement }
    }

    /// Residual `t2v(Z⁻¹ · X₁⁻¹ · X₂)`
    pub fn error(&self, x1: &Vector3<f64>, x2: &Vector3<f64>) -> Vector3<f64> {
        let z_inv = invert_transform(&vector_to_transform(&self.measurement));
        let x1_inv = invert_transform(&vector_to_transform(x1));
        transform_to_vector(&(z_inv * x1_inv * vector_to_transform(x2)))
    }

    /// Jacobians `(A, B)` of the residual with respect to `x1` and `x2`
    pub fn jacobians(&self, x1: &Vector3<f64>, x2: &Vector3<f64>) -> (Matrix3<f64>, Matrix3<f64>) {
        let rz_t = rotation_matrix(self.measurement.z).transpose();
        let r1_t = rotation_matrix(x1.z).transpose();
        let (s, c) = x1.z.sin_cos();
        // Transpose of the rotation derivative of x1
        let dr1_t = Matrix2::new(-s, c, -c, -s);
        let delta = Vector2::new(x2.x - x1.x, x2.y - x1.y);

        let rotation = rz_t * r1_t;
        let d_theta = rz_t * dr1_t * delta;

        let mut a = Matrix3::zeros();
        a.fixed_view_mut::<2, 2>(0, 0).copy_from(&(-rotation));
        a[(0, 2)] = d_theta.x;
        a[(1, 2)] = d_theta.y;
        a[(2, 2)] = -1.0;

        let mut b = Matrix3::zeros();
        b.fixed_view_mut::<2, 2>(0, 0).copy_from(&rotation);
        b[(2, 2)] = 1.0;

        (a, b)
    }
}

fn pose_from_view(view: DVectorView<f64>) -> Vector3<f64> {
    Vector3::new(view[0], view[1], view[2])
}

impl Factor for BetweenFactor {
    fn residual(&self, from: DVectorView<f64>, to: DVectorView<f64>) -> DVector<f64> {
        let e = self.error(&pose_from_view(from), &pose_from_view(to));
        DVector::from_column_slice(e.as_slice())
    }

    fn linearize(&self, from: DVectorView<f64>, to: DVectorView<f64>) -> Linearization {
        let x1 = pose_from_view(from);
        let x2 = pose_from_view(to);
        let e = self.error(&x1, &x2);
        let (a, b) = self.jacobians(&x1, &x2);

        Linearization {
            residual: DVector::from_column_slice(e.as_slice()),
            jacobian_from: DMatrix::from_column_slice(3, 3, a.as_slice()),
            jacobian_to: DMatrix::from_column_slice(3, 3, b.as_slice()),
        }
    }

    fn get_dimension(&self) -> usize {
        3
    }
}
