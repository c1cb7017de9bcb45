use super::{Factor, Linearization};
use crate::manifold::se2::{rotation_derivative, rotation_matrix};
use nalgebra::{DMatrix, DVector, DVectorView, Matrix2, Matrix2x3, Vector2, Vector3};

/// Landmark observation made from an SE(2) pose.
///
/// The measurement `z` is the landmark position expressed in the frame of the
/// observing pose `x = [t, θ]`. With landmark position `l`:
///
/// ```text
/// e = Rᵀ (l − t) − z
///
/// A = [ −Rᵀ | (dR/dθ)ᵀ (l − t) ]     (2×3)
/// B = Rᵀ                            (2×2)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct LandmarkFactor {
    /// Measured landmark position `[dx, dy]` in the pose frame
    pub measurement: Vector2<f64>,
}

impl LandmarkFactor {
    pub fn new(measurement: Vector2<f64>) -> Self {
        Self { measurement }
    }

    /// Residual `Rᵀ(l − t) − z`
    pub fn error(&self, pose: &Vector3<f64>, landmark: &Vector2<f64>) -> Vector2<f64> {
        let r_t = rotation_matrix(pose.z).transpose();
        r_t * (landmark - pose.xy()) - self.measurement
    }

    /// Jacobians `(A, B)` of the residual with respect to the pose and the landmark
    pub fn jacobians(
        &self,
        pose: &Vector3<f64>,
        landmark: &Vector2<f64>,
    ) -> (Matrix2x3<f64>, Matrix2<f64>) {
        let r_t = rotation_matrix(pose.z).transpose();
        let d_theta = rotation_derivative(pose.z).transpose() * (landmark - pose.xy());

        let mut a = Matrix2x3::zeros();
        a.fixed_view_mut::<2, 2>(0, 0).copy_from(&(-r_t));
        a.set_column(2, &d_theta);

        (a, r_t)
    }
}

impl Factor for LandmarkFactor {
    fn residual(&self, from: DVectorView<f64>, to: DVectorView<f64>) -> DVector<f64> {
        let pose = Vector3::new(from[0], from[1], from[2]);
        let landmark = Vector2::new(to[0], to[1]);
        let e = self.error(&pose, &landmark);
        DVector::from_column_slice(e.as_slice())
    }

    fn linearize(&self, from: DVectorView<f64>, to: DVectorView<f64>) -> Linearization {
        let pose = Vector3::new(from[0], from[1], from[2]);
        let landmark = Vector2::new(to[0], to[1]);
        let e = self.error(&pose, &landmark);
        let (a, b) = self.jacobians(&pose, &landmark);

        Linearization {
            residual: DVector::from_column_slice(e.as_slice()),
            jacobian_from: DMatrix::from_column_slice(2, 3, a.as_slice()),
            jacobian_to: DMatrix::from_column_slice(2, 2, b.as_slice()),
        }
    }

    fn get_dimension(&self) -> usize {
        2
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factors::test_utils::numeric_jacobians;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn test_zero_residual_for_consistent_observation() {
        // Pose at (1, 1) facing +y sees a landmark 2m ahead and 1m to its right
        let pose = Vector3::new(1.0, 1.0, FRAC_PI_2);
        let landmark = Vector2::new(2.0, 3.0);
        let factor = LandmarkFactor::new(Vector2::new(2.0, -1.0));

        assert!(factor.error(&pose, &landmark).norm() < 1e-12);
    }

    #[test]
    fn test_residual_subtracts_pose_translation() {
        let pose = Vector3::new(5.0, -2.0, 0.0);
        let landmark = Vector2::new(5.0, -2.0);
        let factor = LandmarkFactor::new(Vector2::new(0.0, 0.0));

        assert!(factor.error(&pose, &landmark).norm() < 1e-12);
    }

    #[test]
    fn test_jacobians_match_finite_differences() {
        let cases = [
            (Vector3::new(0.0, 0.0, 0.0), Vector2::new(2.0, 1.0)),
            (Vector3::new(1.5, -0.5, 0.8), Vector2::new(-1.0, 3.0)),
            (Vector3::new(-2.0, 4.0, -2.5), Vector2::new(0.5, 0.5)),
        ];

        for (pose, landmark) in cases {
            let factor = LandmarkFactor::new(Vector2::new(0.3, -0.7));
            let from = DVector::from_column_slice(pose.as_slice());
            let to = DVector::from_column_slice(landmark.as_slice());

            let analytic = factor.linearize(from.as_view(), to.as_view());
            let (numeric_a, numeric_b) = numeric_jacobians(&factor, &from, &to, 1e-6);

            assert_eq!(analytic.jacobian_from.shape(), (2, 3));
            assert_eq!(analytic.jacobian_to.shape(), (2, 2));
            assert!((analytic.jacobian_from - numeric_a).abs().max() < 1e-6);
            assert!((analytic.jacobian_to - numeric_b).abs().max() < 1e-6);
        }
    }

    #[test]
    fn test_jacobians_random_inputs() {
        use rand::{Rng, SeedableRng};
        let mut rng = rand::rngs::StdRng::seed_from_u64(11);
        let pi = std::f64::consts::PI;

        for _ in 0..50 {
            let pose = Vector3::new(
                rng.random_range(-5.0..5.0),
                rng.random_range(-5.0..5.0),
                rng.random_range(-pi..pi),
            );
            let landmark = Vector2::new(
                pose.x + rng.random_range(-4.0..4.0),
                pose.y + rng.random_range(-4.0..4.0),
            );
            let measurement = Vector2::new(rng.random_range(-4.0..4.0), rng.random_range(-4.0..4.0));

            let factor = LandmarkFactor::new(measurement);
            let from = DVector::from_column_slice(pose.as_slice());
            let to = DVector::from_column_slice(landmark.as_slice());
            let analytic = factor.linearize(from.as_view(), to.as_view());
            let (numeric_a, numeric_b) = numeric_jacobians(&factor, &from, &to, 1e-6);

            assert!((analytic.jacobian_from - numeric_a).abs().max() < 1e-5);
            assert!((analytic.jacobian_to - numeric_b).abs().max() < 1e-5);
        }
    }
}
