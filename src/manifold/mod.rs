//! Rigid-body transforms used by the pose-graph constraint models.
//!
//! Only the planar group is needed here:
//! - **SE(2)**: Rigid transformations in 2D, stored in the state vector as `[x, y, θ]`
//!
//! Lie group M,° | size   | dim | X ∈ M              | Constraint | Comp. | Action
//! ------------- | ------ | --- | ------------------ | ---------- | ----- | ------
//! Rotation      | SO(2),.| 4   | R                  | RᵀR = I    | R₁R₂  | Rx
//! Rigid motion  | SE(2),.| 9   | M = [R t; 0 1]     | RᵀR = I    | M₁M₂  | Rx+t
//!
//! Poses travel through the optimizer as plain `[x, y, θ]` vectors; the helpers in
//! [`se2`] convert them to homogeneous matrices when a constraint needs the group
//! structure and back again afterwards.

pub mod se2;

pub use se2::{
    invert_transform, normalize_angle, rotation_derivative, rotation_matrix,
    transform_to_vector, vector_to_transform,
};
