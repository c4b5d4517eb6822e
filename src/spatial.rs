//! Rigid body algebra: rotations (SO(3)) and rigid transforms (SE(3)).
//!
//! Rotations are stored as unit quaternions and are normalized at construction and after
//! every composition. A quaternion that cannot be normalized (zero or non-finite length) is
//! rejected with [`KinematicsError::DegenerateRotation`] rather than silently replaced.

use std::ops::Mul;

use nalgebra::{
    Isometry3, Matrix3, Matrix4, Quaternion, Rotation3, Translation3, Unit,
    UnitQuaternion, Vector3,
};

use crate::error::KinematicsError;

/// Quaternions shorter than this are treated as degenerate.
const MIN_QUATERNION_NORM: f64 = 1e-12;

/// Element of SO(3), always normalized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation(UnitQuaternion<f64>);

impl Rotation {
    pub fn identity() -> Self {
        Rotation(UnitQuaternion::identity())
    }

    /// Build from quaternion components in `[x, y, z, w]` order. The quaternion is
    /// renormalized, zero length is an error.
    pub fn from_quat(quat: [f64; 4]) -> Result<Self, KinematicsError> {
        let [x, y, z, w] = quat;
        let q = Quaternion::new(w, x, y, z);
        let norm = q.norm();
        if !norm.is_finite() || norm < MIN_QUATERNION_NORM {
            return Err(KinematicsError::DegenerateRotation);
        }
        Ok(Rotation(UnitQuaternion::new_normalize(q)))
    }

    /// Build from a 3x3 rotation matrix. Slightly non-orthonormal input is projected onto the
    /// closest rotation.
    pub fn from_matrix(matrix: &Matrix3<f64>) -> Result<Self, KinematicsError> {
        if matrix.iter().any(|v| !v.is_finite()) || matrix.determinant() <= MIN_QUATERNION_NORM {
            return Err(KinematicsError::DegenerateRotation);
        }
        let rotation = Rotation3::from_matrix(matrix);
        Ok(Rotation(UnitQuaternion::from_rotation_matrix(&rotation)))
    }

    /// Rotation by `angle` radians about `axis` (normalized here).
    pub fn from_axis_angle(axis: &Vector3<f64>, angle: f64) -> Result<Self, KinematicsError> {
        let axis = Unit::try_new(*axis, MIN_QUATERNION_NORM)
            .ok_or(KinematicsError::DegenerateRotation)?;
        Ok(Self::from_unit_axis_angle(&axis, angle))
    }

    pub(crate) fn from_unit_axis_angle(axis: &Unit<Vector3<f64>>, angle: f64) -> Self {
        Rotation(UnitQuaternion::from_axis_angle(axis, angle))
    }

    /// Fixed axis roll, pitch, yaw as used by URDF origins (`Rz(yaw) * Ry(pitch) * Rx(roll)`).
    pub fn from_rpy(roll: f64, pitch: f64, yaw: f64) -> Self {
        Rotation(UnitQuaternion::from_euler_angles(roll, pitch, yaw))
    }

    /// `self * other`: applying the result equals applying `other` first, then `self`.
    pub fn compose(&self, other: &Rotation) -> Rotation {
        let mut q = self.0 * other.0;
        q.renormalize();
        Rotation(q)
    }

    pub fn inverse(&self) -> Rotation {
        Rotation(self.0.inverse())
    }

    pub fn apply(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.0 * vector
    }

    pub fn as_matrix(&self) -> Matrix3<f64> {
        self.0.to_rotation_matrix().into_inner()
    }

    /// Quaternion components in `[x, y, z, w]` order.
    pub fn as_quat(&self) -> [f64; 4] {
        let q = self.0.quaternion();
        [q.i, q.j, q.k, q.w]
    }

    /// Smallest angle (radians) of the rotation taking `self` to `other`.
    pub fn angle_to(&self, other: &Rotation) -> f64 {
        self.0.angle_to(&other.0)
    }

    pub fn unit_quaternion(&self) -> &UnitQuaternion<f64> {
        &self.0
    }
}

impl Default for Rotation {
    fn default() -> Self {
        Self::identity()
    }
}

impl From<UnitQuaternion<f64>> for Rotation {
    fn from(q: UnitQuaternion<f64>) -> Self {
        Rotation(q)
    }
}

/// Element of SE(3). Composition is associative but not commutative.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RigidTransform {
    pub rotation: Rotation,
    pub translation: Vector3<f64>,
}

impl RigidTransform {
    pub fn new(rotation: Rotation, translation: Vector3<f64>) -> Self {
        RigidTransform {
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(Rotation::identity(), Vector3::zeros())
    }

    pub fn from_translation(translation: Vector3<f64>) -> Self {
        Self::new(Rotation::identity(), translation)
    }

    pub fn from_rotation(rotation: Rotation) -> Self {
        Self::new(rotation, Vector3::zeros())
    }

    /// Position plus quaternion in `[x, y, z, w]` order.
    pub fn from_xyz_quat(xyz: [f64; 3], quat: [f64; 4]) -> Result<Self, KinematicsError> {
        Ok(Self::new(Rotation::from_quat(quat)?, Vector3::from(xyz)))
    }

    /// Position plus fixed axis roll, pitch, yaw (URDF `<origin xyz=".." rpy=".."/>`).
    pub fn from_xyz_rpy(xyz: [f64; 3], rpy: [f64; 3]) -> Self {
        Self::new(Rotation::from_rpy(rpy[0], rpy[1], rpy[2]), Vector3::from(xyz))
    }

    /// `self ∘ other`: applying the result to a point equals applying `other`, then `self`.
    pub fn compose(&self, other: &RigidTransform) -> RigidTransform {
        RigidTransform {
            rotation: self.rotation.compose(&other.rotation),
            translation: self.rotation.apply(&other.translation) + self.translation,
        }
    }

    pub fn inverse(&self) -> RigidTransform {
        let rotation = self.rotation.inverse();
        RigidTransform {
            translation: -rotation.apply(&self.translation),
            rotation,
        }
    }

    /// Rotation followed by translation.
    pub fn transform_point(&self, point: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.apply(point) + self.translation
    }

    /// Rotation only, directions are not translated.
    pub fn transform_vector(&self, vector: &Vector3<f64>) -> Vector3<f64> {
        self.rotation.apply(vector)
    }

    /// 4x4 homogeneous matrix.
    pub fn as_matrix(&self) -> Matrix4<f64> {
        let mut h = Matrix4::identity();
        h.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(&self.rotation.as_matrix());
        h.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        h
    }

    pub fn to_isometry(&self) -> Isometry3<f64> {
        Isometry3::from_parts(
            Translation3::from(self.translation),
            *self.rotation.unit_quaternion(),
        )
    }

    /// True if both translation distance and rotation angle are within `tolerance`.
    pub fn approx_eq(&self, other: &RigidTransform, tolerance: f64) -> bool {
        (self.translation - other.translation).norm() <= tolerance
            && self.rotation.angle_to(&other.rotation) <= tolerance
    }
}

impl Mul for RigidTransform {
    type Output = RigidTransform;

    fn mul(self, rhs: RigidTransform) -> RigidTransform {
        self.compose(&rhs)
    }
}

impl From<Isometry3<f64>> for RigidTransform {
    fn from(iso: Isometry3<f64>) -> Self {
        RigidTransform::new(Rotation::from(iso.rotation), iso.translation.vector)
    }
}

impl From<&RigidTransform> for Isometry3<f64> {
    fn from(t: &RigidTransform) -> Self {
        t.to_isometry()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::FRAC_PI_2;

    const TOLERANCE: f64 = 1e-6;

    #[test]
    fn test_so3_composition_is_rotation() {
        // 90 degrees around X, then 90 degrees around Y
        let r1 = Rotation::from_matrix(&Matrix3::new(1.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 1.0, 0.0))
            .unwrap();
        let r2 = Rotation::from_matrix(&Matrix3::new(0.0, 0.0, 1.0, 0.0, 1.0, 0.0, -1.0, 0.0, 0.0))
            .unwrap();
        let m = r1.compose(&r2).as_matrix();
        assert_relative_eq!(m * m.transpose(), Matrix3::identity(), epsilon = TOLERANCE);
        assert_relative_eq!(m.determinant(), 1.0, epsilon = TOLERANCE);
        assert_relative_eq!(m, r1.as_matrix() * r2.as_matrix(), epsilon = TOLERANCE);
    }

    #[test]
    fn test_rotation_times_inverse_is_identity() {
        let r = Rotation::from_quat([0.3, -0.2, 0.5, 0.8]).unwrap();
        let id = r.compose(&r.inverse());
        assert_relative_eq!(id.as_matrix(), Matrix3::identity(), epsilon = TOLERANCE);
    }

    #[test]
    fn test_quaternion_is_renormalized() {
        let r = Rotation::from_quat([0.0, 0.0, 0.0, 5.0]).unwrap();
        assert_eq!(r.as_quat(), [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_zero_quaternion_is_degenerate() {
        assert!(matches!(
            Rotation::from_quat([0.0; 4]),
            Err(KinematicsError::DegenerateRotation)
        ));
        assert!(matches!(
            Rotation::from_quat([f64::NAN, 0.0, 0.0, 1.0]),
            Err(KinematicsError::DegenerateRotation)
        ));
        assert!(matches!(
            Rotation::from_axis_angle(&Vector3::zeros(), 1.0),
            Err(KinematicsError::DegenerateRotation)
        ));
        assert!(matches!(
            Rotation::from_matrix(&Matrix3::zeros()),
            Err(KinematicsError::DegenerateRotation)
        ));
    }

    #[test]
    fn test_se3_inverse() {
        let t = RigidTransform::from_xyz_quat([1.0, 2.0, 3.0], [0.0, 0.0, 0.0, 1.0]).unwrap();
        let prod = t.compose(&t.inverse());
        assert_relative_eq!(prod.translation, Vector3::zeros(), epsilon = TOLERANCE);
        assert_relative_eq!(prod.rotation.as_matrix(), Matrix3::identity(), epsilon = TOLERANCE);
    }

    #[test]
    fn test_se3_inverse_with_rotation() {
        let t = RigidTransform::from_xyz_rpy([0.4, -1.2, 2.5], [0.3, -0.7, 1.9]);
        assert!(t.compose(&t.inverse()).approx_eq(&RigidTransform::identity(), TOLERANCE));
        assert!(t.inverse().compose(&t).approx_eq(&RigidTransform::identity(), TOLERANCE));
    }

    #[test]
    fn test_se3_transform_point() {
        let t = RigidTransform::from_xyz_quat([1.0, 0.0, 0.0], [0.0, 0.0, 0.0, 1.0]).unwrap();
        let p = t.transform_point(&Vector3::zeros());
        assert_relative_eq!(p, Vector3::new(1.0, 0.0, 0.0));
    }

    #[test]
    fn test_transform_point_is_rotation_plus_translation() {
        let t = RigidTransform::from_xyz_rpy([0.1, 0.2, 0.3], [0.5, 0.1, -0.4]);
        for p in [
            Vector3::new(1.0, 0.0, 0.0),
            Vector3::new(-2.0, 3.5, 0.25),
            Vector3::new(0.0, 0.0, -7.0),
        ] {
            let expected = t.rotation.as_matrix() * p + t.translation;
            assert_relative_eq!(t.transform_point(&p), expected, epsilon = 1e-12);
            assert_relative_eq!(t.transform_vector(&p), t.rotation.as_matrix() * p, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_compose_applies_right_operand_first() {
        let a = RigidTransform::from_rotation(
            Rotation::from_axis_angle(&Vector3::z(), FRAC_PI_2).unwrap(),
        );
        let b = RigidTransform::from_translation(Vector3::new(1.0, 0.0, 0.0));
        let p = Vector3::new(0.0, 0.0, 0.0);
        let ab = a.compose(&b).transform_point(&p);
        assert_relative_eq!(ab, a.transform_point(&b.transform_point(&p)), epsilon = 1e-12);
        assert_relative_eq!(ab, Vector3::new(0.0, 1.0, 0.0), epsilon = 1e-12);
        // Not commutative
        let ba = b.compose(&a).transform_point(&p);
        assert_relative_eq!(ba, Vector3::new(1.0, 0.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_homogeneous_matrix_matches_isometry() {
        let t = RigidTransform::from_xyz_rpy([1.0, -1.0, 0.5], [0.2, 0.4, 0.6]);
        assert_relative_eq!(t.as_matrix(), t.to_isometry().to_homogeneous(), epsilon = 1e-12);
        let back = RigidTransform::from(t.to_isometry());
        assert!(back.approx_eq(&t, 1e-12));
        assert_relative_eq!((t * t.inverse()).translation, Vector3::zeros(), epsilon = 1e-12);
    }
}
