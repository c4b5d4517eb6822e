//! Geometric Jacobian of the chain and helpers built on top of it.

use std::time::Instant;

use nalgebra::{DMatrix, DVector, Isometry3, Vector3, Vector6};
use rayon::prelude::*;
use tracing::debug;

use crate::chain::JointKind;
use crate::error::KinematicsError;
use crate::kinematic_traits::{Joints, Kinematics};
use crate::kinematics_impl::KinematicsSolver;
use crate::spatial::RigidTransform;

impl KinematicsSolver {
    /// Geometric Jacobian of the end effector at `qs`.
    ///
    /// # Arguments
    ///
    /// * `qs` - joint values in chain order, one per joint (fixed joints included).
    ///
    /// # Returns
    ///
    /// 6 x N matrix. Rows 0..3 are the linear, rows 3..6 the angular velocity of the end
    /// effector in the base frame per unit joint velocity. Fails with
    /// [`KinematicsError::JointLimitExceeded`] if a joint is outside its bounds, the same as
    /// forward kinematics. Iterative solvers that may step over a limit use the unchecked
    /// variant internally.
    pub fn jacobian(&self, qs: &[f64]) -> Result<DMatrix<f64>, KinematicsError> {
        let started = Instant::now();
        self.validate_joint_limits(qs)?;
        let jacobian = self.jacobian_unchecked(qs);
        debug!(
            correlation_id = %self.correlation_id(),
            num_joints = qs.len(),
            condition_number = condition_number(&jacobian),
            jacobian_time_us = crate::utils::elapsed_us(started),
            "fk.jacobian"
        );
        Ok(jacobian)
    }

    pub(crate) fn jacobian_unchecked(&self, qs: &[f64]) -> DMatrix<f64> {
        let joints = self.chain().joints();

        // World frame origin and axis of every joint, taken before the joint moves
        let mut axes: Vec<(Vector3<f64>, Vector3<f64>)> = Vec::with_capacity(joints.len());
        let mut pose = RigidTransform::identity();
        for (joint, &q) in joints.iter().zip(qs) {
            let frame = pose.compose(&joint.origin);
            axes.push((frame.translation, frame.rotation.apply(&joint.axis)));
            pose = frame.compose(&joint.motion(q));
        }
        let p_ee = pose.translation;

        let mut jacobian = DMatrix::zeros(6, joints.len());
        for (i, (joint, (p_j, a_j))) in joints.iter().zip(axes).enumerate() {
            let (linear, angular) = match joint.kind {
                JointKind::Revolute | JointKind::Continuous => (a_j.cross(&(p_ee - p_j)), a_j),
                JointKind::Prismatic => (a_j, Vector3::zeros()),
                JointKind::Fixed => (Vector3::zeros(), Vector3::zeros()),
            };
            jacobian.fixed_view_mut::<3, 1>(0, i).copy_from(&linear);
            jacobian.fixed_view_mut::<3, 1>(3, i).copy_from(&angular);
        }
        jacobian
    }
}

/// Relative singular value below which the matrix is treated as rank deficient.
const RANK_TOLERANCE: f64 = 1e-12;

/// Ratio of the largest to the smallest singular value. Returns `+inf` for rank deficient,
/// empty or non-finite matrices, or if the SVD does not converge.
pub fn condition_number(matrix: &DMatrix<f64>) -> f64 {
    if matrix.is_empty() || !crate::utils::is_valid_matrix(matrix) {
        return f64::INFINITY;
    }
    let Some(svd) = matrix.clone().try_svd(false, false, f64::EPSILON, 0) else {
        return f64::INFINITY;
    };
    let sigma_max = svd.singular_values.max();
    let sigma_min = svd.singular_values.min();
    if sigma_min <= sigma_max * RANK_TOLERANCE {
        return f64::INFINITY;
    }
    sigma_max / sigma_min
}

/// Jacobian matrix at a given configuration, with helpers that map end effector
/// velocities and forces into joint space.
#[derive(Debug, Clone)]
pub struct Jacobian {
    /// 6 x N matrix, each column corresponds to a joint, each row to a degree of freedom
    /// of the end effector (linear velocities first, then angular).
    matrix: DMatrix<f64>,

    /// Tolerance used for the pseudo inverse (and as the step of numerical differentiation).
    epsilon: f64,
}

impl Jacobian {
    pub fn new(matrix: DMatrix<f64>, epsilon: f64) -> Self {
        Self { matrix, epsilon }
    }

    /// Analytic Jacobian of the solver chain.
    pub fn analytic(solver: &KinematicsSolver, qs: &[f64], epsilon: f64) -> Result<Self, KinematicsError> {
        Ok(Self::new(solver.jacobian(qs)?, epsilon))
    }

    /// Finite difference Jacobian of any [`Kinematics`] implementation.
    pub fn numerical(robot: &impl Kinematics, qs: &[f64], epsilon: f64) -> Result<Self, KinematicsError> {
        Ok(Self::new(compute_jacobian(robot, qs, epsilon)?, epsilon))
    }

    pub fn matrix(&self) -> &DMatrix<f64> {
        &self.matrix
    }

    pub fn condition_number(&self) -> f64 {
        condition_number(&self.matrix)
    }

    /// Computes the joint velocities required to achieve a desired end-effector velocity,
    /// given as translation (linear velocity) and rotation (its scaled axis is the angular
    /// velocity).
    pub fn velocities(&self, desired_end_effector_velocity: &Isometry3<f64>) -> Result<Joints, KinematicsError> {
        self.velocities_from_vector(&isometry_to_vector6(desired_end_effector_velocity))
    }

    /// Computes the joint velocities required to achieve a desired end-effector velocity.
    ///
    /// Uses the inverse of the Jacobian if it is square and invertible, the SVD pseudo
    /// inverse otherwise (redundant or singular configurations).
    pub fn velocities_from_vector(&self, desired_end_effector_velocity: &Vector6<f64>) -> Result<Joints, KinematicsError> {
        let twist = DVector::from_column_slice(desired_end_effector_velocity.as_slice());
        if self.matrix.is_square() {
            if let Some(inverse) = self.matrix.clone().try_inverse() {
                return Ok(inverse * twist);
            }
        }
        let pseudo_inverse = self
            .matrix
            .clone()
            .pseudo_inverse(self.epsilon)
            .map_err(|e| KinematicsError::InvalidConfig(format!("Jacobian pseudo inverse: {}", e)))?;
        Ok(pseudo_inverse * twist)
    }

    /// Joint torques (forces for prismatic joints) that balance a desired force (translation)
    /// and torque (rotation scaled axis) at the end effector.
    pub fn torques(&self, desired_force_torque: &Isometry3<f64>) -> Joints {
        self.torques_from_vector(&isometry_to_vector6(desired_force_torque))
    }

    /// Joint torques for a 6D wrench `[fx, fy, fz, tx, ty, tz]`, as `Jᵀ·F`.
    pub fn torques_from_vector(&self, desired_force_torque: &Vector6<f64>) -> Joints {
        self.matrix.transpose() * DVector::from_column_slice(desired_force_torque.as_slice())
    }
}

fn isometry_to_vector6(isometry: &Isometry3<f64>) -> Vector6<f64> {
    let linear = isometry.translation.vector;
    let angular = isometry.rotation.scaled_axis();
    Vector6::new(linear.x, linear.y, linear.z, angular.x, angular.y, angular.z)
}

/// Finite difference Jacobian for a given robot and joint configuration. Each column is
/// computed in parallel by perturbing one joint by `epsilon`. Joint limits are ignored.
pub fn compute_jacobian(robot: &impl Kinematics, qs: &[f64], epsilon: f64) -> Result<DMatrix<f64>, KinematicsError> {
    let current_pose = robot.forward_ignoring_limits(qs)?;
    let current_position = current_pose.translation;
    let current_orientation = *current_pose.rotation.unit_quaternion();

    let jacobian_columns = (0..qs.len())
        .into_par_iter()
        .map(|i| -> Result<(Vector3<f64>, Vector3<f64>), KinematicsError> {
            let mut perturbed_qs = qs.to_vec();
            perturbed_qs[i] += epsilon;
            let perturbed_pose = robot.forward_ignoring_limits(&perturbed_qs)?;
            let perturbed_orientation = *perturbed_pose.rotation.unit_quaternion();

            let delta_position = (perturbed_pose.translation - current_position) / epsilon;
            let delta_orientation =
                (perturbed_orientation * current_orientation.inverse()).scaled_axis() / epsilon;
            Ok((delta_position, delta_orientation))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut jacobian = DMatrix::zeros(6, qs.len());
    for (i, (delta_position, delta_orientation)) in jacobian_columns.into_iter().enumerate() {
        jacobian.fixed_view_mut::<3, 1>(0, i).copy_from(&delta_position);
        jacobian.fixed_view_mut::<3, 1>(3, i).copy_from(&delta_orientation);
    }
    Ok(jacobian)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kinematic_traits::Pose;
    use crate::spatial::Rotation;
    use approx::assert_relative_eq;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const EPSILON: f64 = 1e-7;

    /// A single rotary joint of length 1 about Z: rotating it moves the end effector
    /// along Y and turns it about Z, so the derivative of both is 1.
    pub struct SingleRotaryJointRobot;

    impl Kinematics for SingleRotaryJointRobot {
        fn dof(&self) -> usize {
            1
        }

        fn forward(&self, qs: &[f64]) -> Result<Pose, KinematicsError> {
            self.forward_ignoring_limits(qs)
        }

        fn forward_ignoring_limits(&self, qs: &[f64]) -> Result<Pose, KinematicsError> {
            if qs.len() != 1 {
                return Err(KinematicsError::dimension(1, qs.len()));
            }
            let angle = qs[0];
            Ok(RigidTransform::new(
                Rotation::from_rpy(0.0, 0.0, angle),
                Vector3::new(angle.cos(), angle.sin(), 0.0),
            ))
        }
    }

    const ARM: &str = r#"
        <robot name="arm3">
            <link name="base"/>
            <link name="l1"/>
            <link name="l2"/>
            <link name="l3"/>
            <link name="l4"/>
            <link name="tool"/>
            <joint name="waist" type="revolute">
                <parent link="base"/><child link="l1"/>
                <origin xyz="0 0 0.4"/><axis xyz="0 0 1"/>
                <limit lower="-3" upper="3"/>
            </joint>
            <joint name="shoulder" type="revolute">
                <parent link="l1"/><child link="l2"/>
                <origin xyz="0 0.1 0" rpy="0.3 0 0"/><axis xyz="0 1 0"/>
                <limit lower="-2" upper="2"/>
            </joint>
            <joint name="mount" type="fixed">
                <parent link="l2"/><child link="l3"/>
                <origin xyz="0.5 0 0" rpy="0 0 0.2"/>
            </joint>
            <joint name="extend" type="prismatic">
                <parent link="l3"/><child link="l4"/>
                <origin xyz="0 0 0.1"/><axis xyz="1 0 1"/>
                <limit lower="0" upper="0.3"/>
            </joint>
            <joint name="wrist" type="continuous">
                <parent link="l4"/><child link="tool"/>
                <origin xyz="0.2 0 0" rpy="0 0.5 0"/><axis xyz="1 0 0"/>
            </joint>
        </robot>
    "#;

    fn arm() -> KinematicsSolver {
        KinematicsSolver::from_urdf_str(ARM, None).unwrap()
    }

    #[test]
    fn test_single_joint_numerical_jacobian() {
        let jacobian = compute_jacobian(&SingleRotaryJointRobot, &[0.0], EPSILON).unwrap();
        let mut expected = DMatrix::zeros(6, 1);
        expected[(1, 0)] = 1.0; // Y position is affected by the joint
        expected[(5, 0)] = 1.0; // Z orientation is affected by the joint
        assert_relative_eq!(jacobian, expected, epsilon = 1e-5);
    }

    #[test]
    fn test_shape_and_fixed_column() {
        let jacobian = arm().jacobian(&[0.1, 0.2, 0.0, 0.1, 0.4]).unwrap();
        assert_eq!(jacobian.shape(), (6, 5));
        assert!(jacobian.column(2).iter().all(|v| *v == 0.0));
        // Prismatic joint has no angular part
        assert!(jacobian.fixed_view::<3, 1>(3, 3).iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_analytic_matches_finite_difference() {
        let solver = arm();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let qs = [
                rng.gen_range(-3.0..3.0),
                rng.gen_range(-2.0..2.0),
                0.0,
                rng.gen_range(0.0..0.3),
                rng.gen_range(-6.0..6.0),
            ];
            let analytic = solver.jacobian(&qs).unwrap();
            let numerical = compute_jacobian(&solver, &qs, EPSILON).unwrap();
            assert_relative_eq!(analytic, numerical, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_jacobian_dimension_mismatch() {
        assert!(matches!(
            arm().jacobian(&[0.0; 3]),
            Err(KinematicsError::DimensionMismatch { expected: 5, found: 3 })
        ));
    }

    #[test]
    fn test_jacobian_checks_joint_limits() {
        let solver = arm();
        match solver.jacobian(&[0.1, 2.5, 0.0, 0.1, 0.4]) {
            Err(KinematicsError::JointLimitExceeded { joint, .. }) => assert_eq!(joint, "shoulder"),
            other => panic!("unexpected result {:?}", other),
        }
        assert!(matches!(
            Jacobian::analytic(&solver, &[0.1, 0.2, 0.0, 0.5, 0.4], EPSILON),
            Err(KinematicsError::JointLimitExceeded { .. })
        ));
        // The finite difference variant ignores limits
        assert!(compute_jacobian(&solver, &[0.1, 2.5, 0.0, 0.1, 0.4], EPSILON).is_ok());
    }

    #[test]
    fn test_analytic_wrapper() {
        let solver = arm();
        let qs = [0.1, 0.2, 0.0, 0.1, 0.4];
        let jacobian = Jacobian::analytic(&solver, &qs, EPSILON).unwrap();
        assert_eq!(jacobian.matrix(), &solver.jacobian(&qs).unwrap());
        assert_eq!(jacobian.condition_number(), f64::INFINITY);
    }

    #[test]
    fn test_condition_number() {
        let identity = DMatrix::<f64>::identity(6, 6);
        assert_relative_eq!(condition_number(&identity), 1.0, epsilon = 1e-12);

        let mut scaled = identity.clone();
        scaled[(0, 0)] = 4.0;
        assert_relative_eq!(condition_number(&scaled), 4.0, epsilon = 1e-9);

        // Fixed joint makes a zero column
        let j = arm().jacobian(&[0.1, 0.2, 0.0, 0.1, 0.4]).unwrap();
        assert_eq!(condition_number(&j), f64::INFINITY);

        let mut broken = identity;
        broken[(2, 2)] = f64::NAN;
        assert_eq!(condition_number(&broken), f64::INFINITY);
        assert_eq!(condition_number(&DMatrix::zeros(6, 0)), f64::INFINITY);
    }

    #[test]
    fn test_velocities_and_torques() {
        let jacobian = Jacobian::numerical(&SingleRotaryJointRobot, &[0.0], EPSILON).unwrap();

        // Moving along Y at 1 m/s while turning about Z at 1 rad/s needs 1 rad/s
        let desired = Vector6::new(0.0, 1.0, 0.0, 0.0, 0.0, 1.0);
        let velocities = jacobian.velocities_from_vector(&desired).unwrap();
        assert_eq!(velocities.len(), 1);
        assert_relative_eq!(velocities[0], 1.0, epsilon = 1e-5);

        let twist = Isometry3::new(Vector3::new(0.0, 1.0, 0.0), Vector3::new(0.0, 0.0, 1.0));
        let from_isometry = jacobian.velocities(&twist).unwrap();
        assert_relative_eq!(from_isometry[0], 1.0, epsilon = 1e-5);

        let wrench = Vector6::new(0.0, 2.0, 0.0, 0.0, 0.0, 0.5);
        let torques = jacobian.torques_from_vector(&wrench);
        assert_relative_eq!(torques[0], 2.5, epsilon = 1e-5);
    }

    #[test]
    fn test_velocities_square_jacobian() {
        let jacobian = Jacobian::new(DMatrix::<f64>::identity(6, 6) * 2.0, 1e-9);
        let v = jacobian
            .velocities_from_vector(&Vector6::new(1.0, 2.0, 3.0, 4.0, 5.0, 6.0))
            .unwrap();
        assert_relative_eq!(v, DVector::from_vec(vec![0.5, 1.0, 1.5, 2.0, 2.5, 3.0]), epsilon = 1e-12);
    }
}
