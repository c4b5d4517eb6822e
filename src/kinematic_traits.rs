use nalgebra::DVector;

use crate::error::KinematicsError;
use crate::spatial::RigidTransform;

/// Pose of a link (usually the end effector) in the base frame of the chain.
/// ```
/// use rs_chain_kinematics::kinematic_traits::Pose;
/// use nalgebra::Vector3;
///
/// // The quaternion is given as [x, y, z, w] and is normalized on construction.
/// let pose = Pose::from_xyz_quat([1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 1.0]).unwrap();
/// let p = pose.transform_point(&Vector3::new(1.0, 0.0, 0.0));
/// assert!((p - Vector3::new(1.0, 1.0, 0.0)).norm() < 1e-9);
/// ```
pub type Pose = RigidTransform;

/// Joint values of a chain in chain order: radians for revolute and continuous joints,
/// meters for prismatic ones. Fixed joints occupy a slot that is ignored.
pub type Joints = DVector<f64>;

/// Anything that maps joint values to the pose of its end effector.
pub trait Kinematics: Send + Sync {
    /// Number of joints (length of the joint vector).
    fn dof(&self) -> usize;

    /// End effector pose. Fails if the length does not match or a joint value is
    /// outside its declared limits.
    fn forward(&self, qs: &[f64]) -> Result<Pose, KinematicsError>;

    /// End effector pose without the joint limit check. Used for numerical
    /// differentiation and iterative solvers that may step over a limit temporarily.
    fn forward_ignoring_limits(&self, qs: &[f64]) -> Result<Pose, KinematicsError>;
}
