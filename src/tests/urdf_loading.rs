use approx::assert_relative_eq;
use nalgebra::Vector3;
use std::f64::consts::PI;

use super::{SAFETY_YAML, TWO_JOINT, UR_ARM};
use crate::chain::{JointKind, KinematicChain};
use crate::error::KinematicsError;
use crate::kinematics_impl::KinematicsSolver;
use crate::path_policy::PathPolicy;
use crate::safety_config::JointLimits;

fn ur_arm() -> KinematicChain {
    KinematicChain::from_urdf_file(UR_ARM, None, &PathPolicy::permissive()).expect("Failed to load UR arm")
}

#[test]
fn test_ur_arm_structure() {
    let chain = ur_arm();
    assert_eq!(chain.robot_name(), "ur_arm");
    assert_eq!(chain.base_link(), "base_link");
    assert_eq!(chain.end_effector_link(), "ee_link");
    assert_eq!(
        chain.joint_names(),
        vec![
            "shoulder_pan_joint",
            "shoulder_lift_joint",
            "elbow_joint",
            "wrist_1_joint",
            "wrist_2_joint",
            "wrist_3_joint",
            "ee_fixed_joint"
        ]
    );
    let kinds: Vec<JointKind> = chain.joints().iter().map(|j| j.kind).collect();
    assert_eq!(kinds[5], JointKind::Continuous);
    assert_eq!(kinds[6], JointKind::Fixed);

    // ${radians(..)} limits
    let (lower, upper) = chain.joints()[0].bounds();
    assert_relative_eq!(lower, -2.0 * PI, epsilon = 1e-12);
    assert_relative_eq!(upper, 2.0 * PI, epsilon = 1e-12);
    assert_eq!(chain.joints()[5].bounds(), (f64::NEG_INFINITY, f64::INFINITY));
}

#[test]
fn test_ur_arm_limits_from_description() {
    let limits = JointLimits::from_chain(&ur_arm());
    assert_eq!(limits.len(), 7);
    assert_eq!(limits.vel_max, vec![3.15, 3.15, 3.15, 3.2, 3.2, 3.2, 0.0]);
    assert_eq!(limits.torque_max, vec![150.0, 150.0, 150.0, 28.0, 28.0, 28.0, 0.0]);
    assert_eq!(limits.pos_min[3], -6.2832);
    assert_eq!(limits.pos_max[5], f64::INFINITY);
    assert!(limits.validate().is_ok());
}

#[test]
fn test_ur_arm_zero_pose() {
    let solver = KinematicsSolver::new(ur_arm());
    let poses = solver.forward_kinematics(&[0.0; 7]).unwrap();
    assert_eq!(poses.len(), 8);
    assert_relative_eq!(
        poses["shoulder_link"].translation,
        Vector3::new(0.0, 0.0, 0.089159),
        epsilon = 1e-12
    );
    assert_relative_eq!(
        poses["wrist_1_link"].translation,
        Vector3::new(0.81725, 0.01615, 0.089159),
        epsilon = 1e-6
    );
    assert_relative_eq!(
        poses["ee_link"].translation,
        Vector3::new(0.81725, 0.19145, -0.005491),
        epsilon = 1e-6
    );
}

#[test]
fn test_shorter_chain_from_file() {
    let chain = KinematicChain::from_urdf_file(UR_ARM, Some("forearm_link"), &PathPolicy::permissive()).unwrap();
    assert_eq!(chain.len(), 3);
    assert_eq!(chain.end_effector_link(), "forearm_link");
}

#[test]
fn test_two_joint_reference_points() {
    let solver = KinematicsSolver::new(
        KinematicChain::from_urdf_file(TWO_JOINT, None, &PathPolicy::permissive()).unwrap(),
    );
    let at_zero = solver.end_effector_pose(&[0.0, 0.0]).unwrap();
    assert_relative_eq!(at_zero.translation, Vector3::new(1.0, 0.0, 1.0), epsilon = 1e-12);
    let turned = solver.end_effector_pose(&[PI / 2.0, 0.5]).unwrap();
    assert_relative_eq!(turned.translation, Vector3::new(0.0, 1.5, 1.0), epsilon = 1e-9);
}

#[test]
fn test_strict_policy_blocks_description() {
    let allowed = std::env::temp_dir().join("rs_chain_kinematics_assets_only");
    let policy = PathPolicy::new([&allowed], true);
    assert!(matches!(
        KinematicChain::from_urdf_file(UR_ARM, None, &policy),
        Err(KinematicsError::PathNotAllowed(_))
    ));

    let lenient = PathPolicy::new([&allowed], false);
    assert!(KinematicChain::from_urdf_file(UR_ARM, None, &lenient).is_ok());
}

#[test]
fn test_policy_allows_data_directory() {
    let policy = PathPolicy::new(["src/tests/data"], true);
    assert!(KinematicChain::from_urdf_file(UR_ARM, None, &policy).is_ok());
}

#[test]
fn test_unsupported_extension() {
    assert!(matches!(
        KinematicChain::from_urdf_file(SAFETY_YAML, None, &PathPolicy::permissive()),
        Err(KinematicsError::UnsupportedExtension(_))
    ));
}

#[test]
fn test_missing_file() {
    assert!(matches!(
        KinematicChain::from_urdf_file("src/tests/data/absent.urdf", None, &PathPolicy::permissive()),
        Err(KinematicsError::Io { .. })
    ));
}
