use anyhow::Result;
use nalgebra::Vector3;
use rs_chain_kinematics::kinematics_impl::KinematicsSolver;
use rs_chain_kinematics::safety::SafetyFilter;
use rs_chain_kinematics::safety_config::{JointLimits, SafetyConfig, WorkspaceBounds};
use rs_chain_kinematics::spatial::RigidTransform;
use rs_chain_kinematics::utils::dump_joints;
use tracing_subscriber::EnvFilter;

const UR_ARM: &str = include_str!("tests/data/ur_arm.urdf");

/// Usage example. Set RUST_LOG=debug to see the structured events.
fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let robot = KinematicsSolver::from_urdf_str(UR_ARM, None)?;
    println!(
        "Chain '{}' from {} to {}: {:?}",
        robot.chain().robot_name(),
        robot.chain().base_link(),
        robot.chain().end_effector_link(),
        robot.joint_names()
    );

    let joints = [0.3, -1.2, 1.4, -0.5, 0.8, 0.2, 0.0];
    println!("Joints: {}", dump_joints(&joints));
    let pose = robot.end_effector_pose(&joints)?;
    println!("End effector position: {:.4}", pose.translation.transpose());
    for (link, frame) in robot.forward_kinematics(&joints)? {
        println!("  {:<16} {:.4}", link, frame.translation.transpose());
    }

    let jacobian = robot.jacobian(&joints)?;
    println!("Jacobian: {:.3}", jacobian);

    println!("Inverse kinematics, starting from zero:");
    let target = RigidTransform::from_translation(pose.translation);
    let result = robot.inverse_kinematics(&target, None, 100, 1e-6)?;
    match &result.joint_angles {
        Some(solution) => println!(
            "  converged: {} after {} iterations, error {:.2e}, joints {}",
            result.converged,
            result.iterations,
            result.final_error,
            dump_joints(solution.as_slice())
        ),
        None => println!("  no usable solution, error {:.2e}", result.final_error),
    }

    println!("Safety filter:");
    let limits = JointLimits::from_chain(robot.chain());
    let config = SafetyConfig::new(limits)
        .with_dt(0.01)
        .with_workspace_bounds(WorkspaceBounds::new(
            Vector3::new(-1.0, -1.0, 0.0),
            Vector3::new(1.0, 1.0, 1.2),
        ));
    let filter = SafetyFilter::new(config)?;
    let action = [5.0, -0.5, 0.5, 0.0, 0.0, 4.0, 1.0];
    let filtered = filter.filter(
        &action,
        &joints,
        None,
        Some(&pose.translation),
        Some(&jacobian),
    )?;
    println!(
        "  {} by {} in {:?}, clipped joints {:?}",
        filtered.path,
        filter.solver_name(),
        filtered.elapsed,
        filtered.clipped_joint_indices
    );
    println!("  commanded {}", dump_joints(&action));
    println!("  safe      {}", dump_joints(filtered.safe_action.as_slice()));
    Ok(())
}
