//! Kinematics of serial robot chains described in URDF, paired with a real-time action safety
//! filter.
//!
//! The chain is extracted once from the robot description (base link to end effector link) and
//! then answers forward kinematics (single and batched), geometric Jacobian and position-only
//! inverse kinematics queries. The safety filter rewrites every commanded joint action so that
//! position, velocity, torque and workspace limits hold after one control period, using a small
//! quadratic program with a per joint clipping fallback.
//!
//! # Features
//!
//! - SE(3) algebra on unit quaternions, always normalized.
//! - Revolute, continuous, prismatic and fixed joints. Fixed joints stay in the chain and take a
//!   slot in the joint vector that is ignored.
//! - Forward kinematics checks joint limits and never clamps. Batched forward kinematics runs in
//!   parallel and gives the same results as row by row calls.
//! - Analytic geometric Jacobian with condition number, finite difference Jacobian for any
//!   [`kinematic_traits::Kinematics`] implementation, joint velocities and torques from end
//!   effector twists and wrenches.
//! - Pseudo-inverse inverse kinematics. Not converging is a result, not an error.
//! - Safety filter that always returns a bounded action: optimized (feature `qp`), clipped, or
//!   zero for non-finite input, with diagnostics for monitoring.
//! - Chain cache keyed by the canonical description path, path allowlist and YAML configuration
//!   (feature `allow_filesystem`).
//!
//! # Example
//!
//! ```
//! use rs_chain_kinematics::kinematics_impl::KinematicsSolver;
//!
//! let urdf = r#"
//!     <robot name="two_joint">
//!         <link name="base"/><link name="upper"/><link name="tool"/>
//!         <joint name="turn" type="revolute">
//!             <parent link="base"/><child link="upper"/>
//!             <origin xyz="0 0 1"/><axis xyz="0 0 1"/>
//!             <limit lower="-3.14" upper="3.14"/>
//!         </joint>
//!         <joint name="slide" type="prismatic">
//!             <parent link="upper"/><child link="tool"/>
//!             <origin xyz="1 0 0"/><axis xyz="1 0 0"/>
//!             <limit lower="0" upper="1"/>
//!         </joint>
//!     </robot>"#;
//!
//! let solver = KinematicsSolver::from_urdf_str(urdf, None).unwrap();
//! let pose = solver.end_effector_pose(&[std::f64::consts::FRAC_PI_2, 0.5]).unwrap();
//! assert!((pose.translation.y - 1.5).abs() < 1e-9);
//! ```

pub mod error;
pub mod spatial;
pub mod kinematic_traits;

pub mod urdf;
pub mod chain;

pub mod kinematics_impl;
pub mod jacobian;
pub mod inverse;

pub mod utils;

#[cfg(feature = "allow_filesystem")]
pub mod path_policy;
#[cfg(feature = "allow_filesystem")]
pub mod cache;

pub mod safety_config;
pub mod constraint_solver;
pub mod safety;

#[cfg(test)]
#[cfg(feature = "allow_filesystem")]
mod tests;
