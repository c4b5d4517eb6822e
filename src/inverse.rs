//! Position-only inverse kinematics by pseudo-inverse iteration.

use std::time::Instant;

use nalgebra::DVector;
use tracing::debug;

use crate::error::KinematicsError;
use crate::kinematic_traits::Joints;
use crate::kinematics_impl::KinematicsSolver;
use crate::spatial::RigidTransform;
use crate::utils::{elapsed_us, is_valid};

pub const DEFAULT_MAX_ITERATIONS: usize = 100;
pub const DEFAULT_TOLERANCE: f64 = 1e-6;

/// Singular values below this are ignored by the pseudo inverse.
const PSEUDO_INVERSE_EPSILON: f64 = 1e-10;

/// Outcome of [`KinematicsSolver::inverse_kinematics`]. Not converging is a normal outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct IkResult {
    /// Best configuration found. `None` if it is not finite or lies outside joint limits.
    pub joint_angles: Option<Joints>,
    pub converged: bool,
    /// Number of update steps taken.
    pub iterations: usize,
    /// Position error of the returned configuration.
    pub final_error: f64,
}

impl KinematicsSolver {
    /// Drives the end effector position towards `target.translation`, starting from `q0`
    /// (zeros if not given). Orientation of the target is ignored.
    ///
    /// At every step `q += pinv(J_pos) · (target - current)`, until the position error drops
    /// below `tolerance` or `max_iterations` steps were taken. The configuration with the
    /// lowest error is returned.
    ///
    /// # Arguments
    ///
    /// * `target` - Desired end effector pose, only the translation is used
    /// * `q0` - Starting configuration, must have the length of the chain
    /// * `max_iterations` - Upper bound on update steps
    /// * `tolerance` - Position error (meters) at which the iteration stops
    ///
    /// # Returns
    ///
    /// `IkResult` with the best configuration, or `joint_angles = None` when that
    /// configuration is outside the joint limits. Non-convergence is not an error.
    pub fn inverse_kinematics(
        &self,
        target: &RigidTransform,
        q0: Option<&[f64]>,
        max_iterations: usize,
        tolerance: f64,
    ) -> Result<IkResult, KinematicsError> {
        let started = Instant::now();
        let mut q = match q0 {
            Some(q0) => {
                self.validate_dimension(q0)?;
                DVector::from_column_slice(q0)
            }
            None => DVector::zeros(self.chain().len()),
        };

        let mut best_q = q.clone();
        let mut best_error = f64::NAN;
        let mut iterations = 0;
        let mut converged = false;

        loop {
            let current = self.end_effector_unchecked(q.as_slice());
            let error = target.translation - current.translation;
            let error_norm = error.norm();
            if best_error.is_nan() || error_norm < best_error {
                best_q.copy_from(&q);
                best_error = error_norm;
            }
            if error_norm < tolerance {
                converged = true;
                break;
            }
            if iterations >= max_iterations {
                break;
            }

            let positional = self.jacobian_unchecked(q.as_slice()).rows(0, 3).into_owned();
            let Ok(pseudo_inverse) = positional.pseudo_inverse(PSEUDO_INVERSE_EPSILON) else {
                break;
            };
            q += pseudo_inverse * DVector::from_column_slice(error.as_slice());
            iterations += 1;
        }

        let usable = is_valid(best_q.as_slice()) && self.check_joint_limits(best_q.as_slice())?.is_empty();
        let result = IkResult {
            joint_angles: usable.then_some(best_q),
            converged: converged && usable,
            iterations,
            final_error: best_error,
        };

        debug!(
            correlation_id = %self.correlation_id(),
            converged = result.converged,
            iterations = result.iterations,
            final_error = result.final_error,
            ik_time_us = elapsed_us(started),
            "ik.solve"
        );
        Ok(result)
    }
}
