//! Action safety filter.
//!
//! Every commanded action passes [`SafetyFilter::filter`] before it reaches the robot. The
//! filter never fails on limit violations: it returns the closest admissible action if the
//! constrained solve succeeds, a per joint clipped action otherwise, and a zero action if the
//! input is not finite. Only inputs of the wrong shape are errors.

use std::fmt;
use std::time::{Duration, Instant};

use nalgebra::{DMatrix, DVector, Vector3};
use tracing::{debug, warn};

use crate::constraint_solver::{
    ActionProblem, ClippingSolver, ConstraintSolver, FallbackReason, SolveOutcome, WorkspaceConstraint,
};
use crate::error::KinematicsError;
use crate::safety_config::SafetyConfig;
use crate::utils::{correlation_id, elapsed_us, is_valid, is_valid_matrix};

/// Joints whose safe action differs from the commanded one by more than this are reported.
pub const CLIP_TOLERANCE: f64 = 1e-6;

/// Slack allowed when checking a solver answer against the action box.
const BOX_TOLERANCE: f64 = 1e-9;

/// How the safe action was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterPath {
    /// Constrained solve succeeded.
    Optimized,
    /// Per joint clipping.
    Clipped,
    /// Input was not finite, zero action returned.
    Rejected,
}

impl FilterPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterPath::Optimized => "optimized",
            FilterPath::Clipped => "clipped",
            FilterPath::Rejected => "rejected",
        }
    }
}

impl fmt::Display for FilterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterResult {
    pub safe_action: DVector<f64>,
    /// Joints where the safe action differs from the commanded one.
    pub clipped_joint_indices: Vec<usize>,
    pub violation_count: usize,
    /// Iterations of the constrained solve, 0 if it did not produce the result.
    pub solve_iterations: usize,
    pub elapsed: Duration,
    pub path: FilterPath,
    /// Why the constrained solve was not used, if it was not.
    pub fallback: Option<FallbackReason>,
}

impl FilterResult {
    pub fn is_modified(&self) -> bool {
        !self.clipped_joint_indices.is_empty()
    }
}

/// Rewrites commanded joint actions (velocities) so that position, velocity, torque and,
/// when possible, workspace limits hold after one control period.
#[derive(Debug)]
pub struct SafetyFilter {
    config: SafetyConfig,
    solver: Box<dyn ConstraintSolver>,
    fallback: ClippingSolver,
    correlation_id: String,
}

impl SafetyFilter {
    /// Validates the configuration and picks the strategy: the QP solver if the constrained
    /// solve is enabled and compiled in (feature `qp`), clipping otherwise.
    pub fn new(config: SafetyConfig) -> Result<Self, KinematicsError> {
        let solver = default_solver(&config);
        Self::with_solver(config, solver)
    }

    /// Filter with a custom primary strategy. Clipping stays the fallback.
    pub fn with_solver(config: SafetyConfig, solver: Box<dyn ConstraintSolver>) -> Result<Self, KinematicsError> {
        config.validate()?;
        Ok(SafetyFilter {
            config,
            solver,
            fallback: ClippingSolver,
            correlation_id: correlation_id(),
        })
    }

    pub fn config(&self) -> &SafetyConfig {
        &self.config
    }

    pub fn solver_name(&self) -> &'static str {
        self.solver.name()
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Filters one action.
    ///
    /// `joint_vel` is only checked for its length. The workspace constraint is applied when
    /// workspace bounds are configured and both `ee_pos` and `jacobian` (6 x N, or at least
    /// the 3 linear rows) are given.
    ///
    /// # Arguments
    ///
    /// * `action` - Commanded joint velocities
    /// * `joint_pos` - Current joint positions
    /// * `joint_vel` - Current joint velocities, optional
    /// * `ee_pos` - Current end effector position, optional
    /// * `jacobian` - Jacobian at `joint_pos`, optional
    ///
    /// # Returns
    ///
    /// `FilterResult` with the safe action and how it was obtained (`Optimized`, `Clipped`
    /// or `Rejected`). Only wrong input lengths are errors, non-finite input gives the zero
    /// action with `Rejected`.
    pub fn filter(
        &self,
        action: &[f64],
        joint_pos: &[f64],
        joint_vel: Option<&[f64]>,
        ee_pos: Option<&Vector3<f64>>,
        jacobian: Option<&DMatrix<f64>>,
    ) -> Result<FilterResult, KinematicsError> {
        let started = Instant::now();
        let n = self.config.dof();

        let mut problem = ActionProblem::new(action, joint_pos, &self.config.joint_limits, self.config.dt)?;
        if let Some(joint_vel) = joint_vel {
            if joint_vel.len() != n {
                return Err(KinematicsError::dimension(n, joint_vel.len()));
            }
        }
        if let Some(jacobian) = jacobian {
            if jacobian.nrows() < 3 {
                return Err(KinematicsError::dimension(6, jacobian.nrows()));
            }
            if jacobian.ncols() != n {
                return Err(KinematicsError::dimension(n, jacobian.ncols()));
            }
        }

        // Non-finite ee_pos or jacobian rejects even without workspace bounds.
        let finite = is_valid(action)
            && is_valid(joint_pos)
            && ee_pos.is_none_or(|p| is_valid(p.as_slice()))
            && jacobian.is_none_or(is_valid_matrix);
        if !finite {
            return Ok(self.reject(n, started));
        }

        if let (Some(bounds), Some(ee_pos), Some(jacobian)) = (&self.config.workspace_bounds, ee_pos, jacobian) {
            problem = problem.with_workspace(WorkspaceConstraint {
                bounds,
                ee_pos,
                jacobian,
            })?;
        }

        let (outcome, path, fallback) = if !self.config.use_constrained_solve || self.solver.is_fallback() {
            (self.clip(&problem), FilterPath::Clipped, Some(FallbackReason::Disabled))
        } else {
            match self.solver.solve(&problem).and_then(|outcome| admissible(&problem, outcome)) {
                Ok(outcome) => (outcome, FilterPath::Optimized, None),
                Err(reason) => {
                    warn!(
                        correlation_id = %self.correlation_id,
                        solver = self.solver.name(),
                        reason = %reason,
                        "safety.fallback"
                    );
                    (self.clip(&problem), FilterPath::Clipped, Some(reason))
                }
            }
        };

        let clipped_joint_indices: Vec<usize> = action
            .iter()
            .zip(outcome.action.iter())
            .enumerate()
            .filter(|(_, (commanded, safe))| (*commanded - *safe).abs() > CLIP_TOLERANCE)
            .map(|(i, _)| i)
            .collect();

        let result = FilterResult {
            safe_action: outcome.action,
            violation_count: clipped_joint_indices.len(),
            clipped_joint_indices,
            solve_iterations: if path == FilterPath::Optimized { outcome.iterations } else { 0 },
            elapsed: started.elapsed(),
            path,
            fallback,
        };
        self.log_filtered(&result, started);
        Ok(result)
    }

    fn clip(&self, problem: &ActionProblem) -> SolveOutcome {
        SolveOutcome {
            action: self.fallback.clip(problem),
            iterations: 0,
        }
    }

    /// Zero action for non-finite input, every joint counts as overridden.
    fn reject(&self, n: usize, started: Instant) -> FilterResult {
        warn!(correlation_id = %self.correlation_id, num_joints = n, "safety.rejected");
        let result = FilterResult {
            safe_action: DVector::zeros(n),
            clipped_joint_indices: (0..n).collect(),
            violation_count: n,
            solve_iterations: 0,
            elapsed: started.elapsed(),
            path: FilterPath::Rejected,
            fallback: None,
        };
        self.log_filtered(&result, started);
        result
    }

    fn log_filtered(&self, result: &FilterResult, started: Instant) {
        let filter_time_us = elapsed_us(started);
        if result.is_modified() {
            warn!(
                correlation_id = %self.correlation_id,
                clipped_joints = ?result.clipped_joint_indices,
                violations = result.violation_count,
                qp_iterations = result.solve_iterations,
                filter_time_us,
                path = %result.path,
                "safety.filtered"
            );
        } else {
            debug!(
                correlation_id = %self.correlation_id,
                clipped_joints = ?result.clipped_joint_indices,
                violations = result.violation_count,
                qp_iterations = result.solve_iterations,
                filter_time_us,
                path = %result.path,
                "safety.filtered"
            );
        }
    }
}

#[cfg(feature = "qp")]
fn default_solver(config: &SafetyConfig) -> Box<dyn ConstraintSolver> {
    if config.use_constrained_solve {
        Box::new(crate::constraint_solver::QpSolver::new(config.solver_timeout))
    } else {
        Box::new(ClippingSolver)
    }
}

#[cfg(not(feature = "qp"))]
fn default_solver(_config: &SafetyConfig) -> Box<dyn ConstraintSolver> {
    Box::new(ClippingSolver)
}

/// Accepts a solver answer only if it is finite and inside the action box.
fn admissible(problem: &ActionProblem, outcome: SolveOutcome) -> Result<SolveOutcome, FallbackReason> {
    if outcome.action.len() != problem.dof() || !is_valid(outcome.action.as_slice()) {
        return Err(FallbackReason::InvalidSolution);
    }
    let (lower, upper) = problem.action_bounds();
    let inside = outcome
        .action
        .iter()
        .enumerate()
        .all(|(i, u)| *u >= lower[i] - BOX_TOLERANCE && *u <= upper[i] + BOX_TOLERANCE);
    if !inside {
        return Err(FallbackReason::InvalidSolution);
    }
    Ok(outcome)
}
