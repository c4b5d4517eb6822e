//! Strategies that turn a commanded joint action into one that respects the limits.
//!
//! [`QpSolver`] (feature `qp`) finds the closest admissible action with the Clarabel interior
//! point solver and may fail (infeasible problem, time budget exceeded). [`ClippingSolver`]
//! clips per joint and always produces an answer, it is the fallback of the safety filter.

use std::fmt;

use nalgebra::{DMatrix, DVector, Vector3};

use crate::error::KinematicsError;
use crate::safety_config::{JointLimits, WorkspaceBounds};

#[cfg(feature = "qp")]
use std::time::Instant;

#[cfg(feature = "qp")]
use clarabel::algebra::CscMatrix;
#[cfg(feature = "qp")]
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT::NonnegativeConeT,
};

/// Linearized end effector constraint: `lower <= ee_pos + J_pos · u · dt <= upper`.
#[derive(Debug, Clone, Copy)]
pub struct WorkspaceConstraint<'a> {
    pub bounds: &'a WorkspaceBounds,
    pub ee_pos: &'a Vector3<f64>,
    /// Jacobian at the current configuration, only the first three (linear) rows are used.
    pub jacobian: &'a DMatrix<f64>,
}

/// One filtering problem: the commanded action (joint velocities), the current joint
/// positions and the limits to respect within one control period `dt`.
#[derive(Debug, Clone, Copy)]
pub struct ActionProblem<'a> {
    action: &'a [f64],
    joint_pos: &'a [f64],
    limits: &'a JointLimits,
    dt: f64,
    workspace: Option<WorkspaceConstraint<'a>>,
}

impl<'a> ActionProblem<'a> {
    /// Checks that the action, the position and every limit vector have the same length.
    pub fn new(
        action: &'a [f64],
        joint_pos: &'a [f64],
        limits: &'a JointLimits,
        dt: f64,
    ) -> Result<Self, KinematicsError> {
        let n = limits.len();
        for len in [action.len(), joint_pos.len(), limits.pos_max.len(), limits.vel_max.len(), limits.torque_max.len()] {
            if len != n {
                return Err(KinematicsError::dimension(n, len));
            }
        }
        Ok(ActionProblem {
            action,
            joint_pos,
            limits,
            dt,
            workspace: None,
        })
    }

    /// Adds the workspace constraint. The Jacobian must have at least 3 rows and one column
    /// per joint.
    pub fn with_workspace(mut self, workspace: WorkspaceConstraint<'a>) -> Result<Self, KinematicsError> {
        let jacobian = workspace.jacobian;
        if jacobian.nrows() < 3 {
            return Err(KinematicsError::dimension(6, jacobian.nrows()));
        }
        if jacobian.ncols() != self.dof() {
            return Err(KinematicsError::dimension(self.dof(), jacobian.ncols()));
        }
        self.workspace = Some(workspace);
        Ok(self)
    }

    pub fn dof(&self) -> usize {
        self.action.len()
    }

    pub fn action(&self) -> &[f64] {
        self.action
    }

    pub fn joint_pos(&self) -> &[f64] {
        self.joint_pos
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn workspace(&self) -> Option<&WorkspaceConstraint<'a>> {
        self.workspace.as_ref()
    }

    /// Rate bound of joint `i`: the tighter of velocity and torque limits.
    fn rate_bound(&self, i: usize) -> f64 {
        self.limits.vel_max[i].min(self.limits.torque_max[i])
    }

    /// Per joint interval of admissible actions, the intersection of the velocity, torque
    /// and next-step position constraints. May be empty (lower > upper) if the joint is
    /// already too far outside its position range.
    pub fn action_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        (0..self.dof())
            .map(|i| {
                let rate = self.rate_bound(i);
                let q = self.joint_pos[i];
                let lower = (-rate).max((self.limits.pos_min[i] - q) / self.dt);
                let upper = rate.min((self.limits.pos_max[i] - q) / self.dt);
                (lower, upper)
            })
            .unzip()
    }
}

/// Result of a successful solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveOutcome {
    pub action: DVector<f64>,
    /// Solver iterations, 0 for clipping.
    pub iterations: usize,
}

/// Why the constrained solve was not used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Constrained solve is switched off or not compiled in.
    Disabled,
    /// The solver could not be set up or failed numerically.
    SolverError,
    /// The constraints have no common solution.
    Infeasible,
    /// The time budget was exceeded.
    Timeout,
    /// The solver claimed success but the solution violates the constraints.
    InvalidSolution,
}

impl FallbackReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackReason::Disabled => "disabled",
            FallbackReason::SolverError => "solver_error",
            FallbackReason::Infeasible => "infeasible",
            FallbackReason::Timeout => "timeout",
            FallbackReason::InvalidSolution => "invalid_solution",
        }
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy used by the safety filter.
pub trait ConstraintSolver: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// True for strategies that are themselves the fallback (results are reported as
    /// clipped, not optimized).
    fn is_fallback(&self) -> bool {
        false
    }

    fn solve(&self, problem: &ActionProblem) -> Result<SolveOutcome, FallbackReason>;
}

/// Per joint clipping. Does not know about workspace bounds.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClippingSolver;

impl ClippingSolver {
    /// Clips the action to the velocity and torque limits, clips the resulting next position
    /// to the position range and back-solves the action from it. The result is clipped to
    /// the rate limits once more, so these hold even if the joint is already outside of its
    /// position range.
    pub fn clip(&self, problem: &ActionProblem) -> DVector<f64> {
        let limits = problem.limits;
        let dt = problem.dt;
        DVector::from_iterator(
            problem.dof(),
            (0..problem.dof()).map(|i| {
                let q = problem.joint_pos[i];
                let vel = limits.vel_max[i];
                let torque = limits.torque_max[i];
                let u = clamp(problem.action[i], -vel, vel);
                let u = clamp(u, -torque, torque);
                let next = clamp(q + u * dt, limits.pos_min[i], limits.pos_max[i]);
                let rate = problem.rate_bound(i);
                clamp((next - q) / dt, -rate, rate)
            }),
        )
    }
}

impl ConstraintSolver for ClippingSolver {
    fn name(&self) -> &'static str {
        "clipping"
    }

    fn is_fallback(&self) -> bool {
        true
    }

    fn solve(&self, problem: &ActionProblem) -> Result<SolveOutcome, FallbackReason> {
        Ok(SolveOutcome {
            action: self.clip(problem),
            iterations: 0,
        })
    }
}

/// Does not panic on NaN (unlike `f64::clamp`), the bound wins.
fn clamp(value: f64, lower: f64, upper: f64) -> f64 {
    value.max(lower).min(upper)
}

/// Quadratic program `min ½‖u - a‖²` subject to the action box and, if given, the linearized
/// workspace constraint, solved with Clarabel.
#[cfg(feature = "qp")]
#[derive(Debug, Clone)]
pub struct QpSolver {
    /// Wall clock budget in seconds.
    timeout: f64,
    max_iterations: u32,
    /// Allowed constraint violation of a reported solution.
    tolerance: f64,
}

#[cfg(feature = "qp")]
impl QpSolver {
    pub fn new(timeout: f64) -> Self {
        QpSolver {
            timeout,
            max_iterations: 100,
            tolerance: 1e-6,
        }
    }

    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn timeout(&self) -> f64 {
        self.timeout
    }

    /// Constraint rows `a · u <= b`. Rows with infinite bounds are left out.
    fn constraint_rows(&self, problem: &ActionProblem, lower: &[f64], upper: &[f64]) -> (DMatrix<f64>, Vec<f64>) {
        let n = problem.dof();
        let mut rows: Vec<(DVector<f64>, f64)> = Vec::new();
        for i in 0..n {
            let mut unit = DVector::zeros(n);
            unit[i] = 1.0;
            if upper[i].is_finite() {
                rows.push((unit.clone(), upper[i]));
            }
            if lower[i].is_finite() {
                rows.push((-unit, -lower[i]));
            }
        }
        if let Some(workspace) = problem.workspace() {
            for k in 0..3 {
                let row: DVector<f64> = workspace.jacobian.row(k).transpose() * problem.dt();
                let ee = workspace.ee_pos[k];
                if workspace.bounds.upper[k].is_finite() {
                    rows.push((row.clone(), workspace.bounds.upper[k] - ee));
                }
                if workspace.bounds.lower[k].is_finite() {
                    rows.push((-row, ee - workspace.bounds.lower[k]));
                }
            }
        }
        let a = DMatrix::from_fn(rows.len(), n, |r, c| rows[r].0[c]);
        let b = rows.into_iter().map(|(_, b)| b).collect();
        (a, b)
    }
}

#[cfg(feature = "qp")]
impl ConstraintSolver for QpSolver {
    fn name(&self) -> &'static str {
        "clarabel_qp"
    }

    fn solve(&self, problem: &ActionProblem) -> Result<SolveOutcome, FallbackReason> {
        let started = Instant::now();
        let n = problem.dof();
        let (lower, upper) = problem.action_bounds();
        if lower.iter().zip(&upper).any(|(lo, hi)| lo > hi) {
            return Err(FallbackReason::Infeasible);
        }

        let (a, b) = self.constraint_rows(problem, &lower, &upper);
        if b.is_empty() {
            // Nothing bounds the action
            return Ok(SolveOutcome {
                action: DVector::from_column_slice(problem.action()),
                iterations: 0,
            });
        }

        let p_csc = dmatrix_to_csc_upper_tri(&DMatrix::identity(n, n));
        let a_csc = dmatrix_to_csc(&a);
        let q: Vec<f64> = problem.action().iter().map(|v| -v).collect();
        let cones = vec![NonnegativeConeT(b.len())];

        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.max_iterations)
            .time_limit(self.timeout)
            .verbose(false)
            .build()
            .map_err(|_| FallbackReason::SolverError)?;

        let mut solver = DefaultSolver::new(&p_csc, &q, &a_csc, &b, &cones, settings)
            .map_err(|_| FallbackReason::SolverError)?;
        solver.solve();
        let solution = &solver.solution;

        match solution.status {
            SolverStatus::Solved | SolverStatus::AlmostSolved => {}
            SolverStatus::PrimalInfeasible
            | SolverStatus::DualInfeasible
            | SolverStatus::AlmostPrimalInfeasible
            | SolverStatus::AlmostDualInfeasible => return Err(FallbackReason::Infeasible),
            SolverStatus::MaxTime => return Err(FallbackReason::Timeout),
            _ => return Err(FallbackReason::SolverError),
        }
        if started.elapsed().as_secs_f64() > self.timeout {
            return Err(FallbackReason::Timeout);
        }

        if solution.x.len() != n || !crate::utils::is_valid(&solution.x) {
            return Err(FallbackReason::InvalidSolution);
        }
        let x = DVector::from_column_slice(&solution.x);
        let slack = &a * &x;
        let violated = slack
            .iter()
            .zip(&b)
            .any(|(ax, b)| *ax > b + self.tolerance * (1.0 + b.abs()));
        if violated {
            return Err(FallbackReason::InvalidSolution);
        }

        // Interior point solutions may sit marginally outside the box
        let action = DVector::from_iterator(n, x.iter().enumerate().map(|(i, u)| clamp(*u, lower[i], upper[i])));
        Ok(SolveOutcome {
            action,
            iterations: solution.iterations as usize,
        })
    }
}

/// Convert a nalgebra `DMatrix<f64>` to a Clarabel `CscMatrix<f64>` (full matrix).
#[cfg(feature = "qp")]
fn dmatrix_to_csc(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v != 0.0 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Upper triangle of a symmetric matrix as `CscMatrix<f64>`, the form Clarabel expects for P.
#[cfg(feature = "qp")]
fn dmatrix_to_csc_upper_tri(m: &DMatrix<f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..=j.min(nrows.saturating_sub(1)) {
            let v = m[(i, j)];
            if v != 0.0 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}
