//! Limits and solver settings of the safety filter.
//!
//! The configuration can be built in code, derived from the robot description, or read from
//! YAML (feature `allow_filesystem`):
//!
//! ```yaml
//! joint_limits:
//!   pos_min: [-1.0, -1.0]
//!   pos_max: [1.0, 1.0]
//!   vel_max: [0.5, 0.5]
//!   torque_max: [0.5, 0.5]
//! workspace_bounds:
//!   lower: [-0.8, -0.8, 0.0]
//!   upper: [0.8, 0.8, 1.2]
//! dt: 0.1
//! use_constrained_solve: true
//! solver_timeout: 0.002
//! ```
//! Everything except `joint_limits` is optional.

use std::time::Duration;

use nalgebra::Vector3;
use serde::Deserialize;

use crate::chain::KinematicChain;
use crate::error::KinematicsError;

#[cfg(feature = "allow_filesystem")]
use std::path::Path;

/// Per joint limits, all vectors have the length of the chain.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JointLimits {
    pub pos_min: Vec<f64>,
    pub pos_max: Vec<f64>,
    pub vel_max: Vec<f64>,
    pub torque_max: Vec<f64>,
}

impl JointLimits {
    pub fn new(
        pos_min: Vec<f64>,
        pos_max: Vec<f64>,
        vel_max: Vec<f64>,
        torque_max: Vec<f64>,
    ) -> Result<Self, KinematicsError> {
        let limits = JointLimits {
            pos_min,
            pos_max,
            vel_max,
            torque_max,
        };
        limits.validate()?;
        Ok(limits)
    }

    /// Limits declared in the robot description. Missing bounds are unbounded, fixed joints
    /// get a zero position range around 0 and zero rates.
    pub fn from_chain(chain: &KinematicChain) -> Self {
        let mut limits = JointLimits {
            pos_min: Vec::with_capacity(chain.len()),
            pos_max: Vec::with_capacity(chain.len()),
            vel_max: Vec::with_capacity(chain.len()),
            torque_max: Vec::with_capacity(chain.len()),
        };
        for joint in chain.joints() {
            let (lower, upper, velocity, effort) = if joint.kind.is_actuated() {
                let (lower, upper) = joint.bounds();
                (
                    lower,
                    upper,
                    joint.velocity_limit.unwrap_or(f64::INFINITY),
                    joint.effort_limit.unwrap_or(f64::INFINITY),
                )
            } else {
                (0.0, 0.0, 0.0, 0.0)
            };
            limits.pos_min.push(lower);
            limits.pos_max.push(upper);
            limits.vel_max.push(velocity);
            limits.torque_max.push(effort);
        }
        limits
    }

    pub fn len(&self) -> usize {
        self.pos_min.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pos_min.is_empty()
    }

    pub fn validate(&self) -> Result<(), KinematicsError> {
        let n = self.pos_min.len();
        if n == 0 {
            return Err(invalid("joint limits are empty"));
        }
        for (name, values) in [
            ("pos_max", &self.pos_max),
            ("vel_max", &self.vel_max),
            ("torque_max", &self.torque_max),
        ] {
            if values.len() != n {
                return Err(invalid(format!(
                    "{} has {} entries, pos_min has {}",
                    name,
                    values.len(),
                    n
                )));
            }
        }
        for i in 0..n {
            let (lo, hi, vel, torque) = (self.pos_min[i], self.pos_max[i], self.vel_max[i], self.torque_max[i]);
            if lo.is_nan() || hi.is_nan() || vel.is_nan() || torque.is_nan() {
                return Err(invalid(format!("joint {} has NaN limits", i)));
            }
            if lo > hi {
                return Err(invalid(format!("joint {}: pos_min {} > pos_max {}", i, lo, hi)));
            }
            if vel < 0.0 || torque < 0.0 {
                return Err(invalid(format!("joint {}: negative rate limit", i)));
            }
        }
        Ok(())
    }
}

/// Axis aligned box the end effector must stay in.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct WorkspaceBounds {
    pub lower: [f64; 3],
    pub upper: [f64; 3],
}

impl WorkspaceBounds {
    pub fn new(lower: Vector3<f64>, upper: Vector3<f64>) -> Self {
        WorkspaceBounds {
            lower: lower.into(),
            upper: upper.into(),
        }
    }

    pub fn contains(&self, point: &Vector3<f64>, tolerance: f64) -> bool {
        (0..3).all(|i| point[i] >= self.lower[i] - tolerance && point[i] <= self.upper[i] + tolerance)
    }

    pub fn validate(&self) -> Result<(), KinematicsError> {
        for i in 0..3 {
            if self.lower[i].is_nan() || self.upper[i].is_nan() || self.lower[i] > self.upper[i] {
                return Err(invalid(format!(
                    "workspace bounds axis {}: lower {} upper {}",
                    i, self.lower[i], self.upper[i]
                )));
            }
        }
        Ok(())
    }
}

fn default_dt() -> f64 {
    0.01
}

fn default_use_constrained_solve() -> bool {
    true
}

fn default_solver_timeout() -> f64 {
    1e-3
}

/// Safety filter configuration. `dt` is the control period and `solver_timeout` the time
/// budget of the constrained solve, both in seconds.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SafetyConfig {
    pub joint_limits: JointLimits,
    #[serde(default)]
    pub workspace_bounds: Option<WorkspaceBounds>,
    #[serde(default = "default_dt")]
    pub dt: f64,
    #[serde(default = "default_use_constrained_solve")]
    pub use_constrained_solve: bool,
    #[serde(default = "default_solver_timeout")]
    pub solver_timeout: f64,
}

impl SafetyConfig {
    /// Configuration with default settings and no workspace bounds.
    pub fn new(joint_limits: JointLimits) -> Self {
        SafetyConfig {
            joint_limits,
            workspace_bounds: None,
            dt: default_dt(),
            use_constrained_solve: default_use_constrained_solve(),
            solver_timeout: default_solver_timeout(),
        }
    }

    pub fn with_workspace_bounds(mut self, bounds: WorkspaceBounds) -> Self {
        self.workspace_bounds = Some(bounds);
        self
    }

    pub fn with_dt(mut self, dt: f64) -> Self {
        self.dt = dt;
        self
    }

    pub fn with_constrained_solve(mut self, enabled: bool) -> Self {
        self.use_constrained_solve = enabled;
        self
    }

    pub fn with_solver_timeout(mut self, seconds: f64) -> Self {
        self.solver_timeout = seconds;
        self
    }

    pub fn dof(&self) -> usize {
        self.joint_limits.len()
    }

    pub fn solver_timeout_duration(&self) -> Duration {
        Duration::try_from_secs_f64(self.solver_timeout).unwrap_or(Duration::ZERO)
    }

    pub fn validate(&self) -> Result<(), KinematicsError> {
        self.joint_limits.validate()?;
        if let Some(bounds) = &self.workspace_bounds {
            bounds.validate()?;
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(invalid(format!("dt must be positive and finite, got {}", self.dt)));
        }
        if !(self.solver_timeout.is_finite() && self.solver_timeout > 0.0) {
            return Err(invalid(format!(
                "solver_timeout must be positive and finite, got {}",
                self.solver_timeout
            )));
        }
        Ok(())
    }

    /// Parses and validates YAML content.
    #[cfg(feature = "allow_filesystem")]
    pub fn from_yaml_str(yaml: &str) -> Result<Self, KinematicsError> {
        let config: SafetyConfig = serde_saphyr::from_str(yaml)
            .map_err(|e| invalid(format!("failed to parse safety configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates the YAML configuration file.
    #[cfg(feature = "allow_filesystem")]
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, KinematicsError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| KinematicsError::io(path, e))?;
        Self::from_yaml_str(&contents)
    }
}

fn invalid(message: impl Into<String>) -> KinematicsError {
    KinematicsError::InvalidConfig(message.into())
}
