//! Forward kinematics and joint limit validation over a [`KinematicChain`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use nalgebra::DMatrix;
use rayon::prelude::*;
use tracing::debug;

use crate::chain::KinematicChain;
use crate::error::KinematicsError;
use crate::kinematic_traits::{Kinematics, Pose};
use crate::spatial::RigidTransform;
use crate::utils::{correlation_id, elapsed_us};

/// Which bound of a joint was violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitSide {
    BelowLower,
    AboveUpper,
}

/// A joint value outside its declared bounds, as reported by
/// [`KinematicsSolver::check_joint_limits`].
#[derive(Debug, Clone, PartialEq)]
pub struct LimitViolation {
    /// Position of the joint in the chain (and in the joint vector).
    pub index: usize,
    pub joint: String,
    pub value: f64,
    /// The bound that was crossed.
    pub limit: f64,
    pub side: LimitSide,
}

/// Kinematic queries for a single serial chain.
///
/// The chain is shared read-only (it may come from [`crate::cache::ChainCache`]), the solver
/// itself holds no mutable state, so a single instance can be used from many threads.
#[derive(Debug, Clone)]
pub struct KinematicsSolver {
    chain: Arc<KinematicChain>,
    correlation_id: String,
}

impl KinematicsSolver {
    pub fn new(chain: KinematicChain) -> Self {
        Self::from_shared(Arc::new(chain))
    }

    pub fn from_shared(chain: Arc<KinematicChain>) -> Self {
        KinematicsSolver {
            chain,
            correlation_id: correlation_id(),
        }
    }

    /// Parses URDF content and builds the solver for the chain ending at `end_effector`
    /// (or the last declared link).
    pub fn from_urdf_str(xml: &str, end_effector: Option<&str>) -> Result<Self, KinematicsError> {
        Ok(Self::new(KinematicChain::from_urdf_str(xml, end_effector)?))
    }

    pub fn chain(&self) -> &KinematicChain {
        &self.chain
    }

    pub fn shared_chain(&self) -> Arc<KinematicChain> {
        Arc::clone(&self.chain)
    }

    /// Id attached to every log event of this solver.
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn joint_names(&self) -> Vec<&str> {
        self.chain.joint_names()
    }

    /// `(lower, upper)` for every joint of the chain. Joints without declared bounds
    /// (continuous, fixed, or bounds missing in the description) report `(-inf, +inf)`.
    pub fn joint_limits(&self) -> Vec<(f64, f64)> {
        self.chain.joints().iter().map(|j| j.bounds()).collect()
    }

    pub fn validate_dimension(&self, qs: &[f64]) -> Result<(), KinematicsError> {
        if qs.len() != self.chain.len() {
            return Err(KinematicsError::dimension(self.chain.len(), qs.len()));
        }
        Ok(())
    }

    /// Reports every joint outside its bounds. An empty list means the configuration is
    /// valid. NaN values are reported against the lower bound.
    pub fn check_joint_limits(&self, qs: &[f64]) -> Result<Vec<LimitViolation>, KinematicsError> {
        self.validate_dimension(qs)?;
        let violations = self
            .chain
            .joints()
            .iter()
            .zip(qs)
            .enumerate()
            .filter(|(_, (joint, value))| joint.violates_limit(**value))
            .map(|(index, (joint, &value))| {
                let (lower, upper) = joint.bounds();
                let (limit, side) = if value >= lower {
                    (upper, LimitSide::AboveUpper)
                } else {
                    (lower, LimitSide::BelowLower)
                };
                LimitViolation {
                    index,
                    joint: joint.name.clone(),
                    value,
                    limit,
                    side,
                }
            })
            .collect();
        Ok(violations)
    }

    /// Fails with [`KinematicsError::JointLimitExceeded`] on the first joint outside its bounds.
    pub fn validate_joint_limits(&self, qs: &[f64]) -> Result<(), KinematicsError> {
        self.validate_dimension(qs)?;
        for (joint, &value) in self.chain.joints().iter().zip(qs) {
            if joint.violates_limit(value) {
                let (lower, upper) = joint.bounds();
                return Err(KinematicsError::JointLimitExceeded {
                    joint: joint.name.clone(),
                    value,
                    lower,
                    upper,
                });
            }
        }
        Ok(())
    }

    /// Frames of the base link followed by the child link of every joint.
    /// No validation, `qs` must have the chain length.
    pub(crate) fn link_frames(&self, qs: &[f64]) -> Vec<RigidTransform> {
        let mut frames = Vec::with_capacity(self.chain.len() + 1);
        let mut pose = RigidTransform::identity();
        frames.push(pose);
        for (joint, &q) in self.chain.joints().iter().zip(qs) {
            pose = pose.compose(&joint.origin).compose(&joint.motion(q));
            frames.push(pose);
        }
        frames
    }

    /// End effector pose without the joint limit check.
    pub(crate) fn end_effector_unchecked(&self, qs: &[f64]) -> RigidTransform {
        self.chain
            .joints()
            .iter()
            .zip(qs)
            .fold(RigidTransform::identity(), |pose, (joint, &q)| {
                pose.compose(&joint.origin).compose(&joint.motion(q))
            })
    }

    /// Pose of every link of the chain (base link included) in the base frame.
    pub fn forward_kinematics(&self, qs: &[f64]) -> Result<HashMap<String, RigidTransform>, KinematicsError> {
        let started = Instant::now();
        self.validate_joint_limits(qs)?;
        let frames = self.link_frames(qs);
        let poses = self
            .chain
            .link_names()
            .into_iter()
            .map(String::from)
            .zip(frames)
            .collect();
        self.log_fk(1, started);
        Ok(poses)
    }

    /// Pose of a single link of the chain.
    pub fn forward_kinematics_link(&self, qs: &[f64], link: &str) -> Result<RigidTransform, KinematicsError> {
        let depth = self
            .chain
            .link_depth(link)
            .ok_or_else(|| KinematicsError::UnknownLink(link.to_string()))?;
        let started = Instant::now();
        self.validate_joint_limits(qs)?;
        let pose = self.end_effector_unchecked(&qs[..depth]);
        self.log_fk(1, started);
        Ok(pose)
    }

    /// Pose of the end effector link.
    pub fn end_effector_pose(&self, qs: &[f64]) -> Result<RigidTransform, KinematicsError> {
        let started = Instant::now();
        self.validate_joint_limits(qs)?;
        let pose = self.end_effector_unchecked(qs);
        self.log_fk(1, started);
        Ok(pose)
    }

    /// Link poses for every row of `qs` (one configuration per row). Rows are processed in
    /// parallel, the result is identical to calling [`Self::forward_kinematics`] per row.
    ///
    /// # Arguments
    ///
    /// * `qs` - B x N matrix of joint values, N being the length of the chain
    ///
    /// # Returns
    ///
    /// One map from link name to pose per row, in row order. A wrong column count gives
    /// `DimensionMismatch`, and a row outside the joint limits fails the whole batch with
    /// the error of that row.
    pub fn forward_kinematics_batch(
        &self,
        qs: &DMatrix<f64>,
    ) -> Result<Vec<HashMap<String, RigidTransform>>, KinematicsError> {
        let started = Instant::now();
        let rows = self.batch_rows(qs)?;
        let links = self.chain.link_names();
        let poses = rows
            .par_iter()
            .map(|row| -> Result<HashMap<String, RigidTransform>, KinematicsError> {
                self.validate_joint_limits(row)?;
                Ok(links
                    .iter()
                    .map(|l| l.to_string())
                    .zip(self.link_frames(row))
                    .collect())
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.log_fk(rows.len(), started);
        Ok(poses)
    }

    /// End effector pose for every row of `qs`.
    pub fn end_effector_poses_batch(&self, qs: &DMatrix<f64>) -> Result<Vec<RigidTransform>, KinematicsError> {
        let started = Instant::now();
        let rows = self.batch_rows(qs)?;
        let poses = rows
            .par_iter()
            .map(|row| -> Result<RigidTransform, KinematicsError> {
                self.validate_joint_limits(row)?;
                Ok(self.end_effector_unchecked(row))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.log_fk(rows.len(), started);
        Ok(poses)
    }

    fn batch_rows(&self, qs: &DMatrix<f64>) -> Result<Vec<Vec<f64>>, KinematicsError> {
        if qs.ncols() != self.chain.len() {
            return Err(KinematicsError::dimension(self.chain.len(), qs.ncols()));
        }
        Ok(qs
            .row_iter()
            .map(|row| row.iter().copied().collect())
            .collect())
    }

    fn log_fk(&self, batch: usize, started: Instant) {
        debug!(
            correlation_id = %self.correlation_id,
            num_joints = self.chain.len(),
            batch,
            fk_time_us = elapsed_us(started),
            "fk.compute"
        );
    }
}

impl Kinematics for KinematicsSolver {
    fn dof(&self) -> usize {
        self.chain.len()
    }

    fn forward(&self, qs: &[f64]) -> Result<Pose, KinematicsError> {
        self.end_effector_pose(qs)
    }

    fn forward_ignoring_limits(&self, qs: &[f64]) -> Result<Pose, KinematicsError> {
        self.validate_dimension(qs)?;
        Ok(self.end_effector_unchecked(qs))
    }
}
