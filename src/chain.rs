//! Serial kinematic chain extracted from a robot description.
//!
//! A [`KinematicChain`] is the ordered list of joints from the root (base) link to the end
//! effector link. Origins and axes are extracted once at construction, the chain is
//! immutable afterwards and can be shared between threads.

use std::collections::{HashMap, HashSet};

use nalgebra::{Unit, Vector3};

use crate::error::KinematicsError;
use crate::spatial::{RigidTransform, Rotation};
use crate::urdf::{parse_robot_description, JointDescription, RobotDescription};

#[cfg(feature = "allow_filesystem")]
use std::path::Path;

#[cfg(feature = "allow_filesystem")]
use crate::path_policy::PathPolicy;

/// Joint type. Matched exhaustively wherever the motion of a joint matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JointKind {
    /// Rotation about the axis, with position limits.
    Revolute,
    /// Unlimited rotation about the axis.
    Continuous,
    /// Translation along the axis, with position limits.
    Prismatic,
    /// No relative motion between parent and child.
    Fixed,
}

impl JointKind {
    pub const fn is_actuated(self) -> bool {
        !matches!(self, JointKind::Fixed)
    }

    /// Only revolute and prismatic joints carry position bounds.
    pub const fn is_bounded(self) -> bool {
        matches!(self, JointKind::Revolute | JointKind::Prismatic)
    }
}

/// A single joint of the chain.
#[derive(Debug, Clone)]
pub struct Joint {
    pub name: String,
    pub kind: JointKind,
    /// Unit axis in the joint frame.
    pub axis: Unit<Vector3<f64>>,
    /// Static transform from the parent link frame to the joint frame.
    pub origin: RigidTransform,
    /// Position bounds `(lower, upper)`. Only present for revolute and prismatic joints
    /// that declare both values.
    pub limit: Option<(f64, f64)>,
    /// Declared maximal velocity (rad/s or m/s), if any.
    pub velocity_limit: Option<f64>,
    /// Declared maximal effort (Nm or N), if any.
    pub effort_limit: Option<f64>,
    pub parent_link: String,
    pub child_link: String,
}

impl Joint {
    fn from_description(joint: &JointDescription) -> Result<Self, KinematicsError> {
        let axis = match Unit::try_new(Vector3::from(joint.axis), 1e-12) {
            Some(axis) => axis,
            None if joint.kind == JointKind::Fixed => Vector3::x_axis(),
            None => {
                return Err(KinematicsError::MalformedDescription(format!(
                    "joint '{}' has zero length axis",
                    joint.name
                )));
            }
        };

        let limit = match (joint.kind.is_bounded(), joint.limit) {
            (true, Some(limit)) => limit.lower.zip(limit.upper),
            _ => None,
        };

        Ok(Joint {
            name: joint.name.clone(),
            kind: joint.kind,
            axis,
            origin: RigidTransform::from_xyz_rpy(joint.origin_xyz, joint.origin_rpy),
            limit,
            velocity_limit: joint.limit.and_then(|l| l.velocity),
            effort_limit: joint.limit.and_then(|l| l.effort),
            parent_link: joint.parent.clone(),
            child_link: joint.child.clone(),
        })
    }

    /// Transform produced by moving the joint to `value`.
    pub fn motion(&self, value: f64) -> RigidTransform {
        match self.kind {
            JointKind::Revolute | JointKind::Continuous => {
                RigidTransform::from_rotation(Rotation::from_unit_axis_angle(&self.axis, value))
            }
            JointKind::Prismatic => RigidTransform::from_translation(self.axis.into_inner() * value),
            JointKind::Fixed => RigidTransform::identity(),
        }
    }

    /// Position bounds, unbounded joints report `(-inf, +inf)`.
    pub fn bounds(&self) -> (f64, f64) {
        self.limit.unwrap_or((f64::NEG_INFINITY, f64::INFINITY))
    }

    /// True if `value` is outside the declared bounds. NaN is outside any declared bounds.
    pub fn violates_limit(&self, value: f64) -> bool {
        match self.limit {
            Some((lower, upper)) => !(lower..=upper).contains(&value),
            None => false,
        }
    }
}

/// Ordered joints from the base link to the end effector link.
#[derive(Debug, Clone)]
pub struct KinematicChain {
    robot_name: String,
    base_link: String,
    end_effector_link: String,
    joints: Vec<Joint>,
}

impl KinematicChain {
    /// Builds the chain from the parsed description. If `end_effector` is not given, the
    /// last declared link is used.
    pub fn from_description(
        description: &RobotDescription,
        end_effector: Option<&str>,
    ) -> Result<Self, KinematicsError> {
        let links: HashSet<&str> = description.links.iter().map(String::as_str).collect();

        let mut child_to_joint: HashMap<&str, &JointDescription> = HashMap::new();
        for joint in &description.joints {
            for link in [&joint.parent, &joint.child] {
                if !links.contains(link.as_str()) {
                    return Err(KinematicsError::MalformedDescription(format!(
                        "joint '{}' references missing link '{}'",
                        joint.name, link
                    )));
                }
            }
            if child_to_joint.insert(joint.child.as_str(), joint).is_some() {
                return Err(KinematicsError::MalformedDescription(format!(
                    "link '{}' is the child of more than one joint",
                    joint.child
                )));
            }
        }

        let base_link = root_link(description, &child_to_joint)?;

        let end_effector_link = match end_effector {
            Some(name) if links.contains(name) => name.to_string(),
            Some(name) => {
                return Err(KinematicsError::MalformedDescription(format!(
                    "end effector link '{}' not found",
                    name
                )));
            }
            None => description.links.last().cloned().ok_or_else(|| {
                KinematicsError::MalformedDescription("description has no links".into())
            })?,
        };

        // Walk from the end effector back to the root
        let mut chain: Vec<&JointDescription> = Vec::new();
        let mut link = end_effector_link.as_str();
        while link != base_link {
            let joint = child_to_joint.get(link).copied().ok_or_else(|| KinematicsError::BrokenChain {
                link: link.to_string(),
            })?;
            if chain.len() >= description.joints.len() {
                // Cycle, the root is never reached
                return Err(KinematicsError::BrokenChain {
                    link: link.to_string(),
                });
            }
            chain.push(joint);
            link = joint.parent.as_str();
        }
        chain.reverse();

        let joints = chain
            .into_iter()
            .map(Joint::from_description)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(KinematicChain {
            robot_name: description.name.clone(),
            base_link,
            end_effector_link,
            joints,
        })
    }

    /// Parses URDF content and builds the chain.
    pub fn from_urdf_str(xml: &str, end_effector: Option<&str>) -> Result<Self, KinematicsError> {
        let description = parse_robot_description(xml)?;
        Self::from_description(&description, end_effector)
    }

    /// Loads the chain from a URDF file. The path is checked against `policy` first.
    #[cfg(feature = "allow_filesystem")]
    pub fn from_urdf_file<P: AsRef<Path>>(
        path: P,
        end_effector: Option<&str>,
        policy: &PathPolicy,
    ) -> Result<Self, KinematicsError> {
        let resolved = policy.validate(path.as_ref())?;
        let description = crate::urdf::read_robot_description(&resolved)?;
        Self::from_description(&description, end_effector)
    }

    pub fn robot_name(&self) -> &str {
        &self.robot_name
    }

    pub fn base_link(&self) -> &str {
        &self.base_link
    }

    pub fn end_effector_link(&self) -> &str {
        &self.end_effector_link
    }

    /// Number of joints, including fixed ones.
    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn joint_names(&self) -> Vec<&str> {
        self.joints.iter().map(|j| j.name.as_str()).collect()
    }

    /// Base link followed by the child link of every joint, in chain order.
    pub fn link_names(&self) -> Vec<&str> {
        std::iter::once(self.base_link.as_str())
            .chain(self.joints.iter().map(|j| j.child_link.as_str()))
            .collect()
    }

    /// Number of joints that must be applied to reach the frame of `link`
    /// (0 for the base link), or `None` if the link is not on the chain.
    pub fn link_depth(&self, link: &str) -> Option<usize> {
        if link == self.base_link {
            return Some(0);
        }
        self.joints
            .iter()
            .position(|j| j.child_link == link)
            .map(|i| i + 1)
    }
}

fn root_link(
    description: &RobotDescription,
    child_to_joint: &HashMap<&str, &JointDescription>,
) -> Result<String, KinematicsError> {
    let candidates: Vec<String> = description
        .links
        .iter()
        .filter(|link| !child_to_joint.contains_key(link.as_str()))
        .cloned()
        .collect();
    match candidates.as_slice() {
        [root] => Ok(root.clone()),
        _ => Err(KinematicsError::AmbiguousRoot { candidates }),
    }
}
