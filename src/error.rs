//! Error handling for chain construction, kinematic queries and safety configuration.
//!
//! Only structural problems are reported as errors. Numerical outcomes (inverse kinematics
//! that does not converge, ill conditioned Jacobians) and safety filter outcomes (non-finite
//! actions, optimizer failures) are regular result values.

use std::io;
use std::path::PathBuf;

/// Unified error for description parsing, kinematic queries and configuration.
#[derive(Debug, thiserror::Error)]
pub enum KinematicsError {
    /// Quaternion of zero (or non-finite) length cannot be normalized into a rotation.
    #[error("degenerate rotation: quaternion has zero or non-finite length")]
    DegenerateRotation,

    /// None or more than one link is never a child of any joint.
    #[error("ambiguous root link, candidates: {candidates:?}")]
    AmbiguousRoot { candidates: Vec<String> },

    /// Walking from the end effector back to the root reached a link without incoming joint.
    #[error("broken chain: link '{link}' has no incoming joint")]
    BrokenChain { link: String },

    /// Referenced link or joint is missing, or a required attribute is absent.
    #[error("malformed robot description: {0}")]
    MalformedDescription(String),

    /// The file format is not supported or its structure cannot be parsed.
    #[error("unsupported robot description format: {0}")]
    UnsupportedExtension(String),

    /// Vector or matrix does not have the size the chain or the limits require.
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },

    /// Joint value lies outside the declared bounds.
    #[error("joint '{joint}' out of limits: {value} not in [{lower}, {upper}]")]
    JointLimitExceeded {
        joint: String,
        value: f64,
        lower: f64,
        upper: f64,
    },

    /// Requested link is not part of the kinematic chain.
    #[error("link not found in serial chain: {0}")]
    UnknownLink(String),

    /// Path lies outside of the configured asset allowlist.
    #[error("path {} is outside allowlist", .0.display())]
    PathNotAllowed(PathBuf),

    /// Safety or solver configuration is not usable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error reading {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },
}

impl KinematicsError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        KinematicsError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn dimension(expected: usize, found: usize) -> Self {
        KinematicsError::DimensionMismatch { expected, found }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        let e = KinematicsError::dimension(3, 2);
        assert_eq!(e.to_string(), "dimension mismatch: expected 3, found 2");

        let e = KinematicsError::BrokenChain { link: "link_4".into() };
        assert_eq!(e.to_string(), "broken chain: link 'link_4' has no incoming joint");

        let e = KinematicsError::JointLimitExceeded {
            joint: "joint1".into(),
            value: 2.0,
            lower: -1.0,
            upper: 1.0,
        };
        assert_eq!(e.to_string(), "joint 'joint1' out of limits: 2 not in [-1, 1]");
    }

    #[test]
    fn test_io_error_includes_path() {
        let e = KinematicsError::io(
            "/tmp/arm.urdf",
            io::Error::new(io::ErrorKind::NotFound, "not found"),
        );
        let msg = e.to_string();
        assert!(msg.contains("/tmp/arm.urdf"));
        assert!(msg.contains("not found"));
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_error_is_send_sync() {
        assert_send_sync::<KinematicsError>();
    }
}
