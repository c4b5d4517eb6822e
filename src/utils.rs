//! Helper functions

use std::time::Instant;

use nalgebra::DMatrix;

/// Checks if all elements in the slice are finite
pub fn is_valid(qs: &[f64]) -> bool {
    qs.iter().all(|q| q.is_finite())
}

/// Checks if all elements of the matrix are finite
pub fn is_valid_matrix(m: &DMatrix<f64>) -> bool {
    m.iter().all(|v| v.is_finite())
}

/// Microseconds since `start`, saturating.
pub(crate) fn elapsed_us(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX)
}

/// Fresh correlation id for log events of one solver or filter instance.
pub(crate) fn correlation_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Joint values in degrees, for log and diagnostic output.
pub fn dump_joints(joints: &[f64]) -> String {
    let row: Vec<String> = joints
        .iter()
        .map(|q| format!("{:5.2}", q.to_degrees()))
        .collect();
    format!("[{}]", row.join(" "))
}

/// Allows to specify joint values in degrees (converts to radians)
pub fn as_radians(degrees: &[f64]) -> Vec<f64> {
    degrees.iter().map(|d| d.to_radians()).collect()
}
