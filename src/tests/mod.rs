mod urdf_loading;

pub(crate) const UR_ARM: &str = "src/tests/data/ur_arm.urdf";
pub(crate) const TWO_JOINT: &str = "src/tests/data/two_joint.urdf";
pub(crate) const SAFETY_YAML: &str = "src/tests/data/safety.yaml";
