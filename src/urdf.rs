//! Reading robot descriptions (URDF, also simple XACRO files) into a link and joint graph.
//!
//! Only the structural part of the description matters here: link names, joint type, parent
//! and child links, origin, axis and limits. Geometry, inertia, transmissions and simulator
//! extensions are skipped.

extern crate sxd_document;

use std::collections::HashSet;
use std::fs::read_to_string;
use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;
use sxd_document::{dom, parser};

use crate::chain::JointKind;
use crate::error::KinematicsError;

/// File extensions accepted by [`read_robot_description`].
pub const SUPPORTED_EXTENSIONS: [&str; 2] = ["urdf", "xacro"];

/// Parsed robot description: links in declaration order and all joints.
#[derive(Debug, Clone, PartialEq)]
pub struct RobotDescription {
    pub name: String,
    pub links: Vec<String>,
    pub joints: Vec<JointDescription>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JointDescription {
    pub name: String,
    pub kind: JointKind,
    pub parent: String,
    pub child: String,
    pub origin_xyz: [f64; 3],
    pub origin_rpy: [f64; 3],
    /// Not normalized, as written in the file. Defaults to `1 0 0`.
    pub axis: [f64; 3],
    pub limit: Option<LimitDescription>,
}

/// Content of the `<limit>` element. Any attribute may be missing.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LimitDescription {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub velocity: Option<f64>,
    pub effort: Option<f64>,
}

impl RobotDescription {
    pub fn joint(&self, name: &str) -> Option<&JointDescription> {
        self.joints.iter().find(|j| j.name == name)
    }
}

/// Reads the robot description from the file. The extension must be one of
/// [`SUPPORTED_EXTENSIONS`].
///
/// # Example
/// ```no_run
/// let description = rs_chain_kinematics::urdf::read_robot_description("assets/arm.urdf");
/// match description {
///     Ok(d) => println!("{} links, {} joints", d.links.len(), d.joints.len()),
///     Err(e) => println!("Error reading robot description: {}", e),
/// }
/// ```
pub fn read_robot_description<P: AsRef<Path>>(path: P) -> Result<RobotDescription, KinematicsError> {
    let path = path.as_ref();
    check_extension(path)?;
    let xml_content = read_to_string(path).map_err(|e| KinematicsError::io(path, e))?;
    parse_robot_description(&xml_content)
}

pub(crate) fn check_extension(path: &Path) -> Result<(), KinematicsError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match extension {
        Some(ext) if SUPPORTED_EXTENSIONS.contains(&ext.as_str()) => Ok(()),
        _ => Err(KinematicsError::UnsupportedExtension(format!(
            "{} (expected one of {:?})",
            path.display(),
            SUPPORTED_EXTENSIONS
        ))),
    }
}

/// Parses XML content of the robot description.
///
/// XML that cannot be parsed, or does not have `<robot>` as the root element, is reported as
/// [`KinematicsError::UnsupportedExtension`]. Missing or unreadable attributes and duplicate
/// names are [`KinematicsError::MalformedDescription`].
pub fn parse_robot_description(xml: &str) -> Result<RobotDescription, KinematicsError> {
    let package = parser::parse(xml).map_err(|e| {
        KinematicsError::UnsupportedExtension(format!("failed to parse XML: {}", e))
    })?;
    let document = package.as_document();

    let root_element = document
        .root()
        .children()
        .into_iter()
        .find_map(|e| e.element())
        .ok_or_else(|| KinematicsError::UnsupportedExtension("no root element found".into()))?;

    if root_element.name().local_part() != "robot" {
        return Err(KinematicsError::UnsupportedExtension(format!(
            "root element <{}> is not <robot>",
            root_element.name().local_part()
        )));
    }

    let name = root_element
        .attribute("name")
        .map(|a| a.value().to_string())
        .unwrap_or_default();

    let mut description = RobotDescription {
        name,
        links: Vec::new(),
        joints: Vec::new(),
    };
    collect_elements(root_element, &mut description)?;
    check_unique(&description)?;
    Ok(description)
}

// Recursive, so that links and joints wrapped into xacro macros are also found.
fn collect_elements(
    element: dom::Element,
    description: &mut RobotDescription,
) -> Result<(), KinematicsError> {
    for child in element.children().into_iter().filter_map(|e| e.element()) {
        match child.name().local_part() {
            "link" => description.links.push(required_attribute(child, "name", "link")?),
            "joint" => description.joints.push(read_joint(child)?),
            // These may contain <joint> references that are not joint definitions
            "transmission" | "gazebo" => {}
            _ => collect_elements(child, description)?,
        }
    }
    Ok(())
}

fn read_joint(element: dom::Element) -> Result<JointDescription, KinematicsError> {
    let name = required_attribute(element, "name", "joint")?;
    let joint_type = required_attribute(element, "type", &format!("joint '{}'", name))?;
    let kind = joint_kind(&joint_type).ok_or_else(|| {
        KinematicsError::MalformedDescription(format!(
            "joint '{}' has unsupported type '{}'",
            name, joint_type
        ))
    })?;

    let context = format!("joint '{}'", name);
    let parent = find_child(element, "parent")
        .ok_or_else(|| missing(&context, "<parent>"))
        .and_then(|e| required_attribute(e, "link", &context))?;
    let child = find_child(element, "child")
        .ok_or_else(|| missing(&context, "<child>"))
        .and_then(|e| required_attribute(e, "link", &context))?;

    let (origin_xyz, origin_rpy) = match find_child(element, "origin") {
        Some(origin) => (
            optional_triple(origin, "xyz", &context)?.unwrap_or([0.0; 3]),
            optional_triple(origin, "rpy", &context)?.unwrap_or([0.0; 3]),
        ),
        None => ([0.0; 3], [0.0; 3]),
    };

    let axis = match find_child(element, "axis") {
        Some(axis) => optional_triple(axis, "xyz", &context)?.unwrap_or([1.0, 0.0, 0.0]),
        None => [1.0, 0.0, 0.0],
    };

    let limit = find_child(element, "limit")
        .map(|e| get_limits(e, &context))
        .transpose()?;

    Ok(JointDescription {
        name,
        kind,
        parent,
        child,
        origin_xyz,
        origin_rpy,
        axis,
        limit,
    })
}

fn joint_kind(joint_type: &str) -> Option<JointKind> {
    match joint_type {
        "revolute" => Some(JointKind::Revolute),
        "continuous" => Some(JointKind::Continuous),
        "prismatic" => Some(JointKind::Prismatic),
        "fixed" => Some(JointKind::Fixed),
        // floating, planar and spherical have more than one degree of freedom
        _ => None,
    }
}

fn find_child<'d>(element: dom::Element<'d>, tag: &str) -> Option<dom::Element<'d>> {
    element
        .children()
        .into_iter()
        .find_map(|e| e.element().filter(|el| el.name().local_part() == tag))
}

fn missing(context: &str, what: &str) -> KinematicsError {
    KinematicsError::MalformedDescription(format!("{} has no {}", context, what))
}

fn required_attribute(
    element: dom::Element,
    attribute: &str,
    context: &str,
) -> Result<String, KinematicsError> {
    element
        .attribute(attribute)
        .map(|a| a.value().trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| missing(context, &format!("'{}' attribute", attribute)))
}

fn optional_triple(
    element: dom::Element,
    attribute: &str,
    context: &str,
) -> Result<Option<[f64; 3]>, KinematicsError> {
    let Some(attr) = element.attribute(attribute) else {
        return Ok(None);
    };
    let values: Vec<f64> = attr
        .value()
        .split_whitespace()
        .map(|v| parse_value(v, context))
        .collect::<Result<_, _>>()?;

    if values.len() != 3 {
        return Err(KinematicsError::MalformedDescription(format!(
            "{}: '{}' does not contain exactly three values",
            context, attribute
        )));
    }
    Ok(Some([values[0], values[1], values[2]]))
}

fn optional_value(
    element: dom::Element,
    attribute: &str,
    context: &str,
) -> Result<Option<f64>, KinematicsError> {
    element
        .attribute(attribute)
        .map(|a| parse_value(a.value().trim(), context))
        .transpose()
}

/// XACRO value in degrees, `${radians(90)}`.
static RADIANS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$\{radians\((-?\d+(\.\d+)?)\)\}$").expect("valid pattern"));

/// Plain number, or the `${radians(<degrees>)}` form that is common in xacro.
fn parse_value(attr_value: &str, context: &str) -> Result<f64, KinematicsError> {
    let bad = || {
        KinematicsError::MalformedDescription(format!(
            "{}: cannot read number '{}'",
            context, attr_value
        ))
    };

    if let Some(caps) = RADIANS.captures(attr_value) {
        let degrees: f64 = caps.get(1).ok_or_else(bad)?.as_str().parse().map_err(|_| bad())?;
        Ok(degrees.to_radians())
    } else {
        let value: f64 = attr_value.parse().map_err(|_| bad())?;
        if value.is_nan() {
            return Err(bad());
        }
        Ok(value)
    }
}

fn get_limits(element: dom::Element, context: &str) -> Result<LimitDescription, KinematicsError> {
    let limit = LimitDescription {
        lower: optional_value(element, "lower", context)?,
        upper: optional_value(element, "upper", context)?,
        velocity: optional_value(element, "velocity", context)?,
        effort: optional_value(element, "effort", context)?,
    };
    if let (Some(lower), Some(upper)) = (limit.lower, limit.upper) {
        if lower > upper {
            return Err(KinematicsError::MalformedDescription(format!(
                "{}: lower limit {} is above upper limit {}",
                context, lower, upper
            )));
        }
    }
    Ok(limit)
}

fn check_unique(description: &RobotDescription) -> Result<(), KinematicsError> {
    let mut links = HashSet::new();
    for link in &description.links {
        if !links.insert(link.as_str()) {
            return Err(KinematicsError::MalformedDescription(format!(
                "duplicate link name: {}",
                link
            )));
        }
    }
    let mut joints = HashSet::new();
    for joint in &description.joints {
        if !joints.insert(joint.name.as_str()) {
            return Err(KinematicsError::MalformedDescription(format!(
                "duplicate joint name: {}",
                joint.name
            )));
        }
    }
    Ok(())
}
