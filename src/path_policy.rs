//! Allowlist for robot description and configuration files.
//!
//! Paths are resolved (home directory, symbolic links, `..`) before they are compared
//! against the allowed roots, so traversal out of an asset directory is detected.

use std::env;
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::error::KinematicsError;
use crate::utils::correlation_id;

/// Environment variable with the allowed asset directories, separated like `PATH`.
pub const ASSET_DIR_ENV: &str = "KINEMATICS_ASSET_DIR";

#[derive(Debug, Clone)]
pub struct PathPolicy {
    allowlist: Vec<PathBuf>,
    strict: bool,
    correlation_id: String,
}

impl PathPolicy {
    /// Policy with explicit allowed roots. With `strict`, paths outside of them are rejected,
    /// otherwise they are only logged. An empty allowlist allows everything.
    pub fn new<I, P>(allowlist: I, strict: bool) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        PathPolicy {
            allowlist: allowlist.into_iter().map(|p| resolve(p.as_ref())).collect(),
            strict,
            correlation_id: correlation_id(),
        }
    }

    /// Reads the allowed roots from [`ASSET_DIR_ENV`]. Without the variable the allowlist is
    /// empty and every path is allowed.
    pub fn from_env(strict: bool) -> Self {
        Self::from_path_list(env::var_os(ASSET_DIR_ENV).as_deref(), strict)
    }

    /// Roots from a `PATH`-like list, empty entries are skipped.
    pub(crate) fn from_path_list(value: Option<&OsStr>, strict: bool) -> Self {
        let roots: Vec<PathBuf> = value
            .map(|value| {
                env::split_paths(value)
                    .filter(|p| !p.as_os_str().is_empty())
                    .collect()
            })
            .unwrap_or_default();
        Self::new(roots, strict)
    }

    /// Allows any path, whatever [`ASSET_DIR_ENV`] says.
    pub fn permissive() -> Self {
        Self::new(Vec::<PathBuf>::new(), false)
    }

    pub fn allowlist(&self) -> &[PathBuf] {
        &self.allowlist
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Resolves `path` and checks it against the allowlist. Returns the resolved path.
    pub fn validate(&self, path: &Path) -> Result<PathBuf, KinematicsError> {
        let resolved = resolve(path);
        debug!(correlation_id = %self.correlation_id, path = %resolved.display(), "file.access");
        if self.allowlist.is_empty() || self.allowlist.iter().any(|root| resolved.starts_with(root)) {
            return Ok(resolved);
        }
        warn!(
            correlation_id = %self.correlation_id,
            path = %resolved.display(),
            strict = self.strict,
            "file.access.blocked"
        );
        if self.strict {
            return Err(KinematicsError::PathNotAllowed(resolved));
        }
        Ok(resolved)
    }
}

/// Lenient policy over the roots in [`ASSET_DIR_ENV`].
impl Default for PathPolicy {
    fn default() -> Self {
        Self::from_env(false)
    }
}

/// Absolute, normalized form of `path`. The `.` and `..` components are folded lexically,
/// then the longest existing prefix is canonicalized (symbolic links resolved) and the rest
/// is appended unchanged.
pub(crate) fn resolve(path: &Path) -> PathBuf {
    let expanded = expand_home(path);
    let absolute = std::path::absolute(&expanded).unwrap_or(expanded);
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }

    for prefix in normalized.ancestors() {
        if let Ok(canonical) = prefix.canonicalize() {
            return match normalized.strip_prefix(prefix) {
                Ok(rest) if !rest.as_os_str().is_empty() => canonical.join(rest),
                _ => canonical,
            };
        }
    }
    normalized
}

fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = env::temp_dir().join(format!("rs_chain_kinematics_{}_{}", name, std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_empty_allowlist_allows_all() {
        let policy = PathPolicy::permissive();
        let resolved = policy.validate(Path::new("/definitely/not/here.urdf")).unwrap();
        assert_eq!(resolved, PathBuf::from("/definitely/not/here.urdf"));
    }

    #[test]
    fn test_strict_rejects_outside() {
        let root = scratch_dir("strict");
        let policy = PathPolicy::new([&root], true);
        assert!(policy.validate(&root.join("arm.urdf")).is_ok());

        let outside = Path::new("/etc/passwd");
        match policy.validate(outside) {
            Err(KinematicsError::PathNotAllowed(p)) => assert!(p.ends_with("passwd")),
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_traversal_is_resolved() {
        let root = scratch_dir("traversal");
        let policy = PathPolicy::new([&root], true);
        let sneaky = root.join("..").join("..").join("secret.urdf");
        assert!(matches!(
            policy.validate(&sneaky),
            Err(KinematicsError::PathNotAllowed(_))
        ));
    }

    #[test]
    fn test_non_strict_allows_outside() {
        let root = scratch_dir("lenient");
        let policy = PathPolicy::new([&root], false);
        assert!(!policy.is_strict());
        assert!(policy.validate(Path::new("/tmp/elsewhere/arm.urdf")).is_ok());
    }

    #[test]
    fn test_roots_from_path_list() {
        let assets = scratch_dir("env_assets");
        let models = scratch_dir("env_models");
        let list = env::join_paths([&assets, Path::new(""), &models]).unwrap();

        let policy = PathPolicy::from_path_list(Some(list.as_os_str()), true);
        assert_eq!(policy.allowlist(), &[resolve(&assets), resolve(&models)]);
        assert!(policy.validate(&models.join("arm.urdf")).is_ok());
        match policy.validate(Path::new("/etc/passwd.urdf")) {
            Err(KinematicsError::PathNotAllowed(p)) => assert!(p.ends_with("passwd.urdf")),
            other => panic!("unexpected result {:?}", other),
        }

        let unset = PathPolicy::from_path_list(None, true);
        assert!(unset.allowlist().is_empty());
        assert!(unset.validate(Path::new("/etc/passwd.urdf")).is_ok());
    }

    #[test]
    fn test_default_follows_environment() {
        let policy = PathPolicy::default();
        assert!(!policy.is_strict());
        let expected = PathPolicy::from_env(false);
        assert_eq!(policy.allowlist(), expected.allowlist());
    }

    #[test]
    fn test_lexical_normalization() {
        let resolved = resolve(Path::new("/no/such/dir/./a/../b.urdf"));
        assert_eq!(resolved, PathBuf::from("/no/such/dir/b.urdf"));
    }
}
