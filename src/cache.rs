//! Build-once, read-many cache of kinematic chains keyed by description file.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::chain::KinematicChain;
use crate::error::KinematicsError;
use crate::kinematics_impl::KinematicsSolver;
use crate::path_policy::PathPolicy;
use crate::urdf::read_robot_description;
use crate::utils::correlation_id;

/// Canonical description path and the requested end effector link (`None` for the default).
type CacheKey = (PathBuf, Option<String>);

/// Chains are parsed on first request and shared afterwards. Construction happens under the
/// write lock, so a description is parsed once even if many threads ask for it at the same
/// time. Established chains are immutable and handed out as [`Arc`].
#[derive(Debug)]
pub struct ChainCache {
    chains: RwLock<HashMap<CacheKey, Arc<KinematicChain>>>,
    policy: PathPolicy,
    correlation_id: String,
}

impl ChainCache {
    pub fn new(policy: PathPolicy) -> Self {
        ChainCache {
            chains: RwLock::new(HashMap::new()),
            policy,
            correlation_id: correlation_id(),
        }
    }

    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    /// Returns the cached chain, parsing the description if it was not loaded yet.
    pub fn get_or_load<P: AsRef<Path>>(
        &self,
        path: P,
        end_effector: Option<&str>,
    ) -> Result<Arc<KinematicChain>, KinematicsError> {
        let resolved = self.policy.validate(path.as_ref())?;
        let key: CacheKey = (resolved, end_effector.map(String::from));

        if let Some(chain) = self
            .chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Arc::clone(chain));
        }

        let mut chains = self.chains.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have built it while we waited for the lock
        if let Some(chain) = chains.get(&key) {
            return Ok(Arc::clone(chain));
        }

        let description = read_robot_description(&key.0)?;
        let chain = Arc::new(KinematicChain::from_description(&description, end_effector)?);
        info!(
            correlation_id = %self.correlation_id,
            path = %key.0.display(),
            end_effector = chain.end_effector_link(),
            num_joints = chain.len(),
            "chain.cache"
        );
        chains.insert(key, Arc::clone(&chain));
        Ok(chain)
    }

    /// Solver over the cached chain.
    pub fn solver<P: AsRef<Path>>(
        &self,
        path: P,
        end_effector: Option<&str>,
    ) -> Result<KinematicsSolver, KinematicsError> {
        Ok(KinematicsSolver::from_shared(self.get_or_load(path, end_effector)?))
    }

    /// Drops all chains loaded from `path`, whatever their end effector. Returns how many were
    /// removed. Chains already handed out stay valid.
    pub fn invalidate<P: AsRef<Path>>(&self, path: P) -> usize {
        let resolved = crate::path_policy::resolve(path.as_ref());
        let mut chains = self.chains.write().unwrap_or_else(PoisonError::into_inner);
        let before = chains.len();
        chains.retain(|(p, _), _| *p != resolved);
        before - chains.len()
    }

    pub fn clear(&self) {
        self.chains
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.chains.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Cache over [`PathPolicy::default`], allowed roots come from the asset directory variable.
impl Default for ChainCache {
    fn default() -> Self {
        Self::new(PathPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const ROBOT: &str = r#"
        <robot name="cached">
            <link name="base"/>
            <link name="a"/>
            <link name="b"/>
            <joint name="ja" type="revolute">
                <parent link="base"/><child link="a"/>
                <axis xyz="0 0 1"/><limit lower="-1" upper="1"/>
            </joint>
            <joint name="jb" type="continuous">
                <parent link="a"/><child link="b"/>
                <origin xyz="0.5 0 0"/>
            </joint>
        </robot>
    "#;

    fn write_robot(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rs_chain_kinematics_cache_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, ROBOT).unwrap();
        path
    }

    #[test]
    fn test_loads_once_and_shares() {
        let path = write_robot("shared.urdf");
        let cache = ChainCache::default();
        let first = cache.get_or_load(&path, None).unwrap();
        let second = cache.get_or_load(&path, None).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.len(), 1);

        let shorter = cache.get_or_load(&path, Some("a")).unwrap();
        assert_eq!(shorter.len(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_invalidate_and_clear() {
        let path = write_robot("invalidate.urdf");
        let cache = ChainCache::default();
        let before = cache.get_or_load(&path, None).unwrap();
        cache.get_or_load(&path, Some("a")).unwrap();
        assert_eq!(cache.invalidate(&path), 2);
        assert!(cache.is_empty());

        let after = cache.get_or_load(&path, None).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(before.joint_names(), after.joint_names());

        cache.clear();
        assert_eq!(cache.len(), 0);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let cache = ChainCache::default();
        let missing = std::env::temp_dir().join("rs_chain_kinematics_missing.urdf");
        assert!(matches!(
            cache.get_or_load(&missing, None),
            Err(KinematicsError::Io { .. })
        ));
        let wrong_extension = write_robot("robot.sdf");
        assert!(matches!(
            cache.get_or_load(&wrong_extension, None),
            Err(KinematicsError::UnsupportedExtension(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_policy_is_applied_before_loading() {
        let path = write_robot("outside.urdf");
        let assets = std::env::temp_dir().join("rs_chain_kinematics_cache_assets_only");
        let policy = PathPolicy::from_path_list(Some(assets.as_os_str()), true);
        let cache = ChainCache::new(policy);
        assert!(matches!(
            cache.get_or_load(&path, None),
            Err(KinematicsError::PathNotAllowed(_))
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_solver_from_cache() {
        let path = write_robot("solver.urdf");
        let cache = ChainCache::default();
        let solver = cache.solver(&path, None).unwrap();
        assert_eq!(solver.joint_names(), vec!["ja", "jb"]);
        assert!(Arc::ptr_eq(&solver.shared_chain(), &cache.get_or_load(&path, None).unwrap()));
    }
}
