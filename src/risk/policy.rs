//! Risk policy loading and hot reload.
//!
//! The policy lives in a YAML document (`RISK_POLICY_PATH`). The store
//! watches the file's modification time; `maybe_reload` swaps the active
//! policy when the file changed, and a malformed document leaves the
//! previous policy active.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};

use crate::error::GateError;

use super::limits::RiskPolicy;

/// Shared, reloadable risk policy.
#[derive(Debug)]
pub struct PolicyStore {
    path: Option<PathBuf>,
    policy: RwLock<RiskPolicy>,
    last_modified: Mutex<Option<SystemTime>>,
}

impl PolicyStore {
    /// Load the policy from a YAML file.
    ///
    /// A missing file yields the default policy (and hot reload picks the
    /// file up once it appears); a present but malformed file is a fatal
    /// init error.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the file exists but cannot be parsed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GateError> {
        let path = path.as_ref().to_path_buf();
        let (policy, modified) = if path.exists() {
            (Self::parse_file(&path)?, file_mtime(&path))
        } else {
            tracing::warn!(path = %path.display(), "risk policy file missing, using defaults");
            (RiskPolicy::default(), None)
        };
        Ok(Self {
            path: Some(path),
            policy: RwLock::new(policy),
            last_modified: Mutex::new(modified),
        })
    }

    /// Store with a fixed in-memory policy; used by tests and the dev
    /// environment.
    #[must_use]
    pub fn in_memory(policy: RiskPolicy) -> Self {
        Self {
            path: None,
            policy: RwLock::new(policy),
            last_modified: Mutex::new(None),
        }
    }

    fn parse_file(path: &Path) -> Result<RiskPolicy, GateError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            GateError::validation("POLICY_UNREADABLE", format!("cannot read risk policy: {e}"))
        })?;
        serde_yaml::from_str(&content).map_err(|e| {
            GateError::validation("POLICY_MALFORMED", format!("invalid risk policy: {e}"))
                .with_context("path", path.display().to_string())
        })
    }

    /// Snapshot of the active policy.
    #[must_use]
    pub fn current(&self) -> RiskPolicy {
        self.policy.read().clone()
    }

    /// Replace the active policy.
    pub fn replace(&self, policy: RiskPolicy) {
        *self.policy.write() = policy;
    }

    /// Force a reload from disk.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the file is missing or malformed;
    /// the previous policy stays active.
    pub fn reload(&self) -> Result<(), GateError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let policy = Self::parse_file(path)?;
        *self.policy.write() = policy;
        *self.last_modified.lock() = file_mtime(path);
        tracing::info!(path = %path.display(), "risk policy reloaded");
        Ok(())
    }

    /// Reload when the file's mtime changed. Returns whether a reload
    /// happened.
    ///
    /// # Errors
    ///
    /// Propagates parse failures from [`Self::reload`].
    pub fn maybe_reload(&self) -> Result<bool, GateError> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let current = file_mtime(path);
        let changed = current.is_some() && current != *self.last_modified.lock();
        if changed {
            self.reload()?;
        }
        Ok(changed)
    }
}

fn file_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = PolicyStore::load(dir.path().join("absent.yml")).unwrap();
        assert_eq!(store.current().rules.r1.limit, dec!(50000));
    }

    #[test]
    fn loads_yaml_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk_policy.yml");
        std::fs::write(
            &path,
            "rules:\n  r1: {enabled: true, limit: 20000, severity: BLOCKER}\n",
        )
        .unwrap();

        let store = PolicyStore::load(&path).unwrap();
        assert_eq!(store.current().rules.r1.limit, dec!(20000));
    }

    #[test]
    fn malformed_policy_is_fatal_at_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk_policy.yml");
        std::fs::write(&path, "rules: [not, a, map]\n").unwrap();
        let err = PolicyStore::load(&path).unwrap_err();
        assert_eq!(err.code(), "POLICY_MALFORMED");
    }

    #[test]
    fn hot_reload_swaps_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk_policy.yml");
        std::fs::write(
            &path,
            "rules:\n  r1: {enabled: true, limit: 20000, severity: BLOCKER}\n",
        )
        .unwrap();
        let store = PolicyStore::load(&path).unwrap();

        // Rewrite with a new limit and a bumped mtime.
        std::fs::write(
            &path,
            "rules:\n  r1: {enabled: true, limit: 30000, severity: BLOCKER}\n",
        )
        .unwrap();
        let future = SystemTime::now() + std::time::Duration::from_secs(2);
        let file = std::fs::File::options().append(true).open(&path).unwrap();
        file.set_modified(future).unwrap();

        assert!(store.maybe_reload().unwrap());
        assert_eq!(store.current().rules.r1.limit, dec!(30000));
        // No change: no reload.
        assert!(!store.maybe_reload().unwrap());
    }

    #[test]
    fn failed_reload_keeps_previous_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("risk_policy.yml");
        std::fs::write(
            &path,
            "rules:\n  r1: {enabled: true, limit: 20000, severity: BLOCKER}\n",
        )
        .unwrap();
        let store = PolicyStore::load(&path).unwrap();

        std::fs::write(&path, "rules: {r1: broken\n").unwrap();
        assert!(store.reload().is_err());
        assert_eq!(store.current().rules.r1.limit, dec!(20000));
    }
}
