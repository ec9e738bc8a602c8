//! Process-wide kill switch for emergency trading halt.
//!
//! The switch is consulted by every write path: order submission, cancel,
//! modify, auto-approval, and token consumption. State persists to a JSON
//! file so a restart preserves an active halt. The `KILL_SWITCH_ENABLED`
//! environment variable force-activates independently of stored state and
//! blocks release while set - environment wins.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audit::{AuditLog, EventType};
use crate::config::env_flag;
use crate::error::GateError;

/// Persisted kill switch state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KillSwitchState {
    /// Whether the switch is active.
    pub enabled: bool,
    /// Activation time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_at: Option<DateTime<Utc>>,
    /// Who or what activated it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activated_by: Option<String>,
    /// Why it was activated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Global kill switch. One instance lives in the `Core` aggregate; there is
/// no singleton accessor.
pub struct KillSwitch {
    state_file: PathBuf,
    state: RwLock<KillSwitchState>,
    audit: Arc<AuditLog>,
}

impl KillSwitch {
    /// Open the kill switch, loading persisted state and applying the
    /// environment override.
    ///
    /// # Errors
    ///
    /// Returns an internal error when the state file exists but cannot be
    /// parsed; a corrupt halt record is not something to guess about.
    pub fn open(state_file: impl AsRef<Path>, audit: Arc<AuditLog>) -> Result<Self, GateError> {
        let state_file = state_file.as_ref().to_path_buf();
        if let Some(parent) = state_file.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                GateError::internal(format!("cannot create kill switch directory: {e}"))
            })?;
        }

        let mut state = if state_file.exists() {
            let content = std::fs::read_to_string(&state_file)
                .map_err(|e| GateError::internal(format!("cannot read kill switch state: {e}")))?;
            serde_json::from_str(&content)
                .map_err(|e| GateError::internal(format!("corrupt kill switch state: {e}")))?
        } else {
            KillSwitchState::default()
        };

        // Environment override: force-activate on startup.
        if env_flag("KILL_SWITCH_ENABLED") && !state.enabled {
            state.enabled = true;
            state.activated_at = Some(Utc::now());
            state.activated_by = Some("environment".to_string());
            state.reason = Some(
                std::env::var("KILL_SWITCH_REASON")
                    .unwrap_or_else(|_| "KILL_SWITCH_ENABLED environment variable set".to_string()),
            );
        }

        let switch = Self {
            state_file,
            state: RwLock::new(state),
            audit,
        };
        switch.save()?;
        Ok(switch)
    }

    fn save(&self) -> Result<(), GateError> {
        let state = self.state.read().clone();
        let json = serde_json::to_string_pretty(&state)
            .map_err(|e| GateError::internal(format!("kill switch serialization failed: {e}")))?;
        std::fs::write(&self.state_file, json)
            .map_err(|e| GateError::internal(format!("kill switch persist failed: {e}")))
    }

    /// Whether the switch is active. The environment override is checked on
    /// every read so an operator export takes effect immediately.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        env_flag("KILL_SWITCH_ENABLED") || self.state.read().enabled
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> KillSwitchState {
        self.state.read().clone()
    }

    /// Activate the switch. Idempotent: re-activating keeps the original
    /// record.
    ///
    /// # Errors
    ///
    /// Propagates persistence and audit failures.
    pub fn activate(&self, reason: &str, actor: &str) -> Result<KillSwitchState, GateError> {
        {
            let mut state = self.state.write();
            if !state.enabled {
                state.enabled = true;
                state.activated_at = Some(Utc::now());
                state.activated_by = Some(actor.to_string());
                state.reason = Some(reason.to_string());
            }
        }
        self.save()?;
        self.audit.record(
            EventType::KillSwitchActivated,
            "",
            serde_json::json!({"reason": reason, "actor": actor}),
        )?;
        tracing::warn!(reason, actor, "kill switch activated");
        Ok(self.state())
    }

    /// Release the switch.
    ///
    /// # Errors
    ///
    /// Returns a policy error while the environment override is set; remove
    /// the variable and restart to release.
    pub fn release(&self, actor: &str) -> Result<KillSwitchState, GateError> {
        if env_flag("KILL_SWITCH_ENABLED") {
            return Err(GateError::new(
                crate::error::ErrorKind::Policy,
                "KILL_SWITCH_ENV_LOCKED",
                "cannot release: KILL_SWITCH_ENABLED environment variable is set",
            ));
        }
        {
            let mut state = self.state.write();
            state.enabled = false;
        }
        self.save()?;
        self.audit.record(
            EventType::KillSwitchReleased,
            "",
            serde_json::json!({"actor": actor}),
        )?;
        tracing::warn!(actor, "kill switch released");
        Ok(self.state())
    }

    /// Fail with a policy error when the switch is active.
    ///
    /// # Errors
    ///
    /// Returns `KILL_SWITCH_ACTIVE` when enabled.
    pub fn check_or_fail(&self, op_name: &str) -> Result<(), GateError> {
        if self.is_enabled() {
            let state = self.state();
            let mut err = GateError::kill_switch(op_name);
            if let Some(reason) = state.reason {
                err = err.with_context("reason", reason);
            }
            return Err(err);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditQuery;

    fn make_switch(dir: &tempfile::TempDir) -> (Arc<AuditLog>, KillSwitch) {
        let audit = Arc::new(AuditLog::open(dir.path().join("audit.jsonl")).unwrap());
        let switch =
            KillSwitch::open(dir.path().join("kill_switch.json"), Arc::clone(&audit)).unwrap();
        (audit, switch)
    }

    #[test]
    fn starts_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let (_audit, switch) = make_switch(&dir);
        assert!(!switch.is_enabled());
        assert!(switch.check_or_fail("submit").is_ok());
    }

    #[test]
    fn activate_blocks_writes_and_audits() {
        let dir = tempfile::tempdir().unwrap();
        let (audit, switch) = make_switch(&dir);

        switch.activate("fat finger detected", "admin").unwrap();
        assert!(switch.is_enabled());

        let err = switch.check_or_fail("order submission").unwrap_err();
        assert_eq!(err.code(), "KILL_SWITCH_ACTIVE");

        let events = audit.query(&AuditQuery {
            event_types: vec![EventType::KillSwitchActivated],
            ..AuditQuery::default()
        });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].data["actor"], "admin");
    }

    #[test]
    fn state_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLog::open(dir.path().join("audit.jsonl")).unwrap());
        let path = dir.path().join("kill_switch.json");

        {
            let switch = KillSwitch::open(&path, Arc::clone(&audit)).unwrap();
            switch.activate("halt for review", "ops").unwrap();
        }

        let reopened = KillSwitch::open(&path, audit).unwrap();
        assert!(reopened.is_enabled());
        assert_eq!(reopened.state().reason.unwrap(), "halt for review");
    }

    #[test]
    fn release_restores_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (audit, switch) = make_switch(&dir);

        switch.activate("halt", "ops").unwrap();
        switch.release("ops").unwrap();
        assert!(!switch.is_enabled());
        assert!(switch.check_or_fail("submit").is_ok());

        let events = audit.query(&AuditQuery {
            event_types: vec![EventType::KillSwitchReleased],
            ..AuditQuery::default()
        });
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn reactivation_keeps_original_record() {
        let dir = tempfile::tempdir().unwrap();
        let (_audit, switch) = make_switch(&dir);

        switch.activate("first reason", "ops").unwrap();
        switch.activate("second reason", "other").unwrap();

        let state = switch.state();
        assert_eq!(state.reason.unwrap(), "first reason");
        assert_eq!(state.activated_by.unwrap(), "ops");
    }
}
