//! Declarative tool policy: allowlist, forbidden parameters, session
//! budgets.
//!
//! Tools without an explicit rule are denied - fail-safe by default.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::GateError;

use super::{READ_TOOLS, WRITE_TOOLS};

/// Allowed actions for a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolAction {
    /// The tool may be called.
    Allow,
    /// The tool is denied outright.
    Deny,
}

/// Policy rule for one tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRule {
    /// Tool name the rule applies to.
    pub tool_name: String,
    /// Allow or deny.
    pub action: ToolAction,
    /// Per-session call budget; `None` means unlimited.
    #[serde(default)]
    pub max_calls_per_session: Option<u32>,
    /// Parameter names that must not appear.
    #[serde(default)]
    pub denied_parameters: HashSet<String>,
}

impl ToolRule {
    /// An allow rule with no budget.
    #[must_use]
    pub fn allow(tool_name: &str) -> Self {
        Self {
            tool_name: tool_name.to_string(),
            action: ToolAction::Allow,
            max_calls_per_session: None,
            denied_parameters: HashSet::new(),
        }
    }

    /// An allow rule with a per-session call budget.
    #[must_use]
    pub fn allow_budgeted(tool_name: &str, budget: u32) -> Self {
        Self {
            max_calls_per_session: Some(budget),
            ..Self::allow(tool_name)
        }
    }
}

/// Tool policy with per-session call accounting.
pub struct ToolPolicy {
    rules: HashMap<String, ToolRule>,
    session_counts: Mutex<HashMap<(String, String), u32>>,
}

impl Default for ToolPolicy {
    /// The default policy: read-only tools unlimited, gated-write tools
    /// budgeted to 50 calls per session.
    fn default() -> Self {
        let mut rules: Vec<ToolRule> = READ_TOOLS.iter().map(|t| ToolRule::allow(t)).collect();
        rules.extend(WRITE_TOOLS.iter().map(|t| ToolRule::allow_budgeted(t, 50)));
        Self::new(rules)
    }
}

impl ToolPolicy {
    /// Build a policy from explicit rules.
    #[must_use]
    pub fn new(rules: Vec<ToolRule>) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|r| (r.tool_name.clone(), r))
                .collect(),
            session_counts: Mutex::new(HashMap::new()),
        }
    }

    /// Load rules from a JSON document of the form
    /// `{"rules": [{"tool_name": ..., "action": ...}, ...]}`.
    ///
    /// # Errors
    ///
    /// Validation error when the document does not parse.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, GateError> {
        #[derive(Deserialize)]
        struct Doc {
            rules: Vec<ToolRule>,
        }
        let doc: Doc = serde_json::from_value(value.clone()).map_err(|e| {
            GateError::validation("POLICY_MALFORMED", format!("invalid tool policy: {e}"))
        })?;
        Ok(Self::new(doc.rules))
    }

    /// Check a call against the policy.
    ///
    /// # Errors
    ///
    /// `TOOL_DENIED` for unknown or denied tools, forbidden parameters, or
    /// an exhausted session budget.
    pub fn check(
        &self,
        tool_name: &str,
        session_id: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), GateError> {
        let Some(rule) = self.rules.get(tool_name) else {
            return Err(GateError::gateway_denied(
                "TOOL_DENIED",
                format!("tool {tool_name} not in policy (denied by default)"),
            ));
        };

        if rule.action == ToolAction::Deny {
            return Err(GateError::gateway_denied(
                "TOOL_DENIED",
                format!("tool {tool_name} is denied by policy"),
            ));
        }

        let forbidden: Vec<&String> = params
            .keys()
            .filter(|k| rule.denied_parameters.contains(*k))
            .collect();
        if !forbidden.is_empty() {
            return Err(GateError::gateway_denied(
                "TOOL_DENIED",
                format!("forbidden parameters: {forbidden:?}"),
            ));
        }

        if let Some(budget) = rule.max_calls_per_session {
            let counts = self.session_counts.lock();
            let used = counts
                .get(&(session_id.to_string(), tool_name.to_string()))
                .copied()
                .unwrap_or(0);
            if used >= budget {
                return Err(GateError::gateway_denied(
                    "TOOL_DENIED",
                    format!("session budget exhausted for {tool_name} ({used}/{budget})"),
                ));
            }
        }

        Ok(())
    }

    /// Record a successful call against the session budget.
    pub fn record_call(&self, tool_name: &str, session_id: &str) {
        let mut counts = self.session_counts.lock();
        *counts
            .entry((session_id.to_string(), tool_name.to_string()))
            .or_insert(0) += 1;
    }

    /// Forget a session's counters.
    pub fn reset_session(&self, session_id: &str) {
        self.session_counts
            .lock()
            .retain(|(session, _), _| session != session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_params() -> serde_json::Map<String, serde_json::Value> {
        serde_json::Map::new()
    }

    #[test]
    fn default_policy_allows_read_tools() {
        let policy = ToolPolicy::default();
        assert!(policy.check("get_portfolio", "s1", &empty_params()).is_ok());
        assert!(policy.check("simulate_order", "s1", &empty_params()).is_ok());
    }

    #[test]
    fn unlisted_tool_is_denied_by_default() {
        let policy = ToolPolicy::default();
        let err = policy
            .check("drop_database", "s1", &empty_params())
            .unwrap_err();
        assert_eq!(err.code(), "TOOL_DENIED");
    }

    #[test]
    fn deny_rule_wins() {
        let policy = ToolPolicy::new(vec![ToolRule {
            action: ToolAction::Deny,
            ..ToolRule::allow("get_portfolio")
        }]);
        assert!(policy.check("get_portfolio", "s1", &empty_params()).is_err());
    }

    #[test]
    fn forbidden_parameters_are_rejected() {
        let mut rule = ToolRule::allow("get_portfolio");
        rule.denied_parameters.insert("raw_sql".to_string());
        let policy = ToolPolicy::new(vec![rule]);

        let mut params = empty_params();
        params.insert("raw_sql".to_string(), serde_json::json!("DROP TABLE"));
        let err = policy.check("get_portfolio", "s1", &params).unwrap_err();
        assert!(err.message().contains("forbidden parameters"));
    }

    #[test]
    fn session_budget_is_enforced_per_session() {
        let policy = ToolPolicy::new(vec![ToolRule::allow_budgeted("request_approval", 2)]);

        for _ in 0..2 {
            policy.check("request_approval", "s1", &empty_params()).unwrap();
            policy.record_call("request_approval", "s1");
        }
        assert!(policy.check("request_approval", "s1", &empty_params()).is_err());
        // A different session has its own budget.
        assert!(policy.check("request_approval", "s2", &empty_params()).is_ok());
    }

    #[test]
    fn reset_session_restores_budget() {
        let policy = ToolPolicy::new(vec![ToolRule::allow_budgeted("request_approval", 1)]);
        policy.record_call("request_approval", "s1");
        assert!(policy.check("request_approval", "s1", &empty_params()).is_err());

        policy.reset_session("s1");
        assert!(policy.check("request_approval", "s1", &empty_params()).is_ok());
    }

    #[test]
    fn policy_loads_from_json() {
        let doc = serde_json::json!({
            "rules": [
                {"tool_name": "get_portfolio", "action": "allow"},
                {"tool_name": "request_approval", "action": "allow", "max_calls_per_session": 5},
            ]
        });
        let policy = ToolPolicy::from_json(&doc).unwrap();
        assert!(policy.check("get_portfolio", "s1", &empty_params()).is_ok());
        assert!(policy.check("get_market_bars", "s1", &empty_params()).is_err());
    }
}
