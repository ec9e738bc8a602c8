//! Tool gateway: the sole entry point for the language-model tool surface.
//!
//! Every tool call passes three checks in order - declarative policy,
//! strict input schema, rate limits with a denial circuit breaker - and, on
//! success, the output passes through a redactor. The gateway exposes no
//! operation that yields a valid token or reaches the broker's write calls
//! directly: `request_approval` returns a proposal id only.

mod policy;
mod ratelimit;
mod redact;
mod schema;

pub use policy::{ToolAction, ToolPolicy, ToolRule};
pub use ratelimit::{RateLimitConfig, RateLimiter};
pub use redact::Redactor;
pub use schema::{FieldKind, FieldSpec, ToolSchema, default_schemas};

use std::collections::HashMap;
use std::sync::Arc;

use crate::audit::{AuditLog, EventType};
use crate::error::GateError;

/// Read-only tools exposed to the model.
pub const READ_TOOLS: &[&str] = &[
    "get_portfolio",
    "get_positions",
    "get_cash",
    "get_open_orders",
    "get_market_snapshot",
    "get_market_bars",
    "instrument_search",
    "instrument_resolve",
    "simulate_order",
    "evaluate_risk",
];

/// Gated-write tools: they create requests, never direct broker writes.
pub const WRITE_TOOLS: &[&str] = &[
    "request_approval",
    "request_order_cancel",
    "request_order_modify",
];

/// The tool gateway.
pub struct ToolGateway {
    policy: ToolPolicy,
    schemas: HashMap<&'static str, ToolSchema>,
    limiter: RateLimiter,
    redactor: Redactor,
    strict_validation: bool,
    audit: Arc<AuditLog>,
}

impl ToolGateway {
    /// Create a gateway with the default policy and schemas.
    #[must_use]
    pub fn new(limits: RateLimitConfig, strict_validation: bool, audit: Arc<AuditLog>) -> Self {
        Self {
            policy: ToolPolicy::default(),
            schemas: default_schemas(),
            limiter: RateLimiter::new(limits),
            redactor: Redactor::default(),
            strict_validation,
            audit,
        }
    }

    /// Replace the tool policy.
    #[must_use]
    pub fn with_policy(mut self, policy: ToolPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Authorize a tool call: policy, then schema, then rate limits.
    ///
    /// A pass records the call against the session budget and rate windows
    /// and appends `TOOL_CALLED`; a failure appends `TOOL_REJECTED` with the
    /// denial reason.
    ///
    /// # Errors
    ///
    /// Policy errors with stable codes: `TOOL_DENIED`, `VALIDATION_FAILED`,
    /// `RATE_LIMITED`, `BREAKER_OPEN`. Audit failures propagate as internal.
    pub fn authorize(
        &self,
        tool_name: &str,
        session_id: &str,
        params: &serde_json::Map<String, serde_json::Value>,
        correlation_id: &str,
    ) -> Result<(), GateError> {
        let verdict = self.run_checks(tool_name, session_id, params);
        match verdict {
            Ok(()) => {
                self.policy.record_call(tool_name, session_id);
                self.audit.record(
                    EventType::ToolCalled,
                    correlation_id,
                    serde_json::json!({
                        "tool": tool_name,
                        "session_id": session_id,
                    }),
                )?;
                Ok(())
            }
            Err(err) => {
                self.audit.record(
                    EventType::ToolRejected,
                    correlation_id,
                    serde_json::json!({
                        "tool": tool_name,
                        "session_id": session_id,
                        "code": err.code(),
                        "reason": err.message(),
                    }),
                )?;
                Err(err)
            }
        }
    }

    fn run_checks(
        &self,
        tool_name: &str,
        session_id: &str,
        params: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<(), GateError> {
        // 1. Policy: unknown tools are denied, parameters screened, session
        //    budget enforced.
        self.policy.check(tool_name, session_id, params)?;

        // 2. Schema: strict input validation, unknown fields rejected.
        let Some(schema) = self.schemas.get(tool_name) else {
            return Err(GateError::gateway_denied(
                "TOOL_DENIED",
                format!("tool {tool_name} has no input schema"),
            ));
        };
        schema.validate(params, self.strict_validation)?;

        // 3. Rate limits and the denial breaker.
        self.limiter.check(tool_name, session_id)
    }

    /// Redact an output payload before it leaves the gateway.
    #[must_use]
    pub fn redact(&self, value: serde_json::Value) -> serde_json::Value {
        self.redactor.redact(value)
    }

    /// Whether a tool name is known to the gateway at all.
    #[must_use]
    pub fn is_known_tool(tool_name: &str) -> bool {
        READ_TOOLS.contains(&tool_name) || WRITE_TOOLS.contains(&tool_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_gateway(limits: RateLimitConfig) -> (tempfile::TempDir, Arc<AuditLog>, ToolGateway) {
        let dir = tempfile::tempdir().unwrap();
        let audit = Arc::new(AuditLog::open(dir.path().join("audit.jsonl")).unwrap());
        let gateway = ToolGateway::new(limits, true, Arc::clone(&audit));
        (dir, audit, gateway)
    }

    fn params(json: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        json.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn allows_known_tool_with_valid_params() {
        let (_dir, audit, gateway) = make_gateway(RateLimitConfig::default());
        let result = gateway.authorize(
            "get_portfolio",
            "session-1",
            &params(serde_json::json!({"account_id": "DU123456"})),
            "corr-1",
        );
        assert!(result.is_ok());

        let events = audit.query(&crate::audit::AuditQuery {
            event_types: vec![EventType::ToolCalled],
            ..crate::audit::AuditQuery::default()
        });
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn unknown_tool_is_denied() {
        let (_dir, audit, gateway) = make_gateway(RateLimitConfig::default());
        let err = gateway
            .authorize("submit_order", "session-1", &params(serde_json::json!({})), "corr-1")
            .unwrap_err();
        assert_eq!(err.code(), "TOOL_DENIED");

        let events = audit.query(&crate::audit::AuditQuery {
            event_types: vec![EventType::ToolRejected],
            ..crate::audit::AuditQuery::default()
        });
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let (_dir, _audit, gateway) = make_gateway(RateLimitConfig::default());
        let err = gateway
            .authorize(
                "get_portfolio",
                "session-1",
                &params(serde_json::json!({"account_id": "DU123456", "sneaky": true})),
                "corr-1",
            )
            .unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
    }

    #[test]
    fn per_tool_rate_limit_then_breaker() {
        let limits = RateLimitConfig {
            per_tool_per_minute: 5,
            per_session_per_minute: 1000,
            global_per_minute: 10_000,
            breaker_threshold: 3,
            breaker_cooldown: std::time::Duration::from_secs(300),
        };
        let (_dir, _audit, gateway) = make_gateway(limits);
        let p = params(serde_json::json!({"account_id": "DU123456"}));

        for _ in 0..5 {
            gateway.authorize("get_portfolio", "s1", &p, "corr-1").unwrap();
        }
        // Call 6 exceeds the per-tool budget.
        let err = gateway.authorize("get_portfolio", "s1", &p, "corr-1").unwrap_err();
        assert_eq!(err.code(), "RATE_LIMITED");

        // Two more denials trip the breaker; after that the code changes.
        let _ = gateway.authorize("get_portfolio", "s1", &p, "corr-1").unwrap_err();
        let _ = gateway.authorize("get_portfolio", "s1", &p, "corr-1").unwrap_err();
        let err = gateway.authorize("get_portfolio", "s1", &p, "corr-1").unwrap_err();
        assert_eq!(err.code(), "BREAKER_OPEN");

        // Even a different tool and session is rejected while open.
        let err = gateway
            .authorize(
                "get_market_snapshot",
                "s2",
                &params(serde_json::json!({"symbol": "AAPL"})),
                "corr-1",
            )
            .unwrap_err();
        assert_eq!(err.code(), "BREAKER_OPEN");
    }

    #[test]
    fn redaction_applies_to_output() {
        let (_dir, _audit, gateway) = make_gateway(RateLimitConfig::default());
        let output = gateway.redact(serde_json::json!({
            "account_id": "DU123456",
            "api_key": "abcdef123456",
        }));
        assert_eq!(output["account_id"], "******56");
        assert_eq!(output["api_key"], "***REDACTED***");
    }
}
