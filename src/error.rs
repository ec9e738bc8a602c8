//! Rich error handling for the trading gate.
//!
//! This module provides the structured error type shared by every component.
//! Errors carry a closed taxonomy kind, a stable machine-readable code, and
//! key-value context for debugging and client-side handling.
//!
//! # Taxonomy
//!
//! | Kind | HTTP | Retriable | Usage |
//! |------|------|-----------|-------|
//! | `Validation` | 400 | no | Schema/field/constraint violations |
//! | `State` | 409 | no | Transition from a state that does not admit it |
//! | `Policy` | 403 | no | Kill switch active, risk rejection, gateway denial |
//! | `Resource` | 503 | yes | Broker unreachable, timeout, circuit open |
//! | `Concurrency` | 409 | no | Token already consumed, store full |
//! | `Internal` | 500 | no | Storage failures, invariant violations (masked) |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed error taxonomy for the trading gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// Schema, field, or constraint violation in the caller's input.
    Validation,
    /// Attempted lifecycle transition from a state that does not admit it.
    State,
    /// A policy said no: kill switch, risk rules, or the tool gateway.
    Policy,
    /// A downstream resource is unavailable; retry may help.
    Resource,
    /// Lost a race: token consumed, proposal locked, store full.
    Concurrency,
    /// Storage failure or invariant violation. Masked from external callers.
    Internal,
}

impl ErrorKind {
    /// HTTP status code this kind surfaces as.
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::State | Self::Concurrency => 409,
            Self::Policy => 403,
            Self::Resource => 503,
            Self::Internal => 500,
        }
    }

    /// Whether a retry by the caller may succeed.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(self, Self::Resource)
    }

    /// Stable reason string for this kind.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::State => "STATE",
            Self::Policy => "POLICY",
            Self::Resource => "RESOURCE",
            Self::Concurrency => "CONCURRENCY",
            Self::Internal => "INTERNAL",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.reason())
    }
}

/// A structured error with taxonomy kind, stable code, and context.
#[derive(Debug, Clone, Error)]
pub struct GateError {
    kind: ErrorKind,
    /// Stable machine-readable code, e.g. `KILL_SWITCH_ACTIVE`.
    code: String,
    message: String,
    context: Vec<(String, String)>,
}

impl GateError {
    /// Create a new error.
    #[must_use]
    pub fn new(kind: ErrorKind, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: code.into(),
            message: message.into(),
            context: Vec::new(),
        }
    }

    /// Add context to the error.
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.push((key.into(), value.into()));
        self
    }

    /// Get the taxonomy kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Get the stable code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Get the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Get the context pairs.
    #[must_use]
    pub fn context(&self) -> &[(String, String)] {
        &self.context
    }

    /// Convert to an HTTP response body.
    ///
    /// Internal errors are masked: the code survives but the message is
    /// replaced, so storage details never leak to external callers.
    #[must_use]
    pub fn to_http_response(&self) -> HttpErrorResponse {
        let message = if self.kind == ErrorKind::Internal {
            "internal error".to_string()
        } else {
            self.message.clone()
        };
        HttpErrorResponse {
            kind: self.kind,
            code: self.code.clone(),
            message,
            retriable: self.kind.is_retriable(),
            details: if self.kind == ErrorKind::Internal {
                HashMap::new()
            } else {
                self.context.iter().cloned().collect()
            },
        }
    }
}

impl std::fmt::Display for GateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}/{}] {}", self.kind.reason(), self.code, self.message)
    }
}

/// HTTP-compatible error response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpErrorResponse {
    /// Taxonomy kind.
    pub kind: ErrorKind,
    /// Stable machine-readable code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Whether a retry may help.
    pub retriable: bool,
    /// Additional details.
    pub details: HashMap<String, String>,
}

/// Convenience constructors for common errors.
impl GateError {
    /// A field failed validation.
    #[must_use]
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, code, message)
    }

    /// An operation was attempted from the wrong lifecycle state.
    #[must_use]
    pub fn state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::State, "INVALID_STATE_TRANSITION", message)
    }

    /// The kill switch blocked the operation.
    #[must_use]
    pub fn kill_switch(operation: &str) -> Self {
        Self::new(
            ErrorKind::Policy,
            "KILL_SWITCH_ACTIVE",
            format!("kill switch is active, {operation} blocked"),
        )
        .with_context("operation", operation)
    }

    /// The risk gate rejected the order.
    #[must_use]
    pub fn risk_rejected(reason: impl Into<String>, violated_rules: &[String]) -> Self {
        Self::new(ErrorKind::Policy, "RISK_REJECTED", reason)
            .with_context("violated_rules", violated_rules.join(","))
    }

    /// The tool gateway denied the call.
    #[must_use]
    pub fn gateway_denied(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(ErrorKind::Policy, code, reason)
    }

    /// A broker call failed; retry subject to backoff.
    #[must_use]
    pub fn resource(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, code, message)
    }

    /// An approval token was already consumed.
    #[must_use]
    pub fn token_consumed(token_id: &str) -> Self {
        Self::new(
            ErrorKind::Concurrency,
            "TOKEN_ALREADY_CONSUMED",
            "token already consumed",
        )
        .with_context("token_id", token_id)
    }

    /// The proposal store is full and nothing is evictable.
    #[must_use]
    pub fn store_full() -> Self {
        Self::new(
            ErrorKind::Concurrency,
            "STORE_FULL",
            "proposal store is full and no terminal proposal is evictable",
        )
    }

    /// A submission whose token was consumed failed at the broker. The token
    /// is burned; the caller must start a new proposal.
    #[must_use]
    pub fn submission_failed(proposal_id: &str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Resource, "ORDER_SUBMISSION_FAILED", message)
            .with_context("proposal_id", proposal_id)
            .with_context("token_burned", "true")
    }

    /// Not found, surfaced as validation on the identifier.
    #[must_use]
    pub fn not_found(entity: &str, id: &str) -> Self {
        Self::new(
            ErrorKind::Validation,
            "NOT_FOUND",
            format!("{entity} {id} not found"),
        )
        .with_context("id", id)
    }

    /// Internal error. Fully captured in the audit log, masked externally.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, "INTERNAL_ERROR", message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_http_mapping() {
        assert_eq!(ErrorKind::Validation.http_status(), 400);
        assert_eq!(ErrorKind::State.http_status(), 409);
        assert_eq!(ErrorKind::Policy.http_status(), 403);
        assert_eq!(ErrorKind::Resource.http_status(), 503);
        assert_eq!(ErrorKind::Concurrency.http_status(), 409);
        assert_eq!(ErrorKind::Internal.http_status(), 500);
    }

    #[test]
    fn only_resource_is_retriable() {
        assert!(ErrorKind::Resource.is_retriable());
        assert!(!ErrorKind::Validation.is_retriable());
        assert!(!ErrorKind::Concurrency.is_retriable());
    }

    #[test]
    fn error_creation_with_context() {
        let error = GateError::validation("BAD_FIELD", "quantity must be positive")
            .with_context("field", "quantity")
            .with_context("value", "-1");

        assert_eq!(error.kind(), ErrorKind::Validation);
        assert_eq!(error.code(), "BAD_FIELD");
        assert_eq!(error.context().len(), 2);
    }

    #[test]
    fn internal_errors_are_masked_in_http_response() {
        let error = GateError::internal("audit write failed: disk full")
            .with_context("path", "/var/lib/audit.jsonl");
        let response = error.to_http_response();

        assert_eq!(response.code, "INTERNAL_ERROR");
        assert_eq!(response.message, "internal error");
        assert!(response.details.is_empty());
    }

    #[test]
    fn policy_errors_surface_verbatim() {
        let error = GateError::kill_switch("order submission");
        let response = error.to_http_response();

        assert_eq!(response.code, "KILL_SWITCH_ACTIVE");
        assert!(response.message.contains("order submission"));
        assert!(!response.retriable);
    }

    #[test]
    fn submission_failed_marks_token_burned() {
        let error = GateError::submission_failed("p-1", "broker unreachable");
        assert_eq!(error.code(), "ORDER_SUBMISSION_FAILED");
        assert!(
            error
                .context()
                .iter()
                .any(|(k, v)| k == "token_burned" && v == "true")
        );
    }

    #[test]
    fn display_includes_kind_and_code() {
        let error = GateError::token_consumed("t-1");
        assert_eq!(
            error.to_string(),
            "[CONCURRENCY/TOKEN_ALREADY_CONSUMED] token already consumed"
        );
    }
}
