//! Order proposal lifecycle: states, transitions, and approval tokens.
//!
//! A proposal is mutable only through successor values produced by
//! [`OrderProposal::with_state`]; every transition is validated against the
//! allowed-transition matrix, and the intent hash never changes after
//! creation.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::GateError;
use crate::risk::RiskDecision;
use crate::sim::SimulationResult;

use super::instrument::OrderSide;
use super::intent::OrderIntent;

/// Order lifecycle states in the two-step commit flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderState {
    /// Intent created and validated.
    Proposed,
    /// Simulation completed.
    Simulated,
    /// Risk gate approved.
    RiskApproved,
    /// Risk gate rejected. Terminal.
    RiskRejected,
    /// Awaiting human or auto approval.
    ApprovalRequested,
    /// Approved; a token has been issued.
    ApprovalGranted,
    /// Denied by a human. Terminal.
    ApprovalDenied,
    /// Submitted to the broker.
    Submitted,
    /// Filled by the broker. Terminal.
    Filled,
    /// Cancelled. Terminal.
    Cancelled,
    /// Rejected by the broker. Terminal.
    Rejected,
}

impl OrderState {
    /// Whether this state is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::RiskRejected
                | Self::ApprovalDenied
                | Self::Filled
                | Self::Cancelled
                | Self::Rejected
        )
    }

    /// Check if a state transition is valid.
    ///
    /// `RiskApproved` → `ApprovalGranted` is the auto-approval shortcut;
    /// every other edge requires the intermediate state.
    #[must_use]
    pub fn is_valid_transition(from: Self, to: Self) -> bool {
        matches!(
            (from, to),
            (Self::Proposed, Self::Simulated)
                | (Self::Simulated, Self::RiskApproved)
                | (Self::Simulated, Self::RiskRejected)
                | (Self::RiskApproved, Self::ApprovalRequested)
                | (Self::RiskApproved, Self::ApprovalGranted)
                | (Self::ApprovalRequested, Self::ApprovalGranted)
                | (Self::ApprovalRequested, Self::ApprovalDenied)
                | (Self::ApprovalGranted, Self::Submitted)
                | (Self::Submitted, Self::Filled)
                | (Self::Submitted, Self::Cancelled)
                | (Self::Submitted, Self::Rejected)
        )
    }

    /// All valid next states from a given state.
    #[must_use]
    pub fn valid_next_states(from: Self) -> Vec<Self> {
        match from {
            Self::Proposed => vec![Self::Simulated],
            Self::Simulated => vec![Self::RiskApproved, Self::RiskRejected],
            Self::RiskApproved => vec![Self::ApprovalRequested, Self::ApprovalGranted],
            Self::ApprovalRequested => vec![Self::ApprovalGranted, Self::ApprovalDenied],
            Self::ApprovalGranted => vec![Self::Submitted],
            Self::Submitted => vec![Self::Filled, Self::Cancelled, Self::Rejected],
            // Terminal states
            Self::RiskRejected
            | Self::ApprovalDenied
            | Self::Filled
            | Self::Cancelled
            | Self::Rejected => vec![],
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Proposed => "PROPOSED",
            Self::Simulated => "SIMULATED",
            Self::RiskApproved => "RISK_APPROVED",
            Self::RiskRejected => "RISK_REJECTED",
            Self::ApprovalRequested => "APPROVAL_REQUESTED",
            Self::ApprovalGranted => "APPROVAL_GRANTED",
            Self::ApprovalDenied => "APPROVAL_DENIED",
            Self::Submitted => "SUBMITTED",
            Self::Filled => "FILLED",
            Self::Cancelled => "CANCELLED",
            Self::Rejected => "REJECTED",
        };
        write!(f, "{name}")
    }
}

/// Complete order proposal with lifecycle tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderProposal {
    /// Unique proposal identifier.
    pub proposal_id: Uuid,
    /// Correlation id shared by every audit event of this proposal.
    pub correlation_id: String,
    /// The validated order intent.
    pub intent: OrderIntent,
    /// SHA-256 of the canonical intent JSON, fixed at creation.
    pub intent_hash: String,
    /// Simulation result, once simulated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub simulation: Option<SimulationResult>,
    /// Risk decision, once evaluated.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_decision: Option<RiskDecision>,
    /// Current lifecycle state.
    pub state: OrderState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last transition time.
    pub updated_at: DateTime<Utc>,
    /// Token id, once approval is granted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub granted_token_id: Option<Uuid>,
    /// Human reason for approval or denial.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub approval_reason: Option<String>,
    /// Broker order id, once submitted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub broker_order_id: Option<String>,
}

impl OrderProposal {
    /// Create a new proposal in `PROPOSED` state.
    #[must_use]
    pub fn new(intent: OrderIntent, correlation_id: String, now: DateTime<Utc>) -> Self {
        let intent_hash = intent.intent_hash();
        Self {
            proposal_id: Uuid::new_v4(),
            correlation_id,
            intent,
            intent_hash,
            simulation: None,
            risk_decision: None,
            state: OrderState::Proposed,
            created_at: now,
            updated_at: now,
            granted_token_id: None,
            approval_reason: None,
            broker_order_id: None,
        }
    }

    /// Produce a successor in `next` state.
    ///
    /// # Errors
    ///
    /// Returns a state error when the transition is not in the allowed set.
    pub fn with_state(&self, next: OrderState, now: DateTime<Utc>) -> Result<Self, GateError> {
        if !OrderState::is_valid_transition(self.state, next) {
            let reason = if self.state.is_terminal() {
                format!(
                    "proposal is terminal in {}, cannot transition to {next}",
                    self.state
                )
            } else {
                format!("invalid transition from {} to {next}", self.state)
            };
            return Err(GateError::state(reason)
                .with_context("proposal_id", self.proposal_id.to_string())
                .with_context("from", self.state.to_string())
                .with_context("to", next.to_string()));
        }
        let mut successor = self.clone();
        successor.state = next;
        successor.updated_at = now;
        Ok(successor)
    }

    /// Attach the simulation result, moving to `SIMULATED`.
    ///
    /// # Errors
    ///
    /// Returns a state error unless the proposal is in `PROPOSED`.
    pub fn with_simulation(
        &self,
        simulation: SimulationResult,
        now: DateTime<Utc>,
    ) -> Result<Self, GateError> {
        let mut successor = self.with_state(OrderState::Simulated, now)?;
        successor.simulation = Some(simulation);
        Ok(successor)
    }

    /// Attach the risk decision, moving to `RISK_APPROVED` or `RISK_REJECTED`.
    ///
    /// # Errors
    ///
    /// Returns a state error unless the proposal is in `SIMULATED`.
    pub fn with_risk_decision(
        &self,
        decision: RiskDecision,
        now: DateTime<Utc>,
    ) -> Result<Self, GateError> {
        let next = if decision.is_approved() {
            OrderState::RiskApproved
        } else {
            OrderState::RiskRejected
        };
        let mut successor = self.with_state(next, now)?;
        successor.risk_decision = Some(decision);
        Ok(successor)
    }

    /// Gross notional from the simulation, when available.
    #[must_use]
    pub fn gross_notional(&self) -> Option<Decimal> {
        self.simulation.as_ref().and_then(|s| s.gross_notional)
    }

    /// Summary view for the approval queue.
    #[must_use]
    pub fn to_pending(&self) -> PendingProposal {
        PendingProposal {
            proposal_id: self.proposal_id,
            correlation_id: self.correlation_id.clone(),
            state: self.state,
            created_at: self.created_at,
            symbol: self.intent.instrument.symbol.clone(),
            side: self.intent.side,
            quantity: self.intent.quantity,
            gross_notional: self.gross_notional(),
            risk_decision: self.risk_decision.as_ref().map(|d| d.decision.to_string()),
            risk_reason: self.risk_decision.as_ref().map(|d| d.reason.clone()),
        }
    }
}

/// Single-use token for order commit approval.
///
/// The token is bound to exactly one proposal and one intent hash; it cannot
/// be replayed against a modified intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalToken {
    /// Unpredictable token identifier.
    pub token_id: Uuid,
    /// Proposal this token was granted for.
    pub proposal_id: Uuid,
    /// Intent hash at grant time; must match at use time.
    pub intent_hash: String,
    /// Issue time.
    pub issued_at: DateTime<Utc>,
    /// Expiry time (issue + TTL).
    pub expires_at: DateTime<Utc>,
    /// Consumption time; set exactly once.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub used_at: Option<DateTime<Utc>>,
}

impl ApprovalToken {
    /// Issue a fresh token for a proposal.
    #[must_use]
    pub fn issue(proposal: &OrderProposal, ttl: chrono::Duration, now: DateTime<Utc>) -> Self {
        Self {
            token_id: Uuid::new_v4(),
            proposal_id: proposal.proposal_id,
            intent_hash: proposal.intent_hash.clone(),
            issued_at: now,
            expires_at: now + ttl,
            used_at: None,
        }
    }

    /// Whether the token is still valid: unused and not expired.
    ///
    /// Expiry is strict: a token presented exactly at `expires_at` is
    /// invalid.
    #[must_use]
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && now < self.expires_at
    }

    /// Consume the token, marking it used.
    ///
    /// # Errors
    ///
    /// Returns a concurrency error when already consumed, or a policy error
    /// when expired.
    pub fn consume(&self, now: DateTime<Utc>) -> Result<Self, GateError> {
        if self.used_at.is_some() {
            return Err(GateError::token_consumed(&self.token_id.to_string()));
        }
        if now >= self.expires_at {
            return Err(GateError::new(
                crate::error::ErrorKind::Policy,
                "TOKEN_EXPIRED",
                "approval token has expired",
            )
            .with_context("token_id", self.token_id.to_string())
            .with_context("expires_at", self.expires_at.to_rfc3339()));
        }
        let mut consumed = self.clone();
        consumed.used_at = Some(now);
        Ok(consumed)
    }
}

/// Minimal proposal view for the approval queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingProposal {
    /// Proposal id.
    pub proposal_id: Uuid,
    /// Correlation id.
    pub correlation_id: String,
    /// Current state.
    pub state: OrderState,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Symbol.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Quantity.
    pub quantity: Decimal,
    /// Gross notional from the simulation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gross_notional: Option<Decimal>,
    /// Risk decision name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_decision: Option<String>,
    /// Risk reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_reason: Option<String>,
}
