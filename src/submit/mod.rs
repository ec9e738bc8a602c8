//! Order submission: the token-validated bridge from an approved proposal
//! to the broker.
//!
//! Sequence: kill-switch check, state check, token validation against the
//! intent hash, atomic token consume, broker submit, `SUBMITTED` transition,
//! audit, then polling to a terminal state. A broker failure after the
//! token was consumed leaves the proposal in `APPROVAL_GRANTED` with the
//! token burned; the caller must start a new proposal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::approval::ApprovalService;
use crate::audit::{AuditLog, EventType};
use crate::broker::BrokerAdapter;
use crate::error::GateError;
use crate::models::{OpenOrder, OrderState, OrderStatus};
use crate::safety::KillSwitch;

/// Default number of status polls before giving up.
pub const DEFAULT_MAX_POLLS: u32 = 60;
/// Default interval between status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Token-validated order submitter.
pub struct OrderSubmitter {
    broker: Arc<dyn BrokerAdapter>,
    approvals: Arc<ApprovalService>,
    audit: Arc<AuditLog>,
    kill_switch: Arc<KillSwitch>,
}

impl OrderSubmitter {
    /// Create a submitter.
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        approvals: Arc<ApprovalService>,
        audit: Arc<AuditLog>,
        kill_switch: Arc<KillSwitch>,
    ) -> Self {
        Self {
            broker,
            approvals,
            audit,
            kill_switch,
        }
    }

    /// Submit an approved proposal to the broker.
    ///
    /// # Errors
    ///
    /// - `KILL_SWITCH_ACTIVE` before anything else happens
    /// - not-found / state errors when the proposal is not `APPROVAL_GRANTED`
    /// - `TOKEN_INVALID` when validation fails; the broker is not called
    /// - token consumption errors (already consumed, expired)
    /// - `ORDER_SUBMISSION_FAILED` when the broker fails after the token was
    ///   consumed; the token cannot be reused
    pub async fn submit(
        &self,
        proposal_id: Uuid,
        token_id: Uuid,
    ) -> Result<OpenOrder, GateError> {
        self.kill_switch.check_or_fail("order submission")?;
        let now = Utc::now();

        let proposal = self
            .approvals
            .get(proposal_id)
            .ok_or_else(|| GateError::not_found("proposal", &proposal_id.to_string()))?;

        if proposal.state != OrderState::ApprovalGranted {
            // A replay of an already-used token reads as a consumed-token
            // race, not a state machine bug in the caller.
            if self
                .approvals
                .get_token(token_id)
                .is_some_and(|t| t.used_at.is_some())
            {
                return Err(GateError::token_consumed(&token_id.to_string()));
            }
            return Err(GateError::state(format!(
                "cannot submit proposal in state {}, must be APPROVAL_GRANTED",
                proposal.state
            )));
        }

        // Token validation failure means the broker is never contacted.
        if !self
            .approvals
            .validate_token(token_id, &proposal.intent_hash, now)
        {
            self.audit.record(
                EventType::OrderSubmissionFailed,
                &proposal.correlation_id,
                serde_json::json!({
                    "proposal_id": proposal_id,
                    "token_id": token_id,
                    "reason": "invalid or expired token",
                }),
            )?;
            return Err(GateError::new(
                crate::error::ErrorKind::Policy,
                "TOKEN_INVALID",
                "approval token is invalid, expired, or bound to a different intent",
            )
            .with_context("token_id", token_id.to_string()));
        }

        let token = self.approvals.consume_token(token_id, now)?;

        match self.broker.submit_order(&proposal.intent, &token).await {
            Ok(order) => {
                let mut submitted = proposal.with_state(OrderState::Submitted, Utc::now())?;
                submitted.broker_order_id = Some(order.broker_order_id.clone());
                self.approvals.update(submitted)?;

                self.audit.record(
                    EventType::OrderSubmitted,
                    &proposal.correlation_id,
                    serde_json::json!({
                        "proposal_id": proposal_id,
                        "token_id": token_id,
                        "broker_order_id": order.broker_order_id,
                        "symbol": order.instrument.symbol,
                        "side": order.side,
                        "quantity": order.quantity,
                    }),
                )?;
                tracing::info!(
                    proposal_id = %proposal_id,
                    broker_order_id = %order.broker_order_id,
                    "order submitted"
                );
                Ok(order)
            }
            Err(broker_err) => {
                // The token is burned. The proposal stays APPROVAL_GRANTED
                // but can only proceed through a fresh proposal.
                self.audit.record(
                    EventType::OrderSubmissionFailed,
                    &proposal.correlation_id,
                    serde_json::json!({
                        "proposal_id": proposal_id,
                        "token_id": token_id,
                        "reason": broker_err.to_string(),
                    }),
                )?;
                tracing::error!(
                    proposal_id = %proposal_id,
                    error = %broker_err,
                    "broker submission failed after token consumption"
                );
                Err(GateError::submission_failed(
                    &proposal_id.to_string(),
                    broker_err.to_string(),
                ))
            }
        }
    }

    /// Poll an order until a terminal status or `max_polls` attempts.
    ///
    /// On a terminal status the proposal transitions to the matching state
    /// and the matching audit event is emitted. When polling exhausts
    /// without a terminal status the proposal stays `SUBMITTED` and an
    /// operational warning is logged. The sleep between attempts is
    /// cancellable; on cancellation a final audit event records the reason
    /// and no partial state is committed.
    ///
    /// # Errors
    ///
    /// Broker and audit failures propagate; cancellation and poll
    /// exhaustion return the last observed order.
    pub async fn poll(
        &self,
        proposal_id: Uuid,
        broker_order_id: &str,
        max_polls: u32,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<OpenOrder, GateError> {
        let mut last: Option<OpenOrder> = None;

        for attempt in 0..max_polls {
            if cancel.is_cancelled() {
                return self.finish_cancelled(proposal_id, broker_order_id, last).await;
            }

            let order = self.broker.get_order_status(broker_order_id).await?;
            if order.status.is_terminal() {
                self.apply_terminal(proposal_id, &order)?;
                return Ok(order);
            }
            last = Some(order);

            if attempt + 1 < max_polls {
                tokio::select! {
                    () = cancel.cancelled() => {
                        return self.finish_cancelled(proposal_id, broker_order_id, last).await;
                    }
                    () = tokio::time::sleep(interval) => {}
                }
            }
        }

        tracing::warn!(
            proposal_id = %proposal_id,
            broker_order_id,
            max_polls,
            "polling exhausted without terminal status, proposal remains SUBMITTED"
        );
        last.ok_or_else(|| GateError::internal("polling never observed the order"))
    }

    async fn finish_cancelled(
        &self,
        proposal_id: Uuid,
        broker_order_id: &str,
        last: Option<OpenOrder>,
    ) -> Result<OpenOrder, GateError> {
        if let Some(proposal) = self.approvals.get(proposal_id) {
            self.audit.record(
                EventType::ErrorOccurred,
                &proposal.correlation_id,
                serde_json::json!({
                    "proposal_id": proposal_id,
                    "broker_order_id": broker_order_id,
                    "reason": "status polling cancelled",
                }),
            )?;
        }
        last.ok_or_else(|| {
            GateError::resource("POLL_CANCELLED", "status polling cancelled before first poll")
        })
    }

    /// Transition the proposal to the terminal state matching the broker
    /// status and emit the corresponding event.
    fn apply_terminal(&self, proposal_id: Uuid, order: &OpenOrder) -> Result<(), GateError> {
        let proposal = self
            .approvals
            .get(proposal_id)
            .ok_or_else(|| GateError::not_found("proposal", &proposal_id.to_string()))?;

        let (state, event_type) = match order.status {
            OrderStatus::Filled => (OrderState::Filled, EventType::OrderFilled),
            OrderStatus::Cancelled => (OrderState::Cancelled, EventType::OrderCancelled),
            OrderStatus::Rejected => (OrderState::Rejected, EventType::OrderRejected),
            OrderStatus::Pending | OrderStatus::Submitted => return Ok(()),
        };

        let updated = proposal.with_state(state, Utc::now())?;
        self.approvals.update(updated)?;
        self.audit.record(
            event_type,
            &proposal.correlation_id,
            serde_json::json!({
                "proposal_id": proposal_id,
                "broker_order_id": order.broker_order_id,
                "filled_quantity": order.filled_quantity,
                "average_fill_price": order.average_fill_price,
            }),
        )?;
        Ok(())
    }
}
