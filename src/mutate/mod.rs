//! Cancel / modify service: the two-step commit mirror for live orders.
//!
//! Mutating a live broker order follows the same discipline as creating
//! one: a request is recorded first, then a human grants or denies it, and
//! only a grant touches the broker. The kill switch blocks execution steps.
//!
//! A granted modify cancels the existing order at the broker and records
//! the requested replacement parameters; the replacement itself must go
//! through the full propose → approve → submit pipeline, so no order ever
//! reaches the broker without a token.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::{AuditLog, EventType};
use crate::broker::BrokerAdapter;
use crate::error::GateError;
use crate::models::{OpenOrder, TimeInForce};
use crate::safety::KillSwitch;

/// Lifecycle of a cancel/modify request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationState {
    /// Recorded, awaiting a decision.
    Requested,
    /// Denied. Terminal.
    Denied,
    /// Granted and executed at the broker. Terminal.
    Executed,
    /// Granted but the broker call failed. Terminal.
    Failed,
}

/// Replacement parameters for a modify request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModifyParams {
    /// New quantity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<Decimal>,
    /// New limit price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    /// New stop price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    /// New time in force.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
}

impl ModifyParams {
    fn is_empty(&self) -> bool {
        self.quantity.is_none()
            && self.limit_price.is_none()
            && self.stop_price.is_none()
            && self.time_in_force.is_none()
    }
}

/// A pending or resolved mutation of a live order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MutationRequest {
    /// Request id.
    pub request_id: Uuid,
    /// Correlation id for the audit trail.
    pub correlation_id: String,
    /// Broker order being mutated.
    pub broker_order_id: String,
    /// Why the mutation was requested.
    pub reason: String,
    /// Replacement parameters; `None` for a plain cancel.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_params: Option<ModifyParams>,
    /// Current state.
    pub state: MutationState,
    /// Decision reason (grant/deny), once resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}

impl MutationRequest {
    fn is_cancel(&self) -> bool {
        self.new_params.is_none()
    }
}

/// Two-step cancel/modify service.
pub struct MutationService {
    broker: Arc<dyn BrokerAdapter>,
    audit: Arc<AuditLog>,
    kill_switch: Arc<KillSwitch>,
    requests: Mutex<HashMap<Uuid, MutationRequest>>,
}

impl MutationService {
    /// Create a mutation service.
    #[must_use]
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        audit: Arc<AuditLog>,
        kill_switch: Arc<KillSwitch>,
    ) -> Self {
        Self {
            broker,
            audit,
            kill_switch,
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Record a cancel request for a live order.
    ///
    /// # Errors
    ///
    /// Validation error on an empty reason; audit failures propagate.
    pub fn request_cancel(
        &self,
        broker_order_id: &str,
        reason: &str,
        correlation_id: &str,
    ) -> Result<MutationRequest, GateError> {
        self.insert_request(broker_order_id, reason, correlation_id, None)
    }

    /// Record a modify request for a live order.
    ///
    /// # Errors
    ///
    /// Validation error on an empty reason or empty parameter set.
    pub fn request_modify(
        &self,
        broker_order_id: &str,
        new_params: ModifyParams,
        reason: &str,
        correlation_id: &str,
    ) -> Result<MutationRequest, GateError> {
        if new_params.is_empty() {
            return Err(GateError::validation(
                "EMPTY_MODIFY",
                "a modify request must change at least one parameter",
            ));
        }
        self.insert_request(broker_order_id, reason, correlation_id, Some(new_params))
    }

    fn insert_request(
        &self,
        broker_order_id: &str,
        reason: &str,
        correlation_id: &str,
        new_params: Option<ModifyParams>,
    ) -> Result<MutationRequest, GateError> {
        if reason.trim().is_empty() {
            return Err(GateError::validation(
                "MISSING_REASON",
                "a mutation reason is required",
            ));
        }
        let now = Utc::now();
        let request = MutationRequest {
            request_id: Uuid::new_v4(),
            correlation_id: correlation_id.to_string(),
            broker_order_id: broker_order_id.to_string(),
            reason: reason.trim().to_string(),
            new_params,
            state: MutationState::Requested,
            resolution: None,
            created_at: now,
            updated_at: now,
        };
        self.requests
            .lock()
            .insert(request.request_id, request.clone());

        let event_type = if request.is_cancel() {
            EventType::CancelRequested
        } else {
            EventType::ModifyRequested
        };
        self.audit.record(
            event_type,
            correlation_id,
            serde_json::json!({
                "request_id": request.request_id,
                "broker_order_id": broker_order_id,
                "reason": request.reason,
                "new_params": request.new_params,
            }),
        )?;
        Ok(request)
    }

    /// Look up a request.
    #[must_use]
    pub fn get(&self, request_id: Uuid) -> Option<MutationRequest> {
        self.requests.lock().get(&request_id).cloned()
    }

    /// Requests still awaiting a decision.
    #[must_use]
    pub fn pending(&self) -> Vec<MutationRequest> {
        let mut pending: Vec<MutationRequest> = self
            .requests
            .lock()
            .values()
            .filter(|r| r.state == MutationState::Requested)
            .cloned()
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        pending
    }

    /// Grant a request and execute it at the broker.
    ///
    /// # Errors
    ///
    /// `KILL_SWITCH_ACTIVE`, not-found, state errors, and broker failures
    /// (which leave the request in `FAILED`).
    pub async fn grant(
        &self,
        request_id: Uuid,
        actor: &str,
    ) -> Result<(MutationRequest, OpenOrder), GateError> {
        self.kill_switch.check_or_fail("order mutation")?;

        let request = self
            .get(request_id)
            .ok_or_else(|| GateError::not_found("mutation request", &request_id.to_string()))?;
        if request.state != MutationState::Requested {
            return Err(GateError::state(format!(
                "mutation request already resolved as {:?}",
                request.state
            )));
        }

        // Both cancel and modify remove the live order; a modify's
        // replacement goes back through the proposal pipeline.
        let result = self.broker.cancel_order(&request.broker_order_id).await;

        match result {
            Ok(order) => {
                let updated = self.resolve(
                    request_id,
                    MutationState::Executed,
                    format!("granted by {actor}"),
                );
                let event_type = if request.is_cancel() {
                    EventType::CancelGranted
                } else {
                    EventType::ModifyGranted
                };
                self.audit.record(
                    event_type,
                    &request.correlation_id,
                    serde_json::json!({
                        "request_id": request_id,
                        "broker_order_id": request.broker_order_id,
                        "actor": actor,
                        "new_params": request.new_params,
                        "order_status": order.status,
                    }),
                )?;
                Ok((updated, order))
            }
            Err(broker_err) => {
                self.resolve(request_id, MutationState::Failed, broker_err.to_string());
                self.audit.record(
                    EventType::ErrorOccurred,
                    &request.correlation_id,
                    serde_json::json!({
                        "request_id": request_id,
                        "broker_order_id": request.broker_order_id,
                        "reason": broker_err.to_string(),
                    }),
                )?;
                Err(broker_err.into())
            }
        }
    }

    /// Deny a request.
    ///
    /// # Errors
    ///
    /// Validation error on an empty reason; not-found and state errors.
    pub fn deny(
        &self,
        request_id: Uuid,
        reason: &str,
        actor: &str,
    ) -> Result<MutationRequest, GateError> {
        if reason.trim().is_empty() {
            return Err(GateError::validation(
                "MISSING_REASON",
                "a denial reason is required",
            ));
        }
        let request = self
            .get(request_id)
            .ok_or_else(|| GateError::not_found("mutation request", &request_id.to_string()))?;
        if request.state != MutationState::Requested {
            return Err(GateError::state(format!(
                "mutation request already resolved as {:?}",
                request.state
            )));
        }

        let updated = self.resolve(
            request_id,
            MutationState::Denied,
            format!("denied by {actor}: {reason}"),
        );
        let event_type = if request.is_cancel() {
            EventType::CancelDenied
        } else {
            EventType::ModifyDenied
        };
        self.audit.record(
            event_type,
            &request.correlation_id,
            serde_json::json!({
                "request_id": request_id,
                "broker_order_id": request.broker_order_id,
                "reason": reason,
                "actor": actor,
            }),
        )?;
        Ok(updated)
    }

    fn resolve(&self, request_id: Uuid, state: MutationState, resolution: String) -> MutationRequest {
        let mut requests = self.requests.lock();
        match requests.get_mut(&request_id) {
            Some(entry) => {
                entry.state = state;
                entry.resolution = Some(resolution);
                entry.updated_at = Utc::now();
                entry.clone()
            }
            // Requests are never removed, so this arm is unreachable in
            // practice; synthesize a terminal record rather than panic.
            None => MutationRequest {
                request_id,
                correlation_id: String::new(),
                broker_order_id: String::new(),
                reason: String::new(),
                new_params: None,
                state,
                resolution: Some(resolution),
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
        }
    }
}
