//! Response bodies for the REST surface.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{OrderState, OrderStatus, PendingProposal};

/// `POST /api/v1/propose` response.
#[derive(Debug, Serialize)]
pub struct ProposeResponse {
    /// The validated intent, canonical form.
    pub intent: crate::models::OrderIntent,
    /// Its hash.
    pub intent_hash: String,
    /// Correlation id of the flow.
    pub correlation_id: String,
}

/// `POST /api/v1/proposals/create` response.
#[derive(Debug, Serialize)]
pub struct CreateProposalResponse {
    /// Stored proposal id.
    pub proposal_id: Uuid,
    /// State after storage.
    pub state: OrderState,
    /// Correlation id of the flow.
    pub correlation_id: String,
}

/// `POST /api/v1/approval/request` response.
#[derive(Debug, Serialize)]
pub struct ApprovalResponse {
    /// Proposal id.
    pub proposal_id: Uuid,
    /// State after the request (auto-approval may have granted already).
    pub state: OrderState,
    /// Human-readable outcome.
    pub message: String,
    /// Correlation id of the flow.
    pub correlation_id: String,
}

/// `POST /api/v1/approval/grant` response. The only surface a token ever
/// crosses.
#[derive(Debug, Serialize)]
pub struct GrantResponse {
    /// Proposal id.
    pub proposal_id: Uuid,
    /// Single-use token id.
    pub token_id: Uuid,
    /// Token expiry.
    pub expires_at: DateTime<Utc>,
    /// Correlation id of the flow.
    pub correlation_id: String,
}

/// `GET /api/v1/approval/pending` response.
#[derive(Debug, Serialize)]
pub struct PendingResponse {
    /// Pending proposals, newest first.
    pub proposals: Vec<PendingProposal>,
    /// Count returned.
    pub count: usize,
}

/// `POST /api/v1/orders/submit` response.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    /// Proposal id.
    pub proposal_id: Uuid,
    /// Broker-assigned order id.
    pub broker_order_id: String,
    /// Broker status at submission.
    pub status: OrderStatus,
    /// Correlation id of the flow.
    pub correlation_id: String,
}

/// Cancel/modify flow response.
#[derive(Debug, Serialize)]
pub struct MutationResponse {
    /// Mutation request id.
    pub request_id: Uuid,
    /// State after the step.
    pub state: crate::mutate::MutationState,
    /// Correlation id of the flow.
    pub correlation_id: String,
}

/// Kill-switch status response.
#[derive(Debug, Serialize)]
pub struct KillSwitchResponse {
    /// Whether the switch is active.
    pub enabled: bool,
    /// Current state detail.
    pub state: crate::safety::KillSwitchState,
}
