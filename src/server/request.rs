//! Request bodies for the REST surface.
//!
//! Approval payloads standardize on `reason` and `actor`; unknown aliases
//! (`approved_by`, `note`, and friends) are rejected by
//! `deny_unknown_fields`.

use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use crate::core::FlatOrderRequest;
use crate::models::TimeInForce;
use crate::risk::RiskDecision;
use crate::sim::SimulationResult;

/// `POST /api/v1/simulate`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SimulateRequest {
    /// The intent to simulate.
    pub intent: FlatOrderRequest,
    /// Explicit market price; keeps the result independent of cache state.
    pub market_price: Decimal,
}

/// `POST /api/v1/risk/evaluate`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RiskEvaluateRequest {
    /// The intent under evaluation.
    pub intent: FlatOrderRequest,
    /// The simulation to evaluate against.
    pub simulation: SimulationResult,
    /// Portfolio value for weight-based rules.
    pub portfolio_value: Decimal,
}

/// `POST /api/v1/proposals/create`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateProposalRequest {
    /// The intent.
    pub intent: FlatOrderRequest,
    /// Its simulation.
    pub simulation: SimulationResult,
    /// Its risk decision.
    pub risk_decision: RiskDecision,
}

/// `POST /api/v1/approval/request`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalRequest {
    /// Proposal to request approval for.
    pub proposal_id: Uuid,
}

/// `POST /api/v1/approval/grant`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantRequest {
    /// Proposal to approve.
    pub proposal_id: Uuid,
    /// Optional approval reason.
    #[serde(default)]
    pub reason: Option<String>,
    /// Who is granting.
    #[serde(default = "default_actor")]
    pub actor: String,
}

/// `POST /api/v1/approval/deny`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DenyRequest {
    /// Proposal to deny.
    pub proposal_id: Uuid,
    /// Required denial reason.
    pub reason: String,
    /// Who is denying.
    #[serde(default = "default_actor")]
    pub actor: String,
}

/// `POST /api/v1/orders/submit`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SubmitRequest {
    /// Approved proposal.
    pub proposal_id: Uuid,
    /// Single-use approval token.
    pub token_id: Uuid,
}

/// `POST /api/v1/cancel/request`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CancelOrderRequest {
    /// Broker order to cancel.
    pub broker_order_id: String,
    /// Why the cancel is wanted.
    pub reason: String,
}

/// `POST /api/v1/modify/request`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModifyOrderRequest {
    /// Broker order to modify.
    pub broker_order_id: String,
    /// Why the modify is wanted.
    pub reason: String,
    /// New quantity.
    #[serde(default)]
    pub quantity: Option<Decimal>,
    /// New limit price.
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// New stop price.
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    /// New time in force.
    #[serde(default)]
    pub time_in_force: Option<TimeInForce>,
}

/// `POST /api/v1/cancel/grant`, `/api/v1/modify/grant`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MutationGrantRequest {
    /// Mutation request to grant.
    pub request_id: Uuid,
    /// Who is granting.
    #[serde(default = "default_actor")]
    pub actor: String,
}

/// `POST /api/v1/cancel/deny`, `/api/v1/modify/deny`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MutationDenyRequest {
    /// Mutation request to deny.
    pub request_id: Uuid,
    /// Required denial reason.
    pub reason: String,
    /// Who is denying.
    #[serde(default = "default_actor")]
    pub actor: String,
}

/// `POST /api/v1/kill-switch/activate`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KillSwitchActivateRequest {
    /// Why the halt is raised.
    pub reason: String,
    /// Who is raising it.
    #[serde(default = "default_actor")]
    pub actor: String,
}

/// `POST /api/v1/kill-switch/deactivate`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KillSwitchReleaseRequest {
    /// Who is releasing the halt.
    #[serde(default = "default_actor")]
    pub actor: String,
}

fn default_actor() -> String {
    "api".to_string()
}

/// Query string for account-scoped reads.
#[derive(Debug, Deserialize)]
pub struct AccountQuery {
    /// Account id.
    pub account_id: String,
}

/// Query string for `GET /api/v1/market/snapshot`.
#[derive(Debug, Deserialize)]
pub struct SnapshotQuery {
    /// Instrument symbol.
    pub instrument: String,
    /// Bypass the snapshot cache.
    #[serde(default)]
    pub fresh: bool,
}

/// Query string for `GET /api/v1/market/bars`.
#[derive(Debug, Deserialize)]
pub struct BarsQuery {
    /// Instrument symbol.
    pub instrument: String,
    /// Bar timeframe.
    #[serde(default = "default_timeframe")]
    pub timeframe: String,
    /// Maximum bars.
    #[serde(default = "default_bars_limit")]
    pub limit: usize,
}

fn default_timeframe() -> String {
    "1d".to_string()
}
const fn default_bars_limit() -> usize {
    100
}

/// Query string for `GET /api/v1/instruments/search`.
#[derive(Debug, Deserialize)]
pub struct InstrumentSearchQuery {
    /// Free-text query; absent means wildcard.
    #[serde(default)]
    pub q: Option<String>,
    /// Instrument type filter.
    #[serde(default, rename = "type")]
    pub instrument_type: Option<crate::models::InstrumentType>,
    /// Exchange filter.
    #[serde(default)]
    pub exchange: Option<String>,
    /// Currency filter.
    #[serde(default)]
    pub currency: Option<String>,
    /// Maximum results.
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

const fn default_search_limit() -> usize {
    20
}

/// Query string for `GET /api/v1/approval/pending`.
#[derive(Debug, Deserialize)]
pub struct PendingQuery {
    /// Maximum proposals to return.
    #[serde(default = "default_pending_limit")]
    pub limit: usize,
}

const fn default_pending_limit() -> usize {
    100
}
