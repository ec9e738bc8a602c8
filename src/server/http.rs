//! Axum router and handlers.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::broker::SearchFilters;
use crate::core::{Core, FlatOrderRequest};
use crate::error::GateError;
use crate::models::Instrument;
use crate::mutate::ModifyParams;

use super::request::{
    AccountQuery, ApprovalRequest, BarsQuery, CancelOrderRequest, CreateProposalRequest,
    DenyRequest, GrantRequest, InstrumentSearchQuery, KillSwitchActivateRequest,
    KillSwitchReleaseRequest, ModifyOrderRequest, MutationDenyRequest, MutationGrantRequest,
    PendingQuery, RiskEvaluateRequest, SimulateRequest, SnapshotQuery, SubmitRequest,
};
use super::response::{
    ApprovalResponse, CreateProposalResponse, GrantResponse, KillSwitchResponse, MutationResponse,
    PendingResponse, ProposeResponse, SubmitResponse,
};

const CORRELATION_HEADER: &str = "x-correlation-id";

/// Error wrapper mapping [`GateError`] onto HTTP.
struct ApiError(GateError);

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind().http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if self.0.kind() == crate::error::ErrorKind::Internal {
            tracing::error!(error = %self.0, "internal error surfaced to client (masked)");
        }
        (status, Json(self.0.to_http_response())).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Read the correlation id header, generating one when absent.
fn correlation_from(headers: &HeaderMap) -> String {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.trim().is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string)
}

/// Attach the correlation id header to a JSON response.
fn with_correlation<T: serde::Serialize>(correlation_id: &str, body: T) -> Response {
    let mut response = Json(body).into_response();
    if let Ok(value) = HeaderValue::from_str(correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    response
}

/// Build the full REST router over a [`Core`].
pub fn create_router(core: Arc<Core>) -> Router {
    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/portfolio", get(portfolio))
        .route("/api/v1/positions", get(positions))
        .route("/api/v1/market/snapshot", get(market_snapshot))
        .route("/api/v1/market/bars", get(market_bars))
        .route("/api/v1/instruments/search", get(instrument_search))
        .route("/api/v1/propose", post(propose))
        .route("/api/v1/simulate", post(simulate))
        .route("/api/v1/risk/evaluate", post(risk_evaluate))
        .route("/api/v1/proposals/create", post(proposals_create))
        .route("/api/v1/approval/request", post(approval_request))
        .route("/api/v1/approval/grant", post(approval_grant))
        .route("/api/v1/approval/deny", post(approval_deny))
        .route("/api/v1/approval/pending", get(approval_pending))
        .route("/api/v1/orders/submit", post(orders_submit))
        .route("/api/v1/orders/{broker_order_id}", get(order_status))
        .route("/api/v1/cancel/request", post(cancel_request))
        .route("/api/v1/cancel/grant", post(mutation_grant))
        .route("/api/v1/cancel/deny", post(mutation_deny))
        .route("/api/v1/modify/request", post(modify_request))
        .route("/api/v1/modify/grant", post(mutation_grant))
        .route("/api/v1/modify/deny", post(mutation_deny))
        .route("/api/v1/kill-switch/activate", post(kill_switch_activate))
        .route("/api/v1/kill-switch/deactivate", post(kill_switch_release))
        .route("/api/v1/kill-switch/status", get(kill_switch_status))
        .route("/api/v1/feature-flags", get(feature_flags))
        .with_state(core)
}

async fn health(State(core): State<Arc<Core>>) -> impl IntoResponse {
    Json(core.health().await)
}

async fn portfolio(
    State(core): State<Arc<Core>>,
    Query(query): Query<AccountQuery>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(core.portfolio(&query.account_id).await?))
}

async fn positions(
    State(core): State<Arc<Core>>,
    Query(query): Query<AccountQuery>,
) -> ApiResult<impl IntoResponse> {
    let positions = core
        .broker
        .get_positions(&query.account_id)
        .await
        .map_err(GateError::from)?;
    Ok(Json(positions))
}

async fn market_snapshot(
    State(core): State<Arc<Core>>,
    Query(query): Query<SnapshotQuery>,
) -> ApiResult<impl IntoResponse> {
    let instrument = Instrument::stock(&query.instrument);
    Ok(Json(core.market_snapshot(&instrument, query.fresh).await?))
}

async fn market_bars(
    State(core): State<Arc<Core>>,
    Query(query): Query<BarsQuery>,
) -> ApiResult<impl IntoResponse> {
    let instrument = Instrument::stock(&query.instrument);
    if let Some(cached) = core.cache.get_bars(&instrument.symbol, &query.timeframe) {
        return Ok(Json(cached));
    }
    let bars = core
        .broker
        .get_market_bars(&instrument, &query.timeframe, query.limit)
        .await
        .map_err(GateError::from)?;
    core.cache
        .put_bars(&instrument.symbol, &query.timeframe, bars.clone());
    Ok(Json(bars))
}

async fn instrument_search(
    State(core): State<Arc<Core>>,
    Query(query): Query<InstrumentSearchQuery>,
) -> ApiResult<impl IntoResponse> {
    let filters = SearchFilters {
        instrument_type: query.instrument_type,
        exchange: query.exchange,
        currency: query.currency,
        limit: query.limit,
    };
    let candidates = core
        .broker
        .instrument_search(query.q.as_deref().unwrap_or(""), &filters)
        .await
        .map_err(GateError::from)?;
    Ok(Json(candidates))
}

async fn propose(
    State(core): State<Arc<Core>>,
    headers: HeaderMap,
    Json(request): Json<FlatOrderRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_from(&headers);
    let intent = core.propose(request, &correlation_id)?;
    let intent_hash = intent.intent_hash();
    Ok(with_correlation(
        &correlation_id,
        ProposeResponse {
            intent,
            intent_hash,
            correlation_id: correlation_id.clone(),
        },
    ))
}

async fn simulate(
    State(core): State<Arc<Core>>,
    headers: HeaderMap,
    Json(request): Json<SimulateRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_from(&headers);
    let intent = request.intent.into_intent()?;
    let result = core
        .simulate_with_price(&intent, request.market_price, &correlation_id)
        .await?;
    Ok(with_correlation(&correlation_id, result))
}

async fn risk_evaluate(
    State(core): State<Arc<Core>>,
    headers: HeaderMap,
    Json(request): Json<RiskEvaluateRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_from(&headers);
    let intent = request.intent.into_intent()?;
    let decision = core.evaluate_risk_standalone(
        &intent,
        &request.simulation,
        request.portfolio_value,
        &correlation_id,
    )?;
    Ok(with_correlation(&correlation_id, decision))
}

async fn proposals_create(
    State(core): State<Arc<Core>>,
    headers: HeaderMap,
    Json(request): Json<CreateProposalRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_from(&headers);
    let intent = request.intent.into_intent()?;
    let proposal = core.create_proposal(
        intent,
        request.simulation,
        request.risk_decision,
        &correlation_id,
    )?;
    Ok(with_correlation(
        &correlation_id,
        CreateProposalResponse {
            proposal_id: proposal.proposal_id,
            state: proposal.state,
            correlation_id: correlation_id.clone(),
        },
    ))
}

async fn approval_request(
    State(core): State<Arc<Core>>,
    headers: HeaderMap,
    Json(request): Json<ApprovalRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_from(&headers);
    let ctx = crate::approval::AutoApprovalContext {
        flags: &core.settings.flags,
        kill_switch: &core.kill_switch,
        policy: core.auto_policy.as_ref(),
        portfolio_nav: None,
    };
    let (proposal, token) = core
        .approvals
        .request(request.proposal_id, Some(&ctx), Utc::now())?;
    let message = if token.is_some() {
        "auto-approved".to_string()
    } else {
        "approval requested".to_string()
    };
    Ok(with_correlation(
        &correlation_id,
        ApprovalResponse {
            proposal_id: proposal.proposal_id,
            state: proposal.state,
            message,
            correlation_id: correlation_id.clone(),
        },
    ))
}

async fn approval_grant(
    State(core): State<Arc<Core>>,
    headers: HeaderMap,
    Json(request): Json<GrantRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_from(&headers);
    let (proposal, token) = core.approvals.grant(
        request.proposal_id,
        request.reason.as_deref(),
        &request.actor,
        Utc::now(),
    )?;
    Ok(with_correlation(
        &correlation_id,
        GrantResponse {
            proposal_id: proposal.proposal_id,
            token_id: token.token_id,
            expires_at: token.expires_at,
            correlation_id: correlation_id.clone(),
        },
    ))
}

async fn approval_deny(
    State(core): State<Arc<Core>>,
    headers: HeaderMap,
    Json(request): Json<DenyRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_from(&headers);
    let proposal = core.approvals.deny(
        request.proposal_id,
        &request.reason,
        &request.actor,
        Utc::now(),
    )?;
    Ok(with_correlation(
        &correlation_id,
        ApprovalResponse {
            proposal_id: proposal.proposal_id,
            state: proposal.state,
            message: "approval denied".to_string(),
            correlation_id: correlation_id.clone(),
        },
    ))
}

async fn approval_pending(
    State(core): State<Arc<Core>>,
    Query(query): Query<PendingQuery>,
) -> impl IntoResponse {
    let proposals = core.approvals.pending(query.limit);
    let count = proposals.len();
    Json(PendingResponse { proposals, count })
}

async fn orders_submit(
    State(core): State<Arc<Core>>,
    headers: HeaderMap,
    Json(request): Json<SubmitRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_from(&headers);
    let order = core
        .submitter
        .submit(request.proposal_id, request.token_id)
        .await?;

    // Poll to terminal state in the background; cancellation is wired to
    // process shutdown, not to the request.
    let submitter = Arc::clone(&core.submitter);
    let proposal_id = request.proposal_id;
    let broker_order_id = order.broker_order_id.clone();
    tokio::spawn(async move {
        let cancel = CancellationToken::new();
        if let Err(e) = submitter
            .poll(
                proposal_id,
                &broker_order_id,
                crate::submit::DEFAULT_MAX_POLLS,
                crate::submit::DEFAULT_POLL_INTERVAL,
                &cancel,
            )
            .await
        {
            tracing::warn!(
                proposal_id = %proposal_id,
                error = %e,
                "background polling ended with error"
            );
        }
    });

    Ok(with_correlation(
        &correlation_id,
        SubmitResponse {
            proposal_id: request.proposal_id,
            broker_order_id: order.broker_order_id,
            status: order.status,
            correlation_id: correlation_id.clone(),
        },
    ))
}

async fn order_status(
    State(core): State<Arc<Core>>,
    Path(broker_order_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let order = core
        .broker
        .get_order_status(&broker_order_id)
        .await
        .map_err(GateError::from)?;
    Ok(Json(order))
}

async fn cancel_request(
    State(core): State<Arc<Core>>,
    headers: HeaderMap,
    Json(request): Json<CancelOrderRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_from(&headers);
    let mutation = core.mutations.request_cancel(
        &request.broker_order_id,
        &request.reason,
        &correlation_id,
    )?;
    Ok(with_correlation(
        &correlation_id,
        MutationResponse {
            request_id: mutation.request_id,
            state: mutation.state,
            correlation_id: correlation_id.clone(),
        },
    ))
}

async fn modify_request(
    State(core): State<Arc<Core>>,
    headers: HeaderMap,
    Json(request): Json<ModifyOrderRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_from(&headers);
    let params = ModifyParams {
        quantity: request.quantity,
        limit_price: request.limit_price,
        stop_price: request.stop_price,
        time_in_force: request.time_in_force,
    };
    let mutation = core.mutations.request_modify(
        &request.broker_order_id,
        params,
        &request.reason,
        &correlation_id,
    )?;
    Ok(with_correlation(
        &correlation_id,
        MutationResponse {
            request_id: mutation.request_id,
            state: mutation.state,
            correlation_id: correlation_id.clone(),
        },
    ))
}

/// Shared by the cancel and modify grant routes; the mutation service
/// distinguishes the two by the stored request.
async fn mutation_grant(
    State(core): State<Arc<Core>>,
    headers: HeaderMap,
    Json(request): Json<MutationGrantRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_from(&headers);
    let (mutation, _order) = core
        .mutations
        .grant(request.request_id, &request.actor)
        .await?;
    Ok(with_correlation(
        &correlation_id,
        MutationResponse {
            request_id: mutation.request_id,
            state: mutation.state,
            correlation_id: correlation_id.clone(),
        },
    ))
}

/// Shared by the cancel and modify deny routes.
async fn mutation_deny(
    State(core): State<Arc<Core>>,
    headers: HeaderMap,
    Json(request): Json<MutationDenyRequest>,
) -> ApiResult<Response> {
    let correlation_id = correlation_from(&headers);
    let mutation = core
        .mutations
        .deny(request.request_id, &request.reason, &request.actor)?;
    Ok(with_correlation(
        &correlation_id,
        MutationResponse {
            request_id: mutation.request_id,
            state: mutation.state,
            correlation_id: correlation_id.clone(),
        },
    ))
}

async fn kill_switch_activate(
    State(core): State<Arc<Core>>,
    Json(request): Json<KillSwitchActivateRequest>,
) -> ApiResult<impl IntoResponse> {
    let state = core.kill_switch.activate(&request.reason, &request.actor)?;
    Ok(Json(KillSwitchResponse {
        enabled: state.enabled,
        state,
    }))
}

async fn kill_switch_release(
    State(core): State<Arc<Core>>,
    Json(request): Json<KillSwitchReleaseRequest>,
) -> ApiResult<impl IntoResponse> {
    let state = core.kill_switch.release(&request.actor)?;
    Ok(Json(KillSwitchResponse {
        enabled: state.enabled,
        state,
    }))
}

async fn kill_switch_status(State(core): State<Arc<Core>>) -> impl IntoResponse {
    let state = core.kill_switch.state();
    Json(KillSwitchResponse {
        enabled: core.kill_switch.is_enabled(),
        state,
    })
}

async fn feature_flags(State(core): State<Arc<Core>>) -> impl IntoResponse {
    Json(core.settings.flags.clone())
}
