//! The `Core` aggregate: every component, wired once at startup.
//!
//! Handlers receive a `Core` reference instead of reaching for globals;
//! tests build a fresh `Core` per test over the mock broker. The aggregate
//! also implements the high-level pipeline operations (propose, simulate,
//! evaluate, store, request approval, tool dispatch) that the HTTP surface
//! and the tool gateway both delegate to.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::approval::{ApprovalService, AutoApprovalContext, AutoApprovalPolicy};
use crate::audit::{AuditLog, EventType};
use crate::broker::{
    BrokerAdapter, GatewayBroker, InstrumentHint, MarketDataCache, MockBroker, SearchFilters,
};
use crate::config::{Environment, Settings};
use crate::error::GateError;
use crate::gateway::{RateLimitConfig, ToolGateway};
use crate::models::{
    Instrument, InstrumentType, MarketSnapshot, OrderIntent, OrderConstraints, OrderProposal,
    OrderSide, OrderState, OrderType, Portfolio, TimeInForce,
};
use crate::mutate::{ModifyParams, MutationService};
use crate::risk::{PolicyStore, RiskDecision, RiskEngine};
use crate::safety::KillSwitch;
use crate::sim::{SimulationResult, TradeSimulator};
use crate::submit::OrderSubmitter;

/// Flat order request as submitted by clients and tools.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FlatOrderRequest {
    /// Account id.
    pub account_id: String,
    /// Ticker symbol.
    pub symbol: String,
    /// Side.
    pub side: OrderSide,
    /// Quantity.
    pub quantity: Decimal,
    /// Order type; limit orders are the safe default.
    #[serde(default = "default_order_type")]
    pub order_type: OrderType,
    /// Limit price.
    #[serde(default)]
    pub limit_price: Option<Decimal>,
    /// Stop price.
    #[serde(default)]
    pub stop_price: Option<Decimal>,
    /// Time in force.
    #[serde(default = "default_tif")]
    pub time_in_force: TimeInForce,
    /// Reason for the order.
    pub reason: String,
    /// Strategy tag.
    #[serde(default = "default_strategy_tag")]
    pub strategy_tag: String,
    /// Instrument type.
    #[serde(default = "default_instrument_type")]
    pub instrument_type: InstrumentType,
    /// Currency.
    #[serde(default = "default_currency")]
    pub currency: String,
    /// Exchange.
    #[serde(default)]
    pub exchange: Option<String>,
    /// Slippage ceiling in bps.
    #[serde(default)]
    pub max_slippage_bps: Option<u32>,
    /// Notional ceiling.
    #[serde(default)]
    pub max_notional: Option<Decimal>,
}

fn default_order_type() -> OrderType {
    OrderType::Lmt
}
fn default_tif() -> TimeInForce {
    TimeInForce::Day
}
fn default_strategy_tag() -> String {
    "manual".to_string()
}
fn default_instrument_type() -> InstrumentType {
    InstrumentType::Stk
}
fn default_currency() -> String {
    "USD".to_string()
}

impl FlatOrderRequest {
    /// Convert into a validated [`OrderIntent`].
    ///
    /// # Errors
    ///
    /// Validation errors from intent validation.
    pub fn into_intent(self) -> Result<OrderIntent, GateError> {
        let constraints = (self.max_slippage_bps.is_some() || self.max_notional.is_some()).then(
            || OrderConstraints {
                max_slippage_bps: self.max_slippage_bps,
                max_notional: self.max_notional,
            },
        );
        OrderIntent {
            account_id: self.account_id,
            instrument: Instrument {
                symbol: self.symbol,
                instrument_type: self.instrument_type,
                con_id: None,
                exchange: self.exchange,
                currency: self.currency,
            },
            side: self.side,
            order_type: self.order_type,
            quantity: self.quantity,
            limit_price: self.limit_price,
            stop_price: self.stop_price,
            time_in_force: self.time_in_force,
            reason: self.reason,
            strategy_tag: self.strategy_tag,
            constraints,
        }
        .validate()
    }
}

/// Outcome of the request-approval pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct ProposalOutcome {
    /// Stored proposal id.
    pub proposal_id: Uuid,
    /// Correlation id of the flow.
    pub correlation_id: String,
    /// State after the pipeline ran.
    pub state: OrderState,
    /// The risk decision.
    pub risk_decision: RiskDecision,
    /// The simulation result.
    pub simulation: SimulationResult,
}

/// Component health snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Overall status: `healthy` or `degraded`.
    pub status: String,
    /// Broker reachability.
    pub broker: bool,
    /// Audit event count.
    pub audit_events: usize,
    /// Kill switch state.
    pub kill_switch_enabled: bool,
    /// Pending approvals.
    pub pending_approvals: usize,
}

/// The component aggregate.
pub struct Core {
    /// Runtime settings.
    pub settings: Settings,
    /// Append-only audit log.
    pub audit: Arc<AuditLog>,
    /// Emergency halt.
    pub kill_switch: Arc<KillSwitch>,
    /// Broker connection.
    pub broker: Arc<dyn BrokerAdapter>,
    /// Market data cache.
    pub cache: Arc<MarketDataCache>,
    /// Pre-trade simulator.
    pub simulator: TradeSimulator,
    /// Reloadable risk policy.
    pub policy: Arc<PolicyStore>,
    /// Risk gate.
    pub risk: Arc<RiskEngine>,
    /// Proposal and token owner.
    pub approvals: Arc<ApprovalService>,
    /// Token-validated submitter.
    pub submitter: Arc<OrderSubmitter>,
    /// Cancel/modify service.
    pub mutations: Arc<MutationService>,
    /// Tool-exposure layer.
    pub gateway: Arc<ToolGateway>,
    /// Auto-approval policy, when the flag is on.
    pub auto_policy: Option<AutoApprovalPolicy>,
}

impl Core {
    /// Build a `Core` choosing the broker from the environment: the mock in
    /// `dev`, the HTTP gateway in `paper` and `live`.
    ///
    /// # Errors
    ///
    /// Propagates init failures (unreadable storage, malformed policy);
    /// these are fatal and map to a non-zero exit in `main`.
    pub fn build(settings: Settings) -> Result<Arc<Self>, GateError> {
        let broker: Arc<dyn BrokerAdapter> = match settings.environment {
            Environment::Dev => Arc::new(MockBroker::new(7)),
            Environment::Paper | Environment::Live => Arc::new(GatewayBroker::new(
                settings.broker_base_url(),
                settings.broker_client_id,
                settings.flags.read_only,
            )),
        };
        Self::with_broker(settings, broker)
    }

    /// Build a `Core` over an explicit broker adapter.
    ///
    /// # Errors
    ///
    /// Propagates init failures.
    pub fn with_broker(
        settings: Settings,
        broker: Arc<dyn BrokerAdapter>,
    ) -> Result<Arc<Self>, GateError> {
        let audit = Arc::new(AuditLog::open(settings.data_dir.join("audit_events.jsonl"))?);
        let kill_switch = Arc::new(KillSwitch::open(
            settings.data_dir.join("kill_switch.json"),
            Arc::clone(&audit),
        )?);
        let policy = Arc::new(PolicyStore::load(&settings.risk_policy_path)?);
        let risk = Arc::new(RiskEngine::new(
            Arc::clone(&policy),
            Arc::clone(&kill_switch),
        ));
        let approvals = Arc::new(ApprovalService::new(Arc::clone(&audit)));
        let submitter = Arc::new(OrderSubmitter::new(
            Arc::clone(&broker),
            Arc::clone(&approvals),
            Arc::clone(&audit),
            Arc::clone(&kill_switch),
        ));
        let mutations = Arc::new(MutationService::new(
            Arc::clone(&broker),
            Arc::clone(&audit),
            Arc::clone(&kill_switch),
        ));
        let gateway = Arc::new(ToolGateway::new(
            RateLimitConfig {
                per_tool_per_minute: settings.rate_limit_per_tool,
                per_session_per_minute: settings.rate_limit_per_session,
                global_per_minute: settings.rate_limit_global,
                ..RateLimitConfig::default()
            },
            settings.flags.strict_validation,
            Arc::clone(&audit),
        ));
        let auto_policy = settings
            .flags
            .auto_approval
            .then(AutoApprovalPolicy::default);

        Ok(Arc::new(Self {
            settings,
            audit,
            kill_switch,
            broker,
            cache: Arc::new(MarketDataCache::default()),
            simulator: TradeSimulator::default(),
            policy,
            risk,
            approvals,
            submitter,
            mutations,
            gateway,
            auto_policy,
        }))
    }

    /// Fetch a market snapshot, consulting the cache unless bypassed.
    ///
    /// # Errors
    ///
    /// Broker errors map into the gate taxonomy.
    pub async fn market_snapshot(
        &self,
        instrument: &Instrument,
        bypass_cache: bool,
    ) -> Result<MarketSnapshot, GateError> {
        if !bypass_cache
            && let Some(cached) = self.cache.get_snapshot(&instrument.symbol)
        {
            return Ok(cached);
        }
        let snapshot = self.broker.get_market_snapshot(instrument).await?;
        self.cache.put_snapshot(snapshot.clone());
        self.audit.record(
            EventType::MarketSnapshotTaken,
            "",
            serde_json::json!({"symbol": instrument.symbol, "bid": snapshot.bid, "ask": snapshot.ask}),
        )?;
        Ok(snapshot)
    }

    /// Fetch the portfolio, recording the snapshot event.
    ///
    /// # Errors
    ///
    /// Broker errors map into the gate taxonomy.
    pub async fn portfolio(&self, account_id: &str) -> Result<Portfolio, GateError> {
        let portfolio = self.broker.get_portfolio(account_id).await?;
        self.audit.record(
            EventType::PortfolioSnapshotTaken,
            "",
            serde_json::json!({
                "account_id": account_id,
                "total_value": portfolio.total_value,
                "positions": portfolio.positions.len(),
            }),
        )?;
        Ok(portfolio)
    }

    /// Validate an intent and record `ORDER_PROPOSED`.
    ///
    /// # Errors
    ///
    /// Validation errors; audit failures.
    pub fn propose(
        &self,
        request: FlatOrderRequest,
        correlation_id: &str,
    ) -> Result<OrderIntent, GateError> {
        let intent = request.into_intent()?;
        self.audit.record(
            EventType::OrderProposed,
            correlation_id,
            serde_json::json!({
                "symbol": intent.instrument.symbol,
                "side": intent.side,
                "quantity": intent.quantity,
                "order_type": intent.order_type,
                "intent_hash": intent.intent_hash(),
            }),
        )?;
        Ok(intent)
    }

    /// Simulate against an explicit market price (both sides of the book at
    /// the given price), so the result does not depend on cache state.
    ///
    /// # Errors
    ///
    /// Broker errors fetching the portfolio; audit failures.
    pub async fn simulate_with_price(
        &self,
        intent: &OrderIntent,
        market_price: Decimal,
        correlation_id: &str,
    ) -> Result<SimulationResult, GateError> {
        let portfolio = self.broker.get_portfolio(&intent.account_id).await?;
        let snapshot = synthetic_snapshot(&intent.instrument, market_price);
        let result = self.simulator.simulate(&portfolio, Some(&snapshot), intent);
        self.record_simulated(intent, &result, correlation_id)?;
        Ok(result)
    }

    fn record_simulated(
        &self,
        intent: &OrderIntent,
        result: &SimulationResult,
        correlation_id: &str,
    ) -> Result<(), GateError> {
        self.audit.record(
            EventType::OrderSimulated,
            correlation_id,
            serde_json::json!({
                "symbol": intent.instrument.symbol,
                "status": result.status,
                "gross_notional": result.gross_notional,
                "net_notional": result.net_notional,
            }),
        )?;
        Ok(())
    }

    /// Evaluate risk against a caller-supplied portfolio value.
    ///
    /// # Errors
    ///
    /// Audit failures.
    pub fn evaluate_risk_standalone(
        &self,
        intent: &OrderIntent,
        simulation: &SimulationResult,
        portfolio_value: Decimal,
        correlation_id: &str,
    ) -> Result<RiskDecision, GateError> {
        let portfolio = Portfolio {
            account_id: intent.account_id.clone(),
            positions: Vec::new(),
            cash: Vec::new(),
            total_value: portfolio_value,
            timestamp: Utc::now(),
        };
        let decision = self
            .risk
            .evaluate(intent, &portfolio, simulation, None, Utc::now(), None);
        self.record_evaluated(&decision, correlation_id)?;
        Ok(decision)
    }

    fn record_evaluated(
        &self,
        decision: &RiskDecision,
        correlation_id: &str,
    ) -> Result<(), GateError> {
        self.audit.record(
            EventType::RiskGateEvaluated,
            correlation_id,
            serde_json::json!({
                "decision": decision.decision,
                "violated_rules": decision.violated_rules,
                "reason": decision.reason,
            }),
        )?;
        Ok(())
    }

    /// Store a proposal built from caller-supplied simulation and decision.
    /// Rejected decisions are stored in their terminal state and surfaced as
    /// a policy error.
    ///
    /// # Errors
    ///
    /// `RISK_REJECTED` when the decision is a rejection; store errors.
    pub fn create_proposal(
        &self,
        intent: OrderIntent,
        simulation: SimulationResult,
        decision: RiskDecision,
        correlation_id: &str,
    ) -> Result<OrderProposal, GateError> {
        let now = Utc::now();
        let proposal = OrderProposal::new(intent, correlation_id.to_string(), now)
            .with_simulation(simulation, now)?
            .with_risk_decision(decision.clone(), now)?;
        self.approvals.store(proposal.clone())?;

        if proposal.state == OrderState::RiskRejected {
            return Err(GateError::risk_rejected(
                decision.reason,
                &decision.violated_rules,
            )
            .with_context("proposal_id", proposal.proposal_id.to_string()));
        }
        Ok(proposal)
    }

    /// The full gated pipeline: validate, simulate off live market data,
    /// risk-evaluate, store, and move to the approval stage (auto-approval
    /// permitting). Returns the proposal id - never a token.
    ///
    /// # Errors
    ///
    /// Validation, broker, policy, and store errors.
    pub async fn request_approval_pipeline(
        &self,
        request: FlatOrderRequest,
        correlation_id: &str,
    ) -> Result<ProposalOutcome, GateError> {
        let intent = self.propose(request, correlation_id)?;
        let portfolio = self.portfolio(&intent.account_id).await?;
        let snapshot = self.market_snapshot(&intent.instrument, false).await?;

        let simulation = self
            .simulator
            .simulate(&portfolio, Some(&snapshot), &intent);
        self.record_simulated(&intent, &simulation, correlation_id)?;

        let decision = self.risk.evaluate(
            &intent,
            &portfolio,
            &simulation,
            Some(&snapshot),
            Utc::now(),
            None,
        );
        self.record_evaluated(&decision, correlation_id)?;

        let proposal =
            self.create_proposal(intent, simulation.clone(), decision.clone(), correlation_id)?;

        let nav = Some(portfolio.total_value);
        let ctx = AutoApprovalContext {
            flags: &self.settings.flags,
            kill_switch: &self.kill_switch,
            policy: self.auto_policy.as_ref(),
            portfolio_nav: nav,
        };
        let (proposal, _token) = self
            .approvals
            .request(proposal.proposal_id, Some(&ctx), Utc::now())?;

        Ok(ProposalOutcome {
            proposal_id: proposal.proposal_id,
            correlation_id: correlation_id.to_string(),
            state: proposal.state,
            risk_decision: decision,
            simulation,
        })
    }

    /// Component health.
    pub async fn health(&self) -> HealthReport {
        let broker_ok = self.broker.health_check().await.is_ok();
        let kill = self.kill_switch.is_enabled();
        HealthReport {
            status: if broker_ok && !kill {
                "healthy".to_string()
            } else {
                "degraded".to_string()
            },
            broker: broker_ok,
            audit_events: self.audit.len(),
            kill_switch_enabled: kill,
            pending_approvals: self.approvals.pending(usize::MAX).len(),
        }
    }

    /// Run a tool call through the gateway: authorize, dispatch under the
    /// per-call ceiling, redact.
    ///
    /// # Errors
    ///
    /// Gateway denials (`TOOL_DENIED`, `VALIDATION_FAILED`, `RATE_LIMITED`,
    /// `BREAKER_OPEN`), `TOOL_TIMEOUT` at the 30 second ceiling, and
    /// downstream errors from the dispatched operation.
    pub async fn run_tool(
        &self,
        tool_name: &str,
        session_id: &str,
        params: serde_json::Map<String, serde_json::Value>,
        correlation_id: &str,
    ) -> Result<serde_json::Value, GateError> {
        const TOOL_CALL_CEILING: std::time::Duration = std::time::Duration::from_secs(30);

        self.gateway
            .authorize(tool_name, session_id, &params, correlation_id)?;
        let output = tokio::time::timeout(
            TOOL_CALL_CEILING,
            self.dispatch_tool(tool_name, params, correlation_id),
        )
        .await
        .map_err(|_| {
            GateError::resource(
                "TOOL_TIMEOUT",
                format!("tool {tool_name} exceeded the {}s ceiling", TOOL_CALL_CEILING.as_secs()),
            )
        })??;
        Ok(self.gateway.redact(output))
    }

    #[allow(clippy::too_many_lines)]
    async fn dispatch_tool(
        &self,
        tool_name: &str,
        params: serde_json::Map<String, serde_json::Value>,
        correlation_id: &str,
    ) -> Result<serde_json::Value, GateError> {
        let value = serde_json::Value::Object(params.clone());
        let str_param = |name: &str| -> Option<String> {
            params.get(name).and_then(|v| v.as_str()).map(String::from)
        };

        match tool_name {
            "get_portfolio" => {
                let account = str_param("account_id").unwrap_or_default();
                let portfolio = self.portfolio(&account).await?;
                to_json(&portfolio)
            }
            "get_positions" => {
                let account = str_param("account_id").unwrap_or_default();
                let positions = self.broker.get_positions(&account).await?;
                to_json(&positions)
            }
            "get_cash" => {
                let account = str_param("account_id").unwrap_or_default();
                let cash = self.broker.get_cash(&account).await?;
                to_json(&cash)
            }
            "get_open_orders" => {
                let account = str_param("account_id").unwrap_or_default();
                let orders = self.broker.get_open_orders(&account).await?;
                to_json(&orders)
            }
            "get_market_snapshot" => {
                let symbol = str_param("symbol").unwrap_or_default();
                let snapshot = self
                    .market_snapshot(&Instrument::stock(&symbol), false)
                    .await?;
                to_json(&snapshot)
            }
            "get_market_bars" => {
                let symbol = str_param("symbol").unwrap_or_default();
                let timeframe = str_param("timeframe").unwrap_or_else(|| "1d".to_string());
                let limit = params
                    .get("limit")
                    .and_then(serde_json::Value::as_u64)
                    .map_or(100, |l| usize::try_from(l).unwrap_or(100));
                let instrument = Instrument::stock(&symbol);
                let bars = if let Some(cached) = self.cache.get_bars(&symbol, &timeframe) {
                    cached
                } else {
                    let bars = self
                        .broker
                        .get_market_bars(&instrument, &timeframe, limit)
                        .await?;
                    self.cache.put_bars(&symbol, &timeframe, bars.clone());
                    bars
                };
                to_json(&bars)
            }
            "instrument_search" => {
                let query = str_param("q").unwrap_or_default();
                let instrument_type = params
                    .get("type")
                    .cloned()
                    .map(serde_json::from_value)
                    .transpose()
                    .map_err(|e| GateError::validation("BAD_FILTERS", e.to_string()))?;
                let filters = SearchFilters {
                    instrument_type,
                    exchange: str_param("exchange"),
                    currency: str_param("currency"),
                    limit: params
                        .get("limit")
                        .and_then(serde_json::Value::as_u64)
                        .map_or(20, |l| usize::try_from(l).unwrap_or(20)),
                };
                let candidates = self.broker.instrument_search(&query, &filters).await?;
                to_json(&candidates)
            }
            "instrument_resolve" => {
                let hint: InstrumentHint = serde_json::from_value(value)
                    .map_err(|e| GateError::validation("BAD_HINT", e.to_string()))?;
                let instrument = self.broker.instrument_resolve(&hint).await?;
                to_json(&instrument)
            }
            "simulate_order" => {
                let request: FlatOrderRequest = serde_json::from_value(value)
                    .map_err(|e| GateError::validation("BAD_ORDER", e.to_string()))?;
                let intent = request.into_intent()?;
                let portfolio = self.broker.get_portfolio(&intent.account_id).await?;
                let snapshot = self.market_snapshot(&intent.instrument, false).await?;
                let result = self.simulator.simulate(&portfolio, Some(&snapshot), &intent);
                self.record_simulated(&intent, &result, correlation_id)?;
                to_json(&result)
            }
            "evaluate_risk" => {
                let request: FlatOrderRequest = serde_json::from_value(value)
                    .map_err(|e| GateError::validation("BAD_ORDER", e.to_string()))?;
                let intent = request.into_intent()?;
                let portfolio = self.broker.get_portfolio(&intent.account_id).await?;
                let snapshot = self.market_snapshot(&intent.instrument, false).await?;
                let simulation = self.simulator.simulate(&portfolio, Some(&snapshot), &intent);
                let decision = self.risk.evaluate(
                    &intent,
                    &portfolio,
                    &simulation,
                    Some(&snapshot),
                    Utc::now(),
                    None,
                );
                self.record_evaluated(&decision, correlation_id)?;
                to_json(&decision)
            }
            "request_approval" => {
                let request: FlatOrderRequest = serde_json::from_value(value)
                    .map_err(|e| GateError::validation("BAD_ORDER", e.to_string()))?;
                let outcome = self
                    .request_approval_pipeline(request, correlation_id)
                    .await?;
                // proposal_id only; a token never crosses the tool surface.
                Ok(serde_json::json!({
                    "proposal_id": outcome.proposal_id,
                    "state": outcome.state,
                    "risk_decision": outcome.risk_decision.decision,
                    "risk_reason": outcome.risk_decision.reason,
                }))
            }
            "request_order_cancel" => {
                let broker_order_id = str_param("broker_order_id").unwrap_or_default();
                let reason = str_param("reason").unwrap_or_default();
                let request =
                    self.mutations
                        .request_cancel(&broker_order_id, &reason, correlation_id)?;
                Ok(serde_json::json!({
                    "request_id": request.request_id,
                    "state": request.state,
                }))
            }
            "request_order_modify" => {
                let broker_order_id = str_param("broker_order_id").unwrap_or_default();
                let reason = str_param("reason").unwrap_or_default();
                let new_params: ModifyParams = serde_json::from_value(serde_json::json!({
                    "quantity": params.get("quantity"),
                    "limit_price": params.get("limit_price"),
                    "stop_price": params.get("stop_price"),
                    "time_in_force": params.get("time_in_force"),
                }))
                .map_err(|e| GateError::validation("BAD_PARAMS", e.to_string()))?;
                let request = self.mutations.request_modify(
                    &broker_order_id,
                    new_params,
                    &reason,
                    correlation_id,
                )?;
                Ok(serde_json::json!({
                    "request_id": request.request_id,
                    "state": request.state,
                }))
            }
            other => Err(GateError::gateway_denied(
                "TOOL_DENIED",
                format!("tool {other} is not dispatchable"),
            )),
        }
    }
}

/// A synthetic snapshot quoting both sides of the book at one price; used
/// when the caller supplies an explicit market price.
fn synthetic_snapshot(instrument: &Instrument, price: Decimal) -> MarketSnapshot {
    MarketSnapshot {
        instrument: instrument.clone(),
        bid: price,
        ask: price,
        last: price,
        open: price,
        high: price,
        low: price,
        prev_close: price,
        volume: 0,
        timestamp: Utc::now(),
    }
}

/// Serialize a dispatch result to JSON.
fn to_json<T: Serialize>(value: &T) -> Result<serde_json::Value, GateError> {
    serde_json::to_value(value)
        .map_err(|e| GateError::internal(format!("serialization failed: {e}")))
}
