//! The approval service: proposal lifecycle and single-use tokens.
//!
//! Structural mutation of the proposal map is guarded by one lock; token
//! consumption is atomic against all other consume/validate calls on the
//! same token. Every state transition appends an audit event under the
//! proposal's correlation id.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::audit::{AuditLog, EventType};
use crate::config::FeatureFlags;
use crate::error::GateError;
use crate::models::{ApprovalToken, OrderProposal, OrderState, PendingProposal};
use crate::safety::KillSwitch;

use super::auto::{AutoApprovalPolicy, PolicyChecker};

const DEFAULT_CAPACITY: usize = 1000;
const DEFAULT_TOKEN_TTL_MINUTES: i64 = 5;

/// Inputs the `request` step needs to decide on auto-approval.
pub struct AutoApprovalContext<'a> {
    /// Feature flags (auto-approval switch and notional threshold).
    pub flags: &'a FeatureFlags,
    /// Kill switch; auto-approval is blocked while enabled.
    pub kill_switch: &'a KillSwitch,
    /// The allowlist policy; `None` means only the notional threshold applies.
    pub policy: Option<&'a AutoApprovalPolicy>,
    /// Portfolio NAV for the position-size ceiling.
    pub portfolio_nav: Option<Decimal>,
}

/// Approval service owning proposals and tokens.
pub struct ApprovalService {
    proposals: Mutex<HashMap<Uuid, OrderProposal>>,
    tokens: Mutex<HashMap<Uuid, ApprovalToken>>,
    // Serializes state transitions: no two transitions are in flight for
    // the same store, and between transitions a proposal is immutable.
    transitions: Mutex<()>,
    capacity: usize,
    token_ttl: chrono::Duration,
    audit: Arc<AuditLog>,
}

impl ApprovalService {
    /// Create a service with default capacity (1000) and token TTL (5 min).
    #[must_use]
    pub fn new(audit: Arc<AuditLog>) -> Self {
        Self {
            proposals: Mutex::new(HashMap::new()),
            tokens: Mutex::new(HashMap::new()),
            transitions: Mutex::new(()),
            capacity: DEFAULT_CAPACITY,
            token_ttl: chrono::Duration::minutes(DEFAULT_TOKEN_TTL_MINUTES),
            audit,
        }
    }

    /// Override the proposal capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Override the token TTL.
    #[must_use]
    pub fn with_token_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.token_ttl = ttl;
        self
    }

    /// Insert a new proposal.
    ///
    /// When the store is at capacity the oldest terminal proposal is
    /// evicted; non-terminal proposals are never evicted, and when nothing
    /// is evictable the insertion is rejected.
    ///
    /// # Errors
    ///
    /// `STORE_FULL` when at capacity with no terminal proposal to drop;
    /// audit failures propagate.
    pub fn store(&self, proposal: OrderProposal) -> Result<(), GateError> {
        {
            let mut proposals = self.proposals.lock();
            if proposals.len() >= self.capacity {
                let evictable = proposals
                    .values()
                    .filter(|p| p.state.is_terminal())
                    .min_by_key(|p| p.updated_at)
                    .map(|p| p.proposal_id);
                match evictable {
                    Some(id) => {
                        proposals.remove(&id);
                        tracing::debug!(proposal_id = %id, "evicted terminal proposal");
                    }
                    None => return Err(GateError::store_full()),
                }
            }
            proposals.insert(proposal.proposal_id, proposal.clone());
        }
        self.audit.record(
            EventType::ProposalCreated,
            &proposal.correlation_id,
            serde_json::json!({
                "proposal_id": proposal.proposal_id,
                "state": proposal.state,
                "symbol": proposal.intent.instrument.symbol,
                "intent_hash": proposal.intent_hash,
            }),
        )?;
        Ok(())
    }

    /// Look up a proposal.
    #[must_use]
    pub fn get(&self, proposal_id: Uuid) -> Option<OrderProposal> {
        self.proposals.lock().get(&proposal_id).cloned()
    }

    /// Look up a token.
    #[must_use]
    pub fn get_token(&self, token_id: Uuid) -> Option<ApprovalToken> {
        self.tokens.lock().get(&token_id).cloned()
    }

    /// Replace a stored proposal with a successor value.
    ///
    /// # Errors
    ///
    /// Not-found when the proposal is unknown.
    pub fn update(&self, proposal: OrderProposal) -> Result<(), GateError> {
        let mut proposals = self.proposals.lock();
        if !proposals.contains_key(&proposal.proposal_id) {
            return Err(GateError::not_found(
                "proposal",
                &proposal.proposal_id.to_string(),
            ));
        }
        proposals.insert(proposal.proposal_id, proposal);
        Ok(())
    }

    /// Move `RISK_APPROVED` → `APPROVAL_REQUESTED`, or auto-approve.
    ///
    /// When an [`AutoApprovalContext`] is supplied and every condition holds
    /// (flag on, kill switch off, notional at or under the threshold, policy
    /// conjunction passes), the proposal skips `APPROVAL_REQUESTED` and
    /// moves straight to `APPROVAL_GRANTED` with a generated token.
    ///
    /// # Errors
    ///
    /// Not-found or state errors; audit failures propagate.
    pub fn request(
        &self,
        proposal_id: Uuid,
        auto: Option<&AutoApprovalContext<'_>>,
        now: DateTime<Utc>,
    ) -> Result<(OrderProposal, Option<ApprovalToken>), GateError> {
        let _transition = self.transitions.lock();
        let proposal = self
            .get(proposal_id)
            .ok_or_else(|| GateError::not_found("proposal", &proposal_id.to_string()))?;

        if proposal.state != OrderState::RiskApproved {
            return Err(GateError::state(format!(
                "cannot request approval in state {}, must be RISK_APPROVED",
                proposal.state
            )));
        }

        if let Some(ctx) = auto
            && let Some(reason_granted) = self.auto_approval_reason(&proposal, ctx, now)
        {
            let token = ApprovalToken::issue(&proposal, self.token_ttl, now);
            let mut granted = proposal.with_state(OrderState::ApprovalGranted, now)?;
            granted.granted_token_id = Some(token.token_id);
            granted.approval_reason = Some(reason_granted.clone());
            self.tokens.lock().insert(token.token_id, token.clone());
            self.update(granted.clone())?;
            self.audit.record(
                EventType::AutoApprovalGranted,
                &granted.correlation_id,
                serde_json::json!({
                    "proposal_id": granted.proposal_id,
                    "token_id": token.token_id,
                    "expires_at": token.expires_at,
                    "reason": reason_granted,
                }),
            )?;
            return Ok((granted, Some(token)));
        }

        let requested = proposal.with_state(OrderState::ApprovalRequested, now)?;
        self.update(requested.clone())?;
        self.audit.record(
            EventType::ApprovalRequested,
            &requested.correlation_id,
            serde_json::json!({"proposal_id": requested.proposal_id}),
        )?;
        Ok((requested, None))
    }

    /// Returns the grant reason when auto-approval applies, `None` when
    /// manual approval is required.
    fn auto_approval_reason(
        &self,
        proposal: &OrderProposal,
        ctx: &AutoApprovalContext<'_>,
        now: DateTime<Utc>,
    ) -> Option<String> {
        if !ctx.flags.auto_approval || ctx.kill_switch.is_enabled() {
            return None;
        }
        let notional = proposal.gross_notional()?;
        // Boundary is inclusive: exactly at the threshold auto-approves.
        if notional > ctx.flags.auto_approval_max_notional {
            return None;
        }
        if let Some(policy) = ctx.policy {
            let reasons = PolicyChecker::new(policy).check_all(
                &proposal.intent,
                notional,
                now,
                ctx.portfolio_nav,
            );
            if !reasons.is_empty() {
                tracing::debug!(
                    proposal_id = %proposal.proposal_id,
                    reasons = ?reasons,
                    "auto-approval policy refused, falling back to manual"
                );
                return None;
            }
            return Some("auto-approved (below threshold, policy passed)".to_string());
        }
        Some("auto-approved (below threshold)".to_string())
    }

    /// Grant approval: `APPROVAL_REQUESTED` → `APPROVAL_GRANTED`, issuing a
    /// token bound to the proposal's intent hash.
    ///
    /// # Errors
    ///
    /// Not-found or state errors; audit failures propagate.
    pub fn grant(
        &self,
        proposal_id: Uuid,
        reason: Option<&str>,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<(OrderProposal, ApprovalToken), GateError> {
        let _transition = self.transitions.lock();
        let proposal = self
            .get(proposal_id)
            .ok_or_else(|| GateError::not_found("proposal", &proposal_id.to_string()))?;

        if proposal.state != OrderState::ApprovalRequested {
            return Err(GateError::state(format!(
                "cannot grant approval in state {}, must be APPROVAL_REQUESTED",
                proposal.state
            )));
        }

        let token = ApprovalToken::issue(&proposal, self.token_ttl, now);
        let mut granted = proposal.with_state(OrderState::ApprovalGranted, now)?;
        granted.granted_token_id = Some(token.token_id);
        granted.approval_reason = reason.map(String::from);
        self.tokens.lock().insert(token.token_id, token.clone());
        self.update(granted.clone())?;

        self.audit.record(
            EventType::ApprovalGranted,
            &granted.correlation_id,
            serde_json::json!({
                "proposal_id": granted.proposal_id,
                "token_id": token.token_id,
                "expires_at": token.expires_at,
                "reason": reason,
                "actor": actor,
            }),
        )?;
        Ok((granted, token))
    }

    /// Deny approval: `APPROVAL_REQUESTED` → `APPROVAL_DENIED`. The reason
    /// is required.
    ///
    /// # Errors
    ///
    /// Validation error on an empty reason; not-found or state errors.
    pub fn deny(
        &self,
        proposal_id: Uuid,
        reason: &str,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<OrderProposal, GateError> {
        if reason.trim().is_empty() {
            return Err(GateError::validation(
                "MISSING_REASON",
                "a denial reason is required",
            ));
        }
        let _transition = self.transitions.lock();
        let proposal = self
            .get(proposal_id)
            .ok_or_else(|| GateError::not_found("proposal", &proposal_id.to_string()))?;

        if proposal.state != OrderState::ApprovalRequested {
            return Err(GateError::state(format!(
                "cannot deny approval in state {}, must be APPROVAL_REQUESTED",
                proposal.state
            )));
        }

        let mut denied = proposal.with_state(OrderState::ApprovalDenied, now)?;
        denied.approval_reason = Some(reason.to_string());
        self.update(denied.clone())?;

        self.audit.record(
            EventType::ApprovalDenied,
            &denied.correlation_id,
            serde_json::json!({
                "proposal_id": denied.proposal_id,
                "reason": reason,
                "actor": actor,
            }),
        )?;
        Ok(denied)
    }

    /// Validate a token: exists, unused, unexpired, hash matches.
    #[must_use]
    pub fn validate_token(&self, token_id: Uuid, intent_hash: &str, now: DateTime<Utc>) -> bool {
        self.tokens
            .lock()
            .get(&token_id)
            .is_some_and(|t| t.is_valid(now) && t.intent_hash == intent_hash)
    }

    /// Atomically consume a token.
    ///
    /// # Errors
    ///
    /// Not-found, `TOKEN_ALREADY_CONSUMED`, or `TOKEN_EXPIRED`. A second
    /// consume fails with the same error as the first.
    pub fn consume_token(
        &self,
        token_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<ApprovalToken, GateError> {
        let mut tokens = self.tokens.lock();
        let token = tokens
            .get(&token_id)
            .ok_or_else(|| GateError::not_found("token", &token_id.to_string()))?;
        let consumed = token.consume(now)?;
        tokens.insert(token_id, consumed.clone());
        Ok(consumed)
    }

    /// Proposals awaiting approval (`RISK_APPROVED` and
    /// `APPROVAL_REQUESTED`), newest first.
    #[must_use]
    pub fn pending(&self, limit: usize) -> Vec<PendingProposal> {
        let proposals = self.proposals.lock();
        let mut pending: Vec<&OrderProposal> = proposals
            .values()
            .filter(|p| {
                matches!(
                    p.state,
                    OrderState::RiskApproved | OrderState::ApprovalRequested
                )
            })
            .collect();
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        pending
            .into_iter()
            .take(limit)
            .map(OrderProposal::to_pending)
            .collect()
    }

    /// Number of stored proposals.
    #[must_use]
    pub fn len(&self) -> usize {
        self.proposals.lock().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Instrument, OrderIntent, OrderSide, OrderType, TimeInForce};
    use crate::risk::{Decision, RiskDecision};
    use crate::sim::{SimulationResult, SimulationStatus};
    use rust_decimal_macros::dec;

    fn make_service(dir: &tempfile::TempDir) -> (Arc<AuditLog>, ApprovalService) {
        let audit = Arc::new(AuditLog::open(dir.path().join("audit.jsonl")).unwrap());
        (Arc::clone(&audit), ApprovalService::new(audit))
    }

    fn make_kill_switch(dir: &tempfile::TempDir, audit: Arc<AuditLog>) -> KillSwitch {
        KillSwitch::open(dir.path().join("kill_switch.json"), audit).unwrap()
    }

    fn make_intent(notional_per_share: Decimal) -> OrderIntent {
        OrderIntent {
            account_id: "DU123456".to_string(),
            instrument: Instrument::etf("SPY"),
            side: OrderSide::Buy,
            order_type: OrderType::Lmt,
            quantity: dec!(1),
            limit_price: Some(notional_per_share),
            stop_price: None,
            time_in_force: TimeInForce::Day,
            reason: "Scheduled contribution to index position".to_string(),
            strategy_tag: "dca_weekly_v1".to_string(),
            constraints: None,
        }
    }

    fn approved_decision() -> RiskDecision {
        RiskDecision {
            decision: Decision::Approve,
            reason: "all risk checks passed".to_string(),
            violated_rules: vec![],
            warnings: vec![],
            metrics: std::collections::HashMap::new(),
            halt_requested: false,
        }
    }

    fn simulated(gross: Decimal) -> SimulationResult {
        SimulationResult {
            gross_notional: Some(gross),
            net_notional: Some(gross),
            ..SimulationResult::failed(SimulationStatus::Success, "")
        }
    }

    /// A proposal stored in RISK_APPROVED with the given gross notional.
    fn store_risk_approved(service: &ApprovalService, gross: Decimal) -> OrderProposal {
        let now = Utc::now();
        let proposal = OrderProposal::new(make_intent(gross), "corr-1".to_string(), now);
        let proposal = proposal
            .with_simulation(
                SimulationResult {
                    error_message: None,
                    status: SimulationStatus::Success,
                    ..simulated(gross)
                },
                now,
            )
            .unwrap();
        let proposal = proposal.with_risk_decision(approved_decision(), now).unwrap();
        service.store(proposal.clone()).unwrap();
        proposal
    }

    #[test]
    fn request_then_grant_issues_bound_token() {
        let dir = tempfile::tempdir().unwrap();
        let (_audit, service) = make_service(&dir);
        let proposal = store_risk_approved(&service, dec!(900));
        let now = Utc::now();

        let (requested, token) = service.request(proposal.proposal_id, None, now).unwrap();
        assert_eq!(requested.state, OrderState::ApprovalRequested);
        assert!(token.is_none());

        let (granted, token) = service
            .grant(proposal.proposal_id, Some("looks fine"), "admin", now)
            .unwrap();
        assert_eq!(granted.state, OrderState::ApprovalGranted);
        assert_eq!(granted.granted_token_id, Some(token.token_id));
        assert_eq!(token.intent_hash, proposal.intent_hash);
        assert!(service.validate_token(token.token_id, &proposal.intent_hash, now));
    }

    #[test]
    fn request_requires_risk_approved_state() {
        let dir = tempfile::tempdir().unwrap();
        let (_audit, service) = make_service(&dir);
        let proposal = OrderProposal::new(make_intent(dec!(900)), "corr-1".to_string(), Utc::now());
        service.store(proposal.clone()).unwrap();

        let err = service
            .request(proposal.proposal_id, None, Utc::now())
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
    }

    #[test]
    fn deny_requires_reason() {
        let dir = tempfile::tempdir().unwrap();
        let (_audit, service) = make_service(&dir);
        let proposal = store_risk_approved(&service, dec!(900));
        let now = Utc::now();
        service.request(proposal.proposal_id, None, now).unwrap();

        let err = service
            .deny(proposal.proposal_id, "  ", "admin", now)
            .unwrap_err();
        assert_eq!(err.code(), "MISSING_REASON");

        let denied = service
            .deny(proposal.proposal_id, "too risky today", "admin", now)
            .unwrap();
        assert_eq!(denied.state, OrderState::ApprovalDenied);
    }

    #[test]
    fn token_consume_is_atomic_and_single_use() {
        let dir = tempfile::tempdir().unwrap();
        let (_audit, service) = make_service(&dir);
        let proposal = store_risk_approved(&service, dec!(900));
        let now = Utc::now();
        service.request(proposal.proposal_id, None, now).unwrap();
        let (_granted, token) = service.grant(proposal.proposal_id, None, "admin", now).unwrap();

        let consumed = service.consume_token(token.token_id, now).unwrap();
        assert!(consumed.used_at.is_some());

        let err = service.consume_token(token.token_id, now).unwrap_err();
        assert_eq!(err.code(), "TOKEN_ALREADY_CONSUMED");
        assert!(!service.validate_token(token.token_id, &proposal.intent_hash, now));
    }

    #[test]
    fn validate_token_checks_hash_binding() {
        let dir = tempfile::tempdir().unwrap();
        let (_audit, service) = make_service(&dir);
        let proposal = store_risk_approved(&service, dec!(900));
        let now = Utc::now();
        service.request(proposal.proposal_id, None, now).unwrap();
        let (_granted, token) = service.grant(proposal.proposal_id, None, "admin", now).unwrap();

        assert!(service.validate_token(token.token_id, &proposal.intent_hash, now));
        assert!(!service.validate_token(token.token_id, "tampered-hash", now));
    }

    #[test]
    fn auto_approval_at_threshold_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let (audit, service) = make_service(&dir);
        let kill_switch = make_kill_switch(&dir, Arc::clone(&audit));
        let flags = FeatureFlags {
            auto_approval: true,
            auto_approval_max_notional: dec!(1000),
            ..FeatureFlags::default()
        };

        // Exactly at the threshold: auto-approved.
        let at = store_risk_approved(&service, dec!(1000));
        let ctx = AutoApprovalContext {
            flags: &flags,
            kill_switch: &kill_switch,
            policy: None,
            portfolio_nav: None,
        };
        let (granted, token) = service
            .request(at.proposal_id, Some(&ctx), Utc::now())
            .unwrap();
        assert_eq!(granted.state, OrderState::ApprovalGranted);
        assert!(token.is_some());

        // One cent above: manual approval.
        let over = store_risk_approved(&service, dec!(1000.01));
        let (requested, token) = service
            .request(over.proposal_id, Some(&ctx), Utc::now())
            .unwrap();
        assert_eq!(requested.state, OrderState::ApprovalRequested);
        assert!(token.is_none());
    }

    #[test]
    fn kill_switch_blocks_auto_approval() {
        let dir = tempfile::tempdir().unwrap();
        let (audit, service) = make_service(&dir);
        let kill_switch = make_kill_switch(&dir, Arc::clone(&audit));
        kill_switch.activate("halt for audit", "ops").unwrap();
        let flags = FeatureFlags {
            auto_approval: true,
            auto_approval_max_notional: dec!(2000),
            ..FeatureFlags::default()
        };

        let proposal = store_risk_approved(&service, dec!(900));
        let ctx = AutoApprovalContext {
            flags: &flags,
            kill_switch: &kill_switch,
            policy: None,
            portfolio_nav: None,
        };
        let (requested, token) = service
            .request(proposal.proposal_id, Some(&ctx), Utc::now())
            .unwrap();
        assert_eq!(requested.state, OrderState::ApprovalRequested);
        assert!(token.is_none());
    }

    #[test]
    fn auto_approval_emits_its_own_event() {
        let dir = tempfile::tempdir().unwrap();
        let (audit, service) = make_service(&dir);
        let kill_switch = make_kill_switch(&dir, Arc::clone(&audit));
        let flags = FeatureFlags {
            auto_approval: true,
            auto_approval_max_notional: dec!(1000),
            ..FeatureFlags::default()
        };
        let proposal = store_risk_approved(&service, dec!(500));
        let ctx = AutoApprovalContext {
            flags: &flags,
            kill_switch: &kill_switch,
            policy: Some(&AutoApprovalPolicy::default()),
            portfolio_nav: Some(dec!(100000)),
        };
        service
            .request(proposal.proposal_id, Some(&ctx), Utc::now())
            .unwrap();

        let events = audit.query(&crate::audit::AuditQuery {
            event_types: vec![EventType::AutoApprovalGranted],
            ..crate::audit::AuditQuery::default()
        });
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "corr-1");
    }

    #[test]
    fn eviction_drops_only_terminal_proposals() {
        let dir = tempfile::tempdir().unwrap();
        let (_audit, service) = make_service(&dir);
        let service = service.with_capacity(2);
        let now = Utc::now();

        // One terminal, one live proposal.
        let terminal = OrderProposal::new(make_intent(dec!(100)), "c1".to_string(), now);
        let terminal = terminal
            .with_simulation(SimulationResult::price_unavailable("x"), now)
            .unwrap()
            .with_state(OrderState::RiskRejected, now)
            .unwrap();
        service.store(terminal.clone()).unwrap();
        let live = store_risk_approved(&service, dec!(900));

        // Store at capacity: terminal one is evicted.
        let third = store_risk_approved(&service, dec!(901));
        assert!(service.get(terminal.proposal_id).is_none());
        assert!(service.get(live.proposal_id).is_some());
        assert!(service.get(third.proposal_id).is_some());

        // Now everything is non-terminal: insertion is rejected.
        let proposal = OrderProposal::new(make_intent(dec!(902)), "c4".to_string(), now);
        let err = service.store(proposal).unwrap_err();
        assert_eq!(err.code(), "STORE_FULL");
    }

    #[test]
    fn pending_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let (_audit, service) = make_service(&dir);

        let older = store_risk_approved(&service, dec!(100));
        std::thread::sleep(std::time::Duration::from_millis(5));
        let newer = store_risk_approved(&service, dec!(200));

        let pending = service.pending(10);
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].proposal_id, newer.proposal_id);
        assert_eq!(pending[1].proposal_id, older.proposal_id);

        let limited = service.pending(1);
        assert_eq!(limited.len(), 1);
    }
}
