//! The risk gate: deterministic evaluation of rules R1-R12.
//!
//! Default decision is REJECT when any blocker rule fails; APPROVE only when
//! all enabled rules pass; MANUAL_REVIEW when the worst violation is a major
//! rule. Minor violations surface as warnings. Warnings are also generated
//! at 80% of any limit. When the kill switch is enabled the gate always
//! rejects with the synthetic rule id `KS`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveTime, Timelike, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::models::{MarketSnapshot, OrderIntent, OrderSide, Portfolio};
use crate::safety::KillSwitch;
use crate::sim::SimulationResult;

use super::limits::{Decision, RiskDecision, RuleConfig, Severity};
use super::policy::PolicyStore;

/// Volatility metrics for R9.
#[derive(Debug, Clone, Copy, Default)]
pub struct VolatilityMetrics {
    /// Annualized volatility of the symbol (0.20 = 20%).
    pub symbol_volatility: Option<f64>,
    /// Market-wide volatility (VIX-like).
    pub market_volatility: Option<f64>,
    /// Symbol beta versus the market.
    pub beta: Option<f64>,
}

impl VolatilityMetrics {
    /// Effective volatility: symbol-specific, else beta × market.
    #[must_use]
    pub fn effective_volatility(&self) -> Option<f64> {
        self.symbol_volatility.or_else(|| {
            match (self.beta, self.market_volatility) {
                (Some(beta), Some(market)) => Some(beta * market),
                _ => None,
            }
        })
    }
}

#[derive(Debug, Default)]
struct DailyCounters {
    trades_count: u32,
    pnl: Decimal,
}

struct Violation {
    rule: &'static str,
    severity: Severity,
    message: String,
}

/// Risk gate evaluating orders against policy rules R1-R12.
pub struct RiskEngine {
    policy: Arc<PolicyStore>,
    kill_switch: Arc<KillSwitch>,
    daily: Mutex<DailyCounters>,
    high_water_mark: Mutex<Option<Decimal>>,
}

impl RiskEngine {
    /// Create an engine reading policy from `policy` and halt state from
    /// `kill_switch`.
    #[must_use]
    pub fn new(policy: Arc<PolicyStore>, kill_switch: Arc<KillSwitch>) -> Self {
        Self {
            policy,
            kill_switch,
            daily: Mutex::new(DailyCounters::default()),
            high_water_mark: Mutex::new(None),
        }
    }

    /// Record a completed trade for R7.
    pub fn record_trade(&self) {
        self.daily.lock().trades_count += 1;
    }

    /// Set today's trade count and P&L (e.g. from reconciliation).
    pub fn set_daily(&self, trades_count: u32, pnl: Decimal) {
        let mut daily = self.daily.lock();
        daily.trades_count = trades_count;
        daily.pnl = pnl;
    }

    /// Evaluate an intent against all enabled rules.
    ///
    /// `snapshot` supplies the liquidity proxy for R6 (no-op when absent);
    /// `volatility` supplies R9 inputs (skipped when absent). Deterministic:
    /// given equal inputs and policy, the decision is identical.
    #[must_use]
    #[allow(clippy::too_many_lines)]
    pub fn evaluate(
        &self,
        intent: &OrderIntent,
        portfolio: &Portfolio,
        simulation: &SimulationResult,
        snapshot: Option<&MarketSnapshot>,
        now: DateTime<Utc>,
        volatility: Option<&VolatilityMetrics>,
    ) -> RiskDecision {
        // Hot reload: pick up an edited policy file; a malformed edit keeps
        // the previous policy active.
        if let Err(e) = self.policy.maybe_reload() {
            tracing::warn!(error = %e, "risk policy reload failed, keeping previous policy");
        }
        let policy = self.policy.current();
        let rules = &policy.rules;
        let mut violations: Vec<Violation> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut metrics: HashMap<String, Decimal> = HashMap::new();
        let mut halt_requested = false;

        if self.kill_switch.is_enabled() {
            return RiskDecision {
                decision: Decision::Reject,
                reason: "kill switch is active".to_string(),
                violated_rules: vec!["KS".to_string()],
                warnings,
                metrics,
                halt_requested: false,
            };
        }

        if !simulation.is_success() {
            return RiskDecision {
                decision: Decision::Reject,
                reason: format!(
                    "simulation failed: {}",
                    simulation.error_message.as_deref().unwrap_or("unknown")
                ),
                violated_rules: vec!["SIMULATION_FAILED".to_string()],
                warnings,
                metrics,
                halt_requested: false,
            };
        }

        let gross = simulation.gross_notional.unwrap_or_default();
        metrics.insert("gross_notional".to_string(), gross);

        // R1: max notional per trade.
        if rules.r1.enabled {
            if gross > rules.r1.limit {
                violations.push(Violation {
                    rule: "R1",
                    severity: rules.r1.severity,
                    message: format!(
                        "R1: notional ${gross:.2} exceeds max_notional_per_trade ${:.2}",
                        rules.r1.limit
                    ),
                });
            } else if gross >= rules.r1.limit * Decimal::new(8, 1) {
                warnings.push(format!(
                    "notional ${gross:.2} is within 80% of limit ${:.2}",
                    rules.r1.limit
                ));
            }
        }

        // R2: max position weight after trade.
        if rules.r2.enabled && portfolio.total_value > Decimal::ZERO {
            let exposure_after = simulation.exposure_after.unwrap_or_default();
            let position_pct = exposure_after / portfolio.total_value * Decimal::ONE_HUNDRED;
            metrics.insert("position_pct".to_string(), position_pct);
            if position_pct > rules.r2.limit {
                violations.push(Violation {
                    rule: "R2",
                    severity: rules.r2.severity,
                    message: format!(
                        "R2: position weight {position_pct:.1}% exceeds max_position_weight {}%",
                        rules.r2.limit
                    ),
                });
            } else if position_pct >= rules.r2.limit * Decimal::new(8, 1) {
                warnings.push(format!(
                    "position weight {position_pct:.1}% approaching limit {}%",
                    rules.r2.limit
                ));
            }
        }

        // R3: sector weight. No-op unless the policy carries a sector map
        // entry for this symbol.
        if rules.r3.enabled
            && portfolio.total_value > Decimal::ZERO
            && let Some(sector) = policy.advanced.sector_map.get(&intent.instrument.symbol)
        {
            let current: Decimal = portfolio
                .positions
                .iter()
                .filter(|p| {
                    policy.advanced.sector_map.get(&p.instrument.symbol) == Some(sector)
                })
                .map(|p| p.market_value)
                .sum();
            let signed = match intent.side {
                OrderSide::Buy => gross,
                OrderSide::Sell => -gross,
            };
            let sector_pct = (current + signed) / portfolio.total_value * Decimal::ONE_HUNDRED;
            metrics.insert("sector_pct".to_string(), sector_pct);
            if sector_pct > rules.r3.limit {
                violations.push(Violation {
                    rule: "R3",
                    severity: rules.r3.severity,
                    message: format!(
                        "R3: sector {sector} weight {sector_pct:.1}% exceeds max_sector_weight {}%",
                        rules.r3.limit
                    ),
                });
            }
        }

        // R4: max slippage.
        if rules.r4.enabled
            && let Some(slippage_bps) = simulation.slippage_bps()
        {
            metrics.insert("slippage_bps".to_string(), slippage_bps);
            if slippage_bps > rules.r4.limit {
                violations.push(Violation {
                    rule: "R4",
                    severity: rules.r4.severity,
                    message: format!(
                        "R4: slippage {slippage_bps:.1} bps exceeds max_slippage_bps {}",
                        rules.r4.limit
                    ),
                });
            } else if slippage_bps >= rules.r4.limit * Decimal::new(8, 1) {
                warnings.push(format!(
                    "slippage {slippage_bps:.1} bps approaching limit {} bps",
                    rules.r4.limit
                ));
            }
        }

        // R5: trading window.
        if rules.r5.enabled && !Self::is_market_open(&policy.trading_hours, now) {
            violations.push(Violation {
                rule: "R5",
                severity: rules.r5.severity,
                message: "R5: outside the configured trading window".to_string(),
            });
        }

        // R6: liquidity proxy. No-op when liquidity is unknown.
        if rules.r6.enabled
            && let Some(snap) = snapshot
        {
            let volume = Decimal::from(snap.volume);
            metrics.insert("liquidity".to_string(), volume);
            if volume < rules.r6.limit {
                violations.push(Violation {
                    rule: "R6",
                    severity: rules.r6.severity,
                    message: format!(
                        "R6: liquidity {volume} below min_liquidity {}",
                        rules.r6.limit
                    ),
                });
            }
        }

        // R7: max daily trades.
        let daily = {
            let guard = self.daily.lock();
            (guard.trades_count, guard.pnl)
        };
        if rules.r7.enabled {
            let count = Decimal::from(daily.0);
            metrics.insert("daily_trades_count".to_string(), count);
            if count >= rules.r7.limit {
                violations.push(Violation {
                    rule: "R7",
                    severity: rules.r7.severity,
                    message: format!(
                        "R7: daily trade limit reached ({}/{})",
                        daily.0, rules.r7.limit
                    ),
                });
            } else if count >= rules.r7.limit * Decimal::new(8, 1) {
                warnings.push(format!(
                    "daily trade count {} approaching limit {}",
                    daily.0, rules.r7.limit
                ));
            }
        }

        // R8: max daily loss - circuit breaker.
        if rules.r8.enabled {
            metrics.insert("daily_pnl".to_string(), daily.1);
            if daily.1 <= -rules.r8.limit {
                violations.push(Violation {
                    rule: "R8",
                    severity: rules.r8.severity,
                    message: format!(
                        "R8: daily loss ${:.2} breaches max_daily_loss ${:.2}",
                        daily.1, rules.r8.limit
                    ),
                });
            } else if daily.1 <= -(rules.r8.limit * Decimal::new(8, 1)) {
                warnings.push(format!(
                    "daily P&L ${:.2} within 80% of loss limit ${:.2}",
                    daily.1, rules.r8.limit
                ));
            }
        }

        // R9: volatility-weighted exposure. Skipped without volatility data.
        if rules.r9.enabled
            && portfolio.total_value > Decimal::ZERO
            && let Some(vol) = volatility.and_then(VolatilityMetrics::effective_volatility)
            && let Ok(vol_dec) = Decimal::try_from(vol)
        {
            let exposure = gross * vol_dec;
            let risk_pct = exposure / portfolio.total_value * Decimal::ONE_HUNDRED;
            metrics.insert("position_risk_pct".to_string(), risk_pct);
            let limit_pct = rules.r9.limit * Decimal::ONE_HUNDRED;
            if risk_pct > limit_pct {
                violations.push(Violation {
                    rule: "R9",
                    severity: rules.r9.severity,
                    message: format!(
                        "R9: volatility exposure {risk_pct:.2}% exceeds {limit_pct:.2}% of portfolio"
                    ),
                });
            }
        }

        // R10: correlation exposure. Disabled unless correlation data is
        // present; the default policy ships it disabled.

        // R11: drawdown protection.
        if rules.r11.enabled {
            let drawdown_pct = self.update_drawdown(portfolio.total_value);
            metrics.insert("drawdown_pct".to_string(), drawdown_pct);
            if drawdown_pct > rules.r11.limit {
                halt_requested = true;
                violations.push(Violation {
                    rule: "R11",
                    severity: rules.r11.severity,
                    message: format!(
                        "R11: drawdown {drawdown_pct:.2}% exceeds max_drawdown_pct {}%",
                        rules.r11.limit
                    ),
                });
            } else if drawdown_pct >= rules.r11.limit * Decimal::new(8, 1) {
                warnings.push(format!(
                    "drawdown {drawdown_pct:.2}% approaching limit {}%",
                    rules.r11.limit
                ));
            }
        }

        // R12: session open/close blackout.
        if rules.r12.enabled
            && let Some(message) = Self::session_blackout(&policy.trading_hours, rules.r12, now)
        {
            violations.push(Violation {
                rule: "R12",
                severity: rules.r12.severity,
                message,
            });
        }

        Self::render(violations, warnings, metrics, halt_requested)
    }

    fn render(
        violations: Vec<Violation>,
        mut warnings: Vec<String>,
        metrics: HashMap<String, Decimal>,
        halt_requested: bool,
    ) -> RiskDecision {
        let mut blocking: Vec<&Violation> = Vec::new();
        let mut review: Vec<&Violation> = Vec::new();
        for violation in &violations {
            match violation.severity {
                Severity::Blocker => blocking.push(violation),
                Severity::Major => review.push(violation),
                Severity::Minor => warnings.push(violation.message.clone()),
            }
        }

        let violated_rules: Vec<String> = violations
            .iter()
            .filter(|v| v.severity != Severity::Minor)
            .map(|v| v.rule.to_string())
            .collect();

        if !blocking.is_empty() {
            let reason = blocking
                .iter()
                .chain(review.iter())
                .map(|v| v.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return RiskDecision {
                decision: Decision::Reject,
                reason,
                violated_rules,
                warnings,
                metrics,
                halt_requested,
            };
        }

        if !review.is_empty() {
            let reason = review
                .iter()
                .map(|v| v.message.as_str())
                .collect::<Vec<_>>()
                .join("; ");
            return RiskDecision {
                decision: Decision::ManualReview,
                reason,
                violated_rules,
                warnings,
                metrics,
                halt_requested,
            };
        }

        RiskDecision {
            decision: Decision::Approve,
            reason: "all risk checks passed".to_string(),
            violated_rules: Vec::new(),
            warnings,
            metrics,
            halt_requested,
        }
    }

    fn update_drawdown(&self, total_value: Decimal) -> Decimal {
        let mut hwm = self.high_water_mark.lock();
        match *hwm {
            Some(mark) if total_value < mark => {
                (mark - total_value) / mark * Decimal::ONE_HUNDRED
            }
            _ => {
                *hwm = Some(total_value);
                Decimal::ZERO
            }
        }
    }

    fn parse_hhmm(value: &str) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(value, "%H:%M").ok()
    }

    fn is_market_open(hours: &super::limits::TradingHours, now: DateTime<Utc>) -> bool {
        let (Some(open), Some(close)) = (
            Self::parse_hhmm(&hours.market_open_utc),
            Self::parse_hhmm(&hours.market_close_utc),
        ) else {
            // An unparseable window fails closed.
            return false;
        };
        let current = now.time();
        if current >= open && current <= close {
            return true;
        }
        if hours.allow_pre_market && current < open {
            return true;
        }
        hours.allow_after_hours && current > close
    }

    fn session_blackout(
        hours: &super::limits::TradingHours,
        rule: RuleConfig,
        now: DateTime<Utc>,
    ) -> Option<String> {
        let open = Self::parse_hhmm(&hours.market_open_utc)?;
        let close = Self::parse_hhmm(&hours.market_close_utc)?;
        let minutes = rust_decimal::prelude::ToPrimitive::to_u32(&rule.limit).unwrap_or(0);
        let current = now.time();

        let since_open = minutes_between(open, current);
        if let Some(elapsed) = since_open
            && elapsed < minutes
        {
            return Some(format!(
                "R12: within the first {minutes} minutes of the session ({elapsed} elapsed)"
            ));
        }
        let until_close = minutes_between(current, close);
        if let Some(remaining) = until_close
            && remaining < minutes
        {
            return Some(format!(
                "R12: within the last {minutes} minutes of the session ({remaining} remaining)"
            ));
        }
        None
    }
}

/// Minutes from `a` to `b` when `b` is not before `a`.
fn minutes_between(a: NaiveTime, b: NaiveTime) -> Option<u32> {
    let a_min = a.hour() * 60 + a.minute();
    let b_min = b.hour() * 60 + b.minute();
    b_min.checked_sub(a_min)
}
