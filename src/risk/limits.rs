//! Risk policy types: decisions, rule configuration, trading hours.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Risk gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// All enabled rules pass.
    Approve,
    /// At least one blocker rule failed.
    Reject,
    /// Only non-blocking rules failed; a human should look.
    ManualReview,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "APPROVE"),
            Self::Reject => write!(f, "REJECT"),
            Self::ManualReview => write!(f, "MANUAL_REVIEW"),
        }
    }
}

/// Risk evaluation result. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskDecision {
    /// Final decision.
    pub decision: Decision,
    /// Human-readable explanation.
    pub reason: String,
    /// Rule ids that were violated (R1..R12, or the synthetic KS).
    #[serde(default)]
    pub violated_rules: Vec<String>,
    /// Non-blocking warnings (80%-of-limit proximity and similar).
    #[serde(default)]
    pub warnings: Vec<String>,
    /// Rule-indexed numeric telemetry.
    #[serde(default)]
    pub metrics: HashMap<String, Decimal>,
    /// R11 exceeded its drawdown limit; the caller should raise a halt.
    #[serde(default)]
    pub halt_requested: bool,
}

impl RiskDecision {
    /// Whether the order is approved.
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.decision == Decision::Approve
    }

    /// Whether the order is rejected.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.decision == Decision::Reject
    }
}

/// Rule severity, controlling how a violation maps to a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Violation rejects the order.
    Blocker,
    /// Violation sends the order to manual review.
    Major,
    /// Violation is reported as a warning only.
    Minor,
}

/// Configuration of one rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Whether the rule is evaluated at all.
    pub enabled: bool,
    /// Rule limit; meaning depends on the rule.
    pub limit: Decimal,
    /// Severity of a violation.
    pub severity: Severity,
}

impl RuleConfig {
    const fn new(enabled: bool, limit: Decimal, severity: Severity) -> Self {
        Self {
            enabled,
            limit,
            severity,
        }
    }
}

/// The twelve rules, with spec defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleSet {
    /// R1: max gross notional per trade (USD).
    pub r1: RuleConfig,
    /// R2: max position weight after trade (% of portfolio value).
    pub r2: RuleConfig,
    /// R3: max sector weight (% of portfolio value); no-op without a sector map.
    pub r3: RuleConfig,
    /// R4: max slippage (bps).
    pub r4: RuleConfig,
    /// R5: trading window; limit unused.
    pub r5: RuleConfig,
    /// R6: min liquidity proxy (shares); no-op when liquidity is unknown.
    pub r6: RuleConfig,
    /// R7: max trades per day.
    pub r7: RuleConfig,
    /// R8: max daily loss (USD) - circuit breaker.
    pub r8: RuleConfig,
    /// R9: max position volatility contribution (fraction of portfolio).
    pub r9: RuleConfig,
    /// R10: max correlation-based exposure; disabled without correlation data.
    pub r10: RuleConfig,
    /// R11: max drawdown from high-water mark (%); exceeding raises a halt.
    pub r11: RuleConfig,
    /// R12: blackout minutes around session open/close.
    pub r12: RuleConfig,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            r1: RuleConfig::new(true, Decimal::new(50_000, 0), Severity::Blocker),
            r2: RuleConfig::new(true, Decimal::new(10, 0), Severity::Blocker),
            r3: RuleConfig::new(true, Decimal::new(30, 0), Severity::Blocker),
            r4: RuleConfig::new(true, Decimal::new(50, 0), Severity::Blocker),
            r5: RuleConfig::new(true, Decimal::ZERO, Severity::Blocker),
            r6: RuleConfig::new(true, Decimal::new(100_000, 0), Severity::Major),
            r7: RuleConfig::new(true, Decimal::new(50, 0), Severity::Blocker),
            r8: RuleConfig::new(true, Decimal::new(5_000, 0), Severity::Blocker),
            r9: RuleConfig::new(true, Decimal::new(2, 2), Severity::Major),
            r10: RuleConfig::new(false, Decimal::new(30, 0), Severity::Major),
            r11: RuleConfig::new(true, Decimal::new(10, 0), Severity::Blocker),
            r12: RuleConfig::new(true, Decimal::new(10, 0), Severity::Minor),
        }
    }
}

/// Trading hours configuration for R5.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TradingHours {
    /// Allow trading during pre-market hours.
    pub allow_pre_market: bool,
    /// Allow trading during after-hours.
    pub allow_after_hours: bool,
    /// Market open, UTC `HH:MM`.
    pub market_open_utc: String,
    /// Market close, UTC `HH:MM`.
    pub market_close_utc: String,
}

impl Default for TradingHours {
    fn default() -> Self {
        Self {
            allow_pre_market: false,
            allow_after_hours: false,
            market_open_utc: "14:30".to_string(),
            market_close_utc: "21:00".to_string(),
        }
    }
}

/// Advanced-rules settings (R3 sector data, R12 session bounds).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdvancedLimits {
    /// Symbol → sector map for R3; empty disables the check.
    pub sector_map: HashMap<String, String>,
}

/// Volatility provider settings for R9.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VolatilityProviderConfig {
    /// Provider name: `none`, `mock`, or `historical`.
    pub provider: String,
}

impl Default for VolatilityProviderConfig {
    fn default() -> Self {
        Self {
            provider: "none".to_string(),
        }
    }
}

/// The whole YAML policy document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RiskPolicy {
    /// Per-rule configuration.
    pub rules: RuleSet,
    /// Trading hours for R5.
    pub trading_hours: TradingHours,
    /// Advanced-rules settings.
    pub advanced: AdvancedLimits,
    /// Volatility provider for R9.
    pub volatility: VolatilityProviderConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn spec_defaults() {
        let rules = RuleSet::default();
        assert_eq!(rules.r1.limit, dec!(50000));
        assert_eq!(rules.r2.limit, dec!(10));
        assert_eq!(rules.r3.limit, dec!(30));
        assert_eq!(rules.r4.limit, dec!(50));
        assert_eq!(rules.r7.limit, dec!(50));
        assert_eq!(rules.r8.limit, dec!(5000));
        assert!(!rules.r10.enabled);
    }

    #[test]
    fn policy_yaml_round_trip() {
        let yaml = r"
rules:
  r1: {enabled: true, limit: 25000, severity: BLOCKER}
  r4: {enabled: false, limit: 80, severity: MAJOR}
trading_hours:
  allow_pre_market: true
  market_open_utc: '13:30'
";
        let policy: RiskPolicy = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(policy.rules.r1.limit, dec!(25000));
        assert!(!policy.rules.r4.enabled);
        assert_eq!(policy.rules.r4.severity, Severity::Major);
        // Unspecified rules keep their defaults.
        assert_eq!(policy.rules.r8.limit, dec!(5000));
        assert!(policy.trading_hours.allow_pre_market);
        assert_eq!(policy.trading_hours.market_open_utc, "13:30");
    }

    #[test]
    fn unknown_top_level_keys_are_rejected() {
        let yaml = "unknown_section:\n  foo: 1\n";
        assert!(serde_yaml::from_str::<RiskPolicy>(yaml).is_err());
    }

    #[test]
    fn decision_display() {
        assert_eq!(Decision::Approve.to_string(), "APPROVE");
        assert_eq!(Decision::ManualReview.to_string(), "MANUAL_REVIEW");
    }
}
