//! Auto-approval policy: a conservative allowlist that can substitute a
//! generated token for human approval.
//!
//! The policy is a conjunction: symbol allowlist/blocklist, instrument-type
//! allowlist, time window, order-type allowlist, DCA schedule match, and a
//! position-size ceiling. The absolute notional threshold is checked by the
//! approval service against the feature flags before the policy runs, and
//! the kill switch blocks auto-approval outright.

use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{InstrumentType, OrderIntent, OrderSide, OrderType};

/// Day of week for time-window restrictions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DayOfWeek {
    /// Monday.
    Monday,
    /// Tuesday.
    Tuesday,
    /// Wednesday.
    Wednesday,
    /// Thursday.
    Thursday,
    /// Friday.
    Friday,
    /// Saturday.
    Saturday,
    /// Sunday.
    Sunday,
}

impl From<Weekday> for DayOfWeek {
    fn from(day: Weekday) -> Self {
        match day {
            Weekday::Mon => Self::Monday,
            Weekday::Tue => Self::Tuesday,
            Weekday::Wed => Self::Wednesday,
            Weekday::Thu => Self::Thursday,
            Weekday::Fri => Self::Friday,
            Weekday::Sat => Self::Saturday,
            Weekday::Sun => Self::Sunday,
        }
    }
}

fn weekdays() -> Vec<DayOfWeek> {
    vec![
        DayOfWeek::Monday,
        DayOfWeek::Tuesday,
        DayOfWeek::Wednesday,
        DayOfWeek::Thursday,
        DayOfWeek::Friday,
    ]
}

/// A time window during which auto-approval is allowed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindow {
    /// Window start (UTC, inclusive).
    pub start_time: NaiveTime,
    /// Window end (UTC, inclusive).
    pub end_time: NaiveTime,
    /// Days the window is active; defaults to weekdays.
    #[serde(default = "weekdays")]
    pub days: Vec<DayOfWeek>,
}

impl TimeWindow {
    fn contains(&self, now: DateTime<Utc>) -> bool {
        let day = DayOfWeek::from(now.weekday());
        let time = now.time();
        self.days.contains(&day) && self.start_time <= time && time <= self.end_time
    }
}

/// A recurring dollar-cost-averaging schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DcaSchedule {
    /// Symbols eligible under this schedule.
    pub symbols: Vec<String>,
    /// Maximum notional per DCA order.
    pub max_order_size: Decimal,
    /// Required side.
    pub side: OrderSide,
    /// Required order type.
    pub order_type: OrderType,
}

/// Auto-approval policy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoApprovalPolicy {
    /// Master switch.
    pub enabled: bool,
    /// Allowed symbols; `None` allows all.
    pub symbol_allowlist: Option<Vec<String>>,
    /// Forbidden symbols; takes precedence over the allowlist.
    pub symbol_blocklist: Vec<String>,
    /// Allowed instrument types.
    pub allowed_instrument_types: Vec<InstrumentType>,
    /// Allowed time windows; empty means always.
    pub time_windows: Vec<TimeWindow>,
    /// Allowed order types. LMT-only is the recommended configuration.
    pub allowed_order_types: Vec<OrderType>,
    /// DCA schedules with per-symbol size limits.
    pub dca_schedules: Vec<DcaSchedule>,
    /// Position-size ceiling as % of portfolio NAV; `None` means no limit.
    pub max_position_pct: Option<Decimal>,
}

impl Default for AutoApprovalPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            symbol_allowlist: None,
            symbol_blocklist: Vec::new(),
            allowed_instrument_types: vec![InstrumentType::Stk, InstrumentType::Etf],
            time_windows: Vec::new(),
            allowed_order_types: vec![OrderType::Mkt, OrderType::Lmt],
            dca_schedules: Vec::new(),
            max_position_pct: None,
        }
    }
}

/// Evaluates an intent against the auto-approval policy.
pub struct PolicyChecker<'a> {
    policy: &'a AutoApprovalPolicy,
}

impl<'a> PolicyChecker<'a> {
    /// Create a checker over a policy.
    #[must_use]
    pub const fn new(policy: &'a AutoApprovalPolicy) -> Self {
        Self { policy }
    }

    /// Run every check. Returns the failure reasons; empty means the policy
    /// allows the order.
    #[must_use]
    pub fn check_all(
        &self,
        intent: &OrderIntent,
        notional: Decimal,
        now: DateTime<Utc>,
        portfolio_nav: Option<Decimal>,
    ) -> Vec<String> {
        if !self.policy.enabled {
            return vec!["auto-approval policy disabled".to_string()];
        }

        let mut reasons = Vec::new();
        let symbol = &intent.instrument.symbol;

        if self.policy.symbol_blocklist.iter().any(|s| s == symbol) {
            reasons.push(format!("symbol {symbol} is blocklisted"));
        } else if let Some(allow) = &self.policy.symbol_allowlist
            && !allow.iter().any(|s| s == symbol)
        {
            reasons.push(format!("symbol {symbol} not in allowlist"));
        }

        if !self
            .policy
            .allowed_instrument_types
            .contains(&intent.instrument.instrument_type)
        {
            reasons.push(format!(
                "instrument type {} not allowed",
                intent.instrument.instrument_type
            ));
        }

        if !self.policy.time_windows.is_empty()
            && !self.policy.time_windows.iter().any(|w| w.contains(now))
        {
            reasons.push("outside allowed time windows".to_string());
        }

        if !self.policy.allowed_order_types.contains(&intent.order_type) {
            reasons.push(format!("order type {} not allowed", intent.order_type));
        }

        if let Some(reason) = self.check_dca(intent, notional) {
            reasons.push(reason);
        }

        if let Some(max_pct) = self.policy.max_position_pct {
            match portfolio_nav {
                Some(nav) if nav > Decimal::ZERO => {
                    let position_pct = notional / nav * Decimal::ONE_HUNDRED;
                    if position_pct > max_pct {
                        reasons.push(format!(
                            "position size {position_pct:.2}% exceeds limit {max_pct}%"
                        ));
                    }
                }
                // Fail safe when the ceiling cannot be verified.
                _ => reasons.push("cannot verify position-size ceiling (NAV unavailable)".to_string()),
            }
        }

        reasons
    }

    /// A matching DCA schedule caps the order size; no matching schedule is
    /// not a blocking condition.
    fn check_dca(&self, intent: &OrderIntent, notional: Decimal) -> Option<String> {
        for schedule in &self.policy.dca_schedules {
            let matches = schedule
                .symbols
                .iter()
                .any(|s| s == &intent.instrument.symbol)
                && schedule.side == intent.side
                && schedule.order_type == intent.order_type;
            if matches {
                if notional > schedule.max_order_size {
                    return Some(format!(
                        "DCA order ${notional:.2} exceeds schedule limit ${:.2}",
                        schedule.max_order_size
                    ));
                }
                return None;
            }
        }
        None
    }
}
