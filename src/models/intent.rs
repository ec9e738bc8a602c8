//! Order intent: the canonical, validated order proposal format.
//!
//! An intent is declarative and never executable by itself. Its canonical
//! JSON form (serde field order, compact separators) is hashed with SHA-256;
//! that hash binds approval tokens to the exact intent they were granted for.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::GateError;

use super::instrument::{Instrument, OrderSide, OrderType, TimeInForce};

/// Per-order constraints and risk limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConstraints {
    /// Maximum acceptable slippage in basis points (0-1000).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_slippage_bps: Option<u32>,
    /// Maximum gross notional value for the order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_notional: Option<Decimal>,
}

impl OrderConstraints {
    fn validate(&self) -> Result<(), GateError> {
        if let Some(bps) = self.max_slippage_bps
            && bps > 1000
        {
            return Err(GateError::validation(
                "BAD_CONSTRAINT",
                format!("max_slippage_bps {bps} out of range 0-1000"),
            )
            .with_context("field", "max_slippage_bps"));
        }
        if let Some(max) = self.max_notional
            && max <= Decimal::ZERO
        {
            return Err(GateError::validation(
                "BAD_CONSTRAINT",
                "max_notional must be positive",
            )
            .with_context("field", "max_notional"));
        }
        Ok(())
    }
}

/// Structured order proposal. Immutable once validated.
///
/// Field order matters: the canonical JSON serialization follows the
/// declaration order below, so the intent hash is stable across runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderIntent {
    /// Account identifier.
    pub account_id: String,
    /// Instrument to trade.
    pub instrument: Instrument,
    /// Buy or sell.
    pub side: OrderSide,
    /// Order type.
    pub order_type: OrderType,
    /// Quantity to trade. Must be positive.
    pub quantity: Decimal,
    /// Limit price; required for LMT and STP_LMT.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    /// Stop price; required for STP and STP_LMT.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Human-readable reason for the order. At least 10 characters and
    /// 3 words; "buy" does not pass review.
    pub reason: String,
    /// Strategy identifier, e.g. `rebal_monthly_v1`.
    pub strategy_tag: String,
    /// Per-order constraints.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraints: Option<OrderConstraints>,
}

impl OrderIntent {
    /// Validate the intent, normalizing the symbol to uppercase.
    ///
    /// # Errors
    ///
    /// Returns a validation error naming the offending field when any
    /// constraint fails.
    pub fn validate(mut self) -> Result<Self, GateError> {
        if self.account_id.trim().is_empty() {
            return Err(
                GateError::validation("BAD_FIELD", "account_id must be non-empty")
                    .with_context("field", "account_id"),
            );
        }
        self.account_id = self.account_id.trim().to_string();
        self.instrument.symbol = self.instrument.symbol.trim().to_uppercase();
        if self.instrument.symbol.is_empty() {
            return Err(GateError::validation("BAD_FIELD", "symbol must be non-empty")
                .with_context("field", "instrument.symbol"));
        }

        if self.quantity <= Decimal::ZERO {
            return Err(GateError::validation(
                "BAD_FIELD",
                format!("quantity must be positive, got {}", self.quantity),
            )
            .with_context("field", "quantity"));
        }

        if self.order_type.requires_limit_price() && self.limit_price.is_none() {
            return Err(GateError::validation(
                "MISSING_PRICE",
                format!("limit_price is required for {} orders", self.order_type),
            )
            .with_context("field", "limit_price"));
        }
        if self.order_type.requires_stop_price() && self.stop_price.is_none() {
            return Err(GateError::validation(
                "MISSING_PRICE",
                format!("stop_price is required for {} orders", self.order_type),
            )
            .with_context("field", "stop_price"));
        }
        for (name, price) in [("limit_price", self.limit_price), ("stop_price", self.stop_price)] {
            if let Some(p) = price
                && p <= Decimal::ZERO
            {
                return Err(GateError::validation(
                    "BAD_FIELD",
                    format!("{name} must be positive"),
                )
                .with_context("field", name));
            }
        }

        let reason = self.reason.trim();
        if reason.len() < 10 {
            return Err(GateError::validation(
                "BAD_REASON",
                "reason must be at least 10 characters",
            )
            .with_context("field", "reason"));
        }
        if reason.split_whitespace().count() < 3 {
            return Err(GateError::validation(
                "BAD_REASON",
                "reason must be descriptive (at least 3 words)",
            )
            .with_context("field", "reason"));
        }
        self.reason = reason.to_string();

        if self.strategy_tag.trim().is_empty() {
            return Err(
                GateError::validation("BAD_FIELD", "strategy_tag must be non-empty")
                    .with_context("field", "strategy_tag"),
            );
        }

        if let Some(constraints) = &self.constraints {
            constraints.validate()?;
        }

        Ok(self)
    }

    /// Canonical JSON form: serde declaration order, compact separators.
    ///
    /// # Panics
    ///
    /// Never panics in practice; the type contains no non-serializable data.
    #[must_use]
    pub fn canonical_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Lowercase hex SHA-256 of the canonical JSON form.
    #[must_use]
    pub fn intent_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_json().as_bytes());
        hex::encode(hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn make_intent() -> OrderIntent {
        OrderIntent {
            account_id: "DU123456".to_string(),
            instrument: Instrument::stock("AAPL"),
            side: OrderSide::Buy,
            order_type: OrderType::Mkt,
            quantity: dec!(10),
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            reason: "Portfolio rebalance to target allocation".to_string(),
            strategy_tag: "rebal_monthly_v1".to_string(),
            constraints: None,
        }
    }

    #[test]
    fn valid_intent_passes() {
        assert!(make_intent().validate().is_ok());
    }

    #[test]
    fn empty_account_rejected() {
        let intent = OrderIntent {
            account_id: "  ".to_string(),
            ..make_intent()
        };
        assert!(intent.validate().is_err());
    }

    #[test]
    fn zero_quantity_rejected() {
        let intent = OrderIntent {
            quantity: Decimal::ZERO,
            ..make_intent()
        };
        assert!(intent.validate().is_err());
    }

    #[test]
    fn limit_order_requires_limit_price() {
        let intent = OrderIntent {
            order_type: OrderType::Lmt,
            limit_price: None,
            ..make_intent()
        };
        let err = intent.validate().unwrap_err();
        assert_eq!(err.code(), "MISSING_PRICE");
    }

    #[test]
    fn stop_limit_requires_both_prices() {
        let intent = OrderIntent {
            order_type: OrderType::StpLmt,
            limit_price: Some(dec!(190)),
            stop_price: None,
            ..make_intent()
        };
        assert!(intent.validate().is_err());

        let intent = OrderIntent {
            order_type: OrderType::StpLmt,
            limit_price: Some(dec!(190)),
            stop_price: Some(dec!(189)),
            ..make_intent()
        };
        assert!(intent.validate().is_ok());
    }

    #[test]
    fn short_reason_rejected() {
        let intent = OrderIntent {
            reason: "buy now".to_string(),
            ..make_intent()
        };
        let err = intent.validate().unwrap_err();
        assert_eq!(err.code(), "BAD_REASON");
    }

    #[test]
    fn two_word_reason_rejected() {
        let intent = OrderIntent {
            reason: "rebalancing portfolio".to_string(),
            ..make_intent()
        };
        let err = intent.validate().unwrap_err();
        assert_eq!(err.code(), "BAD_REASON");
    }

    #[test]
    fn symbol_is_uppercased() {
        let mut intent = make_intent();
        intent.instrument.symbol = "aapl".to_string();
        let validated = intent.validate().unwrap();
        assert_eq!(validated.instrument.symbol, "AAPL");
    }

    #[test]
    fn slippage_constraint_range() {
        let intent = OrderIntent {
            constraints: Some(OrderConstraints {
                max_slippage_bps: Some(1001),
                max_notional: None,
            }),
            ..make_intent()
        };
        assert!(intent.validate().is_err());

        let intent = OrderIntent {
            constraints: Some(OrderConstraints {
                max_slippage_bps: Some(1000),
                max_notional: Some(dec!(10000)),
            }),
            ..make_intent()
        };
        assert!(intent.validate().is_ok());
    }

    #[test]
    fn intent_hash_is_stable() {
        let a = make_intent();
        let b = make_intent();
        assert_eq!(a.intent_hash(), b.intent_hash());
        assert_eq!(a.intent_hash().len(), 64);
    }

    #[test]
    fn intent_hash_changes_with_content() {
        let a = make_intent();
        let b = OrderIntent {
            quantity: dec!(11),
            ..make_intent()
        };
        assert_ne!(a.intent_hash(), b.intent_hash());
    }

    #[test]
    fn canonical_json_round_trips() {
        let intent = make_intent();
        let json = intent.canonical_json();
        let parsed: OrderIntent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, intent);
        assert_eq!(parsed.intent_hash(), intent.intent_hash());
    }
}
