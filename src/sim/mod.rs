//! Deterministic pre-trade simulator.
//!
//! Projects the effect of an intent on cash and exposure, including fee and
//! slippage estimates, before anything reaches the risk gate. Equal inputs
//! produce bit-identical outputs: all arithmetic is fixed-precision decimal
//! and the market price is an explicit argument, so results never depend on
//! hidden cache state.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{MarketSnapshot, OrderIntent, OrderSide, OrderType, Portfolio};

/// Status of a simulation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SimulationStatus {
    /// Simulation completed.
    Success,
    /// A buy would drive cash negative.
    InsufficientCash,
    /// Quantity was zero or negative.
    InvalidQuantity,
    /// No market price could be determined.
    PriceUnavailable,
    /// A per-order constraint was violated.
    ConstraintViolated,
}

/// Simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Commission per share.
    pub per_share_rate: Decimal,
    /// Minimum commission per order.
    pub min_fee: Decimal,
    /// Maximum commission as a fraction of notional.
    pub max_fee_fraction: Decimal,
    /// Base slippage in basis points (market-execution orders).
    pub base_slippage_bps: Decimal,
    /// Market impact in dollars per (notional / liquidity proxy).
    pub market_impact_factor: Decimal,
    /// Liquidity proxy divisor for the impact term.
    pub liquidity_proxy: Decimal,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            per_share_rate: Decimal::new(5, 3),      // $0.005
            min_fee: Decimal::ONE,                   // $1
            max_fee_fraction: Decimal::new(1, 2),    // 1%
            base_slippage_bps: Decimal::new(5, 0),   // 5 bps
            market_impact_factor: Decimal::ZERO,
            liquidity_proxy: Decimal::new(10_000, 0), // $10,000
        }
    }
}

/// Result of simulating one intent. Immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    /// Run status.
    pub status: SimulationStatus,
    /// Estimated execution price.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_price: Option<Decimal>,
    /// Price × quantity, before fees.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gross_notional: Option<Decimal>,
    /// Estimated commission.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_fee: Option<Decimal>,
    /// Estimated slippage in dollars.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_slippage: Option<Decimal>,
    /// Gross ± fee ± slippage depending on side.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub net_notional: Option<Decimal>,
    /// Cash before the trade.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_before: Option<Decimal>,
    /// Cash after the trade.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cash_after: Option<Decimal>,
    /// Market value of the symbol's position before the trade.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_before: Option<Decimal>,
    /// Market value of the symbol's position after the trade.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exposure_after: Option<Decimal>,
    /// Non-critical warnings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    /// Error description when status is not `SUCCESS`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SimulationResult {
    /// Whether the simulation succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == SimulationStatus::Success
    }

    /// Failure result carrying only a status and message.
    #[must_use]
    pub fn failed(status: SimulationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            execution_price: None,
            gross_notional: None,
            estimated_fee: None,
            estimated_slippage: None,
            net_notional: None,
            cash_before: None,
            cash_after: None,
            exposure_before: None,
            exposure_after: None,
            warnings: Vec::new(),
            error_message: Some(message.into()),
        }
    }

    /// `PRICE_UNAVAILABLE` shorthand.
    #[must_use]
    pub fn price_unavailable(message: impl Into<String>) -> Self {
        Self::failed(SimulationStatus::PriceUnavailable, message)
    }

    /// Estimated slippage in basis points of gross notional.
    #[must_use]
    pub fn slippage_bps(&self) -> Option<Decimal> {
        match (self.estimated_slippage, self.gross_notional) {
            (Some(slippage), Some(gross)) if gross > Decimal::ZERO => {
                Some(slippage / gross * Decimal::new(10_000, 0))
            }
            _ => None,
        }
    }
}

/// Deterministic trade simulator.
#[derive(Debug, Clone, Default)]
pub struct TradeSimulator {
    config: SimulationConfig,
}

impl TradeSimulator {
    /// Create a simulator with explicit configuration.
    #[must_use]
    pub const fn new(config: SimulationConfig) -> Self {
        Self { config }
    }

    /// Simulate an intent against a portfolio and market snapshot.
    #[must_use]
    pub fn simulate(
        &self,
        portfolio: &Portfolio,
        snapshot: Option<&MarketSnapshot>,
        intent: &OrderIntent,
    ) -> SimulationResult {
        let mut warnings = Vec::new();

        if intent.quantity <= Decimal::ZERO {
            return SimulationResult::failed(
                SimulationStatus::InvalidQuantity,
                format!("invalid quantity: {}", intent.quantity),
            );
        }

        let Some(execution_price) = Self::execution_price(intent, snapshot) else {
            return SimulationResult::price_unavailable("cannot determine execution price");
        };

        let gross_notional = execution_price * intent.quantity;
        let estimated_slippage = self.slippage(gross_notional, intent.order_type);
        let estimated_fee = self.fee(gross_notional, intent.quantity);

        let net_notional = match intent.side {
            OrderSide::Buy => gross_notional + estimated_fee + estimated_slippage,
            OrderSide::Sell => gross_notional - estimated_fee - estimated_slippage,
        };

        let cash_before = portfolio.primary_cash();
        let cash_after = match intent.side {
            OrderSide::Buy => cash_before - net_notional,
            OrderSide::Sell => cash_before + net_notional,
        };

        let exposure_before = portfolio.position_value(&intent.instrument.symbol);
        let exposure_after = match intent.side {
            OrderSide::Buy => exposure_before + gross_notional,
            OrderSide::Sell => exposure_before - gross_notional,
        };

        let base = SimulationResult {
            status: SimulationStatus::Success,
            execution_price: Some(execution_price),
            gross_notional: Some(gross_notional),
            estimated_fee: Some(estimated_fee),
            estimated_slippage: Some(estimated_slippage),
            net_notional: Some(net_notional),
            cash_before: Some(cash_before),
            cash_after: Some(cash_after),
            exposure_before: Some(exposure_before),
            exposure_after: Some(exposure_after),
            warnings: Vec::new(),
            error_message: None,
        };

        // Negative cash is only a failure for buys.
        if intent.side == OrderSide::Buy && cash_after < Decimal::ZERO {
            return SimulationResult {
                status: SimulationStatus::InsufficientCash,
                error_message: Some(format!(
                    "insufficient cash: need ${net_notional:.2}, have ${cash_before:.2}"
                )),
                ..base
            };
        }

        if let Some(constraints) = &intent.constraints {
            let slippage_bps = if gross_notional > Decimal::ZERO {
                estimated_slippage / gross_notional * Decimal::new(10_000, 0)
            } else {
                Decimal::ZERO
            };
            if let Some(max_bps) = constraints.max_slippage_bps
                && slippage_bps > Decimal::from(max_bps)
            {
                return SimulationResult {
                    status: SimulationStatus::ConstraintViolated,
                    error_message: Some(format!(
                        "estimated slippage {slippage_bps:.1} bps exceeds max {max_bps} bps"
                    )),
                    ..base
                };
            }
            if let Some(max_notional) = constraints.max_notional
                && gross_notional > max_notional
            {
                return SimulationResult {
                    status: SimulationStatus::ConstraintViolated,
                    error_message: Some(format!(
                        "gross notional ${gross_notional:.2} exceeds max ${max_notional:.2}"
                    )),
                    ..base
                };
            }
        }

        if intent.order_type == OrderType::Mkt {
            warnings.push("market order: execution price and slippage are unbounded".to_string());
        }
        if let Some(bps) = base.slippage_bps()
            && bps > Decimal::new(20, 0)
        {
            warnings.push(format!("significant estimated slippage: {bps:.1} bps"));
        }
        if gross_notional > Decimal::new(50_000, 0) {
            warnings.push(format!("large trade: gross notional ${gross_notional:.2}"));
        }

        SimulationResult { warnings, ..base }
    }

    fn execution_price(
        intent: &OrderIntent,
        snapshot: Option<&MarketSnapshot>,
    ) -> Option<Decimal> {
        match intent.order_type {
            // Market and stop orders execute at the current touch.
            OrderType::Mkt | OrderType::Stp => snapshot.map(|s| match intent.side {
                OrderSide::Buy => s.ask,
                OrderSide::Sell => s.bid,
            }),
            // Limit variants assume the limit price is executable; realism
            // is the risk gate's concern, not the simulator's.
            OrderType::Lmt | OrderType::StpLmt => intent.limit_price,
        }
    }

    fn slippage(&self, gross_notional: Decimal, order_type: OrderType) -> Decimal {
        match order_type {
            OrderType::Lmt | OrderType::StpLmt => Decimal::ZERO,
            OrderType::Mkt | OrderType::Stp => {
                let base =
                    gross_notional * self.config.base_slippage_bps / Decimal::new(10_000, 0);
                let impact = gross_notional / self.config.liquidity_proxy
                    * self.config.market_impact_factor;
                base + impact
            }
        }
    }

    fn fee(&self, gross_notional: Decimal, quantity: Decimal) -> Decimal {
        let per_share = self.config.per_share_rate * quantity;
        let fee = per_share.max(self.config.min_fee);
        let cap = gross_notional * self.config.max_fee_fraction;
        fee.min(cap).max(Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cash, Instrument, OrderConstraints, Position, TimeInForce};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn make_portfolio(cash: Decimal) -> Portfolio {
        Portfolio {
            account_id: "DU123456".to_string(),
            positions: vec![Position {
                instrument: Instrument::etf("SPY"),
                quantity: dec!(100),
                average_cost: dec!(450),
                market_value: dec!(46000),
                unrealized_pnl: dec!(1000),
                realized_pnl: dec!(0),
            }],
            cash: vec![Cash {
                currency: "USD".to_string(),
                available: cash,
                total: cash,
            }],
            total_value: dec!(46000) + cash,
            timestamp: Utc::now(),
        }
    }

    fn make_snapshot(bid: Decimal, ask: Decimal) -> MarketSnapshot {
        MarketSnapshot {
            instrument: Instrument::stock("AAPL"),
            bid,
            ask,
            last: (bid + ask) / dec!(2),
            open: bid,
            high: ask,
            low: bid,
            prev_close: bid,
            volume: 1_000_000,
            timestamp: Utc::now(),
        }
    }

    fn make_intent(side: OrderSide, order_type: OrderType, quantity: Decimal) -> OrderIntent {
        OrderIntent {
            account_id: "DU123456".to_string(),
            instrument: Instrument::stock("AAPL"),
            side,
            order_type,
            quantity,
            limit_price: None,
            stop_price: None,
            time_in_force: TimeInForce::Day,
            reason: "Portfolio rebalance to target allocation".to_string(),
            strategy_tag: "rebal_monthly_v1".to_string(),
            constraints: None,
        }
    }

    #[test]
    fn happy_path_buy_mkt_arithmetic() {
        let simulator = TradeSimulator::default();
        let portfolio = make_portfolio(dec!(50000));
        let snapshot = make_snapshot(dec!(190.28), dec!(190.47));
        let intent = make_intent(OrderSide::Buy, OrderType::Mkt, dec!(10));

        let result = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        assert_eq!(result.status, SimulationStatus::Success);
        assert_eq!(result.execution_price.unwrap(), dec!(190.47));
        assert_eq!(result.gross_notional.unwrap(), dec!(1904.70));
        assert_eq!(result.estimated_fee.unwrap(), dec!(1));
        // 5 bps of 1904.70
        assert_eq!(result.estimated_slippage.unwrap(), dec!(0.952350));
        assert_eq!(result.net_notional.unwrap().round_dp(2), dec!(1906.65));
        assert_eq!(result.cash_after.unwrap().round_dp(2), dec!(48093.35));
    }

    #[test]
    fn identical_inputs_identical_outputs() {
        let simulator = TradeSimulator::default();
        let portfolio = make_portfolio(dec!(50000));
        let snapshot = make_snapshot(dec!(190.28), dec!(190.47));
        let intent = make_intent(OrderSide::Buy, OrderType::Mkt, dec!(10));

        let a = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        let b = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        assert_eq!(serde_json::to_string(&a).unwrap(), serde_json::to_string(&b).unwrap());
    }

    #[test]
    fn sell_uses_bid_and_credits_cash() {
        let simulator = TradeSimulator::default();
        let portfolio = make_portfolio(dec!(1000));
        let snapshot = make_snapshot(dec!(190.28), dec!(190.47));
        let intent = make_intent(OrderSide::Sell, OrderType::Mkt, dec!(10));

        let result = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        assert_eq!(result.execution_price.unwrap(), dec!(190.28));
        // net = gross - fee - slippage; cash goes up.
        assert!(result.net_notional.unwrap() < result.gross_notional.unwrap());
        assert!(result.cash_after.unwrap() > dec!(1000));
    }

    #[test]
    fn limit_order_has_zero_slippage() {
        let simulator = TradeSimulator::default();
        let portfolio = make_portfolio(dec!(50000));
        let snapshot = make_snapshot(dec!(190.28), dec!(190.47));
        let intent = OrderIntent {
            limit_price: Some(dec!(190.00)),
            ..make_intent(OrderSide::Buy, OrderType::Lmt, dec!(10))
        };

        let result = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        assert_eq!(result.execution_price.unwrap(), dec!(190.00));
        assert_eq!(result.estimated_slippage.unwrap(), dec!(0));
    }

    #[test]
    fn zero_quantity_is_invalid() {
        let simulator = TradeSimulator::default();
        let portfolio = make_portfolio(dec!(50000));
        let snapshot = make_snapshot(dec!(190.28), dec!(190.47));
        let intent = make_intent(OrderSide::Buy, OrderType::Mkt, dec!(0));

        let result = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        assert_eq!(result.status, SimulationStatus::InvalidQuantity);
    }

    #[test]
    fn missing_snapshot_is_price_unavailable() {
        let simulator = TradeSimulator::default();
        let portfolio = make_portfolio(dec!(50000));
        let intent = make_intent(OrderSide::Buy, OrderType::Mkt, dec!(10));

        let result = simulator.simulate(&portfolio, None, &intent);
        assert_eq!(result.status, SimulationStatus::PriceUnavailable);
    }

    #[test]
    fn insufficient_cash_on_buy() {
        let simulator = TradeSimulator::default();
        let portfolio = make_portfolio(dec!(100));
        let snapshot = make_snapshot(dec!(190.28), dec!(190.47));
        let intent = make_intent(OrderSide::Buy, OrderType::Mkt, dec!(10));

        let result = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        assert_eq!(result.status, SimulationStatus::InsufficientCash);
        assert!(result.cash_after.unwrap() < dec!(0));
    }

    #[test]
    fn cash_after_exactly_zero_is_success() {
        let simulator = TradeSimulator::default();
        let snapshot = make_snapshot(dec!(100), dec!(100));
        // One share at $100: net = 100 + 1 fee + 0.05 slippage = 101.05
        let portfolio = make_portfolio(dec!(101.05));
        let intent = make_intent(OrderSide::Buy, OrderType::Mkt, dec!(1));

        let result = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        assert_eq!(result.status, SimulationStatus::Success);
        assert_eq!(result.cash_after.unwrap(), dec!(0));
    }

    #[test]
    fn fee_is_clamped_by_notional_fraction() {
        let simulator = TradeSimulator::default();
        let portfolio = make_portfolio(dec!(50000));
        let snapshot = make_snapshot(dec!(1.00), dec!(1.00));
        // 10 shares at $1: min fee $1 would exceed 1% of $10 notional.
        let intent = make_intent(OrderSide::Buy, OrderType::Mkt, dec!(10));

        let result = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        assert_eq!(result.estimated_fee.unwrap(), dec!(0.10));
    }

    #[test]
    fn slippage_exactly_at_constraint_passes() {
        let simulator = TradeSimulator::default();
        let portfolio = make_portfolio(dec!(50000));
        let snapshot = make_snapshot(dec!(190.28), dec!(190.47));
        // Default slippage is exactly 5 bps of gross.
        let intent = OrderIntent {
            constraints: Some(OrderConstraints {
                max_slippage_bps: Some(5),
                max_notional: None,
            }),
            ..make_intent(OrderSide::Buy, OrderType::Mkt, dec!(10))
        };

        let result = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        assert_eq!(result.status, SimulationStatus::Success);

        let intent = OrderIntent {
            constraints: Some(OrderConstraints {
                max_slippage_bps: Some(4),
                max_notional: None,
            }),
            ..make_intent(OrderSide::Buy, OrderType::Mkt, dec!(10))
        };
        let result = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        assert_eq!(result.status, SimulationStatus::ConstraintViolated);
    }

    #[test]
    fn notional_constraint_violation() {
        let simulator = TradeSimulator::default();
        let portfolio = make_portfolio(dec!(50000));
        let snapshot = make_snapshot(dec!(190.28), dec!(190.47));
        let intent = OrderIntent {
            constraints: Some(OrderConstraints {
                max_slippage_bps: None,
                max_notional: Some(dec!(1000)),
            }),
            ..make_intent(OrderSide::Buy, OrderType::Mkt, dec!(10))
        };

        let result = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        assert_eq!(result.status, SimulationStatus::ConstraintViolated);
    }

    #[test]
    fn large_trade_and_mkt_warnings() {
        let simulator = TradeSimulator::default();
        let portfolio = make_portfolio(dec!(1000000));
        let snapshot = make_snapshot(dec!(190.28), dec!(190.47));
        let intent = make_intent(OrderSide::Buy, OrderType::Mkt, dec!(300));

        let result = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        assert_eq!(result.status, SimulationStatus::Success);
        assert!(result.warnings.iter().any(|w| w.contains("market order")));
        assert!(result.warnings.iter().any(|w| w.contains("large trade")));
    }

    #[test]
    fn exposure_tracks_symbol_position() {
        let simulator = TradeSimulator::default();
        let mut portfolio = make_portfolio(dec!(50000));
        portfolio.positions.push(Position {
            instrument: Instrument::stock("AAPL"),
            quantity: dec!(50),
            average_cost: dec!(180),
            market_value: dec!(9500),
            unrealized_pnl: dec!(500),
            realized_pnl: dec!(0),
        });
        let snapshot = make_snapshot(dec!(190.28), dec!(190.47));
        let intent = make_intent(OrderSide::Buy, OrderType::Mkt, dec!(10));

        let result = simulator.simulate(&portfolio, Some(&snapshot), &intent);
        assert_eq!(result.exposure_before.unwrap(), dec!(9500));
        assert_eq!(result.exposure_after.unwrap(), dec!(9500) + dec!(1904.70));
    }
}
