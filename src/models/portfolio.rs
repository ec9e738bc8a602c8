//! Portfolio and market data models.
//!
//! These are read-side views obtained from the broker adapter; the core
//! never mutates them.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::instrument::{Instrument, OrderSide, OrderStatus, OrderType, TimeInForce};

/// A position held in the portfolio.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Instrument held.
    pub instrument: Instrument,
    /// Signed quantity.
    pub quantity: Decimal,
    /// Average acquisition cost per unit.
    pub average_cost: Decimal,
    /// Current market value.
    pub market_value: Decimal,
    /// Unrealized profit and loss.
    pub unrealized_pnl: Decimal,
    /// Realized profit and loss.
    pub realized_pnl: Decimal,
}

/// A per-currency cash balance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cash {
    /// Currency code.
    pub currency: String,
    /// Available for trading.
    pub available: Decimal,
    /// Total balance.
    pub total: Decimal,
}

/// Complete portfolio snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Portfolio {
    /// Account this portfolio belongs to.
    pub account_id: String,
    /// Open positions.
    pub positions: Vec<Position>,
    /// Cash balances per currency.
    pub cash: Vec<Cash>,
    /// Total portfolio value (positions + cash).
    pub total_value: Decimal,
    /// Snapshot time.
    pub timestamp: DateTime<Utc>,
}

impl Portfolio {
    /// Primary cash balance (first currency), zero when none.
    #[must_use]
    pub fn primary_cash(&self) -> Decimal {
        self.cash.first().map_or(Decimal::ZERO, |c| c.total)
    }

    /// Market value of the position in `symbol`, zero when flat.
    #[must_use]
    pub fn position_value(&self, symbol: &str) -> Decimal {
        self.positions
            .iter()
            .find(|p| p.instrument.symbol == symbol)
            .map_or(Decimal::ZERO, |p| p.market_value)
    }
}

/// Market data snapshot for one instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    /// Instrument the snapshot describes.
    pub instrument: Instrument,
    /// Best bid.
    pub bid: Decimal,
    /// Best ask.
    pub ask: Decimal,
    /// Last trade price.
    pub last: Decimal,
    /// Session open.
    pub open: Decimal,
    /// Session high.
    pub high: Decimal,
    /// Session low.
    pub low: Decimal,
    /// Previous session close.
    pub prev_close: Decimal,
    /// Session volume.
    pub volume: u64,
    /// Snapshot time.
    pub timestamp: DateTime<Utc>,
}

impl MarketSnapshot {
    /// Midpoint price, (bid + ask) / 2.
    #[must_use]
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    /// Whether the snapshot is older than `max_age` relative to `now`.
    #[must_use]
    pub fn is_stale(&self, now: DateTime<Utc>, max_age: chrono::Duration) -> bool {
        now.signed_duration_since(self.timestamp) > max_age
    }
}

/// One historical bar, OHLCV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    /// Bar open time.
    pub timestamp: DateTime<Utc>,
    /// Open price.
    pub open: Decimal,
    /// High price.
    pub high: Decimal,
    /// Low price.
    pub low: Decimal,
    /// Close price.
    pub close: Decimal,
    /// Volume.
    pub volume: u64,
}

/// Broker-side view of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenOrder {
    /// Internal order id.
    pub order_id: String,
    /// Broker-assigned order id.
    pub broker_order_id: String,
    /// Account the order belongs to.
    pub account_id: String,
    /// Instrument.
    pub instrument: Instrument,
    /// Side.
    pub side: OrderSide,
    /// Requested quantity.
    pub quantity: Decimal,
    /// Order type.
    pub order_type: OrderType,
    /// Limit price, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    /// Stop price, when applicable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    /// Time in force.
    pub time_in_force: TimeInForce,
    /// Current status.
    pub status: OrderStatus,
    /// Quantity filled so far.
    pub filled_quantity: Decimal,
    /// Average fill price, when any quantity has filled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_fill_price: Option<Decimal>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last update time.
    pub updated_at: DateTime<Utc>,
}
