//! Instrument and order vocabulary.

use serde::{Deserialize, Serialize};

/// Instrument type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstrumentType {
    /// Stock.
    Stk,
    /// Exchange-traded fund.
    Etf,
    /// Future.
    Fut,
    /// Forex pair.
    Fx,
    /// Cryptocurrency.
    Crypto,
}

impl std::fmt::Display for InstrumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stk => write!(f, "STK"),
            Self::Etf => write!(f, "ETF"),
            Self::Fut => write!(f, "FUT"),
            Self::Fx => write!(f, "FX"),
            Self::Crypto => write!(f, "CRYPTO"),
        }
    }
}

/// Order side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderSide {
    /// Buy.
    Buy,
    /// Sell.
    Sell,
}

impl std::fmt::Display for OrderSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Buy => write!(f, "BUY"),
            Self::Sell => write!(f, "SELL"),
        }
    }
}

/// Order type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderType {
    /// Market.
    Mkt,
    /// Limit.
    Lmt,
    /// Stop.
    Stp,
    /// Stop-limit.
    StpLmt,
}

impl OrderType {
    /// Whether this order type requires a limit price.
    #[must_use]
    pub const fn requires_limit_price(&self) -> bool {
        matches!(self, Self::Lmt | Self::StpLmt)
    }

    /// Whether this order type requires a stop price.
    #[must_use]
    pub const fn requires_stop_price(&self) -> bool {
        matches!(self, Self::Stp | Self::StpLmt)
    }
}

impl std::fmt::Display for OrderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Mkt => write!(f, "MKT"),
            Self::Lmt => write!(f, "LMT"),
            Self::Stp => write!(f, "STP"),
            Self::StpLmt => write!(f, "STP_LMT"),
        }
    }
}

/// Time in force.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    /// Day order.
    Day,
    /// Good till cancelled.
    Gtc,
    /// Immediate or cancel.
    Ioc,
    /// Fill or kill.
    Fok,
}

impl std::fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Day => write!(f, "DAY"),
            Self::Gtc => write!(f, "GTC"),
            Self::Ioc => write!(f, "IOC"),
            Self::Fok => write!(f, "FOK"),
        }
    }
}

/// Broker-side order status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Accepted by the gate, not yet at the broker.
    Pending,
    /// Live at the broker.
    Submitted,
    /// Completely filled.
    Filled,
    /// Cancelled.
    Cancelled,
    /// Rejected by the broker.
    Rejected,
}

impl OrderStatus {
    /// Whether this status is terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Filled | Self::Cancelled | Self::Rejected)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Submitted => write!(f, "SUBMITTED"),
            Self::Filled => write!(f, "FILLED"),
            Self::Cancelled => write!(f, "CANCELLED"),
            Self::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// An instrument to trade.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Instrument {
    /// Ticker symbol, uppercased.
    pub symbol: String,
    /// Instrument type.
    #[serde(rename = "type")]
    pub instrument_type: InstrumentType,
    /// Broker contract id, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub con_id: Option<i64>,
    /// Listing exchange.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange: Option<String>,
    /// Trading currency.
    pub currency: String,
}

impl Instrument {
    /// Create a stock instrument in USD.
    #[must_use]
    pub fn stock(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            instrument_type: InstrumentType::Stk,
            con_id: None,
            exchange: None,
            currency: "USD".to_string(),
        }
    }

    /// Create an ETF instrument in USD.
    #[must_use]
    pub fn etf(symbol: &str) -> Self {
        Self {
            symbol: symbol.to_uppercase(),
            instrument_type: InstrumentType::Etf,
            con_id: None,
            exchange: None,
            currency: "USD".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_type_price_requirements() {
        assert!(OrderType::Lmt.requires_limit_price());
        assert!(OrderType::StpLmt.requires_limit_price());
        assert!(!OrderType::Mkt.requires_limit_price());

        assert!(OrderType::Stp.requires_stop_price());
        assert!(OrderType::StpLmt.requires_stop_price());
        assert!(!OrderType::Lmt.requires_stop_price());
    }

    #[test]
    fn terminal_statuses() {
        assert!(OrderStatus::Filled.is_terminal());
        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Rejected.is_terminal());
        assert!(!OrderStatus::Submitted.is_terminal());
        assert!(!OrderStatus::Pending.is_terminal());
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&OrderType::StpLmt).unwrap();
        assert_eq!(json, "\"STP_LMT\"");
        let side: OrderSide = serde_json::from_str("\"BUY\"").unwrap();
        assert_eq!(side, OrderSide::Buy);
    }

    #[test]
    fn stock_constructor_uppercases() {
        let inst = Instrument::stock("aapl");
        assert_eq!(inst.symbol, "AAPL");
        assert_eq!(inst.instrument_type, InstrumentType::Stk);
        assert_eq!(inst.currency, "USD");
    }
}
