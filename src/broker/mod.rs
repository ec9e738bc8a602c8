//! Broker adapter: the only door to the brokerage.
//!
//! The adapter is polymorphic over two variants: a deterministic mock for
//! tests and development, and an HTTP client for the real brokerage gateway.
//! `submit_order` requires a consumed [`ApprovalToken`]; there is no
//! token-free write path.

mod cache;
mod http;
mod mock;
mod resolve;
mod retry;

pub use cache::MarketDataCache;
pub use http::GatewayBroker;
pub use mock::MockBroker;
pub use resolve::{similarity, InstrumentCandidate, InstrumentHint, SearchFilters};
pub use retry::{is_retryable_status, BackoffCalculator, RetryPolicy};

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{
    ApprovalToken, Bar, Cash, Instrument, MarketSnapshot, OpenOrder, OrderIntent, Portfolio,
    Position,
};

/// Errors surfaced by broker adapters.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// Not connected to the brokerage.
    #[error("not connected to broker")]
    NotConnected,
    /// The call exceeded its deadline.
    #[error("broker call timed out after {0:?}")]
    Timeout(std::time::Duration),
    /// The circuit breaker is open.
    #[error("broker circuit breaker is open, retry after {0:?}")]
    CircuitOpen(std::time::Duration),
    /// Read-only mode blocked a write call locally.
    #[error("broker is in read-only mode, {0} refused")]
    ReadOnly(&'static str),
    /// Order not found at the broker.
    #[error("order {0} not found")]
    OrderNotFound(String),
    /// The order is not in a cancelable state.
    #[error("order {0} is not cancelable")]
    OrderNotCancelable(String),
    /// The broker rejected the request.
    #[error("broker rejected: {0}")]
    Rejected(String),
    /// Unknown account.
    #[error("unknown account {0}")]
    UnknownAccount(String),
    /// Instrument could not be resolved.
    #[error("cannot resolve instrument: {0}")]
    UnresolvedInstrument(String),
    /// Transport or protocol error.
    #[error("broker api error: {0}")]
    Api(String),
}

impl BrokerError {
    /// Whether a retry may help.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotConnected | Self::Timeout(_) | Self::Api(_)
        )
    }
}

impl From<BrokerError> for crate::error::GateError {
    fn from(err: BrokerError) -> Self {
        match &err {
            BrokerError::OrderNotFound(id) => Self::not_found("order", id),
            BrokerError::ReadOnly(_) | BrokerError::OrderNotCancelable(_) => {
                Self::new(crate::error::ErrorKind::Policy, "BROKER_REFUSED", err.to_string())
            }
            BrokerError::Rejected(_) | BrokerError::UnknownAccount(_)
            | BrokerError::UnresolvedInstrument(_) => {
                Self::validation("BROKER_REJECTED", err.to_string())
            }
            _ => Self::resource("BROKER_UNAVAILABLE", err.to_string()),
        }
    }
}

/// A ticket for an asynchronous report export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportTicket {
    /// Query identifier the report was requested for.
    pub query_id: String,
    /// Broker-side reference code to poll with.
    pub reference: String,
}

/// Capability set of a brokerage connection.
///
/// Reads are safe to call concurrently; writes are single-writer per broker
/// order id by convention. Every call may block on I/O and honors the
/// caller's deadline via cancellation.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Full portfolio snapshot for an account.
    async fn get_portfolio(&self, account_id: &str) -> Result<Portfolio, BrokerError>;

    /// Open positions for an account.
    async fn get_positions(&self, account_id: &str) -> Result<Vec<Position>, BrokerError>;

    /// Cash balances for an account.
    async fn get_cash(&self, account_id: &str) -> Result<Vec<Cash>, BrokerError>;

    /// Open orders for an account.
    async fn get_open_orders(&self, account_id: &str) -> Result<Vec<OpenOrder>, BrokerError>;

    /// Latest market snapshot for an instrument.
    async fn get_market_snapshot(
        &self,
        instrument: &Instrument,
    ) -> Result<MarketSnapshot, BrokerError>;

    /// Historical bars, finite and ascending by timestamp.
    async fn get_market_bars(
        &self,
        instrument: &Instrument,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, BrokerError>;

    /// Fuzzy instrument search.
    async fn instrument_search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<InstrumentCandidate>, BrokerError>;

    /// Resolve a hint to a concrete contract: con_id, then exact symbol,
    /// then fuzzy match.
    async fn instrument_resolve(&self, hint: &InstrumentHint) -> Result<Instrument, BrokerError>;

    /// Submit an order. Requires a valid (consumed) approval token; the
    /// token's intent hash must match the intent being submitted.
    async fn submit_order(
        &self,
        intent: &OrderIntent,
        token: &ApprovalToken,
    ) -> Result<OpenOrder, BrokerError>;

    /// Cancel a live order.
    async fn cancel_order(&self, broker_order_id: &str) -> Result<OpenOrder, BrokerError>;

    /// Current status of an order.
    async fn get_order_status(&self, broker_order_id: &str) -> Result<OpenOrder, BrokerError>;

    /// Request an asynchronous report export.
    async fn request_report(&self, query_id: &str) -> Result<ReportTicket, BrokerError>;

    /// Fetch a report if ready; `None` while still generating.
    async fn fetch_report(&self, ticket: &ReportTicket) -> Result<Option<Vec<u8>>, BrokerError>;

    /// Liveness probe.
    async fn health_check(&self) -> Result<(), BrokerError>;

    /// Adapter name for logging.
    fn broker_name(&self) -> &'static str;
}
