//! Deterministic mock broker for tests and development.
//!
//! The mock is seeded so runs are reproducible: the same seed produces the
//! same snapshots, bars, and fill sequence. Orders fill after a configurable
//! number of status polls. No network is involved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;

use crate::models::{
    ApprovalToken, Bar, Cash, Instrument, InstrumentType, MarketSnapshot, OpenOrder, OrderIntent,
    OrderStatus, Portfolio, Position,
};

use super::resolve::{rank_candidates, InstrumentCandidate, InstrumentHint, SearchFilters};
use super::{BrokerAdapter, BrokerError, ReportTicket};

const DEFAULT_ACCOUNT: &str = "DU123456";
const RESOLVE_THRESHOLD: f64 = 0.95;

struct MockOrder {
    order: OpenOrder,
    polls_remaining: u32,
}

/// Mock broker adapter with realistic, reproducible data.
pub struct MockBroker {
    account_id: String,
    read_only: bool,
    fill_after_polls: u32,
    rng: Mutex<StdRng>,
    order_counter: AtomicU64,
    orders: Mutex<HashMap<String, MockOrder>>,
    quote_overrides: Mutex<HashMap<String, (Decimal, Decimal)>>,
    reports: Mutex<HashMap<String, u32>>,
    universe: Vec<(Instrument, Option<String>)>,
}

impl MockBroker {
    /// Create a mock broker with the given RNG seed.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            account_id: DEFAULT_ACCOUNT.to_string(),
            read_only: false,
            fill_after_polls: 2,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            order_counter: AtomicU64::new(1),
            orders: Mutex::new(HashMap::new()),
            quote_overrides: Mutex::new(HashMap::new()),
            reports: Mutex::new(HashMap::new()),
            universe: Self::default_universe(),
        }
    }

    /// Switch the mock into read-only mode.
    #[must_use]
    pub const fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Set how many status polls an order stays live before filling.
    #[must_use]
    pub const fn with_fill_after_polls(mut self, polls: u32) -> Self {
        self.fill_after_polls = polls;
        self
    }

    /// Pin the bid/ask for a symbol, overriding generated quotes.
    pub fn set_quote(&self, symbol: &str, bid: Decimal, ask: Decimal) {
        self.quote_overrides
            .lock()
            .insert(symbol.to_uppercase(), (bid, ask));
    }

    fn default_universe() -> Vec<(Instrument, Option<String>)> {
        let mut spy = Instrument::etf("SPY");
        spy.exchange = Some("ARCA".to_string());
        spy.con_id = Some(756_733);
        let mut aapl = Instrument::stock("AAPL");
        aapl.exchange = Some("NASDAQ".to_string());
        aapl.con_id = Some(265_598);
        let mut msft = Instrument::stock("MSFT");
        msft.exchange = Some("NASDAQ".to_string());
        msft.con_id = Some(272_093);
        let mut vti = Instrument::etf("VTI");
        vti.exchange = Some("ARCA".to_string());
        vti.con_id = Some(756_899);
        vec![
            (spy, Some("SPDR S&P 500 ETF Trust".to_string())),
            (aapl, Some("Apple Inc.".to_string())),
            (msft, Some("Microsoft Corporation".to_string())),
            (vti, Some("Vanguard Total Stock Market ETF".to_string())),
        ]
    }

    fn base_price(symbol: &str) -> Decimal {
        match symbol {
            "SPY" => Decimal::new(46000, 2),
            "AAPL" => Decimal::new(19000, 2),
            "MSFT" => Decimal::new(38000, 2),
            "VTI" => Decimal::new(23500, 2),
            _ => Decimal::new(10000, 2),
        }
    }

    fn check_account(&self, account_id: &str) -> Result<(), BrokerError> {
        if account_id == self.account_id {
            Ok(())
        } else {
            Err(BrokerError::UnknownAccount(account_id.to_string()))
        }
    }

    fn mock_positions() -> Vec<Position> {
        vec![
            Position {
                instrument: Instrument::etf("SPY"),
                quantity: Decimal::new(100, 0),
                average_cost: Decimal::new(45000, 2),
                market_value: Decimal::new(4_600_000, 2),
                unrealized_pnl: Decimal::new(100_000, 2),
                realized_pnl: Decimal::ZERO,
            },
            Position {
                instrument: Instrument::stock("AAPL"),
                quantity: Decimal::new(50, 0),
                average_cost: Decimal::new(18000, 2),
                market_value: Decimal::new(950_000, 2),
                unrealized_pnl: Decimal::new(50_000, 2),
                realized_pnl: Decimal::new(25_000, 2),
            },
        ]
    }

    fn mock_cash() -> Vec<Cash> {
        vec![Cash {
            currency: "USD".to_string(),
            available: Decimal::new(5_000_000, 2),
            total: Decimal::new(5_000_000, 2),
        }]
    }

    fn next_order_id(&self) -> (String, String) {
        let n = self.order_counter.fetch_add(1, Ordering::SeqCst);
        (format!("order-{n}"), format!("MOCK{n:06}"))
    }

    fn timeframe_step(timeframe: &str) -> ChronoDuration {
        match timeframe {
            "1m" => ChronoDuration::minutes(1),
            "5m" => ChronoDuration::minutes(5),
            "15m" => ChronoDuration::minutes(15),
            "1h" => ChronoDuration::hours(1),
            _ => ChronoDuration::days(1),
        }
    }
}

#[async_trait]
impl BrokerAdapter for MockBroker {
    async fn get_portfolio(&self, account_id: &str) -> Result<Portfolio, BrokerError> {
        self.check_account(account_id)?;
        let positions = Self::mock_positions();
        let cash = Self::mock_cash();
        let total_value = positions.iter().map(|p| p.market_value).sum::<Decimal>()
            + cash.iter().map(|c| c.total).sum::<Decimal>();
        Ok(Portfolio {
            account_id: account_id.to_string(),
            positions,
            cash,
            total_value,
            timestamp: Utc::now(),
        })
    }

    async fn get_positions(&self, account_id: &str) -> Result<Vec<Position>, BrokerError> {
        self.check_account(account_id)?;
        Ok(Self::mock_positions())
    }

    async fn get_cash(&self, account_id: &str) -> Result<Vec<Cash>, BrokerError> {
        self.check_account(account_id)?;
        Ok(Self::mock_cash())
    }

    async fn get_open_orders(&self, account_id: &str) -> Result<Vec<OpenOrder>, BrokerError> {
        self.check_account(account_id)?;
        Ok(self
            .orders
            .lock()
            .values()
            .filter(|o| !o.order.status.is_terminal())
            .map(|o| o.order.clone())
            .collect())
    }

    async fn get_market_snapshot(
        &self,
        instrument: &Instrument,
    ) -> Result<MarketSnapshot, BrokerError> {
        let symbol = instrument.symbol.to_uppercase();
        let (bid, ask) = if let Some(pinned) = self.quote_overrides.lock().get(&symbol) {
            *pinned
        } else {
            let base = Self::base_price(&symbol);
            // Walk up to ±0.5% around the base, half-spread of 5 bps.
            let walk_bps: i64 = self.rng.lock().random_range(-50..=50);
            let last = base + base * Decimal::new(walk_bps, 4);
            let half_spread = last * Decimal::new(5, 4);
            ((last - half_spread).round_dp(2), (last + half_spread).round_dp(2))
        };
        let last = ((bid + ask) / Decimal::TWO).round_dp(2);
        let volume = self.rng.lock().random_range(200_000..5_000_000);
        Ok(MarketSnapshot {
            instrument: instrument.clone(),
            bid,
            ask,
            last,
            open: (last * Decimal::new(9990, 4)).round_dp(2),
            high: (last * Decimal::new(10_080, 4)).round_dp(2),
            low: (last * Decimal::new(9910, 4)).round_dp(2),
            prev_close: (last * Decimal::new(9980, 4)).round_dp(2),
            volume,
            timestamp: Utc::now(),
        })
    }

    async fn get_market_bars(
        &self,
        instrument: &Instrument,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, BrokerError> {
        let step = Self::timeframe_step(timeframe);
        let base = Self::base_price(&instrument.symbol);
        let end = Utc::now();
        let mut price = base;
        let mut bars = Vec::with_capacity(limit);
        for i in (1..=limit).rev() {
            let walk_bps: i64 = self.rng.lock().random_range(-80..=80);
            let close = (price + price * Decimal::new(walk_bps, 4)).round_dp(2);
            let high = close.max(price) * Decimal::new(10_020, 4);
            let low = close.min(price) * Decimal::new(9980, 4);
            let timestamp = end - step * i32::try_from(i).unwrap_or(i32::MAX);
            bars.push(Bar {
                timestamp,
                open: price,
                high: high.round_dp(2),
                low: low.round_dp(2),
                close,
                volume: self.rng.lock().random_range(50_000..1_000_000),
            });
            price = close;
        }
        Ok(bars)
    }

    async fn instrument_search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<InstrumentCandidate>, BrokerError> {
        Ok(rank_candidates(query, &self.universe, filters))
    }

    async fn instrument_resolve(&self, hint: &InstrumentHint) -> Result<Instrument, BrokerError> {
        // Strategy order: con_id, exact symbol, fuzzy.
        if let Some(con_id) = hint.con_id
            && let Some((inst, _)) = self.universe.iter().find(|(i, _)| i.con_id == Some(con_id))
        {
            return Ok(inst.clone());
        }
        if let Some(symbol) = &hint.symbol {
            let upper = symbol.to_uppercase();
            if let Some((inst, _)) = self.universe.iter().find(|(i, _)| i.symbol == upper) {
                return Ok(inst.clone());
            }
            let filters = SearchFilters {
                instrument_type: hint.instrument_type,
                ..SearchFilters::default()
            };
            let candidates = rank_candidates(symbol, &self.universe, &filters);
            if let Some(best) = candidates.first()
                && best.score >= RESOLVE_THRESHOLD
            {
                return Ok(best.instrument.clone());
            }
        }
        Err(BrokerError::UnresolvedInstrument(format!("{hint:?}")))
    }

    async fn submit_order(
        &self,
        intent: &OrderIntent,
        token: &ApprovalToken,
    ) -> Result<OpenOrder, BrokerError> {
        if self.read_only {
            return Err(BrokerError::ReadOnly("submit_order"));
        }
        if token.intent_hash != intent.intent_hash() {
            return Err(BrokerError::Rejected(
                "approval token does not match intent".to_string(),
            ));
        }

        let snapshot = self.get_market_snapshot(&intent.instrument).await?;
        let (order_id, broker_order_id) = self.next_order_id();
        let now = Utc::now();
        let order = OpenOrder {
            order_id,
            broker_order_id: broker_order_id.clone(),
            account_id: intent.account_id.clone(),
            instrument: intent.instrument.clone(),
            side: intent.side,
            quantity: intent.quantity,
            order_type: intent.order_type,
            limit_price: intent.limit_price,
            stop_price: intent.stop_price,
            time_in_force: intent.time_in_force,
            status: OrderStatus::Submitted,
            filled_quantity: Decimal::ZERO,
            average_fill_price: None,
            created_at: now,
            updated_at: now,
        };
        self.orders.lock().insert(
            broker_order_id,
            MockOrder {
                order: order.clone(),
                polls_remaining: self.fill_after_polls,
            },
        );
        // Fill price: taker side of the pinned or generated quote.
        let fill_price = match intent.side {
            crate::models::OrderSide::Buy => snapshot.ask,
            crate::models::OrderSide::Sell => snapshot.bid,
        };
        if let Some(entry) = self.orders.lock().get_mut(&order.broker_order_id) {
            entry.order.average_fill_price = Some(intent.limit_price.unwrap_or(fill_price));
        }
        Ok(order)
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<OpenOrder, BrokerError> {
        if self.read_only {
            return Err(BrokerError::ReadOnly("cancel_order"));
        }
        let mut orders = self.orders.lock();
        let entry = orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::OrderNotFound(broker_order_id.to_string()))?;
        if entry.order.status.is_terminal() {
            return Err(BrokerError::OrderNotCancelable(broker_order_id.to_string()));
        }
        entry.order.status = OrderStatus::Cancelled;
        entry.order.updated_at = Utc::now();
        Ok(entry.order.clone())
    }

    async fn get_order_status(&self, broker_order_id: &str) -> Result<OpenOrder, BrokerError> {
        let mut orders = self.orders.lock();
        let entry = orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::OrderNotFound(broker_order_id.to_string()))?;
        if entry.order.status == OrderStatus::Submitted {
            if entry.polls_remaining == 0 {
                entry.order.status = OrderStatus::Filled;
                entry.order.filled_quantity = entry.order.quantity;
                entry.order.updated_at = Utc::now();
            } else {
                entry.polls_remaining -= 1;
            }
        }
        Ok(entry.order.clone())
    }

    async fn request_report(&self, query_id: &str) -> Result<ReportTicket, BrokerError> {
        let reference = format!("REF{}", self.order_counter.fetch_add(1, Ordering::SeqCst));
        self.reports.lock().insert(reference.clone(), 1);
        Ok(ReportTicket {
            query_id: query_id.to_string(),
            reference,
        })
    }

    async fn fetch_report(&self, ticket: &ReportTicket) -> Result<Option<Vec<u8>>, BrokerError> {
        let mut reports = self.reports.lock();
        let Some(polls) = reports.get_mut(&ticket.reference) else {
            return Err(BrokerError::Api(format!(
                "unknown report reference {}",
                ticket.reference
            )));
        };
        if *polls > 0 {
            *polls -= 1;
            return Ok(None);
        }
        reports.remove(&ticket.reference);
        Ok(Some(
            format!(
                "query_id,generated_at\n{},{}\n",
                ticket.query_id,
                Utc::now().to_rfc3339()
            )
            .into_bytes(),
        ))
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        Ok(())
    }

    fn broker_name(&self) -> &'static str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{OrderSide, OrderType, TimeInForce};
    use rust_decimal_macros::dec;

    fn make_intent() -> OrderIntent {
        OrderIntent {
            account_id: DEFAULT_ACCOUNT.to_string(),
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

    fn make_token(intent: &OrderIntent) -> ApprovalToken {
        let proposal = crate::models::OrderProposal::new(
            intent.clone(),
            "corr-1".to_string(),
            Utc::now(),
        );
        ApprovalToken::issue(&proposal, chrono::Duration::minutes(5), Utc::now())
    }

    #[tokio::test]
    async fn portfolio_totals_positions_and_cash() {
        let broker = MockBroker::new(42);
        let portfolio = broker.get_portfolio(DEFAULT_ACCOUNT).await.unwrap();
        assert_eq!(portfolio.primary_cash(), dec!(50000));
        assert_eq!(portfolio.total_value, dec!(105500));
        assert_eq!(portfolio.positions.len(), 2);
    }

    #[tokio::test]
    async fn unknown_account_is_rejected() {
        let broker = MockBroker::new(42);
        let result = broker.get_portfolio("U999999").await;
        assert!(matches!(result, Err(BrokerError::UnknownAccount(_))));
    }

    #[tokio::test]
    async fn snapshots_are_reproducible_for_equal_seeds() {
        let a = MockBroker::new(7);
        let b = MockBroker::new(7);
        let inst = Instrument::stock("AAPL");
        let snap_a = a.get_market_snapshot(&inst).await.unwrap();
        let snap_b = b.get_market_snapshot(&inst).await.unwrap();
        assert_eq!(snap_a.bid, snap_b.bid);
        assert_eq!(snap_a.ask, snap_b.ask);
    }

    #[tokio::test]
    async fn pinned_quote_wins() {
        let broker = MockBroker::new(42);
        broker.set_quote("AAPL", dec!(190.28), dec!(190.47));
        let snap = broker
            .get_market_snapshot(&Instrument::stock("AAPL"))
            .await
            .unwrap();
        assert_eq!(snap.bid, dec!(190.28));
        assert_eq!(snap.ask, dec!(190.47));
    }

    #[tokio::test]
    async fn bars_are_ascending() {
        let broker = MockBroker::new(42);
        let bars = broker
            .get_market_bars(&Instrument::stock("AAPL"), "1d", 30)
            .await
            .unwrap();
        assert_eq!(bars.len(), 30);
        for pair in bars.windows(2) {
            assert!(pair[0].timestamp < pair[1].timestamp);
        }
    }

    #[tokio::test]
    async fn submit_then_poll_until_filled() {
        let broker = MockBroker::new(42).with_fill_after_polls(2);
        let intent = make_intent();
        let token = make_token(&intent);

        let order = broker.submit_order(&intent, &token).await.unwrap();
        assert_eq!(order.status, OrderStatus::Submitted);
        assert!(order.broker_order_id.starts_with("MOCK"));

        let poll1 = broker.get_order_status(&order.broker_order_id).await.unwrap();
        assert_eq!(poll1.status, OrderStatus::Submitted);
        let poll2 = broker.get_order_status(&order.broker_order_id).await.unwrap();
        assert_eq!(poll2.status, OrderStatus::Submitted);
        let poll3 = broker.get_order_status(&order.broker_order_id).await.unwrap();
        assert_eq!(poll3.status, OrderStatus::Filled);
        assert_eq!(poll3.filled_quantity, dec!(10));
    }

    #[tokio::test]
    async fn submit_rejects_mismatched_token() {
        let broker = MockBroker::new(42);
        let intent = make_intent();
        let other = OrderIntent {
            quantity: dec!(99),
            ..make_intent()
        };
        let token = make_token(&other);
        let result = broker.submit_order(&intent, &token).await;
        assert!(matches!(result, Err(BrokerError::Rejected(_))));
    }

    #[tokio::test]
    async fn read_only_blocks_writes_locally() {
        let broker = MockBroker::new(42).read_only();
        let intent = make_intent();
        let token = make_token(&intent);
        assert!(matches!(
            broker.submit_order(&intent, &token).await,
            Err(BrokerError::ReadOnly(_))
        ));
        assert!(matches!(
            broker.cancel_order("MOCK000001").await,
            Err(BrokerError::ReadOnly(_))
        ));
    }

    #[tokio::test]
    async fn cancel_live_order() {
        let broker = MockBroker::new(42).with_fill_after_polls(100);
        let intent = make_intent();
        let token = make_token(&intent);
        let order = broker.submit_order(&intent, &token).await.unwrap();

        let cancelled = broker.cancel_order(&order.broker_order_id).await.unwrap();
        assert_eq!(cancelled.status, OrderStatus::Cancelled);

        let again = broker.cancel_order(&order.broker_order_id).await;
        assert!(matches!(again, Err(BrokerError::OrderNotCancelable(_))));
    }

    #[tokio::test]
    async fn resolve_by_con_id_then_symbol_then_fuzzy() {
        let broker = MockBroker::new(42);

        let by_con = broker
            .instrument_resolve(&InstrumentHint {
                con_id: Some(265_598),
                ..InstrumentHint::default()
            })
            .await
            .unwrap();
        assert_eq!(by_con.symbol, "AAPL");

        let by_symbol = broker
            .instrument_resolve(&InstrumentHint {
                symbol: Some("spy".to_string()),
                ..InstrumentHint::default()
            })
            .await
            .unwrap();
        assert_eq!(by_symbol.symbol, "SPY");

        let unresolved = broker
            .instrument_resolve(&InstrumentHint {
                symbol: Some("ZZZZ".to_string()),
                ..InstrumentHint::default()
            })
            .await;
        assert!(matches!(
            unresolved,
            Err(BrokerError::UnresolvedInstrument(_))
        ));
    }

    #[tokio::test]
    async fn report_ready_after_one_poll() {
        let broker = MockBroker::new(42);
        let ticket = broker.request_report("q-42").await.unwrap();

        assert!(broker.fetch_report(&ticket).await.unwrap().is_none());
        let payload = broker.fetch_report(&ticket).await.unwrap().unwrap();
        let text = String::from_utf8(payload).unwrap();
        assert!(text.contains("q-42"));
    }
}
