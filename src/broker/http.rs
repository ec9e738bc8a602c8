//! HTTP adapter for the real brokerage gateway.
//!
//! Speaks JSON over HTTP to the brokerage gateway process
//! (`BROKER_HOST:BROKER_PORT`). Read calls carry a 5 second deadline and are
//! retried with exponential backoff on retryable statuses; write calls carry
//! a 10 second deadline and are never retried silently. A circuit breaker
//! opens after consecutive connection failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::models::{
    ApprovalToken, Bar, Cash, Instrument, MarketSnapshot, OpenOrder, OrderIntent, Portfolio,
    Position,
};
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};

use super::resolve::{InstrumentCandidate, InstrumentHint, SearchFilters};
use super::retry::{is_retryable_status, BackoffCalculator, RetryPolicy};
use super::{BrokerAdapter, BrokerError, ReportTicket};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Brokerage gateway client.
pub struct GatewayBroker {
    base_url: String,
    client_id: u32,
    read_only: bool,
    http: reqwest::Client,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct SubmitBody<'a> {
    client_id: u32,
    intent: &'a OrderIntent,
    token_id: String,
    intent_hash: &'a str,
}

impl GatewayBroker {
    /// Create a gateway client.
    #[must_use]
    pub fn new(base_url: impl Into<String>, client_id: u32, read_only: bool) -> Self {
        Self {
            base_url: base_url.into(),
            client_id,
            read_only,
            http: reqwest::Client::new(),
            breaker: Arc::new(CircuitBreaker::new("broker", CircuitBreakerConfig::broker())),
            retry: RetryPolicy::default(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn check_breaker(&self) -> Result<(), BrokerError> {
        if self.breaker.is_call_permitted() {
            Ok(())
        } else {
            Err(BrokerError::CircuitOpen(self.breaker.cooldown_remaining()))
        }
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<T, BrokerError> {
        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| {
                self.breaker.record_failure();
                BrokerError::Timeout(timeout)
            })?
            .map_err(|e| {
                self.breaker.record_failure();
                BrokerError::Api(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            if is_retryable_status(status.as_u16()) {
                self.breaker.record_failure();
            } else {
                // A clean 4xx means the gateway is reachable.
                self.breaker.record_success();
            }
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                404 => BrokerError::OrderNotFound(body),
                400 | 422 => BrokerError::Rejected(body),
                _ => BrokerError::Api(format!("{status}: {body}")),
            });
        }

        self.breaker.record_success();
        response
            .json::<T>()
            .await
            .map_err(|e| BrokerError::Api(format!("bad gateway payload: {e}")))
    }

    /// GET with deadline, retrying retryable failures with backoff.
    async fn get_with_retry<T: DeserializeOwned>(&self, path: &str) -> Result<T, BrokerError> {
        self.check_breaker()?;
        let mut backoff = BackoffCalculator::new(&self.retry);
        loop {
            let request = self.http.get(self.url(path));
            match self.execute::<T>(request, READ_TIMEOUT).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() => {
                    let Some(delay) = backoff.next_backoff() else {
                        return Err(err);
                    };
                    tracing::warn!(
                        path,
                        attempt = backoff.current_attempt(),
                        error = %err,
                        "retrying broker read"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// POST with deadline. Writes are never retried here; the caller decides.
    async fn post_once<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, BrokerError> {
        self.check_breaker()?;
        let request = self.http.post(self.url(path)).json(body);
        self.execute::<T>(request, WRITE_TIMEOUT).await
    }
}

#[async_trait]
impl BrokerAdapter for GatewayBroker {
    async fn get_portfolio(&self, account_id: &str) -> Result<Portfolio, BrokerError> {
        self.get_with_retry(&format!("/v1/accounts/{account_id}/portfolio"))
            .await
    }

    async fn get_positions(&self, account_id: &str) -> Result<Vec<Position>, BrokerError> {
        self.get_with_retry(&format!("/v1/accounts/{account_id}/positions"))
            .await
    }

    async fn get_cash(&self, account_id: &str) -> Result<Vec<Cash>, BrokerError> {
        self.get_with_retry(&format!("/v1/accounts/{account_id}/cash"))
            .await
    }

    async fn get_open_orders(&self, account_id: &str) -> Result<Vec<OpenOrder>, BrokerError> {
        self.get_with_retry(&format!("/v1/accounts/{account_id}/orders"))
            .await
    }

    async fn get_market_snapshot(
        &self,
        instrument: &Instrument,
    ) -> Result<MarketSnapshot, BrokerError> {
        self.get_with_retry(&format!(
            "/v1/market/{}/snapshot?currency={}",
            instrument.symbol, instrument.currency
        ))
        .await
    }

    async fn get_market_bars(
        &self,
        instrument: &Instrument,
        timeframe: &str,
        limit: usize,
    ) -> Result<Vec<Bar>, BrokerError> {
        self.get_with_retry(&format!(
            "/v1/market/{}/bars?timeframe={timeframe}&limit={limit}",
            instrument.symbol
        ))
        .await
    }

    async fn instrument_search(
        &self,
        query: &str,
        filters: &SearchFilters,
    ) -> Result<Vec<InstrumentCandidate>, BrokerError> {
        #[derive(Serialize)]
        struct SearchBody<'a> {
            query: &'a str,
            filters: &'a SearchFilters,
        }
        self.post_once("/v1/instruments/search", &SearchBody { query, filters })
            .await
    }

    async fn instrument_resolve(&self, hint: &InstrumentHint) -> Result<Instrument, BrokerError> {
        self.post_once("/v1/instruments/resolve", hint).await
    }

    async fn submit_order(
        &self,
        intent: &OrderIntent,
        token: &ApprovalToken,
    ) -> Result<OpenOrder, BrokerError> {
        if self.read_only {
            return Err(BrokerError::ReadOnly("submit_order"));
        }
        let body = SubmitBody {
            client_id: self.client_id,
            intent,
            token_id: token.token_id.to_string(),
            intent_hash: &token.intent_hash,
        };
        self.post_once("/v1/orders", &body).await
    }

    async fn cancel_order(&self, broker_order_id: &str) -> Result<OpenOrder, BrokerError> {
        if self.read_only {
            return Err(BrokerError::ReadOnly("cancel_order"));
        }
        self.post_once(
            &format!("/v1/orders/{broker_order_id}/cancel"),
            &serde_json::json!({"client_id": self.client_id}),
        )
        .await
    }

    async fn get_order_status(&self, broker_order_id: &str) -> Result<OpenOrder, BrokerError> {
        self.get_with_retry(&format!("/v1/orders/{broker_order_id}"))
            .await
    }

    async fn request_report(&self, query_id: &str) -> Result<ReportTicket, BrokerError> {
        #[derive(serde::Deserialize)]
        struct TicketBody {
            reference: String,
        }
        let body: TicketBody = self
            .post_once(
                &format!("/v1/reports/{query_id}/run"),
                &serde_json::json!({"client_id": self.client_id}),
            )
            .await?;
        Ok(ReportTicket {
            query_id: query_id.to_string(),
            reference: body.reference,
        })
    }

    async fn fetch_report(&self, ticket: &ReportTicket) -> Result<Option<Vec<u8>>, BrokerError> {
        self.check_breaker()?;
        let request = self
            .http
            .get(self.url(&format!("/v1/reports/result/{}", ticket.reference)));
        let response = tokio::time::timeout(READ_TIMEOUT, request.send())
            .await
            .map_err(|_| BrokerError::Timeout(READ_TIMEOUT))?
            .map_err(|e| {
                self.breaker.record_failure();
                BrokerError::Api(e.to_string())
            })?;

        match response.status().as_u16() {
            202 => {
                self.breaker.record_success();
                Ok(None)
            }
            200 => {
                self.breaker.record_success();
                let bytes = response
                    .bytes()
                    .await
                    .map_err(|e| BrokerError::Api(e.to_string()))?;
                Ok(Some(bytes.to_vec()))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(BrokerError::Api(format!("{status}: {body}")))
            }
        }
    }

    async fn health_check(&self) -> Result<(), BrokerError> {
        self.get_with_retry::<serde_json::Value>("/v1/health")
            .await
            .map(|_| ())
    }

    fn broker_name(&self) -> &'static str {
        "gateway"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn read_only_blocks_writes_without_network() {
        let broker = GatewayBroker::new("http://127.0.0.1:1", 1, true);
        let intent = OrderIntent {
            account_id: "DU123456".to_string(),
            instrument: Instrument::stock("AAPL"),
            side: crate::models::OrderSide::Buy,
            order_type: crate::models::OrderType::Mkt,
            quantity: rust_decimal::Decimal::ONE,
            limit_price: None,
            stop_price: None,
            time_in_force: crate::models::TimeInForce::Day,
            reason: "Portfolio rebalance to target allocation".to_string(),
            strategy_tag: "manual".to_string(),
            constraints: None,
        };
        let proposal =
            crate::models::OrderProposal::new(intent.clone(), "c".to_string(), chrono::Utc::now());
        let token = crate::models::ApprovalToken::issue(
            &proposal,
            chrono::Duration::minutes(5),
            chrono::Utc::now(),
        );

        let result = broker.submit_order(&intent, &token).await;
        assert!(matches!(result, Err(BrokerError::ReadOnly(_))));
    }

    #[test]
    fn urls_are_composed_from_base() {
        let broker = GatewayBroker::new("http://broker:4002", 7, false);
        assert_eq!(
            broker.url("/v1/health"),
            "http://broker:4002/v1/health"
        );
    }
}
