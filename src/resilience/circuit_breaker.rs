//! Circuit breaker for external call protection.
//!
//! Prevents cascading failures and thrashing when a downstream (the broker
//! gateway, or a caller abusing the tool surface) keeps failing.
//!
//! # State Machine
//!
//! ```text
//! CLOSED → OPEN (consecutive failures >= threshold)
//! OPEN → HALF_OPEN (cooldown elapsed)
//! HALF_OPEN → CLOSED (probe call succeeds)
//! HALF_OPEN → OPEN (probe call fails)
//! ```

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitBreakerState {
    /// Calls flow normally.
    Closed,
    /// Calls are rejected.
    Open,
    /// A limited probe is allowed through.
    HalfOpen,
}

impl std::fmt::Display for CircuitBreakerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "CLOSED"),
            Self::Open => write!(f, "OPEN"),
            Self::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Time to stay open before allowing a probe.
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }
}

impl CircuitBreakerConfig {
    /// Configuration for the brokerage gateway connection.
    #[must_use]
    pub const fn broker() -> Self {
        Self {
            failure_threshold: 5,
            cooldown: Duration::from_secs(30),
        }
    }

    /// Configuration for the tool gateway denial breaker.
    #[must_use]
    pub const fn tool_gateway() -> Self {
        Self {
            failure_threshold: 100,
            cooldown: Duration::from_secs(300),
        }
    }
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitBreakerState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

/// Consecutive-failure circuit breaker.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a new breaker.
    #[must_use]
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerInner {
                state: CircuitBreakerState::Closed,
                consecutive_failures: 0,
                opened_at: None,
            }),
        }
    }

    /// Breaker name, for logging.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state, applying the cooldown transition.
    #[must_use]
    pub fn state(&self) -> CircuitBreakerState {
        let mut inner = self.inner.lock();
        Self::apply_cooldown(&mut inner, &self.config);
        inner.state
    }

    /// Whether a call is currently permitted.
    #[must_use]
    pub fn is_call_permitted(&self) -> bool {
        let mut inner = self.inner.lock();
        Self::apply_cooldown(&mut inner, &self.config);
        matches!(
            inner.state,
            CircuitBreakerState::Closed | CircuitBreakerState::HalfOpen
        )
    }

    /// Seconds remaining in the open cooldown, zero otherwise.
    #[must_use]
    pub fn cooldown_remaining(&self) -> Duration {
        let inner = self.inner.lock();
        match (inner.state, inner.opened_at) {
            (CircuitBreakerState::Open, Some(opened)) => {
                self.config.cooldown.saturating_sub(opened.elapsed())
            }
            _ => Duration::ZERO,
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitBreakerState::HalfOpen {
            tracing::info!(name = %self.name, "circuit breaker closed after successful probe");
        }
        inner.state = CircuitBreakerState::Closed;
        inner.consecutive_failures = 0;
        inner.opened_at = None;
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let mut inner = self.inner.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);

        let should_open = match inner.state {
            CircuitBreakerState::HalfOpen => true,
            CircuitBreakerState::Closed => {
                inner.consecutive_failures >= self.config.failure_threshold
            }
            CircuitBreakerState::Open => false,
        };

        if should_open {
            inner.state = CircuitBreakerState::Open;
            inner.opened_at = Some(Instant::now());
            tracing::warn!(
                name = %self.name,
                consecutive_failures = inner.consecutive_failures,
                cooldown_secs = self.config.cooldown.as_secs(),
                "circuit breaker opened"
            );
        }
    }

    fn apply_cooldown(inner: &mut BreakerInner, config: &CircuitBreakerConfig) {
        if inner.state == CircuitBreakerState::Open
            && let Some(opened) = inner.opened_at
            && opened.elapsed() >= config.cooldown
        {
            inner.state = CircuitBreakerState::HalfOpen;
        }
    }
}
