//! Rate limiting for the tool surface.
//!
//! Sliding one-minute windows over three dimensions - per-tool, per-session,
//! global - plus a circuit breaker that opens after a run of consecutive
//! denials and rejects everything for a cooldown, protecting the gate from
//! callers that keep hammering after being told no.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::error::GateError;
use crate::resilience::{CircuitBreaker, CircuitBreakerConfig};

/// Rate limit configuration.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    /// Calls per minute per tool.
    pub per_tool_per_minute: u32,
    /// Calls per minute per session.
    pub per_session_per_minute: u32,
    /// Calls per minute across all sessions.
    pub global_per_minute: u32,
    /// Consecutive denials that open the breaker.
    pub breaker_threshold: u32,
    /// How long the breaker stays open.
    pub breaker_cooldown: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_tool_per_minute: 60,
            per_session_per_minute: 100,
            global_per_minute: 1000,
            breaker_threshold: 100,
            breaker_cooldown: Duration::from_secs(300),
        }
    }
}

const WINDOW: Duration = Duration::from_secs(60);

/// Sliding-window rate limiter with a denial circuit breaker.
pub struct RateLimiter {
    config: RateLimitConfig,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
    breaker: CircuitBreaker,
}

impl RateLimiter {
    /// Create a limiter.
    #[must_use]
    pub fn new(config: RateLimitConfig) -> Self {
        let breaker = CircuitBreaker::new(
            "tool-gateway",
            CircuitBreakerConfig {
                failure_threshold: config.breaker_threshold,
                cooldown: config.breaker_cooldown,
            },
        );
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
            breaker,
        }
    }

    /// Check and record one call.
    ///
    /// # Errors
    ///
    /// `BREAKER_OPEN` while the denial breaker is open (regardless of
    /// budget), `RATE_LIMITED` naming the exhausted dimension otherwise.
    pub fn check(&self, tool_name: &str, session_id: &str) -> Result<(), GateError> {
        if !self.breaker.is_call_permitted() {
            return Err(GateError::gateway_denied(
                "BREAKER_OPEN",
                format!(
                    "tool gateway circuit breaker is open, retry in {}s",
                    self.breaker.cooldown_remaining().as_secs()
                ),
            ));
        }

        let now = Instant::now();
        let checks = [
            (format!("tool:{tool_name}"), self.config.per_tool_per_minute),
            (
                format!("session:{session_id}"),
                self.config.per_session_per_minute,
            ),
            ("global".to_string(), self.config.global_per_minute),
        ];

        let mut windows = self.windows.lock();
        for (key, limit) in &checks {
            let window = windows.entry(key.clone()).or_default();
            while let Some(front) = window.front() {
                if now.duration_since(*front) >= WINDOW {
                    window.pop_front();
                } else {
                    break;
                }
            }
            if window.len() >= *limit as usize {
                drop(windows);
                self.breaker.record_failure();
                tracing::warn!(key, limit, "tool call rate limited");
                return Err(GateError::gateway_denied(
                    "RATE_LIMITED",
                    format!("rate limit exceeded for {key}: {limit}/min"),
                )
                .with_context("dimension", key.clone()));
            }
        }

        for (key, _) in &checks {
            if let Some(window) = windows.get_mut(key) {
                window.push_back(now);
            }
        }
        drop(windows);
        self.breaker.record_success();
        Ok(())
    }

    /// Current denial-breaker state, for health reporting.
    #[must_use]
    pub fn breaker_state(&self) -> crate::resilience::CircuitBreakerState {
        self.breaker.state()
    }
}
