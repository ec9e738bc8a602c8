//! Configuration for the trading gate.
//!
//! Settings are loaded from environment variables at startup and passed into
//! the [`crate::core::Core`] aggregate; nothing reads the environment after
//! construction except the kill switch override, which by design wins over
//! stored state.
//!
//! # Recognized variables
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `ENV` | `dev` | `dev`, `paper`, or `live` |
//! | `BROKER_HOST` | `127.0.0.1` | Brokerage gateway host |
//! | `BROKER_PORT` | `4002` | Brokerage gateway port |
//! | `BROKER_CLIENT_ID` | `1` | Client id sent to the gateway |
//! | `READONLY_MODE` | `false` | Fail broker writes locally |
//! | `AUTO_APPROVAL` | `false` | Enable the auto-approval policy |
//! | `AUTO_APPROVAL_MAX_NOTIONAL` | `1000` | Auto-approval notional ceiling |
//! | `STRICT_VALIDATION` | `true` | Reject unknown fields in tool inputs |
//! | `RISK_POLICY_PATH` | `risk_policy.yml` | YAML risk policy document |
//! | `RATE_LIMIT_PER_TOOL` | `60` | Tool gateway per-tool calls/minute |
//! | `RATE_LIMIT_PER_SESSION` | `100` | Tool gateway per-session calls/minute |
//! | `RATE_LIMIT_GLOBAL` | `1000` | Tool gateway global calls/minute |
//! | `SCHEDULER_TIMEZONE` | `UTC` | Timezone for cron schedules |
//! | `DATABASE_URL` | `./tradegate-data` | Data directory for persisted state |
//! | `HTTP_ADDR` | `127.0.0.1:8080` | REST listen address |
//! | `LOG_LEVEL` | `info` | Tracing filter (read by telemetry) |
//!
//! `KILL_SWITCH_ENABLED` / `KILL_SWITCH_REASON` are read by
//! [`crate::safety::KillSwitch`] directly.

mod environment;

pub use environment::Environment;

use std::path::PathBuf;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Parse a boolean environment value the permissive way (`true`/`1`/`yes`).
#[must_use]
pub fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(false)
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Runtime feature flags exposed at `/api/v1/feature-flags`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Auto-approval policy enabled.
    pub auto_approval: bool,
    /// Notional ceiling for auto-approval.
    pub auto_approval_max_notional: Decimal,
    /// Reject unknown fields in tool inputs.
    pub strict_validation: bool,
    /// Broker writes fail locally.
    pub read_only: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            auto_approval: false,
            auto_approval_max_notional: Decimal::new(1000, 0),
            strict_validation: true,
            read_only: false,
        }
    }
}

/// Top-level settings, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Trading environment.
    pub environment: Environment,
    /// Brokerage gateway host.
    pub broker_host: String,
    /// Brokerage gateway port.
    pub broker_port: u16,
    /// Client id sent to the gateway.
    pub broker_client_id: u32,
    /// Feature flags.
    pub flags: FeatureFlags,
    /// Path to the YAML risk policy.
    pub risk_policy_path: PathBuf,
    /// Tool gateway per-tool calls/minute.
    pub rate_limit_per_tool: u32,
    /// Tool gateway per-session calls/minute.
    pub rate_limit_per_session: u32,
    /// Tool gateway global calls/minute.
    pub rate_limit_global: u32,
    /// Timezone for cron schedules.
    pub scheduler_timezone: String,
    /// Data directory for persisted state (audit log, kill switch, exports).
    pub data_dir: PathBuf,
    /// REST listen address.
    pub http_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            environment: Environment::Dev,
            broker_host: "127.0.0.1".to_string(),
            broker_port: 4002,
            broker_client_id: 1,
            flags: FeatureFlags::default(),
            risk_policy_path: PathBuf::from("risk_policy.yml"),
            rate_limit_per_tool: 60,
            rate_limit_per_session: 100,
            rate_limit_global: 1000,
            scheduler_timezone: "UTC".to_string(),
            data_dir: PathBuf::from("./tradegate-data"),
            http_addr: "127.0.0.1:8080".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from environment variables.
    ///
    /// # Errors
    ///
    /// Returns a validation error when a variable is present but malformed
    /// (bad port, bad decimal, unknown environment name).
    pub fn from_env() -> Result<Self, GateError> {
        let environment = Environment::parse(&env_or("ENV", "dev"))?;

        let broker_port: u16 = env_or("BROKER_PORT", "4002").parse().map_err(|_| {
            GateError::validation("BAD_ENV_VAR", "BROKER_PORT must be a port number")
        })?;
        let broker_client_id: u32 = env_or("BROKER_CLIENT_ID", "1").parse().map_err(|_| {
            GateError::validation("BAD_ENV_VAR", "BROKER_CLIENT_ID must be an integer")
        })?;

        let auto_approval_max_notional: Decimal = env_or("AUTO_APPROVAL_MAX_NOTIONAL", "1000")
            .parse()
            .map_err(|_| {
                GateError::validation(
                    "BAD_ENV_VAR",
                    "AUTO_APPROVAL_MAX_NOTIONAL must be a decimal",
                )
            })?;

        let parse_rate = |name: &str, default: &str| -> Result<u32, GateError> {
            env_or(name, default).parse().map_err(|_| {
                GateError::validation("BAD_ENV_VAR", format!("{name} must be an integer"))
            })
        };

        let strict_validation = std::env::var("STRICT_VALIDATION")
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(true);

        Ok(Self {
            environment,
            broker_host: env_or("BROKER_HOST", "127.0.0.1"),
            broker_port,
            broker_client_id,
            flags: FeatureFlags {
                auto_approval: env_flag("AUTO_APPROVAL"),
                auto_approval_max_notional,
                strict_validation,
                read_only: env_flag("READONLY_MODE"),
            },
            risk_policy_path: PathBuf::from(env_or("RISK_POLICY_PATH", "risk_policy.yml")),
            rate_limit_per_tool: parse_rate("RATE_LIMIT_PER_TOOL", "60")?,
            rate_limit_per_session: parse_rate("RATE_LIMIT_PER_SESSION", "100")?,
            rate_limit_global: parse_rate("RATE_LIMIT_GLOBAL", "1000")?,
            scheduler_timezone: env_or("SCHEDULER_TIMEZONE", "UTC"),
            data_dir: PathBuf::from(env_or("DATABASE_URL", "./tradegate-data")),
            http_addr: env_or("HTTP_ADDR", "127.0.0.1:8080"),
        })
    }

    /// Base URL of the brokerage gateway.
    #[must_use]
    pub fn broker_base_url(&self) -> String {
        format!("http://{}:{}", self.broker_host, self.broker_port)
    }
}
