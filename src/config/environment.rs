//! Trading environment.

use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Trading environment. Beyond the gateway address and the read-only flag,
/// live and paper differ in configuration only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Local development against the mock broker.
    Dev,
    /// Paper trading account.
    Paper,
    /// Live trading account.
    Live,
}

impl Environment {
    /// Parse an environment name.
    ///
    /// # Errors
    ///
    /// Returns a validation error for anything other than
    /// `dev`/`paper`/`live` (case-insensitive).
    pub fn parse(value: &str) -> Result<Self, GateError> {
        match value.to_lowercase().as_str() {
            "dev" => Ok(Self::Dev),
            "paper" => Ok(Self::Paper),
            "live" => Ok(Self::Live),
            other => Err(GateError::validation(
                "BAD_ENVIRONMENT",
                format!("unknown environment {other:?}, expected dev|paper|live"),
            )),
        }
    }

    /// Whether this environment talks to a real brokerage account.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        matches!(self, Self::Live)
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dev => write!(f, "dev"),
            Self::Paper => write!(f, "paper"),
            Self::Live => write!(f, "live"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_known_names() {
        assert_eq!(Environment::parse("dev").unwrap(), Environment::Dev);
        assert_eq!(Environment::parse("PAPER").unwrap(), Environment::Paper);
        assert_eq!(Environment::parse("live").unwrap(), Environment::Live);
    }

    #[test]
    fn parse_rejects_unknown_names() {
        assert!(Environment::parse("staging").is_err());
    }

    #[test]
    fn only_live_is_live() {
        assert!(Environment::Live.is_live());
        assert!(!Environment::Paper.is_live());
    }
}
