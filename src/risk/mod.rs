//! Risk policy engine.
//!
//! Twelve deterministic rules (R1-R12) gate every proposal between
//! simulation and approval. Rules are configured from a YAML policy
//! document that can be hot-reloaded; disabled rules always pass.

mod engine;
mod limits;
mod policy;

pub use engine::{RiskEngine, VolatilityMetrics};
pub use limits::{
    AdvancedLimits, Decision, RiskDecision, RiskPolicy, RuleConfig, RuleSet, Severity,
    TradingHours, VolatilityProviderConfig,
};
pub use policy::PolicyStore;
