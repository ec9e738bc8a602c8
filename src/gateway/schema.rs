//! Strict input schemas for the tool surface.
//!
//! Each tool has a fixed field set: unknown fields are rejected (in strict
//! mode), types are exact - decimals for money, regex-constrained strings
//! for symbols and accounts, enum-constrained enumerations. Violations are
//! denied with `VALIDATION_FAILED`.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use rust_decimal::Decimal;
use serde_json::Value;

use crate::error::GateError;

static SYMBOL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][A-Z0-9.]{0,11}$").unwrap_or_else(|_| unreachable!()));
static ACCOUNT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z0-9]{4,16}$").unwrap_or_else(|_| unreachable!()));
static CURRENCY_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z]{3}$").unwrap_or_else(|_| unreachable!()));

/// The type a field must conform to.
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Free-form string with a length cap.
    Text {
        /// Maximum length in characters.
        max_len: usize,
    },
    /// Ticker symbol, `^[A-Z][A-Z0-9.]{0,11}$`.
    Symbol,
    /// Account id, `^[A-Z0-9]{4,16}$`.
    AccountId,
    /// ISO currency code, `^[A-Z]{3}$`.
    Currency,
    /// Money or quantity: a JSON string parsing as a decimal, or a number.
    Money,
    /// Unsigned integer.
    UInt,
    /// Boolean.
    Bool,
    /// One of a fixed set of values.
    Choice(&'static [&'static str]),
}

/// One field of a tool schema.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// Field name.
    pub name: &'static str,
    /// Expected type.
    pub kind: FieldKind,
    /// Whether the field must be present.
    pub required: bool,
}

impl FieldSpec {
    const fn required(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: true,
        }
    }

    const fn optional(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
        }
    }
}

/// Input schema for one tool.
#[derive(Debug, Clone)]
pub struct ToolSchema {
    fields: Vec<FieldSpec>,
}

impl ToolSchema {
    /// Build a schema from field specs.
    #[must_use]
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// Validate a parameter map against the schema.
    ///
    /// In strict mode unknown fields are rejected; otherwise they are
    /// ignored. Required fields and types are always enforced.
    ///
    /// # Errors
    ///
    /// `VALIDATION_FAILED` naming the offending field.
    pub fn validate(
        &self,
        params: &serde_json::Map<String, Value>,
        strict: bool,
    ) -> Result<(), GateError> {
        if strict {
            for key in params.keys() {
                if !self.fields.iter().any(|f| f.name == key) {
                    return Err(GateError::gateway_denied(
                        "VALIDATION_FAILED",
                        format!("unknown field {key:?}"),
                    )
                    .with_context("field", key.clone()));
                }
            }
        }

        for spec in &self.fields {
            match params.get(spec.name) {
                None | Some(Value::Null) => {
                    if spec.required {
                        return Err(GateError::gateway_denied(
                            "VALIDATION_FAILED",
                            format!("missing required field {:?}", spec.name),
                        )
                        .with_context("field", spec.name));
                    }
                }
                Some(value) => Self::check_kind(spec, value)?,
            }
        }
        Ok(())
    }

    fn check_kind(spec: &FieldSpec, value: &Value) -> Result<(), GateError> {
        let fail = |expected: &str| {
            Err(GateError::gateway_denied(
                "VALIDATION_FAILED",
                format!("field {:?} must be {expected}", spec.name),
            )
            .with_context("field", spec.name))
        };

        match &spec.kind {
            FieldKind::Text { max_len } => match value.as_str() {
                Some(s) if s.len() <= *max_len => Ok(()),
                Some(_) => fail(&format!("at most {max_len} characters")),
                None => fail("a string"),
            },
            FieldKind::Symbol => match value.as_str() {
                Some(s) if SYMBOL_RE.is_match(s) => Ok(()),
                _ => fail("an uppercase ticker symbol"),
            },
            FieldKind::AccountId => match value.as_str() {
                Some(s) if ACCOUNT_RE.is_match(s) => Ok(()),
                _ => fail("an account id"),
            },
            FieldKind::Currency => match value.as_str() {
                Some(s) if CURRENCY_RE.is_match(s) => Ok(()),
                _ => fail("a 3-letter currency code"),
            },
            FieldKind::Money => {
                let parses = match value {
                    Value::String(s) => s.parse::<Decimal>().is_ok(),
                    Value::Number(n) => n.to_string().parse::<Decimal>().is_ok(),
                    _ => false,
                };
                if parses { Ok(()) } else { fail("a decimal") }
            }
            FieldKind::UInt => {
                if value.as_u64().is_some() {
                    Ok(())
                } else {
                    fail("an unsigned integer")
                }
            }
            FieldKind::Bool => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    fail("a boolean")
                }
            }
            FieldKind::Choice(options) => match value.as_str() {
                Some(s) if options.contains(&s) => Ok(()),
                _ => fail(&format!("one of {options:?}")),
            },
        }
    }
}

const SIDES: &[&str] = &["BUY", "SELL"];
const ORDER_TYPES: &[&str] = &["MKT", "LMT", "STP", "STP_LMT"];
const TIFS: &[&str] = &["DAY", "GTC", "IOC", "FOK"];
const TIMEFRAMES: &[&str] = &["1m", "5m", "15m", "1h", "1d"];
const INSTRUMENT_TYPES: &[&str] = &["STK", "ETF", "FUT", "FX", "CRYPTO"];

fn order_fields() -> Vec<FieldSpec> {
    vec![
        FieldSpec::required("account_id", FieldKind::AccountId),
        FieldSpec::required("symbol", FieldKind::Symbol),
        FieldSpec::required("side", FieldKind::Choice(SIDES)),
        FieldSpec::required("quantity", FieldKind::Money),
        FieldSpec::required("order_type", FieldKind::Choice(ORDER_TYPES)),
        FieldSpec::optional("limit_price", FieldKind::Money),
        FieldSpec::optional("stop_price", FieldKind::Money),
        FieldSpec::optional("time_in_force", FieldKind::Choice(TIFS)),
        FieldSpec::required("reason", FieldKind::Text { max_len: 500 }),
        FieldSpec::optional("strategy_tag", FieldKind::Text { max_len: 50 }),
        FieldSpec::optional("instrument_type", FieldKind::Choice(INSTRUMENT_TYPES)),
        FieldSpec::optional("currency", FieldKind::Currency),
        FieldSpec::optional("exchange", FieldKind::Text { max_len: 16 }),
        FieldSpec::optional("max_slippage_bps", FieldKind::UInt),
        FieldSpec::optional("max_notional", FieldKind::Money),
    ]
}

/// Default schemas for every exposed tool.
#[must_use]
pub fn default_schemas() -> HashMap<&'static str, ToolSchema> {
    let mut schemas = HashMap::new();

    for tool in ["get_portfolio", "get_positions", "get_cash", "get_open_orders"] {
        schemas.insert(
            tool,
            ToolSchema::new(vec![FieldSpec::required("account_id", FieldKind::AccountId)]),
        );
    }

    schemas.insert(
        "get_market_snapshot",
        ToolSchema::new(vec![
            FieldSpec::required("symbol", FieldKind::Symbol),
            FieldSpec::optional("currency", FieldKind::Currency),
        ]),
    );
    schemas.insert(
        "get_market_bars",
        ToolSchema::new(vec![
            FieldSpec::required("symbol", FieldKind::Symbol),
            FieldSpec::required("timeframe", FieldKind::Choice(TIMEFRAMES)),
            FieldSpec::optional("limit", FieldKind::UInt),
        ]),
    );
    schemas.insert(
        "instrument_search",
        ToolSchema::new(vec![
            FieldSpec::optional("q", FieldKind::Text { max_len: 64 }),
            FieldSpec::optional("type", FieldKind::Choice(INSTRUMENT_TYPES)),
            FieldSpec::optional("exchange", FieldKind::Text { max_len: 16 }),
            FieldSpec::optional("currency", FieldKind::Currency),
            FieldSpec::optional("limit", FieldKind::UInt),
        ]),
    );
    schemas.insert(
        "instrument_resolve",
        ToolSchema::new(vec![
            FieldSpec::optional("con_id", FieldKind::UInt),
            FieldSpec::optional("symbol", FieldKind::Text { max_len: 64 }),
            FieldSpec::optional("instrument_type", FieldKind::Choice(INSTRUMENT_TYPES)),
        ]),
    );

    schemas.insert("simulate_order", ToolSchema::new(order_fields()));
    schemas.insert("evaluate_risk", ToolSchema::new(order_fields()));
    schemas.insert("request_approval", ToolSchema::new(order_fields()));

    schemas.insert(
        "request_order_cancel",
        ToolSchema::new(vec![
            FieldSpec::required("broker_order_id", FieldKind::Text { max_len: 64 }),
            FieldSpec::required("reason", FieldKind::Text { max_len: 500 }),
        ]),
    );
    schemas.insert(
        "request_order_modify",
        ToolSchema::new(vec![
            FieldSpec::required("broker_order_id", FieldKind::Text { max_len: 64 }),
            FieldSpec::required("reason", FieldKind::Text { max_len: 500 }),
            FieldSpec::optional("quantity", FieldKind::Money),
            FieldSpec::optional("limit_price", FieldKind::Money),
            FieldSpec::optional("stop_price", FieldKind::Money),
            FieldSpec::optional("time_in_force", FieldKind::Choice(TIFS)),
        ]),
    );

    schemas
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(json: serde_json::Value) -> serde_json::Map<String, Value> {
        json.as_object().cloned().unwrap_or_default()
    }

    fn order_schema() -> ToolSchema {
        ToolSchema::new(order_fields())
    }

    fn valid_order() -> serde_json::Map<String, Value> {
        params(serde_json::json!({
            "account_id": "DU123456",
            "symbol": "AAPL",
            "side": "BUY",
            "quantity": "10",
            "order_type": "MKT",
            "reason": "Portfolio rebalance to target allocation",
        }))
    }

    #[test]
    fn valid_order_passes() {
        assert!(order_schema().validate(&valid_order(), true).is_ok());
    }

    #[test]
    fn unknown_field_rejected_in_strict_mode() {
        let mut p = valid_order();
        p.insert("bypass_checks".to_string(), serde_json::json!(true));
        let err = order_schema().validate(&p, true).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_FAILED");
        assert!(err.message().contains("bypass_checks"));

        // Lax mode ignores the extra field.
        assert!(order_schema().validate(&p, false).is_ok());
    }

    #[test]
    fn missing_required_field_rejected() {
        let mut p = valid_order();
        p.remove("reason");
        let err = order_schema().validate(&p, true).unwrap_err();
        assert!(err.message().contains("reason"));
    }

    #[test]
    fn symbol_regex_is_enforced() {
        let mut p = valid_order();
        p.insert("symbol".to_string(), serde_json::json!("aapl"));
        assert!(order_schema().validate(&p, true).is_err());

        p.insert("symbol".to_string(), serde_json::json!("BRK.B"));
        assert!(order_schema().validate(&p, true).is_ok());

        p.insert(
            "symbol".to_string(),
            serde_json::json!("WAYTOOLONGSYMBOL"),
        );
        assert!(order_schema().validate(&p, true).is_err());
    }

    #[test]
    fn money_accepts_string_and_number() {
        let mut p = valid_order();
        p.insert("quantity".to_string(), serde_json::json!(10.5));
        assert!(order_schema().validate(&p, true).is_ok());

        p.insert("quantity".to_string(), serde_json::json!("10.5"));
        assert!(order_schema().validate(&p, true).is_ok());

        p.insert("quantity".to_string(), serde_json::json!("ten"));
        assert!(order_schema().validate(&p, true).is_err());
    }

    #[test]
    fn enum_values_are_exact() {
        let mut p = valid_order();
        p.insert("side".to_string(), serde_json::json!("buy"));
        assert!(order_schema().validate(&p, true).is_err());

        p.insert("side".to_string(), serde_json::json!("SELL"));
        assert!(order_schema().validate(&p, true).is_ok());
    }

    #[test]
    fn every_exposed_tool_has_a_schema() {
        let schemas = default_schemas();
        for tool in super::super::READ_TOOLS
            .iter()
            .chain(super::super::WRITE_TOOLS)
        {
            assert!(schemas.contains_key(tool), "missing schema for {tool}");
        }
    }
}
