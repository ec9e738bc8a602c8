//! Output redaction for the tool surface.
//!
//! Masks PII-like content before a payload leaves the gateway: credential
//! fields are replaced wholesale, identifier fields keep only a suffix, and
//! free text is scrubbed of account-id, credential, email, card, and
//! SSN-like patterns.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static PATTERNS: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        // Account ids: DU123456 -> DU****56
        (r"\b(DU|U)(\d{4})(\d{2})\b", "$1****$3"),
        // Inline credentials: token=abc123... -> token="***"
        (
            r#"(?i)(token|key|secret|password|api_key)["\s:=]+([A-Za-z0-9+/]{8,})"#,
            r#"$1="***""#,
        ),
        // Email addresses: user@example.com -> u***@example.com
        (
            r"\b([A-Za-z0-9])[A-Za-z0-9._+-]+@([A-Za-z0-9.-]+\.[A-Za-z]{2,})\b",
            "$1***@$2",
        ),
        // Card-like numbers: 1234-5678-9012-3456 -> ****-****-****-3456
        (
            r"\b\d{4}-\d{4}-\d{4}-(\d{4})\b",
            "****-****-****-$1",
        ),
        // SSN-like patterns: 123-45-6789 -> ***-**-6789
        (r"\b\d{3}-\d{2}-(\d{4})\b", "***-**-$1"),
    ]
    .into_iter()
    .filter_map(|(pattern, replacement)| Regex::new(pattern).ok().map(|re| (re, replacement)))
    .collect()
});

const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "secret",
    "api_key",
    "access_token",
    "refresh_token",
    "private_key",
    "token",
    "ssn",
    "tax_id",
];

/// Redacts sensitive information from tool output.
pub struct Redactor {
    /// Field name → number of trailing characters to keep.
    partial_fields: HashMap<&'static str, usize>,
}

impl Default for Redactor {
    fn default() -> Self {
        Self {
            partial_fields: HashMap::from([
                ("account_id", 2),
                ("broker_order_id", 4),
                ("proposal_id", 8),
            ]),
        }
    }
}

impl Redactor {
    /// Redact a JSON payload, returning the masked copy.
    #[must_use]
    pub fn redact(&self, value: Value) -> Value {
        match value {
            Value::String(s) => Value::String(Self::redact_text(&s)),
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.redact(v)).collect())
            }
            Value::Object(map) => {
                let mut out = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    let key_lower = key.to_lowercase();
                    if SENSITIVE_FIELDS.contains(&key_lower.as_str()) {
                        out.insert(key, Value::String("***REDACTED***".to_string()));
                    } else if let (Some(keep), Value::String(s)) =
                        (self.partial_fields.get(key_lower.as_str()), &value)
                    {
                        out.insert(key, Value::String(mask_except_suffix(s, *keep)));
                    } else {
                        out.insert(key, self.redact(value));
                    }
                }
                Value::Object(out)
            }
            primitive => primitive,
        }
    }

    fn redact_text(text: &str) -> String {
        let mut result = text.to_string();
        for (pattern, replacement) in PATTERNS.iter() {
            result = pattern.replace_all(&result, *replacement).into_owned();
        }
        result
    }
}

fn mask_except_suffix(value: &str, keep: usize) -> String {
    if value.len() <= keep {
        return value.to_string();
    }
    let suffix_start = value.len() - keep;
    format!("{}{}", "*".repeat(suffix_start), &value[suffix_start..])
}
