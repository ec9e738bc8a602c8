//! Instrument search and resolution.
//!
//! Search is fuzzy with a configurable similarity threshold (default 0.95
//! for resolution). Resolution tries, in order: broker contract id, exact
//! symbol, fuzzy match.

use serde::{Deserialize, Serialize};

use crate::models::{Instrument, InstrumentType};

/// Filters for instrument search.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    /// Restrict to an instrument type.
    #[serde(default)]
    pub instrument_type: Option<InstrumentType>,
    /// Restrict to an exchange.
    #[serde(default)]
    pub exchange: Option<String>,
    /// Restrict to a currency.
    #[serde(default)]
    pub currency: Option<String>,
    /// Maximum results.
    #[serde(default = "default_search_limit")]
    pub limit: usize,
}

fn default_search_limit() -> usize {
    20
}

/// One search result with its match score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstrumentCandidate {
    /// The matched instrument.
    pub instrument: Instrument,
    /// Similarity score in [0, 1].
    pub score: f64,
    /// Long name, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A hint to resolve into a concrete contract.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstrumentHint {
    /// Broker contract id; wins when present.
    #[serde(default)]
    pub con_id: Option<i64>,
    /// Symbol or free-text name.
    #[serde(default)]
    pub symbol: Option<String>,
    /// Expected instrument type.
    #[serde(default)]
    pub instrument_type: Option<InstrumentType>,
}

/// Similarity between a query and a candidate symbol/name, in [0, 1].
///
/// Case-insensitive. Exact match scores 1.0; a prefix scores proportionally
/// to its coverage; otherwise a normalized edit-distance ratio is used.
#[must_use]
pub fn similarity(query: &str, candidate: &str) -> f64 {
    let q = query.trim().to_uppercase();
    let c = candidate.trim().to_uppercase();
    if q.is_empty() || c.is_empty() {
        return 0.0;
    }
    if q == c {
        return 1.0;
    }
    #[allow(clippy::cast_precision_loss)]
    if c.starts_with(&q) || q.starts_with(&c) {
        let (short, long) = if q.len() < c.len() { (&q, &c) } else { (&c, &q) };
        return short.len() as f64 / long.len() as f64;
    }
    let distance = levenshtein(q.as_bytes(), c.as_bytes());
    let max_len = q.len().max(c.len());
    #[allow(clippy::cast_precision_loss)]
    {
        1.0 - distance as f64 / max_len as f64
    }
}

fn levenshtein(a: &[u8], b: &[u8]) -> usize {
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = prev[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(prev[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut prev, &mut current);
    }
    prev[b.len()]
}

/// Rank a universe of instruments against a query, best first.
///
/// An empty query is a wildcard: every instrument passing the filters is
/// returned with score 1.0.
#[must_use]
pub fn rank_candidates(
    query: &str,
    universe: &[(Instrument, Option<String>)],
    filters: &SearchFilters,
) -> Vec<InstrumentCandidate> {
    let mut candidates: Vec<InstrumentCandidate> = universe
        .iter()
        .filter(|(inst, _)| {
            filters
                .instrument_type
                .is_none_or(|t| inst.instrument_type == t)
                && filters
                    .exchange
                    .as_ref()
                    .is_none_or(|e| inst.exchange.as_deref() == Some(e.as_str()))
                && filters.currency.as_ref().is_none_or(|c| &inst.currency == c)
        })
        .map(|(inst, description)| {
            let score = if query.trim().is_empty() {
                1.0
            } else {
                let symbol_score = similarity(query, &inst.symbol);
                let name_score = description
                    .as_deref()
                    .map_or(0.0, |d| similarity(query, d));
                symbol_score.max(name_score)
            };
            InstrumentCandidate {
                instrument: inst.clone(),
                score,
                description: description.clone(),
            }
        })
        .filter(|c| c.score > 0.0)
        .collect();

    candidates.sort_by(|a, b| b.score.total_cmp(&a.score));
    candidates.truncate(filters.limit);
    candidates
}
