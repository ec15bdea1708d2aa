// SPDX-FileCopyrightText: 2026 Carevault Contributors
//
// SPDX-License-Identifier: GPL-3.0-or-later

//! Deterministic per-field conflict resolution.
//!
//! Given two divergent versions of a document, each field is merged
//! independently according to a strategy table. Resolution is a pure
//! function of the two inputs and the table, so both sides of a sync pair
//! converge on the same merged document without coordination.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Field name carrying the document-level modification timestamp.
pub const UPDATED_AT_FIELD: &str = "updated_at";

/// Separator used when `Union` concatenates two strings.
const UNION_STRING_SEPARATOR: &str = "\n";

/// How to merge a single field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Keep the field from whichever document was updated later.
    Latest,
    /// Keep the numerically greater value (severity ranks and the like).
    Highest,
    /// Combine both values: array set-union in first-seen order, string
    /// concatenation, or shallow object merge with remote winning on
    /// colliding keys.
    Union,
    /// Keep the chronologically later timestamp value.
    Max,
}

/// Per-field strategy table.
///
/// Fields without an entry fall back to [`MergeStrategy::Latest`] decided
/// by the whole-document `updated_at`.
#[derive(Debug, Clone, Default)]
pub struct StrategyTable {
    fields: HashMap<String, MergeStrategy>,
}

impl StrategyTable {
    pub fn new() -> Self {
        StrategyTable {
            fields: HashMap::new(),
        }
    }

    /// Assigns a strategy to a field. Builder-style.
    pub fn with_field(mut self, field: &str, strategy: MergeStrategy) -> Self {
        self.fields.insert(field.to_string(), strategy);
        self
    }

    pub fn strategy_for(&self, field: &str) -> MergeStrategy {
        self.fields
            .get(field)
            .copied()
            .unwrap_or(MergeStrategy::Latest)
    }
}

/// Which side the merged document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeDecision {
    /// Merged output equals the local document.
    Local,
    /// Merged output equals the remote document.
    Remote,
    /// Merged output takes fields from both sides.
    Merge,
}

/// Result of resolving one conflict.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub merged: Value,
    /// Fields whose merged value differs from the local document.
    pub changed_fields: Vec<String>,
    pub decision: MergeDecision,
}

/// Merges two divergent versions of a document field-by-field.
///
/// Non-object documents cannot be merged per field and fall back to
/// whole-document `Latest`.
pub fn resolve(local: &Value, remote: &Value, table: &StrategyTable) -> MergeOutcome {
    let (local_map, remote_map) = match (local.as_object(), remote.as_object()) {
        (Some(l), Some(r)) => (l, r),
        _ => {
            let remote_is_later = updated_at(remote) >= updated_at(local);
            let merged = if remote_is_later { remote } else { local };
            return outcome_for(local, remote, merged.clone());
        }
    };

    let remote_is_later = updated_at(remote) >= updated_at(local);

    let mut merged = Map::new();
    for field in field_order(local_map, remote_map) {
        let value = merge_field(
            &field,
            local_map.get(&field),
            remote_map.get(&field),
            table.strategy_for(&field),
            remote_is_later,
        );
        merged.insert(field, value);
    }

    outcome_for(local, remote, Value::Object(merged))
}

fn outcome_for(local: &Value, remote: &Value, merged: Value) -> MergeOutcome {
    let decision = if merged == *local {
        MergeDecision::Local
    } else if merged == *remote {
        MergeDecision::Remote
    } else {
        MergeDecision::Merge
    };

    let changed_fields = match (merged.as_object(), local.as_object()) {
        (Some(m), Some(l)) => m
            .iter()
            .filter(|(k, v)| l.get(*k) != Some(v))
            .map(|(k, _)| k.clone())
            .collect(),
        _ => Vec::new(),
    };

    MergeOutcome {
        merged,
        changed_fields,
        decision,
    }
}

/// All field names from both sides, local order first, remote-only
/// fields appended in their own order.
fn field_order(local: &Map<String, Value>, remote: &Map<String, Value>) -> Vec<String> {
    let mut order: Vec<String> = local.keys().cloned().collect();
    for key in remote.keys() {
        if !local.contains_key(key) {
            order.push(key.clone());
        }
    }
    order
}

fn merge_field(
    field: &str,
    local: Option<&Value>,
    remote: Option<&Value>,
    strategy: MergeStrategy,
    remote_is_later: bool,
) -> Value {
    let (local, remote) = match (local, remote) {
        (Some(l), Some(r)) => (l, r),
        // A field present on one side only always survives
        (Some(l), None) => return l.clone(),
        (None, Some(r)) => return r.clone(),
        (None, None) => return Value::Null,
    };

    if local == remote {
        return local.clone();
    }

    match strategy {
        MergeStrategy::Latest => {
            if remote_is_later {
                remote.clone()
            } else {
                local.clone()
            }
        }
        MergeStrategy::Highest => {
            if compare_ordinal(remote, local) == std::cmp::Ordering::Greater {
                remote.clone()
            } else {
                local.clone()
            }
        }
        MergeStrategy::Max => {
            if compare_timestamp(remote, local) == std::cmp::Ordering::Greater {
                remote.clone()
            } else {
                local.clone()
            }
        }
        MergeStrategy::Union => union_values(field, local, remote, remote_is_later),
    }
}

fn union_values(field: &str, local: &Value, remote: &Value, remote_is_later: bool) -> Value {
    match (local, remote) {
        (Value::Array(l), Value::Array(r)) => {
            let mut combined = l.clone();
            for item in r {
                if !combined.contains(item) {
                    combined.push(item.clone());
                }
            }
            Value::Array(combined)
        }
        (Value::String(l), Value::String(r)) => {
            // Order deterministically by comparing the strings themselves,
            // not by arrival side, so both peers produce the same output.
            let (first, second) = if l <= r { (l, r) } else { (r, l) };
            Value::String(format!("{}{}{}", first, UNION_STRING_SEPARATOR, second))
        }
        (Value::Object(l), Value::Object(r)) => {
            let mut combined = l.clone();
            for (key, value) in r {
                combined.insert(key.clone(), value.clone());
            }
            Value::Object(combined)
        }
        // Mixed types cannot union; fall back to latest
        _ => merge_field(
            field,
            Some(local),
            Some(remote),
            MergeStrategy::Latest,
            remote_is_later,
        ),
    }
}

/// Numeric comparison with a lexicographic fallback for ordinal strings.
fn compare_ordinal(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
        _ => compare_strings(a, b),
    }
}

/// Timestamps are either numeric epochs or ISO-8601 strings; both compare
/// correctly under their natural ordering.
fn compare_timestamp(a: &Value, b: &Value) -> std::cmp::Ordering {
    compare_ordinal(a, b)
}

fn compare_strings(a: &Value, b: &Value) -> std::cmp::Ordering {
    match (a.as_str(), b.as_str()) {
        (Some(x), Some(y)) => x.cmp(y),
        _ => std::cmp::Ordering::Equal,
    }
}

/// Document-level `updated_at` as a comparable number (0 when absent).
fn updated_at(doc: &Value) -> f64 {
    doc.get(UPDATED_AT_FIELD)
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
}
