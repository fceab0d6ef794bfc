//! Payload similarity
//!
//! Numeric payloads compare by relative closeness, everything else by token
//! overlap (Jaccard index over lowercase words).

use serde_json::Value;
use std::collections::HashSet;

/// Pluggable similarity measure used by the conflict resolver
pub trait PayloadComparator: Send + Sync {
    /// Similarity in [0, 1]; 1 means the payloads agree
    fn similarity(&self, a: &Value, b: &Value) -> f64;

    /// Numeric reading of a payload, if it has one
    fn numeric_value(&self, payload: &Value) -> Option<f64>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultComparator;

impl PayloadComparator for DefaultComparator {
    fn similarity(&self, a: &Value, b: &Value) -> f64 {
        match (self.numeric_value(a), self.numeric_value(b)) {
            (Some(x), Some(y)) => numeric_similarity(x, y),
            (None, None) => text_similarity(&payload_text(a), &payload_text(b)),
            _ => 0.0,
        }
    }

    /// A bare number, or an object carrying a numeric `value` field
    fn numeric_value(&self, payload: &Value) -> Option<f64> {
        match payload {
            Value::Number(n) => n.as_f64(),
            Value::Object(map) => map.get("value").and_then(Value::as_f64),
            _ => None,
        }
    }
}

/// `1 - |a - b| / max(|a|, |b|)`, clamped to [0, 1]
pub fn numeric_similarity(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        return 1.0;
    }
    (1.0 - (a - b).abs() / scale).clamp(0.0, 1.0)
}

/// Jaccard index over lowercase alphanumeric tokens
pub fn text_similarity(a: &str, b: &str) -> f64 {
    let left = tokens(a);
    let right = tokens(b);
    if left.is_empty() && right.is_empty() {
        return 1.0;
    }
    let intersection = left.intersection(&right).count();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    intersection as f64 / union as f64
}

fn tokens(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
