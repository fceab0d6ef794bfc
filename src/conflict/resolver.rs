//! Conflict detection + resolution
//!
//! Detects disagreement between agents answering the same sub-question and
//! resolves it in a fixed order: confidence margin, then weighted average
//! (numeric) or healthiest agent (text), then surfaces it as unresolved.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, info};

use super::comparator::{DefaultComparator, PayloadComparator};
use crate::agents::AgentResult;
use crate::error::{ConductorError, Result};
use crate::registry::DEFAULT_HEALTH_SCORE;

const TIE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Pairs below this similarity are in conflict
    pub similarity_threshold: f64,
    /// Confidence lead needed to pick a winner outright
    pub confidence_margin: f64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.6,
            confidence_margin: 0.15,
        }
    }
}

impl ResolverConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.similarity_threshold) {
            return Err(ConductorError::Validation(format!(
                "resolver.similarity_threshold must be in [0, 1], got {}",
                self.similarity_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_margin) {
            return Err(ConductorError::Validation(format!(
                "resolver.confidence_margin must be in [0, 1], got {}",
                self.confidence_margin
            )));
        }
        Ok(())
    }
}

/// Two or more results whose payloads disagree
#[derive(Debug, Clone)]
pub struct Conflict {
    pub results: Vec<AgentResult>,
    /// Lowest pairwise similarity in the set
    pub min_similarity: f64,
}

/// One candidate answer surfaced to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictOption {
    pub agent_id: String,
    pub payload: Value,
    pub score: f64,
    pub health: f64,
}

/// A conflict the resolver refused to settle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnresolvedConflict {
    pub options: Vec<ConflictOption>,
    pub min_similarity: f64,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Resolution {
    /// Only one result; nothing to resolve
    Single { agent_id: String, payload: Value },
    /// All results agree within the threshold
    Consensus {
        agents: Vec<String>,
        payload: Value,
        min_similarity: f64,
    },
    /// One result led on confidence by more than the margin
    ByConfidence {
        agent_id: String,
        payload: Value,
        lead: f64,
    },
    /// Numeric results blended by `score * health`
    WeightedAverage {
        value: f64,
        payload: Value,
        weights: BTreeMap<String, f64>,
    },
    /// Text results settled by the healthiest agent
    ByHealth {
        agent_id: String,
        payload: Value,
        health: f64,
    },
    Unresolved { conflict: UnresolvedConflict },
}

impl Resolution {
    /// Settled payload; `None` when unresolved
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Resolution::Single { payload, .. }
            | Resolution::Consensus { payload, .. }
            | Resolution::ByConfidence { payload, .. }
            | Resolution::WeightedAverage { payload, .. }
            | Resolution::ByHealth { payload, .. } => Some(payload),
            Resolution::Unresolved { .. } => None,
        }
    }

    pub fn is_unresolved(&self) -> bool {
        matches!(self, Resolution::Unresolved { .. })
    }

    pub fn method(&self) -> &'static str {
        match self {
            Resolution::Single { .. } => "single",
            Resolution::Consensus { .. } => "consensus",
            Resolution::ByConfidence { .. } => "by_confidence",
            Resolution::WeightedAverage { .. } => "weighted_average",
            Resolution::ByHealth { .. } => "by_health",
            Resolution::Unresolved { .. } => "unresolved",
        }
    }
}

pub struct ConflictResolver {
    config: ResolverConfig,
    comparator: Arc<dyn PayloadComparator>,
}

impl ConflictResolver {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            comparator: Arc::new(DefaultComparator),
        }
    }

    pub fn with_comparator(mut self, comparator: Arc<dyn PayloadComparator>) -> Self {
        self.comparator = comparator;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Lowest pairwise similarity; 1.0 for fewer than two results
    pub fn min_similarity(&self, results: &[AgentResult]) -> f64 {
        let mut min = 1.0_f64;
        for i in 0..results.len() {
            for j in (i + 1)..results.len() {
                let s = self
                    .comparator
                    .similarity(&results[i].payload, &results[j].payload);
                min = min.min(s);
            }
        }
        min
    }

    /// `Some` when at least one pair falls below the similarity threshold
    pub fn detect(&self, results: &[AgentResult]) -> Option<Conflict> {
        if results.len() < 2 {
            return None;
        }
        let min_similarity = self.min_similarity(results);
        if min_similarity >= self.config.similarity_threshold {
            return None;
        }
        Some(Conflict {
            results: results.to_vec(),
            min_similarity,
        })
    }

    /// Resolve a set of results answering the same sub-question.
    ///
    /// `health` maps agent id to its current health score; missing agents
    /// count as freshly registered. Returns `None` for an empty set.
    pub fn resolve(
        &self,
        mut results: Vec<AgentResult>,
        health: &HashMap<String, f64>,
    ) -> Option<Resolution> {
        results.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        let count = results.len();
        let resolution = match count {
            0 => return None,
            1 => {
                let only = results.remove(0);
                Resolution::Single {
                    agent_id: only.agent_id,
                    payload: only.payload,
                }
            }
            _ => match self.detect(&results) {
                None => self.consensus(&results, health),
                Some(conflict) => self.settle(conflict, health),
            },
        };
        info!(
            method = resolution.method(),
            results = count,
            "Conflict resolver finished"
        );
        Some(resolution)
    }

    fn consensus(&self, results: &[AgentResult], health: &HashMap<String, f64>) -> Resolution {
        let min_similarity = self.min_similarity(results);
        let agents = results.iter().map(|r| r.agent_id.clone()).collect();
        let payload = match self.weighted_average(results, health) {
            Some((value, _)) => numeric_payload(&results[0].payload, value),
            None => {
                let mean = self.plain_mean(results);
                match mean {
                    Some(value) => numeric_payload(&results[0].payload, value),
                    None => best_by(results, |r| r.score * health_of(health, &r.agent_id))
                        .payload
                        .clone(),
                }
            }
        };
        debug!(min_similarity, "Results agree");
        Resolution::Consensus {
            agents,
            payload,
            min_similarity,
        }
    }

    fn settle(&self, conflict: Conflict, health: &HashMap<String, f64>) -> Resolution {
        let results = &conflict.results;

        // 1. Confidence margin
        let mut by_score: Vec<&AgentResult> = results.iter().collect();
        by_score.sort_by(|a, b| b.score.total_cmp(&a.score));
        let lead = by_score[0].score - by_score[1].score;
        if lead > self.config.confidence_margin {
            let winner = by_score[0];
            return Resolution::ByConfidence {
                agent_id: winner.agent_id.clone(),
                payload: winner.payload.clone(),
                lead,
            };
        }

        // 2. Weighted average or healthiest agent
        let all_numeric = results
            .iter()
            .all(|r| self.comparator.numeric_value(&r.payload).is_some());
        if all_numeric {
            if let Some((value, weights)) = self.weighted_average(results, health) {
                return Resolution::WeightedAverage {
                    value,
                    payload: numeric_payload(&results[0].payload, value),
                    weights,
                };
            }
            return unresolved(conflict, health, "all results carry zero weight");
        }

        let best = best_by(results, |r| health_of(health, &r.agent_id));
        let best_health = health_of(health, &best.agent_id);
        let tied = results
            .iter()
            .filter(|r| (health_of(health, &r.agent_id) - best_health).abs() < TIE_EPSILON)
            .count()
            > 1;
        if tied {
            return unresolved(conflict, health, "agents tied on health");
        }
        Resolution::ByHealth {
            agent_id: best.agent_id.clone(),
            payload: best.payload.clone(),
            health: best_health,
        }
    }

    /// Weighted average with weights `score * health`; `None` unless every
    /// payload is numeric and the total weight is positive
    fn weighted_average(
        &self,
        results: &[AgentResult],
        health: &HashMap<String, f64>,
    ) -> Option<(f64, BTreeMap<String, f64>)> {
        let mut weights = BTreeMap::new();
        let mut total = 0.0;
        let mut sum = 0.0;
        for r in results {
            let value = self.comparator.numeric_value(&r.payload)?;
            let weight = (r.score * health_of(health, &r.agent_id)).max(0.0);
            weights.insert(r.agent_id.clone(), weight);
            total += weight;
            sum += value * weight;
        }
        if total <= 0.0 {
            return None;
        }
        Some((sum / total, weights))
    }

    fn plain_mean(&self, results: &[AgentResult]) -> Option<f64> {
        let values: Option<Vec<f64>> = results
            .iter()
            .map(|r| self.comparator.numeric_value(&r.payload))
            .collect();
        let values = values?;
        if values.is_empty() {
            return None;
        }
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn health_of(health: &HashMap<String, f64>, agent_id: &str) -> f64 {
    health.get(agent_id).copied().unwrap_or(DEFAULT_HEALTH_SCORE)
}

/// Highest key wins; earlier entries win ties
fn best_by<F: Fn(&AgentResult) -> f64>(results: &[AgentResult], key: F) -> &AgentResult {
    let mut best = &results[0];
    let mut best_key = key(best);
    for r in &results[1..] {
        let k = key(r);
        if k > best_key {
            best = r;
            best_key = k;
        }
    }
    best
}

/// Keep the payload's shape: objects get their `value` replaced
fn numeric_payload(template: &Value, value: f64) -> Value {
    match template {
        Value::Object(map) => {
            let mut map = map.clone();
            map.insert("value".to_string(), Value::from(value));
            Value::Object(map)
        }
        _ => Value::from(value),
    }
}

fn unresolved(conflict: Conflict, health: &HashMap<String, f64>, reason: &str) -> Resolution {
    info!(
        options = conflict.results.len(),
        min_similarity = conflict.min_similarity,
        reason,
        "Conflict left unresolved"
    );
    let options = conflict
        .results
        .into_iter()
        .map(|r| ConflictOption {
            health: health_of(health, &r.agent_id),
            agent_id: r.agent_id,
            payload: r.payload,
            score: r.score,
        })
        .collect();
    Resolution::Unresolved {
        conflict: UnresolvedConflict {
            options,
            min_similarity: conflict.min_similarity,
            reason: reason.to_string(),
        },
    }
}
