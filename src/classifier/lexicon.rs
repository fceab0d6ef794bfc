//! Intent tag lexicon
//!
//! Cheap, deterministic keyword scoring. A rule maps keywords to an intent tag
//! and optionally to an explicit list of agents plus how those agents relate.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::decision::TargetRelation;
use crate::registry::normalize_tag;

/// One entry of the tag lexicon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRule {
    pub tag: String,
    pub keywords: Vec<String>,
    /// Explicit targets, in order; empty means "best agent with this capability"
    #[serde(default)]
    pub agents: Vec<String>,
    /// Relation between `agents` (ignored for a single agent)
    #[serde(default)]
    pub relation: Option<TargetRelation>,
    #[serde(default)]
    pub priority: Option<u8>,
}

impl IntentRule {
    pub fn new<I, S>(tag: &str, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            tag: normalize_tag(tag),
            keywords: keywords
                .into_iter()
                .map(|k| normalize_phrase(k.as_ref()))
                .filter(|k| !k.is_empty())
                .collect(),
            agents: Vec::new(),
            relation: None,
            priority: None,
        }
    }

    pub fn with_agents<I, S>(mut self, agents: I, relation: TargetRelation) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.agents = agents.into_iter().map(|a| a.as_ref().to_string()).collect();
        self.relation = Some(relation);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = Some(priority);
        self
    }

    fn normalized(mut self) -> Self {
        self.tag = normalize_tag(&self.tag);
        self.keywords = self
            .keywords
            .iter()
            .map(|k| normalize_phrase(k))
            .filter(|k| !k.is_empty())
            .collect();
        self
    }
}

/// Score of one tag against a request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagScore {
    pub tag: String,
    /// min(1, keyword_weight * words across matched keywords)
    pub score: f64,
    pub hits: usize,
}

pub struct TagLexicon {
    rules: DashMap<String, IntentRule>,
    keyword_weight: f64,
}

impl TagLexicon {
    pub fn new(rules: Vec<IntentRule>, keyword_weight: f64) -> Self {
        let lexicon = Self {
            rules: DashMap::new(),
            keyword_weight,
        };
        for rule in rules {
            let rule = rule.normalized();
            lexicon.rules.insert(rule.tag.clone(), rule);
        }
        lexicon
    }

    /// Add or replace a rule; returns the rule it replaced
    pub fn add_rule(&self, rule: IntentRule) -> Option<IntentRule> {
        let rule = rule.normalized();
        info!(tag = %rule.tag, keywords = rule.keywords.len(), "Adding routing rule");
        self.rules.insert(rule.tag.clone(), rule)
    }

    pub fn remove_rule(&self, tag: &str) -> Option<IntentRule> {
        let removed = self.rules.remove(&normalize_tag(tag)).map(|(_, r)| r);
        if removed.is_some() {
            info!(tag = %tag, "Removed routing rule");
        }
        removed
    }

    pub fn get(&self, tag: &str) -> Option<IntentRule> {
        self.rules.get(&normalize_tag(tag)).map(|r| r.clone())
    }

    /// All rules sorted by tag
    pub fn rules(&self) -> Vec<IntentRule> {
        let mut rules: Vec<IntentRule> = self.rules.iter().map(|r| r.clone()).collect();
        rules.sort_by(|a, b| a.tag.cmp(&b.tag));
        rules
    }

    /// Tags with at least one keyword hit, best score first.
    ///
    /// A hit counts once per word of the matched keyword, so "write a
    /// proposal" outweighs a bare "proposal". Ties go to the longest matched
    /// keyword, then to rules with explicit agents, then by tag.
    pub fn score(&self, text: &str) -> Vec<TagScore> {
        let haystack = format!(" {} ", normalize_phrase(text));
        let mut scored: Vec<(TagScore, usize, bool)> = self
            .rules
            .iter()
            .filter_map(|rule| {
                let matched: Vec<usize> = rule
                    .keywords
                    .iter()
                    .filter(|k| haystack.contains(&format!(" {} ", k)))
                    .map(|k| phrase_len(k))
                    .collect();
                if matched.is_empty() {
                    return None;
                }
                let words: usize = matched.iter().sum();
                let longest = matched.iter().copied().max().unwrap_or(0);
                let score = TagScore {
                    tag: rule.tag.clone(),
                    score: (words as f64 * self.keyword_weight).min(1.0),
                    hits: matched.len(),
                };
                Some((score, longest, !rule.agents.is_empty()))
            })
            .collect();
        scored.sort_by(|(a, a_len, a_composite), (b, b_len, b_composite)| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| b_len.cmp(a_len))
                .then_with(|| b_composite.cmp(a_composite))
                .then_with(|| a.tag.cmp(&b.tag))
        });
        scored.into_iter().map(|(score, _, _)| score).collect()
    }
}

fn phrase_len(phrase: &str) -> usize {
    phrase.split(' ').count()
}

/// Lowercase, punctuation to spaces, collapsed whitespace
fn normalize_phrase(text: &str) -> String {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
