//! Capability classifier
//!
//! Maps a free-text request to a `RoutingDecision`:
//! 1. score intent tags with the keyword lexicon
//! 2. exactly one tag above `min_confidence` -> route from that tag
//! 3. none or several -> ask the language model (if configured)
//! 4. model missing / failed / malformed -> best keyword match, then the
//!    default agent
//!
//! Every path ends in a decision; a request is never left unrouted.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::decision::{strategy_for, DecisionSource, RoutingDecision, StrategyKind, TargetRelation};
use super::lexicon::{IntentRule, TagLexicon, TagScore};
use super::model::{CandidateAgent, LanguageModel, ModelError, RoutingPrompt};
use crate::agents::SessionContext;
use crate::error::{ConductorError, Result};
use crate::registry::AgentRegistry;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// A tag must reach this score to route without the model
    pub min_confidence: f64,
    /// Score contributed by each word of a matched keyword
    pub keyword_weight: f64,
    /// Agent that receives requests nothing else matched
    pub default_agent: String,
    pub default_priority: u8,
    pub rules: Vec<IntentRule>,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            keyword_weight: 0.4,
            default_agent: "general".to_string(),
            default_priority: 5,
            rules: default_rules(),
        }
    }
}

/// Built-in lexicon for the stock agent set
pub fn default_rules() -> Vec<IntentRule> {
    vec![
        IntentRule::new(
            "job_search",
            ["job", "jobs", "gig", "gigs", "upwork", "freelance work", "find work", "opening"],
        ),
        IntentRule::new(
            "proposal",
            ["proposal", "cover letter", "pitch", "bid", "apply"],
        ),
        IntentRule::new(
            "math",
            ["calculate", "compute", "rate", "budget", "estimate", "how much", "percent"],
        ),
        IntentRule::new(
            "research",
            ["research", "look up", "search", "find out", "news", "trend", "trends"],
        ),
        IntentRule::new("invoice", ["invoice", "invoices", "bill", "billing", "payment"]),
        IntentRule::new("market_analysis", ["market analysis", "market", "competitors"])
            .with_agents(["web_research", "math"], TargetRelation::Independent),
        IntentRule::new("proposal_writing", ["write a proposal", "draft a proposal"])
            .with_agents(["web_research", "proposal_writer"], TargetRelation::Chained),
        IntentRule::new("rate_recommendation", ["recommend a rate", "what should i charge"])
            .with_agents(["math", "web_research"], TargetRelation::SameQuestion),
    ]
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(ConductorError::Validation(format!(
                "classifier.min_confidence must be in [0, 1], got {}",
                self.min_confidence
            )));
        }
        if !(self.keyword_weight > 0.0) {
            return Err(ConductorError::Validation(format!(
                "classifier.keyword_weight must be positive, got {}",
                self.keyword_weight
            )));
        }
        if self.default_agent.trim().is_empty() {
            return Err(ConductorError::Validation(
                "classifier.default_agent must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

pub struct Classifier {
    min_confidence: f64,
    default_agent: String,
    default_priority: u8,
    lexicon: TagLexicon,
    registry: Arc<AgentRegistry>,
    model: Option<Arc<dyn LanguageModel>>,
}

impl Classifier {
    pub fn new(config: ClassifierConfig, registry: Arc<AgentRegistry>) -> Self {
        Self {
            min_confidence: config.min_confidence,
            default_agent: config.default_agent,
            default_priority: config.default_priority.clamp(1, 10),
            lexicon: TagLexicon::new(config.rules, config.keyword_weight),
            registry,
            model: None,
        }
    }

    pub fn with_model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Every agent named by the configuration must be registered
    pub fn validate(&self) -> Result<()> {
        if !self.registry.contains(&self.default_agent) {
            return Err(ConductorError::UnknownAgent(self.default_agent.clone()));
        }
        for rule in self.lexicon.rules() {
            self.check_rule_agents(&rule)?;
        }
        Ok(())
    }

    fn check_rule_agents(&self, rule: &IntentRule) -> Result<()> {
        match rule.agents.iter().find(|a| !self.registry.contains(a)) {
            Some(missing) => Err(ConductorError::UnknownAgent(missing.clone())),
            None => Ok(()),
        }
    }

    // ==================== Rule management ====================

    /// Add or replace a routing rule at runtime
    pub fn add_rule(&self, rule: IntentRule) -> Result<Option<IntentRule>> {
        self.check_rule_agents(&rule)?;
        Ok(self.lexicon.add_rule(rule))
    }

    pub fn remove_rule(&self, tag: &str) -> Option<IntentRule> {
        self.lexicon.remove_rule(tag)
    }

    pub fn rules(&self) -> Vec<IntentRule> {
        self.lexicon.rules()
    }

    // ==================== Classification ====================

    pub async fn classify(&self, request: &str, context: &SessionContext) -> RoutingDecision {
        let scores = self.lexicon.score(request);
        let intents: Vec<String> = scores.iter().map(|s| s.tag.clone()).collect();
        let strong: Vec<&TagScore> = scores
            .iter()
            .filter(|s| s.score >= self.min_confidence)
            .collect();

        if strong.len() == 1 {
            if let Some(decision) = self.decide_from_tag(strong[0], DecisionSource::Keyword, &intents)
            {
                self.log_decision(&decision);
                return decision;
            }
        }

        match &self.model {
            Some(model) => {
                match self
                    .decide_from_model(model.as_ref(), request, context, &scores)
                    .await
                {
                    Ok(decision) => {
                        self.log_decision(&decision);
                        return decision;
                    }
                    Err(e) => warn!(error = %e, "Model classification failed; using keyword fallback"),
                }
            }
            None => debug!(
                strong_intents = strong.len(),
                "No language model configured; using keyword fallback"
            ),
        }

        let decision = scores
            .iter()
            .find_map(|s| self.decide_from_tag(s, DecisionSource::KeywordFallback, &intents))
            .unwrap_or_else(|| self.default_decision(&intents));
        self.log_decision(&decision);
        decision
    }

    fn log_decision(&self, decision: &RoutingDecision) {
        info!(
            targets = ?decision.target_agents,
            strategy = %decision.strategy,
            confidence = decision.confidence,
            source = ?decision.source,
            "Routing decision"
        );
    }

    /// Decision from one lexicon tag; `None` if no routable agent serves it
    fn decide_from_tag(
        &self,
        score: &TagScore,
        source: DecisionSource,
        intents: &[String],
    ) -> Option<RoutingDecision> {
        let rule = self.lexicon.get(&score.tag)?;
        let relation = rule.relation.unwrap_or(TargetRelation::Independent);

        let mut targets: Vec<String> = rule
            .agents
            .iter()
            .filter(|a| self.registry.is_routable(a))
            .cloned()
            .collect();
        let broken_chain =
            relation == TargetRelation::Chained && targets.len() < rule.agents.len();
        if targets.is_empty() || broken_chain {
            targets = self
                .registry
                .lookup(&score.tag)
                .into_iter()
                .take(1)
                .map(|d| d.id)
                .collect();
        }
        if targets.is_empty() {
            debug!(tag = %score.tag, "No routable agent for intent");
            return None;
        }

        let strategy = strategy_for(targets.len(), relation);
        Some(RoutingDecision {
            estimated_duration: self.estimate_duration(&targets, strategy),
            confidence: score.score.clamp(0.0, 1.0),
            reasoning: format!(
                "matched intent '{}' ({} keyword hit{})",
                score.tag,
                score.hits,
                if score.hits == 1 { "" } else { "s" }
            ),
            strategy,
            priority: rule.priority.unwrap_or(self.default_priority).clamp(1, 10),
            source,
            intents: intents.to_vec(),
            target_agents: targets,
        })
    }

    async fn decide_from_model(
        &self,
        model: &dyn LanguageModel,
        request: &str,
        context: &SessionContext,
        scores: &[TagScore],
    ) -> std::result::Result<RoutingDecision, ModelError> {
        let candidates: Vec<CandidateAgent> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|d| d.is_routable())
            .map(|d| CandidateAgent {
                id: d.id,
                capabilities: d.capabilities,
                health_score: d.health_score,
            })
            .collect();
        if candidates.is_empty() {
            return Err(ModelError::Unavailable("no routable agents".to_string()));
        }

        let prompt = RoutingPrompt {
            request: request.to_string(),
            context: context.clone(),
            candidates,
            intents: scores.to_vec(),
        };
        let proposal = model.classify(&prompt).await?.validate(&self.registry)?;

        let relation = proposal
            .relation
            .unwrap_or_else(|| self.infer_relation(&proposal.target_agents, scores));
        let strategy = strategy_for(proposal.target_agents.len(), relation);
        let priority = proposal
            .priority
            .map(|p| p.clamp(1, 10) as u8)
            .unwrap_or(self.default_priority);

        Ok(RoutingDecision {
            estimated_duration: self.estimate_duration(&proposal.target_agents, strategy),
            confidence: proposal.confidence,
            reasoning: proposal.reasoning,
            strategy,
            priority,
            source: DecisionSource::Model,
            intents: scores.iter().map(|s| s.tag.clone()).collect(),
            target_agents: proposal.target_agents,
        })
    }

    /// Same question when at most one intent is strong and every target
    /// carries the capability of a matched intent; otherwise independent
    fn infer_relation(&self, targets: &[String], scores: &[TagScore]) -> TargetRelation {
        let strong = scores
            .iter()
            .filter(|s| s.score >= self.min_confidence)
            .count();
        if targets.len() < 2 || strong > 1 {
            return TargetRelation::Independent;
        }
        let shared = scores.iter().any(|s| {
            targets.iter().all(|id| {
                self.registry
                    .get(id)
                    .map(|d| d.has_capability(&s.tag))
                    .unwrap_or(false)
            })
        });
        if shared {
            TargetRelation::SameQuestion
        } else {
            TargetRelation::Independent
        }
    }

    fn default_decision(&self, intents: &[String]) -> RoutingDecision {
        if !self.registry.is_routable(&self.default_agent) {
            warn!(
                agent_id = %self.default_agent,
                "Default agent is not routable; routing to it anyway"
            );
        }
        let targets = vec![self.default_agent.clone()];
        RoutingDecision {
            estimated_duration: self.estimate_duration(&targets, StrategyKind::Sequential),
            target_agents: targets,
            confidence: 0.0,
            reasoning: "no intent matched; routed to the default agent".to_string(),
            strategy: StrategyKind::Sequential,
            priority: self.default_priority,
            source: DecisionSource::DefaultAgent,
            intents: intents.to_vec(),
        }
    }

    /// Pipeline: sum of latencies. Everything else: slowest agent.
    fn estimate_duration(&self, targets: &[String], strategy: StrategyKind) -> Duration {
        let latencies = targets
            .iter()
            .filter_map(|id| self.registry.get(id).ok())
            .map(|d| d.average_latency);
        match strategy {
            StrategyKind::Pipeline => latencies.fold(Duration::ZERO, Duration::saturating_add),
            _ => latencies.max().unwrap_or_default(),
        }
    }
}
