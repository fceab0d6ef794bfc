//! Capability Classifier: request text to routing decision

mod classifier;
mod decision;
mod lexicon;
mod model;

pub use classifier::{default_rules, Classifier, ClassifierConfig};
pub use decision::{strategy_for, DecisionSource, RoutingDecision, StrategyKind, TargetRelation};
pub use lexicon::{IntentRule, TagLexicon, TagScore};
#[cfg(test)]
pub use model::MockLanguageModel;
pub use model::{
    extract_json, parse_proposal, CandidateAgent, LanguageModel, ModelError, ModelProposal,
    RoutingPrompt,
};
