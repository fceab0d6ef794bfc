#![allow(dead_code)]

use async_trait::async_trait;
use conductor::classifier::{IntentRule, TargetRelation};
use conductor::{
    Agent, AgentDescriptor, AgentError, AgentOutput, ClassifierConfig, CoordinatorBuilder,
    TaskInput,
};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub enum Reply {
    Ok(Value, f64),
    Fail(String),
    /// Answer with the full prompt, so chained input is visible downstream
    Echo,
}

/// Test agent with a fixed delay and reply that records its calls
pub struct TestAgent {
    id: String,
    delay: Duration,
    reply: Reply,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl TestAgent {
    pub fn new(id: &str, delay_ms: u64, reply: Reply) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            delay: Duration::from_millis(delay_ms),
            reply,
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Agent for TestAgent {
    fn id(&self) -> &str {
        &self.id
    }

    async fn execute(
        &self,
        input: &TaskInput,
        cancel: CancellationToken,
    ) -> Result<AgentOutput, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(input.prompt());
        tokio::select! {
            _ = cancel.cancelled() => return Err(AgentError::Transient("cancelled".into())),
            _ = tokio::time::sleep(self.delay) => {}
        }
        match &self.reply {
            Reply::Ok(payload, score) => Ok(AgentOutput::new(payload.clone(), *score)),
            Reply::Fail(e) => Err(AgentError::Permanent(e.clone())),
            Reply::Echo => Ok(AgentOutput::new(Value::String(input.prompt()), 0.7)),
        }
    }
}

/// Descriptor with one-second seeded latency
pub fn descriptor(id: &str, capabilities: &[&str]) -> AgentDescriptor {
    AgentDescriptor::new(id, capabilities.iter()).with_average_latency(Duration::from_secs(1))
}

/// Classifier config where a single keyword hit is a confident match
pub fn classifier_config(rules: Vec<IntentRule>) -> ClassifierConfig {
    ClassifierConfig {
        keyword_weight: 1.0,
        rules,
        ..ClassifierConfig::default()
    }
}

pub fn rule(tag: &str, keyword: &str) -> IntentRule {
    IntentRule::new(tag, [keyword])
}

pub fn composite(tag: &str, keyword: &str, agents: &[&str], relation: TargetRelation) -> IntentRule {
    IntentRule::new(tag, [keyword]).with_agents(agents.iter().copied(), relation)
}

/// Builder with a `general` default agent already registered
pub fn builder(rules: Vec<IntentRule>) -> CoordinatorBuilder {
    CoordinatorBuilder::new()
        .classifier_config(classifier_config(rules))
        .register(descriptor("general", &["general"]))
        .agent(TestAgent::new("general", 10, Reply::Ok(Value::from("general answer"), 0.5)))
}
