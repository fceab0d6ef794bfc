//! Task Coordinator
//!
//! `submit` drives one request end to end:
//! read session context -> classify -> one task per target agent -> run the
//! matching strategy under the overall timeout -> sweep open tasks ->
//! aggregate -> append the interaction to the session context.
//!
//! Every terminal transition reaches the performance tracker before
//! `submit` returns, or when its future is dropped.

use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregator::{aggregate, AgentTaskReport, CoordinatorResult};
use super::config::CoordinatorConfig;
use super::state::{CoordinationMetrics, MetricsSnapshot, RequestOutcome, TaskLedger};
use super::task::{Task, TaskBoard, TaskStatus};
use crate::agents::{
    Agent, ContextEntry, ContextStore, InMemoryContextStore, SessionContext,
};
use crate::classifier::{Classifier, ClassifierConfig, LanguageModel, StrategyKind};
use crate::config::AppConfig;
use crate::conflict::{ConflictResolver, PayloadComparator, ResolverConfig};
use crate::error::{ConductorError, Result};
use crate::model::CliRoutingModel;
use crate::performance::{AgentStats, Outcome, PerformanceTracker, TrackerConfig};
use crate::registry::{AgentDescriptor, AgentRegistry};
use crate::strategy::{strategy_for_kind, ExecutionContext, ExecutionPlan, StrategyReport};

pub struct Coordinator {
    config: CoordinatorConfig,
    registry: Arc<AgentRegistry>,
    classifier: Classifier,
    execution: ExecutionContext,
    context_store: Arc<dyn ContextStore>,
    /// Requests still executing
    active: DashMap<Uuid, ActiveRequest>,
    ledger: Arc<TaskLedger>,
    metrics: CoordinationMetrics,
}

struct ActiveRequest {
    board: Arc<TaskBoard>,
    /// Stops this request only; a child of the caller's token
    cancel: CancellationToken,
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::new()
    }

    // ==================== Accessors ====================

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn tracker(&self) -> &Arc<PerformanceTracker> {
        self.execution.tracker()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn agent_stats(&self, agent_id: &str) -> Option<AgentStats> {
        self.tracker().stats(agent_id)
    }

    pub fn active_requests(&self) -> usize {
        self.active.len()
    }

    pub fn active_request_ids(&self) -> Vec<Uuid> {
        self.active.iter().map(|entry| *entry.key()).collect()
    }

    /// Status of a task from a running request or from history
    pub async fn task_status(&self, task_id: &Uuid) -> Result<Task> {
        for entry in self.active.iter() {
            if let Some(task) = entry.board.get(task_id) {
                return Ok(task);
            }
        }
        self.ledger
            .get(task_id)
            .await
            .ok_or_else(|| ConductorError::TaskNotFound(task_id.to_string()))
    }

    /// Most recently finished tasks, newest first
    pub async fn recent_tasks(&self, n: usize) -> Vec<Task> {
        self.ledger.recent(n).await
    }

    /// Stop a running request.
    ///
    /// Its open tasks are cancelled and `submit` returns `Err(Cancelled)`
    /// unless some output survives. `Ok(false)` if the request already
    /// finished.
    pub async fn cancel(&self, request_id: &Uuid) -> Result<bool> {
        if let Some(entry) = self.active.get(request_id) {
            info!(request_id = %request_id, "Cancelling request");
            entry.cancel.cancel();
            return Ok(true);
        }
        if self.ledger.contains_request(request_id).await {
            return Ok(false);
        }
        Err(ConductorError::RequestNotFound(request_id.to_string()))
    }

    // ==================== Submission ====================

    pub async fn submit(&self, request: &str, session_id: &str) -> Result<CoordinatorResult> {
        self.submit_with_cancel(request, session_id, CancellationToken::new())
            .await
    }

    /// Submit a request the caller can abandon through `cancel`.
    ///
    /// Returns `Err(CoordinatorTimeout)` / `Err(Cancelled)` only when no task
    /// succeeded (or the request was a pipeline); otherwise the partial
    /// aggregate is returned.
    pub async fn submit_with_cancel(
        &self,
        request: &str,
        session_id: &str,
        cancel: CancellationToken,
    ) -> Result<CoordinatorResult> {
        let started = Instant::now();

        let context = match self.context_store.get(session_id).await {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Context store read failed; using empty context");
                SessionContext::empty(session_id)
            }
        };

        let decision = self.classifier.classify(request, &context).await;
        if let Some(missing) = decision
            .target_agents
            .iter()
            .find(|id| !self.execution.has_agent(id))
        {
            return Err(ConductorError::AgentUnavailable {
                agent_id: missing.clone(),
                reason: "no executor attached".to_string(),
            });
        }

        let board = Arc::new(TaskBoard::new(
            Uuid::new_v4(),
            request,
            &decision.target_agents,
        ));
        let request_id = board.request_id();
        let run_token = cancel.child_token();
        self.active.insert(
            request_id,
            ActiveRequest {
                board: Arc::clone(&board),
                cancel: run_token.clone(),
            },
        );
        let mut in_flight = InFlight {
            coordinator: self,
            board: Arc::clone(&board),
            started,
            armed: true,
        };

        let overall = self.config.overall_timeout(decision.estimated_duration);
        info!(
            request_id = %request_id,
            strategy = %decision.strategy,
            targets = ?decision.target_agents,
            timeout_ms = overall.as_millis() as u64,
            "Dispatching request"
        );

        let plan = ExecutionPlan::new(request, context, Arc::clone(&board));
        let strategy = strategy_for_kind(decision.strategy);
        let (report, timed_out) =
            match timeout(overall, strategy.execute(&self.execution, &plan, &run_token)).await {
                Ok(report) => (report, false),
                Err(_) => {
                    warn!(request_id = %request_id, timeout_ms = overall.as_millis() as u64, "Coordinator timeout");
                    (StrategyReport::default(), true)
                }
            };
        // caller token or `cancel(request_id)`
        let cancelled = run_token.is_cancelled();
        run_token.cancel();
        in_flight.disarm();

        let reason = if timed_out {
            "coordinator timeout"
        } else {
            "request cancelled"
        };
        self.sweep(&board, reason);

        let tasks = board.snapshot();
        self.active.remove(&request_id);
        self.ledger.record(tasks.clone()).await;

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let any_succeeded = tasks.iter().any(|t| t.status == TaskStatus::Succeeded);
        let pipeline = decision.strategy == StrategyKind::Pipeline;

        if timed_out && (!any_succeeded || pipeline) {
            self.metrics.record(RequestOutcome::TimedOut, elapsed_ms, 0);
            return Err(ConductorError::CoordinatorTimeout { elapsed_ms });
        }
        if cancelled && (!any_succeeded || pipeline) {
            self.metrics.record(RequestOutcome::Cancelled, elapsed_ms, 0);
            return Err(ConductorError::Cancelled);
        }

        let resolution = match (report.resolution, decision.strategy) {
            (Some(resolution), _) => Some(resolution),
            (None, StrategyKind::Negotiation) => self
                .execution
                .resolve(tasks.iter().filter_map(Task::agent_result).collect()),
            (None, _) => None,
        };
        let agg = aggregate(decision.strategy, &tasks, resolution.as_ref());

        let result = CoordinatorResult {
            request_id,
            success: agg.success,
            payload: agg.payload,
            strategy_used: decision.strategy,
            per_agent_results: tasks.iter().map(AgentTaskReport::from).collect(),
            partial: agg.partial,
            resolution,
            unresolved_conflicts: agg.unresolved_conflicts,
            timed_out,
            execution_time_ms: elapsed_ms,
            error: agg.error,
            routing: decision,
        };

        let outcome = match (result.success, result.partial) {
            (false, _) => RequestOutcome::Failed,
            (true, true) => RequestOutcome::Partial,
            (true, false) => RequestOutcome::Succeeded,
        };
        self.metrics
            .record(outcome, elapsed_ms, result.unresolved_conflicts.len());

        info!(
            request_id = %request_id,
            success = result.success,
            partial = result.partial,
            unresolved = result.unresolved_conflicts.len(),
            elapsed_ms,
            "Request finished"
        );

        if self.config.record_interactions {
            self.record_interaction(session_id, request, &result).await;
        }
        Ok(result)
    }

    /// Cancel whatever is still open and report it to the tracker
    fn sweep(&self, board: &TaskBoard, reason: &str) {
        for swept in board.cancel_open(reason) {
            debug!(task_id = %swept.task_id, agent_id = %swept.agent_id, was_running = swept.was_running, reason, "Task swept");
            let outcome = if swept.was_running {
                Outcome::Failure
            } else {
                Outcome::Skipped
            };
            self.execution.record(&swept.agent_id, outcome, swept.elapsed);
        }
    }

    async fn record_interaction(&self, session_id: &str, request: &str, result: &CoordinatorResult) {
        let entry = ContextEntry::new(
            "interaction",
            json!({
                "request_id": result.request_id,
                "request": request,
                "strategy": result.strategy_used,
                "agents": result.routing.target_agents,
                "success": result.success,
                "partial": result.partial,
                "execution_time_ms": result.execution_time_ms,
            }),
        );
        if let Err(e) = self.context_store.append(session_id, entry).await {
            warn!(session_id = %session_id, error = %e, "Failed to append interaction to context store");
        }
    }
}

/// Unwinds a request whose `submit` future is dropped before it finishes,
/// for example by a caller-side `tokio::time::timeout`
struct InFlight<'a> {
    coordinator: &'a Coordinator,
    board: Arc<TaskBoard>,
    started: Instant,
    armed: bool,
}

impl InFlight<'_> {
    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let coordinator = self.coordinator;
        let request_id = self.board.request_id();
        warn!(request_id = %request_id, "Request dropped before completion; sweeping open tasks");

        if let Some((_, entry)) = coordinator.active.remove(&request_id) {
            entry.cancel.cancel();
        }
        coordinator.sweep(&self.board, "request dropped");
        coordinator.metrics.record(
            RequestOutcome::Cancelled,
            self.started.elapsed().as_millis() as u64,
            0,
        );

        let Err(tasks) = coordinator.ledger.try_record(self.board.snapshot()) else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                let ledger = Arc::clone(&coordinator.ledger);
                handle.spawn(async move { ledger.record(tasks).await });
            }
            Err(_) => warn!(request_id = %request_id, "No runtime; dropped request missing from history"),
        }
    }
}

/// Assembles a validated `Coordinator`
pub struct CoordinatorBuilder {
    coordinator: CoordinatorConfig,
    classifier: ClassifierConfig,
    resolver: ResolverConfig,
    tracker: TrackerConfig,
    registry: Option<Arc<AgentRegistry>>,
    descriptors: Vec<AgentDescriptor>,
    agents: Vec<Arc<dyn Agent>>,
    model: Option<Arc<dyn LanguageModel>>,
    context_store: Option<Arc<dyn ContextStore>>,
    comparator: Option<Arc<dyn PayloadComparator>>,
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            classifier: ClassifierConfig::default(),
            resolver: ResolverConfig::default(),
            tracker: TrackerConfig::default(),
            registry: None,
            descriptors: Vec::new(),
            agents: Vec::new(),
            model: None,
            context_store: None,
            comparator: None,
        }
    }

    /// Configuration sections, agent descriptors and (if configured) the CLI
    /// routing model. Agent executors still have to be supplied.
    pub fn from_config(config: &AppConfig) -> Self {
        let mut builder = Self::new()
            .coordinator_config(config.coordinator.clone())
            .classifier_config(config.classifier.clone())
            .resolver_config(config.resolver.clone())
            .tracker_config(config.tracker.clone());
        for spec in &config.agents {
            builder = builder.register(spec.descriptor());
        }
        if let Some(model) = &config.model {
            builder = builder.model(Arc::new(CliRoutingModel::new(model.clone())));
        }
        builder
    }

    pub fn coordinator_config(mut self, config: CoordinatorConfig) -> Self {
        self.coordinator = config;
        self
    }

    pub fn classifier_config(mut self, config: ClassifierConfig) -> Self {
        self.classifier = config;
        self
    }

    pub fn resolver_config(mut self, config: ResolverConfig) -> Self {
        self.resolver = config;
        self
    }

    pub fn tracker_config(mut self, config: TrackerConfig) -> Self {
        self.tracker = config;
        self
    }

    /// Use an existing registry instead of a fresh one
    pub fn registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn register(mut self, descriptor: AgentDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    pub fn agent(mut self, agent: Arc<dyn Agent>) -> Self {
        self.agents.push(agent);
        self
    }

    pub fn agents<I: IntoIterator<Item = Arc<dyn Agent>>>(mut self, agents: I) -> Self {
        self.agents.extend(agents);
        self
    }

    pub fn model(mut self, model: Arc<dyn LanguageModel>) -> Self {
        self.model = Some(model);
        self
    }

    pub fn context_store(mut self, store: Arc<dyn ContextStore>) -> Self {
        self.context_store = Some(store);
        self
    }

    pub fn comparator(mut self, comparator: Arc<dyn PayloadComparator>) -> Self {
        self.comparator = Some(comparator);
        self
    }

    /// Validate everything and wire the collaborators.
    ///
    /// Fails with `UnknownAgent` when an executor, rule or default agent
    /// names an unregistered agent, and with `Validation` when a registered
    /// agent has no executor.
    pub fn build(self) -> Result<Coordinator> {
        self.coordinator.validate()?;
        self.classifier.validate()?;
        self.resolver.validate()?;
        self.tracker.validate()?;

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(AgentRegistry::new()));
        for descriptor in self.descriptors {
            registry.register(descriptor)?;
        }

        let mut executors: HashMap<String, Arc<dyn Agent>> = HashMap::new();
        for agent in self.agents {
            let id = agent.id().to_string();
            if !registry.contains(&id) {
                return Err(ConductorError::UnknownAgent(id));
            }
            if executors.insert(id.clone(), agent).is_some() {
                return Err(ConductorError::DuplicateAgent(id));
            }
        }
        if let Some(missing) = registry.ids().into_iter().find(|id| !executors.contains_key(id)) {
            return Err(ConductorError::Validation(format!(
                "agent {} is registered but has no executor",
                missing
            )));
        }

        let tracker = Arc::new(PerformanceTracker::new(
            self.tracker,
            Arc::clone(&registry),
        ));
        let mut resolver = ConflictResolver::new(self.resolver);
        if let Some(comparator) = self.comparator {
            resolver = resolver.with_comparator(comparator);
        }

        let mut classifier = Classifier::new(self.classifier, Arc::clone(&registry));
        if let Some(model) = self.model {
            classifier = classifier.with_model(model);
        }
        classifier.validate()?;

        let execution = ExecutionContext::new(
            Arc::clone(&registry),
            executors,
            tracker,
            resolver,
            self.coordinator.task_timeouts(),
        );

        info!(
            agents = registry.len(),
            model = classifier.has_model(),
            "Coordinator ready"
        );

        Ok(Coordinator {
            ledger: Arc::new(TaskLedger::new(self.coordinator.history_limit)),
            config: self.coordinator,
            registry,
            classifier,
            execution,
            context_store: self
                .context_store
                .unwrap_or_else(|| Arc::new(InMemoryContextStore::default())),
            active: DashMap::new(),
            metrics: CoordinationMetrics::default(),
        })
    }
}
