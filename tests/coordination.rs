mod common;

use common::{builder, composite, descriptor, rule, Reply, TestAgent};
use conductor::agents::demo_agents;
use conductor::classifier::TargetRelation;
use conductor::{
    AgentSpec, AppConfig, ConductorError, CoordinatorBuilder, InMemoryContextStore, Outcome,
    Resolution, SessionContext, StrategyKind, TaskStatus,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[tokio::test(start_paused = true)]
async fn pipeline_failure_cancels_downstream_stages() {
    let research = TestAgent::new("research", 50, Reply::Ok(json!("notes"), 0.8));
    let writer = TestAgent::new("writer", 50, Reply::Fail("template missing".into()));
    let reviewer = TestAgent::new("reviewer", 50, Reply::Echo);

    let coordinator = builder(vec![composite(
        "proposal_writing",
        "write a proposal",
        &["research", "writer", "reviewer"],
        TargetRelation::Chained,
    )])
    .register(descriptor("research", &["research"]))
    .register(descriptor("writer", &["writing"]))
    .register(descriptor("reviewer", &["review"]))
    .agent(research.clone())
    .agent(writer.clone())
    .agent(reviewer.clone())
    .build()
    .unwrap();

    let result = coordinator
        .submit("please write a proposal for this gig", "s1")
        .await
        .unwrap();

    assert_eq!(result.strategy_used, StrategyKind::Pipeline);
    assert!(!result.success);
    assert!(!result.partial);
    assert!(result.error.unwrap().contains("writer"));
    assert_eq!(reviewer.calls(), 0);
    assert!(writer.prompts()[0].contains("notes"));

    let statuses: Vec<_> = result
        .per_agent_results
        .iter()
        .map(|r| (r.agent_id.as_str(), r.status))
        .collect();
    assert_eq!(
        statuses,
        vec![
            ("research", TaskStatus::Succeeded),
            ("writer", TaskStatus::Failed),
            ("reviewer", TaskStatus::Cancelled),
        ]
    );

    let registry = coordinator.registry();
    assert!(registry.get("writer").unwrap().health_score < 0.5);
    // never started, so health is untouched
    assert_eq!(registry.get("reviewer").unwrap().health_score, 0.5);
    assert_eq!(coordinator.agent_stats("reviewer").unwrap().skipped, 1);
}

#[tokio::test(start_paused = true)]
async fn parallel_failure_returns_partial_result() {
    let jobs = TestAgent::new("jobs", 30, Reply::Ok(json!({"count": 3}), 0.9));
    let trends = TestAgent::new("trends", 30, Reply::Fail("rate limited".into()));

    let coordinator = builder(vec![composite(
        "market_analysis",
        "market",
        &["jobs", "trends"],
        TargetRelation::Independent,
    )])
    .register(descriptor("jobs", &["jobs"]))
    .register(descriptor("trends", &["trends"]))
    .agent(jobs.clone())
    .agent(trends.clone())
    .build()
    .unwrap();

    let started = Instant::now();
    let result = coordinator.submit("how is the market", "s1").await.unwrap();

    assert_eq!(result.strategy_used, StrategyKind::Parallel);
    assert!(result.success);
    assert!(result.partial);
    assert_eq!(result.payload, json!({"jobs": {"count": 3}}));
    assert_eq!(
        result.error.as_deref(),
        Some("trends: permanent agent error: rate limited")
    );
    // both ran concurrently
    assert!(started.elapsed() < Duration::from_millis(60));
    assert_eq!(coordinator.metrics().partial, 1);
}

#[tokio::test(start_paused = true)]
async fn hung_agent_hits_coordinator_timeout() {
    let slow = TestAgent::new("slow", 60_000, Reply::Ok(json!("late"), 0.9));

    let coordinator = builder(vec![rule("math", "calculate")])
        .register(descriptor("slow", &["math"]).with_task_timeout(Duration::from_secs(30)))
        .agent(slow.clone())
        .build()
        .unwrap();

    let started = Instant::now();
    let err = coordinator
        .submit("calculate my hourly rate", "s1")
        .await
        .unwrap_err();

    match err {
        ConductorError::CoordinatorTimeout { elapsed_ms } => assert!(elapsed_ms >= 2000),
        other => panic!("expected coordinator timeout, got {other:?}"),
    }
    // 1s estimate * 2.0 safety factor
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));

    let task = &coordinator.recent_tasks(1).await[0];
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(coordinator.agent_stats("slow").unwrap().failures, 1);
    assert_eq!(coordinator.metrics().timed_out, 1);
}

#[tokio::test(start_paused = true)]
async fn parallel_timeout_keeps_finished_results() {
    let fast = TestAgent::new("fast", 30, Reply::Ok(json!({"count": 3}), 0.9));
    let hung = TestAgent::new("hung", 60_000, Reply::Ok(json!("late"), 0.9));

    let coordinator = builder(vec![composite(
        "market_analysis",
        "market",
        &["fast", "hung"],
        TargetRelation::Independent,
    )])
    .register(descriptor("fast", &["jobs"]))
    .register(descriptor("hung", &["trends"]).with_task_timeout(Duration::from_secs(30)))
    .agent(fast)
    .agent(hung)
    .build()
    .unwrap();

    let started = Instant::now();
    let result = coordinator.submit("how is the market", "s1").await.unwrap();

    // 1s estimate * 2.0 safety factor
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(result.strategy_used, StrategyKind::Parallel);
    assert!(result.timed_out);
    assert!(result.success);
    assert!(result.partial);
    assert_eq!(result.payload, json!({"fast": {"count": 3}}));

    let hung_report = result
        .per_agent_results
        .iter()
        .find(|r| r.agent_id == "hung")
        .unwrap();
    assert_eq!(hung_report.status, TaskStatus::Cancelled);
    assert_eq!(coordinator.agent_stats("hung").unwrap().failures, 1);
    assert_eq!(coordinator.metrics().partial, 1);
}

#[tokio::test(start_paused = true)]
async fn pipeline_timeout_is_an_error_even_after_early_stages() {
    let first = TestAgent::new("first", 30, Reply::Ok(json!("notes"), 0.8));
    let second = TestAgent::new("second", 60_000, Reply::Echo);

    let coordinator = builder(vec![composite(
        "proposal_writing",
        "write a proposal",
        &["first", "second"],
        TargetRelation::Chained,
    )])
    .register(descriptor("first", &["research"]))
    .register(descriptor("second", &["writing"]).with_task_timeout(Duration::from_secs(30)))
    .agent(first)
    .agent(second.clone())
    .build()
    .unwrap();

    let started = Instant::now();
    let err = coordinator
        .submit("write a proposal for this gig", "s1")
        .await
        .unwrap_err();

    assert!(matches!(err, ConductorError::CoordinatorTimeout { .. }), "got {err:?}");
    // (1s + 1s) estimate * 2.0 safety factor
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(5));
    assert_eq!(second.calls(), 1);

    let tasks = coordinator.recent_tasks(2).await;
    let status_of = |agent: &str| {
        tasks
            .iter()
            .find(|t| t.assigned_agent == agent)
            .map(|t| t.status)
            .unwrap()
    };
    assert_eq!(status_of("first"), TaskStatus::Succeeded);
    assert_eq!(status_of("second"), TaskStatus::Cancelled);
    assert_eq!(coordinator.metrics().timed_out, 1);
}

#[tokio::test(start_paused = true)]
async fn dropped_submit_releases_request_and_records_tasks() {
    let slow = TestAgent::new("slow", 60_000, Reply::Ok(json!("late"), 0.9));
    let coordinator = builder(vec![rule("math", "calculate")])
        .register(descriptor("slow", &["math"]).with_task_timeout(Duration::from_secs(30)))
        .agent(slow.clone())
        .build()
        .unwrap();

    let outcome = tokio::time::timeout(
        Duration::from_millis(500),
        coordinator.submit("calculate it", "s1"),
    )
    .await;
    assert!(outcome.is_err());
    assert_eq!(slow.calls(), 1);

    assert_eq!(coordinator.active_requests(), 0);
    assert_eq!(coordinator.agent_stats("slow").unwrap().failures, 1);
    assert_eq!(coordinator.metrics().cancelled, 1);
    let task = &coordinator.recent_tasks(1).await[0];
    assert_eq!(task.assigned_agent, "slow");
    assert_eq!(task.status, TaskStatus::Cancelled);
}

#[tokio::test(start_paused = true)]
async fn cancel_by_request_id_stops_running_request() {
    let slow = TestAgent::new("slow", 60_000, Reply::Ok(json!("late"), 0.9));
    let coordinator = Arc::new(
        builder(vec![rule("math", "calculate")])
            .register(descriptor("slow", &["math"]).with_task_timeout(Duration::from_secs(30)))
            .agent(slow)
            .build()
            .unwrap(),
    );

    let handle = {
        let coordinator = Arc::clone(&coordinator);
        tokio::spawn(async move { coordinator.submit("calculate it", "s1").await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    let ids = coordinator.active_request_ids();
    assert_eq!(ids.len(), 1);
    assert!(coordinator.cancel(&ids[0]).await.unwrap());

    let err = handle.await.unwrap().unwrap_err();
    assert!(matches!(err, ConductorError::Cancelled), "got {err:?}");
    assert_eq!(coordinator.active_requests(), 0);
    assert_eq!(coordinator.metrics().cancelled, 1);
    // already finished
    assert!(!coordinator.cancel(&ids[0]).await.unwrap());
}

#[tokio::test]
async fn stock_config_routes_composite_phrases() {
    let config = AppConfig::load_from(concat!(env!("CARGO_MANIFEST_DIR"), "/config")).unwrap();
    let descriptors: Vec<_> = config.agents.iter().map(AgentSpec::descriptor).collect();
    let coordinator = CoordinatorBuilder::from_config(&config)
        .agents(demo_agents(&descriptors))
        .build()
        .unwrap();
    let context = SessionContext::empty("s1");

    let rate = coordinator
        .classifier()
        .classify("recommend a rate for this logo", &context)
        .await;
    assert_eq!(rate.strategy, StrategyKind::Negotiation);
    assert_eq!(rate.target_agents, vec!["math", "web_research"]);

    let proposal = coordinator
        .classifier()
        .classify("please write a proposal for this client", &context)
        .await;
    assert_eq!(proposal.strategy, StrategyKind::Pipeline);
    assert_eq!(proposal.target_agents, vec!["web_research", "proposal_writer"]);
}

#[tokio::test(start_paused = true)]
async fn repeated_requests_route_the_same_way() {
    let math = TestAgent::new("math", 10, Reply::Ok(json!(42), 0.9));
    let coordinator = builder(vec![rule("math", "calculate")])
        .register(descriptor("math", &["math"]))
        .agent(math.clone())
        .build()
        .unwrap();

    let first = coordinator.submit("calculate the total", "s1").await.unwrap();
    let second = coordinator.submit("calculate the total", "s1").await.unwrap();

    assert_eq!(first.routing.target_agents, second.routing.target_agents);
    assert_eq!(first.strategy_used, second.strategy_used);
    assert_eq!(first.payload, second.payload);
    assert_ne!(first.request_id, second.request_id);
    assert_eq!(math.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn negotiation_averages_disagreeing_numbers() {
    let math = TestAgent::new("math", 20, Reply::Ok(json!({"value": 100.0}), 0.6));
    let research = TestAgent::new("research", 20, Reply::Ok(json!({"value": 300.0}), 0.55));

    let coordinator = builder(vec![composite(
        "rate_recommendation",
        "what should i charge",
        &["math", "research"],
        TargetRelation::SameQuestion,
    )])
    .register(descriptor("math", &["math"]))
    .register(descriptor("research", &["research"]))
    .agent(math)
    .agent(research)
    .build()
    .unwrap();

    let result = coordinator
        .submit("What should I charge for a logo?", "s1")
        .await
        .unwrap();

    assert_eq!(result.strategy_used, StrategyKind::Negotiation);
    assert!(result.success);
    assert!(result.unresolved_conflicts.is_empty());
    match result.resolution {
        Some(Resolution::WeightedAverage { value, .. }) => {
            // equal health, so weights are 0.6 : 0.55
            let expected = (100.0 * 0.6 + 300.0 * 0.55) / 1.15;
            assert!((value - expected).abs() < 1e-6, "got {value}");
        }
        other => panic!("expected weighted average, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn negotiation_surfaces_unresolved_text_conflict() {
    let a = TestAgent::new("a", 20, Reply::Ok(json!("charge by the hour"), 0.7));
    let b = TestAgent::new("b", 20, Reply::Ok(json!("quote a fixed project fee"), 0.7));

    let coordinator = builder(vec![composite(
        "pricing",
        "pricing",
        &["a", "b"],
        TargetRelation::SameQuestion,
    )])
    .register(descriptor("a", &["pricing"]))
    .register(descriptor("b", &["pricing"]))
    .agent(a)
    .agent(b)
    .build()
    .unwrap();

    let result = coordinator.submit("pricing advice", "s1").await.unwrap();

    assert!(result.success);
    assert_eq!(result.unresolved_conflicts.len(), 1);
    assert_eq!(result.unresolved_conflicts[0].options.len(), 2);
    assert_eq!(result.payload["unresolved"], json!(true));
    assert_eq!(coordinator.metrics().unresolved_conflicts, 1);
}

#[tokio::test(start_paused = true)]
async fn unhealthy_agent_is_routed_around() {
    let alpha = TestAgent::new("alpha", 10, Reply::Fail("crashed".into()));
    let beta = TestAgent::new("beta", 10, Reply::Ok(json!("ok"), 0.8));

    let coordinator = builder(vec![rule("math", "calculate")])
        .register(descriptor("alpha", &["math"]))
        .register(descriptor("beta", &["math"]))
        .agent(alpha.clone())
        .agent(beta.clone())
        .build()
        .unwrap();

    // equal health: id order picks alpha first
    let first = coordinator.submit("calculate it", "s1").await.unwrap();
    assert_eq!(first.routing.target_agents, vec!["alpha"]);
    assert!(!first.success);

    let second = coordinator.submit("calculate it", "s1").await.unwrap();
    assert_eq!(second.routing.target_agents, vec!["beta"]);
    assert!(second.success);
}

#[tokio::test]
async fn sustained_low_health_excludes_agent_until_enabled() {
    let coordinator = builder(vec![rule("math", "calculate")])
        .register(descriptor("math", &["math"]))
        .agent(TestAgent::new("math", 10, Reply::Ok(json!(1), 0.9)))
        .build()
        .unwrap();

    let tracker = coordinator.tracker();
    let mut excluded_at = None;
    for i in 0..8 {
        let update = tracker
            .record("math", Outcome::Failure, Duration::from_millis(100))
            .unwrap()
            .unwrap();
        if update.newly_excluded {
            excluded_at = Some(i);
        }
    }
    // 0.4, 0.32, 0.256, 0.205, 0.164: third reading below 0.3 excludes
    assert_eq!(excluded_at, Some(4));

    let registry = coordinator.registry();
    assert!(!registry.is_routable("math"));
    assert!(registry.lookup("math").is_empty());

    let decision = coordinator
        .classifier()
        .classify("calculate it", &SessionContext::empty("s1"))
        .await;
    assert_eq!(decision.target_agents, vec!["general"]);

    registry.enable("math").unwrap();
    assert!(registry.is_routable("math"));
}

#[tokio::test(start_paused = true)]
async fn caller_cancellation_stops_running_tasks() {
    let slow = TestAgent::new("slow", 60_000, Reply::Ok(json!("late"), 0.9));
    let coordinator = Arc::new(
        builder(vec![rule("math", "calculate")])
            .register(descriptor("slow", &["math"]).with_task_timeout(Duration::from_secs(30)))
            .agent(slow.clone())
            .build()
            .unwrap(),
    );

    let cancel = CancellationToken::new();
    let handle = {
        let coordinator = Arc::clone(&coordinator);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            coordinator
                .submit_with_cancel("calculate it", "s1", cancel)
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(500)).await;
    cancel.cancel();
    let err = handle.await.unwrap().unwrap_err();

    assert!(matches!(err, ConductorError::Cancelled));
    assert_eq!(coordinator.metrics().cancelled, 1);
    assert_eq!(coordinator.active_requests(), 0);
    let task = &coordinator.recent_tasks(1).await[0];
    assert!(matches!(task.status, TaskStatus::Failed | TaskStatus::Cancelled));
}

#[tokio::test(start_paused = true)]
async fn interactions_are_appended_to_session_context() {
    use conductor::ContextStore;

    let store = Arc::new(InMemoryContextStore::default());
    let coordinator = builder(vec![rule("math", "calculate")])
        .register(descriptor("math", &["math"]))
        .agent(TestAgent::new("math", 10, Reply::Ok(json!(7), 0.9)))
        .context_store(store.clone())
        .build()
        .unwrap();

    coordinator.submit("calculate seven", "session-42").await.unwrap();
    coordinator.submit("hello there", "session-42").await.unwrap();

    let context = store.get("session-42").await.unwrap();
    assert_eq!(context.entries.len(), 2);
    let first = &context.entries[0];
    assert_eq!(first.kind, "interaction");
    assert_eq!(first.data["strategy"], json!("sequential"));
    assert_eq!(first.data["agents"], json!(["math"]));
    assert_eq!(context.entries[1].data["agents"], json!(["general"]));
}
