use std::sync::Arc;
use std::time::Duration;

use maya_core::{
    spawn_poller, FeedbackPolicy, FeedbackScorer, MetricsAggregator, MetricsConfig,
    NewScenario, ScenarioRunner, Services,
};
use maya_provider::HttpBackend;
use maya_schema::{FeedbackKind, HealthGauge, ModelKind};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn services(server: &MockServer) -> Services {
    Services::from_backend(HttpBackend::new(server.uri(), Duration::from_secs(5)))
}

fn scenario_runner(server: &MockServer) -> ScenarioRunner {
    let services = services(server);
    let scorer = Arc::new(FeedbackScorer::new(
        services.feedback.clone(),
        FeedbackPolicy::default(),
    ));
    ScenarioRunner::new(
        services.generation,
        services.evaluation,
        services.prompts,
        scorer,
        "default",
        ModelKind::Gemini,
    )
}

#[tokio::test]
async fn metrics_poll_derives_snapshot_and_keeps_it_on_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feedback/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "default": [
                {"session_id": "A", "feedback": "like", "timestamp": "2026-05-01T10:00:00Z",
                 "scores": {"overall": 74}, "response_time_seconds": 1.0},
                {"session_id": "A", "feedback": "like", "timestamp": "2026-05-01T10:05:00Z",
                 "scores": {"overall": 76}, "response_time_seconds": 3.0}
            ],
            "alt": [
                {"session_id": "B", "feedback": "like", "timestamp": "2026-05-01T10:10:00Z",
                 "scores": {"overall": 75}},
                {"session_id": "B", "feedback": "dislike", "timestamp": "2026-05-01T10:15:00Z",
                 "scores": {"overall": 75}}
            ]
        })))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/feedback/all"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let aggregator = MetricsAggregator::new(services(&server).feedback, MetricsConfig::default());
    let first = aggregator.poll().await.unwrap();
    assert_eq!(first.total_conversations, 2);
    assert_eq!(first.satisfaction, 3.75);
    assert_eq!(first.avg_response_time, 2.0);
    assert_eq!(first.gauge, HealthGauge::Warning);

    let second = aggregator.poll().await.unwrap();
    assert_eq!(second, first);
}

#[tokio::test]
async fn metrics_poll_before_any_success_has_no_snapshot() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feedback/all"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let aggregator = MetricsAggregator::new(services(&server).feedback, MetricsConfig::default());
    assert!(aggregator.poll().await.is_none());
    assert!(aggregator.latest().await.is_none());
}

#[tokio::test]
async fn poller_drives_aggregator_until_shutdown() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/feedback/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "default": [{"session_id": "A", "feedback": "like", "inappropriate": true,
                         "scores": {"overall": 95}}]
        })))
        .mount(&server)
        .await;

    let aggregator = Arc::new(MetricsAggregator::new(
        services(&server).feedback,
        MetricsConfig::default(),
    ));
    let polled = aggregator.clone();
    let handle = spawn_poller("metrics", Duration::from_millis(20), move || {
        let polled = polled.clone();
        async move {
            polled.poll().await;
        }
    });

    let mut snapshot = None;
    for _ in 0..50 {
        snapshot = aggregator.latest().await;
        if snapshot.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    handle.shutdown().await;

    assert_eq!(
        snapshot.unwrap().gauge,
        HealthGauge::InappropriateContent
    );
}

#[tokio::test]
async fn scenario_run_scores_and_feeds_quality() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_partial_json(json!({
            "message": "You are Maya\nI'm new to plant-based eating. Could you share a simple but delicious vegan dinner recipe?",
            "conversation_history": []
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Try chickpea curry!"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/evaluate"))
        .and(body_partial_json(json!({"test_scenarios": [{
            "name": "Vegan Recipe Request",
            "expected_themes": ["plant-based cooking", "beginner-friendly", "practical advice", "encouragement", "budget"]
        }]})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "evaluation_results": [{"scores": {"overall": 86.0}}]
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/prompt/score"))
        .and(body_partial_json(json!({"prompt_id": "default", "score": 86.0})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/feedback"))
        .and(body_partial_json(json!({"mode": "scenario", "scores": {"overall": 91.0}})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let runner = scenario_runner(&server);
    let themes = runner.add_theme("2", "  budget ").await.unwrap();
    assert_eq!(themes.last().map(String::as_str), Some("budget"));
    assert_eq!(runner.add_theme("2", "budget").await.unwrap().len(), 5);

    let result = runner.run("2", "You are Maya").await.unwrap();
    assert_eq!(result.outcome.overall(), Some(86.0));
    assert_eq!(result.response_text, "Try chickpea curry!");

    let record = runner.feedback("2", FeedbackKind::Like).await.unwrap();
    assert_eq!(record.scores.overall, 91.0);
}

#[tokio::test]
async fn scenario_catalogue_edits() {
    let server = MockServer::start().await;
    let runner = scenario_runner(&server);

    assert!(runner
        .add_scenario(NewScenario {
            name: "  ".into(),
            user_message: "hi".into(),
            ..NewScenario::default()
        })
        .await
        .is_none());

    let added = runner
        .add_scenario(NewScenario {
            name: " Zero Waste Kitchen ".into(),
            description: "Tips for less packaging".into(),
            user_message: "How do I cut plastic in my kitchen?".into(),
            expected_themes: vec!["practical advice".into(), "practical advice".into()],
            category: String::new(),
        })
        .await
        .unwrap();
    assert_eq!(added.name, "Zero Waste Kitchen");
    assert_eq!(added.category, "lifestyle");
    assert_eq!(added.expected_themes, vec!["practical advice"]);
    assert_eq!(runner.scenarios().await.len(), 6);

    let remaining = runner.remove_theme("1", "yoga").await.unwrap();
    assert!(!remaining.contains(&"yoga".to_string()));
    assert!(matches!(
        runner.run("missing", "p").await,
        Err(maya_core::ConsoleError::UnknownScenario(_))
    ));
}
