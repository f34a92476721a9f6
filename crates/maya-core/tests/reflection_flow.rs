use std::sync::Arc;
use std::time::Duration;

use maya_core::{
    ComparisonInput, ComparisonRunner, FeedbackPolicy, FeedbackScorer, ReflectionController,
    ReflectionState, ReflectionStep, Services,
};
use maya_provider::HttpBackend;
use maya_schema::{FeedbackKind, Mode, ModelKind, SessionIdentity};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn runner(server: &MockServer) -> ComparisonRunner {
    let services = Services::from_backend(HttpBackend::new(server.uri(), Duration::from_secs(5)));
    let controller = Arc::new(ReflectionController::new(
        services.generation.clone(),
        services.evaluation.clone(),
        services.reflection.clone(),
        3,
    ));
    let scorer = Arc::new(FeedbackScorer::new(
        services.feedback.clone(),
        FeedbackPolicy::default(),
    ));
    ComparisonRunner::new(controller, scorer)
}

async fn mount_models(server: &MockServer, gemini_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_partial_json(json!({"model": "gemini"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "Gemini says hi 🌱"})))
        .expect(gemini_calls)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_partial_json(json!({"model": "openai"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "OpenAI says hi"})))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/evaluate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "evaluation_results": [{"scores": {"overall": 72.0, "authenticity": 70}}]
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path("/feedback"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

#[tokio::test]
async fn comparison_scores_both_models() {
    let server = MockServer::start().await;
    mount_models(&server, 1).await;

    let runner = runner(&server);
    let result = runner
        .run(
            "You are Maya",
            ComparisonInput::Manual("favourite smoothie?".into()),
            SessionIdentity::new(),
        )
        .await;

    assert_eq!(result.mode, Mode::Manual);
    assert!(result.failures.is_empty());
    let models: Vec<ModelKind> = result.runs.iter().map(|r| r.model).collect();
    assert_eq!(models, vec![ModelKind::Gemini, ModelKind::OpenAi]);
    for run in &result.runs {
        assert_eq!(run.entry.iteration, 0);
        assert_eq!(run.entry.scores.overall(), Some(72.0));
        assert!(run.estimated_cost > 0.0);
    }
}

#[tokio::test]
async fn three_dislikes_stop_after_three_generations() {
    let server = MockServer::start().await;
    mount_models(&server, 3).await;
    Mock::given(method("POST"))
        .and(path("/reflect"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"improved_prompt": "You are Maya, warmer"})),
        )
        .expect(2)
        .mount(&server)
        .await;

    let runner = runner(&server);
    runner
        .run(
            "You are Maya",
            ComparisonInput::Manual("hi".into()),
            SessionIdentity::new(),
        )
        .await;

    let mut steps = Vec::new();
    for _ in 0..3 {
        let outcome = runner
            .feedback(Mode::Manual, ModelKind::Gemini, FeedbackKind::Dislike)
            .await
            .unwrap();
        assert!(outcome.record.is_some());
        steps.push(outcome.step);
    }

    assert!(matches!(steps[0], ReflectionStep::Iterated(_)));
    assert!(matches!(steps[1], ReflectionStep::Iterated(_)));
    assert_eq!(steps[2], ReflectionStep::Exhausted);

    let controller = runner.controller();
    let indices: Vec<usize> = controller
        .entries(Mode::Manual, ModelKind::Gemini)
        .await
        .iter()
        .map(|e| e.iteration)
        .collect();
    assert_eq!(indices, vec![0, 1, 2]);
    assert_eq!(
        controller.state(Mode::Manual, ModelKind::Gemini).await,
        ReflectionState::Exhausted
    );
    // The OpenAI loop is untouched.
    assert_eq!(
        controller.state(Mode::Manual, ModelKind::OpenAi).await,
        ReflectionState::AwaitingFeedback { iteration: 0 }
    );
    assert_eq!(
        runner
            .latest(Mode::Manual, ModelKind::Gemini)
            .await
            .unwrap()
            .entry
            .prompt_text,
        "You are Maya, warmer"
    );
}

#[tokio::test]
async fn like_accepts_and_submits_feedback() {
    let server = MockServer::start().await;
    mount_models(&server, 1).await;
    Mock::given(method("POST"))
        .and(path("/reflect"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let runner = runner(&server);
    runner
        .run(
            "You are Maya",
            ComparisonInput::Manual("hi".into()),
            SessionIdentity::new(),
        )
        .await;
    let outcome = runner
        .feedback(Mode::Manual, ModelKind::OpenAi, FeedbackKind::Like)
        .await
        .unwrap();

    assert_eq!(outcome.step, ReflectionStep::Accepted);
    assert_eq!(outcome.record.unwrap().scores.overall, 77.0);
}

#[tokio::test]
async fn failed_model_is_reported_separately() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_partial_json(json!({"model": "openai"})))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"response": "hello"})))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/evaluate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "evaluation_results": [{"scores": {"overall": 81.0}}]
        })))
        .mount(&server)
        .await;

    let runner = runner(&server);
    let result = runner
        .run(
            "You are Maya",
            ComparisonInput::Manual("hi".into()),
            SessionIdentity::new(),
        )
        .await;

    assert_eq!(result.runs.len(), 1);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].0, ModelKind::OpenAi);
    assert_eq!(
        runner
            .controller()
            .state(Mode::Manual, ModelKind::OpenAi)
            .await,
        ReflectionState::Failed { iteration: 0 }
    );
}
