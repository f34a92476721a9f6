use std::time::Duration;

use chrono::Utc;
use maya_provider::*;
use maya_schema::{
    ConversationHistoryEntry, FeedbackKind, FeedbackRecord, Mode, ModelKind, ScoreRecord,
    SessionIdentity,
};
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn backend(server: &MockServer) -> HttpBackend {
    HttpBackend::new(server.uri(), Duration::from_secs(5))
}

#[tokio::test]
async fn generate_posts_history_and_model() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_partial_json(serde_json::json!({
            "message": "any yoga tips?",
            "model": "openai",
            "conversation_history": [{"role": "system", "content": "You are Maya"}]
        })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"response": "Start with 10 minutes! 🌱"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let resp = backend(&server)
        .generate(GenerateRequest {
            message: "any yoga tips?".into(),
            conversation_history: vec![ConversationHistoryEntry::system("You are Maya")],
            model: Some(ModelKind::OpenAi),
        })
        .await
        .unwrap();

    assert_eq!(resp.response, "Start with 10 minutes! 🌱");
}

#[tokio::test]
async fn evaluate_returns_raw_report() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/evaluate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "evaluation_results": [{"scores": {"overall": 81.5, "engagement": 90}}],
            "status": "success"
        })))
        .mount(&server)
        .await;

    let report = backend(&server)
        .evaluate(EvaluateRequest::single(EvaluationScenario {
            name: "Chat Turn".into(),
            user_message: "hi".into(),
            expected_themes: vec![],
            conversation_history: vec![],
            model: None,
        }))
        .await
        .unwrap();

    assert_eq!(report["evaluation_results"][0]["scores"]["overall"], 81.5);
}

#[tokio::test]
async fn server_error_maps_to_status_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Failed to generate response"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .generate(GenerateRequest {
            message: "hi".into(),
            conversation_history: vec![],
            model: None,
        })
        .await
        .unwrap_err();

    match &err {
        ServiceError::Status { status, body, .. } => {
            assert_eq!(*status, 500);
            assert!(body.contains("Failed to generate"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
    assert!(err.is_retryable());
}

#[tokio::test]
async fn connection_refused_is_retryable_connect_error() {
    let backend = HttpBackend::new("http://127.0.0.1:9", Duration::from_secs(5));
    let err = backend
        .generate(GenerateRequest {
            message: "ping".into(),
            conversation_history: vec![],
            model: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Connect { service: "chat", .. }));
    assert!(err.to_string().contains("[retryable]"));
}

#[tokio::test]
async fn undecodable_body_is_decode_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/reflect"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = backend(&server)
        .reflect(ReflectRequest {
            prompt: "You are Maya".into(),
            response: "hello".into(),
            scores: serde_json::Map::new(),
            model: ModelKind::Gemini,
            session_id: SessionIdentity::new(),
            iteration: 1,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Decode { service: "reflect", .. }));
}

#[tokio::test]
async fn prompt_store_round_trip_uses_prompt_id_paths() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/prompt/history/default"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "history": [
                {"prompt": "v1", "reason": "initial"},
                {"prompt": "v2", "reason": "reflection", "improved_from": "v1"}
            ]
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/prompt/quality/default"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "ok", "degraded": false, "average": 84.0, "threshold": 70.0, "scores": [80, 88]
        })))
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/prompt/score"))
        .and(body_partial_json(
            serde_json::json!({"prompt_id": "default", "score": 77.5}),
        ))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("POST"))
        .and(path("/prompt/version"))
        .and(body_partial_json(serde_json::json!({
            "prompt_id": "default", "prompt": "v3", "improved_from": "v2"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend(&server);
    let history = backend.history("default").await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].text, "v2");

    let quality = backend.quality("default").await.unwrap();
    assert_eq!(quality.to_status().unwrap().average, 84.0);

    backend.submit_score("default", 77.5).await.unwrap();
    backend
        .commit_version(PromptVersionCommit {
            prompt_id: "default".into(),
            prompt: "v3".into(),
            reason: "reflection: quality degraded".into(),
            improved_from: "v2".into(),
        })
        .await
        .unwrap();
}

#[tokio::test]
async fn feedback_submit_and_aggregate() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/feedback"))
        .and(body_partial_json(serde_json::json!({
            "feedback": "like", "mode": "manual", "model": "gemini", "scores": {"overall": 87.0}
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/feedback/all"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "default": [
                {"session_id": "A", "feedback": "like", "timestamp": "2026-01-01T10:00:00Z"},
                {"session_id": "B", "feedback": "dislike", "timestamp": "2026-01-01T11:00:00Z"}
            ],
            "alt": []
        })))
        .mount(&server)
        .await;

    let backend = backend(&server);
    backend
        .submit(&FeedbackRecord {
            session_id: SessionIdentity::new(),
            model: ModelKind::Gemini,
            response_text: "hi".into(),
            feedback: FeedbackKind::Like,
            prompt_text: "You are Maya".into(),
            mode: Mode::Manual,
            scores: ScoreRecord::new(87.0),
            timestamp: Utc::now(),
            response_time_seconds: Some(1.2),
        })
        .await
        .unwrap();

    let aggregate = backend.aggregate().await.unwrap();
    assert_eq!(aggregate.len(), 2);
    assert_eq!(aggregate["default"].len(), 2);
    assert_eq!(aggregate["default"][1].kind(), Some(FeedbackKind::Dislike));
}

#[tokio::test]
async fn custom_endpoints_are_honoured() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v2/generate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "ok"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let backend = backend(&server).with_endpoints(Endpoints {
        chat: "/api/v2/generate".into(),
        ..Endpoints::default()
    });
    let resp = backend
        .generate(GenerateRequest {
            message: "hi".into(),
            conversation_history: vec![],
            model: None,
        })
        .await
        .unwrap();
    assert_eq!(resp.response, "ok");
}

#[tokio::test]
async fn configured_timeout_applies_to_requests() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"response": "too late"}))
                .set_delay(Duration::from_millis(500)),
        )
        .mount(&server)
        .await;

    let err = HttpBackend::new(server.uri(), Duration::from_millis(50))
        .generate(GenerateRequest {
            message: "hi".into(),
            conversation_history: vec![],
            model: None,
        })
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Timeout { service: "chat" }));
    assert!(err.is_retryable());
}
