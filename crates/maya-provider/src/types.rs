use std::collections::BTreeMap;

use maya_schema::{
    ConversationHistoryEntry, FeedbackKind, ModelKind, PromptVersion, QualityStatus,
    SessionIdentity,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub message: String,
    pub conversation_history: Vec<ConversationHistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerateResponse {
    pub response: String,
}

/// One scenario inside an evaluation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationScenario {
    pub name: String,
    pub user_message: String,
    #[serde(default)]
    pub expected_themes: Vec<String>,
    pub conversation_history: Vec<ConversationHistoryEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelKind>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluateRequest {
    pub test_scenarios: Vec<EvaluationScenario>,
}

impl EvaluateRequest {
    pub fn single(scenario: EvaluationScenario) -> Self {
        Self {
            test_scenarios: vec![scenario],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectRequest {
    pub prompt: String,
    pub response: String,
    pub scores: Map<String, Value>,
    pub model: ModelKind,
    pub session_id: SessionIdentity,
    pub iteration: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReflectResponse {
    pub improved_prompt: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PromptHistoryResponse {
    #[serde(default)]
    pub history: Vec<PromptVersion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptQualityResponse {
    pub status: String,
    #[serde(default)]
    pub degraded: bool,
    #[serde(default)]
    pub average: Option<f64>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub scores: Vec<f64>,
}

impl PromptQualityResponse {
    /// Verdict when the store reports `status: "ok"`; any other status means
    /// there is not enough data to judge yet.
    pub fn to_status(&self) -> Option<QualityStatus> {
        if self.status != "ok" {
            return None;
        }
        Some(QualityStatus {
            recent_scores: self.scores.clone(),
            average: self.average.unwrap_or_default(),
            threshold: self.threshold.unwrap_or_default(),
            degraded: self.degraded,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersionCommit {
    pub prompt_id: String,
    pub prompt: String,
    pub reason: String,
    pub improved_from: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptScoreSubmit {
    pub prompt_id: String,
    pub score: f64,
}

/// A feedback record as read back from the store. Older records may be
/// missing fields, so everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredFeedback {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub response_text: Option<String>,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub prompt_text: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub scores: Option<Map<String, Value>>,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(default, alias = "response_time")]
    pub response_time_seconds: Option<f64>,
    #[serde(default)]
    pub inappropriate: bool,
}

impl StoredFeedback {
    pub fn kind(&self) -> Option<FeedbackKind> {
        match self.feedback.as_deref() {
            Some("like") => Some(FeedbackKind::Like),
            Some("dislike") => Some(FeedbackKind::Dislike),
            _ => None,
        }
    }

    pub fn overall(&self) -> Option<f64> {
        self.scores
            .as_ref()
            .and_then(|scores| scores.get("overall"))
            .and_then(Value::as_f64)
    }
}

/// Feedback store contents keyed by prompt id.
pub type FeedbackAggregate = BTreeMap<String, Vec<StoredFeedback>>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_request_omits_missing_model() {
        let req = GenerateRequest {
            message: "hi".into(),
            conversation_history: vec![ConversationHistoryEntry::system("You are Maya")],
            model: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("model").is_none());
        assert_eq!(json["conversation_history"][0]["role"], "system");
    }

    #[test]
    fn quality_response_without_ok_has_no_status() {
        let resp: PromptQualityResponse =
            serde_json::from_str(r#"{"status":"insufficient_data","scores":[71.0]}"#).unwrap();
        assert!(resp.to_status().is_none());
        assert_eq!(resp.scores, vec![71.0]);
    }

    #[test]
    fn quality_response_ok_builds_status() {
        let resp: PromptQualityResponse = serde_json::from_str(
            r#"{"status":"ok","degraded":true,"average":64.5,"threshold":70,"scores":[60,69]}"#,
        )
        .unwrap();
        let status = resp.to_status().unwrap();
        assert!(status.degraded);
        assert_eq!(status.average, 64.5);
        assert_eq!(status.threshold, 70.0);
        assert_eq!(status.recent_scores, vec![60.0, 69.0]);
    }

    #[test]
    fn stored_feedback_is_lenient() {
        let entry: StoredFeedback = serde_json::from_str(
            r#"{"session_id":"A","feedback":"like","scores":{"overall":87},"response_time":1.5}"#,
        )
        .unwrap();
        assert_eq!(entry.kind(), Some(FeedbackKind::Like));
        assert_eq!(entry.overall(), Some(87.0));
        assert_eq!(entry.response_time_seconds, Some(1.5));
        assert!(!entry.inappropriate);

        let empty: StoredFeedback = serde_json::from_str("{}").unwrap();
        assert_eq!(empty.kind(), None);
        assert_eq!(empty.overall(), None);
    }
}
