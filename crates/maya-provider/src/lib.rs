pub mod http;
pub mod types;

use async_trait::async_trait;
use maya_schema::{FeedbackRecord, PromptVersion};
use thiserror::Error;

pub use http::{Endpoints, HttpBackend};
pub use types::*;

/// Failure talking to one of the backend services.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{service} api error (timeout) [retryable]: request timed out")]
    Timeout { service: &'static str },
    #[error("{service} api error (connect) [retryable]: {message}")]
    Connect {
        service: &'static str,
        message: String,
    },
    #[error("{service} api error ({status}): {body}")]
    Status {
        service: &'static str,
        status: u16,
        body: String,
    },
    #[error("{service} api error (decode): {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
    #[error("{service} api error: {message}")]
    Request {
        service: &'static str,
        message: String,
    },
}

impl ServiceError {
    pub fn service(&self) -> &'static str {
        match self {
            Self::Timeout { service }
            | Self::Connect { service, .. }
            | Self::Status { service, .. }
            | Self::Decode { service, .. }
            | Self::Request { service, .. } => service,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout { .. } | Self::Connect { .. } => true,
            Self::Status { status, .. } => *status == 429 || (500..=599).contains(status),
            Self::Decode { .. } | Self::Request { .. } => false,
        }
    }
}

/// Text generation for the persona.
#[async_trait]
pub trait GenerationService: Send + Sync {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ServiceError>;
}

/// Scoring of generated responses. The report is returned untouched; only
/// the score normalizer interprets it.
#[async_trait]
pub trait EvaluationService: Send + Sync {
    async fn evaluate(&self, request: EvaluateRequest) -> Result<serde_json::Value, ServiceError>;
}

/// Improved-prompt suggestions.
#[async_trait]
pub trait ReflectionService: Send + Sync {
    async fn reflect(&self, request: ReflectRequest) -> Result<ReflectResponse, ServiceError>;
}

/// Append-only log of operator feedback.
#[async_trait]
pub trait FeedbackStore: Send + Sync {
    async fn submit(&self, record: &FeedbackRecord) -> Result<(), ServiceError>;
    async fn aggregate(&self) -> Result<FeedbackAggregate, ServiceError>;
}

/// Versioned prompts and their quality tracking.
#[async_trait]
pub trait PromptStore: Send + Sync {
    async fn history(&self, prompt_id: &str) -> Result<Vec<PromptVersion>, ServiceError>;
    async fn quality(&self, prompt_id: &str) -> Result<PromptQualityResponse, ServiceError>;
    async fn commit_version(&self, commit: PromptVersionCommit) -> Result<(), ServiceError>;
    async fn submit_score(&self, prompt_id: &str, score: f64) -> Result<(), ServiceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(ServiceError::Timeout { service: "chat" }.is_retryable());
        assert!(ServiceError::Status {
            service: "chat",
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(ServiceError::Status {
            service: "chat",
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!ServiceError::Status {
            service: "evaluate",
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(!ServiceError::Decode {
            service: "evaluate",
            message: "eof".into()
        }
        .is_retryable());
    }

    #[test]
    fn error_text_names_service_and_marker() {
        let err = ServiceError::Connect {
            service: "chat",
            message: "refused".into(),
        };
        let text = err.to_string();
        assert!(text.contains("chat api error (connect)"));
        assert!(text.contains("[retryable]"));
        assert_eq!(err.service(), "chat");
    }
}
