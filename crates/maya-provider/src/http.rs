//! JSON-over-HTTP client for the persona backend.
//!
//! One `HttpBackend` implements every service trait; each call maps
//! transport failures onto [`ServiceError`] the same way.

use std::time::Duration;

use async_trait::async_trait;
use maya_schema::{FeedbackRecord, PromptVersion};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::{
    EvaluateRequest, EvaluationService, FeedbackAggregate, FeedbackStore, GenerateRequest,
    GenerateResponse, GenerationService, PromptHistoryResponse, PromptQualityResponse,
    PromptScoreSubmit, PromptStore, PromptVersionCommit, ReflectRequest, ReflectResponse,
    ReflectionService, ServiceError,
};

const PROMPT_ID_PLACEHOLDER: &str = "{prompt_id}";

/// Request paths, relative to the backend base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    pub chat: String,
    pub evaluate: String,
    pub reflect: String,
    pub feedback_submit: String,
    pub feedback_aggregate: String,
    /// May contain `{prompt_id}`.
    pub prompt_history: String,
    /// May contain `{prompt_id}`.
    pub prompt_quality: String,
    pub prompt_version: String,
    pub prompt_score: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            chat: "/chat".into(),
            evaluate: "/evaluate".into(),
            reflect: "/reflect".into(),
            feedback_submit: "/feedback".into(),
            feedback_aggregate: "/feedback/all".into(),
            prompt_history: "/prompt/history/{prompt_id}".into(),
            prompt_quality: "/prompt/quality/{prompt_id}".into(),
            prompt_version: "/prompt/version".into(),
            prompt_score: "/prompt/score".into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    endpoints: Endpoints,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|e| {
                    tracing::warn!(error = %e, ?timeout, "http client build failed, falling back to default client without timeout");
                    reqwest::Client::default()
                }),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            endpoints: Endpoints::default(),
        }
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn prompt_url(&self, template: &str, prompt_id: &str) -> String {
        self.url(&template.replace(PROMPT_ID_PLACEHOLDER, prompt_id))
    }

    async fn send(
        &self,
        service: &'static str,
        builder: RequestBuilder,
    ) -> Result<Response, ServiceError> {
        let resp = match builder.send().await {
            Ok(r) => r,
            Err(e) if e.is_timeout() => return Err(ServiceError::Timeout { service }),
            Err(e) if e.is_connect() => {
                return Err(ServiceError::Connect {
                    service,
                    message: e.to_string(),
                })
            }
            Err(e) => {
                return Err(ServiceError::Request {
                    service,
                    message: e.to_string(),
                })
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            tracing::debug!(service, status = status.as_u16(), "backend rejected request");
            return Err(ServiceError::Status {
                service,
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn decode<R: DeserializeOwned>(
        service: &'static str,
        resp: Response,
    ) -> Result<R, ServiceError> {
        resp.json::<R>().await.map_err(|e| ServiceError::Decode {
            service,
            message: e.to_string(),
        })
    }

    async fn post_json<T: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        service: &'static str,
        url: String,
        body: &T,
    ) -> Result<R, ServiceError> {
        let resp = self.send(service, self.client.post(url).json(body)).await?;
        Self::decode(service, resp).await
    }

    /// POST where the body of a successful answer carries nothing we need.
    async fn post_ack<T: Serialize + ?Sized>(
        &self,
        service: &'static str,
        url: String,
        body: &T,
    ) -> Result<(), ServiceError> {
        self.send(service, self.client.post(url).json(body)).await?;
        Ok(())
    }

    async fn get_json<R: DeserializeOwned>(
        &self,
        service: &'static str,
        url: String,
    ) -> Result<R, ServiceError> {
        let resp = self.send(service, self.client.get(url)).await?;
        Self::decode(service, resp).await
    }
}

#[async_trait]
impl GenerationService for HttpBackend {
    async fn generate(&self, request: GenerateRequest) -> Result<GenerateResponse, ServiceError> {
        self.post_json("chat", self.url(&self.endpoints.chat), &request)
            .await
    }
}

#[async_trait]
impl EvaluationService for HttpBackend {
    async fn evaluate(&self, request: EvaluateRequest) -> Result<serde_json::Value, ServiceError> {
        self.post_json("evaluate", self.url(&self.endpoints.evaluate), &request)
            .await
    }
}

#[async_trait]
impl ReflectionService for HttpBackend {
    async fn reflect(&self, request: ReflectRequest) -> Result<ReflectResponse, ServiceError> {
        self.post_json("reflect", self.url(&self.endpoints.reflect), &request)
            .await
    }
}

#[async_trait]
impl FeedbackStore for HttpBackend {
    async fn submit(&self, record: &FeedbackRecord) -> Result<(), ServiceError> {
        self.post_ack("feedback", self.url(&self.endpoints.feedback_submit), record)
            .await
    }

    async fn aggregate(&self) -> Result<FeedbackAggregate, ServiceError> {
        self.get_json("feedback", self.url(&self.endpoints.feedback_aggregate))
            .await
    }
}

#[async_trait]
impl PromptStore for HttpBackend {
    async fn history(&self, prompt_id: &str) -> Result<Vec<PromptVersion>, ServiceError> {
        let url = self.prompt_url(&self.endpoints.prompt_history, prompt_id);
        let resp: PromptHistoryResponse = self.get_json("prompt", url).await?;
        Ok(resp.history)
    }

    async fn quality(&self, prompt_id: &str) -> Result<PromptQualityResponse, ServiceError> {
        let url = self.prompt_url(&self.endpoints.prompt_quality, prompt_id);
        self.get_json("prompt", url).await
    }

    async fn commit_version(&self, commit: PromptVersionCommit) -> Result<(), ServiceError> {
        self.post_ack("prompt", self.url(&self.endpoints.prompt_version), &commit)
            .await
    }

    async fn submit_score(&self, prompt_id: &str, score: f64) -> Result<(), ServiceError> {
        let body = PromptScoreSubmit {
            prompt_id: prompt_id.to_string(),
            score,
        };
        self.post_ack("prompt", self.url(&self.endpoints.prompt_score), &body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let backend = HttpBackend::new("http://localhost:8000/", Duration::from_secs(5));
        assert_eq!(backend.base_url(), "http://localhost:8000");
        assert_eq!(backend.url("/chat"), "http://localhost:8000/chat");
        assert_eq!(backend.url("evaluate"), "http://localhost:8000/evaluate");
    }

    #[test]
    fn prompt_url_substitutes_id() {
        let backend = HttpBackend::new("http://host", Duration::from_secs(5));
        assert_eq!(
            backend.prompt_url("/prompt/history/{prompt_id}", "default"),
            "http://host/prompt/history/default"
        );
    }

    #[test]
    fn endpoints_fill_missing_fields_from_defaults() {
        let endpoints: Endpoints = serde_json::from_str(r#"{"chat":"/v2/chat"}"#).unwrap();
        assert_eq!(endpoints.chat, "/v2/chat");
        assert_eq!(endpoints.evaluate, "/evaluate");
        assert_eq!(endpoints.feedback_aggregate, "/feedback/all");
    }
}
