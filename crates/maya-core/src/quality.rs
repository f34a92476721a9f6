use std::sync::Arc;

use maya_bus::BusPublisher;
use maya_provider::{PromptStore, PromptVersionCommit, ReflectRequest, ReflectionService};
use maya_schema::{ConsoleEvent, ModelKind, PromptVersion, QualityStatus, SessionIdentity};
use serde_json::{Map, Value};
use tokio::sync::Mutex;

use crate::error::{ConsoleError, Result};

/// Response text sent with a degradation-triggered reflection, which has no
/// concrete response to critique.
pub const IMPROVEMENT_PLACEHOLDER_RESPONSE: &str = "(no response: prompt quality review)";
pub const DEFAULT_IMPROVEMENT_REASON: &str = "reflection: quality degraded";

/// An improved prompt waiting for operator approval.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedImprovement {
    pub prompt: String,
    /// The version the suggestion improves on.
    pub base: PromptVersion,
}

#[derive(Debug, Default)]
struct MonitorState {
    status: Option<QualityStatus>,
    history: Vec<PromptVersion>,
    staged: Option<StagedImprovement>,
}

/// Tracks the quality verdict of one prompt id and gates prompt updates
/// behind explicit approval.
pub struct QualityMonitor {
    prompt_id: String,
    model: ModelKind,
    session_id: SessionIdentity,
    store: Arc<dyn PromptStore>,
    reflection: Arc<dyn ReflectionService>,
    publisher: Option<BusPublisher>,
    state: Mutex<MonitorState>,
}

impl QualityMonitor {
    pub fn new(
        prompt_id: impl Into<String>,
        model: ModelKind,
        store: Arc<dyn PromptStore>,
        reflection: Arc<dyn ReflectionService>,
    ) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            model,
            session_id: SessionIdentity::new(),
            store,
            reflection,
            publisher: None,
            state: Mutex::new(MonitorState::default()),
        }
    }

    pub fn with_publisher(mut self, publisher: BusPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    pub async fn status(&self) -> Option<QualityStatus> {
        self.state.lock().await.status.clone()
    }

    pub async fn history(&self) -> Vec<PromptVersion> {
        self.state.lock().await.history.clone()
    }

    pub async fn staged(&self) -> Option<StagedImprovement> {
        self.state.lock().await.staged.clone()
    }

    /// Fetch the latest verdict. A failed poll keeps the previous one.
    pub async fn poll(&self) -> Option<QualityStatus> {
        let response = match self.store.quality(&self.prompt_id).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(prompt_id = %self.prompt_id, error = %e, "quality poll failed");
                return self.status().await;
            }
        };

        let next = response.to_status();
        let became_degraded = {
            let mut state = self.state.lock().await;
            let was_degraded = state.status.as_ref().is_some_and(|s| s.degraded);
            state.status = next.clone();
            !was_degraded && next.as_ref().is_some_and(|s| s.degraded)
        };

        if became_degraded {
            if let Some(status) = &next {
                tracing::warn!(
                    prompt_id = %self.prompt_id,
                    average = status.average,
                    threshold = status.threshold,
                    "prompt quality degraded"
                );
                self.publish(ConsoleEvent::QualityDegraded {
                    prompt_id: self.prompt_id.clone(),
                    average: status.average,
                    threshold: status.threshold,
                })
                .await;
            }
        }
        next
    }

    /// Feed one rolling-evaluation score into the store's quality window.
    pub async fn record_score(&self, score: f64) -> Result<()> {
        self.store.submit_score(&self.prompt_id, score).await?;
        tracing::debug!(prompt_id = %self.prompt_id, score, "prompt score recorded");
        Ok(())
    }

    pub async fn refresh_history(&self) -> Result<Vec<PromptVersion>> {
        let history = self.store.history(&self.prompt_id).await?;
        self.state.lock().await.history = history.clone();
        Ok(history)
    }

    /// Ask the reflection service for a better prompt and stage it.
    pub async fn request_improvement(&self) -> Result<StagedImprovement> {
        let (latest, iteration, average) = {
            let state = self.state.lock().await;
            (
                state.history.last().cloned(),
                state.history.len(),
                state.status.as_ref().map(|s| s.average),
            )
        };
        let (latest, iteration) = match latest {
            Some(latest) => (latest, iteration),
            None => {
                let history = self.refresh_history().await?;
                let len = history.len();
                let latest = history.into_iter().last().ok_or_else(|| {
                    ConsoleError::NoPromptHistory {
                        prompt_id: self.prompt_id.clone(),
                    }
                })?;
                (latest, len)
            }
        };

        let mut scores = Map::new();
        scores.insert(
            "overall".into(),
            serde_json::Number::from_f64(average.unwrap_or_default())
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );

        let response = self
            .reflection
            .reflect(ReflectRequest {
                prompt: latest.text.clone(),
                response: IMPROVEMENT_PLACEHOLDER_RESPONSE.to_string(),
                scores,
                model: self.model,
                session_id: self.session_id,
                iteration,
            })
            .await?;

        let staged = StagedImprovement {
            prompt: response.improved_prompt,
            base: latest,
        };
        self.state.lock().await.staged = Some(staged.clone());
        tracing::info!(prompt_id = %self.prompt_id, iteration, "improved prompt staged");
        self.publish(ConsoleEvent::ImprovementStaged {
            prompt_id: self.prompt_id.clone(),
        })
        .await;
        Ok(staged)
    }

    /// Replace the staged text before approval.
    pub async fn edit_staged(&self, prompt: impl Into<String>) -> Result<()> {
        let mut state = self.state.lock().await;
        let staged = state.staged.as_mut().ok_or(ConsoleError::NothingStaged)?;
        staged.prompt = prompt.into();
        Ok(())
    }

    /// Commit the staged prompt as a new version. On failure it stays staged.
    pub async fn approve(&self, reason: Option<String>) -> Result<PromptVersion> {
        let staged = self
            .state
            .lock()
            .await
            .staged
            .take()
            .ok_or(ConsoleError::NothingStaged)?;
        let reason = reason
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_IMPROVEMENT_REASON.to_string());

        let commit = PromptVersionCommit {
            prompt_id: self.prompt_id.clone(),
            prompt: staged.prompt.clone(),
            reason: reason.clone(),
            improved_from: staged.base.text.clone(),
        };
        if let Err(e) = self.store.commit_version(commit).await {
            self.state.lock().await.staged = Some(staged);
            return Err(e.into());
        }

        tracing::info!(prompt_id = %self.prompt_id, %reason, "prompt version committed");
        self.publish(ConsoleEvent::PromptVersionCommitted {
            prompt_id: self.prompt_id.clone(),
            reason: reason.clone(),
        })
        .await;

        if let Err(e) = self.refresh_history().await {
            tracing::warn!(prompt_id = %self.prompt_id, error = %e, "history refresh after commit failed");
        }

        Ok(PromptVersion {
            id: None,
            text: staged.prompt,
            reason: Some(reason),
            improved_from: Some(staged.base.text),
            created_at: None,
        })
    }

    /// Discard the staged prompt. Returns whether one was staged.
    pub async fn cancel(&self) -> bool {
        self.state.lock().await.staged.take().is_some()
    }

    async fn publish(&self, event: ConsoleEvent) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(event).await;
        }
    }
}
