use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use maya_bus::BusPublisher;
use maya_provider::FeedbackStore;
use maya_schema::{
    ConsoleEvent, FeedbackKind, FeedbackRecord, MessageId, Mode, ModelKind, ScoreRecord,
    SessionIdentity,
};
use tokio::sync::Mutex;

use crate::config::FeedbackPolicy;
use crate::error::{ConsoleError, Result};

/// What a feedback click refers to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TurnRef {
    Message(MessageId),
    Scenario(String),
    Comparison { mode: Mode, model: ModelKind },
}

/// Everything known about the rated turn at click time.
#[derive(Debug, Clone)]
pub struct FeedbackContext {
    pub score: Option<ScoreRecord>,
    pub session_id: SessionIdentity,
    pub model: ModelKind,
    pub response_text: String,
    pub prompt_text: String,
    pub mode: Mode,
    pub response_time_seconds: Option<f64>,
}

/// Apply the policy delta to a base score. Non-finite bases fall back to
/// the policy baseline.
pub fn adjusted_overall(policy: &FeedbackPolicy, base: f64, kind: FeedbackKind) -> f64 {
    let base = if base.is_finite() {
        base
    } else {
        policy.baseline
    };
    match kind {
        FeedbackKind::Like => base + policy.like_delta,
        FeedbackKind::Dislike => base - policy.dislike_delta,
    }
}

/// Turns like/dislike clicks into adjusted audit records.
pub struct FeedbackScorer {
    store: Arc<dyn FeedbackStore>,
    policy: FeedbackPolicy,
    publisher: Option<BusPublisher>,
    choices: Mutex<HashMap<TurnRef, FeedbackKind>>,
}

impl FeedbackScorer {
    pub fn new(store: Arc<dyn FeedbackStore>, policy: FeedbackPolicy) -> Self {
        Self {
            store,
            policy,
            publisher: None,
            choices: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_publisher(mut self, publisher: BusPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn policy(&self) -> &FeedbackPolicy {
        &self.policy
    }

    /// Last choice shown for a turn, whether or not it was submitted.
    pub async fn choice(&self, turn: &TurnRef) -> Option<FeedbackKind> {
        self.choices.lock().await.get(turn).copied()
    }

    /// Record the click and, when the turn was scored, submit one record.
    ///
    /// Every click submits; the store keeps one record per click. An
    /// unscored turn keeps the local choice and returns
    /// [`ConsoleError::FeedbackDisabled`] without a network call.
    pub async fn submit(
        &self,
        turn: TurnRef,
        kind: FeedbackKind,
        context: FeedbackContext,
    ) -> Result<FeedbackRecord> {
        self.choices.lock().await.insert(turn.clone(), kind);

        let Some(score) = context.score else {
            tracing::debug!(?turn, "feedback on unscored turn kept locally");
            return Err(ConsoleError::FeedbackDisabled);
        };

        let adjusted = adjusted_overall(&self.policy, score.overall, kind);
        let record = FeedbackRecord {
            session_id: context.session_id,
            model: context.model,
            response_text: context.response_text,
            feedback: kind,
            prompt_text: context.prompt_text,
            mode: context.mode,
            scores: score.with_overall(adjusted),
            timestamp: Utc::now(),
            response_time_seconds: context.response_time_seconds,
        };

        self.store.submit(&record).await?;
        tracing::info!(
            session_id = %record.session_id,
            mode = %record.mode,
            model = %record.model,
            feedback = %kind,
            adjusted_overall = adjusted,
            "feedback submitted"
        );

        if let Some(publisher) = &self.publisher {
            publisher
                .publish(ConsoleEvent::FeedbackSubmitted {
                    session_id: record.session_id,
                    mode: record.mode,
                    model: record.model,
                    feedback: kind,
                    adjusted_overall: adjusted,
                })
                .await;
        }
        Ok(record)
    }
}
