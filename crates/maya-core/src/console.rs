use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use maya_bus::BusPublisher;
use maya_provider::{EvaluationScenario, EvaluationService, GenerateRequest};
use maya_schema::{
    ConsoleEvent, ConversationHistoryEntry, FeedbackKind, FeedbackRecord, Message, MessageId,
    Mode, ModelKind, ScoreOutcome, Sender, SessionIdentity,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::config::ConsoleConfig;
use crate::error::{ConsoleError, Result};
use crate::feedback::{FeedbackContext, FeedbackScorer, TurnRef};
use crate::normalizer::evaluate_scenario;
use crate::poller::{spawn_poller, PollHandle};
use crate::quality::QualityMonitor;
use crate::services::Services;
use crate::session::SessionState;
use crate::trigger::{EvaluationPlan, EvaluationTrigger};

/// In-character reply shown when generation cannot complete.
pub const FALLBACK_REPLY: &str =
    "Oops! I'm having a little technical hiccup right now. Can you try again in a moment? 💫";

/// Context of a reply as it stood when it was generated.
#[derive(Debug, Clone)]
struct ReplyMeta {
    latency: Duration,
    fallback: bool,
    session_id: SessionIdentity,
    prompt_text: String,
}

/// Result of one chat exchange. The evaluations keep running in the
/// background; awaiting the handles is optional.
#[derive(Debug)]
pub struct ChatTurn {
    pub user: Message,
    pub reply: Message,
    pub fallback: bool,
    pub latency: Duration,
    pub evaluation: Option<JoinHandle<ScoreOutcome>>,
    pub rolling: Option<JoinHandle<ScoreOutcome>>,
}

type Scoreboard = Arc<Mutex<HashMap<MessageId, ScoreOutcome>>>;

/// Live chat with the persona: session tracking, scoring and feedback.
pub struct Console {
    prompt_id: String,
    model: ModelKind,
    services: Services,
    session: Mutex<SessionState>,
    trigger: Mutex<EvaluationTrigger>,
    scores: Scoreboard,
    replies: Mutex<HashMap<MessageId, ReplyMeta>>,
    feedback: Arc<FeedbackScorer>,
    quality: Arc<QualityMonitor>,
    publisher: Option<BusPublisher>,
}

impl Console {
    pub fn new(
        config: &ConsoleConfig,
        services: Services,
        initial_prompt: impl Into<String>,
        publisher: Option<BusPublisher>,
    ) -> Self {
        let mut feedback = FeedbackScorer::new(services.feedback.clone(), config.feedback);
        let mut quality = QualityMonitor::new(
            config.prompt_id.clone(),
            config.default_model,
            services.prompts.clone(),
            services.reflection.clone(),
        );
        if let Some(publisher) = &publisher {
            feedback = feedback.with_publisher(publisher.clone());
            quality = quality.with_publisher(publisher.clone());
        }

        Self {
            prompt_id: config.prompt_id.clone(),
            model: config.default_model,
            services,
            session: Mutex::new(SessionState::new(initial_prompt)),
            trigger: Mutex::new(EvaluationTrigger::new()),
            scores: Arc::new(Mutex::new(HashMap::new())),
            replies: Mutex::new(HashMap::new()),
            feedback: Arc::new(feedback),
            quality: Arc::new(quality),
            publisher,
        }
    }

    pub fn prompt_id(&self) -> &str {
        &self.prompt_id
    }

    pub fn model(&self) -> ModelKind {
        self.model
    }

    pub fn feedback_scorer(&self) -> Arc<FeedbackScorer> {
        self.feedback.clone()
    }

    pub fn quality_monitor(&self) -> Arc<QualityMonitor> {
        self.quality.clone()
    }

    pub async fn messages(&self) -> Vec<Message> {
        self.session.lock().await.messages().to_vec()
    }

    pub async fn history(&self) -> Vec<ConversationHistoryEntry> {
        self.session.lock().await.history_snapshot()
    }

    pub async fn session_id(&self) -> SessionIdentity {
        self.session.lock().await.session_id()
    }

    pub async fn active_prompt(&self) -> String {
        self.session.lock().await.active_prompt().to_string()
    }

    /// Send one user message and record the persona's reply.
    ///
    /// A failed generation is replaced by [`FALLBACK_REPLY`]; it still
    /// counts as a turn but is never scored on its own.
    pub async fn send_message(&self, text: impl Into<String>) -> ChatTurn {
        let text = text.into();
        let (user, snapshot, session_id, prompt_text) = {
            let mut session = self.session.lock().await;
            let snapshot = session.history_snapshot();
            let session_id = session.session_id();
            let prompt_text = session.active_prompt().to_string();
            (
                session.append_user_message(text.clone()),
                snapshot,
                session_id,
                prompt_text,
            )
        };

        let started = Instant::now();
        let generated = self
            .services
            .generation
            .generate(GenerateRequest {
                message: text,
                conversation_history: snapshot,
                model: Some(self.model),
            })
            .await;
        let latency = started.elapsed();

        let (content, fallback) = match generated {
            Ok(response) => (response.response, false),
            Err(e) => {
                tracing::warn!(message_id = %user.id, model = %self.model, error = %e, "generation failed, using fallback reply");
                (FALLBACK_REPLY.to_string(), true)
            }
        };

        let (reply, plans) = {
            let mut session = self.session.lock().await;
            let reply = session.append_assistant_message(content);
            let plans = self.trigger.lock().await.on_assistant_append(
                &session,
                &reply,
                Some(self.model),
                !fallback,
            );
            (reply, plans)
        };
        self.replies.lock().await.insert(
            reply.id,
            ReplyMeta {
                latency,
                fallback,
                session_id,
                prompt_text,
            },
        );

        let mut evaluation = None;
        let mut rolling = None;
        for plan in plans {
            match plan {
                EvaluationPlan::SingleExchange {
                    message_id,
                    scenario,
                } => evaluation = Some(self.spawn_single(message_id, scenario)),
                EvaluationPlan::Rolling {
                    pair_count,
                    scenario,
                } => rolling = Some(self.spawn_rolling(pair_count, scenario)),
            }
        }

        ChatTurn {
            user,
            reply,
            fallback,
            latency,
            evaluation,
            rolling,
        }
    }

    fn spawn_single(
        &self,
        message_id: MessageId,
        scenario: EvaluationScenario,
    ) -> JoinHandle<ScoreOutcome> {
        let evaluation = self.services.evaluation.clone();
        let scores = self.scores.clone();
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            let outcome = run_evaluation(evaluation.as_ref(), scenario).await;
            tracing::debug!(%message_id, overall = ?outcome.overall(), "turn evaluated");
            scores.lock().await.insert(message_id, outcome.clone());
            if let Some(publisher) = publisher {
                publisher
                    .publish(ConsoleEvent::EvaluationCompleted {
                        message_id,
                        outcome: outcome.clone(),
                    })
                    .await;
            }
            outcome
        })
    }

    fn spawn_rolling(
        &self,
        pair_count: usize,
        scenario: EvaluationScenario,
    ) -> JoinHandle<ScoreOutcome> {
        let evaluation = self.services.evaluation.clone();
        let quality = self.quality.clone();
        let publisher = self.publisher.clone();
        tokio::spawn(async move {
            let outcome = run_evaluation(evaluation.as_ref(), scenario).await;
            if let Some(overall) = outcome.overall() {
                if let Err(e) = quality.record_score(overall).await {
                    tracing::warn!(pair_count, error = %e, "failed to record rolling score");
                }
            }
            if let Some(publisher) = publisher {
                publisher
                    .publish(ConsoleEvent::RollingEvaluationCompleted {
                        pair_count,
                        outcome: outcome.clone(),
                    })
                    .await;
            }
            outcome
        })
    }

    /// Latest evaluation outcome attached to a message.
    pub async fn score_for(&self, message_id: MessageId) -> Option<ScoreOutcome> {
        self.scores.lock().await.get(&message_id).cloned()
    }

    /// Rate an assistant reply. Unscored replies keep the choice locally
    /// and return [`ConsoleError::FeedbackDisabled`].
    pub async fn submit_feedback(
        &self,
        message_id: MessageId,
        kind: FeedbackKind,
    ) -> Result<FeedbackRecord> {
        let reply = self
            .session
            .lock()
            .await
            .message(message_id)
            .filter(|m| m.sender == Sender::Assistant)
            .cloned()
            .ok_or(ConsoleError::UnknownMessage(message_id.0))?;
        let meta = self
            .replies
            .lock()
            .await
            .get(&message_id)
            .cloned()
            .ok_or(ConsoleError::UnknownMessage(message_id.0))?;
        let score = self
            .score_for(message_id)
            .await
            .and_then(|o| o.score().cloned());
        let response_time_seconds = (!meta.fallback).then(|| meta.latency.as_secs_f64());

        self.feedback
            .submit(
                TurnRef::Message(message_id),
                kind,
                FeedbackContext {
                    score,
                    session_id: meta.session_id,
                    model: self.model,
                    response_text: reply.content,
                    prompt_text: meta.prompt_text,
                    mode: Mode::Chat,
                    response_time_seconds,
                },
            )
            .await
    }

    /// Apply a prompt value reported by the store. Returns whether the
    /// session rotated.
    pub async fn observe_active_prompt(&self, prompt: &str) -> bool {
        let rotated = self.session.lock().await.on_active_prompt_changed(prompt);
        let Some(session_id) = rotated else {
            return false;
        };
        if let Some(publisher) = &self.publisher {
            publisher
                .publish(ConsoleEvent::SessionRotated { session_id })
                .await;
        }
        true
    }

    /// Adopt the last version in the prompt store as the active prompt.
    pub async fn sync_active_prompt(&self) -> Result<bool> {
        let history = self.quality.refresh_history().await?;
        let latest = history.last().ok_or_else(|| ConsoleError::NoPromptHistory {
            prompt_id: self.prompt_id.clone(),
        })?;
        Ok(self.observe_active_prompt(&latest.text).await)
    }

    /// Keep the active prompt in step with the prompt store. Failed polls
    /// leave the current prompt in place.
    pub fn spawn_prompt_sync(self: &Arc<Self>, period: Duration) -> PollHandle {
        let console = Arc::clone(self);
        spawn_poller("prompt-sync", period, move || {
            let console = console.clone();
            async move {
                if let Err(e) = console.sync_active_prompt().await {
                    tracing::warn!(prompt_id = %console.prompt_id, error = %e, "prompt sync failed");
                }
            }
        })
    }
}

async fn run_evaluation(
    evaluation: &dyn EvaluationService,
    scenario: EvaluationScenario,
) -> ScoreOutcome {
    match evaluate_scenario(evaluation, scenario).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(error = %e, "evaluation failed");
            ScoreOutcome::Failed {
                reason: e.to_string(),
            }
        }
    }
}
