//! Bounded generate, score, reflect loop, one per (mode, model).
//!
//! Indices run `0..max_iterations`. A dislike at the last index exhausts the
//! loop; a like at any index accepts it. A reflection step is only issued
//! after the previous generation and evaluation have both resolved.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use maya_bus::BusPublisher;
use maya_provider::{
    EvaluationScenario, EvaluationService, GenerateRequest, GenerationService, ReflectRequest,
    ReflectionService,
};
use maya_schema::{
    ConsoleEvent, ConversationHistoryEntry, FeedbackKind, IterationEntry, Mode, ModelKind,
    SessionIdentity,
};
use serde_json::Map;
use tokio::sync::Mutex;

use crate::error::{ConsoleError, Result};
use crate::normalizer::evaluate_scenario;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReflectionState {
    Idle,
    Generating { iteration: usize },
    Evaluating { iteration: usize },
    AwaitingFeedback { iteration: usize },
    /// A dislike at `iteration` is waiting on the reflection service.
    Reflecting { iteration: usize },
    /// A network call failed; `retry` reruns this iteration.
    Failed { iteration: usize },
    Accepted,
    Exhausted,
}

impl ReflectionState {
    fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Generating { .. } => "generating",
            Self::Evaluating { .. } => "evaluating",
            Self::AwaitingFeedback { .. } => "awaiting feedback",
            Self::Reflecting { .. } => "reflecting",
            Self::Failed { .. } => "failed",
            Self::Accepted => "accepted",
            Self::Exhausted => "exhausted",
        }
    }

    fn in_flight(&self) -> bool {
        matches!(
            self,
            Self::Generating { .. } | Self::Evaluating { .. } | Self::Reflecting { .. }
        )
    }
}

/// One completed round: the recorded entry and how long generation took.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundReport {
    pub entry: IterationEntry,
    pub generation_latency: Duration,
}

/// What a feedback click did to the loop.
#[derive(Debug, Clone, PartialEq)]
pub enum ReflectionStep {
    Accepted,
    Exhausted,
    Iterated(RoundReport),
}

#[derive(Debug)]
struct LoopState {
    state: ReflectionState,
    prompt: String,
    user_message: String,
    session_id: SessionIdentity,
    entries: Vec<IterationEntry>,
}

type LoopKey = (Mode, ModelKind);

pub struct ReflectionController {
    generation: Arc<dyn GenerationService>,
    evaluation: Arc<dyn EvaluationService>,
    reflection: Arc<dyn ReflectionService>,
    max_iterations: usize,
    publisher: Option<BusPublisher>,
    loops: Mutex<HashMap<LoopKey, LoopState>>,
}

impl ReflectionController {
    pub fn new(
        generation: Arc<dyn GenerationService>,
        evaluation: Arc<dyn EvaluationService>,
        reflection: Arc<dyn ReflectionService>,
        max_iterations: usize,
    ) -> Self {
        Self {
            generation,
            evaluation,
            reflection,
            max_iterations: max_iterations.max(1),
            publisher: None,
            loops: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_publisher(mut self, publisher: BusPublisher) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub async fn state(&self, mode: Mode, model: ModelKind) -> ReflectionState {
        self.loops
            .lock()
            .await
            .get(&(mode, model))
            .map(|l| l.state.clone())
            .unwrap_or(ReflectionState::Idle)
    }

    pub async fn entries(&self, mode: Mode, model: ModelKind) -> Vec<IterationEntry> {
        self.loops
            .lock()
            .await
            .get(&(mode, model))
            .map(|l| l.entries.clone())
            .unwrap_or_default()
    }

    /// Begin a fresh loop at iteration 0, replacing any finished one.
    pub async fn start(
        &self,
        mode: Mode,
        model: ModelKind,
        prompt: impl Into<String>,
        user_message: impl Into<String>,
        session_id: SessionIdentity,
    ) -> Result<RoundReport> {
        {
            let mut loops = self.loops.lock().await;
            if let Some(existing) = loops.get(&(mode, model)) {
                if existing.state.in_flight() {
                    return Err(ConsoleError::InvalidTransition {
                        state: existing.state.label(),
                    });
                }
            }
            loops.insert(
                (mode, model),
                LoopState {
                    state: ReflectionState::Generating { iteration: 0 },
                    prompt: prompt.into(),
                    user_message: user_message.into(),
                    session_id,
                    entries: Vec::new(),
                },
            );
        }
        self.run_round(mode, model, 0).await
    }

    /// Rerun the iteration whose generation or evaluation failed.
    pub async fn retry(&self, mode: Mode, model: ModelKind) -> Result<RoundReport> {
        let iteration = {
            let mut loops = self.loops.lock().await;
            let entry = loops
                .get_mut(&(mode, model))
                .ok_or(ConsoleError::InvalidTransition { state: "idle" })?;
            let ReflectionState::Failed { iteration } = entry.state else {
                return Err(ConsoleError::InvalidTransition {
                    state: entry.state.label(),
                });
            };
            entry.state = ReflectionState::Generating { iteration };
            iteration
        };
        self.run_round(mode, model, iteration).await
    }

    /// Apply operator feedback to the latest iteration.
    pub async fn feedback(
        &self,
        mode: Mode,
        model: ModelKind,
        kind: FeedbackKind,
    ) -> Result<ReflectionStep> {
        let request = {
            let mut loops = self.loops.lock().await;
            let entry = loops
                .get_mut(&(mode, model))
                .ok_or(ConsoleError::InvalidTransition { state: "idle" })?;
            let ReflectionState::AwaitingFeedback { iteration } = entry.state else {
                return Err(ConsoleError::InvalidTransition {
                    state: entry.state.label(),
                });
            };

            match kind {
                FeedbackKind::Like => {
                    entry.state = ReflectionState::Accepted;
                    None
                }
                FeedbackKind::Dislike if iteration + 1 >= self.max_iterations => {
                    entry.state = ReflectionState::Exhausted;
                    None
                }
                FeedbackKind::Dislike => {
                    entry.state = ReflectionState::Reflecting { iteration };
                    let last = entry.entries.last();
                    Some(ReflectRequest {
                        prompt: entry.prompt.clone(),
                        response: last.map(|e| e.response_text.clone()).unwrap_or_default(),
                        scores: last
                            .and_then(|e| e.scores.score())
                            .map(|s| s.to_wire())
                            .unwrap_or_else(Map::new),
                        model,
                        session_id: entry.session_id,
                        iteration: iteration + 1,
                    })
                }
            }
        };

        let Some(request) = request else {
            let accepted = kind == FeedbackKind::Like;
            tracing::info!(%mode, %model, accepted, "reflection loop finished");
            self.publish(ConsoleEvent::ReflectionFinished {
                mode,
                model,
                accepted,
            })
            .await;
            return Ok(if accepted {
                ReflectionStep::Accepted
            } else {
                ReflectionStep::Exhausted
            });
        };

        let next = request.iteration;
        let improved = match self.reflection.reflect(request).await {
            Ok(improved) => improved,
            Err(e) => {
                tracing::warn!(%mode, %model, iteration = next, error = %e, "reflection request failed");
                self.set_state(
                    mode,
                    model,
                    ReflectionState::AwaitingFeedback {
                        iteration: next - 1,
                    },
                )
                .await;
                return Err(e.into());
            }
        };

        {
            let mut loops = self.loops.lock().await;
            let entry = loops
                .get_mut(&(mode, model))
                .ok_or(ConsoleError::InvalidTransition { state: "idle" })?;
            entry.prompt = improved.improved_prompt;
            entry.state = ReflectionState::Generating { iteration: next };
        }
        Ok(ReflectionStep::Iterated(
            self.run_round(mode, model, next).await?,
        ))
    }

    async fn run_round(&self, mode: Mode, model: ModelKind, iteration: usize) -> Result<RoundReport> {
        let (prompt, user_message) = {
            let loops = self.loops.lock().await;
            let entry = loops
                .get(&(mode, model))
                .ok_or(ConsoleError::InvalidTransition { state: "idle" })?;
            (entry.prompt.clone(), entry.user_message.clone())
        };

        let started = Instant::now();
        let generated = self
            .generation
            .generate(GenerateRequest {
                message: user_message.clone(),
                conversation_history: vec![ConversationHistoryEntry::system(prompt.clone())],
                model: Some(model),
            })
            .await;
        let generation_latency = started.elapsed();
        let response = match generated {
            Ok(response) => response.response,
            Err(e) => {
                tracing::warn!(%mode, %model, iteration, error = %e, "generation failed, iteration not recorded");
                self.set_state(mode, model, ReflectionState::Failed { iteration })
                    .await;
                return Err(e.into());
            }
        };

        self.set_state(mode, model, ReflectionState::Evaluating { iteration })
            .await;
        let scenario = EvaluationScenario {
            name: format!("{} {}", model.label(), mode_label(mode)),
            user_message: user_message.clone(),
            expected_themes: Vec::new(),
            conversation_history: vec![
                ConversationHistoryEntry::user(user_message),
                ConversationHistoryEntry::assistant(response.clone()),
            ],
            model: Some(model),
        };
        let scores = match evaluate_scenario(self.evaluation.as_ref(), scenario).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(%mode, %model, iteration, error = %e, "evaluation failed, iteration not recorded");
                self.set_state(mode, model, ReflectionState::Failed { iteration })
                    .await;
                return Err(e.into());
            }
        };

        let entry = IterationEntry {
            iteration,
            prompt_text: prompt,
            response_text: response,
            scores,
            model,
        };
        {
            let mut loops = self.loops.lock().await;
            if let Some(state) = loops.get_mut(&(mode, model)) {
                state.entries.push(entry.clone());
                state.state = ReflectionState::AwaitingFeedback { iteration };
            }
        }

        let overall = entry.scores.overall();
        tracing::info!(%mode, %model, iteration, ?overall, "iteration recorded");
        self.publish(ConsoleEvent::IterationRecorded {
            mode,
            model,
            iteration,
            overall,
        })
        .await;

        Ok(RoundReport {
            entry,
            generation_latency,
        })
    }

    async fn set_state(&self, mode: Mode, model: ModelKind, state: ReflectionState) {
        if let Some(entry) = self.loops.lock().await.get_mut(&(mode, model)) {
            entry.state = state;
        }
    }

    async fn publish(&self, event: ConsoleEvent) {
        if let Some(publisher) = &self.publisher {
            publisher.publish(event).await;
        }
    }
}

fn mode_label(mode: Mode) -> &'static str {
    match mode {
        Mode::Chat => "Chat",
        Mode::Scenario => "Scenario",
        Mode::Manual => "Manual",
    }
}
