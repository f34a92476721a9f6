use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use maya_schema::{
    FeedbackKind, FeedbackRecord, IterationEntry, Message, Mode, ModelKind, Sender,
    SessionIdentity,
};
use tokio::sync::Mutex;
use tokio::task::JoinSet;

use crate::error::{ConsoleError, Result};
use crate::feedback::{FeedbackContext, FeedbackScorer, TurnRef};
use crate::reflection::{ReflectionController, ReflectionStep, RoundReport};

pub const COMPARED_MODELS: [ModelKind; 2] = [ModelKind::Gemini, ModelKind::OpenAi];

/// Estimated USD per 1000 response characters.
pub fn cost_rate(model: ModelKind) -> f64 {
    match model {
        ModelKind::Gemini => 0.002,
        ModelKind::OpenAi => 0.03,
        ModelKind::Claude => 0.0,
    }
}

pub fn estimate_cost(model: ModelKind, response: &str) -> f64 {
    response.chars().count() as f64 / 1000.0 * cost_rate(model)
}

/// Render a chat transcript as the prompt text for a comparison run.
pub fn render_transcript(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| match m.sender {
            Sender::User => format!("User: {}", m.content),
            Sender::Assistant => format!("Maya: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Input for one comparison.
#[derive(Debug, Clone)]
pub enum ComparisonInput {
    /// Free-form message typed by the operator.
    Manual(String),
    /// The current chat transcript.
    Chat(Vec<Message>),
}

impl ComparisonInput {
    pub fn mode(&self) -> Mode {
        match self {
            Self::Manual(_) => Mode::Manual,
            Self::Chat(_) => Mode::Chat,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Manual(text) => text.clone(),
            Self::Chat(messages) => render_transcript(messages),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRun {
    pub model: ModelKind,
    pub entry: IterationEntry,
    pub latency: Duration,
    pub estimated_cost: f64,
}

impl ModelRun {
    fn from_report(report: RoundReport) -> Self {
        let model = report.entry.model;
        Self {
            estimated_cost: estimate_cost(model, &report.entry.response_text),
            model,
            latency: report.generation_latency,
            entry: report.entry,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComparisonResult {
    pub mode: Mode,
    pub runs: Vec<ModelRun>,
    /// Models whose generation or evaluation did not complete.
    pub failures: Vec<(ModelKind, String)>,
}

#[derive(Debug)]
pub struct ComparisonFeedback {
    /// `None` when the run had no score and nothing was submitted.
    pub record: Option<FeedbackRecord>,
    pub step: ReflectionStep,
}

#[derive(Debug, Clone)]
struct RunContext {
    run: ModelRun,
    session_id: SessionIdentity,
}

/// Side-by-side generation for several models, each backed by its own
/// reflection loop.
pub struct ComparisonRunner {
    controller: Arc<ReflectionController>,
    scorer: Arc<FeedbackScorer>,
    models: Vec<ModelKind>,
    runs: Mutex<HashMap<(Mode, ModelKind), RunContext>>,
}

impl ComparisonRunner {
    pub fn new(controller: Arc<ReflectionController>, scorer: Arc<FeedbackScorer>) -> Self {
        Self {
            controller,
            scorer,
            models: COMPARED_MODELS.to_vec(),
            runs: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_models(mut self, models: Vec<ModelKind>) -> Self {
        self.models = models;
        self
    }

    pub fn controller(&self) -> &Arc<ReflectionController> {
        &self.controller
    }

    pub async fn latest(&self, mode: Mode, model: ModelKind) -> Option<ModelRun> {
        self.runs
            .lock()
            .await
            .get(&(mode, model))
            .map(|ctx| ctx.run.clone())
    }

    /// Start a fresh reflection loop for every model, concurrently.
    pub async fn run(
        &self,
        prompt: &str,
        input: ComparisonInput,
        session_id: SessionIdentity,
    ) -> ComparisonResult {
        let mode = input.mode();
        let user_message = input.user_message();

        let mut tasks = JoinSet::new();
        for model in self.models.iter().copied() {
            let controller = self.controller.clone();
            let prompt = prompt.to_string();
            let user_message = user_message.clone();
            tasks.spawn(async move {
                let result = controller
                    .start(mode, model, prompt, user_message, session_id)
                    .await;
                (model, result)
            });
        }

        let mut runs = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(report))) => runs.push(ModelRun::from_report(report)),
                Ok((model, Err(e))) => {
                    tracing::warn!(%mode, %model, error = %e, "comparison run failed");
                    failures.push((model, e.to_string()));
                }
                Err(e) => tracing::error!(%mode, error = %e, "comparison task panicked"),
            }
        }
        runs.sort_by_key(|run| run.model);
        failures.sort_by_key(|(model, _)| *model);

        {
            let mut stored = self.runs.lock().await;
            for run in &runs {
                stored.insert(
                    (mode, run.model),
                    RunContext {
                        run: run.clone(),
                        session_id,
                    },
                );
            }
        }

        ComparisonResult {
            mode,
            runs,
            failures,
        }
    }

    /// Rate one model's latest output: submit adjusted feedback, then drive
    /// that model's reflection loop.
    pub async fn feedback(
        &self,
        mode: Mode,
        model: ModelKind,
        kind: FeedbackKind,
    ) -> Result<ComparisonFeedback> {
        let ctx = self
            .runs
            .lock()
            .await
            .get(&(mode, model))
            .cloned()
            .ok_or(ConsoleError::InvalidTransition { state: "idle" })?;

        let submitted = self
            .scorer
            .submit(
                TurnRef::Comparison { mode, model },
                kind,
                FeedbackContext {
                    score: ctx.run.entry.scores.score().cloned(),
                    session_id: ctx.session_id,
                    model,
                    response_text: ctx.run.entry.response_text.clone(),
                    prompt_text: ctx.run.entry.prompt_text.clone(),
                    mode,
                    response_time_seconds: Some(ctx.run.latency.as_secs_f64()),
                },
            )
            .await;
        let record = match submitted {
            Ok(record) => Some(record),
            Err(ConsoleError::FeedbackDisabled) => None,
            Err(e) => return Err(e),
        };

        let step = self.controller.feedback(mode, model, kind).await?;
        if let ReflectionStep::Iterated(report) = &step {
            let run = ModelRun::from_report(report.clone());
            self.runs.lock().await.insert(
                (mode, model),
                RunContext {
                    run,
                    session_id: ctx.session_id,
                },
            );
        }
        Ok(ComparisonFeedback { record, step })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use maya_schema::MessageId;

    fn message(id: u64, sender: Sender, content: &str) -> Message {
        Message {
            id: MessageId(id),
            content: content.into(),
            sender,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn transcript_uses_speaker_labels() {
        let transcript = render_transcript(&[
            message(1, Sender::User, "hi"),
            message(2, Sender::Assistant, "hey there 🌿"),
        ]);
        assert_eq!(transcript, "User: hi\nMaya: hey there 🌿");
    }

    #[test]
    fn cost_scales_with_length_and_rate() {
        let response = "x".repeat(2000);
        assert!((estimate_cost(ModelKind::Gemini, &response) - 0.004).abs() < 1e-12);
        assert!((estimate_cost(ModelKind::OpenAi, &response) - 0.06).abs() < 1e-12);
        assert_eq!(estimate_cost(ModelKind::Claude, &response), 0.0);
    }

    #[test]
    fn input_selects_mode() {
        assert_eq!(ComparisonInput::Manual("hi".into()).mode(), Mode::Manual);
        let chat = ComparisonInput::Chat(vec![message(1, Sender::User, "hi")]);
        assert_eq!(chat.mode(), Mode::Chat);
        assert_eq!(chat.user_message(), "User: hi");
    }
}
