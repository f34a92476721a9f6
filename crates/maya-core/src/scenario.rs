use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use maya_provider::{
    EvaluationScenario, EvaluationService, GenerateRequest, GenerationService, PromptStore,
};
use maya_schema::{
    ConversationHistoryEntry, FeedbackKind, FeedbackRecord, Mode, ModelKind, ScoreOutcome,
    SessionIdentity,
};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ConsoleError, Result};
use crate::feedback::{FeedbackContext, FeedbackScorer, TurnRef};
use crate::normalizer::evaluate_scenario;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestScenario {
    pub id: String,
    pub name: String,
    pub description: String,
    pub user_message: String,
    pub expected_themes: Vec<String>,
    pub category: String,
}

/// Operator input for a new scenario.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewScenario {
    pub name: String,
    pub description: String,
    pub user_message: String,
    pub expected_themes: Vec<String>,
    pub category: String,
}

fn scenario(
    id: &str,
    name: &str,
    description: &str,
    user_message: &str,
    themes: &[&str],
    category: &str,
) -> TestScenario {
    TestScenario {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        user_message: user_message.to_string(),
        expected_themes: themes.iter().map(|t| t.to_string()).collect(),
        category: category.to_string(),
    }
}

pub fn builtin_scenarios() -> Vec<TestScenario> {
    vec![
        scenario(
            "1",
            "Morning Routine Inquiry",
            "User asks about Maya's daily morning routine",
            "Hey Maya! Can you tell me about your morning routine? I'm trying to start my day more mindfully.",
            &["yoga", "mindfulness", "sustainable practices", "personal experience"],
            "lifestyle",
        ),
        scenario(
            "2",
            "Vegan Recipe Request",
            "User requests a specific plant-based recipe",
            "I'm new to plant-based eating. Could you share a simple but delicious vegan dinner recipe?",
            &["plant-based cooking", "beginner-friendly", "practical advice", "encouragement"],
            "cooking",
        ),
        scenario(
            "3",
            "Political Topic Redirection",
            "User tries to engage in political discussion",
            "What do you think about the recent election results and their impact on environmental policy?",
            &["redirection", "personal action", "staying on-brand", "boundary maintenance"],
            "boundary-testing",
        ),
        scenario(
            "4",
            "Sustainability Mistake",
            "User asks about Maya's biggest sustainability mistake",
            "Have you ever made a big mistake in your sustainability journey? How did you handle it?",
            &["vulnerability", "authenticity", "learning experience", "growth mindset"],
            "authenticity",
        ),
        scenario(
            "5",
            "Brand Collaboration",
            "Professional inquiry about brand partnerships",
            "Hi Maya, I represent an eco-friendly clothing brand. Would you be interested in a collaboration?",
            &["professionalism", "brand alignment", "values-based decisions", "follow-up questions"],
            "business",
        ),
    ]
}

/// Trimmed, non-empty, first occurrence wins.
fn dedupe_themes(themes: impl IntoIterator<Item = String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for theme in themes {
        let theme = theme.trim().to_string();
        if !theme.is_empty() && !out.contains(&theme) {
            out.push(theme);
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioResult {
    pub scenario_id: String,
    pub prompt_text: String,
    pub response_text: String,
    pub outcome: ScoreOutcome,
    pub latency: Duration,
}

/// Runs canned conversations against the active prompt.
pub struct ScenarioRunner {
    generation: Arc<dyn GenerationService>,
    evaluation: Arc<dyn EvaluationService>,
    prompts: Arc<dyn PromptStore>,
    scorer: Arc<FeedbackScorer>,
    prompt_id: String,
    model: ModelKind,
    session_id: SessionIdentity,
    scenarios: Mutex<Vec<TestScenario>>,
    results: Mutex<HashMap<String, ScenarioResult>>,
    next_custom_id: Mutex<u64>,
}

impl ScenarioRunner {
    pub fn new(
        generation: Arc<dyn GenerationService>,
        evaluation: Arc<dyn EvaluationService>,
        prompts: Arc<dyn PromptStore>,
        scorer: Arc<FeedbackScorer>,
        prompt_id: impl Into<String>,
        model: ModelKind,
    ) -> Self {
        Self {
            generation,
            evaluation,
            prompts,
            scorer,
            prompt_id: prompt_id.into(),
            model,
            session_id: SessionIdentity::new(),
            scenarios: Mutex::new(builtin_scenarios()),
            results: Mutex::new(HashMap::new()),
            next_custom_id: Mutex::new(1),
        }
    }

    pub async fn scenarios(&self) -> Vec<TestScenario> {
        self.scenarios.lock().await.clone()
    }

    pub async fn scenario(&self, id: &str) -> Result<TestScenario> {
        self.scenarios
            .lock()
            .await
            .iter()
            .find(|s| s.id == id)
            .cloned()
            .ok_or_else(|| ConsoleError::UnknownScenario(id.to_string()))
    }

    pub async fn result(&self, id: &str) -> Option<ScenarioResult> {
        self.results.lock().await.get(id).cloned()
    }

    /// Add a scenario. Name and user message are required.
    pub async fn add_scenario(&self, new: NewScenario) -> Option<TestScenario> {
        if new.name.trim().is_empty() || new.user_message.trim().is_empty() {
            return None;
        }
        let id = {
            let mut next = self.next_custom_id.lock().await;
            let id = format!("custom-{}", *next);
            *next += 1;
            id
        };
        let category = if new.category.trim().is_empty() {
            "lifestyle".to_string()
        } else {
            new.category.trim().to_string()
        };
        let scenario = TestScenario {
            id,
            name: new.name.trim().to_string(),
            description: new.description.trim().to_string(),
            user_message: new.user_message.trim().to_string(),
            expected_themes: dedupe_themes(new.expected_themes),
            category,
        };
        self.scenarios.lock().await.push(scenario.clone());
        tracing::info!(scenario_id = %scenario.id, "scenario added");
        Some(scenario)
    }

    /// Returns the scenario's themes after the edit.
    pub async fn add_theme(&self, id: &str, theme: &str) -> Result<Vec<String>> {
        let mut scenarios = self.scenarios.lock().await;
        let scenario = scenarios
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ConsoleError::UnknownScenario(id.to_string()))?;
        let themes = std::mem::take(&mut scenario.expected_themes);
        scenario.expected_themes =
            dedupe_themes(themes.into_iter().chain(std::iter::once(theme.to_string())));
        Ok(scenario.expected_themes.clone())
    }

    pub async fn remove_theme(&self, id: &str, theme: &str) -> Result<Vec<String>> {
        let mut scenarios = self.scenarios.lock().await;
        let scenario = scenarios
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| ConsoleError::UnknownScenario(id.to_string()))?;
        scenario.expected_themes.retain(|t| t != theme);
        Ok(scenario.expected_themes.clone())
    }

    /// Generate and score one scenario against `active_prompt`. A scored
    /// result is also fed to the prompt's quality window.
    pub async fn run(&self, id: &str, active_prompt: &str) -> Result<ScenarioResult> {
        let scenario = self.scenario(id).await?;
        let message = format!("{}\n{}", active_prompt, scenario.user_message);

        let started = Instant::now();
        let response = self
            .generation
            .generate(GenerateRequest {
                message: message.clone(),
                conversation_history: Vec::new(),
                model: Some(self.model),
            })
            .await?
            .response;
        let latency = started.elapsed();

        let outcome = match evaluate_scenario(
            self.evaluation.as_ref(),
            EvaluationScenario {
                name: scenario.name.clone(),
                user_message: message.clone(),
                expected_themes: scenario.expected_themes.clone(),
                conversation_history: vec![
                    ConversationHistoryEntry::user(message),
                    ConversationHistoryEntry::assistant(response.clone()),
                ],
                model: Some(self.model),
            },
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(scenario_id = %id, error = %e, "scenario evaluation failed");
                ScoreOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        };

        if let Some(overall) = outcome.overall() {
            if let Err(e) = self.prompts.submit_score(&self.prompt_id, overall).await {
                tracing::warn!(scenario_id = %id, error = %e, "failed to record scenario score");
            }
        }

        let result = ScenarioResult {
            scenario_id: scenario.id.clone(),
            prompt_text: active_prompt.to_string(),
            response_text: response,
            outcome,
            latency,
        };
        tracing::info!(scenario_id = %id, overall = ?result.outcome.overall(), "scenario run complete");
        self.results
            .lock()
            .await
            .insert(scenario.id, result.clone());
        Ok(result)
    }

    /// Rate the last run of a scenario.
    pub async fn feedback(&self, id: &str, kind: FeedbackKind) -> Result<FeedbackRecord> {
        let result = self
            .result(id)
            .await
            .ok_or_else(|| ConsoleError::UnknownScenario(id.to_string()))?;
        self.scorer
            .submit(
                TurnRef::Scenario(id.to_string()),
                kind,
                FeedbackContext {
                    score: result.outcome.score().cloned(),
                    session_id: self.session_id,
                    model: self.model,
                    response_text: result.response_text,
                    prompt_text: result.prompt_text,
                    mode: Mode::Scenario,
                    response_time_seconds: Some(result.latency.as_secs_f64()),
                },
            )
            .await
    }
}
