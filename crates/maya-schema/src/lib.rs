use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

/// Monotonic message identifier, assigned in creation order by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    User,
    Assistant,
}

/// A visible chat message. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One entry of the service-facing conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistoryEntry {
    pub role: Role,
    pub content: String,
}

impl ConversationHistoryEntry {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn from_message(message: &Message) -> Self {
        match message.sender {
            Sender::User => Self::user(message.content.clone()),
            Sender::Assistant => Self::assistant(message.content.clone()),
        }
    }
}

/// Candidate generation model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "gemini")]
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "claude")]
    Claude,
}

impl ModelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Gemini => "gemini",
            Self::OpenAi => "openai",
            Self::Claude => "claude",
        }
    }

    /// Human label used in evaluation scenario names.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Gemini => "Gemini",
            Self::OpenAi => "OpenAI",
            Self::Claude => "Claude",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gemini" => Ok(Self::Gemini),
            "openai" => Ok(Self::OpenAi),
            "claude" => Ok(Self::Claude),
            other => Err(format!("unknown model: {other}")),
        }
    }
}

/// Surface a generated response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Chat,
    Scenario,
    Manual,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Scenario => "scenario",
            Self::Manual => "manual",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackKind {
    Like,
    Dislike,
}

impl fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Like => f.write_str("like"),
            Self::Dislike => f.write_str("dislike"),
        }
    }
}

/// Opaque session token; rotated whenever the active prompt changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionIdentity(pub Uuid);

impl SessionIdentity {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionIdentity {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Canonical score record. Only ever built from a report that carried `overall`.
///
/// Semantic dimensions are on a 0-1 scale, rule dimensions on 0-100. Values
/// are kept exactly as reported.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ScoreRecord {
    pub overall: f64,
    pub per_dimension_rule: BTreeMap<String, f64>,
    pub per_dimension_semantic: BTreeMap<String, f64>,
    pub per_dimension_combined: BTreeMap<String, f64>,
    pub cumulative_semantic: Option<f64>,
    pub cumulative_combined: Option<f64>,
}

impl ScoreRecord {
    pub fn new(overall: f64) -> Self {
        Self {
            overall,
            ..Self::default()
        }
    }

    /// Same record with `overall` replaced.
    pub fn with_overall(&self, overall: f64) -> Self {
        Self {
            overall,
            ..self.clone()
        }
    }

    /// Flat key layout used on the wire (`overall`, `consistency`,
    /// `semantic_consistency`, `combined_consistency`, `cumulative_*`).
    pub fn to_wire(&self) -> Map<String, Value> {
        let mut map = Map::new();
        for (dimension, value) in &self.per_dimension_rule {
            map.insert(dimension.clone(), number(*value));
        }
        for (dimension, value) in &self.per_dimension_semantic {
            map.insert(format!("semantic_{dimension}"), number(*value));
        }
        for (dimension, value) in &self.per_dimension_combined {
            map.insert(format!("combined_{dimension}"), number(*value));
        }
        if let Some(value) = self.cumulative_semantic {
            map.insert("cumulative_semantic".into(), number(value));
        }
        if let Some(value) = self.cumulative_combined {
            map.insert("cumulative_combined".into(), number(value));
        }
        map.insert("overall".into(), number(self.overall));
        map
    }
}

fn number(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

impl Serialize for ScoreRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_wire().serialize(serializer)
    }
}

/// Result of scoring one generated response.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ScoreOutcome {
    Scored(ScoreRecord),
    /// The evaluation answered without an `overall` score.
    Malformed,
    /// The evaluation call itself did not complete.
    Failed { reason: String },
}

impl ScoreOutcome {
    pub fn score(&self) -> Option<&ScoreRecord> {
        match self {
            Self::Scored(record) => Some(record),
            _ => None,
        }
    }

    pub fn overall(&self) -> Option<f64> {
        self.score().map(|record| record.overall)
    }
}

/// Audit record sent to the feedback store. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedbackRecord {
    pub session_id: SessionIdentity,
    pub model: ModelKind,
    pub response_text: String,
    pub feedback: FeedbackKind,
    pub prompt_text: String,
    pub mode: Mode,
    pub scores: ScoreRecord,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time_seconds: Option<f64>,
}

/// One entry of a prompt's version log. The last entry is the current prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptVersion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "prompt", alias = "text")]
    pub text: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub improved_from: Option<String>,
    #[serde(default, alias = "timestamp")]
    pub created_at: Option<String>,
}

/// Latest quality verdict for one prompt id, as reported by the prompt store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityStatus {
    pub recent_scores: Vec<f64>,
    pub average: f64,
    pub threshold: f64,
    pub degraded: bool,
}

/// One generate-then-score round of the reflection loop.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IterationEntry {
    pub iteration: usize,
    pub prompt_text: String,
    pub response_text: String,
    pub scores: ScoreOutcome,
    pub model: ModelKind,
}

/// Operator-facing classification of recent scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthGauge {
    Healthy,
    Warning,
    Poor,
    NoData,
    /// Overrides every other reading.
    InappropriateContent,
}

impl fmt::Display for HealthGauge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Poor => "poor",
            Self::NoData => "no data",
            Self::InappropriateContent => "inappropriate content detected",
        };
        f.write_str(text)
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum ConsoleEvent {
    EvaluationCompleted {
        message_id: MessageId,
        outcome: ScoreOutcome,
    },
    RollingEvaluationCompleted {
        pair_count: usize,
        outcome: ScoreOutcome,
    },
    SessionRotated {
        session_id: SessionIdentity,
    },
    FeedbackSubmitted {
        session_id: SessionIdentity,
        mode: Mode,
        model: ModelKind,
        feedback: FeedbackKind,
        adjusted_overall: f64,
    },
    QualityDegraded {
        prompt_id: String,
        average: f64,
        threshold: f64,
    },
    ImprovementStaged {
        prompt_id: String,
    },
    PromptVersionCommitted {
        prompt_id: String,
        reason: String,
    },
    IterationRecorded {
        mode: Mode,
        model: ModelKind,
        iteration: usize,
        overall: Option<f64>,
    },
    ReflectionFinished {
        mode: Mode,
        model: ModelKind,
        accepted: bool,
    },
    MetricsUpdated {
        total_conversations: usize,
        avg_response_time: f64,
        satisfaction: f64,
        gauge: HealthGauge,
    },
}
