use maya_provider::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsoleError {
    /// A backend call did not complete.
    #[error("network failure: {0}")]
    NetworkFailure(#[from] ServiceError),
    /// The evaluation answered but carried no usable `overall` score.
    #[error("malformed evaluation: report has no numeric overall score")]
    MalformedEvaluation,
    /// Feedback was attempted on a turn that was never scored.
    #[error("feedback disabled: turn has no score")]
    FeedbackDisabled,
    #[error("prompt {prompt_id} has no version history")]
    NoPromptHistory { prompt_id: String },
    #[error("no improved prompt is staged")]
    NothingStaged,
    #[error("action not allowed while {state}")]
    InvalidTransition { state: &'static str },
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),
    #[error("unknown message: {0}")]
    UnknownMessage(u64),
}

pub type Result<T> = std::result::Result<T, ConsoleError>;
