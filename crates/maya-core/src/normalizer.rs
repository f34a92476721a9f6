//! Turns raw evaluation reports into [`ScoreRecord`]s.
//!
//! This is the only place that reads evaluation JSON. Values are passed
//! through on their reported scale: no clamping, no rescaling.

use maya_provider::{EvaluateRequest, EvaluationScenario, EvaluationService, ServiceError};
use maya_schema::{ScoreOutcome, ScoreRecord};
use serde_json::{Map, Value};

use crate::error::{ConsoleError, Result};

const OVERALL: &str = "overall";
const CUMULATIVE_SEMANTIC: &str = "cumulative_semantic";
const CUMULATIVE_COMBINED: &str = "cumulative_combined";
const SEMANTIC_PREFIX: &str = "semantic_";
const COMBINED_PREFIX: &str = "combined_";

/// Locate the score map of a report: the first `evaluation_results` entry,
/// or a bare top-level `scores` object.
fn scores_of(report: &Value) -> Option<&Map<String, Value>> {
    let scores = match report.get("evaluation_results") {
        Some(Value::Array(results)) => results.first()?.get("scores")?,
        _ => report.get("scores")?,
    };
    scores.as_object()
}

/// Build the canonical record from one evaluation report.
pub fn normalize(report: &Value) -> Result<ScoreRecord> {
    let scores = scores_of(report).ok_or(ConsoleError::MalformedEvaluation)?;
    let overall = scores
        .get(OVERALL)
        .and_then(Value::as_f64)
        .ok_or(ConsoleError::MalformedEvaluation)?;

    let mut record = ScoreRecord::new(overall);
    for (key, value) in scores {
        let Some(value) = value.as_f64() else {
            continue;
        };
        match key.as_str() {
            OVERALL => {}
            CUMULATIVE_SEMANTIC => record.cumulative_semantic = Some(value),
            CUMULATIVE_COMBINED => record.cumulative_combined = Some(value),
            other => {
                if let Some(dimension) = other.strip_prefix(SEMANTIC_PREFIX) {
                    record
                        .per_dimension_semantic
                        .insert(dimension.to_string(), value);
                } else if let Some(dimension) = other.strip_prefix(COMBINED_PREFIX) {
                    record
                        .per_dimension_combined
                        .insert(dimension.to_string(), value);
                } else {
                    record.per_dimension_rule.insert(other.to_string(), value);
                }
            }
        }
    }
    Ok(record)
}

/// Like [`normalize`], folding a malformed report into the outcome.
pub fn outcome_of(report: &Value) -> ScoreOutcome {
    match normalize(report) {
        Ok(record) => ScoreOutcome::Scored(record),
        Err(_) => {
            tracing::warn!("evaluation report carried no numeric overall score");
            ScoreOutcome::Malformed
        }
    }
}

/// Evaluate one scenario. Transport failures stay errors so callers can
/// decide whether they count as an attempt.
pub async fn evaluate_scenario(
    evaluation: &dyn EvaluationService,
    scenario: EvaluationScenario,
) -> std::result::Result<ScoreOutcome, ServiceError> {
    let report = evaluation
        .evaluate(EvaluateRequest::single(scenario))
        .await?;
    Ok(outcome_of(&report))
}
