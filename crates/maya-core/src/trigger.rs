use maya_provider::EvaluationScenario;
use maya_schema::{ConversationHistoryEntry, Message, MessageId, ModelKind};

use crate::session::SessionState;

/// Completed pairs covered by one rolling evaluation.
pub const ROLLING_WINDOW: usize = 3;

const SINGLE_EXCHANGE_NAME: &str = "Chat Turn";
const ROLLING_NAME: &str = "Rolling Conversation";

/// An evaluation call the console should issue.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationPlan {
    /// Scores one exchange; the result is attached to `message_id`.
    SingleExchange {
        message_id: MessageId,
        scenario: EvaluationScenario,
    },
    /// Scores the last [`ROLLING_WINDOW`] pairs for quality tracking.
    Rolling {
        pair_count: usize,
        scenario: EvaluationScenario,
    },
}

/// Decides when turns get scored.
#[derive(Debug, Default)]
pub struct EvaluationTrigger {
    last_rolling_trigger_count: usize,
}

impl EvaluationTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn last_rolling_trigger_count(&self) -> usize {
        self.last_rolling_trigger_count
    }

    /// Plans for a freshly appended assistant message. `score_exchange` is
    /// false for replies that did not come from the generation service.
    pub fn on_assistant_append(
        &mut self,
        session: &SessionState,
        assistant: &Message,
        model: Option<ModelKind>,
        score_exchange: bool,
    ) -> Vec<EvaluationPlan> {
        let mut plans = Vec::with_capacity(2);

        if score_exchange {
            let user = session.prompting_user_message(assistant.id);
            let mut history = Vec::with_capacity(2);
            if let Some(user) = user {
                history.push(ConversationHistoryEntry::from_message(user));
            }
            history.push(ConversationHistoryEntry::from_message(assistant));
            plans.push(EvaluationPlan::SingleExchange {
                message_id: assistant.id,
                scenario: EvaluationScenario {
                    name: SINGLE_EXCHANGE_NAME.to_string(),
                    user_message: user.map(|m| m.content.clone()).unwrap_or_default(),
                    expected_themes: Vec::new(),
                    conversation_history: history,
                    model,
                },
            });
        }

        let pairs = session.pairs();
        let pair_count = pairs.len();
        if pair_count > 0
            && pair_count % ROLLING_WINDOW == 0
            && pair_count != self.last_rolling_trigger_count
        {
            self.last_rolling_trigger_count = pair_count;
            let window = &pairs[pair_count - ROLLING_WINDOW..];
            let history = window
                .iter()
                .flat_map(|pair| {
                    [
                        ConversationHistoryEntry::from_message(pair.user),
                        ConversationHistoryEntry::from_message(pair.assistant),
                    ]
                })
                .collect();
            let user_message = window
                .last()
                .map(|pair| pair.user.content.clone())
                .unwrap_or_default();
            tracing::debug!(pair_count, "rolling evaluation triggered");
            plans.push(EvaluationPlan::Rolling {
                pair_count,
                scenario: EvaluationScenario {
                    name: ROLLING_NAME.to_string(),
                    user_message,
                    expected_themes: Vec::new(),
                    conversation_history: history,
                    model,
                },
            });
        }

        plans
    }
}
