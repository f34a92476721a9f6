use chrono::Utc;
use maya_schema::{ConversationHistoryEntry, Message, MessageId, Sender, SessionIdentity};

/// A user message and the assistant message that answered it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TurnPair<'a> {
    pub user: &'a Message,
    pub assistant: &'a Message,
}

/// Pair each user message with the next assistant message.
///
/// A later user message replaces an unanswered one; an assistant message
/// with no pending user message produces no pair.
pub fn pair_turns(messages: &[Message]) -> Vec<TurnPair<'_>> {
    let mut pairs = Vec::new();
    let mut pending: Option<&Message> = None;
    for message in messages {
        match message.sender {
            Sender::User => pending = Some(message),
            Sender::Assistant => {
                if let Some(user) = pending.take() {
                    pairs.push(TurnPair {
                        user,
                        assistant: message,
                    });
                }
            }
        }
    }
    pairs
}

/// Owner of the display log and the service-facing history.
///
/// The two stay in lockstep, but the history always begins with the system
/// prompt while the display log never shows it.
#[derive(Debug, Clone)]
pub struct SessionState {
    messages: Vec<Message>,
    history: Vec<ConversationHistoryEntry>,
    active_prompt: String,
    session_id: SessionIdentity,
    next_id: u64,
}

impl SessionState {
    pub fn new(active_prompt: impl Into<String>) -> Self {
        let active_prompt = active_prompt.into();
        Self {
            messages: Vec::new(),
            history: vec![ConversationHistoryEntry::system(active_prompt.clone())],
            active_prompt,
            session_id: SessionIdentity::new(),
            next_id: 1,
        }
    }

    pub fn append_user_message(&mut self, text: impl Into<String>) -> Message {
        self.append(text.into(), Sender::User)
    }

    pub fn append_assistant_message(&mut self, text: impl Into<String>) -> Message {
        self.append(text.into(), Sender::Assistant)
    }

    fn append(&mut self, content: String, sender: Sender) -> Message {
        let message = Message {
            id: MessageId(self.next_id),
            content,
            sender,
            timestamp: Utc::now(),
        };
        self.next_id += 1;
        self.history
            .push(ConversationHistoryEntry::from_message(&message));
        self.messages.push(message.clone());
        message
    }

    /// Rebuild the history around `new_prompt` and rotate the session
    /// identity. The display log is kept. Returns the new identity, or
    /// `None` when the prompt text did not change.
    pub fn on_active_prompt_changed(&mut self, new_prompt: &str) -> Option<SessionIdentity> {
        if new_prompt == self.active_prompt {
            return None;
        }
        self.active_prompt = new_prompt.to_string();
        self.history = vec![ConversationHistoryEntry::system(new_prompt)];
        self.session_id = SessionIdentity::new();
        tracing::info!(session_id = %self.session_id, "active prompt changed, session rotated");
        Some(self.session_id)
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn message(&self, id: MessageId) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn history(&self) -> &[ConversationHistoryEntry] {
        &self.history
    }

    /// Owned copy for an outgoing request; later appends do not affect it.
    pub fn history_snapshot(&self) -> Vec<ConversationHistoryEntry> {
        self.history.clone()
    }

    pub fn active_prompt(&self) -> &str {
        &self.active_prompt
    }

    pub fn session_id(&self) -> SessionIdentity {
        self.session_id
    }

    pub fn pairs(&self) -> Vec<TurnPair<'_>> {
        pair_turns(&self.messages)
    }

    /// The user message answered by `assistant_id`: the closest user
    /// message before it.
    pub fn prompting_user_message(&self, assistant_id: MessageId) -> Option<&Message> {
        let position = self.messages.iter().position(|m| m.id == assistant_id)?;
        self.messages[..position]
            .iter()
            .rev()
            .find(|m| m.sender == Sender::User)
    }
}
