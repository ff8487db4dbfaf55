use tracing::warn;
use vigil_core::domain::message::ChatMessage;

/// Long-lived chat history for one session.
///
/// Each turn hands back its full history; only the messages past the stored length are kept.
/// The diff is positional, so a turn must extend the previous history rather than rewrite it.
#[derive(Clone, Debug, Default)]
pub struct ConversationMemory {
    messages: Vec<ChatMessage>,
}

impl ConversationMemory {
    /// Returns how many messages were appended.
    pub fn append_new(&mut self, history: &[ChatMessage]) -> usize {
        let known = self.messages.len();
        if history.len() < known {
            warn!(
                event_name = "memory.history_shorter_than_memory",
                stored = known,
                incoming = history.len(),
                "incoming chat history is shorter than memory; nothing appended"
            );
            return 0;
        }

        let fresh = &history[known..];
        self.messages.extend_from_slice(fresh);
        fresh.len()
    }

    pub fn get(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use vigil_core::domain::message::ChatMessage;

    use super::ConversationMemory;

    #[test]
    fn union_over_turns_has_no_duplicates() {
        let mut memory = ConversationMemory::default();
        let mut history = Vec::new();

        for turn in 0..4 {
            history.push(ChatMessage::user(format!("question {turn}")));
            history.push(ChatMessage::assistant(format!("answer {turn}")));
            assert_eq!(memory.append_new(&history), 2);
        }

        assert_eq!(memory.len(), 8);
        assert_eq!(memory.get(), history.as_slice());
    }

    #[test]
    fn resupplying_the_same_history_appends_nothing() {
        let mut memory = ConversationMemory::default();
        let history = vec![ChatMessage::user("Hello!"), ChatMessage::assistant("Hi there")];

        memory.append_new(&history);
        assert_eq!(memory.append_new(&history), 0);
        assert_eq!(memory.len(), 2);
    }

    #[test]
    fn shorter_history_is_ignored() {
        let mut memory = ConversationMemory::default();
        memory.append_new(&[ChatMessage::user("one"), ChatMessage::assistant("two")]);

        assert_eq!(memory.append_new(&[ChatMessage::user("rewritten")]), 0);
        assert_eq!(memory.get()[0].content, "one");
    }
}
