//! In-memory conversation history.
//!
//! Turns alternate strictly between initiator and responder, starting with the
//! initiator. Callers are responsible for appending in order; an out-of-order
//! append is a bug and panics.

use crate::core::codec;
use crate::core::types::{Action, Role, Turn};

/// Controller state derived from a conversation's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// No turns yet; only an initial prompt is legal.
    AwaitingFirstEvent,
    /// Waiting for the next tool response.
    Active,
    /// The last step committed an initiator turn but never got a responder turn.
    Interrupted,
    /// The responder emitted `finish`. Terminal.
    Finished,
}

/// Ordered, append-only turns of one conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    turns: Vec<Turn>,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from persisted turns.
    ///
    /// Returns an error when the stored sequence does not alternate roles.
    pub fn from_turns(turns: Vec<Turn>) -> Result<Self, String> {
        let mut expected = Role::Initiator;
        for (idx, turn) in turns.iter().enumerate() {
            if turn.role != expected {
                return Err(format!(
                    "turn {idx} has role {:?}, expected {:?}",
                    turn.role, expected
                ));
            }
            expected = expected.other();
        }
        Ok(Self { turns })
    }

    /// Append a turn. Panics if the role does not alternate.
    pub fn append(&mut self, turn: Turn) {
        let expected = self.expected_role();
        assert_eq!(
            turn.role, expected,
            "conversation turns must alternate (expected {expected:?})"
        );
        self.turns.push(turn);
    }

    /// Role the next appended turn must have.
    pub fn expected_role(&self) -> Role {
        self.last_role().map_or(Role::Initiator, Role::other)
    }

    pub fn last_role(&self) -> Option<Role> {
        self.turns.last().map(|turn| turn.role)
    }

    /// Raw content of the most recent responder turn.
    pub fn last_responder_output(&self) -> Option<&str> {
        self.turns
            .iter()
            .rev()
            .find(|turn| turn.role == Role::Responder)
            .map(|turn| turn.content.as_str())
    }

    /// Action most recently requested by the responder.
    pub fn last_action(&self) -> Option<Action> {
        self.last_responder_output().map(codec::decode)
    }

    pub fn phase(&self) -> Phase {
        match self.last_role() {
            None => Phase::AwaitingFirstEvent,
            Some(Role::Initiator) => Phase::Interrupted,
            Some(Role::Responder) => match self.last_action() {
                Some(action) if action.is_finish() => Phase::Finished,
                _ => Phase::Active,
            },
        }
    }

    /// Ordered turns, verbatim, as handed to the reasoning collaborator.
    pub fn render(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_conversation_awaits_first_event() {
        let conversation = Conversation::new();
        assert_eq!(conversation.phase(), Phase::AwaitingFirstEvent);
        assert_eq!(conversation.expected_role(), Role::Initiator);
    }

    #[test]
    fn phase_follows_last_turn() {
        let mut conversation = Conversation::new();
        conversation.append(Turn::initiator("task"));
        assert_eq!(conversation.phase(), Phase::Interrupted);

        conversation.append(Turn::responder(r#"{"action":"read_file","file_path":"a"}"#));
        assert_eq!(conversation.phase(), Phase::Active);

        conversation.append(Turn::initiator("result"));
        conversation.append(Turn::responder("not json"));
        assert_eq!(conversation.phase(), Phase::Active);

        conversation.append(Turn::initiator("result"));
        conversation.append(Turn::responder(r#"{"action":"finish","message":"done"}"#));
        assert_eq!(conversation.phase(), Phase::Finished);
        assert_eq!(conversation.len(), 6);
    }

    #[test]
    #[should_panic(expected = "alternate")]
    fn append_out_of_order_panics() {
        let mut conversation = Conversation::new();
        conversation.append(Turn::responder("hello"));
    }

    #[test]
    fn from_turns_rejects_broken_alternation() {
        let err = Conversation::from_turns(vec![Turn::initiator("a"), Turn::initiator("b")])
            .unwrap_err();
        assert!(err.contains("turn 1"));
    }

    #[test]
    fn render_preserves_order() {
        let turns = vec![Turn::initiator("a"), Turn::responder("b")];
        let conversation = Conversation::from_turns(turns.clone()).expect("valid");
        assert_eq!(conversation.render(), turns.as_slice());
        assert_eq!(conversation.last_responder_output(), Some("b"));
    }
}
