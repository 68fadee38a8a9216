//! Server-side step function of the conversation state machine.
//!
//! One `step` call resolves the conversation, validates the incoming event
//! against the conversation phase, records the initiator turn, asks the
//! reasoner for the next responder turn and decodes it into an [`Action`].

use std::time::Duration;

use thiserror::Error;
use tracing::{Span, error, field, info, instrument, warn};
use uuid::Uuid;

use crate::core::codec;
use crate::core::conversation::{Conversation, Phase};
use crate::core::prompt::render_event;
use crate::core::types::{
    Action, ConversationEvent, ConversationHistory, StepRequest, StepResponse, Turn,
};
use crate::io::reasoner::Reasoner;
use crate::io::store::ConversationStore;

/// Default idle expiry for stored conversations.
pub const DEFAULT_CONVERSATION_TTL: Duration = Duration::from_secs(60 * 60);

/// Failures reported to the caller of [`Controller::step`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ControllerError {
    /// An id was supplied but the store has no history for it.
    #[error("unknown conversation '{0}'")]
    UnknownConversation(String),
    /// The event is not legal for the conversation's current phase.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),
    #[error("reasoning service unavailable: {0}")]
    ReasoningUnavailable(String),
    #[error("conversation store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ControllerError {
    /// Stable machine-readable kind used on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            ControllerError::UnknownConversation(_) => "unknown_conversation",
            ControllerError::ProtocolViolation(_) => "protocol_violation",
            ControllerError::ReasoningUnavailable(_) => "reasoning_unavailable",
            ControllerError::StoreUnavailable(_) => "store_unavailable",
            ControllerError::Internal(_) => "internal",
        }
    }
}

type IdGenerator = Box<dyn Fn() -> String + Send + Sync>;

/// Drives conversations one event at a time.
///
/// Steps for different conversation ids may run concurrently. Two steps for
/// the same id must not overlap; callers serialize them.
pub struct Controller<R, S> {
    reasoner: R,
    store: S,
    ttl: Duration,
    new_id: IdGenerator,
}

impl<R: Reasoner, S: ConversationStore> Controller<R, S> {
    pub fn new(reasoner: R, store: S) -> Self {
        Self {
            reasoner,
            store,
            ttl: DEFAULT_CONVERSATION_TTL,
            new_id: Box::new(|| Uuid::new_v4().to_string()),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Replace the conversation id generator (UUID v4 by default).
    pub fn with_id_generator(mut self, generate: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.new_id = Box::new(generate);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn reasoner(&self) -> &R {
        &self.reasoner
    }

    /// Handle a wire request. Requests carrying zero or two events are protocol violations.
    pub fn handle(&self, request: StepRequest) -> Result<StepResponse, ControllerError> {
        let (conversation_id, event) = request
            .into_event()
            .map_err(ControllerError::ProtocolViolation)?;
        self.step(conversation_id.as_deref(), event)
    }

    /// Advance a conversation by one event and return the next action.
    #[instrument(skip_all, fields(conversation_id = field::Empty, event = event.kind()))]
    pub fn step(
        &self,
        conversation_id: Option<&str>,
        event: ConversationEvent,
    ) -> Result<StepResponse, ControllerError> {
        let (id, mut conversation) = self.resolve(conversation_id)?;
        Span::current().record("conversation_id", id.as_str());

        check_event(&conversation, &event)?;

        let rendered = render_event(&event)
            .map_err(|err| ControllerError::Internal(format!("render event: {err:#}")))?;
        conversation.append(Turn::initiator(rendered));
        self.persist(&id, &conversation)?;

        let raw = match self.reasoner.generate(conversation.render()) {
            Ok(raw) => raw,
            Err(err) => {
                error!(err = %format!("{err:#}"), turns = conversation.len(), "reasoner failed");
                return Err(ControllerError::ReasoningUnavailable(format!("{err:#}")));
            }
        };
        conversation.append(Turn::responder(raw.as_str()));
        self.persist(&id, &conversation)?;

        let action = codec::decode(&raw);
        if let Action::Unknown { .. } = action {
            warn!(turns = conversation.len(), "responder output did not decode");
        }
        info!(
            action = action.name(),
            turns = conversation.len(),
            "step complete"
        );
        Ok(StepResponse {
            conversation_id: id,
            action,
        })
    }

    /// Read a conversation's stored turns without advancing it.
    #[instrument(skip(self))]
    pub fn history(&self, conversation_id: &str) -> Result<ConversationHistory, ControllerError> {
        Ok(ConversationHistory {
            conversation_id: conversation_id.to_string(),
            turns: self.load(conversation_id)?,
        })
    }

    fn load(&self, id: &str) -> Result<Vec<Turn>, ControllerError> {
        self.store
            .get(id)
            .map_err(|err| ControllerError::StoreUnavailable(format!("{err:#}")))?
            .ok_or_else(|| ControllerError::UnknownConversation(id.to_string()))
    }

    fn resolve(&self, conversation_id: Option<&str>) -> Result<(String, Conversation), ControllerError> {
        let Some(id) = conversation_id else {
            return Ok(((self.new_id)(), Conversation::new()));
        };
        let turns = self.load(id)?;
        let conversation = Conversation::from_turns(turns).map_err(|err| {
            ControllerError::StoreUnavailable(format!("stored history for '{id}' is corrupt: {err}"))
        })?;
        Ok((id.to_string(), conversation))
    }

    fn persist(&self, id: &str, conversation: &Conversation) -> Result<(), ControllerError> {
        self.store
            .put(id, conversation.render(), self.ttl)
            .map_err(|err| ControllerError::StoreUnavailable(format!("{err:#}")))
    }
}

fn check_event(conversation: &Conversation, event: &ConversationEvent) -> Result<(), ControllerError> {
    let violation = |message: &str| -> Result<(), ControllerError> {
        Err(ControllerError::ProtocolViolation(message.to_string()))
    };
    match (conversation.phase(), event) {
        (Phase::AwaitingFirstEvent, ConversationEvent::InitialPrompt(_)) => Ok(()),
        (Phase::AwaitingFirstEvent, ConversationEvent::ToolResponse(_)) => {
            violation("tool_response requires a started conversation")
        }
        (Phase::Active, ConversationEvent::ToolResponse(result)) => {
            let expected = conversation.last_action().and_then(|action| action.tool_name());
            if expected != Some(result.tool_name) {
                warn!(
                    expected = expected.map(|tool| tool.as_str()),
                    received = result.tool_name.as_str(),
                    "tool response does not match the requested action"
                );
            }
            Ok(())
        }
        (Phase::Active, ConversationEvent::InitialPrompt(_)) => {
            violation("initial prompt is only legal for a new conversation")
        }
        (Phase::Interrupted, _) => {
            violation("conversation is awaiting a responder turn that never arrived")
        }
        (Phase::Finished, _) => violation("conversation is finished"),
    }
}
