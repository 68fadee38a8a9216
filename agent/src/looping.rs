//! Executor loop for `agent run`.

use anyhow::{Context, Result, bail};
use tracing::{info, instrument, warn};

use crate::core::types::{Action, ConversationEvent, InitialPrompt, StepRequest, ToolResult};
use crate::io::tools::ToolRunner;
use crate::io::transport::ControllerClient;

/// Reason why `run_loop` stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopStop {
    /// The controller emitted `finish`.
    Finished { message: String },
    /// The responder produced output that decoded to `unknown`.
    UnusableOutput { raw_text: String },
    /// `max_steps` tool actions ran without a `finish`.
    StepLimitReached { max_steps: u32 },
}

/// Summary of a loop invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub conversation_id: String,
    /// Tool actions dispatched to the tool runner.
    pub steps_executed: u32,
    pub stop: LoopStop,
}

/// Drive one conversation until the controller finishes it, the responder
/// output is unusable, or `max_steps` tool actions have run (`0` = no limit).
///
/// Exactly one request is in flight at a time. Any transport failure stops the
/// loop immediately with `Err`; nothing is retried.
#[instrument(skip_all, fields(title = %prompt.title, max_steps = max_steps))]
pub fn run_loop<C, T, F>(
    client: &C,
    tools: &T,
    prompt: InitialPrompt,
    max_steps: u32,
    mut on_step: F,
) -> Result<LoopOutcome>
where
    C: ControllerClient,
    T: ToolRunner,
    F: FnMut(&Action, &ToolResult),
{
    let mut response = client
        .step(&StepRequest::new(
            None,
            ConversationEvent::InitialPrompt(prompt),
        ))
        .context("send initial prompt")?;
    let conversation_id = response.conversation_id.clone();
    info!(conversation_id = %conversation_id, "conversation started");

    let mut steps_executed = 0u32;
    loop {
        let stop = match response.action {
            Action::Finish { message } => LoopStop::Finished { message },
            Action::Unknown { raw_text } => {
                warn!(conversation_id = %conversation_id, "controller returned unusable output");
                LoopStop::UnusableOutput { raw_text }
            }
            _ if max_steps > 0 && steps_executed >= max_steps => {
                LoopStop::StepLimitReached { max_steps }
            }
            action => {
                let result = tools
                    .execute(&action)
                    .with_context(|| format!("dispatch {}", action.name()))?;
                steps_executed += 1;
                info!(
                    step = steps_executed,
                    action = action.name(),
                    program = result.program.as_deref(),
                    failed = result.error_message().is_some(),
                    "tool executed"
                );
                on_step(&action, &result);

                response = client
                    .step(&StepRequest::new(
                        Some(conversation_id.clone()),
                        ConversationEvent::ToolResponse(result),
                    ))
                    .with_context(|| format!("send {} result", action.name()))?;
                if response.conversation_id != conversation_id {
                    bail!(
                        "controller answered for conversation '{}' instead of '{conversation_id}'",
                        response.conversation_id
                    );
                }
                continue;
            }
        };

        return Ok(LoopOutcome {
            conversation_id,
            steps_executed,
            stop,
        });
    }
}
