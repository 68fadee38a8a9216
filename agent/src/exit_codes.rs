//! Stable exit codes for `agent` CLI commands.

/// The controller finished the conversation, or the command succeeded.
pub const OK: i32 = 0;
/// Invalid config/arguments, or a transport or controller failure.
pub const INVALID: i32 = 1;
/// The responder produced output that could not be decoded into an action.
pub const UNUSABLE_OUTPUT: i32 = 2;
/// `max_steps` tool actions ran without a `finish`.
pub const STEP_LIMIT: i32 = 3;
