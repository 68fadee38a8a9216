//! Shared protocol types for the controller and the executor.
//!
//! These types define the wire contract between the two sides. They carry no
//! I/O and serialize deterministically so histories and responses stay stable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

fn current_dir() -> String {
    ".".to_string()
}

/// Canonical instruction decoded from responder output.
///
/// The wire form is a single JSON object whose `action` field selects the
/// variant. Exactly one variant is active per value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Finish {
        message: String,
    },
    RunShellCommand {
        command: String,
    },
    ReadFile {
        #[serde(rename = "file_path")]
        path: String,
    },
    WriteFile {
        #[serde(rename = "file_path")]
        path: String,
        content: String,
    },
    ListDirectory {
        #[serde(default = "current_dir")]
        path: String,
    },
    GlobFiles {
        pattern: String,
        #[serde(default = "current_dir")]
        path: String,
    },
    GrepContent {
        pattern: String,
        #[serde(default = "current_dir")]
        path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        file_type: Option<String>,
    },
    /// Responder output that could not be decoded into any other variant.
    Unknown {
        raw_text: String,
    },
}

impl Action {
    /// Wire discriminant for this action.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Finish { .. } => "finish",
            Action::Unknown { .. } => "unknown",
            other => other
                .tool_name()
                .map(ToolName::as_str)
                .unwrap_or("unknown"),
        }
    }

    /// Tool that satisfies this action, or `None` for `Finish` and `Unknown`.
    pub fn tool_name(&self) -> Option<ToolName> {
        match self {
            Action::RunShellCommand { .. } => Some(ToolName::RunShellCommand),
            Action::ReadFile { .. } => Some(ToolName::ReadFile),
            Action::WriteFile { .. } => Some(ToolName::WriteFile),
            Action::ListDirectory { .. } => Some(ToolName::ListDirectory),
            Action::GlobFiles { .. } => Some(ToolName::GlobFiles),
            Action::GrepContent { .. } => Some(ToolName::GrepContent),
            Action::Finish { .. } | Action::Unknown { .. } => None,
        }
    }

    pub fn is_finish(&self) -> bool {
        matches!(self, Action::Finish { .. })
    }
}

/// Tool-bearing action kinds. Serialized with the same names as [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    RunShellCommand,
    ReadFile,
    WriteFile,
    ListDirectory,
    GlobFiles,
    GrepContent,
}

impl ToolName {
    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::RunShellCommand => "run_shell_command",
            ToolName::ReadFile => "read_file",
            ToolName::WriteFile => "write_file",
            ToolName::ListDirectory => "list_directory",
            ToolName::GlobFiles => "glob_files",
            ToolName::GrepContent => "grep_content",
        }
    }

    /// Exit codes that count as a successful run. Searches exit 1 when nothing matched.
    pub fn accepted_exit_codes(self) -> &'static [i32] {
        match self {
            ToolName::GrepContent => &[0, 1],
            _ => &[0],
        }
    }
}

/// Outcome of running one tool.
///
/// A nonzero exit code is a normal `Process` outcome. `Error` is reserved for
/// executions that could not be attempted or produced no usable output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToolOutput {
    Process {
        stdout: String,
        stderr: String,
        /// `None` when the process was terminated by a signal.
        exit_code: Option<i32>,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        timed_out: bool,
    },
    Content {
        content: String,
    },
    Written {
        bytes: usize,
    },
    Error {
        error: String,
    },
}

/// Result fed back to the controller after executing a tool action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Action variant that produced this result.
    pub tool_name: ToolName,
    /// External program that actually produced the output (tiered tools only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    pub output: ToolOutput,
}

impl ToolResult {
    pub fn new(tool_name: ToolName, output: ToolOutput) -> Self {
        Self {
            tool_name,
            program: None,
            output,
        }
    }

    pub fn error(tool_name: ToolName, error: impl Into<String>) -> Self {
        Self::new(
            tool_name,
            ToolOutput::Error {
                error: error.into(),
            },
        )
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = Some(program.into());
        self
    }

    /// Error message when execution could not produce a result.
    pub fn error_message(&self) -> Option<&str> {
        match &self.output {
            ToolOutput::Error { error } => Some(error),
            _ => None,
        }
    }

    /// Whether the tool did what was asked: an accepted exit code without a
    /// timeout, or any non-error file outcome.
    pub fn succeeded(&self) -> bool {
        match &self.output {
            ToolOutput::Process {
                exit_code,
                timed_out,
                ..
            } => {
                !*timed_out
                    && exit_code.is_some_and(|code| self.tool_name.accepted_exit_codes().contains(&code))
            }
            ToolOutput::Content { .. } | ToolOutput::Written { .. } => true,
            ToolOutput::Error { .. } => false,
        }
    }

    pub fn stdout(&self) -> Option<&str> {
        match &self.output {
            ToolOutput::Process { stdout, .. } => Some(stdout),
            _ => None,
        }
    }
}

/// Task description that opens a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct InitialPrompt {
    pub title: String,
    pub body: String,
    /// Free-form key/value context (repository, issue number, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

/// Client-to-controller event. Exactly one kind per step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    InitialPrompt(InitialPrompt),
    ToolResponse(ToolResult),
}

impl ConversationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ConversationEvent::InitialPrompt(_) => "initial_prompt",
            ConversationEvent::ToolResponse(_) => "tool_response",
        }
    }
}

/// Who contributed a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Driving side: prompts and tool results.
    Initiator,
    /// Reasoning collaborator output.
    Responder,
}

impl Role {
    pub fn other(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn initiator(content: impl Into<String>) -> Self {
        Self {
            role: Role::Initiator,
            content: content.into(),
        }
    }

    pub fn responder(content: impl Into<String>) -> Self {
        Self {
            role: Role::Responder,
            content: content.into(),
        }
    }
}

/// Inbound `step` payload as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StepRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<InitialPrompt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_response: Option<ToolResult>,
}

impl StepRequest {
    pub fn new(conversation_id: Option<String>, event: ConversationEvent) -> Self {
        match event {
            ConversationEvent::InitialPrompt(prompt) => Self {
                conversation_id,
                prompt: Some(prompt),
                tool_response: None,
            },
            ConversationEvent::ToolResponse(result) => Self {
                conversation_id,
                prompt: None,
                tool_response: Some(result),
            },
        }
    }

    /// Split into the conversation id and the single event it carries.
    ///
    /// Returns an error message when zero or both event kinds are present.
    pub fn into_event(self) -> Result<(Option<String>, ConversationEvent), String> {
        match (self.prompt, self.tool_response) {
            (Some(prompt), None) => Ok((
                self.conversation_id,
                ConversationEvent::InitialPrompt(prompt),
            )),
            (None, Some(result)) => Ok((
                self.conversation_id,
                ConversationEvent::ToolResponse(result),
            )),
            (Some(_), Some(_)) => {
                Err("request carries both prompt and tool_response".to_string())
            }
            (None, None) => Err("request carries neither prompt nor tool_response".to_string()),
        }
    }
}

/// Outbound `step` payload: the conversation id plus the flattened action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepResponse {
    pub conversation_id: String,
    #[serde(flatten)]
    pub action: Action,
}

/// Stored turns of one conversation, as served for inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationHistory {
    pub conversation_id: String,
    pub turns: Vec<Turn>,
}

/// Error payload returned by the controller service for a rejected step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable kind, e.g. `unknown_conversation`.
    pub error: String,
    pub message: String,
}
