//! Test doubles for the reasoner, store, tool runner and controller transport.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::core::types::{Action, StepRequest, StepResponse, ToolName, ToolOutput, ToolResult, Turn};
use crate::io::reasoner::Reasoner;
use crate::io::store::{ConversationStore, MemoryStore};
use crate::io::tools::ToolRunner;
use crate::io::transport::ControllerClient;

/// Reasoner that replays canned responder outputs in order.
///
/// Every history it receives is recorded. Once the script is exhausted,
/// `generate` fails like an unreachable service would.
#[derive(Debug, Default)]
pub struct ScriptedReasoner {
    outputs: Mutex<VecDeque<String>>,
    histories: Mutex<Vec<Vec<Turn>>>,
}

impl ScriptedReasoner {
    pub fn new<I, S>(outputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            outputs: Mutex::new(outputs.into_iter().map(Into::into).collect()),
            histories: Mutex::new(Vec::new()),
        }
    }

    /// Histories passed to `generate`, one per call.
    pub fn histories(&self) -> Vec<Vec<Turn>> {
        self.histories.lock().expect("histories lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.histories.lock().expect("histories lock").len()
    }
}

impl Reasoner for ScriptedReasoner {
    fn generate(&self, history: &[Turn]) -> Result<String> {
        self.histories
            .lock()
            .expect("histories lock")
            .push(history.to_vec());
        self.outputs
            .lock()
            .expect("outputs lock")
            .pop_front()
            .ok_or_else(|| anyhow!("scripted reasoner has no outputs left"))
    }
}

/// Reasoner that always fails.
#[derive(Debug, Clone)]
pub struct FailingReasoner {
    pub message: String,
}

impl Default for FailingReasoner {
    fn default() -> Self {
        Self {
            message: "connection refused".to_string(),
        }
    }
}

impl Reasoner for FailingReasoner {
    fn generate(&self, _history: &[Turn]) -> Result<String> {
        Err(anyhow!("{}", self.message))
    }
}

/// Conversation store whose reads or writes fail like an unreachable server.
///
/// Operations that are not set to fail go to an in-memory store.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_get: bool,
    fail_put: bool,
}

impl FailingStore {
    pub fn failing_reads() -> Self {
        Self {
            fail_get: true,
            ..Self::default()
        }
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_put: true,
            ..Self::default()
        }
    }
}

impl ConversationStore for FailingStore {
    fn get(&self, id: &str) -> Result<Option<Vec<Turn>>> {
        if self.fail_get {
            return Err(anyhow!("redis GET: connection refused"));
        }
        self.inner.get(id)
    }

    fn put(&self, id: &str, turns: &[Turn], ttl: Duration) -> Result<()> {
        if self.fail_put {
            return Err(anyhow!("redis SET EX: connection refused"));
        }
        self.inner.put(id, turns, ttl)
    }
}

/// Tool runner that records dispatched actions and never touches the machine.
///
/// Results come from the script when provided; otherwise each action gets a
/// successful process result with stdout `ok`.
#[derive(Debug, Default)]
pub struct RecordingToolRunner {
    results: Mutex<VecDeque<ToolResult>>,
    calls: Mutex<Vec<Action>>,
}

impl RecordingToolRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_results(results: Vec<ToolResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Action> {
        self.calls.lock().expect("calls lock").clone()
    }
}

impl ToolRunner for RecordingToolRunner {
    fn execute(&self, action: &Action) -> Result<ToolResult> {
        let tool = action
            .tool_name()
            .ok_or_else(|| anyhow!("'{}' is not a tool action", action.name()))?;
        self.calls.lock().expect("calls lock").push(action.clone());
        let scripted = self.results.lock().expect("results lock").pop_front();
        Ok(scripted.unwrap_or_else(|| ok_result(tool)))
    }
}

/// Successful process result with stdout `ok`.
pub fn ok_result(tool: ToolName) -> ToolResult {
    ToolResult::new(
        tool,
        ToolOutput::Process {
            stdout: "ok".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
            timed_out: false,
        },
    )
}

/// Controller transport that replays canned responses and records requests.
#[derive(Debug, Default)]
pub struct ScriptedControllerClient {
    responses: Mutex<VecDeque<Result<StepResponse, String>>>,
    requests: Mutex<Vec<StepRequest>>,
}

impl ScriptedControllerClient {
    pub fn new(responses: Vec<Result<StepResponse, String>>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<StepRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl ControllerClient for ScriptedControllerClient {
    fn step(&self, request: &StepRequest) -> Result<StepResponse> {
        self.requests
            .lock()
            .expect("requests lock")
            .push(request.clone());
        match self.responses.lock().expect("responses lock").pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted controller has no responses left")),
        }
    }
}

/// Step response for conversation `id` carrying `action`.
pub fn response(id: &str, action: Action) -> StepResponse {
    StepResponse {
        conversation_id: id.to_string(),
        action,
    }
}

/// Temporary working directory for tool runs.
pub struct TestWorkspace {
    dir: TempDir,
}

impl TestWorkspace {
    pub fn new() -> Result<Self> {
        Ok(Self {
            dir: tempfile::tempdir()?,
        })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn write(&self, relative: &str, content: &str) -> Result<()> {
        let path = self.root().join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn read(&self, relative: &str) -> Result<String> {
        Ok(std::fs::read_to_string(self.root().join(relative))?)
    }
}
