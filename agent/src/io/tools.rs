//! Local execution of tool actions.
//!
//! The [`ToolRunner`] trait decouples the executor loop from the machine it
//! runs on. [`LocalToolRunner`] executes against the working directory using
//! the shell, the filesystem and external search programs. Tests use doubles
//! that record calls without touching the environment.
//!
//! Every outcome of a tool action is returned as data. The only `Err` is a
//! caller bug: dispatching `finish` or `unknown`.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Result, anyhow};
use tracing::{debug, info, instrument, warn};

use crate::core::types::{Action, ToolName, ToolOutput, ToolResult};
use crate::io::config::{ProgramTier, ToolsConfig};
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Abstraction over tool execution backends.
pub trait ToolRunner {
    /// Execute a tool-bearing action. Errors only for `finish`/`unknown`.
    fn execute(&self, action: &Action) -> Result<ToolResult>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tier {
    Preferred,
    Baseline,
}

/// Runs tool actions against a local working directory.
#[derive(Debug, Clone)]
pub struct LocalToolRunner {
    workdir: PathBuf,
    config: ToolsConfig,
}

impl ToolRunner for LocalToolRunner {
    #[instrument(skip_all, fields(action = action.name()))]
    fn execute(&self, action: &Action) -> Result<ToolResult> {
        let result = match action {
            Action::RunShellCommand { command } => self.run_shell_command(command),
            Action::ReadFile { path } => self.read_file(path),
            Action::WriteFile { path, content } => self.write_file(path, content),
            Action::ListDirectory { path } => self.list_directory(path),
            Action::GlobFiles { pattern, path } => self.glob_files(pattern, path),
            Action::GrepContent {
                pattern,
                path,
                file_type,
            } => self.grep_content(pattern, path, file_type.as_deref()),
            Action::Finish { .. } | Action::Unknown { .. } => {
                return Err(anyhow!("'{}' is not a tool action", action.name()));
            }
        };
        if let Some(error) = result.error_message() {
            info!(error, "tool reported an error");
        }
        Ok(result)
    }
}

impl LocalToolRunner {
    pub fn new(workdir: impl Into<PathBuf>, config: ToolsConfig) -> Self {
        Self {
            workdir: workdir.into(),
            config,
        }
    }

    fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.workdir.join(path)
        }
    }

    fn run_shell_command(&self, command: &str) -> ToolResult {
        let tool = ToolName::RunShellCommand;
        if command.trim().is_empty() {
            return ToolResult::error(tool, "command cannot be empty");
        }
        let (interpreter, args) = match self.config.shell.split_first() {
            Some(split) => split,
            None => return ToolResult::error(tool, "no shell interpreter configured"),
        };
        let mut cmd = Command::new(interpreter);
        cmd.args(args).arg(command).current_dir(&self.workdir);

        match self.run(cmd) {
            Ok(output) => ToolResult::new(tool, process_output(&output)),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "shell failed to start");
                ToolResult::error(tool, format!("failed to start {interpreter}: {err:#}"))
            }
        }
    }

    fn read_file(&self, path: &str) -> ToolResult {
        let tool = ToolName::ReadFile;
        if path.trim().is_empty() {
            return ToolResult::error(tool, "file_path cannot be empty");
        }
        match fs::read_to_string(self.resolve(path)) {
            Ok(content) => ToolResult::new(tool, ToolOutput::Content { content }),
            Err(err) => ToolResult::error(tool, describe_fs_error(&err, "read", path)),
        }
    }

    fn write_file(&self, path: &str, content: &str) -> ToolResult {
        let tool = ToolName::WriteFile;
        if path.trim().is_empty() {
            return ToolResult::error(tool, "file_path cannot be empty");
        }
        let target = self.resolve(path);
        if let Some(parent) = target.parent() {
            if let Err(err) = fs::create_dir_all(parent) {
                return ToolResult::error(
                    tool,
                    format!("create directory {}: {err}", parent.display()),
                );
            }
        }
        match fs::write(&target, content) {
            Ok(()) => ToolResult::new(
                tool,
                ToolOutput::Written {
                    bytes: content.len(),
                },
            ),
            Err(err) => ToolResult::error(tool, describe_fs_error(&err, "write", path)),
        }
    }

    fn list_directory(&self, path: &str) -> ToolResult {
        let path = non_empty_or_current(path);
        self.run_tiered(
            ToolName::ListDirectory,
            &self.config.list_directory,
            |_| vec!["-la".to_string(), path.to_string()],
        )
    }

    fn glob_files(&self, pattern: &str, path: &str) -> ToolResult {
        if pattern.trim().is_empty() {
            return ToolResult::error(ToolName::GlobFiles, "pattern cannot be empty");
        }
        let path = non_empty_or_current(path);
        self.run_tiered(
            ToolName::GlobFiles,
            &self.config.glob_files,
            |tier| match tier {
                Tier::Preferred => vec![
                    "--glob".to_string(),
                    pattern.to_string(),
                    path.to_string(),
                ],
                Tier::Baseline => vec![
                    path.to_string(),
                    "-name".to_string(),
                    pattern.to_string(),
                ],
            },
        )
    }

    fn grep_content(&self, pattern: &str, path: &str, file_type: Option<&str>) -> ToolResult {
        if pattern.is_empty() {
            return ToolResult::error(ToolName::GrepContent, "pattern cannot be empty");
        }
        let path = non_empty_or_current(path);
        let extension = file_type
            .map(|ext| ext.trim().trim_start_matches('*').trim_start_matches('.'))
            .filter(|ext| !ext.is_empty());
        self.run_tiered(
            ToolName::GrepContent,
            &self.config.grep_content,
            |tier| {
                let mut args = match tier {
                    Tier::Preferred => vec!["--line-number".to_string(), "--no-heading".to_string()],
                    Tier::Baseline => vec!["-rn".to_string()],
                };
                if let Some(ext) = extension {
                    match tier {
                        Tier::Preferred => {
                            args.push("--glob".to_string());
                            args.push(format!("*.{ext}"));
                        }
                        Tier::Baseline => args.push(format!("--include=*.{ext}")),
                    }
                }
                args.push("-e".to_string());
                args.push(pattern.to_string());
                args.push(path.to_string());
                args
            },
        )
    }

    /// Run the preferred program, falling back to the baseline when it is
    /// missing or does not exit with an accepted code.
    fn run_tiered<F>(&self, tool: ToolName, tier: &ProgramTier, args: F) -> ToolResult
    where
        F: Fn(Tier) -> Vec<String>,
    {
        let accepted_codes = tool.accepted_exit_codes();
        match self.run_program(&tier.preferred, args(Tier::Preferred)) {
            Ok(output) if output.succeeded_with(accepted_codes) => {
                return ToolResult::new(tool, process_output(&output)).with_program(&tier.preferred);
            }
            Ok(output) => debug!(
                program = %tier.preferred,
                reason = %output.diagnostic(),
                "preferred program failed, using baseline"
            ),
            Err(err) => debug!(
                program = %tier.preferred,
                err = %format!("{err:#}"),
                "preferred program unavailable, using baseline"
            ),
        }

        match self.run_program(&tier.baseline, args(Tier::Baseline)) {
            Ok(output) if output.succeeded_with(accepted_codes) => {
                ToolResult::new(tool, process_output(&output)).with_program(&tier.baseline)
            }
            Ok(output) => ToolResult::error(tool, format!("{}: {}", tier.baseline, output.diagnostic()))
                .with_program(&tier.baseline),
            Err(err) => ToolResult::error(tool, format!("{}: {err:#}", tier.baseline)),
        }
    }

    fn run_program(&self, program: &str, args: Vec<String>) -> Result<CommandOutput> {
        let mut cmd = Command::new(program);
        cmd.args(args).current_dir(&self.workdir);
        self.run(cmd)
    }

    fn run(&self, cmd: Command) -> Result<CommandOutput> {
        run_command_with_timeout(
            cmd,
            self.config.command_timeout(),
            self.config.output_limit_bytes,
        )
    }
}

fn process_output(output: &CommandOutput) -> ToolOutput {
    ToolOutput::Process {
        stdout: output.stdout_text(),
        stderr: output.stderr_text(),
        exit_code: output.status.code(),
        timed_out: output.timed_out,
    }
}

fn non_empty_or_current(path: &str) -> &str {
    if path.trim().is_empty() { "." } else { path }
}

fn describe_fs_error(err: &std::io::Error, verb: &str, path: &str) -> String {
    match err.kind() {
        ErrorKind::NotFound => format!("file not found: {path}"),
        ErrorKind::PermissionDenied => format!("permission denied: {path}"),
        ErrorKind::InvalidData => format!("{path} is not valid UTF-8"),
        _ => format!("{verb} {path}: {err}"),
    }
}
