//! Rendering of conversation events into initiator turn text.

use std::sync::OnceLock;

use anyhow::Result;
use minijinja::{Environment, context};

use crate::core::types::{ConversationEvent, InitialPrompt, ToolOutput, ToolResult};

const INITIAL_PROMPT_TEMPLATE: &str = include_str!("prompts/initial_prompt.md");
const TOOL_RESULT_TEMPLATE: &str = include_str!("prompts/tool_result.md");

/// Fixed instruction block describing the action wire format to the responder.
pub const SYSTEM_INSTRUCTION: &str = include_str!("prompts/system.md");

fn environment() -> &'static Environment<'static> {
    static ENV: OnceLock<Environment<'static>> = OnceLock::new();
    ENV.get_or_init(|| {
        let mut env = Environment::new();
        env.add_template("initial_prompt", INITIAL_PROMPT_TEMPLATE)
            .expect("initial_prompt template should be valid");
        env.add_template("tool_result", TOOL_RESULT_TEMPLATE)
            .expect("tool_result template should be valid");
        env
    })
}

/// Render the initiator turn content for an event.
pub fn render_event(event: &ConversationEvent) -> Result<String> {
    match event {
        ConversationEvent::InitialPrompt(prompt) => render_initial_prompt(prompt),
        ConversationEvent::ToolResponse(result) => render_tool_result(result),
    }
}

pub fn render_initial_prompt(prompt: &InitialPrompt) -> Result<String> {
    let template = environment().get_template("initial_prompt")?;
    let rendered = template.render(context! {
        title => prompt.title.trim(),
        body => prompt.body.trim(),
        context => &prompt.context,
    })?;
    Ok(rendered)
}

pub fn render_tool_result(result: &ToolResult) -> Result<String> {
    let mut exit_code = None;
    let mut timed_out = false;
    let mut stdout = None;
    let mut stderr = None;
    let mut content = None;
    let mut bytes = None;
    let mut error = None;
    match &result.output {
        ToolOutput::Process {
            stdout: out,
            stderr: err,
            exit_code: code,
            timed_out: killed,
        } => {
            exit_code = *code;
            timed_out = *killed;
            stdout = Some(out.trim_end());
            stderr = Some(err.trim_end());
        }
        ToolOutput::Content { content: text } => content = Some(text.as_str()),
        ToolOutput::Written { bytes: count } => bytes = Some(*count),
        ToolOutput::Error { error: message } => error = Some(message.as_str()),
    }

    let template = environment().get_template("tool_result")?;
    let rendered = template.render(context! {
        tool_name => result.tool_name.as_str(),
        program => result.program.as_deref(),
        success => result.succeeded(),
        exit_code,
        timed_out,
        stdout,
        stderr,
        content,
        bytes,
        error,
    })?;
    Ok(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::ToolName;

    #[test]
    fn initial_prompt_includes_title_body_and_context() {
        let mut prompt = InitialPrompt {
            title: "T".to_string(),
            body: "B".to_string(),
            ..InitialPrompt::default()
        };
        prompt
            .context
            .insert("repository".to_string(), "acme/widgets".to_string());

        let rendered = render_initial_prompt(&prompt).expect("render");
        assert!(rendered.contains("Issue Title: T"));
        assert!(rendered.contains("Issue Body: B"));
        assert!(rendered.contains("- repository: acme/widgets"));
    }

    #[test]
    fn initial_prompt_without_context_omits_section() {
        let prompt = InitialPrompt {
            title: "T".to_string(),
            body: "B".to_string(),
            ..InitialPrompt::default()
        };
        let rendered = render_initial_prompt(&prompt).expect("render");
        assert!(!rendered.contains("Context:"));
    }

    #[test]
    fn nonzero_exit_renders_as_unsuccessful_result() {
        let result = ToolResult::new(
            ToolName::RunShellCommand,
            ToolOutput::Process {
                stdout: String::new(),
                stderr: "boom\n".to_string(),
                exit_code: Some(2),
                timed_out: false,
            },
        );
        let rendered = render_tool_result(&result).expect("render");
        assert!(rendered.starts_with("Tool execution result for 'run_shell_command':"));
        assert!(rendered.contains("Success: false"));
        assert!(rendered.contains("Exit Code: 2"));
        assert!(rendered.contains("Stderr:\nboom"));
        assert!(!rendered.contains("Stdout:"));
    }

    #[test]
    fn grep_without_matches_renders_as_successful() {
        let result = ToolResult::new(
            ToolName::GrepContent,
            ToolOutput::Process {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: Some(1),
                timed_out: false,
            },
        )
        .with_program("grep");
        let rendered = render_tool_result(&result).expect("render");
        assert!(rendered.contains("Success: true"), "{rendered}");
        assert!(rendered.contains("Exit Code: 1"));
    }

    #[test]
    fn timed_out_command_renders_as_unsuccessful() {
        let result = ToolResult::new(
            ToolName::RunShellCommand,
            ToolOutput::Process {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: None,
                timed_out: true,
            },
        );
        let rendered = render_tool_result(&result).expect("render");
        assert!(rendered.contains("Success: false"), "{rendered}");
        assert!(rendered.contains("Timed Out: true"));
    }

    #[test]
    fn error_and_program_are_rendered() {
        let result = ToolResult::error(ToolName::GlobFiles, "find: missing").with_program("find");
        let rendered = render_tool_result(&result).expect("render");
        assert!(rendered.contains("Program: find"));
        assert!(rendered.contains("Error: find: missing"));
    }

    #[test]
    fn empty_file_content_is_still_shown() {
        let result = ToolResult::new(
            ToolName::ReadFile,
            ToolOutput::Content {
                content: String::new(),
            },
        );
        let rendered = render_tool_result(&result).expect("render");
        assert!(rendered.contains("Success: true"));
        assert!(rendered.contains("Content:"));
    }
}
