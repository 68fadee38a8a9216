//! Executor CLI for the agent orchestration protocol.
//!
//! `agent run` sends a task to the controller and executes the actions it
//! returns in the working directory until the conversation ends. `agent tool`
//! runs a single action locally, which helps when debugging tool tiers.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use agent::core::codec;
use agent::core::types::{Action, InitialPrompt};
use agent::exit_codes;
use agent::io::config::{DEFAULT_CONFIG_PATH, ExecutorConfig, load_config};
use agent::io::tools::{LocalToolRunner, ToolRunner};
use agent::io::transport::HttpControllerClient;
use agent::logging;
use agent::looping::{LoopStop, run_loop};
use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "agent",
    version,
    about = "Executes controller-issued actions against a local workspace"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start a conversation for a task and run it to completion.
    Run {
        /// Task title.
        #[arg(long)]
        title: String,
        /// Task description.
        #[arg(long, default_value = "")]
        body: String,
        /// Extra context as `key=value` (repeatable).
        #[arg(long = "context", value_parser = parse_context_pair)]
        context: Vec<(String, String)>,
        /// Config file (defaults to `.agent/config.toml` in the workdir).
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory the tools operate in.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        /// Override `controller_url` from the config.
        #[arg(long)]
        controller_url: Option<String>,
        /// Override `max_steps` from the config (`0` = unlimited).
        #[arg(long)]
        max_steps: Option<u32>,
    },
    /// Run one action (JSON wire form) and print the tool result.
    Tool {
        /// Action JSON, e.g. `{"action":"list_directory","path":"."}`.
        action: String,
        /// Directory the tool operates in.
        #[arg(long, default_value = ".")]
        workdir: PathBuf,
        /// Config file (defaults to `.agent/config.toml` in the workdir).
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Run {
            title,
            body,
            context,
            config,
            workdir,
            controller_url,
            max_steps,
        } => {
            let mut cfg = load_executor_config(&workdir, config)?;
            if let Some(url) = controller_url {
                cfg.controller_url = url;
            }
            if let Some(limit) = max_steps {
                cfg.max_steps = limit;
            }
            cfg.validate()?;
            let prompt = InitialPrompt {
                title,
                body,
                context: context.into_iter().collect::<BTreeMap<_, _>>(),
            };
            cmd_run(&workdir, &cfg, prompt)
        }
        Command::Tool {
            action,
            workdir,
            config,
        } => {
            let cfg = load_executor_config(&workdir, config)?;
            cmd_tool(&workdir, &cfg, &action)
        }
    }
}

fn cmd_run(workdir: &Path, cfg: &ExecutorConfig, prompt: InitialPrompt) -> Result<i32> {
    let client = HttpControllerClient::new(&cfg.controller_url, cfg.request_timeout())?;
    let tools = LocalToolRunner::new(workdir, cfg.tools.clone());

    let outcome = run_loop(&client, &tools, prompt, cfg.max_steps, |action, result| {
        match result.error_message() {
            Some(error) => eprintln!("{}: error: {error}", action.name()),
            None => eprintln!("{}: ok", action.name()),
        }
    })
    .with_context(|| format!("run conversation against {}", cfg.controller_url))?;

    let code = match outcome.stop {
        LoopStop::Finished { message } => {
            println!("finished: {message}");
            exit_codes::OK
        }
        LoopStop::UnusableOutput { raw_text } => {
            println!("unusable output: {raw_text}");
            exit_codes::UNUSABLE_OUTPUT
        }
        LoopStop::StepLimitReached { max_steps } => {
            println!(
                "step limit reached: {max_steps} actions in conversation {}",
                outcome.conversation_id
            );
            exit_codes::STEP_LIMIT
        }
    };
    Ok(code)
}

fn cmd_tool(workdir: &Path, cfg: &ExecutorConfig, raw: &str) -> Result<i32> {
    let action = codec::decode(raw);
    if let Action::Unknown { .. } = action {
        bail!("not a recognized action: {raw}");
    }
    let tools = LocalToolRunner::new(workdir, cfg.tools.clone());
    let result = tools.execute(&action)?;
    let payload = serde_json::to_string_pretty(&result).context("serialize tool result")?;
    println!("{payload}");
    Ok(exit_codes::OK)
}

fn load_executor_config(workdir: &Path, explicit: Option<PathBuf>) -> Result<ExecutorConfig> {
    let path = explicit.unwrap_or_else(|| workdir.join(DEFAULT_CONFIG_PATH));
    load_config(&path)
}

fn parse_context_pair(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{raw}'"))?;
    if key.trim().is_empty() {
        return Err("context key must be non-empty".to_string());
    }
    Ok((key.trim().to_string(), value.to_string()))
}
