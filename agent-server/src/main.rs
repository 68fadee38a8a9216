//! Controller server - hosts the conversation `step` operation over HTTP.

mod config;
mod routes;
mod state;

use std::net::SocketAddr;
use std::path::PathBuf;

use agent::controller::Controller;
use agent::io::reasoner::{GeminiReasoner, Reasoner};
use agent::io::store::{ConversationStore, MemoryStore, RedisStore};
use anyhow::Context;
use axum::Router;
use clap::Parser;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::{ServerConfig, load_server_config};
use crate::state::{AppState, DynController};

#[derive(Parser)]
#[command(name = "agent-server")]
#[command(about = "Controller service for the agent orchestration protocol")]
struct Args {
    /// Server config file (TOML). Missing file means defaults.
    #[arg(long, default_value = "agent-server.toml")]
    config: PathBuf,

    /// Address to bind the server to (overrides config)
    #[arg(long)]
    bind: Option<String>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Keep conversations in process memory instead of Redis
    #[arg(long)]
    memory_store: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("agent_server=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut cfg = load_server_config(&args.config)?;
    if let Some(bind) = args.bind {
        cfg.bind = bind;
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }
    cfg.validate()?;

    let memory_store = args.memory_store;
    let build_cfg = cfg.clone();
    // Blocking HTTP and Redis clients must be created off the async runtime.
    let controller = tokio::task::spawn_blocking(move || build_controller(&build_cfg, memory_store))
        .await
        .context("controller setup task")??;
    let state = AppState::new(controller);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .merge(routes::api_router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", cfg.bind, cfg.port).parse()?;
    info!(addr = %addr, memory_store, model = %cfg.gemini.model, "listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await?;

    Ok(())
}

fn build_controller(cfg: &ServerConfig, memory_store: bool) -> anyhow::Result<DynController> {
    let reasoner: Box<dyn Reasoner> = Box::new(GeminiReasoner::from_config(cfg.gemini.clone())?);
    let store: Box<dyn ConversationStore> = if memory_store {
        info!("using in-memory conversation store");
        Box::new(MemoryStore::new())
    } else {
        info!(redis_url = %cfg.redis_url, "using redis conversation store");
        Box::new(RedisStore::connect(&cfg.redis_url)?)
    };
    Ok(Controller::new(reasoner, store).with_ttl(cfg.conversation_ttl()))
}
