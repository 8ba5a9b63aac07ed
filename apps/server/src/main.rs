//! Conductor server - main entry point
//!
//! Loads the workflow document, builds and starts the engine, serves
//! the admin API on the shared HTTP server, and shuts down cleanly on
//! SIGINT/SIGTERM.
//!
//! Exit codes: 0 clean stop, 1 configuration error, 2 runtime failure
//! during start, 130 stop by signal.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use conductor_common::{init_tracing, ServerSettings};
use conductor_engine::config::{parse_document, ConfigDocument, ConfigError, ModuleDecl};
use conductor_engine::{EngineBuilder, WorkflowEngine};
use conductor_server::{routes, AppState};

const EXIT_CONFIG: u8 = 1;
const EXIT_RUNTIME: u8 = 2;
const EXIT_SIGNAL: u8 = 130;

#[derive(Parser)]
#[command(name = "conductor-server")]
#[command(about = "Configuration-driven workflow orchestration engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine (default)
    Run {
        /// Workflow document path; overrides CONDUCTOR_CONFIG_PATH
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Listen address for an auto-provisioned HTTP server module
        #[arg(short, long)]
        listen: Option<String>,
    },
    /// Validate a workflow document and exit
    Validate {
        /// Workflow document path; overrides CONDUCTOR_CONFIG_PATH
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Some(Commands::Validate { config }) => validate(config),
        Some(Commands::Run { config, listen }) => run(config, listen).await,
        None => run(None, None).await,
    }
}

fn load_document(config: Option<PathBuf>, settings: &ServerSettings) -> Result<ConfigDocument> {
    let path = config.unwrap_or_else(|| PathBuf::from(&settings.config_path));
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("cannot read '{}'", path.display()))?;
    let doc = parse_document(&raw)
        .with_context(|| format!("cannot parse '{}'", path.display()))?;
    Ok(doc)
}

/// Print a configuration failure with any location and suggestion the
/// validator attached
fn report_config_error(error: &anyhow::Error) {
    eprintln!("configuration error: {error:#}");
    if let Some(config_error) = error.downcast_ref::<ConfigError>() {
        if let Some(location) = &config_error.location {
            eprintln!("  at: {location}");
        }
        if let Some(suggestion) = &config_error.suggestion {
            eprintln!("  {suggestion}");
        }
    }
}

fn validate(config: Option<PathBuf>) -> ExitCode {
    match try_validate(config) {
        Ok(()) => {
            println!("configuration is valid");
            ExitCode::SUCCESS
        }
        Err(error) => {
            report_config_error(&error);
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

fn try_validate(config: Option<PathBuf>) -> Result<()> {
    let settings = ServerSettings::load().context("cannot load settings")?;
    let doc = load_document(config, &settings)?;
    EngineBuilder::new().validate(&doc)?;
    Ok(())
}

async fn run(config: Option<PathBuf>, listen: Option<String>) -> ExitCode {
    let engine = match build_engine(config, listen) {
        Ok(engine) => engine,
        Err(error) => {
            report_config_error(&error);
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    engine.set_admin_router(routes::admin_router(AppState {
        engine: Arc::clone(&engine),
    }));

    if let Err(error) = engine.start().await {
        tracing::error!(%error, "engine failed to start");
        engine.stop().await;
        return ExitCode::from(EXIT_RUNTIME);
    }
    tracing::info!("engine started");

    wait_for_signal().await;
    tracing::info!("shutdown signal received, stopping engine");
    engine.stop().await;

    ExitCode::from(EXIT_SIGNAL)
}

fn build_engine(config: Option<PathBuf>, listen: Option<String>) -> Result<Arc<WorkflowEngine>> {
    let settings = ServerSettings::load().context("cannot load settings")?;
    let listen = listen.unwrap_or_else(|| settings.listen.clone());

    let mut doc = load_document(config, &settings)?;
    ensure_http_module(&mut doc, &listen);

    let engine = WorkflowEngine::from_document(doc).context("cannot build engine")?;
    Ok(Arc::new(engine))
}

/// Guarantee a shared HTTP server module so the admin surface is always
/// reachable, even when the document declares none.
fn ensure_http_module(doc: &mut ConfigDocument, listen: &str) {
    if doc.modules.iter().any(|m| m.module_type == "http.server") {
        return;
    }

    let mut config = serde_json::Map::new();
    config.insert("listen".to_string(), Value::String(listen.to_string()));
    doc.modules.insert(
        0,
        ModuleDecl {
            name: "http".to_string(),
            module_type: "http.server".to_string(),
            config,
            depends_on: Vec::new(),
        },
    );
}

async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("cannot install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("cannot install ctrl-c handler");
    }
}
