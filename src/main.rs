use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use atlas_core::model::Provider;
use atlas_engine::{register_travel_tools, ToolRegistry, TravelKnowledge, TurnRunner, TurnStore};
use atlas_llm::LlmClient;
use atlas_server::{AgentService, AppConfig, SessionManager};
use atlas_store::Database;
use atlas_telemetry::init_telemetry;

/// AI travel assistant server.
#[derive(Debug, Parser)]
#[command(name = "atlas", version, about)]
struct Cli {
    /// JSON config file. Falls back to $ATLAS_CONFIG, then to defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the configured listen port.
    #[arg(long)]
    port: Option<u16>,

    /// Override the configured database path.
    #[arg(long)]
    db: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .or_else(|| std::env::var("ATLAS_CONFIG").ok().map(PathBuf::from));
    let config = match &config_path {
        Some(path) => AppConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => AppConfig::default(),
    };
    init_telemetry(&config.telemetry.to_telemetry_config()?);

    match &config_path {
        Some(path) => tracing::info!(config = %path.display(), "starting atlas"),
        None => tracing::info!("starting atlas with default config"),
    }

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.database.path));
    if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating database directory {}", parent.display()))?;
    }
    let db = Database::open(&db_path).context("opening database")?;
    tracing::info!(path = %db_path.display(), "database opened");

    let mut catalog = config.build_catalog()?;
    for (provider, var) in [
        (Provider::OpenAi, "OPENAI_API_KEY"),
        (Provider::Anthropic, "ANTHROPIC_API_KEY"),
        (Provider::Google, "GOOGLE_API_KEY"),
    ] {
        match std::env::var(var) {
            Ok(key) if !key.is_empty() => catalog.fill_missing_keys(provider, &key),
            _ => {}
        }
    }

    let knowledge = Arc::new(TravelKnowledge::builtin());
    let mut registry = ToolRegistry::new();
    register_travel_tools(&mut registry, Arc::clone(&knowledge));

    let client = Arc::new(LlmClient::new(config.llm.to_llm_config()));
    let runner = Arc::new(
        TurnRunner::new(client, Arc::new(registry)).with_store(TurnStore::new(db.clone())),
    );

    let memory_config = config.memory.to_memory_config(knowledge.city_names());
    let manager = Arc::new(SessionManager::new(
        db,
        memory_config,
        config.recency_window(),
    ));
    let _reaper = atlas_server::start_reaper(
        Arc::clone(&manager),
        config.reap_interval(),
        config.session_expiry(),
    );

    let service = Arc::new(AgentService::new(manager, runner, Arc::new(catalog)));

    let mut server_config = config.server.clone();
    if let Some(port) = cli.port {
        server_config.port = port;
    }
    let handle = atlas_server::start(server_config, service)
        .await
        .context("starting server")?;
    tracing::info!(port = handle.port, "atlas ready");

    tokio::signal::ctrl_c()
        .await
        .context("listening for ctrl+c")?;
    tracing::info!("shutting down");
    Ok(())
}
