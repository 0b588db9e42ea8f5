use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use gauntlet::config::{AppConfig, TraderConfig};
use gauntlet::decision::PromptRegistry;
use gauntlet::error::{GauntletError, Result};
use gauntlet::exchange::{ExchangeAdapter, PaperExchange};
use gauntlet::llm::{LlmClient, LlmConfig};
use gauntlet::logger::DecisionLogger;
use gauntlet::market::{BinanceFuturesProvider, ProviderRegistry, SnapshotAssembler};
use gauntlet::pool::CandidatePool;
use gauntlet::trader::Agent;
use gauntlet::TraderManager;

#[derive(Parser, Debug)]
#[command(name = "gauntlet", about = "AI trading agent competition harness")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "gauntlet.toml")]
    config: String,

    /// Override the API server port
    #[arg(short, long)]
    port: Option<u16>,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,gauntlet=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn build_adapter(trader: &TraderConfig) -> Result<Arc<dyn ExchangeAdapter>> {
    match trader.exchange.as_str() {
        "paper" => Ok(Arc::new(PaperExchange::new(trader.initial_balance))),
        other => Err(GauntletError::InvalidConfig(format!(
            "trader '{}': unknown exchange adapter '{other}'",
            trader.id
        ))),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();

    info!(config = %cli.config, "loading configuration");
    let mut config = AppConfig::load(&cli.config)?;
    if let Some(port) = cli.port {
        config.api_server_port = port;
    }
    // Platform-provided port (Render/Heroku style) wins over the file.
    if let Ok(port) = std::env::var("PORT") {
        if let Ok(port) = port.parse() {
            config.api_server_port = port;
        }
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for p in &problems {
            error!("config: {p}");
        }
        return Err(GauntletError::InvalidConfig(format!(
            "{} configuration problem(s)",
            problems.len()
        )));
    }

    // Market data providers
    let registry = Arc::new(ProviderRegistry::new());
    registry.register("binance", Arc::new(BinanceFuturesProvider::new()?));
    if let Err(e) = registry.set_default(&config.market_data_provider) {
        warn!(
            provider = %config.market_data_provider,
            error = %e,
            "configured provider unavailable, falling back to binance"
        );
        registry.set_default("binance")?;
    }
    info!(provider = %registry.default_name(), "market data source selected");

    let pool = Arc::new(CandidatePool::new(config.pool_config()));
    let prompts = Arc::new(PromptRegistry::new());
    let manager = Arc::new(TraderManager::new());
    let decisions_dir = config.data_dir.join("decisions");

    for trader in config.traders.iter().filter(|t| t.enabled) {
        info!(id = %trader.id, model = %trader.ai_model, "initializing trader");

        let adapter = build_adapter(trader)?;
        let llm = Arc::new(LlmClient::new(LlmConfig::new(
            &trader.api_url,
            trader.api_key.clone(),
            trader.model_name.clone(),
        ))?);
        let logger = Arc::new(DecisionLogger::open(&decisions_dir, trader.id.clone()).await?);

        let agent = Arc::new(Agent::new(
            config.agent_config(trader),
            adapter,
            llm,
            SnapshotAssembler::new(registry.clone()),
            pool.clone(),
            prompts.clone(),
            logger,
        ));
        manager.add_agent(agent).await?;
    }

    // API server
    let api_manager = manager.clone();
    let api_port = config.api_server_port;
    tokio::spawn(async move {
        if let Err(e) = gauntlet::api::serve(api_manager, api_port).await {
            error!(error = %e, "API server exited");
        }
    });

    manager.start_all().await;
    let cleanup = manager.clone().start_decision_log_cleanup(
        config.decision_log_retention_days,
        Duration::from_secs(config.decision_log_cleanup_interval_hours * 3600),
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    cleanup.stop().await;
    manager.stop_all().await;
    info!("all traders stopped");
    Ok(())
}
