//! Agora Server
//!
//! Hosts buyer and seller agents behind one HTTP listener. Each agent has
//! its own JSON-RPC endpoint at `/agents/:agent_id`; agents configured as
//! peers are reached over HTTP, local ones in-process.
//!
//! # Usage
//!
//! ```bash
//! # Start with default settings (one seller, one buyer, deterministic oracle)
//! agora-server
//!
//! # Start with a custom config
//! agora-server --config /path/to/agora.toml
//!
//! # Start with environment overrides
//! AGORA__SERVER__PORT=8080 AGORA__ORACLE__MODE=chat agora-server
//! ```

mod config;

use std::sync::Arc;
use std::time::Duration;

use agora_agents::{
    AccountAddress, BuyerAgent, BuyerConfig, BuyerDeps, ChatOracle, DecisionOracle, DeterministicOracle,
    GuardConfig, LedgerPaymentExecutor, OracleGuard, SellerAgent,
};
use agora_api::{create_router, AppState};
use agora_client::{
    capabilities, AgentClient, AgentEndpoint, HttpTransport, HttpTransportConfig, LocalTransport, RoutingTransport,
    StaticDirectory,
};
use agora_tasks::{HandlerRegistry, TaskServer, TaskStore};
use agora_types::{AgentId, TaskFilter, TaskState};
use clap::Parser;
use tokio::signal;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::{OracleMode, ServerConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// Agora Server - agent-to-agent commerce over JSON-RPC
#[derive(Parser, Debug)]
#[command(name = "agora-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML, JSON, or YAML)
    #[arg(short, long, env = "AGORA_CONFIG")]
    config: Option<String>,

    /// Host to bind to
    #[arg(long, env = "AGORA_HOST")]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "AGORA_PORT")]
    port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "AGORA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format (json, pretty)
    #[arg(long, env = "AGORA_LOG_FORMAT")]
    log_format: Option<String>,
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut server_config = ServerConfig::load(args.config.as_deref())?;

    // CLI overrides file and environment
    if let Some(host) = args.host {
        server_config.server.host = host;
    }
    if let Some(port) = args.port {
        server_config.server.port = port;
    }
    if let Some(level) = args.log_level {
        server_config.logging.level = level;
    }
    if let Some(format) = args.log_format {
        server_config.logging.format = format;
    }

    init_logging(&server_config.logging)?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Agora server");

    let store = Arc::new(TaskStore::new());
    let registry = Arc::new(HandlerRegistry::new());
    let server = Arc::new(TaskServer::new(
        store.clone(),
        registry.clone(),
        server_config.tasks.server_config(),
    ));

    wire_agents(&server_config, server.clone()).await?;

    let purger = spawn_purger(
        store.clone(),
        Duration::from_secs(server_config.tasks.purge_interval_secs.max(1)),
        Duration::from_secs(server_config.tasks.retention_secs),
    );

    let app = create_router(Arc::new(AppState::new(server)), server_config.api_config());

    let addr = server_config.server.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %addr, agents = ?registry.agent_ids(), "Agora server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    purger.abort();
    drain(&store, server_config.server.shutdown_grace()).await;
    let purged = store.purge_terminal(chrono::Duration::zero());
    tracing::info!(purged, remaining = store.len(), "Server shutdown complete");

    Ok(())
}

// =============================================================================
// Initialization Functions
// =============================================================================

/// Initialize logging; `RUST_LOG` wins over the configured level
fn init_logging(config: &config::LoggingConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;

    let subscriber = tracing_subscriber::registry().with(env_filter);

    match config.format.as_str() {
        "json" => {
            subscriber.with(fmt::layer().json().with_target(true)).try_init()?;
        }
        _ => {
            subscriber.with(fmt::layer().pretty().with_target(true)).try_init()?;
        }
    }

    Ok(())
}

fn build_oracle(config: &config::OracleSettings) -> anyhow::Result<Arc<dyn DecisionOracle>> {
    match config.mode {
        OracleMode::Deterministic => Ok(Arc::new(DeterministicOracle::new())),
        OracleMode::Chat => {
            let oracle = ChatOracle::new(config.chat_config())?;
            tracing::info!(base_url = %config.base_url, model = %config.model, "Using chat oracle");
            Ok(Arc::new(oracle))
        }
    }
}

/// Register the configured agents and peers
async fn wire_agents(config: &ServerConfig, server: Arc<TaskServer>) -> anyhow::Result<()> {
    let registry = server.registry().clone();
    let directory = Arc::new(StaticDirectory::new());

    let remote = HttpTransport::new(HttpTransportConfig {
        timeout: Duration::from_secs(config.polling.request_timeout_secs),
        secret_header: config.auth.secret_header.clone(),
        secret: config.auth.outbound_secret.clone(),
    })?;
    for peer in &config.peers {
        let agent_id = AgentId::from(peer.agent_id.as_str());
        remote.register_endpoint(agent_id.clone(), peer.endpoint.clone());
        let endpoint = peer
            .capabilities
            .iter()
            .fold(AgentEndpoint::new(agent_id, peer.endpoint.clone()), |e, c| e.with_capability(c.clone()));
        directory.register(endpoint);
        tracing::info!(agent_id = %peer.agent_id, endpoint = %peer.endpoint, "Registered peer");
    }

    let transport = Arc::new(RoutingTransport::new(LocalTransport::new(server), remote));
    let client = Arc::new(AgentClient::new(transport));
    let oracle = build_oracle(&config.oracle)?;
    let guard = OracleGuard::with_config(GuardConfig::default());

    if config.seller.enabled {
        let seller = SellerAgent::new(config.seller.address.clone(), oracle.clone())
            .with_guard(guard.clone())
            .with_oracle_timeout(config.oracle.timeout());
        for listing in &config.seller.listings {
            let published = seller.add_listing(listing.to_listing(&config.payment.currency))?;
            tracing::info!(product_id = %published.id, title = %published.title, price = published.price, "Listed");
        }

        let agent_id = AgentId::from(config.seller.agent_id.as_str());
        registry.register(agent_id.clone(), Arc::new(seller));
        directory.register(
            AgentEndpoint::new(agent_id, config.server.agent_endpoint(&config.seller.agent_id))
                .with_capability(capabilities::SELL),
        );
    }

    if config.buyer.enabled {
        let account = AccountAddress::parse(&config.buyer.account)?;
        let ledger = Arc::new(LedgerPaymentExecutor::new(config.payment.currency.clone()));
        ledger.fund(account, config.payment.buyer_opening_balance).await;

        let deps = BuyerDeps {
            client,
            directory: directory.clone(),
            oracle,
            payments: ledger,
            guard,
        };
        let buyer_config = BuyerConfig {
            poll: config.polling.options(),
            oracle_timeout: config.oracle.timeout(),
            payment_timeout: Duration::from_secs(config.payment.timeout_secs),
            ..BuyerConfig::new(account)
        };

        let agent_id = AgentId::from(config.buyer.agent_id.as_str());
        registry.register(
            agent_id.clone(),
            Arc::new(
                BuyerAgent::new(deps, buyer_config)
                    .with_default_currency(config.payment.currency.clone())
                    .with_default_budget(config.buyer.default_budget),
            ),
        );
        directory.register(
            AgentEndpoint::new(agent_id, config.server.agent_endpoint(&config.buyer.agent_id))
                .with_capability(capabilities::BUY),
        );
    }

    Ok(())
}

/// Purge old terminal tasks in the background
fn spawn_purger(store: Arc<TaskStore>, every: Duration, retention: Duration) -> tokio::task::JoinHandle<()> {
    let retention = chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::hours(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = store.purge_terminal(retention);
            if purged > 0 {
                tracing::debug!(purged, "Purged terminal tasks");
            }
        }
    })
}

/// Give in-flight tasks up to `grace` to finish
async fn drain(store: &TaskStore, grace: Duration) {
    let filter = TaskFilter {
        state: Some(TaskState::Working),
        limit: 1,
        ..TaskFilter::default()
    };
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let working = store.list(&filter).total;
        if working == 0 {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(working, "Shutdown grace elapsed with tasks still running");
            return;
        }
        tracing::info!(working, "Waiting for in-flight tasks");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

// =============================================================================
// Graceful Shutdown
// =============================================================================

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
