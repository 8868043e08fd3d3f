//! Cross-venue DEX arbitrage agent entry point.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use strum::IntoEnumIterator;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use url::Url;

use dex_arb_agent::api::{create_router, AppState};
use dex_arb_agent::config::{Config, SubmissionPath};
use dex_arb_agent::fee::{FeeOracle, Urgency};
use dex_arb_agent::metrics;
use dex_arb_agent::network::{Connector, EndpointManager, ProtectedRelay, RpcConnector};
use dex_arb_agent::orchestrator::{LoopExit, Orchestrator, OrchestratorState};
use dex_arb_agent::scanner::{NotionalSpreadPolicy, OpportunityScanner};
use dex_arb_agent::settlement::{
    JsonLinesSink, OutcomeSink, SettlementExecutor, SubmissionRoute, TracingSink,
};
use dex_arb_agent::signing::address_from_private_key;
use dex_arb_agent::utils::{from_base_units, shutdown_signal};

const RULE: &str = "======================================================================";

/// Cross-venue DEX arbitrage agent.
#[derive(Parser, Debug)]
#[command(name = "dex-arb-agent")]
#[command(about = "Detects and settles cross-venue DEX price spreads")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true, env = "VERBOSE")]
    verbose: bool,

    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Option<Command>,

    /// HTTP server port for health/status/metrics. Overrides PORT.
    #[arg(short, long)]
    port: Option<u16>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the detect/execute loop with the HTTP API (default).
    Run {
        /// HTTP server port. Overrides PORT.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Connect to the endpoint pool and print endpoint health.
    CheckEndpoints,

    /// Print a fee quote for every urgency tier.
    FeeQuote,

    /// Run a single detection pass and print the ranked opportunities.
    Scan,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before clap reads env-backed flags
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("dex_arb_agent=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(args.log_json.then(|| fmt::layer().json()))
        .with((!args.log_json).then(fmt::layer))
        .init();

    match args.command {
        Some(Command::CheckConfig) => cmd_check_config().await,
        Some(Command::CheckEndpoints) => cmd_check_endpoints().await,
        Some(Command::FeeQuote) => cmd_fee_quote().await,
        Some(Command::Scan) => cmd_scan().await,
        Some(Command::Run { port }) => cmd_run(port.or(args.port)).await,
        None => cmd_run(args.port).await,
    }
}

/// Everything the loop needs, wired from configuration.
struct Agent {
    manager: Arc<EndpointManager>,
    oracle: Arc<FeeOracle>,
    scanner: Arc<OpportunityScanner>,
    orchestrator: Arc<Orchestrator>,
}

fn load_config() -> anyhow::Result<Config> {
    let config = Config::load().context("Failed to load configuration")?;
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}

async fn build(config: &Config) -> anyhow::Result<Agent> {
    let rpc_settings = config.rpc_settings()?;
    let endpoint_settings = config.endpoint_settings();
    let connector = RpcConnector::new(endpoint_settings.request_timeout, rpc_settings.clone())?;

    let manager = Arc::new(EndpointManager::new(
        config.endpoints()?,
        Arc::new(connector.clone()),
        endpoint_settings,
    )?);
    let oracle = Arc::new(FeeOracle::new(manager.clone(), config.fee_settings()));

    let scanner = Arc::new(OpportunityScanner::new(
        manager.clone(),
        oracle.clone(),
        config.pairs()?,
        config.venues()?,
        config.scan_settings(),
        Arc::new(NotionalSpreadPolicy::new(config.fee_cost_factor)),
    ));

    let mut sinks: Vec<Arc<dyn OutcomeSink>> = vec![Arc::new(TracingSink)];
    if let Some(path) = &config.outcome_log_path {
        let sink = JsonLinesSink::open(path).await?;
        info!(path = %sink.path().display(), "Appending outcomes to file");
        sinks.push(Arc::new(sink));
    }

    let route = match config.submission_path {
        SubmissionPath::Direct => SubmissionRoute::Direct,
        SubmissionPath::Protected => {
            // Presence of both is checked by `validate`
            let url = config
                .protected_relay_url
                .as_deref()
                .context("PROTECTED_RELAY_URL is required for the protected path")?;
            let key = config
                .private_key
                .clone()
                .context("PRIVATE_KEY is required for the protected path")?;
            let url = Url::parse(url).context("Invalid PROTECTED_RELAY_URL")?;
            SubmissionRoute::Protected(Arc::new(ProtectedRelay::new(
                connector.http().clone(),
                url,
                key,
                rpc_settings,
            )))
        }
    };

    let state = Arc::new(OrchestratorState::new());
    let executor = Arc::new(SettlementExecutor::new(
        manager.clone(),
        oracle.clone(),
        state.flight().clone(),
        route,
        config.executor_settings(),
        sinks,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        scanner.clone(),
        executor,
        manager.clone(),
        state,
        config.loop_settings(),
    ));

    Ok(Agent {
        manager,
        oracle,
        scanner,
        orchestrator,
    })
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    println!("{RULE}");
    println!("DEX ARB AGENT - CONFIGURATION CHECK");
    println!("{RULE}");

    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    if let Some(key) = &config.private_key {
        print!("Checking private key... ");
        match address_from_private_key(key) {
            Ok(addr) => {
                println!("OK");
                println!("  Sender address: {}", addr);
            }
            Err(e) => {
                println!("FAILED");
                println!("  Error: {}", e);
                return Err(anyhow::anyhow!("Private key invalid"));
            }
        }
    }

    let endpoints = config.endpoints()?;
    let pairs = config.pairs()?;
    let venues = config.venues()?;

    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Endpoints ({}):", endpoints.len());
    for endpoint in &endpoints {
        println!("    - {} [{}] {}", endpoint.id, endpoint.priority, endpoint.display_host());
    }
    println!(
        "  Pairs: {}",
        pairs.iter().map(|p| p.symbol()).collect::<Vec<_>>().join(", ")
    );
    println!(
        "  Venues: {}",
        venues.iter().map(|v| v.name.as_str()).collect::<Vec<_>>().join(", ")
    );
    println!("  Min Spread: {}", config.min_spread);
    println!("  Min Profit: {}", config.min_profit);
    println!("  Trade Size: {}", config.trade_size);
    println!("  Venue Fee Rate: {}", config.venue_fee_rate);
    println!("  Submission Path: {}", config.submission_path);
    println!("  Tick Interval: {}ms", config.tick_interval_ms);
    println!(
        "  Outcome Log: {}",
        config.outcome_log_path.as_deref().unwrap_or("disabled")
    );
    println!("{RULE}");
    println!("CONFIGURATION CHECK PASSED");
    println!("{RULE}");

    Ok(())
}

/// Probe every configured endpoint's block height.
async fn cmd_check_endpoints() -> anyhow::Result<()> {
    println!("{RULE}");
    println!("DEX ARB AGENT - ENDPOINT CHECK");
    println!("{RULE}");

    let config = load_config()?;
    let timeout = Duration::from_millis(config.request_timeout_ms);
    let connector = RpcConnector::new(timeout, config.rpc_settings()?)?;

    let mut healthy = 0usize;
    let endpoints = config.endpoints()?;
    for endpoint in &endpoints {
        print!("\n{} ({})... ", endpoint.id, endpoint.display_host());
        let start = Instant::now();
        let probed = match connector.connect(endpoint).await {
            Ok(client) => tokio::time::timeout(timeout, client.get_block_height())
                .await
                .map_err(|_| anyhow::anyhow!("timed out after {}ms", timeout.as_millis()))
                .and_then(|r| r.map_err(anyhow::Error::from)),
            Err(e) => Err(e.into()),
        };
        match probed {
            Ok(height) => {
                healthy += 1;
                println!("OK");
                println!("   Block: {}", height);
                println!("   Latency: {}ms", start.elapsed().as_millis());
            }
            Err(e) => {
                println!("FAILED");
                println!("   Error: {}", e);
            }
        }
    }

    println!("\n{RULE}");
    println!("ENDPOINT CHECK COMPLETED: {}/{} healthy", healthy, endpoints.len());
    println!("{RULE}");

    if healthy == 0 {
        return Err(anyhow::anyhow!("No endpoint answered"));
    }
    Ok(())
}

/// Print a fee quote for each urgency tier.
async fn cmd_fee_quote() -> anyhow::Result<()> {
    println!("{RULE}");
    println!("DEX ARB AGENT - FEE QUOTE");
    println!("{RULE}");

    let config = load_config()?;
    let agent = build(&config).await?;

    println!(
        "  Ceiling: {} gwei",
        from_base_units(agent.oracle.ceiling(), 9).unwrap_or_default()
    );
    for urgency in Urgency::iter() {
        let quote = agent.oracle.quote(urgency).await;
        let gwei = from_base_units(quote.amount, 9)
            .map(|g| g.round_dp(3).to_string())
            .unwrap_or_else(|| quote.amount.to_string());
        println!(
            "  {:<8} {:>12} gwei  (source: {})",
            urgency.to_string(),
            gwei,
            quote.source
        );
    }

    println!("{RULE}");
    Ok(())
}

/// Run one detection pass.
async fn cmd_scan() -> anyhow::Result<()> {
    println!("{RULE}");
    println!("DEX ARB AGENT - SINGLE SCAN");
    println!("{RULE}");

    let config = load_config()?;
    let agent = build(&config).await?;

    println!("\nScanning {} pair(s)...\n", agent.scanner.pairs().len());
    match agent.scanner.detect().await {
        Ok(opportunities) if opportunities.is_empty() => {
            println!("No qualifying opportunities.");
        }
        Ok(opportunities) => {
            for (rank, opp) in opportunities.iter().enumerate() {
                println!(
                    "  #{} {} buy@{} {} sell@{} {} spread={} profit={}",
                    rank + 1,
                    opp.pair,
                    opp.venue_buy,
                    opp.price_buy,
                    opp.venue_sell,
                    opp.price_sell,
                    opp.spread_ratio.round_dp(6),
                    opp.estimated_profit.round_dp(6),
                );
            }
        }
        Err(e) => {
            println!("SCAN FAILED");
            println!("  Error: {}", e);
        }
    }

    println!("\n{RULE}");
    Ok(())
}

/// Run the loop with the HTTP API until a signal or a terminal network failure.
async fn cmd_run(port_override: Option<u16>) -> anyhow::Result<()> {
    info!("Loading configuration...");
    let config = load_config().map_err(|e| {
        error!("{:#}", e);
        e
    })?;
    let port = port_override.unwrap_or(config.port);

    let prometheus = match metrics::install_prometheus() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "Prometheus recorder not installed; /metrics disabled");
            None
        }
    };

    let agent = build(&config).await?;

    info!("========================================");
    info!("DEX ARBITRAGE AGENT");
    info!("========================================");
    info!("Pairs: {}", agent.scanner.pairs().len());
    info!("Min spread: {}", config.min_spread);
    info!("Trade size: {}", config.trade_size);
    info!("Submission path: {}", config.submission_path);
    info!("========================================");

    let app_state = AppState::new(agent.orchestrator.clone(), agent.manager.clone(), prometheus);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let (server_stop_tx, server_stop_rx) = oneshot::channel::<()>();
    let server = tokio::spawn(async move {
        axum::serve(listener, create_router(app_state))
            .with_graceful_shutdown(async {
                let _ = server_stop_rx.await;
            })
            .await
    });

    agent.orchestrator.start().await;

    let terminal = tokio::select! {
        _ = shutdown_signal() => None,
        exit = agent.orchestrator.wait_terminal() => Some(exit),
    };

    info!("Shutting down...");
    agent.orchestrator.stop().await;
    let _ = server_stop_tx.send(());
    match server.await {
        Ok(Err(e)) => error!(error = %e, "HTTP server error"),
        Err(e) => error!(error = %e, "HTTP server task failed"),
        Ok(Ok(())) => {}
    }

    let status = agent.orchestrator.status();
    info!("========================================");
    info!("FINAL SUMMARY");
    info!("========================================");
    info!("Ticks: {}", status.ticks);
    info!("Opportunities found: {}", status.opportunities_found);
    info!("Opportunities executed: {}", status.opportunities_executed);
    info!("Succeeded: {}", status.succeeded);
    info!("Failed: {}", status.failed);
    info!("Timed out: {}", status.timeouts);
    info!("========================================");

    match terminal {
        Some(LoopExit::NetworkUnavailable(e)) => {
            Err(anyhow::Error::new(e).context("Stopped: network unavailable"))
        }
        _ => Ok(()),
    }
}
