//! Lock→mint bridge relay
//!
//! Polls the source chain for confirmed `Lock` events and mints the bridged
//! value on the destination chain, once per nonce.
//!
//! The source chain is either a real EVM node (`SOURCE_SIMULATED=false` plus
//! `SOURCE_RPC_URL`) or an in-process simulation. Mints are currently
//! submitted through the simulated mint client.

use std::sync::Arc;
use std::time::Duration;

use lockmint_relay::api::{self, AppState};
use lockmint_relay::chain::simulated::SimulationConfig;
use lockmint_relay::chain::{ChainReader, EvmChainReader, SimulatedChainReader};
use lockmint_relay::config::Config;
use lockmint_relay::cursor::JsonFileStateStore;
use lockmint_relay::metrics::Metrics;
use lockmint_relay::orchestrator::{Collaborators, RelayOrchestrator};
use lockmint_relay::submitter::{JsonlDeadLetterSink, SimulatedMintClient};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

fn main() -> eyre::Result<()> {
    // Install color-eyre for better error reporting
    color_eyre::install()?;

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main())
}

async fn async_main() -> eyre::Result<()> {
    init_logging();

    info!("Starting lock/mint bridge relay");

    let config = Config::load()?;
    info!(
        source = %config.source.name,
        destination = %config.destination.name,
        bridge = %config.source.bridge_address,
        confirmations = config.source.confirmation_blocks,
        simulated = config.source.simulated,
        "Configuration loaded"
    );

    let orchestrator_config = config.orchestrator_config()?;

    let chain_reader: Arc<dyn ChainReader> = match (&config.source.rpc_url, config.source.simulated)
    {
        (Some(rpc_url), false) => Arc::new(EvmChainReader::new(&config.source.name, rpc_url)?),
        _ => Arc::new(SimulatedChainReader::new(
            &config.source.name,
            orchestrator_config.bridge_address,
            SimulationConfig {
                initial_head: config
                    .source
                    .start_block
                    .saturating_add(config.source.confirmation_blocks),
                ..SimulationConfig::default()
            },
        )),
    };

    if config.destination.rpc_url.is_some() {
        warn!(
            chain = %config.destination.name,
            "DEST_RPC_URL is set but mints are submitted by the simulated client"
        );
    }
    let mint_client = Arc::new(SimulatedMintClient::new(
        &config.destination.name,
        Duration::from_millis(config.destination.submit_delay_ms),
        Duration::from_millis(config.destination.confirm_delay_ms),
        config.destination.sim_failure_rate,
    ));

    let collaborators = Collaborators {
        chain_reader,
        state_store: Arc::new(JsonFileStateStore::new(&config.relayer.state_file)),
        mint_client,
        dead_letters: Arc::new(JsonlDeadLetterSink::new(&config.relayer.dead_letter_file)),
    };

    let metrics = Arc::new(Metrics::new());
    let orchestrator =
        RelayOrchestrator::new(orchestrator_config, collaborators, metrics.clone()).await?;

    let shutdown = CancellationToken::new();

    let api_handle = if config.api.enabled {
        let state = AppState {
            status: orchestrator.status(),
            metrics,
            source_chain: config.source.name.clone(),
            destination_chain: config.destination.name.clone(),
        };
        let bind_address = config.api.bind_address.clone();
        let port = config.api.port;
        let api_shutdown = shutdown.clone();
        Some(tokio::spawn(async move {
            if let Err(e) = api::start_server(&bind_address, port, state, api_shutdown).await {
                error!(error = %e, "Health server error");
            }
        }))
    } else {
        None
    };

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        signal_shutdown.cancel();
    });

    let result = orchestrator.run(shutdown.clone()).await;

    // The API stops with the same token
    shutdown.cancel();
    if let Some(handle) = api_handle {
        if let Err(e) = handle.await {
            error!(error = %e, "Health server task failed");
        }
    }

    match result {
        Ok(state) => {
            info!(
                last_processed_block = state.last_processed_block,
                "Relay stopped"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Relay stopped with an error");
            Err(e)
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,lockmint_relay=debug"));

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(true))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .with(filter)
            .init();
    }
}

/// Wait for shutdown signals (SIGINT/SIGTERM)
async fn wait_for_shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown");
        }
    }
}
