//! Stellar Gateway Service
//!
//! Main entry point: REST API for outbound payments plus the payment listener.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stellar_gateway::{
    api::{self, AppState},
    classifier::{AssetPolicy, Classifier},
    federation::FederationResolver,
    horizon::HorizonClient,
    ledger::Ledger,
    listener::{ListenerConfig, PaymentListener},
    mock_ledger::MockLedger,
    webhook::WebhookDispatcher,
    Config, MemoryStore, PaymentStore, RedisStore, TransactionSubmitter,
};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Parser)]
#[command(name = "stellar-gateway")]
#[command(about = "Stellar payment gateway: transaction submitter and payment listener")]
struct Cli {
    /// Load environment variables from this file instead of ./.env
    #[arg(long)]
    env_file: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Without --env-file, Config::from_env picks up ./.env
    if let Some(path) = &cli.env_file {
        dotenv::from_path(path).with_context(|| format!("Failed to load {}", path.display()))?;
    }

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,stellar_gateway=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Stellar Gateway");

    // Load configuration
    let config = Config::from_env()?;
    info!("Configuration loaded");
    info!("  API address: {}", config.api_address());
    info!("  Horizon: {}", config.horizon_url);
    info!("  Network: {}", config.network_passphrase);
    info!("  Mock mode: {}", config.mock_mode);

    if cli.check_config {
        info!("Configuration is valid: {:?}", config);
        return Ok(());
    }

    let (ledger, store): (Arc<dyn Ledger>, Arc<dyn PaymentStore>) = if config.mock_mode {
        warn!("Mock mode: using in-memory ledger and storage");
        (Arc::new(mock_ledger(&config)), Arc::new(MemoryStore::new()))
    } else {
        (
            Arc::new(HorizonClient::new(&config.horizon_url)?),
            Arc::new(RedisStore::new(&config.redis_url).await?),
        )
    };

    // Managed accounts
    let submitter = Arc::new(TransactionSubmitter::new(ledger.clone()));

    match &config.authorizing_seed {
        Some(seed) => match submitter.init_account(seed).await {
            Ok(account) => info!("Authorizing account {} initialized", account),
            Err(e) => error!("Cannot initialize authorizing account: {}", e),
        },
        None => warn!("No AUTHORIZING_SEED. Skipping..."),
    }

    let issuing_account = match &config.issuing_seed {
        Some(seed) => match submitter.init_account(seed).await {
            Ok(account) => {
                info!("Issuing account {} initialized", account);
                Some(account)
            }
            Err(e) => {
                error!("Cannot initialize issuing account: {}", e);
                None
            }
        },
        None => {
            warn!("No ISSUING_SEED. Skipping...");
            None
        }
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Payment listener
    let mut listener_task = if config.listener_enabled() {
        let policy = AssetPolicy::parse(&config.assets, config.issuing_account().as_deref())?;
        let receiving = config
            .receiving_account_id
            .clone()
            .context("RECEIVING_ACCOUNT_ID is required by the listener")?;
        let receive_hook = config
            .receive_hook_url
            .clone()
            .context("RECEIVE_HOOK_URL is required by the listener")?;

        let listener = PaymentListener::new(
            ledger.clone(),
            store.clone(),
            WebhookDispatcher::new(HTTP_TIMEOUT)?,
            Classifier::new(receiving, policy),
            ListenerConfig {
                receive_hook,
                page_limit: config.page_limit,
                polling_interval: config.polling_interval(),
                retry_interval: config.retry_interval(),
                start: config.stream_start,
            },
        );

        Some(tokio::spawn(listener.run(shutdown_rx.clone())))
    } else {
        warn!("RECEIVING_ACCOUNT_ID or RECEIVE_HOOK_URL not set. Payment listener disabled.");
        None
    };

    // API server
    let state = AppState {
        submitter,
        ledger,
        resolver: Arc::new(FederationResolver::new(HTTP_TIMEOUT)?),
        store,
        network_passphrase: config.network_passphrase.clone(),
        api_key: config.api_key.clone(),
        issuing_account,
    };
    let app = api::create_router(state);

    let api_addr = config.api_address();
    let tcp_listener = tokio::net::TcpListener::bind(&api_addr).await?;
    info!("API server listening on {}", api_addr);

    let mut api_shutdown = shutdown_rx.clone();
    let api_task = tokio::spawn(async move {
        let result = axum::serve(tcp_listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.wait_for(|stop| *stop).await;
            })
            .await;
        if let Err(e) = result {
            error!("API server error: {:#}", e);
        }
    });

    info!("Stellar Gateway is running");

    let mut crashed = false;
    let mut listener_finished = false;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = async {
            match listener_task.as_mut() {
                Some(task) => task.await,
                None => std::future::pending().await,
            }
        } => {
            listener_finished = true;
            match result {
                Ok(Ok(())) => warn!("Payment listener stopped"),
                Ok(Err(e)) => {
                    error!("Payment listener crashed: {:#}", e);
                    crashed = true;
                }
                Err(e) => {
                    error!("Payment listener task failed: {}", e);
                    crashed = true;
                }
            }
        }
    }

    info!("Shutting down Stellar Gateway");
    let _ = shutdown_tx.send(true);

    // The in-flight operation settles before the listener returns
    if let Some(task) = listener_task.filter(|_| !listener_finished) {
        match task.await {
            Ok(Ok(())) => info!("Payment listener stopped"),
            Ok(Err(e)) => error!("Payment listener crashed: {:#}", e),
            Err(e) => error!("Payment listener task failed: {}", e),
        }
    }

    if let Err(e) = api_task.await {
        error!("API task failed: {}", e);
    }

    if crashed {
        anyhow::bail!("Payment listener crashed");
    }

    Ok(())
}

/// In-memory ledger knowing the configured accounts
fn mock_ledger(config: &Config) -> MockLedger {
    let ledger = MockLedger::new();

    let managed = [&config.authorizing_seed, &config.issuing_seed]
        .into_iter()
        .flatten()
        .filter_map(|seed| gateway_common::Keypair::from_secret(seed).ok())
        .map(|keypair| keypair.address().to_string());

    for account in managed.chain(config.receiving_account_id.clone()) {
        info!("Mock ledger: created account {}", account);
        ledger.create_account(&account, 0);
    }

    ledger
}
