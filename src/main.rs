//! EVM transaction client runner
//!
//! Connects to the configured node, registers the key named in the wallet
//! section and pushes a batch of transfers through the broadcast pipeline,
//! then waits for each accepted transaction to be confirmed.

use anyhow::{Context, Result};
use ethers::types::{Address, H256};
use std::env;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use evm_txclient::config::Settings;
use evm_txclient::metrics::MetricsServer;
use evm_txclient::{Client, Request};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    init_logging();

    info!("Starting EVM transaction client v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let settings = Settings::load()?;
    info!(
        "Loaded configuration with {} RPC endpoint(s)",
        settings.chain.rpc_urls.len()
    );

    // Start metrics server
    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let client = Arc::new(
        Client::dial(&settings)
            .await
            .context("Failed to connect to chain")?,
    );

    let from = match &settings.wallet.private_key_env {
        Some(var) => {
            let key = env::var(var)
                .with_context(|| format!("Private key variable {} is not set", var))?;
            client.register_private_key_hex(&key).await?
        }
        None => anyhow::bail!("wallet.private_key_env is not configured"),
    };

    let recipient: Address = match &settings.batch.recipient {
        Some(recipient) => recipient
            .parse()
            .with_context(|| format!("Invalid batch recipient: {}", recipient))?,
        None => Address::zero(),
    };

    let mut responses = client
        .responses()
        .context("Response stream already taken")?;

    // Producer: schedule the batch then close the request queue
    let producer = tokio::spawn({
        let client = client.clone();
        let count = settings.batch.count;
        let value = settings.batch.value_wei;
        async move {
            for _ in 0..count {
                let request = Request::new(from).to(recipient).value(value).assign_id();
                if let Err(e) = client.schedule(request).await {
                    error!("Failed to schedule transfer: {}", e);
                    break;
                }
            }
            if let Err(e) = client.close() {
                warn!("Request queue already closed: {}", e);
            }
        }
    });

    info!("Scheduling {} transfer(s) from {:?}", settings.batch.count, from);

    // Drain responses until the pipeline closes or a shutdown signal arrives
    let mut sent: Vec<H256> = Vec::new();
    let mut failed = 0usize;
    let interrupted = tokio::select! {
        _ = async {
            while let Some(response) = responses.recv().await {
                match &response.result {
                    Ok(signed) => {
                        info!("Message {} broadcast as {:?}", hex::encode(response.id), signed.hash);
                        sent.push(response.id);
                    }
                    Err(e) => {
                        warn!("Message {} failed: {}", hex::encode(response.id), e);
                        failed += 1;
                    }
                }
            }
        } => false,
        _ = shutdown_signal() => true,
    };

    if interrupted {
        info!("Shutdown signal received, stopping...");
        producer.abort();
    } else {
        if let Err(e) = producer.await {
            warn!("Producer task ended abnormally: {}", e);
        }

        for id in &sent {
            match client.confirm_message(id).await {
                Ok(outcome) if outcome.is_confirmed() => {
                    info!("Message {} confirmed", hex::encode(id));
                }
                Ok(_) => warn!("Message {} not confirmed in time", hex::encode(id)),
                Err(e) => warn!("Message {} could not be tracked: {}", hex::encode(id), e),
            }
        }
    }

    // Dropping the stream unblocks the scheduler if responses are pending
    drop(responses);
    client.shutdown().await?;

    if let Some(h) = metrics_handle {
        h.abort();
    }

    info!(
        "EVM transaction client stopped ({} sent, {} failed)",
        sent.len(),
        failed
    );
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,evm_txclient=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
