use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{self, EnvFilter};

use burrow_feed::metrics::Metrics;
use burrow_feed::models::events::{EventPayload, NormalizedEvent};
use burrow_feed::stream::{FeedHandle, FeedSession, Visibility};
use burrow_feed::utils::load_config;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    println!();
    info!("=========================== INITIALIZING ===========================");

    // Load config
    let config = match load_config("config.yml") {
        Ok(config) => {
            info!("Config loaded successfully");
            config
        }
        Err(e) => {
            error!("Failed to load config: {:#}", e);
            return Err(anyhow!(e));
        }
    };

    // Initialize optional metrics
    let metrics = if config.metrics.enabled {
        let metrics = Arc::new(Metrics::new(config.filter.contract_id.clone())?);
        metrics
            .start_metrics_server(&config.metrics.address, config.metrics.port)
            .await?;
        Some(metrics)
    } else {
        info!("Metrics are disabled");
        None
    };

    info!("Stream endpoint: {}", config.stream.endpoint);

    let (handle, session_task) = FeedSession::spawn(&config, metrics);

    // Shut the session down on Ctrl+C
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        if let Ok(()) = signal::ctrl_c().await {
            info!("Received Ctrl+C signal, initiating shutdown...");
            if let Err(e) = shutdown_handle.shutdown().await {
                error!("Error during shutdown: {}", e);
            }
        }
    });

    tokio::spawn(read_controls(handle.clone()));

    let default_token_id = config.default_token_id.clone();
    let mut timeline = handle.subscribe();
    tokio::spawn(async move {
        while timeline.changed().await.is_ok() {
            let events = timeline.borrow_and_update().clone();
            match events.first() {
                Some(newest) => info!(
                    "Timeline: {} events, newest {} by {}: {}",
                    events.len(),
                    newest.occurred_at.format("%Y-%m-%d %H:%M:%S%.3f"),
                    newest.actor_account_id,
                    describe(newest, &default_token_id)
                ),
                None => info!("Timeline reset"),
            }
        }
    });

    println!();
    info!("========================== STARTING FEED ===========================");
    info!("Type an account id to filter, an empty line to clear, :hidden / :visible / :quit");

    session_task
        .await
        .map_err(|e| anyhow!("feed session task failed: {}", e))?;

    Ok(())
}

// Each stdin line is a control: an account filter, or a `:`-prefixed command
async fn read_controls(handle: FeedHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Failed to read stdin: {}", e);
                break;
            }
        };

        let result = match line.trim() {
            ":hidden" => {
                handle.set_visibility(Visibility::Hidden);
                Ok(())
            }
            ":visible" => {
                handle.set_visibility(Visibility::Visible);
                Ok(())
            }
            ":quit" => handle.shutdown().await,
            "" => handle.set_account_filter(None).await,
            account => handle.set_account_filter(Some(account.to_string())).await,
        };

        if let Err(e) = result {
            warn!("Control input ignored: {}", e);
            break;
        }
    }
}

fn describe(event: &NormalizedEvent, default_token_id: &str) -> String {
    match &event.payload {
        EventPayload::Liquidation {
            liquidation_account_id,
            ..
        } => format!(
            "{} of {}, profit ${:.2}",
            event.kind,
            liquidation_account_id.as_deref().unwrap_or("unknown"),
            event.payload.profit().unwrap_or(0.0)
        ),
        EventPayload::TokenAmount { .. } => format!(
            "{} {} {}",
            event.kind,
            event.amount_or_zero(),
            event.token_id_or(default_token_id)
        ),
    }
}
