//! cometbus-listen: print events from a cometbus server as JSON lines.
//!
//! Connects through the resilience controller, so it rides out server
//! restarts and network drops. With `--publish` it publishes one event
//! instead and exits.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use cometbus_client::{
    ClientConfig, EventService, HttpEventService, RemoteEventBus, ResilienceController,
};
use cometbus_core::TypeId;

#[derive(Parser)]
#[command(name = "cometbus-listen")]
#[command(author, version, about = "Listen to (or publish on) a cometbus server")]
struct Cli {
    /// Server base URL (default: COMETBUS_URL or http://127.0.0.1:3000)
    #[arg(short, long)]
    url: Option<String>,

    /// Event type to subscribe to (repeatable)
    #[arg(short = 't', long = "type", num_args = 1..)]
    types: Vec<TypeId>,

    /// Delay before every reconnect attempt, in milliseconds
    #[arg(long)]
    retry_delay_ms: Option<u64>,

    /// Publish one event of this type and exit
    #[arg(long, requires = "payload")]
    publish: Option<TypeId>,

    /// JSON payload for --publish
    #[arg(long)]
    payload: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cometbus_client=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = ClientConfig::from_env();
    if let Some(url) = cli.url {
        config = config.with_base_url(url);
    }
    if let Some(ms) = cli.retry_delay_ms {
        config = config.with_retry_delay(Duration::from_millis(ms));
    }

    let service = Arc::new(HttpEventService::new(&config)?);

    if let Some(type_id) = cli.publish {
        let payload: serde_json::Value = match cli.payload.as_deref() {
            Some(raw) => serde_json::from_str(raw)?,
            None => serde_json::Value::Null,
        };
        let sequence = service.publish(&type_id, payload).await?;
        println!("{}", serde_json::json!({ "sequence": sequence }));
        return Ok(());
    }

    if cli.types.is_empty() {
        anyhow::bail!("nothing to listen to: pass at least one --type");
    }

    let bus = Arc::new(RemoteEventBus::new(service, config.fingerprint.clone()));
    for type_id in cli.types {
        bus.add_handler(type_id, |event| match serde_json::to_string(event) {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, sequence = event.sequence, "Failed to encode event"),
        })
        .await?;
    }

    info!(url = %config.base_url, fingerprint = %config.fingerprint, "Connecting");
    let handle = ResilienceController::spawn(Arc::clone(&bus), &config);

    let mut changes = handle.session_changes();
    tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(change) if change.in_session => {
                    info!(is_new = change.is_new, "Connected");
                }
                Ok(change) => match change.cause {
                    Some(cause) => warn!(failure_kind = %cause, "Disconnected, will retry"),
                    None => warn!("Disconnected, will retry"),
                },
                Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    handle.shutdown().await?;
    if bus.session().is_some() {
        if let Err(e) = bus.invalidate_session().await {
            warn!(error = %e, "Failed to end session cleanly");
        }
    }
    Ok(())
}
