use anyhow::Context;
use event_publisher::{DomainEvent, ListenerFactory, RouteOutcome};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let factory = Arc::new(ListenerFactory::from_env().context("failed to set up audit publisher")?);
    factory.init();
    factory.post_init();
    let listener = factory.create_listener();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let (mut published, mut skipped) = (0u64, 0u64);
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read events from stdin")? else {
                    info!("Input closed");
                    break;
                };
                if line.trim().is_empty() {
                    continue;
                }
                let event: DomainEvent = match serde_json::from_str(&line) {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(?err, "Skipping malformed event line");
                        skipped += 1;
                        continue;
                    }
                };
                match listener.handle(event) {
                    RouteOutcome::Published(_) => published += 1,
                    RouteOutcome::Filtered | RouteOutcome::Dropped => skipped += 1,
                }
            }
            _ = &mut ctrl_c => {
                info!("Received Ctrl-C");
                break;
            }
        }
    }
    listener.close();

    let closing = factory.clone();
    tokio::task::spawn_blocking(move || closing.shutdown())
        .await
        .context("shutdown task panicked")?;

    info!(published, skipped, "Audit event publisher stopped");
    match factory.slot().metrics().render() {
        Ok(exposition) => debug!(metrics = %exposition, "Final publisher metrics"),
        Err(err) => warn!(?err, "Failed to render publisher metrics"),
    }
    Ok(())
}
