//! Organizer roster.
//!
//! Tails the arrivals channel of one event and prints each admission as it is
//! delivered. The event id comes from the first argument or `CHECKIN_EVENT_ID`.

use checkin::{
    ArrivalRecord, Config, RosterAction, RosterEnvironment, RosterReducer, RosterState,
    RosterStatus, WebSocketChannel,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile_runtime::Store;

fn describe(record: &ArrivalRecord) -> String {
    let name = record
        .fields
        .get("name")
        .cloned()
        .or_else(|| record.user.as_ref().map(|user| user.id.clone()))
        .unwrap_or_else(|| "(anonymous)".to_string());
    format!("{}  {name}", record.arrival_time.format("%H:%M:%S"))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _ = dotenvy::dotenv();
    let mut config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    if let Some(event_id) = std::env::args().nth(1) {
        config.event_id = event_id;
    }
    if config.event_id.is_empty() {
        return Err("pass an event id or set CHECKIN_EVENT_ID".into());
    }

    info!(
        channel_url = %config.channel.url,
        event_id = %config.event_id,
        "Starting roster"
    );

    let env = RosterEnvironment::new(
        Arc::new(WebSocketChannel::new(config.channel.url.clone())),
        config.channel.retry_policy(),
    );
    let store = Store::new(
        RosterState::new(config.event_id.clone()),
        RosterReducer::new(),
        env,
    );

    store.send(RosterAction::Subscribe).await?;

    let mut tick = tokio::time::interval(Duration::from_millis(250));
    let mut printed = 0;
    let mut last_status = RosterStatus::Closed;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = tick.tick() => {
                let (status, fresh) = store
                    .state(|s| (s.status, s.arrivals[printed.min(s.arrivals.len())..].to_vec()))
                    .await;

                if status != last_status {
                    println!("-- {status:?}");
                    last_status = status;
                }
                for record in &fresh {
                    printed += 1;
                    println!("{printed:>4}  {}", describe(record));
                }
            },
        }
    }

    info!(arrivals = printed, "Shutting down roster");
    store.send(RosterAction::StopRoster).await?;
    if let Err(error) = store.shutdown(Duration::from_secs(5)).await {
        warn!(error = %error, "Roster did not shut down cleanly");
    }

    Ok(())
}
