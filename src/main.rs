//! event_src - event store bootstrap
//!
//! Connects to PostgreSQL, makes sure the event store schema exists and
//! reports the most recent events.

use event_src::event_store::EventQuery;
use event_src::{db, Config, Event, EventStore, PgEventStore};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "event_src=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    init_tracing();

    let config = Config::from_env()?;

    tracing::info!("Starting event_src ({})", config.environment);
    tracing::info!("Connecting to database...");

    let store = PgEventStore::connect(&config).await?;
    db::verify_connection(store.pool()).await?;
    db::apply_schema(store.pool()).await?;

    if !db::check_schema(store.pool()).await? {
        tracing::error!("Database schema is not complete");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }

    tracing::info!("Database connected successfully");

    let recent = store.recent_events(&EventQuery::recent_first()).await?;
    tracing::info!("{} recent events", recent.len());
    for stored in recent {
        let event = Event::from_stored(stored)?;
        tracing::info!(
            "#{} {} aggregate={:?} actor={:?}",
            event.id().unwrap_or_default(),
            event.event_name(),
            event.aggregate_id(),
            event.actor_id()
        );
    }

    store.pool().close().await;
    tracing::info!("Database connections closed");

    Ok(())
}
