use std::sync::Arc;

use agora_config::AppConfig;
use agora_database::{initialize_database, DatabaseConnection};
use agora_relay::{Coordinator, CoordinatorHandle, RelayState, RelayStore, SqliteStore};
use anyhow::{Context, Result};
use sqlx::SqlitePool;
use tracing::info;

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::TRACE)
            .with_env_filter(env_filter)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Everything the server needs, wired once at startup.
#[derive(Clone)]
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub store: Arc<SqliteStore>,
    pub coordinator: CoordinatorHandle,
    pub relay: RelayState,
}

impl BackendServices {
    /// Open and migrate the database, then start the relay coordinator.
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = initialize_database(&config.database)
            .await
            .context("failed to initialise database")?;

        DatabaseConnection::from_pool(db_pool.clone())
            .ping()
            .await
            .context("database is not reachable")?;

        let store = Arc::new(SqliteStore::new(db_pool.clone()));
        let (coordinator, _task) =
            Coordinator::spawn(store.clone() as Arc<dyn RelayStore>, &config.relay);

        let relay = RelayState::new(
            coordinator.clone(),
            store.clone(),
            &config.auth,
            config.relay.clone(),
        );

        info!(
            database = %config.database.url,
            outbound_queue_capacity = config.relay.outbound_queue_capacity,
            keepalive_seconds = config.relay.keepalive_interval_seconds,
            "relay services ready"
        );

        Ok(Self {
            db_pool,
            store,
            coordinator,
            relay,
        })
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
