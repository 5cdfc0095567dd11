use std::sync::Arc;

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use eventdesk_server::config::{Config, StoreBackend};
use eventdesk_server::routes::create_routes;
use eventdesk_server::services::notify::HttpNotifier;
use eventdesk_server::services::proofs::LocalProofStore;
use eventdesk_server::state::AppState;
use eventdesk_server::store::{MemoryStore, PgStore, Store};
use eventdesk_server::utils::clock::SystemClock;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

async fn open_store(config: &Config) -> Result<Arc<dyn Store>, BoxError> {
    match config.store_backend {
        StoreBackend::Memory => {
            tracing::warn!("Using in-memory store; data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let pool = PgPoolOptions::new()
                .max_connections(config.max_connections)
                .connect(&config.database_url)
                .await?;
            tracing::info!("Successfully connected to database");

            sqlx::migrate!().run(&pool).await?;
            tracing::info!("Migrations run successfully");

            Ok(Arc::new(PgStore::new(pool)))
        }
    }
}

async fn run() -> Result<(), BoxError> {
    let config = Config::from_env();

    let store = open_store(&config).await?;
    let notifier = HttpNotifier::new(config.webhook_timeout, config.email_relay_url.clone())?;
    let state = AppState::new(
        store,
        Arc::new(SystemClock),
        Arc::new(notifier),
        Arc::new(LocalProofStore::new(&config.upload_dir)),
    );

    let app: Router = create_routes(state);

    let listener = TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("🚀 Server running at http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        tracing::error!("Server failed: {}", e);
        std::process::exit(1);
    }
}
