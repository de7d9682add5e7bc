//! Demo server exposing collections-sdk over HTTP.
//!
//! Run from repo root: `cargo run -p example-consumer`

use collections_sdk::{connect, ensure_database_exists, router, AppState, CollectionService, Settings};
use tokio::net::TcpListener;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::load()?;
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("collections_sdk=info")),
        )
        .init();

    ensure_database_exists(&settings.database_url).await?;
    let pool = connect(&settings).await?;
    let service = CollectionService::new(pool, settings.table_names());
    service.ensure_registry().await?;

    let app = router(AppState::new(service));
    let listener = TcpListener::bind(&settings.bind_addr).await?;
    tracing::info!("collections server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;
    Ok(())
}
