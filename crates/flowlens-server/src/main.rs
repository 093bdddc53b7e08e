use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flowlens_server::config::ServerConfig;
use flowlens_server::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "flowlens_server=info,flowlens_ledger=info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    let addr = config.addr;
    tracing::info!(
        max_depth = config.ledger.max_depth,
        dedup_kinds = ?config.ledger.dedup_kinds,
        runtime_url = ?config.runtime_url,
        "configuration loaded"
    );
    let app = flowlens_server::app_router(AppState::new(config));

    tracing::info!("FlowLens server listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
