mod cache;
mod compose;
mod config;
mod grid;
mod http;
mod metadata;
mod metrics;
mod state;
mod tiles;
mod wall;

use crate::config::Config;
use crate::state::AppState;
use axum::Router;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};
use tracing::info;

fn build_app(state: Arc<AppState>) -> Router {
    http::router(state).layer(
        TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::new().include_headers(false)),
    )
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env()?;
    info!(
        canvas_width = config.canvas_width,
        canvas_height = config.canvas_height,
        output_format = ?config.output_format,
        tile_fit = ?config.tile_fit,
        fetch_workers = config.fetch_workers,
        metadata_url = %config.metadata_url,
        metadata_auth = config.metadata_token.is_some(),
        asset_base_url = %config.asset_base_url,
        "startup config summary"
    );

    let state = Arc::new(AppState::new(config)?);
    info!(
        dir = %state.cache.dir().display(),
        ttl_seconds = state.cache.ttl().as_secs(),
        "wall cache ready"
    );

    let purge_interval = state.config.cache_purge_interval;
    if !purge_interval.is_zero() {
        let cache = state.cache.clone();
        tokio::spawn(async move {
            cache.purge_loop(purge_interval).await;
        });
    }

    let addr = format!("{}:{}", state.config.host, state.config.port);
    let app = build_app(state);
    let listener = TcpListener::bind(&addr).await?;
    info!(address = %addr, "listening");
    axum::serve(listener, app).await?;
    Ok(())
}
