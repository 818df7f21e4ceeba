use crate::cache::WallCache;
use crate::config::Config;
use crate::metadata::MetadataClient;
use crate::metrics::Metrics;
use crate::tiles::HttpTileSource;
use anyhow::Result;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub cache: WallCache,
    pub metadata: MetadataClient,
    pub tiles: Arc<HttpTileSource>,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        let cache = WallCache::new(config.cache_dir.clone(), config.cache_ttl)?;
        let metadata = MetadataClient::new(
            config.metadata_url.clone(),
            config.metadata_token.clone(),
            config.metadata_timeout,
        )?;
        let tiles = Arc::new(HttpTileSource::new(
            config.asset_base_url.clone(),
            config.fetch_timeout,
            config.max_tile_bytes,
        )?);
        Ok(Self {
            config: Arc::new(config),
            cache,
            metadata,
            tiles,
            metrics: Arc::new(Metrics::new()),
        })
    }
}
