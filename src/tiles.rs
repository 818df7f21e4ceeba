use crate::grid::GridSpec;
use crate::metrics::Metrics;
use anyhow::{Context, Result, anyhow};
use bytes::{Bytes, BytesMut};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader, RgbaImage};
use reqwest::StatusCode;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

/// How a source picture is squeezed into a tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TileFit {
    /// Scale to cover the tile, then crop the overflow around the center.
    Cover,
    /// Scale each axis independently to the tile size.
    Stretch,
}

#[derive(Debug, Clone, Copy)]
pub struct TileLimits {
    pub max_pixels: u64,
    pub fit: TileFit,
}

#[derive(Debug, Error)]
pub enum TileFetchError {
    #[error("tile fetch failed from {url}: {status}")]
    UpstreamStatus { status: StatusCode, url: String },
    #[error("tile fetch failed from {url}")]
    Upstream { url: String },
    #[error("tile too large")]
    TooLarge,
}

/// Resolves a picture identifier to its encoded bytes.
pub trait TileSource: Send + Sync + 'static {
    fn fetch(&self, identifier: &str) -> impl Future<Output = Result<Bytes>> + Send;
}

#[derive(Clone)]
pub struct HttpTileSource {
    client: reqwest::Client,
    base_url: String,
    max_bytes: usize,
}

impl HttpTileSource {
    pub fn new(base_url: String, timeout: Duration, max_bytes: usize) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("wall-renderer/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build tile http client")?;
        Ok(Self {
            client,
            base_url,
            max_bytes,
        })
    }

    pub fn url_for(&self, identifier: &str) -> String {
        format!("{}{}", self.base_url, identifier)
    }
}

impl TileSource for HttpTileSource {
    async fn fetch(&self, identifier: &str) -> Result<Bytes> {
        if identifier.is_empty() {
            return Err(anyhow!("item has no picture"));
        }
        let url = self.url_for(identifier);
        let mut response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| anyhow!(err).context(TileFetchError::Upstream { url: url.clone() }))?;
        if response.status() != StatusCode::OK {
            return Err(TileFetchError::UpstreamStatus {
                status: response.status(),
                url,
            }
            .into());
        }
        if let Some(length) = response.content_length() {
            if length > self.max_bytes as u64 {
                return Err(TileFetchError::TooLarge.into());
            }
        }
        let mut buffer = BytesMut::with_capacity(std::cmp::min(self.max_bytes, 64 * 1024));
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|err| anyhow!(err).context(TileFetchError::Upstream { url: url.clone() }))?
        {
            if buffer.len().saturating_add(chunk.len()) > self.max_bytes {
                return Err(TileFetchError::TooLarge.into());
            }
            buffer.extend_from_slice(&chunk);
        }
        debug!(url = %url, size = buffer.len(), "fetched tile");
        Ok(buffer.freeze())
    }
}

#[derive(Debug, Clone)]
pub struct FetchJob {
    pub index: usize,
    pub identifier: String,
    pub target_width: u32,
    pub target_height: u32,
}

pub struct FetchResult {
    pub index: usize,
    pub outcome: Result<RgbaImage>,
}

/// Downloads and resizes up to `grid.cells()` pictures with `workers`
/// concurrent tasks. The map holds only the indices that succeeded; failures
/// are logged and left out.
pub async fn fetch_tiles<S: TileSource>(
    source: Arc<S>,
    identifiers: &[String],
    grid: &GridSpec,
    workers: usize,
    limits: TileLimits,
    metrics: Option<Arc<Metrics>>,
) -> HashMap<usize, RgbaImage> {
    let jobs: Vec<FetchJob> = identifiers
        .iter()
        .take(grid.cells())
        .enumerate()
        .map(|(index, identifier)| FetchJob {
            index,
            identifier: identifier.clone(),
            target_width: grid.tile_width,
            target_height: grid.tile_height,
        })
        .collect();
    let dispatched = jobs.len();
    let mut images = HashMap::with_capacity(dispatched);
    if dispatched == 0 {
        return images;
    }
    let worker_count = workers.max(1);

    let (job_tx, job_rx) = mpsc::channel::<FetchJob>(worker_count);
    let (result_tx, mut result_rx) = mpsc::channel::<FetchResult>(dispatched);
    let job_rx = Arc::new(Mutex::new(job_rx));

    tokio::spawn(async move {
        for job in jobs {
            if job_tx.send(job).await.is_err() {
                break;
            }
        }
    });

    for _ in 0..worker_count {
        let source = source.clone();
        let job_rx = job_rx.clone();
        let result_tx = result_tx.clone();
        tokio::spawn(async move {
            loop {
                let job = {
                    let mut guard = job_rx.lock().await;
                    guard.recv().await
                };
                let Some(job) = job else { break };
                let index = job.index;
                let outcome = run_job(source.as_ref(), job, limits).await;
                if result_tx.send(FetchResult { index, outcome }).await.is_err() {
                    break;
                }
            }
        });
    }
    drop(result_tx);

    let started = Instant::now();
    for _ in 0..dispatched {
        let Some(result) = result_rx.recv().await else {
            warn!("tile workers exited before every job reported");
            break;
        };
        match result.outcome {
            Ok(image) => {
                images.insert(result.index, image);
            }
            Err(err) => {
                warn!(index = result.index, error = ?err, "failed to process tile");
                if let Some(metrics) = metrics.as_ref() {
                    metrics.observe_tile_failure();
                }
            }
        }
    }
    debug!(
        dispatched,
        loaded = images.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "tile fetch summary"
    );
    images
}

async fn run_job<S: TileSource>(source: &S, job: FetchJob, limits: TileLimits) -> Result<RgbaImage> {
    let bytes = source.fetch(&job.identifier).await?;
    let FetchJob {
        target_width,
        target_height,
        ..
    } = job;
    tokio::task::spawn_blocking(move || {
        let image = decode_tile(&bytes, limits.max_pixels)?;
        Ok(fit_tile(image, target_width, target_height, limits.fit))
    })
    .await
    .context("tile resize task")?
}

fn decode_tile(bytes: &[u8], max_pixels: u64) -> Result<DynamicImage> {
    let mut reader = ImageReader::new(std::io::Cursor::new(bytes)).with_guessed_format()?;
    reader.limits(tile_limits(max_pixels));
    let image = reader.decode().context("decode tile")?;
    if image.width() == 0 || image.height() == 0 {
        return Err(anyhow!("tile has invalid dimensions"));
    }
    Ok(image)
}

fn tile_limits(max_pixels: u64) -> image::Limits {
    let max_dim = max_pixels.min(u32::MAX as u64) as u32;
    let mut limits = image::Limits::default();
    limits.max_image_width = Some(max_dim);
    limits.max_image_height = Some(max_dim);
    limits.max_alloc = Some(max_pixels.saturating_mul(4));
    limits
}

pub fn fit_tile(image: DynamicImage, width: u32, height: u32, fit: TileFit) -> RgbaImage {
    let resized = match fit {
        TileFit::Cover => image.resize_to_fill(width, height, FilterType::Lanczos3),
        TileFit::Stretch => image.resize_exact(width, height, FilterType::Lanczos3),
    };
    resized.to_rgba8()
}
