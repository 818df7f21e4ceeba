use crate::compose::OutputFormat;
use crate::tiles::TileFit;
use anyhow::{Result, anyhow};
use image::Rgba;
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub cache_dir: PathBuf,
    pub cache_ttl: Duration,
    pub cache_purge_interval: Duration,
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub background: Rgba<u8>,
    pub output_format: OutputFormat,
    pub jpeg_quality: u8,
    pub tile_fit: TileFit,
    pub fetch_workers: usize,
    pub fetch_timeout: Duration,
    pub max_tile_bytes: usize,
    pub max_tile_pixels: u64,
    pub metadata_url: String,
    pub metadata_token: Option<String>,
    pub metadata_timeout: Duration,
    pub asset_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = parse_u16("PORT", 3000);

        let cache_dir =
            PathBuf::from(env::var("CACHE_DIR").unwrap_or_else(|_| "cache".to_string()));
        let cache_ttl = Duration::from_secs(parse_u64("WALL_CACHE_TTL_SECONDS", 86_400));
        if cache_ttl.is_zero() {
            return Err(anyhow!("WALL_CACHE_TTL_SECONDS must be greater than zero"));
        }
        let cache_purge_interval =
            Duration::from_secs(parse_u64("CACHE_PURGE_INTERVAL_SECONDS", 3600));

        let canvas_width = parse_u32("CANVAS_WIDTH", 1024);
        let canvas_height = parse_u32("CANVAS_HEIGHT", 2048);
        if canvas_width == 0 || canvas_height == 0 {
            return Err(anyhow!("CANVAS_WIDTH and CANVAS_HEIGHT must be non-zero"));
        }
        let background = match env::var("BACKGROUND_COLOR") {
            Ok(raw) => parse_color(raw.trim())
                .ok_or_else(|| anyhow!("BACKGROUND_COLOR must be #rrggbb or transparent"))?,
            Err(_) => Rgba([0, 0, 0, 255]),
        };
        let output_format = match env::var("OUTPUT_FORMAT") {
            Ok(raw) => OutputFormat::from_extension(raw.trim())
                .ok_or_else(|| anyhow!("OUTPUT_FORMAT must be jpeg, png or webp"))?,
            Err(_) => OutputFormat::Jpeg,
        };
        let jpeg_quality = parse_u64("JPEG_QUALITY", 90).clamp(1, 100) as u8;
        if output_format == OutputFormat::Jpeg && background.0[3] != 255 {
            warn!("BACKGROUND_COLOR alpha is dropped for jpeg output");
        }
        let tile_fit = parse_tile_fit("TILE_FIT", TileFit::Cover)?;

        let fetch_workers = parse_usize("FETCH_WORKERS", 10).max(1);
        let fetch_timeout = Duration::from_secs(parse_u64("FETCH_TIMEOUT_SECONDS", 30).max(1));
        let max_tile_bytes = parse_usize("MAX_TILE_BYTES", 20 * 1024 * 1024);
        let max_tile_pixels = parse_u64("MAX_TILE_PIXELS", 40_000_000);

        let metadata_url = env::var("METADATA_URL")
            .unwrap_or_else(|_| "https://api.imreally.gay/items/thewall".to_string());
        let metadata_token = env::var("METADATA_TOKEN")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        if metadata_token.is_none() {
            warn!("METADATA_TOKEN is not set; metadata requests are unauthenticated");
        }
        let metadata_timeout =
            Duration::from_secs(parse_u64("METADATA_TIMEOUT_SECONDS", 30).max(1));
        let asset_base_url = env::var("ASSET_BASE_URL")
            .unwrap_or_else(|_| "https://api.imreally.gay/assets/".to_string());

        Ok(Self {
            host,
            port,
            cache_dir,
            cache_ttl,
            cache_purge_interval,
            canvas_width,
            canvas_height,
            background,
            output_format,
            jpeg_quality,
            tile_fit,
            fetch_workers,
            fetch_timeout,
            max_tile_bytes,
            max_tile_pixels,
            metadata_url,
            metadata_token,
            metadata_timeout,
            asset_base_url,
        })
    }
}

fn parse_u16(key: &str, default: u16) -> u16 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_u32(key: &str, default: u32) -> u32 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}

fn parse_tile_fit(key: &str, default: TileFit) -> Result<TileFit> {
    let value = env::var(key)
        .ok()
        .map(|value| value.trim().to_ascii_lowercase());
    match value.as_deref() {
        None => Ok(default),
        Some("cover") | Some("fill") => Ok(TileFit::Cover),
        Some("stretch") | Some("exact") => Ok(TileFit::Stretch),
        Some(_) => Err(anyhow!("invalid {key} value")),
    }
}

pub fn parse_color(value: &str) -> Option<Rgba<u8>> {
    if value.eq_ignore_ascii_case("transparent") {
        return Some(Rgba([0, 0, 0, 0]));
    }
    let value = value.trim_start_matches('#');
    if value.len() == 6 && value.is_ascii() {
        let r = u8::from_str_radix(&value[0..2], 16).ok()?;
        let g = u8::from_str_radix(&value[2..4], 16).ok()?;
        let b = u8::from_str_radix(&value[4..6], 16).ok()?;
        return Some(Rgba([r, g, b, 255]));
    }
    None
}
