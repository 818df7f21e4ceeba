use crate::compose::{Encoding, OutputFormat, compose};
use crate::grid::{GridError, compute_grid};
use crate::state::AppState;
use crate::tiles::{TileLimits, fetch_tiles};
use anyhow::{Context, Result};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// Cache key of the composite. The encoding is part of the key so a format
/// change never serves bytes under the wrong content type.
pub fn wall_key(format: OutputFormat) -> String {
    format!("wall.{}", format.extension())
}

#[derive(Debug, Error)]
pub enum WallError {
    #[error("no images found")]
    NoPictures,
    #[error(transparent)]
    Grid(#[from] GridError),
}

/// Builds the encoded wall from scratch: picture list, grid, tiles, canvas.
///
/// Tiles that fail to download or decode leave their cell as background. Any
/// other failure aborts the attempt.
pub async fn generate_wall(state: &AppState) -> Result<Vec<u8>> {
    let started = Instant::now();
    let config = state.config.clone();

    let identifiers = state.metadata.picture_ids().await?;
    if identifiers.is_empty() {
        return Err(WallError::NoPictures.into());
    }
    let grid = compute_grid(config.canvas_width, config.canvas_height, identifiers.len())
        .map_err(WallError::from)?;

    let limits = TileLimits {
        max_pixels: config.max_tile_pixels,
        fit: config.tile_fit,
    };
    let tiles = fetch_tiles(
        state.tiles.clone(),
        &identifiers,
        &grid,
        config.fetch_workers,
        limits,
        Some(state.metrics.clone()),
    )
    .await;
    let placed = tiles.len();
    if placed < identifiers.len() {
        warn!(
            placed,
            requested = identifiers.len(),
            "some tiles are missing from the wall"
        );
    }

    let encoding = Encoding {
        format: config.output_format,
        jpeg_quality: config.jpeg_quality,
    };
    let bytes = tokio::task::spawn_blocking(move || {
        compose(
            config.canvas_width,
            config.canvas_height,
            config.background,
            &grid,
            &tiles,
            encoding,
        )
    })
    .await
    .context("compose task")??;

    let elapsed = started.elapsed();
    state.metrics.observe_generation(elapsed, placed);
    info!(
        pictures = identifiers.len(),
        placed,
        size = bytes.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "wall generated"
    );
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::MetadataError;
    use crate::state::test_support;
    use axum::Router;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use image::Rgba;

    const RED: [u8; 3] = [255, 0, 0];

    async fn asset(Path(id): Path<String>) -> axum::response::Response {
        if id.starts_with("broken") {
            return StatusCode::NOT_FOUND.into_response();
        }
        (
            [("content-type", "image/png")],
            test_support::solid_png(40, 80, RED),
        )
            .into_response()
    }

    fn upstream(items: &'static str) -> Router {
        Router::new()
            .route("/items/thewall", get(move || async move { items }))
            .route("/assets/{id}", get(asset))
    }

    #[test]
    fn wall_key_follows_output_format() {
        assert_eq!(wall_key(OutputFormat::Png), "wall.png");
        assert_ne!(wall_key(OutputFormat::Jpeg), wall_key(OutputFormat::Webp));
    }

    #[tokio::test]
    async fn failed_tiles_leave_background_cells() {
        let base = test_support::serve(upstream(
            r#"{"data":[
                {"picture":"p0"},{"picture":"p1"},{"picture":"broken-2"},
                {"picture":"p3"},{"picture":"p4"},{"picture":"broken-5"}
            ]}"#,
        ))
        .await;
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(test_support::config(&base, dir.path())).unwrap();

        let bytes = generate_wall(&state).await.unwrap();
        let wall = image::load_from_memory(&bytes).unwrap().to_rgba8();
        assert_eq!(wall.dimensions(), (1024, 2048));

        let black = Rgba([0, 0, 0, 255]);
        let red = Rgba([255, 0, 0, 255]);
        // 2x3 grid of 341x682 tiles; sample each cell center.
        let centers = [
            (170, 341),
            (511, 341),
            (170, 1023),
            (511, 1023),
            (170, 1705),
            (511, 1705),
        ];
        let expected = [red, red, black, red, red, black];
        for (index, ((x, y), color)) in centers.iter().zip(expected).enumerate() {
            assert_eq!(*wall.get_pixel(*x, *y), color, "cell {index}");
        }
        assert_eq!(*wall.get_pixel(1000, 100), black);
        assert_eq!(*wall.get_pixel(100, 2047), black);
        assert_eq!(state.metrics.tile_failures(), 2);
    }

    #[tokio::test]
    async fn empty_picture_list_is_no_pictures() {
        let base = test_support::serve(upstream(r#"{"data":[]}"#)).await;
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(test_support::config(&base, dir.path())).unwrap();

        let err = generate_wall(&state).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WallError>(),
            Some(WallError::NoPictures)
        ));
    }

    #[tokio::test]
    async fn blank_picture_keeps_its_cell() {
        let base = test_support::serve(upstream(
            r#"{"data":[{"picture":"p0"},{"picture":""},{"picture":"p2"}]}"#,
        ))
        .await;
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(test_support::config(&base, dir.path())).unwrap();

        let bytes = generate_wall(&state).await.unwrap();
        let wall = image::load_from_memory(&bytes).unwrap().to_rgba8();
        // 2x2 grid of 512x1024 tiles.
        assert_eq!(*wall.get_pixel(256, 512), Rgba([255, 0, 0, 255]));
        assert_eq!(*wall.get_pixel(768, 512), Rgba([0, 0, 0, 255]));
        assert_eq!(*wall.get_pixel(256, 1536), Rgba([255, 0, 0, 255]));
        assert_eq!(state.metrics.tile_failures(), 1);
    }

    #[tokio::test]
    async fn metadata_failure_propagates() {
        let router = Router::new().route(
            "/items/thewall",
            get(|| async { StatusCode::SERVICE_UNAVAILABLE }),
        );
        let base = test_support::serve(router).await;
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::new(test_support::config(&base, dir.path())).unwrap();

        let err = generate_wall(&state).await.unwrap_err();
        assert!(err.downcast_ref::<WallError>().is_none());
        assert!(matches!(
            err.downcast_ref::<MetadataError>(),
            Some(MetadataError::Status { .. })
        ));
    }

    #[tokio::test]
    async fn unplaceable_grid_is_grid_error() {
        let base = test_support::serve(upstream(r#"{"data":[{"picture":"p0"},{"picture":"p1"}]}"#))
            .await;
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_support::config(&base, dir.path());
        config.canvas_width = 1;
        config.canvas_height = 1;
        let state = AppState::new(config).unwrap();

        let err = generate_wall(&state).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WallError>(),
            Some(WallError::Grid(GridError::NoFit { picture_count: 2 }))
        ));
    }
}
