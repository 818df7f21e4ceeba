use thiserror::Error;
use tracing::info;

/// Cell layout for one wall: `columns * rows` tiles, each `tile_width` wide and
/// twice as tall.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridSpec {
    pub columns: u32,
    pub rows: u32,
    pub tile_width: u32,
    pub tile_height: u32,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GridError {
    #[error("grid needs at least one picture")]
    NoPictures,
    #[error("no grid arrangement fits {picture_count} pictures on the canvas")]
    NoFit { picture_count: usize },
}

impl GridSpec {
    pub fn cells(&self) -> usize {
        (self.columns as usize).saturating_mul(self.rows as usize)
    }

    /// Top-left pixel of cell `index`, row-major from the top-left corner.
    pub fn cell_origin(&self, index: usize) -> (u32, u32) {
        let columns = self.columns.max(1) as usize;
        let col = (index % columns) as u32;
        let row = (index / columns) as u32;
        (col * self.tile_width, row * self.tile_height)
    }

    pub fn covered_area(&self) -> u64 {
        tile_area(self.columns, self.rows, self.tile_width, self.tile_height)
    }

    pub fn utilization(&self, canvas_width: u32, canvas_height: u32) -> f64 {
        let canvas_area = canvas_width as u64 * canvas_height as u64;
        if canvas_area == 0 {
            return 0.0;
        }
        self.covered_area() as f64 / canvas_area as f64
    }
}

/// Picks the column count that covers the most canvas area with 2:1 tiles.
///
/// Every column count from 1 to `picture_count` is tried. Integer division is
/// used throughout so tiles never land on sub-pixel boundaries. Ties keep the
/// smallest column count.
pub fn compute_grid(
    canvas_width: u32,
    canvas_height: u32,
    picture_count: usize,
) -> Result<GridSpec, GridError> {
    if picture_count == 0 {
        return Err(GridError::NoPictures);
    }
    let mut best: Option<GridSpec> = None;
    let mut best_area = 0u64;
    for columns in 1..=picture_count {
        let Some(candidate) = fit_candidate(canvas_width, canvas_height, picture_count, columns)
        else {
            continue;
        };
        let area = candidate.covered_area();
        if area > best_area {
            best_area = area;
            best = Some(candidate);
        }
    }
    let grid = best.ok_or(GridError::NoFit { picture_count })?;
    info!(
        columns = grid.columns,
        rows = grid.rows,
        tile_width = grid.tile_width,
        tile_height = grid.tile_height,
        utilization = grid.utilization(canvas_width, canvas_height),
        "selected wall grid"
    );
    Ok(grid)
}

fn fit_candidate(
    canvas_width: u32,
    canvas_height: u32,
    picture_count: usize,
    columns: usize,
) -> Option<GridSpec> {
    let rows = picture_count.div_ceil(columns);
    let columns = u32::try_from(columns).ok()?;
    let rows = u32::try_from(rows).ok()?;
    let width_bound = canvas_width / columns;
    let height_bound = canvas_height / rows;
    let (tile_width, tile_height) = if height_bound as u64 > 2 * width_bound as u64 {
        let tile_height = width_bound.checked_mul(2)?;
        if tile_height as u64 * rows as u64 > canvas_height as u64 {
            return None;
        }
        (width_bound, tile_height)
    } else {
        // Odd row heights round down so tiles stay exactly 2:1.
        let tile_width = height_bound / 2;
        if tile_width as u64 * columns as u64 > canvas_width as u64 {
            return None;
        }
        (tile_width, tile_width * 2)
    };
    if tile_width == 0 {
        return None;
    }
    Some(GridSpec {
        columns,
        rows,
        tile_width,
        tile_height,
    })
}

fn tile_area(columns: u32, rows: u32, tile_width: u32, tile_height: u32) -> u64 {
    (tile_width as u64 * columns as u64).saturating_mul(tile_height as u64 * rows as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_pictures_on_portrait_canvas() {
        let grid = compute_grid(1024, 2048, 6).unwrap();
        assert_eq!(
            grid,
            GridSpec {
                columns: 2,
                rows: 3,
                tile_width: 341,
                tile_height: 682,
            }
        );
    }

    #[test]
    fn single_picture_is_height_limited() {
        let grid = compute_grid(1024, 2048, 1).unwrap();
        assert_eq!(grid.columns, 1);
        assert_eq!(grid.rows, 1);
        assert_eq!(grid.tile_width, 1024);
        assert_eq!(grid.tile_height, 2048);
        assert!((grid.utilization(1024, 2048) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_pictures_rejected() {
        assert_eq!(compute_grid(1024, 2048, 0), Err(GridError::NoPictures));
    }

    #[test]
    fn tiny_canvas_has_no_fit() {
        assert_eq!(
            compute_grid(1, 1, 3),
            Err(GridError::NoFit { picture_count: 3 })
        );
        assert_eq!(
            compute_grid(0, 2048, 2),
            Err(GridError::NoFit { picture_count: 2 })
        );
    }

    #[test]
    fn grid_respects_bounds_and_aspect() {
        let canvases = [(1024, 2048), (1920, 1080), (300, 300), (7, 900), (4096, 64)];
        for (width, height) in canvases {
            for count in 1..=60 {
                match compute_grid(width, height, count) {
                    Ok(grid) => {
                        assert_eq!(grid.tile_height, grid.tile_width * 2);
                        assert!(grid.columns * grid.tile_width <= width);
                        assert!(grid.rows * grid.tile_height <= height);
                        assert!(grid.cells() >= count);
                        assert!(grid.tile_width > 0);
                    }
                    Err(err) => assert_eq!(err, GridError::NoFit { picture_count: count }),
                }
            }
        }
    }

    #[test]
    fn odd_row_height_rounds_down_to_even_tile() {
        // 2048 / 5 rows = 409, which is not an even tile height.
        let grid = compute_grid(1024, 2048, 17).unwrap();
        assert_eq!(grid.columns, 4);
        assert_eq!(grid.rows, 5);
        assert_eq!(grid.tile_width, 204);
        assert_eq!(grid.tile_height, 408);
        for count in 1..=60 {
            let grid = compute_grid(1024, 2048, count).unwrap();
            assert_eq!(grid.tile_height, grid.tile_width * 2, "count {count}");
        }
    }

    #[test]
    fn chosen_grid_beats_every_candidate() {
        for count in 1..=40 {
            let Ok(best) = compute_grid(1024, 2048, count) else {
                continue;
            };
            for columns in 1..=count {
                if let Some(candidate) = fit_candidate(1024, 2048, count, columns) {
                    assert!(best.covered_area() >= candidate.covered_area());
                }
            }
        }
    }

    #[test]
    fn ties_keep_fewest_columns() {
        // 1x2 and 2x1 both produce 5x10 tiles here.
        let other = fit_candidate(10, 20, 2, 2).unwrap();
        let grid = compute_grid(10, 20, 2).unwrap();
        assert_eq!(grid.covered_area(), other.covered_area());
        assert_eq!(grid.columns, 1);
        assert_eq!(grid.rows, 2);
    }

    #[test]
    fn cell_origin_is_row_major() {
        let grid = GridSpec {
            columns: 2,
            rows: 3,
            tile_width: 341,
            tile_height: 682,
        };
        assert_eq!(grid.cell_origin(0), (0, 0));
        assert_eq!(grid.cell_origin(1), (341, 0));
        assert_eq!(grid.cell_origin(2), (0, 682));
        assert_eq!(grid.cell_origin(5), (341, 1364));
    }
}
