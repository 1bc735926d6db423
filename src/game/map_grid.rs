//! Tile grid produced by the map generator

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::game::constants::map;

/// Map generation / parsing errors. Never surfaced to sessions: the match
/// falls back to [`TileGrid::fallback`].
#[derive(Debug, Error)]
pub enum MapError {
    #[error("malformed map: {0}")]
    Malformed(String),

    #[error("map provider error: {0}")]
    Provider(String),

    #[error("map generation timed out")]
    Timeout,
}

/// Rectangular grid of tile ids, row-major
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TileGrid {
    rows: Vec<Vec<i32>>,
}

impl TileGrid {
    /// Validate and wrap a set of rows
    pub fn from_rows(rows: Vec<Vec<i32>>) -> Result<Self, MapError> {
        let height = rows.len();
        if height == 0 {
            return Err(MapError::Malformed("grid has no rows".into()));
        }
        let width = rows[0].len();
        if width == 0 {
            return Err(MapError::Malformed("grid has empty rows".into()));
        }
        if width > map::MAX_GRID_DIM || height > map::MAX_GRID_DIM {
            return Err(MapError::Malformed(format!(
                "grid {}x{} exceeds {}x{}",
                width,
                height,
                map::MAX_GRID_DIM,
                map::MAX_GRID_DIM
            )));
        }
        if let Some(row) = rows.iter().position(|r| r.len() != width) {
            return Err(MapError::Malformed(format!(
                "row {} has {} tiles, expected {}",
                row,
                rows[row].len(),
                width
            )));
        }
        if let Some(tile) = rows.iter().flatten().find(|t| !(0..=map::MAX_TILE).contains(*t)) {
            return Err(MapError::Malformed(format!("tile id {} out of range", tile)));
        }
        Ok(Self { rows })
    }

    /// Extract the outermost JSON array from free-form text (the generator
    /// tends to wrap its answer in prose) and validate it.
    pub fn parse(text: &str) -> Result<Self, MapError> {
        let start = text
            .find('[')
            .ok_or_else(|| MapError::Malformed("no JSON array found".into()))?;
        let end = text
            .rfind(']')
            .filter(|end| *end > start)
            .ok_or_else(|| MapError::Malformed("unterminated JSON array".into()))?;

        let rows: Vec<Vec<i32>> = serde_json::from_str(&text[start..=end])
            .map_err(|e| MapError::Malformed(e.to_string()))?;
        Self::from_rows(rows)
    }

    /// Fixed default map: rock border, open water, two islands
    pub fn fallback() -> Self {
        let dim = map::FALLBACK_DIM;
        let rows = (0..dim)
            .map(|y| {
                (0..dim)
                    .map(|x| {
                        if x == 0 || y == 0 || x == dim - 1 || y == dim - 1 {
                            1
                        } else if (x, y) == (2, 2) || (x, y) == (dim - 3, dim - 3) {
                            2
                        } else {
                            0
                        }
                    })
                    .collect()
            })
            .collect();
        Self { rows }
    }

    pub fn width(&self) -> usize {
        self.rows.first().map(|r| r.len()).unwrap_or(0)
    }

    pub fn height(&self) -> usize {
        self.rows.len()
    }

    pub fn tile(&self, x: usize, y: usize) -> Option<i32> {
        self.rows.get(y).and_then(|r| r.get(x)).copied()
    }

    pub fn rows(&self) -> &[Vec<i32>] {
        &self.rows
    }
}
