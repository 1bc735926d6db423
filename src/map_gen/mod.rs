//! Map generation from session prompts
//!
//! The match asks a [`MapProvider`] for a tile grid once both prompt rounds
//! are over. Generation is bounded by a timeout; any failure or timeout
//! falls back to [`TileGrid::fallback`] so the match always proceeds.

#[cfg(feature = "map_gen")]
pub mod client;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{info, warn};

pub use crate::game::map_grid::{MapError, TileGrid};

pub type MapFuture<'a> = Pin<Box<dyn Future<Output = Result<TileGrid, MapError>> + Send + 'a>>;

/// Turns collected prompts into a tile grid
pub trait MapProvider: Send + Sync {
    fn generate<'a>(&'a self, prompts: &'a [String]) -> MapFuture<'a>;

    fn name(&self) -> &'static str;
}

/// Always returns the same grid
pub struct FixedMapProvider {
    grid: TileGrid,
}

impl FixedMapProvider {
    pub fn new(grid: TileGrid) -> Self {
        Self { grid }
    }
}

impl Default for FixedMapProvider {
    fn default() -> Self {
        Self::new(TileGrid::fallback())
    }
}

impl MapProvider for FixedMapProvider {
    fn generate<'a>(&'a self, _prompts: &'a [String]) -> MapFuture<'a> {
        let grid = self.grid.clone();
        Box::pin(async move { Ok(grid) })
    }

    fn name(&self) -> &'static str {
        "fixed"
    }
}

/// Run the provider with a deadline. Never fails: errors and timeouts are
/// logged and replaced by the fallback grid.
pub async fn generate_with_fallback(provider: &dyn MapProvider, prompts: &[String], timeout: Duration) -> TileGrid {
    let result = match tokio::time::timeout(timeout, provider.generate(prompts)).await {
        Ok(result) => result,
        Err(_) => Err(MapError::Timeout),
    };

    match result {
        Ok(grid) => {
            info!(
                "Map generated by {} provider ({}x{}, {} prompts)",
                provider.name(),
                grid.width(),
                grid.height(),
                prompts.len()
            );
            grid
        }
        Err(e) => {
            warn!("Map generation via {} failed: {}. Using fallback map", provider.name(), e);
            TileGrid::fallback()
        }
    }
}

/// Provider selected from the environment: the Claude-backed generator when
/// the `map_gen` feature is on and an API key is set, the fixed grid otherwise.
pub fn provider_from_env() -> Box<dyn MapProvider> {
    #[cfg(feature = "map_gen")]
    {
        if let Some(provider) = client::ClaudeMapProvider::from_env() {
            return Box::new(provider);
        }
        info!("ANTHROPIC_API_KEY not set, using fixed map provider");
    }
    Box::new(FixedMapProvider::default())
}
