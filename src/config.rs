//! Run configuration loaded from JSON.
//!
//! Every section falls back to its defaults, so a config file only needs the
//! values it changes.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{GridError, Result};
use crate::game_grid::GameGridParams;
use crate::grid::creator::CreatorConfig;
use crate::grid::loader::LoaderConfig;
use crate::noise_layers::NoiseLayers;
use crate::seeds::TerrainSeeds;
use crate::terrain::params::TerrainParams;
use crate::workflow::LoopSettings;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Master seed for every noise channel and the tree RNG
    pub seed: u64,
    pub loop_settings: LoopSettings,
    pub terrain_grid: CreatorConfig,
    pub game_grid: CreatorConfig,
    pub noise: NoiseLayers,
    pub terrain: TerrainParams,
    pub game: GameGridParams,
    /// Where previews and the summary go
    pub output_dir: PathBuf,
    /// World units per preview pixel
    pub pixel_size: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            loop_settings: LoopSettings::default(),
            terrain_grid: CreatorConfig::terrain_grid(),
            game_grid: CreatorConfig::game_grid(),
            noise: NoiseLayers::default(),
            terrain: TerrainParams::default(),
            game: GameGridParams::default(),
            output_dir: PathBuf::from("output"),
            pixel_size: 500.0,
        }
    }
}

impl GeneratorConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| GridError::io(path, e))?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn seeds(&self) -> TerrainSeeds {
        TerrainSeeds::from_master(self.seed)
    }

    /// Loader settings that read back what `grid` writes.
    pub fn loader_config(grid: &CreatorConfig) -> LoaderConfig {
        LoaderConfig {
            dir: grid.dir.clone(),
            topology: grid.topology,
            expect_tile_size: grid.record_tile_size,
            default_tile_size: grid.tile_size,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.loop_settings.count_limit == 0 {
            return Err(GridError::Config("loop count limit must be positive".into()));
        }
        if self.pixel_size.is_nan() || self.pixel_size <= 0.0 {
            return Err(GridError::Config(format!("pixel size {} must be positive", self.pixel_size)));
        }
        for (name, grid) in [("terrain", &self.terrain_grid), ("game", &self.game_grid)] {
            if grid.grid_range < 0 || grid.neighbor_range < 1 {
                return Err(GridError::Config(format!(
                    "{} grid needs a non-negative range and at least one neighbor ring, got {} and {}",
                    name, grid.grid_range, grid.neighbor_range
                )));
            }
            if grid.tile_size.is_nan() || grid.tile_size <= 0.0 {
                return Err(GridError::Config(format!("{} grid tile size must be positive", name)));
            }
        }
        self.terrain.validate()?;
        self.game.validate()
    }
}
