//! Terrain generation parameters and configuration

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::classify::TerrainType;
use super::height::HeightMapping;

/// One noise-driven land layer.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LandLayerParams {
    /// Shifts the noise band, see [`HeightMapping::by_level`] (0.0-1.0)
    pub level: f64,
    /// Multiplier on the axial coordinate before sampling
    pub sample_scale: f64,
    pub mapping: HeightMapping,
}

impl Default for LandLayerParams {
    fn default() -> Self {
        Self {
            level: 0.5,
            sample_scale: 1.0,
            mapping: HeightMapping::new(0.35, 1.0, 0.0, 0.8, -0.2, 0.0),
        }
    }
}

impl LandLayerParams {
    /// Detail layer: same band, lower ceiling.
    pub fn detail() -> Self {
        Self {
            mapping: HeightMapping::new(0.35, 1.0, 0.0, 0.2, -0.2, 0.0),
            ..Self::default()
        }
    }
}

/// Lakes and sea basins carved from the water noise.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterParams {
    pub enabled: bool,
    pub level: f64,
    pub sample_scale: f64,
    pub mapping: HeightMapping,
    /// How quickly shores turn from cubic to linear, see `water_bank`
    pub bank_sharpness: f64,
    /// Surface ratio; tiles below are under water
    pub base_ratio: f64,
    /// Tiles at or below this ratio are deep water
    pub shallow_ratio: f64,
}

impl Default for WaterParams {
    fn default() -> Self {
        Self {
            enabled: false,
            level: 0.5,
            sample_scale: 0.5,
            mapping: HeightMapping::new(-0.6, -0.4, -0.4, 0.0, 0.2, 0.2),
            bank_sharpness: 50.0,
            base_ratio: -0.025,
            shallow_ratio: -0.07,
        }
    }
}

/// River routing and carving.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiverParams {
    pub enabled: bool,
    pub max_rivers: usize,
    /// Sources are tiles at or above this ratio
    pub upper_limit_ratio: f64,
    /// Mouths are tiles at or below this ratio
    pub lower_limit_ratio: f64,
    /// Minimum source-to-mouth topology distance
    pub min_length: i32,

    // =========================================================================
    // Path cost
    // =========================================================================
    pub direction_sample_scale: f64,
    pub direction_noise_cost_scale: f64,
    pub direction_altitude_cost_scale: f64,
    pub direction_mapping: HeightMapping,
    pub heuristic_ratio: f64,

    // =========================================================================
    // Carving
    // =========================================================================
    pub depth_ratio_start: f64,
    /// Deepest ratio the bed may reach
    pub depth_ratio_max: f64,
    /// Shallowest ratio once the bed settled
    pub depth_ratio_min: f64,
    pub depth_change_step: f64,
    /// Ratio gained per tile away from the bed; sets the bank width
    pub depth_rising_step: f64,
    pub depth_sample_scale: f64,
}

impl Default for RiverParams {
    fn default() -> Self {
        Self {
            enabled: false,
            max_rivers: 1,
            upper_limit_ratio: 0.3,
            lower_limit_ratio: -0.1,
            min_length: 100,
            direction_sample_scale: 1.0,
            direction_noise_cost_scale: 50.0,
            direction_altitude_cost_scale: 10.0,
            direction_mapping: HeightMapping::new(0.05, 1.0, 0.0, 1.0, 0.0, 0.0),
            heuristic_ratio: 1.0,
            depth_ratio_start: -0.005,
            depth_ratio_max: -0.07,
            depth_ratio_min: -0.06,
            depth_change_step: 0.005,
            depth_rising_step: 0.003,
            depth_sample_scale: 1.0,
        }
    }
}

/// Pools dug along river lines and blended into the terrain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolParams {
    pub enabled: bool,
    pub depth_ratio_max: f64,
    pub depth_ratio_min: f64,
    pub depth_rising_step: f64,
    /// Terrain ratio where the pool fully replaces the terrain
    pub combine_ratio: f64,
    /// Above this ratio the terrain is kept
    pub combine_upper: f64,
    /// Below this ratio the terrain is kept; digging stops here too
    pub combine_lower: f64,
}

impl Default for PoolParams {
    fn default() -> Self {
        Self {
            enabled: false,
            depth_ratio_max: -0.1,
            depth_ratio_min: -0.08,
            depth_rising_step: 0.003,
            combine_ratio: 0.01,
            combine_upper: 0.04,
            combine_lower: -0.06,
        }
    }
}

/// Moisture, temperature and vegetation sampling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimateParams {
    pub moisture_sample_scale: f64,
    pub moisture_value_scale: f64,
    /// How strongly low ground raises moisture
    pub moisture_z_ratio_scale: f64,
    pub temperature_sample_scale: f64,
    pub temperature_value_scale: f64,
    pub moisture_threshold_low: f64,
    pub moisture_threshold_high: f64,
    pub temperature_threshold_low: f64,
    pub temperature_threshold_high: f64,
    /// Tiles above this ratio are mountains
    pub mountain_ratio: f64,
    /// A tile carries trees when `1 - tree < tree_range`
    pub tree_range: f64,
    pub tree_sample_scale: f64,
    pub tree_value_scale: f64,
    /// Trees per game tile for each terrain type; absent types get none
    pub tree_density: BTreeMap<TerrainType, f64>,
}

impl Default for ClimateParams {
    fn default() -> Self {
        let tree_density = [
            (TerrainType::Grass, 6.0),
            (TerrainType::DryGrass, 3.0),
            (TerrainType::Swamp, 4.0),
            (TerrainType::Coast, 2.0),
            (TerrainType::Tundra, 2.0),
            (TerrainType::Snow, 1.0),
        ]
        .into_iter()
        .collect();
        Self {
            moisture_sample_scale: 0.5,
            moisture_value_scale: 3.0,
            moisture_z_ratio_scale: 2.0,
            temperature_sample_scale: 0.5,
            temperature_value_scale: 3.0,
            moisture_threshold_low: 0.35,
            moisture_threshold_high: 0.65,
            temperature_threshold_low: 0.35,
            temperature_threshold_high: 0.65,
            mountain_ratio: 0.001,
            tree_range: 0.3,
            tree_sample_scale: 0.5,
            tree_value_scale: 2.0,
            tree_density,
        }
    }
}

/// Everything the terrain generator is tuned by.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainParams {
    /// Rings of the loaded grid used for the mesh; clamped to the grid
    pub grid_range: i32,
    /// World height of ratio 1.0
    pub tile_altitude_max: f64,
    /// Damping strength of the layer 0 gradient
    pub gradient_k: f64,
    /// Tiles above this ratio block movement
    pub altitude_block_ratio: f64,
    /// Extra block level passes after the base pass
    pub block_ex_times: usize,
    pub land_layer_0: LandLayerParams,
    pub land_layer_1: LandLayerParams,
    pub water: WaterParams,
    pub river: RiverParams,
    pub pool: PoolParams,
    pub climate: ClimateParams,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            grid_range: 249,
            tile_altitude_max: 20000.0,
            gradient_k: 0.2,
            altitude_block_ratio: 0.005,
            block_ex_times: 0,
            land_layer_0: LandLayerParams::default(),
            land_layer_1: LandLayerParams::detail(),
            water: WaterParams::default(),
            river: RiverParams::default(),
            pool: PoolParams::default(),
            climate: ClimateParams::default(),
        }
    }
}

impl TerrainParams {
    /// World height of the water surface.
    pub fn water_base(&self) -> f64 {
        self.water.base_ratio * self.tile_altitude_max
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::GridError;

        if self.grid_range < 0 {
            return Err(GridError::Config(format!("terrain grid range {} is negative", self.grid_range)));
        }
        if self.tile_altitude_max <= 0.0 {
            return Err(GridError::Config(format!(
                "tile altitude max {} must be positive",
                self.tile_altitude_max
            )));
        }
        if self.river.depth_rising_step <= 0.0 || self.pool.depth_rising_step <= 0.0 {
            return Err(GridError::Config("river rising steps must be positive".to_string()));
        }
        Ok(())
    }
}
