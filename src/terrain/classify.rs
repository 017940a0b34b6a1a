//! Terrain type classification and the climate channels behind it.
//!
//! Moisture, temperature and tree coverage are sampled from noise at the
//! tile's axial coordinate; moisture additionally rises over low ground.
//! Tiles are first split by altitude (mountain, shallow and deep water) and
//! the remaining plains are looked up in a 3x3 temperature/moisture table.

use serde::{Deserialize, Serialize};

use super::height::noise_std;
use super::params::{ClimateParams, LandLayerParams, WaterParams};
use crate::noise_layers::TerrainNoise;

/// Surface kind of a tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerrainType {
    DeepWater,
    ShallowWater,
    Lava,
    DryGrass,
    Swamp,
    Desert,
    Grass,
    Coast,
    Gobi,
    Tundra,
    Snow,
    Mountain,
}

impl TerrainType {
    pub fn all() -> &'static [Self] {
        &[
            Self::DeepWater,
            Self::ShallowWater,
            Self::Lava,
            Self::DryGrass,
            Self::Swamp,
            Self::Desert,
            Self::Grass,
            Self::Coast,
            Self::Gobi,
            Self::Tundra,
            Self::Snow,
            Self::Mountain,
        ]
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::DeepWater => "Water below the shallow line",
            Self::ShallowWater => "Water between the surface and the shallow line",
            Self::Lava => "Hot and dry",
            Self::DryGrass => "Hot, moderate moisture",
            Self::Swamp => "Hot and wet",
            Self::Desert => "Temperate and dry",
            Self::Grass => "Temperate, moderate moisture",
            Self::Coast => "Temperate and wet",
            Self::Gobi => "Cold and dry",
            Self::Tundra => "Cold, moderate moisture",
            Self::Snow => "Cold and wet",
            Self::Mountain => "Above the mountain line",
        }
    }

    pub fn is_water(&self) -> bool {
        matches!(self, Self::DeepWater | Self::ShallowWater)
    }

    /// Plain types come from the climate table.
    pub fn is_plain(&self) -> bool {
        !self.is_water() && *self != Self::Mountain
    }

    /// Preview color for raster exports.
    pub fn color(&self) -> [u8; 3] {
        match self {
            Self::DeepWater => [20, 50, 120],
            Self::ShallowWater => [60, 110, 180],
            Self::Lava => [170, 60, 30],
            Self::DryGrass => [180, 170, 90],
            Self::Swamp => [70, 100, 70],
            Self::Desert => [230, 210, 150],
            Self::Grass => [90, 160, 70],
            Self::Coast => [200, 200, 160],
            Self::Gobi => [160, 140, 110],
            Self::Tundra => [140, 150, 130],
            Self::Snow => [240, 240, 250],
            Self::Mountain => [120, 110, 100],
        }
    }
}

impl std::fmt::Display for TerrainType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::DeepWater => "deep water",
            Self::ShallowWater => "shallow water",
            Self::Lava => "lava",
            Self::DryGrass => "dry grass",
            Self::Swamp => "swamp",
            Self::Desert => "desert",
            Self::Grass => "grass",
            Self::Coast => "coast",
            Self::Gobi => "gobi",
            Self::Tundra => "tundra",
            Self::Snow => "snow",
            Self::Mountain => "mountain",
        };
        write!(f, "{}", s)
    }
}

/// -1 at or below `lower`, 1 above `upper`, 0 in between.
pub fn scalar_step(value: f64, lower: f64, upper: f64) -> i32 {
    if value <= lower {
        -1
    } else if value > upper {
        1
    } else {
        0
    }
}

/// Plain type for a moisture/temperature pair.
pub fn plain_type(moisture: f64, temperature: f64, climate: &ClimateParams) -> TerrainType {
    let m = scalar_step(moisture, climate.moisture_threshold_low, climate.moisture_threshold_high);
    let t = scalar_step(
        temperature,
        climate.temperature_threshold_low,
        climate.temperature_threshold_high,
    );
    match (t, m) {
        (-1, -1) => TerrainType::Gobi,
        (-1, 0) => TerrainType::Tundra,
        (-1, _) => TerrainType::Snow,
        (0, -1) => TerrainType::Desert,
        (0, 0) => TerrainType::Grass,
        (0, _) => TerrainType::Coast,
        (_, -1) => TerrainType::Lava,
        (_, 0) => TerrainType::DryGrass,
        _ => TerrainType::Swamp,
    }
}

/// Terrain type from a tile's height ratio and climate.
pub fn classify(
    ratio: f64,
    moisture: f64,
    temperature: f64,
    climate: &ClimateParams,
    water: &WaterParams,
) -> TerrainType {
    if ratio > climate.mountain_ratio {
        TerrainType::Mountain
    } else if ratio < water.base_ratio && ratio > water.shallow_ratio {
        TerrainType::ShallowWater
    } else if ratio <= water.shallow_ratio {
        TerrainType::DeepWater
    } else {
        plain_type(moisture, temperature, climate)
    }
}

/// Samples the climate channels for one terrain.
pub struct ClimateSampler<'a> {
    pub noise: &'a TerrainNoise,
    pub climate: &'a ClimateParams,
    pub water: &'a WaterParams,
    pub land_layer_0: &'a LandLayerParams,
}

impl<'a> ClimateSampler<'a> {
    /// Moisture in [0, 1] for the tile at `(x, y)` whose height ratio is `ratio`.
    pub fn moisture(&self, x: f64, y: f64, ratio: f64) -> f64 {
        let c = self.climate;
        let moisture = noise_std(
            self.noise
                .moisture
                .get(x * c.moisture_sample_scale, y * c.moisture_sample_scale),
            c.moisture_value_scale,
        );
        let water = (self
            .noise
            .water
            .get(x * self.water.sample_scale, y * self.water.sample_scale)
            * c.moisture_value_scale)
            .clamp(-1.0, 1.0);
        let low_ground = (ratio * c.moisture_z_ratio_scale).clamp(-1.0, 0.0);

        let offset = 1.0 - ((water + low_ground).clamp(-1.0, 1.0) + 1.0) * 0.5;
        ((moisture + offset) * 0.5).clamp(0.0, 1.0)
    }

    /// Temperature in [0, 1]; high land layer 0 noise cools the tile.
    pub fn temperature(&self, x: f64, y: f64) -> f64 {
        let c = self.climate;
        let temperature = noise_std(
            self.noise
                .temperature
                .get(x * c.temperature_sample_scale, y * c.temperature_sample_scale),
            c.temperature_value_scale,
        );
        let s = self.land_layer_0.sample_scale;
        let layer0 = self.noise.land_layer_0.get(x * s, y * s).clamp(0.0, 1.0);
        (temperature * (1.0 - layer0)).clamp(0.0, 1.0)
    }

    /// Tree coverage in [0, 1].
    pub fn tree(&self, x: f64, y: f64) -> f64 {
        let c = self.climate;
        noise_std(
            self.noise.tree.get(x * c.tree_sample_scale, y * c.tree_sample_scale),
            c.tree_value_scale,
        )
    }

    pub fn has_tree(&self, x: f64, y: f64) -> bool {
        (1.0 - self.tree(x, y)) < self.climate.tree_range
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::noise_layers::NoiseLayers;
    use crate::seeds::TerrainSeeds;

    #[test]
    fn test_scalar_step_edges() {
        assert_eq!(scalar_step(0.35, 0.35, 0.65), -1);
        assert_eq!(scalar_step(0.36, 0.35, 0.65), 0);
        assert_eq!(scalar_step(0.65, 0.35, 0.65), 0);
        assert_eq!(scalar_step(0.66, 0.35, 0.65), 1);
    }

    #[test]
    fn test_plain_table() {
        let c = ClimateParams::default();
        assert_eq!(plain_type(0.1, 0.1, &c), TerrainType::Gobi);
        assert_eq!(plain_type(0.5, 0.1, &c), TerrainType::Tundra);
        assert_eq!(plain_type(0.9, 0.1, &c), TerrainType::Snow);
        assert_eq!(plain_type(0.1, 0.5, &c), TerrainType::Desert);
        assert_eq!(plain_type(0.5, 0.5, &c), TerrainType::Grass);
        assert_eq!(plain_type(0.9, 0.5, &c), TerrainType::Coast);
        assert_eq!(plain_type(0.1, 0.9, &c), TerrainType::Lava);
        assert_eq!(plain_type(0.5, 0.9, &c), TerrainType::DryGrass);
        assert_eq!(plain_type(0.9, 0.9, &c), TerrainType::Swamp);
    }

    #[test]
    fn test_classify_by_altitude() {
        let c = ClimateParams::default();
        let w = WaterParams::default();
        assert_eq!(classify(0.2, 0.5, 0.5, &c, &w), TerrainType::Mountain);
        assert_eq!(classify(-0.05, 0.5, 0.5, &c, &w), TerrainType::ShallowWater);
        assert_eq!(classify(-0.07, 0.5, 0.5, &c, &w), TerrainType::DeepWater);
        assert_eq!(classify(0.0, 0.5, 0.5, &c, &w), TerrainType::Grass);
    }

    #[test]
    fn test_flat_climate_is_grass() {
        let noise = TerrainNoise::new(&TerrainSeeds::from_master(3), &NoiseLayers::flat());
        let c = ClimateParams::default();
        let w = WaterParams::default();
        let l0 = LandLayerParams::default();
        let s = ClimateSampler {
            noise: &noise,
            climate: &c,
            water: &w,
            land_layer_0: &l0,
        };
        assert_eq!(s.moisture(3.0, 4.0, 0.0), 0.5);
        assert_eq!(s.temperature(3.0, 4.0), 0.5);
        assert_eq!(s.tree(3.0, 4.0), 0.5);
        assert!(!s.has_tree(3.0, 4.0));
        // Low ground is wetter.
        assert!(s.moisture(3.0, 4.0, -0.2) > 0.5);
    }

    #[test]
    fn test_climate_in_unit_range() {
        let noise = TerrainNoise::new(&TerrainSeeds::from_master(11), &NoiseLayers::default());
        let c = ClimateParams::default();
        let w = WaterParams::default();
        let l0 = LandLayerParams::default();
        let s = ClimateSampler {
            noise: &noise,
            climate: &c,
            water: &w,
            land_layer_0: &l0,
        };
        for i in -20..20 {
            let (x, y) = (i as f64 * 7.0, i as f64 * -3.0);
            assert!((0.0..=1.0).contains(&s.moisture(x, y, 0.1)));
            assert!((0.0..=1.0).contains(&s.temperature(x, y)));
            assert!((0.0..=1.0).contains(&s.tree(x, y)));
        }
    }
}
