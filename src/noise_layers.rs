//! Noise channels sampled by the terrain generator.
//!
//! Eight independent channels, each a fractal sum of Perlin octaves:
//! two land layers, river direction and depth, water, moisture, temperature
//! and tree coverage. Every channel returns values roughly in [-1, 1].

use noise::{NoiseFn, Perlin, Seedable};
use serde::{Deserialize, Serialize};

use crate::seeds::TerrainSeeds;

/// How octaves are combined.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FractalKind {
    /// Fractional Brownian motion
    #[default]
    Fbm,
    /// Ridged multifractal; sharp crests where the base noise crosses zero
    Ridged,
}

impl FractalKind {
    pub fn all() -> &'static [Self] {
        &[Self::Fbm, Self::Ridged]
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Fbm => "Smooth layered noise",
            Self::Ridged => "Layered noise with ridges along zero crossings",
        }
    }
}

impl std::fmt::Display for FractalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fbm => write!(f, "fbm"),
            Self::Ridged => write!(f, "ridged"),
        }
    }
}

/// Shape of one noise channel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseSettings {
    pub fractal: FractalKind,
    pub octaves: u32,
    pub frequency: f64,
    pub lacunarity: f64,
    /// Amplitude falloff per octave
    pub gain: f64,
    /// Output multiplier; 0 gives a constant 0 channel
    pub amplitude: f64,
}

impl Default for NoiseSettings {
    fn default() -> Self {
        Self::fbm(3, 0.01)
    }
}

impl NoiseSettings {
    pub fn fbm(octaves: u32, frequency: f64) -> Self {
        Self {
            fractal: FractalKind::Fbm,
            octaves,
            frequency,
            lacunarity: 2.0,
            gain: 0.5,
            amplitude: 1.0,
        }
    }

    pub fn ridged(octaves: u32, frequency: f64) -> Self {
        Self {
            fractal: FractalKind::Ridged,
            ..Self::fbm(octaves, frequency)
        }
    }

    /// Same shape, constant 0 output.
    pub fn silent(self) -> Self {
        Self { amplitude: 0.0, ..self }
    }
}

/// Settings for every channel.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseLayers {
    pub land_layer_0: NoiseSettings,
    pub land_layer_1: NoiseSettings,
    pub river_direction: NoiseSettings,
    pub river_depth: NoiseSettings,
    pub water: NoiseSettings,
    pub moisture: NoiseSettings,
    pub temperature: NoiseSettings,
    pub tree: NoiseSettings,
}

impl Default for NoiseLayers {
    fn default() -> Self {
        Self {
            land_layer_0: NoiseSettings::fbm(5, 0.02),
            land_layer_1: NoiseSettings::fbm(4, 0.02),
            river_direction: NoiseSettings::ridged(6, 0.02),
            river_depth: NoiseSettings::fbm(2, 0.02),
            water: NoiseSettings::fbm(2, 0.01),
            moisture: NoiseSettings::fbm(3, 0.007),
            temperature: NoiseSettings::fbm(3, 0.007),
            tree: NoiseSettings::fbm(6, 0.01),
        }
    }
}

impl NoiseLayers {
    /// All channels constant 0; yields a flat, dry, treeless terrain.
    pub fn flat() -> Self {
        let d = Self::default();
        Self {
            land_layer_0: d.land_layer_0.silent(),
            land_layer_1: d.land_layer_1.silent(),
            river_direction: d.river_direction.silent(),
            river_depth: d.river_depth.silent(),
            water: d.water.silent(),
            moisture: d.moisture.silent(),
            temperature: d.temperature.silent(),
            tree: d.tree.silent(),
        }
    }
}

/// One seeded channel.
#[derive(Clone, Debug)]
pub struct NoiseChannel {
    settings: NoiseSettings,
    perlin: Perlin,
}

impl NoiseChannel {
    pub fn new(seed: u64, settings: NoiseSettings) -> Self {
        Self {
            settings,
            perlin: Perlin::new(1).set_seed(seed as u32),
        }
    }

    pub fn settings(&self) -> &NoiseSettings {
        &self.settings
    }

    /// Sample at `(x, y)`; the channel frequency is applied here.
    pub fn get(&self, x: f64, y: f64) -> f64 {
        let s = &self.settings;
        if s.amplitude == 0.0 || s.octaves == 0 {
            return 0.0;
        }
        let (x, y) = (x * s.frequency, y * s.frequency);
        let value = match s.fractal {
            FractalKind::Fbm => fbm(&self.perlin, x, y, s.octaves, s.gain, s.lacunarity),
            FractalKind::Ridged => ridged(&self.perlin, x, y, s.octaves, s.gain, s.lacunarity),
        };
        value * s.amplitude
    }
}

fn fbm(noise: &Perlin, x: f64, y: f64, octaves: u32, persistence: f64, lacunarity: f64) -> f64 {
    let mut total = 0.0;
    let mut amplitude = 1.0;
    let mut frequency = 1.0;
    let mut max_value = 0.0;

    for _ in 0..octaves {
        total += amplitude * noise.get([x * frequency, y * frequency]);
        max_value += amplitude;
        amplitude *= persistence;
        frequency *= lacunarity;
    }

    total / max_value
}

/// Ridged sum rescaled from [0, 1] to [-1, 1].
fn ridged(noise: &Perlin, x: f64, y: f64, octaves: u32, persistence: f64, lacunarity: f64) -> f64 {
    let mut total = 0.0;
    let mut amplitude = 1.0;
    let mut frequency = 1.0;
    let mut max_value = 0.0;

    for _ in 0..octaves {
        let signal = 1.0 - noise.get([x * frequency, y * frequency]).abs();
        total += amplitude * signal * signal;
        max_value += amplitude;
        amplitude *= persistence;
        frequency *= lacunarity;
    }

    (total / max_value) * 2.0 - 1.0
}

/// The full set of seeded channels.
#[derive(Clone, Debug)]
pub struct TerrainNoise {
    pub land_layer_0: NoiseChannel,
    pub land_layer_1: NoiseChannel,
    pub river_direction: NoiseChannel,
    pub river_depth: NoiseChannel,
    pub water: NoiseChannel,
    pub moisture: NoiseChannel,
    pub temperature: NoiseChannel,
    pub tree: NoiseChannel,
}

impl TerrainNoise {
    pub fn new(seeds: &TerrainSeeds, layers: &NoiseLayers) -> Self {
        Self {
            land_layer_0: NoiseChannel::new(seeds.land_layer_0, layers.land_layer_0),
            land_layer_1: NoiseChannel::new(seeds.land_layer_1, layers.land_layer_1),
            river_direction: NoiseChannel::new(seeds.river_direction, layers.river_direction),
            river_depth: NoiseChannel::new(seeds.river_depth, layers.river_depth),
            water: NoiseChannel::new(seeds.water, layers.water),
            moisture: NoiseChannel::new(seeds.moisture, layers.moisture),
            temperature: NoiseChannel::new(seeds.temperature, layers.temperature),
            tree: NoiseChannel::new(seeds.tree, layers.tree),
        }
    }
}
