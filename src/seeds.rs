//! Seed management for terrain generation
//!
//! Provides a separate seed for each noise channel and for the tree placement
//! RNG, so one aspect of the terrain can be varied while the rest stays fixed.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Seeds for all terrain noise channels.
///
/// Each channel gets its own seed, derived from a master seed by default.
/// Individual seeds can be overridden for experimentation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerrainSeeds {
    /// Master seed (used for display/reference)
    pub master: u64,
    /// Base land shape, the layer that gets gradient damping
    pub land_layer_0: u64,
    /// Detail land layer added on top of layer 0
    pub land_layer_1: u64,
    /// Ridged noise steering river paths
    pub river_direction: u64,
    /// Noise deciding whether a river deepens or rises
    pub river_depth: u64,
    /// Lakes and sea basins
    pub water: u64,
    pub moisture: u64,
    pub temperature: u64,
    /// Vegetation coverage
    pub tree: u64,
    /// RNG for tree counts, species and placement on the game grid
    pub tree_placement: u64,
}

impl TerrainSeeds {
    /// Create seeds from a master seed, deriving all sub-seeds deterministically.
    pub fn from_master(master: u64) -> Self {
        Self {
            master,
            land_layer_0: derive_seed(master, "land_layer_0"),
            land_layer_1: derive_seed(master, "land_layer_1"),
            river_direction: derive_seed(master, "river_direction"),
            river_depth: derive_seed(master, "river_depth"),
            water: derive_seed(master, "water"),
            moisture: derive_seed(master, "moisture"),
            temperature: derive_seed(master, "temperature"),
            tree: derive_seed(master, "tree"),
            tree_placement: derive_seed(master, "tree_placement"),
        }
    }

    /// Create a builder for customizing individual seeds
    pub fn builder(master: u64) -> TerrainSeedsBuilder {
        TerrainSeedsBuilder::new(master)
    }
}

impl Default for TerrainSeeds {
    fn default() -> Self {
        Self::from_master(rand::random())
    }
}

/// Builder for customizing individual seeds while deriving others from master
pub struct TerrainSeedsBuilder {
    seeds: TerrainSeeds,
}

impl TerrainSeedsBuilder {
    pub fn new(master: u64) -> Self {
        Self {
            seeds: TerrainSeeds::from_master(master),
        }
    }

    /// Override both land layer seeds
    pub fn land(mut self, layer_0: u64, layer_1: u64) -> Self {
        self.seeds.land_layer_0 = layer_0;
        self.seeds.land_layer_1 = layer_1;
        self
    }

    pub fn river_direction(mut self, seed: u64) -> Self {
        self.seeds.river_direction = seed;
        self
    }

    pub fn river_depth(mut self, seed: u64) -> Self {
        self.seeds.river_depth = seed;
        self
    }

    pub fn water(mut self, seed: u64) -> Self {
        self.seeds.water = seed;
        self
    }

    /// Override the climate pair (moisture, temperature)
    pub fn climate(mut self, moisture: u64, temperature: u64) -> Self {
        self.seeds.moisture = moisture;
        self.seeds.temperature = temperature;
        self
    }

    pub fn tree(mut self, seed: u64) -> Self {
        self.seeds.tree = seed;
        self
    }

    pub fn tree_placement(mut self, seed: u64) -> Self {
        self.seeds.tree_placement = seed;
        self
    }

    pub fn build(self) -> TerrainSeeds {
        self.seeds
    }
}

/// Derive a sub-seed from a master seed and a channel name.
fn derive_seed(master: u64, channel: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    master.hash(&mut hasher);
    channel.hash(&mut hasher);
    hasher.finish()
}

/// Display format for seeds (useful for sharing terrain configurations)
impl std::fmt::Display for TerrainSeeds {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "TerrainSeeds {{ master: {}, land: {}/{}, river: {}/{}, water: {}, \
             climate: {}/{}, tree: {}, tree_placement: {} }}",
            self.master,
            self.land_layer_0,
            self.land_layer_1,
            self.river_direction,
            self.river_depth,
            self.water,
            self.moisture,
            self.temperature,
            self.tree,
            self.tree_placement,
        )
    }
}
