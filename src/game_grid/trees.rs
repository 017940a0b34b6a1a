//! Tree placement on game tiles.
//!
//! A tile that the terrain marks as wooded gets a random number of trees
//! scaled by its terrain type's density. Each tree picks a look from the
//! type's sample table, a spot inside the tile and a rotation.

use std::collections::BTreeMap;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::coords::Vec2;
use crate::terrain::classify::TerrainType;

/// One placed tree.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TreeRecord {
    pub sample_index: usize,
    pub z_scale: f64,
    pub xy_scale: f64,
    pub location: [f64; 3],
    /// Rotation about the vertical axis, radians.
    pub angle_rot_z: f64,
}

/// A tree look and how often it shows up.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeSample {
    /// Share of all trees of the type (0.0-1.0)
    pub prop_of_all: f64,
    pub z_scale_lower: f64,
    pub z_scale_upper: f64,
    pub xy_scale_lower: f64,
    pub xy_scale_upper: f64,
}

impl Default for TreeSample {
    fn default() -> Self {
        Self {
            prop_of_all: 1.0,
            z_scale_lower: 1.0,
            z_scale_upper: 1.0,
            xy_scale_lower: 1.0,
            xy_scale_upper: 1.0,
        }
    }
}

impl TreeSample {
    const fn new(prop_of_all: f64, z: (f64, f64), xy: (f64, f64)) -> Self {
        Self {
            prop_of_all,
            z_scale_lower: z.0,
            z_scale_upper: z.1,
            xy_scale_lower: xy.0,
            xy_scale_upper: xy.1,
        }
    }
}

/// Sample tables per terrain type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeParams {
    /// How much a tile near a terrain type border loses of its trees (0.0-1.0)
    pub edge_influence: f64,
    pub samples: BTreeMap<TerrainType, Vec<TreeSample>>,
}

impl Default for TreeParams {
    fn default() -> Self {
        let broadleaf = vec![
            TreeSample::new(0.6, (0.8, 1.2), (0.8, 1.1)),
            TreeSample::new(0.4, (1.0, 1.5), (0.9, 1.3)),
        ];
        let conifer = vec![TreeSample::new(1.0, (0.9, 1.4), (0.7, 1.0))];
        let shrub = vec![TreeSample::new(1.0, (0.5, 0.8), (0.8, 1.2))];
        let samples = [
            (TerrainType::Grass, broadleaf.clone()),
            (TerrainType::Coast, broadleaf.clone()),
            (TerrainType::Swamp, broadleaf),
            (TerrainType::DryGrass, shrub),
            (TerrainType::Tundra, conifer.clone()),
            (TerrainType::Snow, conifer),
        ]
        .into_iter()
        .collect();
        Self {
            edge_influence: 0.0,
            samples,
        }
    }
}

/// Number of trees for a tile.
///
/// `roll` is uniform in [0, 1). A tile right at a border (`edge_ratio` near 0)
/// keeps `1 - edge_influence` of the density.
pub fn tree_count(roll: f64, density: f64, edge_ratio: f64, edge_influence: f64) -> usize {
    let edge = 1.0 - (1.0 - edge_ratio) * edge_influence;
    (roll * density * edge).round().max(0.0) as usize
}

/// Sample picked by cumulative share; the last sample absorbs any rest.
pub fn pick_sample(samples: &[TreeSample], roll: f64) -> Option<usize> {
    let mut rest = roll;
    for (i, s) in samples.iter().enumerate() {
        if rest < s.prop_of_all {
            return Some(i);
        }
        rest -= s.prop_of_all;
    }
    samples.len().checked_sub(1)
}

/// Uniform point in a disc of `radius` around the origin.
pub fn point_in_disc(rng: &mut impl Rng, radius: f64) -> Vec2 {
    let r = radius * rng.gen::<f64>().sqrt();
    let angle = rng.gen_range(0.0..std::f64::consts::TAU);
    Vec2::new(r * angle.cos(), r * angle.sin())
}

fn scale_in(rng: &mut impl Rng, lower: f64, upper: f64) -> f64 {
    if upper > lower {
        rng.gen_range(lower..=upper)
    } else {
        lower
    }
}

/// Place `count` trees around `center`. Types without samples get plain
/// unit-scale trees.
pub fn place_trees(
    rng: &mut impl Rng,
    samples: &[TreeSample],
    count: usize,
    center: Vec2,
    z: f64,
    radius: f64,
) -> Vec<TreeRecord> {
    (0..count)
        .map(|_| {
            let offset = point_in_disc(rng, radius);
            let (sample_index, z_scale, xy_scale) = match pick_sample(samples, rng.gen()) {
                Some(i) => {
                    let s = &samples[i];
                    (
                        i,
                        scale_in(rng, s.z_scale_lower, s.z_scale_upper),
                        scale_in(rng, s.xy_scale_lower, s.xy_scale_upper),
                    )
                }
                None => (0, 1.0, 1.0),
            };
            TreeRecord {
                sample_index,
                z_scale,
                xy_scale,
                location: [center.x + offset.x, center.y + offset.y, z],
                angle_rot_z: rng.gen_range(0.0..std::f64::consts::TAU),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_tree_count() {
        assert_eq!(tree_count(0.5, 6.0, 1.0, 0.0), 3);
        assert_eq!(tree_count(0.99, 6.0, 1.0, 0.0), 6);
        assert_eq!(tree_count(0.0, 6.0, 1.0, 0.0), 0);
        // Full edge influence on a border tile leaves nothing.
        assert_eq!(tree_count(0.99, 6.0, 0.0, 1.0), 0);
        assert_eq!(tree_count(0.99, 6.0, 0.5, 1.0), 3);
    }

    #[test]
    fn test_pick_sample_cumulative() {
        let samples = [
            TreeSample::new(0.6, (1.0, 1.0), (1.0, 1.0)),
            TreeSample::new(0.4, (1.0, 1.0), (1.0, 1.0)),
        ];
        assert_eq!(pick_sample(&samples, 0.0), Some(0));
        assert_eq!(pick_sample(&samples, 0.59), Some(0));
        assert_eq!(pick_sample(&samples, 0.61), Some(1));
        assert_eq!(pick_sample(&samples, 5.0), Some(1));
        assert_eq!(pick_sample(&[], 0.3), None);
    }

    #[test]
    fn test_placed_trees_stay_in_tile() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let params = TreeParams::default();
        let samples = &params.samples[&TerrainType::Grass];
        let center = Vec2::new(1000.0, -500.0);
        let trees = place_trees(&mut rng, samples, 50, center, 12.0, 400.0);
        assert_eq!(trees.len(), 50);
        for t in &trees {
            let (dx, dy) = (t.location[0] - center.x, t.location[1] - center.y);
            assert!((dx * dx + dy * dy).sqrt() <= 400.0 + 1e-9);
            assert_eq!(t.location[2], 12.0);
            let s = &samples[t.sample_index];
            assert!(t.z_scale >= s.z_scale_lower && t.z_scale <= s.z_scale_upper);
            assert!((0.0..std::f64::consts::TAU).contains(&t.angle_rot_z));
        }
    }

    #[test]
    fn test_same_seed_same_trees() {
        let samples = TreeParams::default().samples[&TerrainType::Tundra].clone();
        let a = place_trees(&mut ChaCha8Rng::seed_from_u64(7), &samples, 5, Vec2::new(0.0, 0.0), 0.0, 10.0);
        let b = place_trees(&mut ChaCha8Rng::seed_from_u64(7), &samples, 5, Vec2::new(0.0, 0.0), 0.0, 10.0);
        assert_eq!(a, b);
    }

    #[test]
    fn test_unsampled_type_gets_plain_trees() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let trees = place_trees(&mut rng, &[], 2, Vec2::new(0.0, 0.0), 0.0, 10.0);
        assert_eq!(trees.len(), 2);
        assert!(trees.iter().all(|t| t.sample_index == 0 && t.z_scale == 1.0));
    }
}
