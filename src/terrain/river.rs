//! River routing and carving.
//!
//! Sources are high tiles, mouths are low tiles. Each candidate set is split
//! into connected chunks and every chunk is reduced to its most extreme tile.
//! Sources and mouths are then paired greedily, connected with A* over a
//! noise-driven cost and carved into the heightfield with a smooth bank.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use super::height::{lerp, map_range};
use super::params::{PoolParams, RiverParams};
use super::TerrainPointData;
use crate::coords::AxialCoord;
use crate::grid::GridDataset;
use crate::search::bfs;

/// One routed river, from source to mouth.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RiverLine {
    pub upper_point_index: usize,
    pub lower_point_index: usize,
    /// Mesh indices along the path, source first.
    pub line_point_indices: Vec<usize>,
}

/// The tile of `chunk` with the largest `|z|`; the first tile when every
/// `|z|` is 0.
pub fn chunk_representative(chunk: &[usize], abs_z: impl Fn(usize) -> f64) -> Option<usize> {
    let first = *chunk.first()?;
    let mut best = first;
    let mut best_z = 0.0;
    for &i in chunk {
        let z = abs_z(i);
        if z > best_z {
            best = i;
            best_z = z;
        }
    }
    Some(best)
}

/// Pair sources with mouths, first fit in list order.
///
/// Each round scans sources in order and, for each, mouths in order; the
/// first pair at least `min_length` apart becomes a river and both ends are
/// removed. Stops after `max_rivers` rivers or when a round finds nothing.
pub fn pair_end_points(
    upper: &mut Vec<usize>,
    lower: &mut Vec<usize>,
    max_rivers: usize,
    min_length: i32,
    distance: impl Fn(usize, usize) -> i32,
) -> Vec<RiverLine> {
    let mut lines = Vec::new();
    for _ in 0..max_rivers {
        let found = upper.iter().enumerate().find_map(|(j, &u)| {
            lower
                .iter()
                .position(|&l| distance(u, l) >= min_length)
                .map(|k| (j, k))
        });
        match found {
            Some((j, k)) => {
                lines.push(RiverLine {
                    upper_point_index: upper.remove(j),
                    lower_point_index: lower.remove(k),
                    line_point_indices: Vec::new(),
                });
            }
            None => break,
        }
    }
    lines
}

/// Rotation applied to axial coordinates before sampling river noise, so
/// each river of a run sees a differently oriented noise field.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NoiseRotation {
    sin: f64,
    cos: f64,
}

impl Default for NoiseRotation {
    fn default() -> Self {
        Self { sin: 0.0, cos: 1.0 }
    }
}

impl NoiseRotation {
    /// Rotation by `2π / total · index`.
    pub fn new(total: usize, index: usize) -> Self {
        if total == 0 {
            return Self::default();
        }
        let angle = 2.0 * std::f64::consts::PI / total as f64 * index as f64;
        Self {
            sin: angle.sin(),
            cos: angle.cos(),
        }
    }

    pub fn apply(&self, coord: AxialCoord) -> (f64, f64) {
        let (x, y) = (coord.x as f64, coord.y as f64);
        (x * self.cos - y * self.sin, x * self.sin + y * self.cos)
    }
}

/// Edge cost of stepping onto a tile, never negative.
///
/// The noise part follows ridges of the direction noise; the altitude part
/// prefers tiles close to blocked ground and makes water tiles cheap.
pub fn direction_cost(
    direction_noise: f64,
    ratio: f64,
    block_level: i32,
    block_level_max: i32,
    water_base_ratio: f64,
    params: &RiverParams,
) -> f64 {
    let noise_cost = params.direction_mapping.map(direction_noise) * params.direction_noise_cost_scale;
    let altitude = if ratio < water_base_ratio {
        -1.0
    } else if block_level_max > 0 {
        (block_level_max - block_level) as f64 / block_level_max as f64
    } else {
        0.0
    };
    (noise_cost + altitude * params.direction_altitude_cost_scale).max(0.0)
}

/// Ease in-out of degree five on [0, 1].
pub fn ease_in_out_quint(x: f64) -> f64 {
    if x < 0.5 {
        16.0 * x.powi(5)
    } else {
        1.0 - (-2.0 * x + 2.0).powi(5) / 2.0
    }
}

/// Bank depth at `distance` tiles from a bed of depth `depth`, or `None`
/// once the bank has risen back to the surface.
pub fn bank_depth(unit: f64, distance: i32, depth: f64) -> Option<f64> {
    let diff = unit - distance as f64 - 1.0;
    if diff <= 0.0 || unit <= 0.0 {
        return None;
    }
    Some(ease_in_out_quint(diff / unit) * depth)
}

/// Depth of the next bed tile.
///
/// While shallower than `min` the bed keeps sinking; afterwards the depth
/// noise decides whether it rises (towards `min`) or sinks (towards `max`).
pub fn next_depth_ratio(current: f64, depth_noise: f64, min: f64, max: f64, step: f64) -> f64 {
    if current > min {
        current - step
    } else if depth_noise > 0.0 {
        (current + step).min(min)
    } else {
        (current - step).max(max)
    }
}

/// Terrain ratio after blending a pool of depth `pool` into ratio `z`.
pub fn combine_pool(z: f64, pool: f64, params: &PoolParams) -> f64 {
    let alpha = if z > params.combine_ratio {
        map_range(z, params.combine_upper, params.combine_ratio, 1.0, 0.0)
    } else {
        map_range(z, params.combine_ratio, params.combine_lower, 0.0, 1.0)
    };
    lerp(pool, z, alpha)
}

/// Mutates terrain heights along river lines.
pub struct Carver<'a> {
    pub ds: &'a GridDataset,
    /// Only grid indices below this are part of the terrain mesh.
    pub mesh_len: usize,
    pub altitude_block_ratio: f64,
    pub depth_change_step: f64,
    pub tile_altitude_max: f64,
}

impl<'a> Carver<'a> {
    /// Radius 1 neighbors that belong to the mesh.
    pub fn mesh_neighbors(&self, index: usize) -> Vec<usize> {
        self.ds
            .neighbor_indices(index, 0)
            .into_iter()
            .filter(|&n| n < self.mesh_len)
            .collect()
    }

    /// Shallowest depth allowed at `index` so the bed does not cut through
    /// blocked ground next to it. Records the floor on the point.
    pub fn block_floor(
        &self,
        points: &mut [TerrainPointData],
        tested: &mut HashSet<usize>,
        index: usize,
    ) -> f64 {
        let mut floor = -1.0;
        for n in self.mesh_neighbors(index) {
            let neighbor = &points[n];
            if neighbor.position_z_ratio > self.altitude_block_ratio {
                floor = 0.0;
                tested.insert(index);
                break;
            } else if tested.contains(&n) && neighbor.river_block_z_ratio > floor {
                tested.insert(index);
                floor = neighbor.river_block_z_ratio;
            }
        }
        floor = (floor - self.depth_change_step).min(0.0);
        points[index].river_block_z_ratio = floor;
        floor
    }

    /// Lower a point to `ratio`; never raises it.
    pub fn lower_point(&self, points: &mut [TerrainPointData], index: usize, ratio: f64) {
        let p = &mut points[index];
        if p.position_z_ratio > ratio {
            p.position_z_ratio = ratio;
            p.position_z = ratio * self.tile_altitude_max;
        }
    }

    /// Carve the bed at `center` and its banks.
    ///
    /// Returns the depth actually used, or `None` when `center` is blocked
    /// and was left alone.
    pub fn dig_line_point(
        &self,
        points: &mut [TerrainPointData],
        tested: &mut HashSet<usize>,
        center: usize,
        depth: f64,
        rising_step: f64,
    ) -> Option<f64> {
        if points[center].position_z_ratio > self.altitude_block_ratio {
            return None;
        }
        let depth = depth.max(self.block_floor(points, tested, center));
        self.lower_point(points, center, depth);

        let unit = depth.abs() / rising_step;
        bfs(center, |current, reached| {
            let bank = match bank_depth(unit, self.ds.distance(center, current), depth) {
                Some(b) => b,
                None => return Vec::new(),
            };
            let mut next = Vec::new();
            for n in self.mesh_neighbors(current) {
                if points[n].position_z_ratio > self.altitude_block_ratio {
                    reached.insert(n);
                } else {
                    let floor = self.block_floor(points, tested, n);
                    self.lower_point(points, n, bank.max(floor));
                    next.push(n);
                }
            }
            next
        });
        Some(depth)
    }

    /// Deepen the pool layer around `center`. Pools ignore blocking; they are
    /// blended into the terrain afterwards.
    pub fn dig_pool_point(&self, points: &mut [TerrainPointData], center: usize, depth: f64, rising_step: f64) {
        lower_pool(&mut points[center], depth);
        let unit = depth.abs() / rising_step;
        bfs(center, |current, _reached| {
            let bank = match bank_depth(unit, self.ds.distance(center, current), depth) {
                Some(b) => b,
                None => return Vec::new(),
            };
            let next = self.mesh_neighbors(current);
            for &n in &next {
                lower_pool(&mut points[n], bank);
            }
            next
        });
    }
}

fn lower_pool(point: &mut TerrainPointData, ratio: f64) {
    if point.river_pool_z_ratio > ratio {
        point.river_pool_z_ratio = ratio;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::test_support::build_dataset;
    use crate::topology::TopologyKind;

    #[test]
    fn test_representative_picks_largest_abs_z() {
        let z: [f64; 4] = [0.1, -0.5, 0.3, 0.0];
        assert_eq!(chunk_representative(&[0, 1, 2], |i| z[i].abs()), Some(1));
        assert_eq!(chunk_representative(&[3], |i| z[i].abs()), Some(3));
        assert_eq!(chunk_representative(&[], |i| z[i].abs()), None);
    }

    #[test]
    fn test_pairing_respects_min_length_and_order() {
        let pos: [i32; 5] = [0, 10, 50, 200, 5];
        let dist = |a: usize, b: usize| (pos[a] - pos[b]).abs();
        let mut upper = vec![0, 1];
        let mut lower = vec![4, 2, 3];
        let lines = pair_end_points(&mut upper, &mut lower, 5, 40, dist);
        // 0 pairs with 2 (first mouth >= 40 away), then 1 with 3.
        assert_eq!(lines.len(), 2);
        assert_eq!((lines[0].upper_point_index, lines[0].lower_point_index), (0, 2));
        assert_eq!((lines[1].upper_point_index, lines[1].lower_point_index), (1, 3));
        for l in &lines {
            assert!(dist(l.upper_point_index, l.lower_point_index) >= 40);
        }
        assert!(upper.is_empty());
        assert_eq!(lower, vec![4]);
    }

    #[test]
    fn test_pairing_stops_when_nothing_fits() {
        let mut upper = vec![0];
        let mut lower = vec![1];
        let lines = pair_end_points(&mut upper, &mut lower, 3, 10, |_, _| 2);
        assert!(lines.is_empty());
        assert_eq!(upper, vec![0]);
    }

    #[test]
    fn test_rotation() {
        let r = NoiseRotation::new(4, 1);
        let (x, y) = r.apply(AxialCoord::new(1, 0));
        assert!(x.abs() < 1e-12 && (y - 1.0).abs() < 1e-12);
        assert_eq!(NoiseRotation::new(1, 0).apply(AxialCoord::new(3, -2)), (3.0, -2.0));
    }

    #[test]
    fn test_direction_cost() {
        let p = RiverParams::default();
        // Water tiles with low noise cost nothing.
        assert_eq!(direction_cost(0.0, -0.5, 4, 4, -0.025, &p), 0.0);
        // Open land far from blocks costs the full altitude scale.
        assert!((direction_cost(0.0, 0.0, 0, 4, -0.025, &p) - 10.0).abs() < 1e-12);
        // Noise ridges add up to the noise scale.
        assert!((direction_cost(1.0, 0.0, 4, 4, -0.025, &p) - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_ease_and_bank() {
        assert_eq!(ease_in_out_quint(0.0), 0.0);
        assert!((ease_in_out_quint(1.0) - 1.0).abs() < 1e-12);
        assert!((ease_in_out_quint(0.5) - 0.5).abs() < 1e-12);
        assert!(bank_depth(3.0, 2, -0.1).is_none());
        let b = bank_depth(10.0, 0, -0.1).unwrap();
        assert!(b < 0.0 && b > -0.1);
    }

    #[test]
    fn test_next_depth_ratio() {
        assert!((next_depth_ratio(-0.005, 1.0, -0.06, -0.07, 0.005) + 0.01).abs() < 1e-12);
        assert!((next_depth_ratio(-0.065, 1.0, -0.06, -0.07, 0.005) + 0.06).abs() < 1e-12);
        assert!((next_depth_ratio(-0.068, -1.0, -0.06, -0.07, 0.005) + 0.07).abs() < 1e-12);
    }

    #[test]
    fn test_combine_pool() {
        let p = PoolParams::default();
        assert!((combine_pool(0.01, -0.08, &p) + 0.08).abs() < 1e-12);
        assert!((combine_pool(0.05, -0.08, &p) - 0.05).abs() < 1e-12);
        assert!((combine_pool(-0.06, -0.08, &p) + 0.06).abs() < 1e-12);
    }

    fn flat_points(n: usize, ratio: f64) -> Vec<TerrainPointData> {
        (0..n)
            .map(|i| TerrainPointData {
                grid_index: i,
                position_z_ratio: ratio,
                position_z: ratio * 100.0,
                ..TerrainPointData::default()
            })
            .collect()
    }

    #[test]
    fn test_dig_line_point_lowers_bed_and_banks() {
        let ds = build_dataset(TopologyKind::Quad, 6, 1, 10.0);
        let carver = Carver {
            ds: &ds,
            mesh_len: ds.len(),
            altitude_block_ratio: 0.005,
            depth_change_step: 0.005,
            tile_altitude_max: 100.0,
        };
        let mut points = flat_points(ds.len(), 0.0);
        let mut tested = HashSet::new();
        let center = ds.index_of(AxialCoord::new(0, 0)).unwrap();
        let used = carver.dig_line_point(&mut points, &mut tested, center, -0.03, 0.003).unwrap();
        assert!((used + 0.03).abs() < 1e-12);
        assert!((points[center].position_z_ratio + 0.03).abs() < 1e-12);
        let near = ds.neighbor_indices(center, 0)[0];
        assert!(points[near].position_z_ratio < 0.0);
        assert!(points[near].position_z_ratio > -0.03);
        assert!(points.iter().all(|p| p.position_z_ratio <= 0.0));
    }

    #[test]
    fn test_blocked_bed_is_skipped() {
        let ds = build_dataset(TopologyKind::Quad, 3, 1, 10.0);
        let carver = Carver {
            ds: &ds,
            mesh_len: ds.len(),
            altitude_block_ratio: 0.005,
            depth_change_step: 0.005,
            tile_altitude_max: 100.0,
        };
        let mut points = flat_points(ds.len(), 0.2);
        let before = points.clone();
        let mut tested = HashSet::new();
        assert!(carver.dig_line_point(&mut points, &mut tested, 0, -0.03, 0.003).is_none());
        assert_eq!(points, before);
    }

    #[test]
    fn test_bed_next_to_blocked_ground_stays_shallow() {
        let ds = build_dataset(TopologyKind::Quad, 3, 1, 10.0);
        let carver = Carver {
            ds: &ds,
            mesh_len: ds.len(),
            altitude_block_ratio: 0.005,
            depth_change_step: 0.005,
            tile_altitude_max: 100.0,
        };
        let mut points = flat_points(ds.len(), 0.0);
        let center = ds.index_of(AxialCoord::new(0, 0)).unwrap();
        let wall = ds.neighbor_indices(center, 0)[0];
        points[wall].position_z_ratio = 0.5;
        let mut tested = HashSet::new();
        let used = carver.dig_line_point(&mut points, &mut tested, center, -0.05, 0.003).unwrap();
        assert!((used + 0.005).abs() < 1e-12, "{}", used);
        assert_eq!(points[wall].position_z_ratio, 0.5);
    }

    #[test]
    fn test_dig_pool_point() {
        let ds = build_dataset(TopologyKind::Quad, 4, 1, 10.0);
        let carver = Carver {
            ds: &ds,
            mesh_len: ds.len(),
            altitude_block_ratio: 0.005,
            depth_change_step: 0.005,
            tile_altitude_max: 100.0,
        };
        let mut points = flat_points(ds.len(), 0.0);
        carver.dig_pool_point(&mut points, 0, -0.08, 0.003);
        assert!((points[0].river_pool_z_ratio + 0.08).abs() < 1e-12);
        assert!(points.iter().all(|p| p.position_z_ratio == 0.0));
    }
}
