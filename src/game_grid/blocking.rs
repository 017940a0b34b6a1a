//! Area, building and flying block levels of the game grid, and the
//! connectivity and island checks built on them.
//!
//! Levels themselves come from [`crate::terrain::block`]; this module only
//! decides which tiles block for each kind and how reachable the open
//! ground is.

use std::collections::HashSet;
use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::grid::GridDataset;
use crate::search::{bfs_early_exit, BfsState};
use crate::terrain::block::ExCredit;

use super::GameGridPointData;

/// Tiles below this level are walls for connectivity searches.
pub const PASSABLE_LEVEL: i32 = 3;

/// Which block level a rule produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum BlockKind {
    Area,
    Building,
    Flying,
}

impl BlockKind {
    pub fn all() -> &'static [BlockKind] {
        &[BlockKind::Area, BlockKind::Building, BlockKind::Flying]
    }

    pub fn description(&self) -> &'static str {
        match self {
            BlockKind::Area => "Ground units can stand here",
            BlockKind::Building => "Buildings can be placed here",
            BlockKind::Flying => "Flying units can pass here",
        }
    }

    /// When the extension passes of this kind credit their progress.
    pub fn ex_credit(&self) -> ExCredit {
        match self {
            BlockKind::Building => ExCredit::AtEnd,
            BlockKind::Area | BlockKind::Flying => ExCredit::BeforeLast,
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BlockKind::Area => "area",
            BlockKind::Building => "building",
            BlockKind::Flying => "flying",
        };
        write!(f, "{}", name)
    }
}

/// Height and slope limits of one block kind.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlopeLimits {
    /// Tiles above `upper_ratio * altitude` block
    pub upper_ratio: f64,
    /// Tiles below `lower_ratio * altitude` block; `None` uses the shallow water ratio
    pub lower_ratio: Option<f64>,
    /// Tiles steeper than `PI * slope_ratio / 2` block
    pub slope_ratio: f64,
    pub ex_times: usize,
}

impl Default for SlopeLimits {
    fn default() -> Self {
        Self {
            upper_ratio: 0.3,
            lower_ratio: None,
            slope_ratio: 0.3,
            ex_times: 0,
        }
    }
}

impl SlopeLimits {
    fn blocks(&self, point: &GameGridPointData, altitude: f64, shallow_water_ratio: f64) -> bool {
        let lower = self.lower_ratio.unwrap_or(shallow_water_ratio);
        point.position_z > self.upper_ratio * altitude
            || point.position_z < lower * altitude
            || point.angle_to_up > PI * self.slope_ratio / 2.0
    }
}

/// Rules for the three block kinds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockParams {
    pub area: SlopeLimits,
    pub building: SlopeLimits,
    /// Flying is blocked above `flying_upper_ratio * altitude`
    pub flying_upper_ratio: f64,
    pub flying_ex_times: usize,
}

impl Default for BlockParams {
    fn default() -> Self {
        Self {
            area: SlopeLimits::default(),
            building: SlopeLimits {
                upper_ratio: 0.3,
                lower_ratio: Some(0.0),
                slope_ratio: 0.1,
                ex_times: 5,
            },
            flying_upper_ratio: 0.5,
            flying_ex_times: 0,
        }
    }
}

impl BlockParams {
    pub fn ex_times(&self, kind: BlockKind) -> usize {
        match kind {
            BlockKind::Area => self.area.ex_times,
            BlockKind::Building => self.building.ex_times,
            BlockKind::Flying => self.flying_ex_times,
        }
    }

    /// Whether `point` blocks for `kind` on a terrain `altitude` high.
    pub fn is_blocked(
        &self,
        kind: BlockKind,
        point: &GameGridPointData,
        altitude: f64,
        shallow_water_ratio: f64,
    ) -> bool {
        if !point.in_terrain_range {
            return true;
        }
        match kind {
            BlockKind::Area => self.area.blocks(point, altitude, shallow_water_ratio),
            BlockKind::Building => {
                self.building.blocks(point, altitude, shallow_water_ratio) || !point.tree_records.is_empty()
            }
            BlockKind::Flying => point.position_z > self.flying_upper_ratio * altitude,
        }
    }
}

// =============================================================================
// CONNECTIVITY
// =============================================================================

/// Radius-1 neighbors of `current`; those below [`PASSABLE_LEVEL`] are marked
/// reached so the search never walks through them.
fn passable_neighbors(
    ds: &GridDataset,
    current: usize,
    reached: &mut HashSet<usize>,
    level_of: &impl Fn(usize) -> i32,
) -> Vec<usize> {
    let next = ds.neighbor_indices(current, 0);
    for &n in &next {
        if level_of(n) < PASSABLE_LEVEL {
            reached.insert(n);
        }
    }
    next
}

/// Whether a walk from `start` through passable tiles reaches `reference`.
pub fn chunks_connected(
    ds: &GridDataset,
    start: usize,
    reference: &HashSet<usize>,
    level_of: impl Fn(usize) -> i32,
) -> bool {
    let mut state = BfsState::new(start);
    bfs_early_exit(
        &mut state,
        |c| reference.contains(&c).then_some(true),
        |c, reached| passable_neighbors(ds, c, reached, &level_of),
    )
    .unwrap_or(false)
}

/// Connection flag of the first max-level tile a passable walk from `start`
/// finds; `false` when there is none.
pub fn reaches_connected_max(
    ds: &GridDataset,
    start: usize,
    max: i32,
    level_of: impl Fn(usize) -> i32,
    connected_of: impl Fn(usize) -> bool,
) -> bool {
    let mut state = BfsState::new(start);
    bfs_early_exit(
        &mut state,
        |c| (level_of(c) == max).then(|| connected_of(c)),
        |c, reached| passable_neighbors(ds, c, reached, &level_of),
    )
    .unwrap_or(false)
}

/// Island verdict for one tile.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IslandCheck {
    pub is_island: bool,
    /// New, smaller level for a low tile that borders open ground further out.
    pub lowered_level: Option<i32>,
}

impl IslandCheck {
    fn island(is_island: bool) -> Self {
        Self {
            is_island,
            lowered_level: None,
        }
    }
}

/// Decide whether `index` is cut off from the connected open ground.
pub fn check_island(
    ds: &GridDataset,
    index: usize,
    max: i32,
    level_of: impl Fn(usize) -> i32,
    connected_of: impl Fn(usize) -> bool,
) -> IslandCheck {
    let level = level_of(index);
    if level == max {
        return IslandCheck::island(!connected_of(index));
    }
    if level >= PASSABLE_LEVEL {
        return IslandCheck::island(!reaches_connected_max(ds, index, max, &level_of, &connected_of));
    }
    if level <= 0 {
        return IslandCheck::island(true);
    }

    for i in (1..=level).rev() {
        let ring = (PASSABLE_LEVEL - 1 - i) as usize;
        let found = ds.neighbor_indices(index, ring).into_iter().any(|n| {
            level_of(n) == PASSABLE_LEVEL && reaches_connected_max(ds, n, max, &level_of, &connected_of)
        });
        if found {
            return IslandCheck {
                is_island: false,
                lowered_level: (i < level).then_some(i),
            };
        }
    }
    IslandCheck::island(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::AxialCoord;
    use crate::grid::test_support::build_dataset;
    use crate::terrain::block::base_block_level;
    use crate::topology::TopologyKind;

    fn open_point() -> GameGridPointData {
        GameGridPointData {
            in_terrain_range: true,
            ..GameGridPointData::default()
        }
    }

    #[test]
    fn test_area_rules() {
        let p = BlockParams::default();
        let alt = 1000.0;
        let shallow = -0.07;

        let flat = open_point();
        assert!(!p.is_blocked(BlockKind::Area, &flat, alt, shallow));
        assert!(p.is_blocked(BlockKind::Area, &GameGridPointData::default(), alt, shallow));

        let high = GameGridPointData {
            position_z: 301.0,
            ..open_point()
        };
        assert!(p.is_blocked(BlockKind::Area, &high, alt, shallow));
        let deep = GameGridPointData {
            position_z: -71.0,
            ..open_point()
        };
        assert!(p.is_blocked(BlockKind::Area, &deep, alt, shallow));
        let steep = GameGridPointData {
            angle_to_up: 0.5,
            ..open_point()
        };
        assert!(p.is_blocked(BlockKind::Area, &steep, alt, shallow));
    }

    #[test]
    fn test_building_and_flying_rules() {
        let p = BlockParams::default();
        let alt = 1000.0;
        let shallow = -0.07;

        // Shallow water stops buildings but not ground units.
        let wet = GameGridPointData {
            position_z: -10.0,
            ..open_point()
        };
        assert!(!p.is_blocked(BlockKind::Area, &wet, alt, shallow));
        assert!(p.is_blocked(BlockKind::Building, &wet, alt, shallow));

        let gentle = GameGridPointData {
            angle_to_up: 0.2,
            ..open_point()
        };
        assert!(!p.is_blocked(BlockKind::Area, &gentle, alt, shallow));
        assert!(p.is_blocked(BlockKind::Building, &gentle, alt, shallow));

        let wooded = GameGridPointData {
            tree_records: vec![crate::game_grid::trees::TreeRecord {
                sample_index: 0,
                z_scale: 1.0,
                xy_scale: 1.0,
                location: [0.0; 3],
                angle_rot_z: 0.0,
            }],
            ..open_point()
        };
        assert!(p.is_blocked(BlockKind::Building, &wooded, alt, shallow));

        let hill = GameGridPointData {
            position_z: 400.0,
            angle_to_up: 1.0,
            ..open_point()
        };
        assert!(!p.is_blocked(BlockKind::Flying, &hill, alt, shallow));
        let peak = GameGridPointData {
            position_z: 501.0,
            ..open_point()
        };
        assert!(p.is_blocked(BlockKind::Flying, &peak, alt, shallow));
        assert!(p.is_blocked(BlockKind::Flying, &GameGridPointData::default(), alt, shallow));
    }

    #[test]
    fn test_kind_defaults() {
        let p = BlockParams::default();
        assert_eq!(p.ex_times(BlockKind::Area), 0);
        assert_eq!(p.ex_times(BlockKind::Building), 5);
        assert_eq!(p.ex_times(BlockKind::Flying), 0);
        assert_eq!(BlockKind::Building.ex_credit(), ExCredit::AtEnd);
        assert_eq!(BlockKind::Flying.ex_credit(), ExCredit::BeforeLast);
        assert_eq!(BlockKind::all().len(), 3);
        assert_eq!(BlockKind::Flying.to_string(), "flying");
    }

    /// Hex grid of range 9 with a closed wall ring at distance 4 from the
    /// center; levels follow the base pass with neighbor range 2.
    fn walled() -> (GridDataset, Vec<i32>) {
        let ds = build_dataset(TopologyKind::Hex, 9, 2, 10.0);
        let center = ds.index_of(AxialCoord::new(0, 0)).unwrap();
        let wall: HashSet<usize> = (0..ds.len()).filter(|&i| ds.distance(i, center) == 4).collect();
        let levels = (0..ds.len())
            .map(|i| base_block_level(&ds, i, |_| true, |n| wall.contains(&n)))
            .collect();
        (ds, levels)
    }

    #[test]
    fn test_walled_levels() {
        let (ds, levels) = walled();
        let center = ds.index_of(AxialCoord::new(0, 0)).unwrap();
        for i in 0..ds.len() {
            let to_wall = (ds.distance(i, center) - 4).abs();
            assert_eq!(levels[i], to_wall.min(3), "tile {}", i);
        }
    }

    #[test]
    fn test_walled_chunk_is_not_connected() {
        let (ds, levels) = walled();
        let center = ds.index_of(AxialCoord::new(0, 0)).unwrap();
        let outer: HashSet<usize> = (0..ds.len()).filter(|&i| ds.distance(i, center) >= 7).collect();
        assert!(!chunks_connected(&ds, center, &outer, |n| levels[n]));

        // The outer ring is one piece: any of its tiles reaches any other.
        let far = ds.index_of(AxialCoord::new(-8, 0)).unwrap();
        let near: HashSet<usize> = [ds.index_of(AxialCoord::new(9, 0)).unwrap()].into_iter().collect();
        assert!(chunks_connected(&ds, far, &near, |n| levels[n]));
    }

    #[test]
    fn test_islands_inside_wall() {
        let (ds, levels) = walled();
        let center = ds.index_of(AxialCoord::new(0, 0)).unwrap();
        let max = 3;
        let connected = |n: usize| ds.distance(n, center) >= 7;

        for i in 0..ds.len() {
            let check = check_island(&ds, i, max, |n| levels[n], connected);
            let d = ds.distance(i, center);
            assert_eq!(check.is_island, d <= 4, "tile {} at distance {}", i, d);
            assert_eq!(check.lowered_level, None);
        }
    }

    #[test]
    fn test_low_tile_is_lowered_towards_open_ground() {
        let ds = build_dataset(TopologyKind::Hex, 4, 2, 10.0);
        let center = ds.index_of(AxialCoord::new(0, 0)).unwrap();
        let open = ds.index_of(AxialCoord::new(2, 0)).unwrap();
        let mut levels = vec![0; ds.len()];
        levels[center] = 2;
        levels[open] = 3;

        let check = check_island(&ds, center, 3, |n| levels[n], |n| n == open);
        assert_eq!(
            check,
            IslandCheck {
                is_island: false,
                lowered_level: Some(1)
            }
        );

        // The same tile next to an unconnected max tile stays an island.
        let check = check_island(&ds, center, 3, |n| levels[n], |_| false);
        assert!(check.is_island);
    }

    #[test]
    fn test_passable_tile_walks_to_max() {
        let ds = build_dataset(TopologyKind::Quad, 4, 1, 10.0);
        let start = ds.index_of(AxialCoord::new(0, 0)).unwrap();
        let goal = ds.index_of(AxialCoord::new(3, 0)).unwrap();
        let mut levels = vec![0; ds.len()];
        for x in 0..=3 {
            levels[ds.index_of(AxialCoord::new(x, 0)).unwrap()] = 3;
        }
        levels[goal] = 4;
        assert!(reaches_connected_max(&ds, start, 4, |n| levels[n], |_| true));
        assert!(!check_island(&ds, start, 4, |n| levels[n], |_| true).is_island);

        levels[ds.index_of(AxialCoord::new(2, 0)).unwrap()] = 2;
        assert!(!reaches_connected_max(&ds, start, 4, |n| levels[n], |_| true));
    }
}
