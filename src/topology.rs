//! Grid topology strategies.
//!
//! One [`GridTopology`] trait drives the spiral builder and every
//! topology-aware query. Hex and quad are the two implementations; a
//! [`TopologyKind`] picks one at runtime.

use serde::{Deserialize, Serialize};

use crate::coords::hex::{HEX_RING_DIRECTION_START_INDEX, HEX_SIDE_NUM};
use crate::coords::quad::{QUAD_RING_DIRECTION_START_INDEX, QUAD_SIDE_NUM};
use crate::coords::{AxialCoord, Hex, Quad, Vec2};

/// Topology-specific stepping rules and geometry.
pub trait GridTopology: Send + Sync {
    /// Which topology this is.
    fn kind(&self) -> TopologyKind;

    /// Number of sectors in a ring (also the number of tile sides).
    fn sectors(&self) -> usize;

    /// First coordinate of the ring of `radius` around `center`.
    fn init_ring(&self, center: AxialCoord, radius: i32) -> AxialCoord;

    /// Next coordinate when walking sector `sector` of a ring.
    fn find_neighbor_of_ring(&self, current: AxialCoord, sector: usize) -> AxialCoord;

    fn distance(&self, a: AxialCoord, b: AxialCoord) -> i32;

    /// World position of a cell center.
    fn position(&self, coord: AxialCoord, tile_size: f64) -> Vec2;

    /// Corner positions of the tile centered at `center`.
    fn vertices(&self, center: Vec2, tile_size: f64) -> Vec<Vec2>;

    /// Cell containing a world position.
    fn coord_at(&self, position: Vec2, tile_size: f64) -> AxialCoord;

    /// Every coordinate at exactly `radius` from `center`, in tracing order.
    fn ring(&self, center: AxialCoord, radius: i32) -> Vec<AxialCoord> {
        if radius <= 0 {
            return vec![center];
        }
        let mut points = Vec::with_capacity(self.sectors() * radius as usize);
        let mut current = self.init_ring(center, radius);
        for sector in 0..self.sectors() {
            for _ in 0..radius {
                points.push(current);
                current = self.find_neighbor_of_ring(current, sector);
            }
        }
        points
    }

    /// Number of cells within `grid_range` rings of the center.
    fn point_count(&self, grid_range: i32) -> usize {
        let r = grid_range.max(0) as usize;
        1 + self.sectors() * r * (r + 1) / 2
    }
}

/// Hexagonal grid.
#[derive(Clone, Copy, Debug, Default)]
pub struct HexTopology;

impl GridTopology for HexTopology {
    fn kind(&self) -> TopologyKind {
        TopologyKind::Hex
    }

    fn sectors(&self) -> usize {
        HEX_SIDE_NUM
    }

    fn init_ring(&self, center: AxialCoord, radius: i32) -> AxialCoord {
        let start = Hex::direction(HEX_RING_DIRECTION_START_INDEX).scale(radius);
        Hex::from(center).add(start).into()
    }

    fn find_neighbor_of_ring(&self, current: AxialCoord, sector: usize) -> AxialCoord {
        Hex::from(current).neighbor(sector).into()
    }

    fn distance(&self, a: AxialCoord, b: AxialCoord) -> i32 {
        Hex::distance(a.into(), b.into())
    }

    fn position(&self, coord: AxialCoord, tile_size: f64) -> Vec2 {
        Hex::from(coord).position(tile_size)
    }

    fn vertices(&self, center: Vec2, tile_size: f64) -> Vec<Vec2> {
        Hex::vertices(center, tile_size)
    }

    fn coord_at(&self, position: Vec2, tile_size: f64) -> AxialCoord {
        Hex::from_position(position, tile_size).into()
    }
}

/// Square grid stepped along diagonals.
#[derive(Clone, Copy, Debug, Default)]
pub struct QuadTopology;

impl GridTopology for QuadTopology {
    fn kind(&self) -> TopologyKind {
        TopologyKind::Quad
    }

    fn sectors(&self) -> usize {
        QUAD_SIDE_NUM
    }

    fn init_ring(&self, center: AxialCoord, radius: i32) -> AxialCoord {
        let start = Quad::neighbor_direction(QUAD_RING_DIRECTION_START_INDEX).scale(radius);
        Quad::from(center).add(start).into()
    }

    fn find_neighbor_of_ring(&self, current: AxialCoord, sector: usize) -> AxialCoord {
        Quad::from(current).neighbor(sector).into()
    }

    fn distance(&self, a: AxialCoord, b: AxialCoord) -> i32 {
        Quad::distance(a.into(), b.into())
    }

    fn position(&self, coord: AxialCoord, tile_size: f64) -> Vec2 {
        Quad::from(coord).position(tile_size)
    }

    fn vertices(&self, center: Vec2, tile_size: f64) -> Vec<Vec2> {
        Quad::vertices(center, tile_size)
    }

    fn coord_at(&self, position: Vec2, tile_size: f64) -> AxialCoord {
        Quad::from_position(position, tile_size).into()
    }
}

static HEX: HexTopology = HexTopology;
static QUAD: QuadTopology = QuadTopology;

/// Selects a topology implementation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyKind {
    Hex,
    Quad,
}

impl TopologyKind {
    pub fn all() -> &'static [TopologyKind] {
        &[TopologyKind::Hex, TopologyKind::Quad]
    }

    pub fn description(&self) -> &'static str {
        match self {
            TopologyKind::Hex => "Hexagonal tiles, 6 neighbors, axial coordinates",
            TopologyKind::Quad => "Square tiles, rings traced as diamonds",
        }
    }

    /// The strategy object for this topology.
    pub fn topology(&self) -> &'static dyn GridTopology {
        match self {
            TopologyKind::Hex => &HEX,
            TopologyKind::Quad => &QUAD,
        }
    }
}

impl std::fmt::Display for TopologyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TopologyKind::Hex => "hex",
            TopologyKind::Quad => "quad",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for TopologyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hex" => Ok(TopologyKind::Hex),
            "quad" => Ok(TopologyKind::Quad),
            other => Err(format!("unknown topology '{}'", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_hex_ring_sizes_and_distance() {
        let topo = TopologyKind::Hex.topology();
        let center = AxialCoord::new(1, -2);
        for r in 1..=4 {
            let ring = topo.ring(center, r);
            assert_eq!(ring.len(), 6 * r as usize);
            let unique: HashSet<_> = ring.iter().copied().collect();
            assert_eq!(unique.len(), ring.len());
            assert!(ring.iter().all(|&c| topo.distance(center, c) == r));
        }
    }

    #[test]
    fn test_quad_ring_is_closed_diamond() {
        let topo = TopologyKind::Quad.topology();
        let center = AxialCoord::new(0, 0);
        let ring = topo.ring(center, 3);
        assert_eq!(ring.len(), 12);
        assert_eq!(ring[0], AxialCoord::new(0, -3));
        assert!(ring.iter().all(|&c| topo.distance(center, c) == 3));

        // Walking one more step from the last point returns to the start.
        let last = *ring.last().unwrap();
        assert_eq!(topo.find_neighbor_of_ring(last, 3), ring[0]);
    }

    #[test]
    fn test_point_count_formula() {
        assert_eq!(TopologyKind::Hex.topology().point_count(2), 19);
        assert_eq!(TopologyKind::Quad.topology().point_count(2), 13);
        assert_eq!(TopologyKind::Hex.topology().point_count(0), 1);
    }

    #[test]
    fn test_kind_parse_and_display() {
        for kind in TopologyKind::all() {
            let parsed: TopologyKind = kind.to_string().parse().unwrap();
            assert_eq!(parsed, *kind);
        }
        assert!("tri".parse::<TopologyKind>().is_err());
    }
}
