//! Grid data store.
//!
//! A [`GridDataset`] is the in-memory form of one persisted grid: the points
//! in spiral order, their neighbor rings and a coordinate index. It is built
//! once by the [`loader::GridLoader`] and then shared read-only (behind an
//! `Arc`) by every generator that needs it.

pub mod creator;
pub mod loader;
pub mod persist;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::coords::{AxialCoord, Vec2};
use crate::topology::{GridTopology, TopologyKind};

/// Neighbors of one point at one ring radius.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NeighborRing {
    pub radius: i32,
    /// Number of neighbors that exist in the grid; equals `points.len()`.
    pub count: usize,
    pub points: Vec<AxialCoord>,
}

impl NeighborRing {
    pub fn new(radius: i32, points: Vec<AxialCoord>) -> Self {
        Self {
            radius,
            count: points.len(),
            points,
        }
    }
}

/// One node of the grid.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GridPoint {
    pub axial_coord: AxialCoord,
    pub position: Vec2,
    /// Tile corners, filled after load.
    pub vertices: Vec<Vec2>,
    /// Rings in increasing radius, starting at radius 1.
    pub neighbors: Vec<NeighborRing>,
    /// Spiral ring the point was created on (0 at the center).
    pub range_from_center: i32,
}

/// Header of a persisted grid.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    pub grid_range: i32,
    pub neighbor_range: i32,
    pub points_num: usize,
    /// Only present for grids that record their tile size.
    pub tile_size: Option<f64>,
}

/// Loaded grid, shared read-only after construction.
#[derive(Clone, Debug)]
pub struct GridDataset {
    pub topology: TopologyKind,
    pub params: GridParams,
    pub tile_size: f64,
    points: Vec<GridPoint>,
    indices: HashMap<AxialCoord, usize>,
}

impl GridDataset {
    /// Assemble a dataset from points in storage order.
    pub fn new(topology: TopologyKind, params: GridParams, tile_size: f64, points: Vec<GridPoint>) -> Self {
        let indices = points
            .iter()
            .enumerate()
            .map(|(i, p)| (p.axial_coord, i))
            .collect();
        Self {
            topology,
            params,
            tile_size,
            points,
            indices,
        }
    }

    pub fn topology(&self) -> &'static dyn GridTopology {
        self.topology.topology()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[GridPoint] {
        &self.points
    }

    pub fn point(&self, index: usize) -> Option<&GridPoint> {
        self.points.get(index)
    }

    pub fn index_of(&self, coord: AxialCoord) -> Option<usize> {
        self.indices.get(&coord).copied()
    }

    /// Number of neighbor rings stored for a point.
    pub fn ring_count(&self, index: usize) -> usize {
        self.points.get(index).map_or(0, |p| p.neighbors.len())
    }

    /// Indices of the neighbors in ring `ring` (0-based, radius `ring + 1`).
    pub fn neighbor_indices(&self, index: usize, ring: usize) -> Vec<usize> {
        self.points
            .get(index)
            .and_then(|p| p.neighbors.get(ring))
            .map(|r| r.points.iter().filter_map(|c| self.index_of(*c)).collect())
            .unwrap_or_default()
    }

    /// Topology distance between two stored points.
    pub fn distance(&self, a: usize, b: usize) -> i32 {
        self.topology()
            .distance(self.points[a].axial_coord, self.points[b].axial_coord)
    }

    /// Index of the point whose cell contains `position`.
    pub fn index_at_position(&self, position: Vec2) -> Option<usize> {
        let coord = self.topology().coord_at(position, self.tile_size);
        self.index_of(coord)
    }

    /// Fill every point's corner list from its position.
    pub fn create_vertices(&mut self) {
        let topo = self.topology();
        for p in &mut self.points {
            p.vertices = topo.vertices(p.position, self.tile_size);
        }
    }

    /// Check that the coordinate index agrees with storage order.
    pub fn is_consistent(&self) -> bool {
        self.indices.len() == self.points.len()
            && self
                .points
                .iter()
                .enumerate()
                .all(|(i, p)| self.indices.get(&p.axial_coord) == Some(&i))
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Small in-memory grids for tests across the crate.

    use super::*;

    /// Build a complete grid directly, without going through the creator.
    pub fn build_dataset(kind: TopologyKind, grid_range: i32, neighbor_range: i32, tile_size: f64) -> GridDataset {
        let topo = kind.topology();
        let center = AxialCoord::new(0, 0);
        let mut coords = vec![(center, 0)];
        for r in 1..=grid_range {
            for c in topo.ring(center, r) {
                coords.push((c, r));
            }
        }
        let index: HashMap<AxialCoord, usize> =
            coords.iter().enumerate().map(|(i, (c, _))| (*c, i)).collect();

        let points: Vec<GridPoint> = coords
            .iter()
            .map(|&(c, r)| GridPoint {
                axial_coord: c,
                position: topo.position(c, tile_size),
                vertices: Vec::new(),
                neighbors: (1..=neighbor_range)
                    .map(|radius| {
                        let pts = topo
                            .ring(c, radius)
                            .into_iter()
                            .filter(|n| index.contains_key(n))
                            .collect();
                        NeighborRing::new(radius, pts)
                    })
                    .collect(),
                range_from_center: r,
            })
            .collect();

        let params = GridParams {
            grid_range,
            neighbor_range,
            points_num: points.len(),
            tile_size: Some(tile_size),
        };
        let mut ds = GridDataset::new(kind, params, tile_size, points);
        ds.create_vertices();
        ds
    }
}
