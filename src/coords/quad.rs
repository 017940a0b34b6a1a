//! Square grid coordinates.
//!
//! Ring tracing steps along diagonals so quad rings are diamonds of `4 * r`
//! cells, the same sector/step structure the hex rings use.

use super::{round_half_away, AxialCoord, Vec2};

/// Number of sides (and ring sectors) of a quad tile.
pub const QUAD_SIDE_NUM: usize = 4;

/// Cardinal direction index used to find the first tile of a ring.
pub const QUAD_RING_DIRECTION_START_INDEX: usize = 0;

const NEIGHBOR_DIRECTIONS: [(i32, i32); QUAD_SIDE_NUM] = [(0, -1), (1, 0), (0, 1), (-1, 0)];
const DIAGONAL_DIRECTIONS: [(i32, i32); QUAD_SIDE_NUM] = [(1, 1), (-1, 1), (-1, -1), (1, -1)];

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Quad {
    pub x: i32,
    pub y: i32,
}

impl Quad {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn add(self, other: Quad) -> Quad {
        Quad::new(self.x + other.x, self.y + other.y)
    }

    pub fn subtract(self, other: Quad) -> Quad {
        Quad::new(self.x - other.x, self.y - other.y)
    }

    pub fn scale(self, factor: i32) -> Quad {
        Quad::new(self.x * factor, self.y * factor)
    }

    pub fn neighbor_direction(index: usize) -> Quad {
        let (x, y) = NEIGHBOR_DIRECTIONS[index % QUAD_SIDE_NUM];
        Quad::new(x, y)
    }

    pub fn diagonal_direction(index: usize) -> Quad {
        let (x, y) = DIAGONAL_DIRECTIONS[index % QUAD_SIDE_NUM];
        Quad::new(x, y)
    }

    /// Step one diagonal in direction `index`.
    pub fn neighbor(self, direction: usize) -> Quad {
        self.add(Quad::diagonal_direction(direction))
    }

    /// Manhattan distance.
    pub fn distance(a: Quad, b: Quad) -> i32 {
        let d = a.subtract(b);
        d.x.abs() + d.y.abs()
    }

    pub fn round(x: f64, y: f64) -> Quad {
        Quad::new(round_half_away(x) as i32, round_half_away(y) as i32)
    }

    pub fn position(self, tile_size: f64) -> Vec2 {
        Vec2::new(self.x as f64 * tile_size, self.y as f64 * tile_size)
    }

    /// Cell containing a world position.
    pub fn from_position(point: Vec2, tile_size: f64) -> Quad {
        Quad::round(point.x / tile_size, point.y / tile_size)
    }

    /// Corner positions, counter-clockwise starting at (+half, +half).
    pub fn vertices(center: Vec2, tile_size: f64) -> Vec<Vec2> {
        let h = tile_size * 0.5;
        [(h, h), (-h, h), (-h, -h), (h, -h)]
            .iter()
            .map(|&(dx, dy)| center.add(Vec2::new(dx, dy)))
            .collect()
    }
}

impl From<AxialCoord> for Quad {
    fn from(c: AxialCoord) -> Self {
        Quad::new(c.x, c.y)
    }
}

impl From<Quad> for AxialCoord {
    fn from(q: Quad) -> Self {
        AxialCoord::new(q.x, q.y)
    }
}
