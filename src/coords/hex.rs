//! Axial hex coordinates.
//!
//! Layout is flat-top: the tile corners sit at multiples of 60° and neighbor
//! centers are `tile_size * sqrt(3)` apart.

use super::{round_half_away, AxialCoord, Vec2};

/// Number of sides (and neighbor directions) of a hex tile.
pub const HEX_SIDE_NUM: usize = 6;

/// Direction index used to find the first tile of a ring.
pub const HEX_RING_DIRECTION_START_INDEX: usize = 4;

const AXIAL_DIRECTIONS: [(i32, i32); HEX_SIDE_NUM] =
    [(1, 0), (1, -1), (0, -1), (-1, 0), (-1, 1), (0, 1)];

/// Hex cell in axial coordinates; `s = -q - r` is implied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Hex {
    pub q: i32,
    pub r: i32,
}

impl Hex {
    pub const fn new(q: i32, r: i32) -> Self {
        Self { q, r }
    }

    pub fn s(&self) -> i32 {
        -self.q - self.r
    }

    pub fn add(self, other: Hex) -> Hex {
        Hex::new(self.q + other.q, self.r + other.r)
    }

    pub fn subtract(self, other: Hex) -> Hex {
        Hex::new(self.q - other.q, self.r - other.r)
    }

    pub fn scale(self, factor: i32) -> Hex {
        Hex::new(self.q * factor, self.r * factor)
    }

    /// Unit offset for direction `index` (taken modulo 6).
    pub fn direction(index: usize) -> Hex {
        let (q, r) = AXIAL_DIRECTIONS[index % HEX_SIDE_NUM];
        Hex::new(q, r)
    }

    pub fn neighbor(self, direction: usize) -> Hex {
        self.add(Hex::direction(direction))
    }

    pub fn distance(a: Hex, b: Hex) -> i32 {
        let d = a.subtract(b);
        (d.q.abs() + d.r.abs() + d.s().abs()) / 2
    }

    /// Round fractional axial coordinates to the containing hex.
    ///
    /// Each cube component is rounded half away from zero, then the component
    /// with the largest rounding error is rebuilt from the other two.
    pub fn round(q: f64, r: f64) -> Hex {
        let s = -q - r;
        let mut rq = round_half_away(q);
        let mut rr = round_half_away(r);
        let rs = round_half_away(s);

        let dq = (rq - q).abs();
        let dr = (rr - r).abs();
        let ds = (rs - s).abs();

        if dq > dr && dq > ds {
            rq = -rr - rs;
        } else if dr > ds {
            rr = -rq - rs;
        }
        Hex::new(rq as i32, rr as i32)
    }

    /// Center position of this hex for tiles with circumradius `tile_size`.
    pub fn position(self, tile_size: f64) -> Vec2 {
        let tile_height = tile_size * 3f64.sqrt();
        let (sin30, cos30) = 30f64.to_radians().sin_cos();
        Vec2::new(
            tile_height * (self.q as f64 * cos30),
            tile_height * (self.q as f64 * sin30 + self.r as f64),
        )
    }

    /// Hex containing a world position.
    pub fn from_position(point: Vec2, tile_size: f64) -> Hex {
        let q = (2.0 / 3.0 * point.x) / tile_size;
        let r = (-1.0 / 3.0 * point.x + 3f64.sqrt() / 3.0 * point.y) / tile_size;
        Hex::round(q, r)
    }

    /// Corner positions around `center`, counter-clockwise from 0°.
    pub fn vertices(center: Vec2, tile_size: f64) -> Vec<Vec2> {
        (0..HEX_SIDE_NUM)
            .map(|i| {
                let corner = Vec2::new(1.0, 0.0).rotate((60.0 * i as f64).to_radians());
                center.add(corner.scale(tile_size))
            })
            .collect()
    }
}

impl From<AxialCoord> for Hex {
    fn from(c: AxialCoord) -> Self {
        Hex::new(c.x, c.y)
    }
}

impl From<Hex> for AxialCoord {
    fn from(h: Hex) -> Self {
        AxialCoord::new(h.q, h.r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_neighbors_are_distance_one() {
        let center = Hex::new(2, -1);
        for dir in 0..HEX_SIDE_NUM {
            assert_eq!(Hex::distance(center, center.neighbor(dir)), 1);
        }
    }

    #[test]
    fn test_distance_is_symmetric() {
        let a = Hex::new(3, -5);
        let b = Hex::new(-2, 4);
        assert_eq!(Hex::distance(a, b), Hex::distance(b, a));
        assert_eq!(Hex::distance(a, b), 9);
    }

    #[test]
    fn test_position_roundtrip() {
        let tile_size = 400.0;
        for q in -6..=6 {
            for r in -6..=6 {
                let hex = Hex::new(q, r);
                let pos = hex.position(tile_size);
                assert_eq!(Hex::from_position(pos, tile_size), hex);
            }
        }
    }

    #[test]
    fn test_neighbor_spacing() {
        let tile_size = 10.0;
        let origin = Hex::new(0, 0).position(tile_size);
        for dir in 0..HEX_SIDE_NUM {
            let p = Hex::new(0, 0).neighbor(dir).position(tile_size);
            assert!((p.sub(origin).length() - tile_size * 3f64.sqrt()).abs() < 1e-9);
        }
    }

    #[test]
    fn test_vertices_on_circumcircle() {
        let verts = Hex::vertices(Vec2::new(5.0, 5.0), 2.0);
        assert_eq!(verts.len(), 6);
        for v in verts {
            assert!((v.sub(Vec2::new(5.0, 5.0)).length() - 2.0).abs() < 1e-9);
        }
    }
}
