//! Terrain mesh topology and per-vertex normals.

use crate::coords::AxialCoord;
use crate::topology::TopologyKind;

pub type Vec3 = [f64; 3];

pub const UP: Vec3 = [0.0, 0.0, 1.0];

/// Triangles owned by the cell at `coord`, wound so flat ground faces up.
///
/// Quad cells own the square towards `+x`/`+y`: `[a, c, b]` and `[a, d, c]`
/// for corners `a, b = a+(1,0), c = a+(1,1), d = a+(0,1)`. When one corner is
/// missing the three present corners `s` give the single triangle
/// `[s0, s2, s1]`. Hex cells own the two lattice triangles above them.
pub fn cell_triangles(
    kind: TopologyKind,
    coord: AxialCoord,
    lookup: impl Fn(AxialCoord) -> Option<usize>,
) -> Vec<[usize; 3]> {
    let at = |dx: i32, dy: i32| lookup(AxialCoord::new(coord.x + dx, coord.y + dy));
    match kind {
        TopologyKind::Quad => {
            let corners: Vec<usize> = [(0, 0), (1, 0), (1, 1), (0, 1)]
                .iter()
                .filter_map(|&(dx, dy)| at(dx, dy))
                .collect();
            match corners.as_slice() {
                [a, b, c, d] => vec![[*a, *c, *b], [*a, *d, *c]],
                [s0, s1, s2] if at(0, 0).is_some() => vec![[*s0, *s2, *s1]],
                _ => Vec::new(),
            }
        }
        TopologyKind::Hex => {
            let mut tris = Vec::new();
            if let (Some(a), Some(b), Some(d)) = (at(0, 0), at(1, 0), at(0, 1)) {
                tris.push([a, d, b]);
            }
            if let (Some(a), Some(e), Some(d)) = (at(0, 0), at(-1, 1), at(0, 1)) {
                tris.push([a, e, d]);
            }
            tris
        }
    }
}

pub fn sub(a: Vec3, b: Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

pub fn cross(a: Vec3, b: Vec3) -> Vec3 {
    [
        a[1] * b[2] - a[2] * b[1],
        a[2] * b[0] - a[0] * b[2],
        a[0] * b[1] - a[1] * b[0],
    ]
}

pub fn dot(a: Vec3, b: Vec3) -> f64 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

/// Unit vector; the zero vector stays zero.
pub fn normalize(v: Vec3) -> Vec3 {
    let len = dot(v, v).sqrt();
    if len <= f64::EPSILON {
        return [0.0; 3];
    }
    [v[0] / len, v[1] / len, v[2] / len]
}

/// Unnormalized face normal `cross(v1 - v2, v3 - v2)`.
pub fn face_normal(v1: Vec3, v2: Vec3, v3: Vec3) -> Vec3 {
    cross(sub(v1, v2), sub(v3, v2))
}

/// Add the face normal of `tri` to each of its three vertices.
pub fn accumulate_normal(acc: &mut [Vec3], vertices: &[Vec3], tri: [usize; 3]) {
    let n = face_normal(vertices[tri[0]], vertices[tri[1]], vertices[tri[2]]);
    for &i in &tri {
        for (slot, value) in acc[i].iter_mut().zip(n) {
            *slot += value;
        }
    }
}

/// Angle in radians between a unit normal and straight up.
pub fn angle_to_up(normal: Vec3) -> f64 {
    dot(UP, normal).clamp(-1.0, 1.0).acos()
}
