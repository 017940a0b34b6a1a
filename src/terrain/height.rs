//! Heightfield math: range remapping, gradient damping and water banks.
//!
//! Every height is carried as a ratio in [-1, 1] of the maximum tile
//! altitude. Land layers map noise into `[0, mapping_max]`; the water layer
//! maps into negative ratios that are then shaped by [`water_bank`].

use serde::{Deserialize, Serialize};

/// Linear remap of a noise band onto a height band.
///
/// Values below `range_min` land on `mapping_min`, values above `range_max`
/// on `mapping_max`. The offsets shift the input band by a level in [0, 1],
/// see [`HeightMapping::by_level`].
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HeightMapping {
    pub range_min: f64,
    pub range_max: f64,
    pub mapping_min: f64,
    pub mapping_max: f64,
    pub range_min_offset: f64,
    pub range_max_offset: f64,
}

impl Default for HeightMapping {
    fn default() -> Self {
        Self::new(0.0, 1.0, 0.0, 1.0, 0.0, 0.0)
    }
}

impl HeightMapping {
    pub const fn new(
        range_min: f64,
        range_max: f64,
        mapping_min: f64,
        mapping_max: f64,
        range_min_offset: f64,
        range_max_offset: f64,
    ) -> Self {
        Self {
            range_min,
            range_max,
            mapping_min,
            mapping_max,
            range_min_offset,
            range_max_offset,
        }
    }

    /// Shift the input band by `level` times the offsets.
    pub fn by_level(&self, level: f64) -> Self {
        Self {
            range_min: self.range_min + self.range_min_offset * level,
            range_max: self.range_max + self.range_max_offset * level,
            ..*self
        }
    }

    pub fn map(&self, value: f64) -> f64 {
        map_range(value, self.range_max, self.range_min, self.mapping_max, self.mapping_min)
    }
}

/// Map `value` from `[range_min, range_max]` onto `[mapping_min, mapping_max]`,
/// clamping to the input band first. A degenerate band yields `mapping_max`.
pub fn map_range(value: f64, range_max: f64, range_min: f64, mapping_max: f64, mapping_min: f64) -> f64 {
    let span = range_max - range_min;
    if span.abs() < f64::EPSILON {
        return mapping_max;
    }
    let (lo, hi) = if range_min <= range_max {
        (range_min, range_max)
    } else {
        (range_max, range_min)
    };
    let alpha = (range_max - value.clamp(lo, hi)) / span;
    lerp(mapping_max, mapping_min, alpha)
}

pub fn lerp(a: f64, b: f64, alpha: f64) -> f64 {
    a + (b - a) * alpha
}

/// Sample `f` at `(x, y)` and damp the value by the local slope.
///
/// The slope is the forward difference towards `x + 1` and `y + 1`, scaled
/// from ratio units to world units by `altitude / tile_size`. Steep spots
/// get flattened more, which keeps cliffs from dominating the layer.
pub fn gradient_ratio(
    f: impl Fn(f64, f64) -> f64,
    x: f64,
    y: f64,
    base: f64,
    k: f64,
    altitude: f64,
    tile_size: f64,
) -> f64 {
    let v = f(x, y);
    let vx = f(x + 1.0, y);
    let vy = f(x, y + 1.0);
    let scale = if tile_size > 0.0 { altitude / tile_size } else { 0.0 };
    let sx = (vx - v) * scale;
    let sy = (vy - v) * scale;
    let slope = (sx * sx + sy * sy).sqrt();
    base + v / (1.0 + slope * k)
}

/// Shape a water ratio so shores rise smoothly.
///
/// Positive input is dry land and yields 0. Shallow depths get a steeper
/// exponent (3) than deep ones (1); `sharpness` sets how fast the exponent
/// moves between the two.
pub fn water_bank(ratio: f64, sharpness: f64) -> f64 {
    let r = ratio.min(0.0).abs();
    let alpha = (r * sharpness).clamp(0.0, 1.0);
    let exp = lerp(3.0, 1.0, alpha);
    -r.powf(exp)
}

/// Scale a noise value, clamp it to [-1, 1] and move it into [0, 1].
pub fn noise_std(value: f64, value_scale: f64) -> f64 {
    ((value * value_scale).clamp(-1.0, 1.0) + 1.0) * 0.5
}
