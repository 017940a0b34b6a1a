//! Block levels: distance, in neighbor rings, to the nearest blocked tile.
//!
//! A blocked tile has level 0. A free tile takes the radius of the first
//! neighbor ring that contains a blocked tile, or `neighbor_range + 1` when
//! none of its rings does. Extension passes push the ceiling further out by
//! chaining the outermost ring of tiles that sit at the current ceiling.
//!
//! The same rules drive the terrain levels and the three game grid levels;
//! only the blocking predicate and the set of tiles in scope differ.

use log::debug;

use crate::grid::GridDataset;

/// Level of `index` after the base pass.
///
/// `in_scope` filters neighbors (tiles outside are skipped as if missing),
/// `blocked` decides whether a tile blocks.
pub fn base_block_level(
    ds: &GridDataset,
    index: usize,
    in_scope: impl Fn(usize) -> bool,
    blocked: impl Fn(usize) -> bool,
) -> i32 {
    if blocked(index) {
        return 0;
    }
    if let Some(point) = ds.point(index) {
        for ring in &point.neighbors {
            let hit = ring
                .points
                .iter()
                .filter_map(|c| ds.index_of(*c))
                .filter(|&n| in_scope(n))
                .any(&blocked);
            if hit {
                return ring.radius;
            }
        }
    }
    ds.params.neighbor_range + 1
}

/// Level of `index` during an extension pass whose ceiling is `max`.
///
/// Only tiles sitting exactly at the previous ceiling (`max - neighbor_range`)
/// change: they take the smallest `neighbor_range + level` over their
/// outermost ring, capped at `max`. Levels are read through `level_of`, so a
/// pass that writes in place sees the values already updated in this pass.
pub fn extended_block_level(
    ds: &GridDataset,
    index: usize,
    max: i32,
    in_scope: impl Fn(usize) -> bool,
    level_of: impl Fn(usize) -> i32,
) -> i32 {
    let nr = ds.params.neighbor_range;
    let level = level_of(index);
    if level != max - nr {
        return level;
    }
    let outer = match ds.point(index).and_then(|p| p.neighbors.last()) {
        Some(ring) => ring,
        None => return max,
    };
    outer
        .points
        .iter()
        .filter_map(|c| ds.index_of(*c))
        .filter(|&n| in_scope(n))
        .map(|n| nr + level_of(n))
        .fold(max, i32::min)
}

/// When an extension routine credits its progress weight.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExCredit {
    /// After the pass count reaches the configured number of passes.
    AtEnd,
    /// After the pass count reaches one less than the configured number.
    BeforeLast,
}

/// Bookkeeping for a sequence of extension passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExPasses {
    pub times: usize,
    pub done: usize,
    pub credit: ExCredit,
    pub credited: bool,
}

/// What happened when a pass finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PassOutcome {
    /// Credit the phase weight now.
    pub credit: bool,
    /// No passes left; the state machine moves on.
    pub finished: bool,
}

impl ExPasses {
    pub fn new(times: usize, credit: ExCredit) -> Self {
        Self {
            times,
            done: 0,
            credit,
            credited: false,
        }
    }

    /// Index of the pass to run next.
    pub fn current(&self) -> usize {
        self.done
    }

    /// The pass now running is the last one.
    pub fn is_last(&self) -> bool {
        self.done + 1 >= self.times
    }

    pub fn finish_pass(&mut self, name: &str) -> PassOutcome {
        self.done += 1;
        debug!("{}: block level extension {} of {} done", name, self.done, self.times);
        let threshold = match self.credit {
            ExCredit::AtEnd => self.times,
            ExCredit::BeforeLast => self.times.saturating_sub(1),
        };
        let credit = !self.credited && self.done == threshold;
        if credit {
            self.credited = true;
        }
        PassOutcome {
            credit,
            finished: self.done >= self.times,
        }
    }
}
