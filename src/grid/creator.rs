//! Grid creation workflow.
//!
//! Traces the grid as a spiral of rings around the origin, builds the
//! neighbor rings of every point and writes the four table kinds described in
//! [`super::persist`].

use std::collections::HashMap;
use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::coords::AxialCoord;
use crate::error::{GridError, Result};
use crate::topology::TopologyKind;
use crate::workflow::{LoopCursor, LoopSettings, Phase, Progress, StepStatus, Workflow};

use super::persist::{self, TableWriter};
use super::{GridParams, GridPoint, NeighborRing};

const W_SPIRAL_CENTER: f64 = 0.25;
const W_SPIRAL_NEIGHBORS: f64 = 0.4;
const W_WRITE_POINTS: f64 = 0.1;
const W_WRITE_NEIGHBORS: f64 = 0.15;
const W_WRITE_INDICES: f64 = 0.05;
const W_WRITE_PARAMS: f64 = 0.05;

/// What grid to create and where to put it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreatorConfig {
    pub topology: TopologyKind,
    pub grid_range: i32,
    pub neighbor_range: i32,
    pub tile_size: f64,
    pub dir: PathBuf,
    /// Append the tile size to `Params.data`.
    pub record_tile_size: bool,
}

impl CreatorConfig {
    /// Hex grid the game units walk on.
    pub fn game_grid() -> Self {
        Self {
            topology: TopologyKind::Hex,
            grid_range: 300,
            neighbor_range: 4,
            tile_size: 400.0,
            dir: PathBuf::from("Data/GameGrid/"),
            record_tile_size: true,
        }
    }

    /// Quad grid the terrain mesh is sampled on.
    pub fn terrain_grid() -> Self {
        Self {
            topology: TopologyKind::Quad,
            grid_range: 505,
            neighbor_range: 3,
            tile_size: 500.0,
            dir: PathBuf::from("Data/TerrainGrid/"),
            record_tile_size: true,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CreatorState {
    InitWorkflow,
    SpiralCreateCenter,
    SpiralCreateNeighbors,
    WritePoints,
    WritePointsNeighbor,
    WritePointIndices,
    WriteParams,
    Done,
    Error,
}

/// Builds and persists one grid.
pub struct GridCreator {
    name: String,
    config: CreatorConfig,
    settings: LoopSettings,
    state: CreatorState,
    cursor: LoopCursor,
    progress: Progress,
    points: Vec<GridPoint>,
    indices: HashMap<AxialCoord, usize>,
    walker: AxialCoord,
    ring_open: bool,
    writer: Option<TableWriter>,
    error: Option<GridError>,
    failed_at: Option<CreatorState>,
}

impl GridCreator {
    pub fn new(name: &str, config: CreatorConfig, settings: LoopSettings) -> Self {
        Self {
            name: name.to_string(),
            config,
            settings,
            state: CreatorState::InitWorkflow,
            cursor: LoopCursor::new(&settings),
            progress: Progress::default(),
            points: Vec::new(),
            indices: HashMap::new(),
            walker: AxialCoord::default(),
            ring_open: false,
            writer: None,
            error: None,
            failed_at: None,
        }
    }

    pub fn state(&self) -> CreatorState {
        self.state
    }

    pub fn config(&self) -> &CreatorConfig {
        &self.config
    }

    /// Points built so far, in spiral order.
    pub fn points(&self) -> &[GridPoint] {
        &self.points
    }

    fn advance(&mut self, next: CreatorState, weight: f64) -> Phase {
        info!("{}: {:?} done", self.name, self.state);
        self.cursor.reset();
        self.progress.finish_phase(weight);
        self.state = next;
        Phase::Complete
    }

    fn init_workflow(&mut self) -> Result<Phase> {
        if self.config.grid_range < 0 || self.config.neighbor_range < 0 {
            return Err(GridError::Config(format!(
                "grid range {} and neighbor range {} must not be negative",
                self.config.grid_range, self.config.neighbor_range
            )));
        }
        if self.config.tile_size <= 0.0 {
            return Err(GridError::Config(format!(
                "tile size {} must be positive",
                self.config.tile_size
            )));
        }
        self.cursor.validate_depth(4)?;
        self.progress.reset();
        self.cursor.reset();
        self.state = CreatorState::SpiralCreateCenter;
        Ok(Phase::Complete)
    }

    fn add_point(&mut self, coord: AxialCoord, ring: i32) {
        let topo = self.config.topology.topology();
        let index = self.points.len();
        self.points.push(GridPoint {
            axial_coord: coord,
            position: topo.position(coord, self.config.tile_size),
            range_from_center: ring,
            ..GridPoint::default()
        });
        self.indices.insert(coord, index);
    }

    fn spiral_create_center(&mut self, budget: usize) -> Result<Phase> {
        let topo = self.config.topology.topology();
        let center = AxialCoord::new(0, 0);
        let range = self.config.grid_range as usize;
        let sectors = topo.sectors();
        let total = sectors * (1 + range) * range / 2;

        if !self.cursor.is_initialized() {
            self.cursor.mark_initialized();
            self.points.clear();
            self.indices.clear();
            self.ring_open = false;
            self.add_point(center, 0);
        }

        self.cursor.resume(budget);
        let mut r = self.cursor.begin(0).max(1);
        while r <= range {
            if !self.ring_open {
                self.ring_open = true;
                self.walker = topo.init_ring(center, r as i32);
            }
            let mut j = self.cursor.begin(1);
            while j < sectors {
                let mut k = self.cursor.begin(2);
                while k < r {
                    if self.cursor.checkpoint(&[r, j, k]) {
                        self.progress.update(self.cursor.count(), total, W_SPIRAL_CENTER);
                        return Ok(Phase::Paused);
                    }
                    self.add_point(self.walker, r as i32);
                    self.walker = topo.find_neighbor_of_ring(self.walker, j);
                    k += 1;
                }
                j += 1;
            }
            self.ring_open = false;
            r += 1;
        }
        Ok(self.advance(CreatorState::SpiralCreateNeighbors, W_SPIRAL_CENTER))
    }

    fn spiral_create_neighbors(&mut self, budget: usize) -> Result<Phase> {
        let topo = self.config.topology.topology();
        let nr = self.config.neighbor_range as usize;
        let sectors = topo.sectors();
        let total = self.points.len() * sectors * (1 + nr) * nr / 2;

        if !self.cursor.is_initialized() {
            self.cursor.mark_initialized();
            self.ring_open = false;
            for p in &mut self.points {
                p.neighbors.clear();
            }
        }

        self.cursor.resume(budget);
        let mut p = self.cursor.begin(0);
        while p < self.points.len() {
            let center = self.points[p].axial_coord;
            let mut i = self.cursor.begin(1).max(1);
            while i <= nr {
                if !self.ring_open {
                    self.ring_open = true;
                    self.points[p].neighbors.push(NeighborRing::new(i as i32, Vec::new()));
                    self.walker = topo.init_ring(center, i as i32);
                }
                let mut j = self.cursor.begin(2);
                while j < sectors {
                    let mut k = self.cursor.begin(3);
                    while k < i {
                        if self.cursor.checkpoint(&[p, i, j, k]) {
                            self.progress.update(self.cursor.count(), total, W_SPIRAL_NEIGHBORS);
                            return Ok(Phase::Paused);
                        }
                        if self.indices.contains_key(&self.walker) {
                            if let Some(ring) = self.points[p].neighbors.last_mut() {
                                ring.points.push(self.walker);
                                ring.count = ring.points.len();
                            }
                        }
                        self.walker = topo.find_neighbor_of_ring(self.walker, j);
                        k += 1;
                    }
                    j += 1;
                }
                self.ring_open = false;
                i += 1;
            }
            p += 1;
        }
        Ok(self.advance(CreatorState::WritePoints, W_SPIRAL_NEIGHBORS))
    }

    fn open_writer(&mut self, name: &str) -> Result<()> {
        if self.writer.is_none() {
            self.writer = Some(TableWriter::create(&self.config.dir, name)?);
        }
        Ok(())
    }

    fn close_writer(&mut self) -> Result<()> {
        match self.writer.take() {
            Some(w) => w.finish(),
            None => Ok(()),
        }
    }

    /// Write one line per point through `line`, resumable at point granularity.
    fn write_point_table(
        &mut self,
        budget: usize,
        file: &str,
        weight: f64,
        line: impl Fn(usize, &GridPoint) -> String,
    ) -> Result<Phase> {
        if !self.cursor.is_initialized() {
            self.cursor.mark_initialized();
            self.writer = None;
        }
        self.open_writer(file)?;

        self.cursor.resume(budget);
        let total = self.points.len();
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, weight);
                return Ok(Phase::Paused);
            }
            let text = line(i, &self.points[i]);
            if let Some(w) = self.writer.as_mut() {
                w.write_line(&text)?;
            }
            i += 1;
        }
        self.close_writer()?;
        Ok(Phase::Complete)
    }

    fn write_points(&mut self, budget: usize) -> Result<Phase> {
        match self.write_point_table(budget, persist::POINTS_FILE, W_WRITE_POINTS, |_, p| {
            persist::point_line(p)
        })? {
            Phase::Complete => Ok(self.advance(CreatorState::WritePointsNeighbor, W_WRITE_POINTS)),
            Phase::Paused => Ok(Phase::Paused),
        }
    }

    fn write_neighbors(&mut self, budget: usize) -> Result<Phase> {
        let nr = self.config.neighbor_range as usize;
        let total = self.points.len() * nr;

        if !self.cursor.is_initialized() {
            self.cursor.mark_initialized();
            self.writer = None;
        }

        self.cursor.resume(budget);
        let mut r = self.cursor.begin(0).max(1);
        while r <= nr {
            self.open_writer(&persist::neighbor_file(r as i32))?;
            let mut i = self.cursor.begin(1);
            while i < self.points.len() {
                if self.cursor.checkpoint(&[r, i]) {
                    self.progress.update(self.cursor.count(), total, W_WRITE_NEIGHBORS);
                    return Ok(Phase::Paused);
                }
                let text = self.points[i]
                    .neighbors
                    .get(r - 1)
                    .map(|ring| persist::neighbor_line(&ring.points))
                    .unwrap_or_default();
                if let Some(w) = self.writer.as_mut() {
                    w.write_line(&text)?;
                }
                i += 1;
            }
            self.close_writer()?;
            r += 1;
        }
        Ok(self.advance(CreatorState::WritePointIndices, W_WRITE_NEIGHBORS))
    }

    fn write_point_indices(&mut self, budget: usize) -> Result<Phase> {
        match self.write_point_table(budget, persist::POINT_INDICES_FILE, W_WRITE_INDICES, |i, p| {
            persist::point_index_line(p.axial_coord, i)
        })? {
            Phase::Complete => Ok(self.advance(CreatorState::WriteParams, W_WRITE_INDICES)),
            Phase::Paused => Ok(Phase::Paused),
        }
    }

    fn write_params(&mut self) -> Result<Phase> {
        let params = GridParams {
            grid_range: self.config.grid_range,
            neighbor_range: self.config.neighbor_range,
            points_num: self.points.len(),
            tile_size: self.config.record_tile_size.then_some(self.config.tile_size),
        };
        let mut w = TableWriter::create(&self.config.dir, persist::PARAMS_FILE)?;
        w.write_line(&persist::params_line(&params))?;
        w.finish()?;
        Ok(self.advance(CreatorState::Done, W_WRITE_PARAMS))
    }

    fn fail(&mut self, err: GridError) -> StepStatus {
        warn!("{}: {:?} failed: {}", self.name, self.state, err);
        self.writer = None;
        self.error = Some(err);
        self.failed_at = Some(self.state);
        self.state = CreatorState::Error;
        StepStatus::Error
    }
}

impl Workflow<()> for GridCreator {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self, _ctx: &(), budget: usize) -> StepStatus {
        let result = match self.state {
            CreatorState::InitWorkflow => self.init_workflow(),
            CreatorState::SpiralCreateCenter => self.spiral_create_center(budget),
            CreatorState::SpiralCreateNeighbors => self.spiral_create_neighbors(budget),
            CreatorState::WritePoints => self.write_points(budget),
            CreatorState::WritePointsNeighbor => self.write_neighbors(budget),
            CreatorState::WritePointIndices => self.write_point_indices(budget),
            CreatorState::WriteParams => self.write_params(),
            CreatorState::Done => return StepStatus::Done,
            CreatorState::Error => return StepStatus::Error,
        };
        match result {
            Ok(Phase::Complete) if self.state == CreatorState::Done => {
                info!("{}: grid data created in {}", self.name, self.config.dir.display());
                StepStatus::Done
            }
            Ok(Phase::Complete) => StepStatus::Continue,
            Ok(Phase::Paused) => StepStatus::Yield {
                delay: self.settings.delay(),
            },
            Err(e) => self.fail(e),
        }
    }

    fn progress(&self) -> f64 {
        self.progress.value()
    }

    fn is_loading_completed(&self) -> bool {
        self.state == CreatorState::Done
    }

    fn last_error(&self) -> Option<&GridError> {
        self.error.as_ref()
    }

    fn state_label(&self) -> String {
        format!("{:?}", self.failed_at.unwrap_or(self.state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::drive;

    fn config(dir: &std::path::Path, kind: TopologyKind, range: i32, nr: i32) -> CreatorConfig {
        CreatorConfig {
            topology: kind,
            grid_range: range,
            neighbor_range: nr,
            tile_size: 10.0,
            dir: dir.to_path_buf(),
            record_tile_size: true,
        }
    }

    fn settings(limit: usize) -> LoopSettings {
        LoopSettings {
            count_limit: limit,
            rate: 0.0,
            ..LoopSettings::default()
        }
    }

    #[test]
    fn test_spiral_order_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut creator = GridCreator::new("hex", config(dir.path(), TopologyKind::Hex, 2, 1), settings(4));
        drive(&mut creator, &(), &settings(4), |_| {}).unwrap();

        assert!(creator.is_loading_completed());
        assert_eq!(creator.points().len(), 19);
        assert_eq!(creator.points()[0].axial_coord, AxialCoord::new(0, 0));
        // First ring starts at direction 4 scaled by the radius.
        assert_eq!(creator.points()[1].axial_coord, AxialCoord::new(-1, 1));
        assert!(creator.points()[1..7].iter().all(|p| p.range_from_center == 1));

        let params = persist::read_lines(&dir.path().join(persist::PARAMS_FILE)).unwrap();
        assert_eq!(params, vec!["2|1|19|10.00".to_string()]);
        for file in [persist::POINTS_FILE, persist::POINT_INDICES_FILE, "N1.data"] {
            assert_eq!(persist::read_lines(&dir.path().join(file)).unwrap().len(), 19, "{}", file);
        }
        assert!((creator.progress() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_budget_does_not_change_output() {
        let small = tempfile::tempdir().unwrap();
        let large = tempfile::tempdir().unwrap();
        let mut a = GridCreator::new("a", config(small.path(), TopologyKind::Quad, 4, 2), settings(1));
        let mut b = GridCreator::new("b", config(large.path(), TopologyKind::Quad, 4, 2), settings(10_000));
        drive(&mut a, &(), &settings(1), |_| {}).unwrap();
        drive(&mut b, &(), &settings(10_000), |_| {}).unwrap();

        assert_eq!(a.points(), b.points());
        for file in [persist::POINTS_FILE, "N1.data", "N2.data"] {
            assert_eq!(
                persist::read_lines(&small.path().join(file)).unwrap(),
                persist::read_lines(&large.path().join(file)).unwrap()
            );
        }
    }

    #[test]
    fn test_neighbors_only_reference_grid_points() {
        let dir = tempfile::tempdir().unwrap();
        let mut creator = GridCreator::new("quad", config(dir.path(), TopologyKind::Quad, 3, 2), settings(50));
        drive(&mut creator, &(), &settings(50), |_| {}).unwrap();

        let coords: std::collections::HashSet<_> = creator.points().iter().map(|p| p.axial_coord).collect();
        for p in creator.points() {
            assert_eq!(p.neighbors.len(), 2);
            for (ring_index, ring) in p.neighbors.iter().enumerate() {
                assert_eq!(ring.radius, ring_index as i32 + 1);
                assert_eq!(ring.count, ring.points.len());
                assert!(ring.points.iter().all(|c| coords.contains(c)));
            }
        }
        let center = &creator.points()[0];
        assert_eq!(center.neighbors[0].count, 4);
        assert_eq!(center.neighbors[1].count, 8);
    }

    #[test]
    fn test_invalid_config_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), TopologyKind::Hex, 2, 1);
        cfg.tile_size = 0.0;
        let mut creator = GridCreator::new("bad", cfg, settings(10));
        assert_eq!(creator.step(&(), 10), StepStatus::Error);
        assert!(matches!(creator.last_error(), Some(GridError::Config(_))));
        // Terminal state is absorbing.
        assert_eq!(creator.step(&(), 10), StepStatus::Error);
        assert_eq!(creator.state(), CreatorState::Error);
    }

    #[test]
    fn test_presets() {
        let game = CreatorConfig::game_grid();
        assert_eq!(game.topology, TopologyKind::Hex);
        assert_eq!(game.grid_range, 300);
        let terrain = CreatorConfig::terrain_grid();
        assert_eq!(terrain.topology, TopologyKind::Quad);
        assert_eq!(terrain.neighbor_range, 3);
    }
}
