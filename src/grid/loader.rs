//! Grid loading workflow.
//!
//! Reads the tables written by [`super::creator::GridCreator`] back into a
//! [`GridDataset`]. Each table is read whole when its phase starts; parsing
//! then proceeds one line per cursor tick.

use std::collections::HashMap;
use std::path::PathBuf;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::coords::AxialCoord;
use crate::error::{GridError, Result};
use crate::topology::TopologyKind;
use crate::workflow::{LoopCursor, LoopSettings, Phase, Progress, StepStatus, Workflow};

use super::persist;
use super::{GridDataset, GridParams, GridPoint};

const W_LOAD_PARAMS: f64 = 0.02;
const W_LOAD_POINT_INDICES: f64 = 0.18;
const W_LOAD_POINTS: f64 = 0.3;
const W_LOAD_NEIGHBORS: f64 = 0.4;
const W_CREATE_VERTICES: f64 = 0.1;

/// Where a grid lives and how its header looks.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub dir: PathBuf,
    pub topology: TopologyKind,
    /// Header carries a fourth `TileSize` field.
    pub expect_tile_size: bool,
    /// Tile size used when the header has none.
    pub default_tile_size: f64,
}

impl LoaderConfig {
    pub fn game_grid() -> Self {
        Self {
            dir: PathBuf::from("Data/GameGrid/"),
            topology: TopologyKind::Hex,
            expect_tile_size: true,
            default_tile_size: 400.0,
        }
    }

    pub fn terrain_grid() -> Self {
        Self {
            dir: PathBuf::from("Data/TerrainGrid/"),
            topology: TopologyKind::Quad,
            expect_tile_size: true,
            default_tile_size: 500.0,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LoaderState {
    InitWorkflow,
    LoadParams,
    InitProgress,
    LoadPointIndices,
    LoadPoints,
    LoadNeighbors,
    CreatePointsVertices,
    Done,
    Error,
}

/// Loads one persisted grid.
pub struct GridLoader {
    name: String,
    config: LoaderConfig,
    settings: LoopSettings,
    state: LoaderState,
    cursor: LoopCursor,
    progress: Progress,
    params: Option<GridParams>,
    tile_size: f64,
    /// Lines of the table the current phase is parsing.
    table: Vec<String>,
    table_radius: Option<usize>,
    indices: HashMap<AxialCoord, usize>,
    points: Vec<GridPoint>,
    dataset: Option<GridDataset>,
    error: Option<GridError>,
    failed_at: Option<LoaderState>,
}

impl GridLoader {
    pub fn new(name: &str, config: LoaderConfig, settings: LoopSettings) -> Self {
        let tile_size = config.default_tile_size;
        Self {
            name: name.to_string(),
            config,
            settings,
            state: LoaderState::InitWorkflow,
            cursor: LoopCursor::new(&settings),
            progress: Progress::default(),
            params: None,
            tile_size,
            table: Vec::new(),
            table_radius: None,
            indices: HashMap::new(),
            points: Vec::new(),
            dataset: None,
            error: None,
            failed_at: None,
        }
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    /// The loaded grid, once `Done`.
    pub fn dataset(&self) -> Option<&GridDataset> {
        self.dataset.as_ref()
    }

    pub fn into_dataset(self) -> Option<GridDataset> {
        self.dataset
    }

    fn points_num(&self) -> usize {
        self.params.map_or(0, |p| p.points_num)
    }

    fn advance(&mut self, next: LoaderState, weight: f64) -> Phase {
        info!("{}: {:?} done", self.name, self.state);
        self.cursor.reset();
        self.table.clear();
        self.table_radius = None;
        self.progress.finish_phase(weight);
        self.state = next;
        Phase::Complete
    }

    /// Read a whole table and check it has one line per point.
    fn read_table(&self, file: &str) -> Result<Vec<String>> {
        let mut lines = persist::read_lines(&self.config.dir.join(file))?;
        // A trailing empty line only counts when the table needs it.
        while lines.len() > self.points_num() && lines.last().map_or(false, |l| l.is_empty()) {
            lines.pop();
        }
        if lines.len() != self.points_num() {
            return Err(GridError::LineCount {
                file: file.to_string(),
                expected: self.points_num(),
                found: lines.len(),
            });
        }
        Ok(lines)
    }

    fn init_workflow(&mut self) -> Result<Phase> {
        self.cursor.validate_depth(2)?;
        self.progress.reset();
        self.cursor.reset();
        self.params = None;
        self.indices.clear();
        self.points.clear();
        self.dataset = None;
        self.state = LoaderState::LoadParams;
        Ok(Phase::Complete)
    }

    fn load_params(&mut self) -> Result<Phase> {
        let lines = persist::read_lines(&self.config.dir.join(persist::PARAMS_FILE))?;
        let first = lines.first().ok_or_else(|| GridError::ParamFieldCount {
            expected: if self.config.expect_tile_size { 4 } else { 3 },
            found: 0,
        })?;
        let params = persist::parse_params(first, self.config.expect_tile_size)?;
        self.tile_size = params.tile_size.unwrap_or(self.config.default_tile_size);
        if self.tile_size <= 0.0 {
            return Err(GridError::Config(format!("tile size {} must be positive", self.tile_size)));
        }
        self.params = Some(params);
        Ok(self.advance(LoaderState::InitProgress, W_LOAD_PARAMS))
    }

    fn init_progress(&mut self) -> Result<Phase> {
        if let Some(params) = self.params {
            let expected = self.config.topology.topology().point_count(params.grid_range);
            if expected != params.points_num {
                warn!(
                    "{}: {} points declared, a full {} grid of range {} has {}",
                    self.name, params.points_num, self.config.topology, params.grid_range, expected
                );
            }
            self.points.reserve(params.points_num);
            self.indices.reserve(params.points_num);
        }
        Ok(self.advance(LoaderState::LoadPointIndices, 0.0))
    }

    fn load_point_indices(&mut self, budget: usize) -> Result<Phase> {
        if !self.cursor.is_initialized() {
            self.table = self.read_table(persist::POINT_INDICES_FILE)?;
            self.cursor.mark_initialized();
        }
        let total = self.points_num();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_LOAD_POINT_INDICES);
                return Ok(Phase::Paused);
            }
            let (coord, index) = persist::parse_point_index(&self.table[i], i)?;
            if index != i {
                return Err(GridError::parse(
                    persist::POINT_INDICES_FILE,
                    i,
                    format!("index {} out of order", index),
                ));
            }
            if self.indices.insert(coord, index).is_some() {
                return Err(GridError::parse(
                    persist::POINT_INDICES_FILE,
                    i,
                    format!("duplicate coordinate {}", coord),
                ));
            }
            i += 1;
        }
        Ok(self.advance(LoaderState::LoadPoints, W_LOAD_POINT_INDICES))
    }

    fn load_points(&mut self, budget: usize) -> Result<Phase> {
        if !self.cursor.is_initialized() {
            self.table = self.read_table(persist::POINTS_FILE)?;
            self.points.clear();
            self.cursor.mark_initialized();
        }
        let total = self.points_num();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_LOAD_POINTS);
                return Ok(Phase::Paused);
            }
            let point = persist::parse_point(&self.table[i], i)?;
            if self.indices.get(&point.axial_coord) != Some(&i) {
                return Err(GridError::MissingCoordinate(point.axial_coord));
            }
            self.points.push(point);
            i += 1;
        }
        Ok(self.advance(LoaderState::LoadNeighbors, W_LOAD_POINTS))
    }

    fn load_neighbors(&mut self, budget: usize) -> Result<Phase> {
        let nr = self.params.map_or(0, |p| p.neighbor_range.max(0) as usize);
        let total = self.points_num() * nr;
        if !self.cursor.is_initialized() {
            for p in &mut self.points {
                p.neighbors.clear();
            }
            self.cursor.mark_initialized();
        }

        self.cursor.resume(budget);
        let mut r = self.cursor.begin(0).max(1);
        while r <= nr {
            if self.table_radius != Some(r) {
                self.table = self.read_table(&persist::neighbor_file(r as i32))?;
                self.table_radius = Some(r);
            }
            let mut i = self.cursor.begin(1);
            while i < self.points.len() {
                if self.cursor.checkpoint(&[r, i]) {
                    self.progress.update(self.cursor.count(), total, W_LOAD_NEIGHBORS);
                    return Ok(Phase::Paused);
                }
                let indices = &self.indices;
                let ring = persist::parse_neighbor_line(&self.table[i], r as i32, i, |c| {
                    indices.contains_key(&c)
                })?;
                self.points[i].neighbors.push(ring);
                i += 1;
            }
            r += 1;
        }
        Ok(self.advance(LoaderState::CreatePointsVertices, W_LOAD_NEIGHBORS))
    }

    fn create_points_vertices(&mut self, budget: usize) -> Result<Phase> {
        let topo = self.config.topology.topology();
        let total = self.points.len();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_CREATE_VERTICES);
                return Ok(Phase::Paused);
            }
            let p = &mut self.points[i];
            p.vertices = topo.vertices(p.position, self.tile_size);
            i += 1;
        }

        let params = self.params.ok_or_else(|| GridError::MissingCollaborator("grid params".into()))?;
        let points = std::mem::take(&mut self.points);
        self.indices.clear();
        self.dataset = Some(GridDataset::new(self.config.topology, params, self.tile_size, points));
        Ok(self.advance(LoaderState::Done, W_CREATE_VERTICES))
    }

    fn fail(&mut self, err: GridError) -> StepStatus {
        warn!("{}: {:?} failed: {}", self.name, self.state, err);
        self.error = Some(err);
        self.failed_at = Some(self.state);
        self.state = LoaderState::Error;
        StepStatus::Error
    }
}

impl Workflow<()> for GridLoader {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self, _ctx: &(), budget: usize) -> StepStatus {
        let result = match self.state {
            LoaderState::InitWorkflow => self.init_workflow(),
            LoaderState::LoadParams => self.load_params(),
            LoaderState::InitProgress => self.init_progress(),
            LoaderState::LoadPointIndices => self.load_point_indices(budget),
            LoaderState::LoadPoints => self.load_points(budget),
            LoaderState::LoadNeighbors => self.load_neighbors(budget),
            LoaderState::CreatePointsVertices => self.create_points_vertices(budget),
            LoaderState::Done => return StepStatus::Done,
            LoaderState::Error => return StepStatus::Error,
        };
        match result {
            Ok(Phase::Complete) if self.state == LoaderState::Done => {
                info!("{}: loaded {} points", self.name, self.dataset.as_ref().map_or(0, |d| d.len()));
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
        self.state == LoaderState::Done
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
    use crate::grid::creator::{CreatorConfig, GridCreator};
    use crate::workflow::drive;
    use std::fs;
    use std::path::Path;

    fn settings(limit: usize) -> LoopSettings {
        LoopSettings {
            count_limit: limit,
            rate: 0.0,
            ..LoopSettings::default()
        }
    }

    fn create(dir: &Path, kind: TopologyKind, range: i32, nr: i32) -> Vec<GridPoint> {
        let config = CreatorConfig {
            topology: kind,
            grid_range: range,
            neighbor_range: nr,
            tile_size: 100.0,
            dir: dir.to_path_buf(),
            record_tile_size: true,
        };
        let mut creator = GridCreator::new("creator", config, settings(64));
        drive(&mut creator, &(), &settings(64), |_| {}).unwrap();
        creator.points().to_vec()
    }

    fn loader(dir: &Path, kind: TopologyKind) -> GridLoader {
        let config = LoaderConfig {
            dir: dir.to_path_buf(),
            topology: kind,
            expect_tile_size: true,
            default_tile_size: 1.0,
        };
        GridLoader::new("loader", config, settings(7))
    }

    #[test]
    fn test_roundtrip_through_files() {
        let dir = tempfile::tempdir().unwrap();
        let created = create(dir.path(), TopologyKind::Hex, 3, 2);

        let mut l = loader(dir.path(), TopologyKind::Hex);
        drive(&mut l, &(), &settings(7), |_| {}).unwrap();
        assert!(l.is_loading_completed());
        assert!((l.progress() - 1.0).abs() < 1e-9);

        let ds = l.into_dataset().unwrap();
        assert_eq!(ds.len(), 37);
        assert_eq!(ds.tile_size, 100.0);
        assert!(ds.is_consistent());
        for (a, b) in created.iter().zip(ds.points()) {
            assert_eq!(a.axial_coord, b.axial_coord);
            assert_eq!(a.neighbors, b.neighbors);
            assert_eq!(a.range_from_center, b.range_from_center);
            assert!((a.position.x - b.position.x).abs() <= 0.005 + 1e-9);
            assert!((a.position.y - b.position.y).abs() <= 0.005 + 1e-9);
            assert_eq!(b.vertices.len(), 6);
        }
    }

    #[test]
    fn test_missing_tile_size_field() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path(), TopologyKind::Quad, 2, 1);
        fs::write(dir.path().join(persist::PARAMS_FILE), "2|1|13\n").unwrap();

        let mut l = loader(dir.path(), TopologyKind::Quad);
        let err = drive(&mut l, &(), &settings(7), |_| {}).unwrap_err();
        assert!(matches!(err, GridError::Workflow { ref step, .. } if step == "LoadParams"));
        assert!(matches!(
            l.last_error(),
            Some(GridError::ParamFieldCount { expected: 4, found: 3 })
        ));
        assert!(l.dataset().is_none());
    }

    #[test]
    fn test_header_without_tile_size_uses_default() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path(), TopologyKind::Quad, 2, 1);
        fs::write(dir.path().join(persist::PARAMS_FILE), "2|1|13\n").unwrap();

        let config = LoaderConfig {
            dir: dir.path().to_path_buf(),
            topology: TopologyKind::Quad,
            expect_tile_size: false,
            default_tile_size: 100.0,
        };
        let mut l = GridLoader::new("loader", config, settings(100));
        drive(&mut l, &(), &settings(100), |_| {}).unwrap();
        let ds = l.dataset().unwrap();
        assert_eq!(ds.params.tile_size, None);
        assert_eq!(ds.tile_size, 100.0);
    }

    #[test]
    fn test_missing_neighbor_file() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path(), TopologyKind::Hex, 2, 2);
        fs::remove_file(dir.path().join("N2.data")).unwrap();

        let mut l = loader(dir.path(), TopologyKind::Hex);
        assert!(drive(&mut l, &(), &settings(7), |_| {}).is_err());
        assert_eq!(l.state(), LoaderState::Error);
        assert!(matches!(l.last_error(), Some(GridError::MissingFile(_))));
    }

    #[test]
    fn test_short_points_table() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path(), TopologyKind::Hex, 2, 1);
        let path = dir.path().join(persist::POINTS_FILE);
        let lines = persist::read_lines(&path).unwrap();
        fs::write(&path, lines[..18].join("\n")).unwrap();

        let mut l = loader(dir.path(), TopologyKind::Hex);
        assert!(drive(&mut l, &(), &settings(7), |_| {}).is_err());
        assert!(matches!(
            l.last_error(),
            Some(GridError::LineCount { expected: 19, found: 18, .. })
        ));
    }

    #[test]
    fn test_unknown_neighbors_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        create(dir.path(), TopologyKind::Quad, 1, 1);
        let path = dir.path().join("N1.data");
        let mut lines = persist::read_lines(&path).unwrap();
        lines[0].push_str(" 40,40");
        fs::write(&path, lines.join("\n")).unwrap();

        let mut l = loader(dir.path(), TopologyKind::Quad);
        drive(&mut l, &(), &settings(7), |_| {}).unwrap();
        let center = &l.dataset().unwrap().points()[0].neighbors[0];
        assert_eq!(center.count, 4);
        assert!(!center.points.contains(&AxialCoord::new(40, 40)));
    }
}
