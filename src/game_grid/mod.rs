//! Game grid generation workflow.
//!
//! The game grid is a hex grid laid over a finished terrain. Each tile takes
//! its height, slope and terrain type from the terrain, may carry trees, and
//! gets three block levels (area, building, flying). Area and flying levels
//! are then checked for connectivity so that pockets of open ground cut off
//! from the main body are flagged as islands.

pub mod blocking;
pub mod trees;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::coords::Vec2;
use crate::error::{GridError, Result};
use crate::grid::GridDataset;
use crate::search::{sort_chunks_by_size, ChunkSearch, SearchProgress};
use crate::seeds::TerrainSeeds;
use crate::terrain::block::{base_block_level, extended_block_level, ExPasses};
use crate::terrain::classify::TerrainType;
use crate::terrain::mesh::{angle_to_up, cross, normalize, sub, Vec3, UP};
use crate::terrain::TerrainGenerator;
use crate::workflow::{LoopCursor, LoopSettings, Phase, Progress, StepStatus, Workflow};

use blocking::{check_island, chunks_connected, BlockKind, BlockParams};
use trees::{place_trees, tree_count, TreeParams, TreeRecord};

const W_CREATE_GRID_POINTS: f64 = 0.1;
const W_SET_POS_Z: f64 = 0.1;
const W_CAL_NORMAL: f64 = 0.1;
const W_TERRAIN_TYPE: f64 = 0.04;
const W_TERRAIN_TYPE_EDGE: f64 = 0.04;
const W_ADD_TREES: f64 = 0.01;
const W_AREA_BLOCK: f64 = 0.1;
const W_AREA_BLOCK_EX: f64 = 0.05;
const W_FIND_ISLAND: f64 = 0.05;
const W_BUILDING_BLOCK: f64 = 0.1;
const W_BUILDING_BLOCK_EX: f64 = 0.1;
const W_FLYING_BLOCK: f64 = 0.1;
const W_FLYING_BLOCK_EX: f64 = 0.05;
const W_FIND_FLYING_ISLAND: f64 = 0.05;

/// Per-tile game state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameGridPointData {
    pub grid_index: usize,
    /// Terrain height under the tile center.
    pub position_z: f64,
    /// Mean of the corner heights.
    pub avg_position_z: f64,
    pub position_z_ratio: f64,
    pub vertices_position_z: Vec<f64>,
    pub normal: [f64; 3],
    pub angle_to_up: f64,
    /// The tile center lies on the terrain mesh.
    pub in_terrain_range: bool,
    pub area_block_level: i32,
    pub area_connection: bool,
    pub flying_connection: bool,
    pub is_island: bool,
    pub flying_is_island: bool,
    pub building_block_level: i32,
    pub flying_block_level: i32,
    pub terrain_type: Option<TerrainType>,
    /// Distance to the nearest terrain type border, as a share of the ring count.
    pub terrain_type_edge_ratio: f64,
    pub tree_records: Vec<TreeRecord>,
}

impl Default for GameGridPointData {
    fn default() -> Self {
        Self {
            grid_index: 0,
            position_z: 0.0,
            avg_position_z: 0.0,
            position_z_ratio: 0.0,
            vertices_position_z: Vec::new(),
            normal: UP,
            angle_to_up: 0.0,
            in_terrain_range: false,
            area_block_level: 0,
            area_connection: true,
            flying_connection: true,
            is_island: false,
            flying_is_island: false,
            building_block_level: 0,
            flying_block_level: 0,
            terrain_type: None,
            terrain_type_edge_ratio: 1.0,
            tree_records: Vec::new(),
        }
    }
}

impl GameGridPointData {
    pub fn block_level(&self, kind: BlockKind) -> i32 {
        match kind {
            BlockKind::Area => self.area_block_level,
            BlockKind::Building => self.building_block_level,
            BlockKind::Flying => self.flying_block_level,
        }
    }

    fn set_block_level(&mut self, kind: BlockKind, level: i32) {
        match kind {
            BlockKind::Area => self.area_block_level = level,
            BlockKind::Building => self.building_block_level = level,
            BlockKind::Flying => self.flying_block_level = level,
        }
    }

    /// Connection flag used by the island check of `kind`.
    pub fn connection(&self, kind: BlockKind) -> bool {
        match kind {
            BlockKind::Flying => self.flying_connection,
            BlockKind::Area | BlockKind::Building => self.area_connection,
        }
    }

    pub fn island(&self, kind: BlockKind) -> bool {
        match kind {
            BlockKind::Flying => self.flying_is_island,
            BlockKind::Area | BlockKind::Building => self.is_island,
        }
    }

    fn set_island(&mut self, kind: BlockKind, is_island: bool) {
        match kind {
            BlockKind::Flying => self.flying_is_island = is_island,
            BlockKind::Area | BlockKind::Building => self.is_island = is_island,
        }
    }
}

/// Everything the game grid generator is tuned by.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameGridParams {
    /// Rings of the game grid to generate; clamped to the grid
    pub grid_range: i32,
    /// Seconds between polls while the terrain is still generating
    pub wait_terrain_rate: f64,
    pub blocking: BlockParams,
    pub trees: TreeParams,
}

impl Default for GameGridParams {
    fn default() -> Self {
        Self {
            grid_range: 100,
            wait_terrain_rate: 1.0,
            blocking: BlockParams::default(),
            trees: TreeParams::default(),
        }
    }
}

impl GameGridParams {
    pub fn validate(&self) -> Result<()> {
        if self.grid_range < 0 {
            return Err(GridError::Config(format!("game grid range {} is negative", self.grid_range)));
        }
        if self.wait_terrain_rate.is_nan() || self.wait_terrain_rate < 0.0 {
            return Err(GridError::Config(format!(
                "wait terrain rate {} must not be negative",
                self.wait_terrain_rate
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum GameGridState {
    InitWorkflow,
    CreateGridPoints,
    WaitTerrain,
    SetGridPosZ,
    CalGridNormal,
    SetGridTerrainType,
    SetGridTerrainTypeEdge,
    AddTreeInstances,
    SetGridAreaBlockLevel,
    SetGridAreaBlockLevelEx,
    CheckAreaConnection,
    BreakMaxAreaToChunks,
    CheckChunksAreaConnection,
    FindGridIsland,
    SetGridBuildingBlockLevel,
    SetGridBuildingBlockLevelEx,
    SetGridFlyingBlockLevel,
    SetGridFlyingBlockLevelEx,
    FindGridFlyingIsland,
    Done,
    Error,
}

/// Unit normal of a tile from its corner positions.
///
/// The corners are split into three interleaved thirds; each triple
/// `(i, i + k, i + 2k)` adds one triangle normal. Flat tiles with corners in
/// counter-clockwise order face up.
pub fn tile_normal(vertices: &[Vec3]) -> Vec3 {
    let k = vertices.len() / 3;
    let mut sum = [0.0; 3];
    for i in 0..k {
        let (v0, v1, v2) = (vertices[i], vertices[i + k], vertices[i + 2 * k]);
        let n = cross(sub(v2, v0), sub(v2, v1));
        for (s, value) in sum.iter_mut().zip(n) {
            *s += value;
        }
    }
    let n = normalize(sum);
    if n == [0.0; 3] {
        UP
    } else {
        n
    }
}

/// `radius / (neighbor_range + 1)` of the first ring holding a tile off the
/// terrain or a tile of another plain type; 1.0 when no ring does.
pub fn terrain_type_edge_ratio(
    ds: &GridDataset,
    index: usize,
    in_range: impl Fn(usize) -> Option<bool>,
    type_of: impl Fn(usize) -> Option<TerrainType>,
) -> f64 {
    let edge_max = (ds.params.neighbor_range + 1) as f64;
    let own = type_of(index);
    if let Some(point) = ds.point(index) {
        for ring in &point.neighbors {
            let hit = ring
                .points
                .iter()
                .filter_map(|c| ds.index_of(*c))
                .filter_map(|n| in_range(n).map(|r| (n, r)))
                .any(|(n, in_range)| {
                    if !in_range {
                        return true;
                    }
                    let other = type_of(n);
                    other != own && other.map_or(false, |t| t.is_plain())
                });
            if hit {
                return ring.radius as f64 / edge_max;
            }
        }
    }
    1.0
}

/// Builds the game grid over a finished terrain.
pub struct GameGridGenerator {
    name: String,
    params: GameGridParams,
    settings: LoopSettings,
    state: GameGridState,
    cursor: LoopCursor,
    progress: Progress,
    dataset: Arc<GridDataset>,
    /// Grid indices below this belong to the game grid.
    grid_len: usize,
    tree_seed: u64,
    rng: ChaCha8Rng,
    points: Vec<GameGridPointData>,
    /// Ceiling of each kind's block levels, indexed by `BlockKind`.
    level_max: [i32; 3],
    ex_passes: [ExPasses; 3],
    max_area_tiles: Vec<usize>,
    chunk_search: Option<ChunkSearch<usize>>,
    area_chunks: Vec<Vec<usize>>,
    reference_chunk: HashSet<usize>,
    error: Option<GridError>,
    failed_at: Option<GameGridState>,
}

impl GameGridGenerator {
    pub fn new(
        name: &str,
        dataset: Arc<GridDataset>,
        params: GameGridParams,
        seeds: &TerrainSeeds,
        settings: LoopSettings,
    ) -> Self {
        let ex_passes = Self::fresh_passes(&params.blocking);
        Self {
            name: name.to_string(),
            params,
            settings,
            state: GameGridState::InitWorkflow,
            cursor: LoopCursor::new(&settings),
            progress: Progress::default(),
            dataset,
            grid_len: 0,
            tree_seed: seeds.tree_placement,
            rng: ChaCha8Rng::seed_from_u64(seeds.tree_placement),
            points: Vec::new(),
            level_max: [0; 3],
            ex_passes,
            max_area_tiles: Vec::new(),
            chunk_search: None,
            area_chunks: Vec::new(),
            reference_chunk: HashSet::new(),
            error: None,
            failed_at: None,
        }
    }

    fn fresh_passes(blocking: &BlockParams) -> [ExPasses; 3] {
        let make = |kind: BlockKind| ExPasses::new(blocking.ex_times(kind), kind.ex_credit());
        [
            make(BlockKind::Area),
            make(BlockKind::Building),
            make(BlockKind::Flying),
        ]
    }

    pub fn state(&self) -> GameGridState {
        self.state
    }

    pub fn params(&self) -> &GameGridParams {
        &self.params
    }

    pub fn dataset(&self) -> &GridDataset {
        &self.dataset
    }

    pub fn points(&self) -> &[GameGridPointData] {
        &self.points
    }

    /// Highest block level of `kind` after its extension passes.
    pub fn level_max(&self, kind: BlockKind) -> i32 {
        self.level_max[kind as usize]
    }

    /// Tiles at the area level ceiling.
    pub fn max_area_tiles(&self) -> &[usize] {
        &self.max_area_tiles
    }

    /// Connected chunks of the max area tiles, largest first.
    pub fn area_chunks(&self) -> &[Vec<usize>] {
        &self.area_chunks
    }

    /// Tile data of the game cell containing `position`.
    pub fn point_at(&self, position: Vec2) -> Option<&GameGridPointData> {
        self.dataset
            .index_at_position(position)
            .and_then(|i| self.points.get(i))
    }

    // =========================================================================
    // PHASES
    // =========================================================================

    fn advance(&mut self, next: GameGridState, weight: f64) -> Phase {
        info!("{}: {:?} done", self.name, self.state);
        self.cursor.reset();
        self.progress.finish_phase(weight);
        self.state = next;
        Phase::Complete
    }

    fn init_workflow(&mut self) -> Result<Phase> {
        self.cursor.validate_depth(1)?;
        self.params.validate()?;
        self.progress.reset();
        self.cursor.reset();

        let range = self.params.grid_range.min(self.dataset.params.grid_range);
        self.grid_len = self.dataset.topology().point_count(range).min(self.dataset.len());
        if self.grid_len == 0 {
            return Err(GridError::MissingCollaborator("game grid points".into()));
        }

        self.points.clear();
        self.level_max = [0; 3];
        self.ex_passes = Self::fresh_passes(&self.params.blocking);
        self.max_area_tiles.clear();
        self.chunk_search = None;
        self.area_chunks.clear();
        self.reference_chunk.clear();
        debug!("{}: {} game tiles", self.name, self.grid_len);
        self.state = GameGridState::CreateGridPoints;
        Ok(Phase::Complete)
    }

    fn create_grid_points(&mut self, budget: usize) -> Result<Phase> {
        if !self.cursor.is_initialized() {
            self.points.clear();
            self.points.reserve(self.grid_len);
            self.cursor.mark_initialized();
        }
        let total = self.grid_len;
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_CREATE_GRID_POINTS);
                return Ok(Phase::Paused);
            }
            self.points.push(GameGridPointData {
                grid_index: i,
                ..GameGridPointData::default()
            });
            i += 1;
        }
        Ok(self.advance(GameGridState::WaitTerrain, W_CREATE_GRID_POINTS))
    }

    fn wait_terrain(&mut self, terrain: &TerrainGenerator) -> Result<Phase> {
        if terrain.is_loading_completed() {
            return Ok(self.advance(GameGridState::SetGridPosZ, 0.0));
        }
        if terrain.last_error().is_some() {
            return Err(GridError::Workflow {
                name: terrain.name().to_string(),
                step: terrain.state_label(),
            });
        }
        Ok(Phase::Paused)
    }

    fn set_grid_pos_z(&mut self, terrain: &TerrainGenerator, budget: usize) -> Result<Phase> {
        let total = self.points.len();
        let water_base = terrain.water_base();
        let altitude = terrain.tile_altitude_max();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_SET_POS_Z);
                return Ok(Phase::Paused);
            }
            let grid_point = &self.dataset.points()[i];
            let p = &mut self.points[i];
            if let Some(center) = terrain.terrain_point_at(grid_point.position) {
                p.position_z = center[2];
                p.position_z_ratio = center[2] / altitude;
                p.in_terrain_range = true;
            }
            let center_z = p.position_z;
            p.vertices_position_z = grid_point
                .vertices
                .iter()
                .map(|&v| match terrain.terrain_point_at(v) {
                    Some(corner) => corner[2].max(water_base),
                    None => center_z,
                })
                .collect();
            p.avg_position_z = if p.vertices_position_z.is_empty() {
                center_z
            } else {
                p.vertices_position_z.iter().sum::<f64>() / p.vertices_position_z.len() as f64
            };
            i += 1;
        }
        Ok(self.advance(GameGridState::CalGridNormal, W_SET_POS_Z))
    }

    fn cal_grid_normal(&mut self, budget: usize) -> Result<Phase> {
        let total = self.points.len();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_CAL_NORMAL);
                return Ok(Phase::Paused);
            }
            let grid_point = &self.dataset.points()[i];
            let p = &mut self.points[i];
            let corners: Vec<Vec3> = grid_point
                .vertices
                .iter()
                .zip(&p.vertices_position_z)
                .map(|(v, &z)| [v.x, v.y, z])
                .collect();
            p.normal = tile_normal(&corners);
            p.angle_to_up = angle_to_up(p.normal);
            i += 1;
        }
        Ok(self.advance(GameGridState::SetGridTerrainType, W_CAL_NORMAL))
    }

    fn set_grid_terrain_type(&mut self, terrain: &TerrainGenerator, budget: usize) -> Result<Phase> {
        let total = self.points.len();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_TERRAIN_TYPE);
                return Ok(Phase::Paused);
            }
            let position = self.dataset.points()[i].position;
            self.points[i].terrain_type = terrain.terrain_type_at(position);
            i += 1;
        }
        Ok(self.advance(GameGridState::SetGridTerrainTypeEdge, W_TERRAIN_TYPE))
    }

    fn set_grid_terrain_type_edge(&mut self, budget: usize) -> Result<Phase> {
        let total = self.points.len();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_TERRAIN_TYPE_EDGE);
                return Ok(Phase::Paused);
            }
            let points = &self.points;
            let ratio = terrain_type_edge_ratio(
                &self.dataset,
                i,
                |n| points.get(n).map(|p| p.in_terrain_range),
                |n| points.get(n).and_then(|p| p.terrain_type),
            );
            self.points[i].terrain_type_edge_ratio = ratio;
            i += 1;
        }
        Ok(self.advance(GameGridState::AddTreeInstances, W_TERRAIN_TYPE_EDGE))
    }

    fn add_tree_instances(&mut self, terrain: &TerrainGenerator, budget: usize) -> Result<Phase> {
        if !self.cursor.is_initialized() {
            self.rng = ChaCha8Rng::seed_from_u64(self.tree_seed);
            for p in &mut self.points {
                p.tree_records.clear();
            }
            self.cursor.mark_initialized();
        }
        let total = self.points.len();
        let edge_influence = self.params.trees.edge_influence;
        let radius = self.dataset.tile_size;
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_ADD_TREES);
                return Ok(Phase::Paused);
            }
            let position = self.dataset.points()[i].position;
            let p = &self.points[i];
            if p.in_terrain_range && terrain.has_tree_at(position) {
                let (terrain_type, edge_ratio, z) = (p.terrain_type, p.terrain_type_edge_ratio, p.position_z);
                let density = terrain_type.map_or(0.0, |t| terrain.tree_density(t));
                let count = tree_count(self.rng.gen::<f64>(), density, edge_ratio, edge_influence);
                let samples = terrain_type
                    .and_then(|t| self.params.trees.samples.get(&t))
                    .map_or(&[][..], Vec::as_slice);
                let records = place_trees(&mut self.rng, samples, count, position, z, radius);
                self.points[i].tree_records = records;
            }
            i += 1;
        }
        let planted: usize = self.points.iter().map(|p| p.tree_records.len()).sum();
        debug!("{}: {} trees placed", self.name, planted);
        Ok(self.advance(GameGridState::SetGridAreaBlockLevel, W_ADD_TREES))
    }

    fn set_block_level(&mut self, terrain: &TerrainGenerator, budget: usize, kind: BlockKind) -> Result<Phase> {
        let (weight, next) = match kind {
            BlockKind::Area => (W_AREA_BLOCK, GameGridState::SetGridAreaBlockLevelEx),
            BlockKind::Building => (W_BUILDING_BLOCK, GameGridState::SetGridBuildingBlockLevelEx),
            BlockKind::Flying => (W_FLYING_BLOCK, GameGridState::SetGridFlyingBlockLevelEx),
        };
        if !self.cursor.is_initialized() {
            self.level_max[kind as usize] = self.dataset.params.neighbor_range + 1;
            self.cursor.mark_initialized();
        }
        let total = self.points.len();
        let altitude = terrain.tile_altitude_max();
        let shallow = terrain.shallow_water_ratio();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, weight);
                return Ok(Phase::Paused);
            }
            let points = &self.points;
            let rules = &self.params.blocking;
            let level = base_block_level(
                &self.dataset,
                i,
                |n| n < total,
                |n| rules.is_blocked(kind, &points[n], altitude, shallow),
            );
            self.points[i].set_block_level(kind, level);
            i += 1;
        }
        Ok(self.advance(next, weight))
    }

    /// One extension pass per call; stays in this state until every pass ran.
    fn set_block_level_ex(&mut self, budget: usize, kind: BlockKind) -> Result<Phase> {
        let (weight, next) = match kind {
            BlockKind::Area => (W_AREA_BLOCK_EX, GameGridState::CheckAreaConnection),
            BlockKind::Building => (W_BUILDING_BLOCK_EX, GameGridState::SetGridFlyingBlockLevel),
            BlockKind::Flying => (W_FLYING_BLOCK_EX, GameGridState::FindGridFlyingIsland),
        };
        let slot = kind as usize;
        if self.ex_passes[slot].times == 0 {
            return Ok(self.advance(next, weight));
        }
        if !self.cursor.is_initialized() {
            self.level_max[slot] += self.dataset.params.neighbor_range;
            self.cursor.mark_initialized();
        }
        let total = self.points.len();
        let max = self.level_max[slot];
        let done_before = self.ex_passes[slot].current() * total;
        let all_passes = self.ex_passes[slot].times * total;
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(done_before + self.cursor.count(), all_passes, weight);
                return Ok(Phase::Paused);
            }
            let points = &self.points;
            let level = extended_block_level(&self.dataset, i, max, |n| n < total, |n| points[n].block_level(kind));
            self.points[i].set_block_level(kind, level);
            i += 1;
        }

        self.cursor.reset();
        let outcome = self.ex_passes[slot].finish_pass(&self.name);
        if outcome.credit {
            self.progress.finish_phase(weight);
        }
        if outcome.finished {
            info!("{}: {:?} done, {} block level max {}", self.name, self.state, kind, max);
            self.state = next;
        }
        Ok(Phase::Complete)
    }

    fn check_area_connection(&mut self) -> Result<Phase> {
        let max = self.level_max[BlockKind::Area as usize];
        self.max_area_tiles = self
            .points
            .iter()
            .enumerate()
            .filter(|(_, p)| p.area_block_level == max)
            .map(|(i, _)| i)
            .collect();
        self.chunk_search = None;
        self.area_chunks.clear();
        debug!("{}: {} max area block tiles", self.name, self.max_area_tiles.len());
        Ok(self.advance(GameGridState::BreakMaxAreaToChunks, 0.0))
    }

    fn break_max_area_to_chunks(&mut self, budget: usize) -> Result<Phase> {
        let seed = &self.max_area_tiles;
        let search = self
            .chunk_search
            .get_or_insert_with(|| ChunkSearch::new(seed.iter().copied()));

        let ds = &self.dataset;
        if search.run(budget, |c| ds.neighbor_indices(c, 0)) == SearchProgress::Paused {
            return Ok(Phase::Paused);
        }

        let mut chunks = self.chunk_search.take().map(ChunkSearch::into_chunks).unwrap_or_default();
        sort_chunks_by_size(&mut chunks);
        debug!("{}: {} max area block tile chunks", self.name, chunks.len());
        self.area_chunks = chunks;
        Ok(self.advance(GameGridState::CheckChunksAreaConnection, 0.0))
    }

    /// Every chunk but the largest must reach the largest one.
    fn check_chunks_area_connection(&mut self, budget: usize) -> Result<Phase> {
        if !self.cursor.is_initialized() {
            let reference = self
                .area_chunks
                .first()
                .ok_or_else(|| GridError::EmptyChunks("max area block tile chunks".into()))?;
            self.reference_chunk = reference.iter().copied().collect();
            self.cursor.mark_initialized();
        }
        let total = self.area_chunks.len();
        self.cursor.resume(budget);
        let mut k = self.cursor.begin(0).max(1);
        while k < total {
            if self.cursor.checkpoint(&[k]) {
                return Ok(Phase::Paused);
            }
            let points = &self.points;
            let connected = match self.area_chunks[k].first() {
                Some(&start) => chunks_connected(&self.dataset, start, &self.reference_chunk, |n| {
                    points.get(n).map_or(0, |p| p.area_block_level)
                }),
                None => true,
            };
            if !connected {
                debug!(
                    "{}: chunk {} of {} tiles is cut off",
                    self.name,
                    k,
                    self.area_chunks[k].len()
                );
                for &t in &self.area_chunks[k] {
                    self.points[t].area_connection = false;
                    self.points[t].flying_connection = false;
                }
            }
            k += 1;
        }
        Ok(self.advance(GameGridState::FindGridIsland, 0.0))
    }

    fn find_island(&mut self, budget: usize, kind: BlockKind) -> Result<Phase> {
        let (weight, next) = match kind {
            BlockKind::Flying => (W_FIND_FLYING_ISLAND, GameGridState::Done),
            BlockKind::Area | BlockKind::Building => (W_FIND_ISLAND, GameGridState::SetGridBuildingBlockLevel),
        };
        let total = self.points.len();
        let max = self.level_max[kind as usize];
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, weight);
                return Ok(Phase::Paused);
            }
            let points = &self.points;
            let check = check_island(
                &self.dataset,
                i,
                max,
                |n| points.get(n).map_or(0, |p| p.block_level(kind)),
                |n| points.get(n).map_or(false, |p| p.connection(kind)),
            );
            let p = &mut self.points[i];
            if let Some(level) = check.lowered_level {
                p.set_block_level(kind, level);
            }
            p.set_island(kind, check.is_island);
            i += 1;
        }
        let islands = self.points.iter().filter(|p| p.island(kind)).count();
        debug!("{}: {} {} island tiles", self.name, islands, kind);
        Ok(self.advance(next, weight))
    }

    fn fail(&mut self, err: GridError) -> StepStatus {
        warn!("{}: {:?} failed: {}", self.name, self.state, err);
        self.error = Some(err);
        self.failed_at = Some(self.state);
        self.state = GameGridState::Error;
        StepStatus::Error
    }
}

impl Workflow<TerrainGenerator> for GameGridGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self, terrain: &TerrainGenerator, budget: usize) -> StepStatus {
        let result = match self.state {
            GameGridState::InitWorkflow => self.init_workflow(),
            GameGridState::CreateGridPoints => self.create_grid_points(budget),
            GameGridState::WaitTerrain => self.wait_terrain(terrain),
            GameGridState::SetGridPosZ => self.set_grid_pos_z(terrain, budget),
            GameGridState::CalGridNormal => self.cal_grid_normal(budget),
            GameGridState::SetGridTerrainType => self.set_grid_terrain_type(terrain, budget),
            GameGridState::SetGridTerrainTypeEdge => self.set_grid_terrain_type_edge(budget),
            GameGridState::AddTreeInstances => self.add_tree_instances(terrain, budget),
            GameGridState::SetGridAreaBlockLevel => self.set_block_level(terrain, budget, BlockKind::Area),
            GameGridState::SetGridAreaBlockLevelEx => self.set_block_level_ex(budget, BlockKind::Area),
            GameGridState::CheckAreaConnection => self.check_area_connection(),
            GameGridState::BreakMaxAreaToChunks => self.break_max_area_to_chunks(budget),
            GameGridState::CheckChunksAreaConnection => self.check_chunks_area_connection(budget),
            GameGridState::FindGridIsland => self.find_island(budget, BlockKind::Area),
            GameGridState::SetGridBuildingBlockLevel => self.set_block_level(terrain, budget, BlockKind::Building),
            GameGridState::SetGridBuildingBlockLevelEx => self.set_block_level_ex(budget, BlockKind::Building),
            GameGridState::SetGridFlyingBlockLevel => self.set_block_level(terrain, budget, BlockKind::Flying),
            GameGridState::SetGridFlyingBlockLevelEx => self.set_block_level_ex(budget, BlockKind::Flying),
            GameGridState::FindGridFlyingIsland => self.find_island(budget, BlockKind::Flying),
            GameGridState::Done => return StepStatus::Done,
            GameGridState::Error => return StepStatus::Error,
        };
        match result {
            Ok(Phase::Complete) if self.state == GameGridState::Done => {
                self.progress.complete();
                info!(
                    "{}: game grid of {} tiles, {} area chunks",
                    self.name,
                    self.points.len(),
                    self.area_chunks.len()
                );
                StepStatus::Done
            }
            Ok(Phase::Complete) => StepStatus::Continue,
            Ok(Phase::Paused) if self.state == GameGridState::WaitTerrain => StepStatus::Yield {
                delay: Duration::from_secs_f64(self.params.wait_terrain_rate.max(0.0)),
            },
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
        self.state == GameGridState::Done
    }

    fn last_error(&self) -> Option<&GridError> {
        self.error.as_ref()
    }

    fn state_label(&self) -> String {
        format!("{:?}", self.failed_at.unwrap_or(self.state))
    }
}
