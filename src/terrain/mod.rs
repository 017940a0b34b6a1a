//! Terrain generation workflow.
//!
//! Turns a loaded quad (or hex) grid into a heightfield: layered noise gives
//! every tile a height ratio, block levels mark how far each tile is from
//! blocked high ground, rivers are routed and carved, and the mesh gets
//! triangles, vertex normals and climate attributes. Every phase is a
//! resumable loop driven by [`Workflow::step`].

pub mod block;
pub mod classify;
pub mod height;
pub mod mesh;
pub mod params;
pub mod river;

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::coords::{AxialCoord, Vec2};
use crate::error::{GridError, Result};
use crate::grid::GridDataset;
use crate::noise_layers::{NoiseLayers, TerrainNoise};
use crate::search::{sort_chunks_by_size, AStarSearch, ChunkSearch, SearchProgress};
use crate::seeds::TerrainSeeds;
use crate::workflow::{LoopCursor, LoopSettings, Phase, Progress, StepStatus, Workflow};

use block::{base_block_level, extended_block_level, ExCredit, ExPasses};
use classify::{classify, ClimateSampler, TerrainType};
use height::{gradient_ratio, map_range, water_bank};
use mesh::{accumulate_normal, angle_to_up, cell_triangles, normalize, Vec3};
use params::TerrainParams;
use river::{
    chunk_representative, combine_pool, direction_cost, next_depth_ratio, pair_end_points, Carver, NoiseRotation,
    RiverLine,
};

const W_CREATE_VERTICES: f64 = 0.05;
const W_REMAPPING_Z: f64 = 0.04;
const W_SET_BLOCK_LEVEL: f64 = 0.05;
const W_SET_BLOCK_LEVEL_EX: f64 = 0.05;
const W_ADD_RIVER_END_POINTS: f64 = 0.03;
const W_FIND_RIVER_LINES: f64 = 0.05;
const W_DIG_RIVER_LINE: f64 = 0.3;
const W_DIG_RIVER_POOL: f64 = 0.25;
const W_VERTEX_ATTRIBUTES: f64 = 0.05;
const W_CREATE_TRIANGLES: f64 = 0.05;
const W_NORMALS_INIT: f64 = 0.02;
const W_NORMALS_ACC: f64 = 0.04;
const W_NORMALIZE_NORMALS: f64 = 0.02;

/// Per-tile terrain state.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TerrainPointData {
    pub grid_index: usize,
    pub position_z: f64,
    pub position_z_ratio: f64,
    /// Shallowest bed ratio allowed next to blocked ground.
    pub river_block_z_ratio: f64,
    /// Pool layer; 0 where no pool was dug.
    pub river_pool_z_ratio: f64,
    pub block_level: i32,
    pub normal: [f64; 3],
    pub angle_to_up: f64,
}

/// Climate attributes of a mesh vertex, each in [0, 1].
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TerrainAttributes {
    pub altitude_std: f64,
    pub moisture: f64,
    pub temperature: f64,
    pub tree: f64,
}

/// Classification of one world position.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TerrainSample {
    pub terrain_type: TerrainType,
    pub moisture: f64,
    pub temperature: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TerrainState {
    InitWorkflow,
    CreateVertices,
    ReMappingZ,
    SetBlockLevel,
    SetBlockLevelEx,
    CreateRiver,
    AddRiverEndPoints,
    DivideUpperRiver,
    DivideLowerRiver,
    ChunkToOnePoint,
    CreateRiverLine,
    FindRiverLines,
    DigRiverLine,
    DigRiverPool,
    CombinePoolToTerrain,
    CreateVertexAttributes,
    CreateTriangles,
    CalNormalsInit,
    CalNormalsAcc,
    NormalizeNormals,
    Done,
    Error,
}

/// Builds the terrain over a loaded grid.
pub struct TerrainGenerator {
    name: String,
    params: TerrainParams,
    noise: TerrainNoise,
    settings: LoopSettings,
    state: TerrainState,
    cursor: LoopCursor,
    progress: Progress,
    dataset: Arc<GridDataset>,
    /// Grid indices below this belong to the mesh.
    mesh_len: usize,
    points: Vec<TerrainPointData>,
    attributes: Vec<TerrainAttributes>,
    z_ratio_max: f64,
    block_level_max: i32,
    ex_passes: ExPasses,
    upper_candidates: Vec<usize>,
    lower_candidates: Vec<usize>,
    chunk_search: Option<ChunkSearch<usize>>,
    upper_chunks: Vec<Vec<usize>>,
    lower_chunks: Vec<Vec<usize>>,
    upper_end_points: Vec<usize>,
    lower_end_points: Vec<usize>,
    river_lines: Vec<RiverLine>,
    path_search: Option<AStarSearch<usize>>,
    /// The current river line has been set up for digging.
    line_open: bool,
    depth_ratio: f64,
    block_tested: HashSet<usize>,
    triangles: Vec<[usize; 3]>,
    vertices: Vec<Vec3>,
    normal_acc: Vec<Vec3>,
    error: Option<GridError>,
    failed_at: Option<TerrainState>,
}

impl TerrainGenerator {
    pub fn new(
        name: &str,
        dataset: Arc<GridDataset>,
        params: TerrainParams,
        seeds: &TerrainSeeds,
        layers: &NoiseLayers,
        settings: LoopSettings,
    ) -> Self {
        let ex_passes = ExPasses::new(params.block_ex_times, ExCredit::AtEnd);
        Self {
            name: name.to_string(),
            noise: TerrainNoise::new(seeds, layers),
            params,
            settings,
            state: TerrainState::InitWorkflow,
            cursor: LoopCursor::new(&settings),
            progress: Progress::default(),
            dataset,
            mesh_len: 0,
            points: Vec::new(),
            attributes: Vec::new(),
            z_ratio_max: 0.0,
            block_level_max: 0,
            ex_passes,
            upper_candidates: Vec::new(),
            lower_candidates: Vec::new(),
            chunk_search: None,
            upper_chunks: Vec::new(),
            lower_chunks: Vec::new(),
            upper_end_points: Vec::new(),
            lower_end_points: Vec::new(),
            river_lines: Vec::new(),
            path_search: None,
            line_open: false,
            depth_ratio: 0.0,
            block_tested: HashSet::new(),
            triangles: Vec::new(),
            vertices: Vec::new(),
            normal_acc: Vec::new(),
            error: None,
            failed_at: None,
        }
    }

    pub fn state(&self) -> TerrainState {
        self.state
    }

    pub fn params(&self) -> &TerrainParams {
        &self.params
    }

    pub fn dataset(&self) -> &GridDataset {
        &self.dataset
    }

    pub fn mesh_len(&self) -> usize {
        self.mesh_len
    }

    pub fn points(&self) -> &[TerrainPointData] {
        &self.points
    }

    pub fn attributes(&self) -> &[TerrainAttributes] {
        &self.attributes
    }

    pub fn triangles(&self) -> &[[usize; 3]] {
        &self.triangles
    }

    pub fn river_lines(&self) -> &[RiverLine] {
        &self.river_lines
    }

    pub fn block_level_max(&self) -> i32 {
        self.block_level_max
    }

    pub fn tile_altitude_max(&self) -> f64 {
        self.params.tile_altitude_max
    }

    /// World height of the water surface.
    pub fn water_base(&self) -> f64 {
        self.params.water_base()
    }

    pub fn shallow_water_ratio(&self) -> f64 {
        self.params.water.shallow_ratio
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    fn climate(&self) -> ClimateSampler<'_> {
        ClimateSampler {
            noise: &self.noise,
            climate: &self.params.climate,
            water: &self.params.water,
            land_layer_0: &self.params.land_layer_0,
        }
    }

    /// Mesh index of the cell containing `position`.
    pub fn mesh_index_at(&self, position: Vec2) -> Option<usize> {
        self.dataset
            .index_at_position(position)
            .filter(|&i| i < self.mesh_len && i < self.points.len())
    }

    /// Type and climate of the cell containing `position`; `None` outside the
    /// mesh or before the heights exist.
    pub fn terrain_sample_at(&self, position: Vec2) -> Option<TerrainSample> {
        let index = self.mesh_index_at(position)?;
        let coord = self.dataset.points()[index].axial_coord;
        let (x, y) = (coord.x as f64, coord.y as f64);
        let ratio = self.points[index].position_z_ratio;
        let climate = self.climate();
        let moisture = climate.moisture(x, y, ratio);
        let temperature = climate.temperature(x, y);
        Some(TerrainSample {
            terrain_type: classify(ratio, moisture, temperature, &self.params.climate, &self.params.water),
            moisture,
            temperature,
        })
    }

    pub fn terrain_type_at(&self, position: Vec2) -> Option<TerrainType> {
        self.terrain_sample_at(position).map(|s| s.terrain_type)
    }

    /// Trees per game tile for `terrain_type`.
    pub fn tree_density(&self, terrain_type: TerrainType) -> f64 {
        self.params
            .climate
            .tree_density
            .get(&terrain_type)
            .copied()
            .unwrap_or(0.0)
    }

    pub fn has_tree_at(&self, position: Vec2) -> bool {
        match self.mesh_index_at(position) {
            Some(index) => {
                let coord = self.dataset.points()[index].axial_coord;
                self.climate().has_tree(coord.x as f64, coord.y as f64)
            }
            None => false,
        }
    }

    /// `position` lifted to the height of the cell containing it.
    pub fn terrain_point_at(&self, position: Vec2) -> Option<[f64; 3]> {
        let index = self.mesh_index_at(position)?;
        Some([position.x, position.y, self.points[index].position_z])
    }

    // =========================================================================
    // PHASES
    // =========================================================================

    fn advance(&mut self, next: TerrainState, weight: f64) -> Phase {
        info!("{}: {:?} done", self.name, self.state);
        self.cursor.reset();
        self.line_open = false;
        self.progress.finish_phase(weight);
        self.state = next;
        Phase::Complete
    }

    /// Height ratio at axial `(x, y)` before remapping.
    fn altitude_ratio(&self, x: f64, y: f64) -> f64 {
        let p = &self.params;
        let noise = &self.noise;

        let l0 = p.land_layer_0.mapping.by_level(p.land_layer_0.level);
        let s0 = p.land_layer_0.sample_scale;
        let mut ratio = gradient_ratio(
            |x, y| l0.map(noise.land_layer_0.get(x * s0, y * s0)),
            x,
            y,
            0.0,
            p.gradient_k,
            p.tile_altitude_max,
            self.dataset.tile_size,
        );

        let l1 = p.land_layer_1.mapping.by_level(p.land_layer_1.level);
        let s1 = p.land_layer_1.sample_scale;
        ratio += l1.map(noise.land_layer_1.get(x * s1, y * s1));

        if p.water.enabled {
            let w = p.water.mapping.by_level(p.water.level);
            let sw = p.water.sample_scale;
            let bank = water_bank(w.map(noise.water.get(x * sw, y * sw)), p.water.bank_sharpness);
            ratio = (bank + ratio).clamp(-1.0, 1.0);
        }
        ratio.clamp(-1.0, 1.0)
    }

    fn init_workflow(&mut self) -> Result<Phase> {
        self.cursor.validate_depth(2)?;
        self.params.validate()?;
        self.progress.reset();
        self.cursor.reset();

        let range = self.params.grid_range.min(self.dataset.params.grid_range);
        self.mesh_len = self.dataset.topology().point_count(range).min(self.dataset.len());
        if self.mesh_len == 0 {
            return Err(GridError::MissingCollaborator("terrain grid points".into()));
        }

        self.points.clear();
        self.attributes.clear();
        self.z_ratio_max = 0.0;
        self.block_level_max = 0;
        self.ex_passes = ExPasses::new(self.params.block_ex_times, ExCredit::AtEnd);
        self.upper_candidates.clear();
        self.lower_candidates.clear();
        self.chunk_search = None;
        self.upper_chunks.clear();
        self.lower_chunks.clear();
        self.upper_end_points.clear();
        self.lower_end_points.clear();
        self.river_lines.clear();
        self.path_search = None;
        self.block_tested.clear();
        self.triangles.clear();
        self.vertices.clear();
        self.normal_acc.clear();
        debug!("{}: mesh of {} points over {} grid points", self.name, self.mesh_len, self.dataset.len());
        self.state = TerrainState::CreateVertices;
        Ok(Phase::Complete)
    }

    fn create_vertices(&mut self, budget: usize) -> Result<Phase> {
        if !self.cursor.is_initialized() {
            self.points.clear();
            self.points.reserve(self.mesh_len);
            self.z_ratio_max = 0.0;
            self.cursor.mark_initialized();
        }
        let total = self.mesh_len;
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_CREATE_VERTICES);
                return Ok(Phase::Paused);
            }
            let coord = self.dataset.points()[i].axial_coord;
            let ratio = self.altitude_ratio(coord.x as f64, coord.y as f64);
            if ratio > self.z_ratio_max {
                self.z_ratio_max = ratio;
            }
            self.points.push(TerrainPointData {
                grid_index: i,
                position_z: ratio * self.params.tile_altitude_max,
                position_z_ratio: ratio,
                ..TerrainPointData::default()
            });
            i += 1;
        }
        Ok(self.advance(TerrainState::ReMappingZ, W_CREATE_VERTICES))
    }

    /// Stretch positive ratios so the highest tile reaches 1.
    fn remapping_z(&mut self, budget: usize) -> Result<Phase> {
        let total = self.points.len();
        let z_max = self.z_ratio_max;
        let altitude = self.params.tile_altitude_max;
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_REMAPPING_Z);
                return Ok(Phase::Paused);
            }
            let p = &mut self.points[i];
            if z_max > 0.0 && p.position_z_ratio > 0.0 {
                p.position_z_ratio = map_range(p.position_z_ratio, z_max, 0.0, 1.0, 0.0);
                p.position_z = p.position_z_ratio * altitude;
            }
            i += 1;
        }
        Ok(self.advance(TerrainState::SetBlockLevel, W_REMAPPING_Z))
    }

    fn set_block_level(&mut self, budget: usize) -> Result<Phase> {
        if !self.cursor.is_initialized() {
            self.block_level_max = self.dataset.params.neighbor_range + 1;
            self.cursor.mark_initialized();
        }
        let total = self.points.len();
        let mesh_len = self.mesh_len;
        let block_ratio = self.params.altitude_block_ratio;
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_SET_BLOCK_LEVEL);
                return Ok(Phase::Paused);
            }
            let points = &self.points;
            let level = base_block_level(
                &self.dataset,
                i,
                |n| n < mesh_len,
                |n| points[n].position_z_ratio > block_ratio,
            );
            self.points[i].block_level = level;
            i += 1;
        }
        Ok(self.advance(TerrainState::SetBlockLevelEx, W_SET_BLOCK_LEVEL))
    }

    /// One extension pass per call; stays in this state until every pass ran.
    fn set_block_level_ex(&mut self, budget: usize) -> Result<Phase> {
        if self.ex_passes.times == 0 {
            return Ok(self.advance(TerrainState::CreateRiver, W_SET_BLOCK_LEVEL_EX));
        }
        if !self.cursor.is_initialized() {
            self.block_level_max += self.dataset.params.neighbor_range;
            self.cursor.mark_initialized();
        }
        let total = self.points.len();
        let mesh_len = self.mesh_len;
        let max = self.block_level_max;
        let done_before = self.ex_passes.current() * total;
        let all_passes = self.ex_passes.times * total;
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress
                    .update(done_before + self.cursor.count(), all_passes, W_SET_BLOCK_LEVEL_EX);
                return Ok(Phase::Paused);
            }
            let points = &self.points;
            let level = extended_block_level(&self.dataset, i, max, |n| n < mesh_len, |n| points[n].block_level);
            self.points[i].block_level = level;
            i += 1;
        }

        self.cursor.reset();
        let outcome = self.ex_passes.finish_pass(&self.name);
        if outcome.credit {
            self.progress.finish_phase(W_SET_BLOCK_LEVEL_EX);
        }
        if outcome.finished {
            info!("{}: {:?} done, block level max {}", self.name, self.state, self.block_level_max);
            self.state = TerrainState::CreateRiver;
        }
        Ok(Phase::Complete)
    }

    fn create_river(&mut self) -> Result<Phase> {
        if !self.params.river.enabled {
            info!("{}: no river was created", self.name);
            return Ok(self.advance(TerrainState::CreateVertexAttributes, 0.0));
        }
        self.upper_candidates.clear();
        self.lower_candidates.clear();
        Ok(self.advance(TerrainState::AddRiverEndPoints, 0.0))
    }

    fn add_river_end_points(&mut self, budget: usize) -> Result<Phase> {
        let total = self.points.len();
        let upper = self.params.river.upper_limit_ratio;
        let lower = self.params.river.lower_limit_ratio;
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_ADD_RIVER_END_POINTS);
                return Ok(Phase::Paused);
            }
            let ratio = self.points[i].position_z_ratio;
            if ratio >= upper {
                self.upper_candidates.push(i);
            } else if ratio <= lower {
                self.lower_candidates.push(i);
            }
            i += 1;
        }
        debug!(
            "{}: {} upper and {} lower river candidates",
            self.name,
            self.upper_candidates.len(),
            self.lower_candidates.len()
        );
        Ok(self.advance(TerrainState::DivideUpperRiver, W_ADD_RIVER_END_POINTS))
    }

    /// Split one candidate set into connected chunks.
    fn divide_river(&mut self, budget: usize, upper: bool) -> Result<Phase> {
        let seed = if upper {
            &self.upper_candidates
        } else {
            &self.lower_candidates
        };
        let search = self
            .chunk_search
            .get_or_insert_with(|| ChunkSearch::new(seed.iter().copied()));

        let ds = &self.dataset;
        let mesh_len = self.mesh_len;
        let progress = search.run(budget, |c| {
            ds.neighbor_indices(c, 0)
                .into_iter()
                .filter(|&n| n < mesh_len)
                .collect()
        });
        if progress == SearchProgress::Paused {
            return Ok(Phase::Paused);
        }

        let mut chunks = self.chunk_search.take().map(ChunkSearch::into_chunks).unwrap_or_default();
        sort_chunks_by_size(&mut chunks);
        debug!(
            "{}: {} {} river chunks",
            self.name,
            chunks.len(),
            if upper { "upper" } else { "lower" }
        );
        if upper {
            self.upper_chunks = chunks;
            Ok(self.advance(TerrainState::DivideLowerRiver, 0.0))
        } else {
            self.lower_chunks = chunks;
            Ok(self.advance(TerrainState::ChunkToOnePoint, 0.0))
        }
    }

    fn chunk_to_one_point(&mut self) -> Result<Phase> {
        let points = &self.points;
        let abs_z = |i: usize| points[i].position_z.abs();
        self.upper_end_points = self
            .upper_chunks
            .iter()
            .filter_map(|c| chunk_representative(c, abs_z))
            .collect();
        self.lower_end_points = self
            .lower_chunks
            .iter()
            .filter_map(|c| chunk_representative(c, abs_z))
            .collect();
        Ok(self.advance(TerrainState::CreateRiverLine, 0.0))
    }

    fn create_river_line(&mut self) -> Result<Phase> {
        let ds = &self.dataset;
        self.river_lines = pair_end_points(
            &mut self.upper_end_points,
            &mut self.lower_end_points,
            self.params.river.max_rivers,
            self.params.river.min_length,
            |a, b| ds.distance(a, b),
        );
        info!("{}: add {} river lines", self.name, self.river_lines.len());
        Ok(self.advance(TerrainState::FindRiverLines, 0.0))
    }

    fn find_river_lines(&mut self, budget: usize) -> Result<Phase> {
        let total = self.river_lines.len();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        let mut remaining = budget.max(1);
        while i < total {
            if remaining == 0 {
                self.cursor.save(&[i]);
                self.progress.update(i, total, W_FIND_RIVER_LINES);
                return Ok(Phase::Paused);
            }
            let line = &self.river_lines[i];
            let mut search = self
                .path_search
                .take()
                .unwrap_or_else(|| AStarSearch::new(line.upper_point_index, line.lower_point_index));

            let rotation = NoiseRotation::new(total, i);
            let ds = &self.dataset;
            let points = &self.points;
            let noise = &self.noise;
            let river = &self.params.river;
            let water_base_ratio = self.params.water.base_ratio;
            let level_max = self.block_level_max;
            let mesh_len = self.mesh_len;

            let expanded = search.expanded();
            let progress = search.run(
                remaining,
                |c| {
                    ds.neighbor_indices(c, 0)
                        .into_iter()
                        .filter(|&n| n < mesh_len)
                        .collect()
                },
                |_, next| {
                    let (x, y) = rotation.apply(ds.points()[next].axial_coord);
                    let s = river.direction_sample_scale;
                    let p = &points[next];
                    direction_cost(
                        noise.river_direction.get(x * s, y * s),
                        p.position_z_ratio,
                        p.block_level,
                        level_max,
                        water_base_ratio,
                        river,
                    )
                },
                |goal, next| ds.distance(goal, next) as f64 * river.heuristic_ratio,
            );
            remaining = remaining.saturating_sub(search.expanded() - expanded);
            if progress == SearchProgress::Paused {
                self.path_search = Some(search);
                self.cursor.save(&[i]);
                self.progress.update(i, total, W_FIND_RIVER_LINES);
                return Ok(Phase::Paused);
            }
            let path = search.path()?;
            debug!("{}: river line {} has {} points", self.name, i, path.len());
            self.river_lines[i].line_point_indices = path;
            i += 1;
        }
        Ok(self.advance(TerrainState::DigRiverLine, W_FIND_RIVER_LINES))
    }

    fn dig_river_line(&mut self, budget: usize) -> Result<Phase> {
        let river = self.params.river;
        let line_count = self.river_lines.len();
        let total: usize = self.river_lines.iter().map(|l| l.line_point_indices.len()).sum();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < line_count {
            if !self.line_open {
                self.block_tested.clear();
                self.depth_ratio = river.depth_ratio_start;
                self.line_open = true;
            }
            let rotation = NoiseRotation::new(line_count, i);
            let mut j = self.cursor.begin(1);
            while j < self.river_lines[i].line_point_indices.len() {
                if self.cursor.checkpoint(&[i, j]) {
                    self.progress.update(self.cursor.count(), total, W_DIG_RIVER_LINE);
                    return Ok(Phase::Paused);
                }
                let center = self.river_lines[i].line_point_indices[j];
                let carver = Carver {
                    ds: &self.dataset,
                    mesh_len: self.mesh_len,
                    altitude_block_ratio: self.params.altitude_block_ratio,
                    depth_change_step: river.depth_change_step,
                    tile_altitude_max: self.params.tile_altitude_max,
                };
                let dug = carver.dig_line_point(
                    &mut self.points,
                    &mut self.block_tested,
                    center,
                    self.depth_ratio,
                    river.depth_rising_step,
                );
                if let Some(depth) = dug {
                    let (x, y) = rotation.apply(self.dataset.points()[center].axial_coord);
                    let s = river.depth_sample_scale;
                    self.depth_ratio = next_depth_ratio(
                        depth,
                        self.noise.river_depth.get(x * s, y * s),
                        river.depth_ratio_min,
                        river.depth_ratio_max,
                        river.depth_change_step,
                    );
                }
                j += 1;
            }
            self.line_open = false;
            i += 1;
        }
        Ok(self.advance(TerrainState::DigRiverPool, W_DIG_RIVER_LINE))
    }

    fn dig_river_pool(&mut self, budget: usize) -> Result<Phase> {
        if !self.params.pool.enabled {
            return Ok(self.advance(TerrainState::CreateVertexAttributes, W_DIG_RIVER_POOL));
        }
        let pool = self.params.pool;
        let river = self.params.river;
        let line_count = self.river_lines.len();
        let total: usize = self.river_lines.iter().map(|l| l.line_point_indices.len()).sum();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < line_count {
            if !self.line_open {
                self.depth_ratio = river.depth_ratio_start;
                self.line_open = true;
            }
            let rotation = NoiseRotation::new(line_count, i);
            let mut j = self.cursor.begin(1);
            while j < self.river_lines[i].line_point_indices.len() {
                if self.cursor.checkpoint(&[i, j]) {
                    self.progress.update(self.cursor.count(), total, W_DIG_RIVER_POOL);
                    return Ok(Phase::Paused);
                }
                let center = self.river_lines[i].line_point_indices[j];
                if self.points[center].position_z_ratio < pool.combine_lower {
                    break;
                }
                let carver = Carver {
                    ds: &self.dataset,
                    mesh_len: self.mesh_len,
                    altitude_block_ratio: self.params.altitude_block_ratio,
                    depth_change_step: river.depth_change_step,
                    tile_altitude_max: self.params.tile_altitude_max,
                };
                carver.dig_pool_point(&mut self.points, center, self.depth_ratio, pool.depth_rising_step);

                let (x, y) = rotation.apply(self.dataset.points()[center].axial_coord);
                let s = river.depth_sample_scale;
                self.depth_ratio = next_depth_ratio(
                    self.depth_ratio,
                    self.noise.river_depth.get(x * s, y * s),
                    pool.depth_ratio_min,
                    pool.depth_ratio_max,
                    river.depth_change_step,
                );
                j += 1;
            }
            self.line_open = false;
            i += 1;
        }
        Ok(self.advance(TerrainState::CombinePoolToTerrain, W_DIG_RIVER_POOL))
    }

    fn combine_pool_to_terrain(&mut self) -> Result<Phase> {
        let pool = self.params.pool;
        let altitude = self.params.tile_altitude_max;
        let mut combined = 0;
        for p in self.points.iter_mut().filter(|p| p.river_pool_z_ratio < 0.0) {
            p.position_z_ratio = combine_pool(p.position_z_ratio, p.river_pool_z_ratio, &pool);
            p.position_z = p.position_z_ratio * altitude;
            combined += 1;
        }
        debug!("{}: {} pool points combined", self.name, combined);
        Ok(self.advance(TerrainState::CreateVertexAttributes, 0.0))
    }

    fn create_vertex_attributes(&mut self, budget: usize) -> Result<Phase> {
        if !self.cursor.is_initialized() {
            self.attributes.clear();
            self.attributes.reserve(self.points.len());
            self.cursor.mark_initialized();
        }
        let total = self.points.len();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_VERTEX_ATTRIBUTES);
                return Ok(Phase::Paused);
            }
            let coord = self.dataset.points()[i].axial_coord;
            let (x, y) = (coord.x as f64, coord.y as f64);
            let ratio = self.points[i].position_z_ratio;
            let climate = self.climate();
            let attributes = TerrainAttributes {
                altitude_std: ratio * 0.5 + 0.5,
                moisture: climate.moisture(x, y, ratio),
                temperature: climate.temperature(x, y),
                tree: climate.tree(x, y),
            };
            self.attributes.push(attributes);
            i += 1;
        }
        Ok(self.advance(TerrainState::CreateTriangles, W_VERTEX_ATTRIBUTES))
    }

    fn create_triangles(&mut self, budget: usize) -> Result<Phase> {
        if !self.cursor.is_initialized() {
            self.triangles.clear();
            self.cursor.mark_initialized();
        }
        let total = self.points.len();
        let mesh_len = self.mesh_len;
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_CREATE_TRIANGLES);
                return Ok(Phase::Paused);
            }
            let ds = &self.dataset;
            let coord: AxialCoord = ds.points()[i].axial_coord;
            let tris = cell_triangles(ds.topology, coord, |c| ds.index_of(c).filter(|&n| n < mesh_len));
            self.triangles.extend(tris);
            i += 1;
        }
        debug!("{}: {} triangles", self.name, self.triangles.len());
        Ok(self.advance(TerrainState::CalNormalsInit, W_CREATE_TRIANGLES))
    }

    fn cal_normals_init(&mut self, budget: usize) -> Result<Phase> {
        if !self.cursor.is_initialized() {
            self.vertices.clear();
            self.normal_acc.clear();
            self.cursor.mark_initialized();
        }
        let total = self.points.len();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_NORMALS_INIT);
                return Ok(Phase::Paused);
            }
            let position = self.dataset.points()[i].position;
            self.vertices.push([position.x, position.y, self.points[i].position_z]);
            self.normal_acc.push([0.0; 3]);
            i += 1;
        }
        Ok(self.advance(TerrainState::CalNormalsAcc, W_NORMALS_INIT))
    }

    fn cal_normals_acc(&mut self, budget: usize) -> Result<Phase> {
        let total = self.triangles.len();
        self.cursor.resume(budget);
        let mut t = self.cursor.begin(0);
        while t < total {
            if self.cursor.checkpoint(&[t]) {
                self.progress.update(self.cursor.count(), total, W_NORMALS_ACC);
                return Ok(Phase::Paused);
            }
            accumulate_normal(&mut self.normal_acc, &self.vertices, self.triangles[t]);
            t += 1;
        }
        Ok(self.advance(TerrainState::NormalizeNormals, W_NORMALS_ACC))
    }

    fn normalize_normals(&mut self, budget: usize) -> Result<Phase> {
        let total = self.points.len();
        self.cursor.resume(budget);
        let mut i = self.cursor.begin(0);
        while i < total {
            if self.cursor.checkpoint(&[i]) {
                self.progress.update(self.cursor.count(), total, W_NORMALIZE_NORMALS);
                return Ok(Phase::Paused);
            }
            let normal = normalize(self.normal_acc[i]);
            let p = &mut self.points[i];
            p.normal = normal;
            p.angle_to_up = angle_to_up(normal);
            i += 1;
        }
        self.vertices.clear();
        self.normal_acc.clear();
        let phase = self.advance(TerrainState::Done, W_NORMALIZE_NORMALS);
        self.progress.complete();
        Ok(phase)
    }

    fn fail(&mut self, err: GridError) -> StepStatus {
        warn!("{}: {:?} failed: {}", self.name, self.state, err);
        self.error = Some(err);
        self.failed_at = Some(self.state);
        self.state = TerrainState::Error;
        StepStatus::Error
    }
}

impl Workflow<()> for TerrainGenerator {
    fn name(&self) -> &str {
        &self.name
    }

    fn step(&mut self, _ctx: &(), budget: usize) -> StepStatus {
        let result = match self.state {
            TerrainState::InitWorkflow => self.init_workflow(),
            TerrainState::CreateVertices => self.create_vertices(budget),
            TerrainState::ReMappingZ => self.remapping_z(budget),
            TerrainState::SetBlockLevel => self.set_block_level(budget),
            TerrainState::SetBlockLevelEx => self.set_block_level_ex(budget),
            TerrainState::CreateRiver => self.create_river(),
            TerrainState::AddRiverEndPoints => self.add_river_end_points(budget),
            TerrainState::DivideUpperRiver => self.divide_river(budget, true),
            TerrainState::DivideLowerRiver => self.divide_river(budget, false),
            TerrainState::ChunkToOnePoint => self.chunk_to_one_point(),
            TerrainState::CreateRiverLine => self.create_river_line(),
            TerrainState::FindRiverLines => self.find_river_lines(budget),
            TerrainState::DigRiverLine => self.dig_river_line(budget),
            TerrainState::DigRiverPool => self.dig_river_pool(budget),
            TerrainState::CombinePoolToTerrain => self.combine_pool_to_terrain(),
            TerrainState::CreateVertexAttributes => self.create_vertex_attributes(budget),
            TerrainState::CreateTriangles => self.create_triangles(budget),
            TerrainState::CalNormalsInit => self.cal_normals_init(budget),
            TerrainState::CalNormalsAcc => self.cal_normals_acc(budget),
            TerrainState::NormalizeNormals => self.normalize_normals(budget),
            TerrainState::Done => return StepStatus::Done,
            TerrainState::Error => return StepStatus::Error,
        };
        match result {
            Ok(Phase::Complete) if self.state == TerrainState::Done => {
                info!(
                    "{}: terrain of {} points, {} river lines",
                    self.name,
                    self.points.len(),
                    self.river_lines.len()
                );
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
        self.state == TerrainState::Done
    }

    fn last_error(&self) -> Option<&GridError> {
        self.error.as_ref()
    }

    fn state_label(&self) -> String {
        format!("{:?}", self.failed_at.unwrap_or(self.state))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::grid::test_support::build_dataset;
    use crate::topology::TopologyKind;
    use crate::workflow::drive;

    fn settings(limit: usize) -> LoopSettings {
        LoopSettings {
            count_limit: limit,
            rate: 0.0,
            ..LoopSettings::default()
        }
    }

    pub(crate) fn flat_terrain(kind: TopologyKind, range: i32, nr: i32, params: TerrainParams) -> TerrainGenerator {
        let ds = Arc::new(build_dataset(kind, range, nr, 100.0));
        TerrainGenerator::new(
            "terrain",
            ds,
            params,
            &TerrainSeeds::from_master(5),
            &NoiseLayers::flat(),
            settings(50),
        )
    }

    fn run(t: &mut TerrainGenerator, limit: usize) {
        drive(t, &(), &settings(limit), |_| {}).unwrap();
    }

    /// Step until `state` is current.
    fn run_until(t: &mut TerrainGenerator, state: TerrainState) {
        for _ in 0..10_000 {
            if t.state() == state {
                return;
            }
            assert_ne!(t.step(&(), 50), StepStatus::Error, "{:?}", t.last_error());
        }
        panic!("never reached {:?}", state);
    }

    #[test]
    fn test_flat_terrain() {
        let mut t = flat_terrain(TopologyKind::Quad, 6, 2, TerrainParams::default());
        run(&mut t, 17);
        assert!(t.is_loading_completed());
        assert!((t.progress() - 1.0).abs() < 1e-9);
        assert_eq!(t.points().len(), t.dataset().len());

        for p in t.points() {
            assert_eq!(p.position_z_ratio, 0.0);
            assert_eq!(p.block_level, 3);
            assert!(p.angle_to_up.abs() < 1e-9);
        }
        assert!(t.river_lines().is_empty());
        assert!(!t.triangles().is_empty());
        let a = t.attributes()[0];
        assert_eq!(a.altitude_std, 0.5);
        assert_eq!(a.moisture, 0.5);

        let origin = Vec2::new(0.0, 0.0);
        assert_eq!(t.terrain_type_at(origin), Some(TerrainType::Grass));
        assert_eq!(t.terrain_point_at(origin), Some([0.0, 0.0, 0.0]));
        assert!(!t.has_tree_at(origin));
        assert_eq!(t.terrain_type_at(Vec2::new(1.0e6, 0.0)), None);
        assert_eq!(t.tree_density(TerrainType::Grass), 6.0);
        assert_eq!(t.tree_density(TerrainType::Desert), 0.0);
        assert!((t.water_base() + 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_mesh_range_limits_points() {
        let params = TerrainParams {
            grid_range: 2,
            ..TerrainParams::default()
        };
        let mut t = flat_terrain(TopologyKind::Hex, 4, 1, params);
        run(&mut t, 1000);
        assert_eq!(t.mesh_len(), 19);
        assert_eq!(t.points().len(), 19);
        assert_eq!(t.terrain_type_at(t.dataset().points()[30].position), None);
    }

    #[test]
    fn test_noise_heights_stay_in_range() {
        let ds = Arc::new(build_dataset(TopologyKind::Quad, 8, 2, 500.0));
        let params = TerrainParams {
            water: params::WaterParams {
                enabled: true,
                ..Default::default()
            },
            ..TerrainParams::default()
        };
        let mut t = TerrainGenerator::new(
            "terrain",
            ds,
            params,
            &TerrainSeeds::from_master(21),
            &NoiseLayers::default(),
            settings(64),
        );
        run(&mut t, 64);
        let max = t.points().iter().map(|p| p.position_z_ratio).fold(f64::MIN, f64::max);
        for p in t.points() {
            assert!((-1.0..=1.0).contains(&p.position_z_ratio));
            assert!((p.position_z - p.position_z_ratio * 20000.0).abs() < 1e-6);
            if p.position_z_ratio > 0.005 {
                assert_eq!(p.block_level, 0);
            } else {
                assert!(p.block_level > 0);
            }
        }
        if max > 0.0 {
            assert!((max - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_budget_does_not_change_result() {
        let make = || {
            let ds = Arc::new(build_dataset(TopologyKind::Quad, 7, 2, 500.0));
            let params = TerrainParams {
                block_ex_times: 1,
                ..TerrainParams::default()
            };
            TerrainGenerator::new(
                "terrain",
                ds,
                params,
                &TerrainSeeds::from_master(8),
                &NoiseLayers::default(),
                settings(3),
            )
        };
        let mut small = make();
        run(&mut small, 3);
        let mut large = make();
        run(&mut large, 100_000);
        assert_eq!(small.points(), large.points());
        assert_eq!(small.attributes(), large.attributes());
        assert_eq!(small.triangles(), large.triangles());
    }

    #[test]
    fn test_extension_runs_configured_passes() {
        let params = TerrainParams {
            block_ex_times: 3,
            ..TerrainParams::default()
        };
        let mut t = flat_terrain(TopologyKind::Hex, 5, 2, params);
        run(&mut t, 11);
        assert_eq!(t.ex_passes.done, 3);
        assert_eq!(t.block_level_max(), 3 + 3 * 2);
        assert!((t.progress() - 1.0).abs() < 1e-9);
        for p in t.points() {
            assert!(p.block_level >= 3 && p.block_level <= t.block_level_max());
        }
    }

    #[test]
    fn test_block_levels_grow_away_from_high_ground() {
        let mut t = flat_terrain(TopologyKind::Quad, 6, 3, TerrainParams::default());
        run_until(&mut t, TerrainState::SetBlockLevel);
        let peak = t.dataset().index_of(AxialCoord::new(0, 0)).unwrap();
        t.points[peak].position_z_ratio = 0.5;
        run(&mut t, 50);

        let ds = t.dataset();
        assert_eq!(t.points()[peak].block_level, 0);
        for (i, p) in t.points().iter().enumerate().filter(|(i, _)| *i != peak) {
            let d = ds.distance(i, peak);
            let expected = if d <= 3 { d } else { 4 };
            assert_eq!(p.block_level, expected, "point {}", i);
        }
    }

    /// Ramp along x: sources at x >= 8, mouths at x <= -3.
    fn ramp_terrain(pool: bool) -> TerrainGenerator {
        let mut params = TerrainParams::default();
        params.river.enabled = true;
        params.river.min_length = 5;
        params.pool.enabled = pool;
        let mut t = flat_terrain(TopologyKind::Hex, 10, 2, params);
        run_until(&mut t, TerrainState::SetBlockLevel);
        for i in 0..t.points.len() {
            let x = t.dataset.points()[i].axial_coord.x;
            let ratio = 0.04 * x as f64;
            t.points[i].position_z_ratio = ratio;
            t.points[i].position_z = ratio * 20000.0;
        }
        t
    }

    #[test]
    fn test_single_river() {
        let mut t = ramp_terrain(false);
        let before: Vec<f64> = t.points().iter().map(|p| p.position_z_ratio).collect();
        run(&mut t, 40);
        assert!(t.is_loading_completed());

        assert_eq!(t.river_lines().len(), 1);
        let line = &t.river_lines()[0];
        let ds = t.dataset();
        let path = &line.line_point_indices;
        assert_eq!(path.first(), Some(&line.upper_point_index));
        assert_eq!(path.last(), Some(&line.lower_point_index));
        assert!(ds.points()[line.upper_point_index].axial_coord.x >= 8);
        assert!(ds.points()[line.lower_point_index].axial_coord.x <= -3);
        for w in path.windows(2) {
            assert_eq!(ds.distance(w[0], w[1]), 1);
        }

        for (i, p) in t.points().iter().enumerate() {
            assert!(p.position_z_ratio <= before[i] + 1e-12);
        }
        let shore = path
            .iter()
            .copied()
            .find(|&i| ds.points()[i].axial_coord.x == 0)
            .unwrap();
        assert!(t.points()[shore].position_z_ratio < 0.0);
        // High ground is never carved.
        assert_eq!(t.points()[line.upper_point_index].position_z_ratio, before[line.upper_point_index]);
    }

    /// Steps spent in `FindRiverLines` at `budget` per step.
    fn find_lines_steps(t: &mut TerrainGenerator, budget: usize) -> usize {
        let mut steps = 0;
        while t.state() == TerrainState::FindRiverLines {
            assert_ne!(t.step(&(), budget), StepStatus::Error, "{:?}", t.last_error());
            steps += 1;
        }
        steps
    }

    #[test]
    fn test_river_search_shares_step_budget() {
        let mut single = ramp_terrain(false);
        run_until(&mut single, TerrainState::FindRiverLines);
        assert_eq!(single.river_lines.len(), 1);
        // One expansion per step, plus the step that pops the goal.
        let expansions = find_lines_steps(&mut single, 1) - 1;
        assert!(expansions > 1);

        let mut t = ramp_terrain(false);
        run_until(&mut t, TerrainState::FindRiverLines);
        let line = t.river_lines[0].clone();
        t.river_lines.push(line.clone());
        t.river_lines.push(line);

        // Enough for the first line only; the second starts with one node left.
        assert!(matches!(t.step(&(), expansions + 1), StepStatus::Yield { .. }));
        assert_eq!(t.state(), TerrainState::FindRiverLines);
        assert_eq!(t.river_lines[0].line_point_indices, single.river_lines[0].line_point_indices);
        assert!(t.river_lines[1].line_point_indices.is_empty());
        assert!(t.river_lines[2].line_point_indices.is_empty());

        assert!(find_lines_steps(&mut t, 1) > 1);
        for line in &t.river_lines {
            assert!(!line.line_point_indices.is_empty());
        }
    }

    #[test]
    fn test_river_with_pools() {
        let mut t = ramp_terrain(true);
        run(&mut t, 40);
        assert!(t.is_loading_completed());
        assert!(t.points().iter().any(|p| p.river_pool_z_ratio < 0.0));
        for p in t.points() {
            assert!((-1.0..=1.0).contains(&p.position_z_ratio));
        }
    }

    #[test]
    fn test_rivers_without_candidates() {
        let mut params = TerrainParams::default();
        params.river.enabled = true;
        let mut t = flat_terrain(TopologyKind::Quad, 5, 2, params);
        run(&mut t, 50);
        assert!(t.is_loading_completed());
        assert!(t.river_lines().is_empty());
    }

    #[test]
    fn test_bad_params_fail_at_init() {
        let params = TerrainParams {
            tile_altitude_max: -1.0,
            ..TerrainParams::default()
        };
        let mut t = flat_terrain(TopologyKind::Quad, 3, 1, params);
        assert_eq!(t.step(&(), 10), StepStatus::Error);
        assert_eq!(t.state_label(), "InitWorkflow");
        assert!(matches!(t.last_error(), Some(GridError::Config(_))));
        assert_eq!(t.step(&(), 10), StepStatus::Error);
    }
}
