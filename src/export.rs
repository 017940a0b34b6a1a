//! PNG previews and a JSON summary of a generation run.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use chrono::Local;
use image::{ImageBuffer, Rgb, RgbImage};
use serde::Serialize;

use crate::coords::Vec2;
use crate::error::{GridError, Result};
use crate::game_grid::blocking::BlockKind;
use crate::game_grid::GameGridGenerator;
use crate::grid::GridDataset;
use crate::terrain::classify::TerrainType;
use crate::terrain::TerrainGenerator;

const BACKGROUND: [u8; 3] = [0, 0, 0];
const RIVER_COLOR: [u8; 3] = [40, 120, 220];
const ISLAND_COLOR: [u8; 3] = [200, 40, 40];

/// Pixel raster over the first `len` points of a grid; each pixel holds the
/// index of the cell under its center.
pub struct Raster {
    pub width: u32,
    pub height: u32,
    cells: Vec<Option<usize>>,
}

impl Raster {
    pub fn new(ds: &GridDataset, len: usize, pixel_size: f64) -> Result<Self> {
        if pixel_size.is_nan() || pixel_size <= 0.0 {
            return Err(GridError::Config(format!("pixel size {} must be positive", pixel_size)));
        }
        let len = len.min(ds.len());
        if len == 0 {
            return Err(GridError::MissingCollaborator("raster grid points".into()));
        }

        let margin = ds.tile_size;
        let (mut min, mut max) = (Vec2::new(f64::MAX, f64::MAX), Vec2::new(f64::MIN, f64::MIN));
        for p in &ds.points()[..len] {
            min = Vec2::new(min.x.min(p.position.x), min.y.min(p.position.y));
            max = Vec2::new(max.x.max(p.position.x), max.y.max(p.position.y));
        }
        let min = min.sub(Vec2::new(margin, margin));
        let max = max.add(Vec2::new(margin, margin));

        let width = ((max.x - min.x) / pixel_size).ceil().max(1.0) as u32;
        let height = ((max.y - min.y) / pixel_size).ceil().max(1.0) as u32;
        let mut cells = Vec::with_capacity(width as usize * height as usize);
        for py in 0..height {
            for px in 0..width {
                // Image rows run top-down, world y runs up.
                let position = Vec2::new(
                    min.x + (px as f64 + 0.5) * pixel_size,
                    max.y - (py as f64 + 0.5) * pixel_size,
                );
                cells.push(ds.index_at_position(position).filter(|&i| i < len));
            }
        }
        Ok(Self { width, height, cells })
    }

    pub fn get(&self, x: u32, y: u32) -> Option<usize> {
        self.cells
            .get(y as usize * self.width as usize + x as usize)
            .copied()
            .flatten()
    }

    /// Paint each pixel with the color of its cell.
    pub fn render(&self, color: impl Fn(usize) -> [u8; 3]) -> RgbImage {
        let mut img: RgbImage = ImageBuffer::new(self.width, self.height);
        for (i, cell) in self.cells.iter().enumerate() {
            let x = i as u32 % self.width;
            let y = i as u32 / self.width;
            let c = cell.map_or(BACKGROUND, &color);
            img.put_pixel(x, y, Rgb(c));
        }
        img
    }
}

/// Spectral colormap: dark blue at 0, through yellow, to dark red at 1.
fn spectral_colormap(t: f64) -> [u8; 3] {
    let colors: [[f64; 3]; 11] = [
        [0.37, 0.31, 0.64],
        [0.20, 0.53, 0.74],
        [0.40, 0.76, 0.65],
        [0.67, 0.87, 0.64],
        [0.90, 0.96, 0.60],
        [1.00, 1.00, 0.75],
        [1.00, 0.88, 0.55],
        [0.99, 0.68, 0.38],
        [0.96, 0.43, 0.26],
        [0.84, 0.24, 0.31],
        [0.62, 0.00, 0.26],
    ];

    let t_scaled = t.clamp(0.0, 1.0) * 10.0;
    let idx = (t_scaled as usize).min(9);
    let frac = t_scaled - idx as f64;

    let c1 = colors[idx];
    let c2 = colors[idx + 1];

    [
        ((c1[0] + (c2[0] - c1[0]) * frac) * 255.0) as u8,
        ((c1[1] + (c2[1] - c1[1]) * frac) * 255.0) as u8,
        ((c1[2] + (c2[2] - c1[2]) * frac) * 255.0) as u8,
    ]
}

fn save(img: RgbImage, path: &Path) -> Result<()> {
    img.save(path)?;
    log::info!("wrote {}", path.display());
    Ok(())
}

/// Heights on the spectral colormap, river lines on top.
pub fn export_heightmap(terrain: &TerrainGenerator, path: &Path, pixel_size: f64) -> Result<()> {
    let raster = Raster::new(terrain.dataset(), terrain.mesh_len(), pixel_size)?;
    let rivers: HashSet<usize> = terrain
        .river_lines()
        .iter()
        .flat_map(|l| l.line_point_indices.iter().copied())
        .collect();
    let points = terrain.points();
    let img = raster.render(|i| {
        if rivers.contains(&i) {
            return RIVER_COLOR;
        }
        match points.get(i) {
            Some(p) => spectral_colormap(p.position_z_ratio * 0.5 + 0.5),
            None => BACKGROUND,
        }
    });
    save(img, path)
}

/// Terrain type of every mesh tile.
pub fn terrain_types(terrain: &TerrainGenerator) -> Vec<Option<TerrainType>> {
    let ds = terrain.dataset();
    (0..terrain.mesh_len())
        .map(|i| terrain.terrain_type_at(ds.points()[i].position))
        .collect()
}

pub fn export_terrain_types(terrain: &TerrainGenerator, path: &Path, pixel_size: f64) -> Result<()> {
    let raster = Raster::new(terrain.dataset(), terrain.mesh_len(), pixel_size)?;
    let types = terrain_types(terrain);
    let img = raster.render(|i| types.get(i).copied().flatten().map_or(BACKGROUND, |t| t.color()));
    save(img, path)
}

/// Block levels of one kind in gray, brighter is further from blocked
/// ground; island tiles in red.
pub fn export_block_levels(game: &GameGridGenerator, kind: BlockKind, path: &Path, pixel_size: f64) -> Result<()> {
    let raster = Raster::new(game.dataset(), game.points().len(), pixel_size)?;
    let max = game.level_max(kind).max(1) as f64;
    let points = game.points();
    let img = raster.render(|i| match points.get(i) {
        Some(p) if kind != BlockKind::Building && p.block_level(kind) > 0 && p.island(kind) => ISLAND_COLOR,
        Some(p) => {
            let v = (p.block_level(kind) as f64 / max * 255.0).round() as u8;
            [v, v, v]
        }
        None => BACKGROUND,
    });
    save(img, path)
}

/// Counts describing one finished run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GenerationSummary {
    pub generated_at: String,
    pub seed: u64,
    pub terrain_points: usize,
    pub river_lines: usize,
    pub river_points: usize,
    pub terrain_types: BTreeMap<TerrainType, usize>,
    pub game_tiles: usize,
    pub game_tiles_on_terrain: usize,
    pub trees: usize,
    pub area_chunks: usize,
    pub area_islands: usize,
    pub flying_islands: usize,
    pub block_level_max: BTreeMap<BlockKind, i32>,
}

impl GenerationSummary {
    pub fn new(seed: u64, terrain: &TerrainGenerator, game: &GameGridGenerator) -> Self {
        let mut types = BTreeMap::new();
        for t in terrain_types(terrain).into_iter().flatten() {
            *types.entry(t).or_insert(0) += 1;
        }
        let points = game.points();
        Self {
            generated_at: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            seed,
            terrain_points: terrain.points().len(),
            river_lines: terrain.river_lines().len(),
            river_points: terrain
                .river_lines()
                .iter()
                .map(|l| l.line_point_indices.len())
                .sum(),
            terrain_types: types,
            game_tiles: points.len(),
            game_tiles_on_terrain: points.iter().filter(|p| p.in_terrain_range).count(),
            trees: points.iter().map(|p| p.tree_records.len()).sum(),
            area_chunks: game.area_chunks().len(),
            area_islands: points.iter().filter(|p| p.is_island).count(),
            flying_islands: points.iter().filter(|p| p.flying_is_island).count(),
            block_level_max: BlockKind::all().iter().map(|&k| (k, game.level_max(k))).collect(),
        }
    }

    pub fn write(&self, path: &Path) -> Result<()> {
        let file = File::create(path).map_err(|e| GridError::io(path, e))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        log::info!("wrote {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coords::AxialCoord;
    use crate::game_grid::GameGridParams;
    use crate::grid::test_support::build_dataset;
    use crate::seeds::TerrainSeeds;
    use crate::terrain::params::TerrainParams;
    use crate::terrain::tests::flat_terrain;
    use crate::topology::TopologyKind;
    use crate::workflow::{drive, LoopSettings};
    use std::sync::Arc;

    fn settings() -> LoopSettings {
        LoopSettings {
            count_limit: 1000,
            rate: 0.0,
            ..LoopSettings::default()
        }
    }

    fn finished() -> (TerrainGenerator, GameGridGenerator) {
        let mut terrain = flat_terrain(TopologyKind::Quad, 12, 2, TerrainParams::default());
        drive(&mut terrain, &(), &settings(), |_| {}).unwrap();
        let mut ds = build_dataset(TopologyKind::Hex, 2, 2, 100.0);
        ds.create_vertices();
        let mut game = GameGridGenerator::new(
            "game grid",
            Arc::new(ds),
            GameGridParams::default(),
            &TerrainSeeds::from_master(5),
            settings(),
        );
        drive(&mut game, &terrain, &settings(), |_| {}).unwrap();
        (terrain, game)
    }

    #[test]
    fn test_raster_covers_grid() {
        let ds = build_dataset(TopologyKind::Quad, 2, 1, 10.0);
        let raster = Raster::new(&ds, ds.len(), 5.0).unwrap();
        // Positions span [-20, 20] plus one tile of margin on each side.
        assert_eq!((raster.width, raster.height), (12, 12));
        let center = ds.index_of(AxialCoord::new(0, 0)).unwrap();
        assert_eq!(raster.get(5, 5), Some(center));
        assert_eq!(raster.get(0, 0), None);
        // Top row of the image is the highest y.
        let top = ds.index_of(AxialCoord::new(0, 2)).unwrap();
        assert_eq!(raster.get(5, 1), Some(top));
        assert!(Raster::new(&ds, ds.len(), 0.0).is_err());
    }

    #[test]
    fn test_colormap_ends() {
        assert_eq!(spectral_colormap(0.0), [94, 79, 163]);
        assert_eq!(spectral_colormap(-3.0), spectral_colormap(0.0));
        let high = spectral_colormap(1.0);
        assert!(high[0] > high[2]);
    }

    #[test]
    fn test_export_previews() {
        let (terrain, game) = finished();
        let dir = tempfile::tempdir().unwrap();

        let height = dir.path().join("height.png");
        export_heightmap(&terrain, &height, 50.0).unwrap();
        let img = image::open(&height).unwrap().to_rgb8();
        let raster = Raster::new(terrain.dataset(), terrain.mesh_len(), 50.0).unwrap();
        assert_eq!(img.dimensions(), (raster.width, raster.height));

        let types = dir.path().join("types.png");
        export_terrain_types(&terrain, &types, 50.0).unwrap();
        let img = image::open(&types).unwrap().to_rgb8();
        let (w, h) = img.dimensions();
        assert_eq!(img.get_pixel(w / 2, h / 2).0, TerrainType::Grass.color());

        let area = dir.path().join("area.png");
        export_block_levels(&game, BlockKind::Area, &area, 20.0).unwrap();
        let img = image::open(&area).unwrap().to_rgb8();
        let (w, h) = img.dimensions();
        assert_eq!(img.get_pixel(w / 2, h / 2).0, [255, 255, 255]);
    }

    #[test]
    fn test_summary_json() {
        let (terrain, game) = finished();
        let summary = GenerationSummary::new(5, &terrain, &game);
        assert_eq!(summary.game_tiles, 19);
        assert_eq!(summary.game_tiles_on_terrain, 19);
        assert_eq!(summary.terrain_types.get(&TerrainType::Grass), Some(&terrain.mesh_len()));
        assert_eq!(summary.area_chunks, 1);
        assert_eq!(summary.block_level_max[&BlockKind::Building], 13);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("summary.json");
        summary.write(&path).unwrap();
        let value: serde_json::Value = serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        assert_eq!(value["seed"], 5);
        assert_eq!(value["terrain_types"]["grass"], terrain.mesh_len());
        assert_eq!(value["block_level_max"]["Flying"], 3);
    }
}
