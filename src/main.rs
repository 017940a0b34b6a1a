use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use clap::{Parser, Subcommand, ValueEnum};
use log::{error, info, LevelFilter};

use grid_terrain::config::GeneratorConfig;
use grid_terrain::error::{GridError, Result};
use grid_terrain::export::{export_block_levels, export_heightmap, export_terrain_types, GenerationSummary};
use grid_terrain::game_grid::blocking::BlockKind;
use grid_terrain::game_grid::GameGridGenerator;
use grid_terrain::grid::creator::{CreatorConfig, GridCreator};
use grid_terrain::grid::loader::GridLoader;
use grid_terrain::grid::GridDataset;
use grid_terrain::terrain::TerrainGenerator;
use grid_terrain::workflow::{drive, LoopSettings};

#[derive(Parser, Debug)]
#[command(name = "grid_terrain")]
#[command(about = "Build hex/quad terrain grids with rivers, blocking zones and trees")]
struct Args {
    /// JSON config file; missing sections use defaults
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: LevelFilter,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write the grid data tables
    Create {
        /// Which grid to write
        #[arg(long, value_enum, default_value = "both")]
        grid: GridChoice,
    },
    /// Load the grids, generate terrain and game grid, write previews
    Generate {
        /// Master seed (overrides the config)
        #[arg(short, long)]
        seed: Option<u64>,

        /// Output directory for previews and the summary
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Rings of the terrain grid to use
        #[arg(long)]
        terrain_range: Option<i32>,

        /// Rings of the game grid to use
        #[arg(long)]
        game_range: Option<i32>,

        /// Route and carve rivers
        #[arg(long)]
        rivers: bool,

        /// Dig pools along the rivers
        #[arg(long)]
        pools: bool,

        /// Carve lakes and seas from the water noise
        #[arg(long)]
        water: bool,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum GridChoice {
    Game,
    Terrain,
    Both,
}

/// Timestamped log lines on stderr.
fn log_builder(level: LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).format(|buf, record| {
        writeln!(
            buf,
            "{} {:<5} {}",
            Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            record.args()
        )
    });
    builder
}

fn main() {
    let args = Args::parse();
    log_builder(args.log_level).init();

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => GeneratorConfig::load(path)?,
        None => GeneratorConfig::default(),
    };

    match args.command {
        Command::Create { grid } => {
            if grid != GridChoice::Terrain {
                create_grid("game grid creator", &config.game_grid, &config.loop_settings)?;
            }
            if grid != GridChoice::Game {
                create_grid("terrain grid creator", &config.terrain_grid, &config.loop_settings)?;
            }
            Ok(())
        }
        Command::Generate {
            seed,
            output,
            terrain_range,
            game_range,
            rivers,
            pools,
            water,
        } => {
            if let Some(seed) = seed {
                config.seed = seed;
            }
            if let Some(output) = output {
                config.output_dir = output;
            }
            if let Some(range) = terrain_range {
                config.terrain.grid_range = range;
            }
            if let Some(range) = game_range {
                config.game.grid_range = range;
            }
            config.terrain.river.enabled |= rivers;
            config.terrain.pool.enabled |= pools;
            config.terrain.water.enabled |= water;
            config.validate()?;
            generate(&config)
        }
    }
}

fn create_grid(name: &str, grid: &CreatorConfig, settings: &LoopSettings) -> Result<()> {
    let start = Instant::now();
    let mut creator = GridCreator::new(name, grid.clone(), *settings);
    drive(&mut creator, &(), settings, std::thread::sleep)?;
    info!(
        "{}: {} {} points in {} in {:.1}s",
        name,
        creator.points().len(),
        grid.topology,
        grid.dir.display(),
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn load_grid(name: &str, grid: &CreatorConfig, settings: &LoopSettings) -> Result<Arc<GridDataset>> {
    let mut loader = GridLoader::new(name, GeneratorConfig::loader_config(grid), *settings);
    drive(&mut loader, &(), settings, std::thread::sleep)?;
    loader
        .into_dataset()
        .map(Arc::new)
        .ok_or_else(|| GridError::MissingCollaborator(format!("{} dataset", name)))
}

fn generate(config: &GeneratorConfig) -> Result<()> {
    let start = Instant::now();
    let settings = config.loop_settings;
    let seeds = config.seeds();
    info!("seed {}", config.seed);

    let terrain_grid = load_grid("terrain grid loader", &config.terrain_grid, &settings)?;
    let game_grid = load_grid("game grid loader", &config.game_grid, &settings)?;

    let mut terrain = TerrainGenerator::new(
        "terrain",
        terrain_grid,
        config.terrain.clone(),
        &seeds,
        &config.noise,
        settings,
    );
    let mut game = GameGridGenerator::new("game grid", game_grid, config.game.clone(), &seeds, settings);
    drive(&mut terrain, &(), &settings, std::thread::sleep)?;
    drive(&mut game, &terrain, &settings, std::thread::sleep)?;
    info!("generation finished in {:.1}s", start.elapsed().as_secs_f64());

    let out = &config.output_dir;
    std::fs::create_dir_all(out).map_err(|e| GridError::io(out, e))?;
    export_heightmap(&terrain, &out.join("height.png"), config.pixel_size)?;
    export_terrain_types(&terrain, &out.join("terrain_types.png"), config.pixel_size)?;
    for &kind in BlockKind::all() {
        let path = out.join(format!("{}_block.png", kind));
        export_block_levels(&game, kind, &path, config.pixel_size)?;
    }
    GenerationSummary::new(config.seed, &terrain, &game).write(&out.join("summary.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_flag() {
        let args = Args::try_parse_from(["grid_terrain", "--log-level", "debug", "create", "--grid", "game"]).unwrap();
        assert_eq!(args.log_level, LevelFilter::Debug);
        assert!(matches!(args.command, Command::Create { grid: GridChoice::Game }));
        assert_eq!(log_builder(args.log_level).build().filter(), LevelFilter::Debug);

        let args = Args::try_parse_from(["grid_terrain", "generate", "--rivers"]).unwrap();
        assert_eq!(args.log_level, LevelFilter::Info);
        assert_eq!(log_builder(args.log_level).build().filter(), LevelFilter::Info);
    }
}
