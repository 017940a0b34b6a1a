//! Plain-text grid tables.
//!
//! | File | One line per | Layout |
//! |------|--------------|--------|
//! | `Params.data` | grid | `GridRange|NeighborRange|PointsNum[|TileSize]` |
//! | `PointIndices.data` | point | `X,Y|LinearIndex` |
//! | `Points.data` | point | `X,Y|PosX,PosY|RangeFromCenter` |
//! | `N<r>.data` | point | space separated `X,Y` entries, empty when none |

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::coords::{round_half_away, AxialCoord, Vec2};
use crate::error::{GridError, Result};

use super::{GridParams, GridPoint, NeighborRing};

pub const PARAMS_FILE: &str = "Params.data";
pub const POINT_INDICES_FILE: &str = "PointIndices.data";
pub const POINTS_FILE: &str = "Points.data";

const FIELD_SEP: char = '|';
const COORD_SEP: char = ',';
const ENTRY_SEP: char = ' ';

/// Neighbor table file name for a ring radius.
pub fn neighbor_file(radius: i32) -> String {
    format!("N{}.data", radius)
}

/// Two fractional digits, ties away from zero, no grouping, no negative zero.
pub fn format_float(value: f64) -> String {
    let rounded = round_half_away(value * 100.0) / 100.0;
    let rounded = if rounded == 0.0 { 0.0 } else { rounded };
    format!("{:.2}", rounded)
}

fn format_coord(c: AxialCoord) -> String {
    format!("{}{}{}", c.x, COORD_SEP, c.y)
}

// =============================================================================
// LINE FORMATTING
// =============================================================================

pub fn params_line(params: &GridParams) -> String {
    let mut line = format!(
        "{}{sep}{}{sep}{}",
        params.grid_range,
        params.neighbor_range,
        params.points_num,
        sep = FIELD_SEP
    );
    if let Some(tile_size) = params.tile_size {
        line.push(FIELD_SEP);
        line.push_str(&format_float(tile_size));
    }
    line
}

pub fn point_index_line(coord: AxialCoord, index: usize) -> String {
    format!("{}{}{}", format_coord(coord), FIELD_SEP, index)
}

pub fn point_line(point: &GridPoint) -> String {
    format!(
        "{}{sep}{}{}{}{sep}{}",
        format_coord(point.axial_coord),
        format_float(point.position.x),
        COORD_SEP,
        format_float(point.position.y),
        point.range_from_center,
        sep = FIELD_SEP
    )
}

pub fn neighbor_line(points: &[AxialCoord]) -> String {
    points
        .iter()
        .map(|c| format_coord(*c))
        .collect::<Vec<_>>()
        .join(&ENTRY_SEP.to_string())
}

// =============================================================================
// LINE PARSING
// =============================================================================

fn parse_num<T: std::str::FromStr>(text: &str, file: &str, line: usize) -> Result<T> {
    text.trim()
        .parse::<T>()
        .map_err(|_| GridError::parse(file, line, format!("invalid number '{}'", text)))
}

fn parse_coord(text: &str, file: &str, line: usize) -> Result<AxialCoord> {
    let (x, y) = text
        .split_once(COORD_SEP)
        .ok_or_else(|| GridError::parse(file, line, format!("invalid coordinate '{}'", text)))?;
    Ok(AxialCoord::new(parse_num(x, file, line)?, parse_num(y, file, line)?))
}

fn split_fields<'a>(text: &'a str, expected: usize, file: &str, line: usize) -> Result<Vec<&'a str>> {
    let fields: Vec<&str> = text.split(FIELD_SEP).collect();
    if fields.len() != expected {
        return Err(GridError::parse(
            file,
            line,
            format!("expected {} fields, found {}", expected, fields.len()),
        ));
    }
    Ok(fields)
}

/// Parse the header; `expect_tile_size` selects the 4-field variant.
pub fn parse_params(text: &str, expect_tile_size: bool) -> Result<GridParams> {
    let fields: Vec<&str> = text.trim().split(FIELD_SEP).collect();
    let expected = if expect_tile_size { 4 } else { 3 };
    if fields.len() != expected {
        return Err(GridError::ParamFieldCount {
            expected,
            found: fields.len(),
        });
    }
    let tile_size = if expect_tile_size {
        Some(parse_num::<f64>(fields[3], PARAMS_FILE, 0)?)
    } else {
        None
    };
    Ok(GridParams {
        grid_range: parse_num(fields[0], PARAMS_FILE, 0)?,
        neighbor_range: parse_num(fields[1], PARAMS_FILE, 0)?,
        points_num: parse_num(fields[2], PARAMS_FILE, 0)?,
        tile_size,
    })
}

pub fn parse_point_index(text: &str, line: usize) -> Result<(AxialCoord, usize)> {
    let fields = split_fields(text, 2, POINT_INDICES_FILE, line)?;
    Ok((
        parse_coord(fields[0], POINT_INDICES_FILE, line)?,
        parse_num(fields[1], POINT_INDICES_FILE, line)?,
    ))
}

pub fn parse_point(text: &str, line: usize) -> Result<GridPoint> {
    let fields = split_fields(text, 3, POINTS_FILE, line)?;
    let axial_coord = parse_coord(fields[0], POINTS_FILE, line)?;
    let (px, py) = fields[1]
        .split_once(COORD_SEP)
        .ok_or_else(|| GridError::parse(POINTS_FILE, line, "invalid position"))?;
    Ok(GridPoint {
        axial_coord,
        position: Vec2::new(parse_num(px, POINTS_FILE, line)?, parse_num(py, POINTS_FILE, line)?),
        vertices: Vec::new(),
        neighbors: Vec::new(),
        range_from_center: parse_num(fields[2], POINTS_FILE, line)?,
    })
}

/// Parse one neighbor line; `keep` filters out coordinates not in the grid.
pub fn parse_neighbor_line(
    text: &str,
    radius: i32,
    line: usize,
    keep: impl Fn(AxialCoord) -> bool,
) -> Result<NeighborRing> {
    let file = neighbor_file(radius);
    let mut points = Vec::new();
    for entry in text.split(ENTRY_SEP).filter(|e| !e.trim().is_empty()) {
        let coord = parse_coord(entry, &file, line)?;
        if keep(coord) {
            points.push(coord);
        }
    }
    Ok(NeighborRing::new(radius, points))
}

// =============================================================================
// FILES
// =============================================================================

/// Read a whole table; a missing file is its own error.
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(GridError::MissingFile(path.to_path_buf()));
    }
    let file = File::open(path).map_err(|e| GridError::io(path, e))?;
    BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| GridError::io(path, e))
}

/// Line-oriented writer that creates its directory on demand.
pub struct TableWriter {
    path: PathBuf,
    out: BufWriter<File>,
}

impl TableWriter {
    pub fn create(dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(dir).map_err(|e| GridError::io(dir, e))?;
        let path = dir.join(name);
        let file = File::create(&path).map_err(|e| GridError::io(&path, e))?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn write_line(&mut self, line: &str) -> Result<()> {
        writeln!(self.out, "{}", line).map_err(|e| GridError::io(&self.path, e))
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush().map_err(|e| GridError::io(&self.path, e))
    }
}
