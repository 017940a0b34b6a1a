//! Hex and quad terrain grids for strategy game worlds.
//!
//! The crate builds a coordinate grid with multi-radius neighbor tables,
//! persists and reloads it, synthesizes a heightfield with rivers over it and
//! classifies a hex game grid on top (heights, terrain types, trees, block
//! levels, islands). Each stage is a resumable [`workflow::Workflow`].

pub mod config;
pub mod coords;
pub mod error;
pub mod export;
pub mod game_grid;
pub mod grid;
pub mod noise_layers;
pub mod search;
pub mod seeds;
pub mod terrain;
pub mod topology;
pub mod workflow;
