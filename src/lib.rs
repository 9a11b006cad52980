//! Directory-tree image classification training driver built on Burn.
//!
//! A run is described by a single [`config::RunConfig`]; its content hash
//! names a run directory that collects provenance, per-epoch weights, and
//! a wall-clock CSV progress log. Data streams from class-per-subdirectory
//! trees through augmenting, endlessly wrapping generators, and the epoch
//! loop is bounded by explicit step counts.

pub mod backend;
pub mod config;
pub mod dataset;
pub mod model;
pub mod startup;
pub mod training;
pub mod utils;

pub use config::{RunConfig, RunDirectory};
pub use training::{train, TrainOutcome};
pub use utils::{Result, TrainError};
