// src/lib.rs

pub mod api;
pub mod apigen;
pub mod array;
pub mod config;
pub mod docgen;
pub mod effective_field;
pub mod engine;
pub mod error;
pub mod fft;
pub mod geometry_mask;
pub mod graph;
pub mod grid;
pub mod ipc;
pub mod llg;
pub mod logging;
pub mod magstate;
pub mod modules;
pub mod output;
pub mod ovf;
pub mod params;
pub mod quant;
pub mod solver;
pub mod updaters;
pub mod vec3;
pub mod visualisation;

pub use error::{EngineError, Result};
