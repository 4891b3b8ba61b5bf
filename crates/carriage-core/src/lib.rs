//! Individual-based stochastic simulator of multi-strain bacterial
//! colonization under antibiotic treatment in an age-structured host
//! population.
//!
//! The kernel advances a fixed-size population of hosts through birth,
//! birthdays, treatment courses, colonization, clearance, and death over
//! decades of simulated time, popping discrete events from an adaptive
//! calendar queue (or an indexed heap). Population-level counts are
//! maintained incrementally alongside per-host state and re-verified
//! periodically. Everything is single-threaded and deterministic for a
//! given seed.

pub mod checkpoint;
pub mod config;
pub mod dist;
pub mod host;
pub mod model;
pub mod queue;
pub mod sink;

pub use config::{Config, ConfigError, Parameters};
pub use model::{Event, Model, ModelInitError};
pub use sink::{JsonlSink, MemorySink, OutputRow, OutputSink, SinkError};
