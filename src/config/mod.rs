//! Pipeline Configuration Module
//!
//! Provides the single [`PipelineConfig`] loaded once at startup and passed
//! by reference to the queue, scorer, hub, producers and transport.
//!
//! ## Loading Order
//!
//! 1. `KPI_SENTINEL_CONFIG` environment variable (path to TOML file)
//! 2. `kpi_sentinel.toml` in the current working directory
//! 3. Built-in defaults (see [`defaults`])
//!
//! ## Usage
//!
//! ```ignore
//! let config = PipelineConfig::load();
//! let pipeline = Pipeline::new(&config);
//! ```

mod pipeline_config;
pub mod defaults;

pub use pipeline_config::*;
