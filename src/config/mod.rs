// src/config/mod.rs

//! Pipeline description files.
//!
//! - `model.rs`: the TOML-backed data model, raw and validated.
//! - `loader.rs`: reading a file from disk.
//! - `validate.rs`: turning a raw config into a [`PipelineConfig`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{DEFAULT_CONFIG_FILE, load_and_validate, load_from_path};
pub use model::{PipelineConfig, RawPipelineConfig, ReactorSection, StageConfig, StageSpec};
pub use validate::parse_duration;
