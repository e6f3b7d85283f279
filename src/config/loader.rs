// src/config/loader.rs

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::model::{PipelineConfig, RawPipelineConfig};
use crate::errors::Result;

/// Read and deserialize a pipeline file without validating it.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPipelineConfig> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawPipelineConfig = toml::from_str(&contents)?;
    debug!(path = %path.display(), stages = config.stages.len(), "pipeline file loaded");

    Ok(config)
}

/// Read, deserialize and validate a pipeline file.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PipelineConfig> {
    let raw_config = load_from_path(&path)?;
    let config = PipelineConfig::try_from(raw_config)?;
    Ok(config)
}

/// Pipeline file looked up in the current working directory by default.
pub const DEFAULT_CONFIG_FILE: &str = "Tickpipe.toml";
