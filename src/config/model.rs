// src/config/model.rs

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::spawn::CommandSpec;
use crate::types::FilterKind;

/// Pipeline description as read from a TOML file.
///
/// ```toml
/// [reactor]
/// timeout = "250ms"
///
/// [[stage]]
/// command = "gzip -1 -n"
///
/// [[stage]]
/// filter = "uppercase"
/// ```
///
/// Use [`PipelineConfig::try_from`] to validate it.
#[derive(Debug, Clone, Deserialize)]
pub struct RawPipelineConfig {
    #[serde(default)]
    pub reactor: ReactorSection,

    /// Stages in pipeline order, from `[[stage]]` tables.
    #[serde(default, rename = "stage")]
    pub stages: Vec<StageConfig>,
}

/// `[reactor]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ReactorSection {
    /// How long one `wait` may block, e.g. `"250ms"`, `"1s"`.
    #[serde(default = "default_timeout")]
    pub timeout: String,
}

fn default_timeout() -> String {
    "250ms".to_string()
}

impl Default for ReactorSection {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
        }
    }
}

/// One `[[stage]]` table. Exactly one of `command` / `filter` must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StageConfig {
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub filter: Option<FilterKind>,

    /// Working directory for `command`.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment for `command`; replaces the inherited one when present.
    #[serde(default)]
    pub env: Option<BTreeMap<String, String>>,
}

/// A validated stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageSpec {
    Command(CommandSpec),
    Filter(FilterKind),
}

impl fmt::Display for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageSpec::Command(spec) => write!(f, "command: {spec}"),
            StageSpec::Filter(kind) => write!(f, "filter: {kind}"),
        }
    }
}

/// Validated pipeline configuration.
///
/// Only constructible through `TryFrom<RawPipelineConfig>`.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    timeout: Duration,
    stages: Vec<StageSpec>,
}

impl PipelineConfig {
    pub(crate) fn new_unchecked(timeout: Duration, stages: Vec<StageSpec>) -> Self {
        Self { timeout, stages }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }
}
