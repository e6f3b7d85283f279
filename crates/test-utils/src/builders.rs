#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use tickpipe::config::{PipelineConfig, RawPipelineConfig, ReactorSection, StageConfig};
use tickpipe::types::FilterKind;

/// Builder for `PipelineConfig` to simplify test setup.
pub struct PipelineConfigBuilder {
    config: RawPipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: RawPipelineConfig {
                reactor: ReactorSection::default(),
                stages: Vec::new(),
            },
        }
    }

    pub fn timeout(mut self, timeout: &str) -> Self {
        self.config.reactor.timeout = timeout.to_string();
        self
    }

    pub fn command(self, command: &str) -> Self {
        self.stage(StageConfigBuilder::command(command).build())
    }

    pub fn filter(self, kind: FilterKind) -> Self {
        self.stage(StageConfigBuilder::filter(kind).build())
    }

    pub fn stage(mut self, stage: StageConfig) -> Self {
        self.config.stages.push(stage);
        self
    }

    pub fn build_raw(self) -> RawPipelineConfig {
        self.config
    }

    pub fn build(self) -> PipelineConfig {
        PipelineConfig::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for PipelineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for one `[[stage]]` table.
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn command(command: &str) -> Self {
        Self {
            stage: StageConfig {
                command: Some(command.to_string()),
                ..StageConfig::default()
            },
        }
    }

    pub fn filter(kind: FilterKind) -> Self {
        Self {
            stage: StageConfig {
                filter: Some(kind),
                ..StageConfig::default()
            },
        }
    }

    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.stage.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.stage
            .env
            .get_or_insert_with(BTreeMap::new)
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}
