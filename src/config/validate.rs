// src/config/validate.rs

use std::time::Duration;

use crate::config::model::{PipelineConfig, RawPipelineConfig, StageConfig, StageSpec};
use crate::errors::{Result, TickpipeError};
use crate::spawn::CommandSpec;

impl TryFrom<RawPipelineConfig> for PipelineConfig {
    type Error = TickpipeError;

    fn try_from(raw: RawPipelineConfig) -> std::result::Result<Self, Self::Error> {
        ensure_has_stages(&raw)?;
        let timeout = validate_timeout(&raw.reactor.timeout)?;
        let stages = raw
            .stages
            .into_iter()
            .enumerate()
            .map(|(index, stage)| validate_stage(index, stage))
            .collect::<Result<Vec<_>>>()?;
        Ok(PipelineConfig::new_unchecked(timeout, stages))
    }
}

fn ensure_has_stages(cfg: &RawPipelineConfig) -> Result<()> {
    if cfg.stages.is_empty() {
        return Err(TickpipeError::ConfigError(
            "config must contain at least one [[stage]] table".to_string(),
        ));
    }
    Ok(())
}

fn validate_timeout(timeout: &str) -> Result<Duration> {
    let duration = parse_duration(timeout)
        .map_err(|e| TickpipeError::ConfigError(format!("[reactor].timeout: {e}")))?;
    if duration.is_zero() {
        return Err(TickpipeError::ConfigError(
            "[reactor].timeout must be > 0 (got 0)".to_string(),
        ));
    }
    Ok(duration)
}

fn validate_stage(index: usize, stage: StageConfig) -> Result<StageSpec> {
    match (stage.command, stage.filter) {
        (Some(command), None) => {
            if command.trim().is_empty() {
                return Err(TickpipeError::ConfigError(format!(
                    "stage {index} has an empty `command`"
                )));
            }
            Ok(StageSpec::Command(CommandSpec {
                command,
                cwd: stage.cwd,
                env: stage.env,
            }))
        }
        (None, Some(kind)) => {
            if stage.cwd.is_some() || stage.env.is_some() {
                return Err(TickpipeError::ConfigError(format!(
                    "stage {index}: `cwd` and `env` only apply to `command` stages"
                )));
            }
            Ok(StageSpec::Filter(kind))
        }
        (Some(_), Some(_)) => Err(TickpipeError::ConfigError(format!(
            "stage {index} sets both `command` and `filter`"
        ))),
        (None, None) => Err(TickpipeError::ConfigError(format!(
            "stage {index} needs either `command` or `filter`"
        ))),
    }
}

/// Parse `<n>ms`, `<n>s`, `<n>m` or `<n>h`.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{num_part}': {e}"))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{unit}'; expected ms, s, m, or h"
        )),
    }
}
