// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Liveness loss at runtime (a child exiting, a broken pipe) is never an
//! error here: it shows up in [`State`](crate::stage::State) instead. Only
//! construction-time failures and callback failures surface as
//! [`TickpipeError`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TickpipeError {
    #[error("Could not spawn '{command}': {message}")]
    Spawn { command: String, message: String },

    #[error("Invalid sink: {0}")]
    InvalidSink(String),

    #[error("Cannot install handler for signal {signal}: {source}")]
    Signal {
        signal: i32,
        #[source]
        source: std::io::Error,
    },

    #[error("Filter transform failed: {0}")]
    Transform(#[source] anyhow::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<nix::errno::Errno> for TickpipeError {
    fn from(errno: nix::errno::Errno) -> Self {
        TickpipeError::IoError(std::io::Error::from(errno))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, TickpipeError>;
