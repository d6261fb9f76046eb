//! Error types for the command line tool

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors reported by the `qflash` binary
#[derive(Debug, Error)]
pub enum CliError {
    /// File access failed
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Configuration file could not be parsed
    #[error("invalid configuration in {}: {source}", path.display())]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Saved device state is unusable
    #[error("invalid device state in {}: {reason}", path.display())]
    State { path: PathBuf, reason: String },

    /// Device state could not be serialized
    #[error("failed to serialize device state: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Flash operation failed
    #[error("flash error: {0}")]
    Flash(#[from] qflash_core::Error),

    /// Arguments do not fit the device
    #[error("{0}")]
    InvalidArgument(String),
}

pub type Result<T> = std::result::Result<T, CliError>;
