use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InitError {
    #[error("io: {0}")]
    Io(#[from] io::Error),

    #[error("config: {0}")]
    Config(#[from] ConfigError),

    #[error("malformed scenario {0:?}: {1}")]
    MalformedScenario(PathBuf, serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    /// Missing key in table.
    #[error("missing key: {0}")]
    MissingKey(String),

    /// Tried to traverse into a primitive.
    #[error("can't traverse into non-table key: {0}")]
    TraverseNonTableAt(String),

    /// Invalid override string.
    #[error("Invalid override: '{0}'")]
    InvalidOverride(String),

    #[error("parse: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize: {0}")]
    Serialize(#[from] toml::ser::Error),
}
