use blocks::BlockSpec;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
    #[error(transparent)]
    TomlDeError(#[from] toml::de::Error),
    #[error(transparent)]
    TomlSerError(#[from] toml::ser::Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("Configuration lists no blocks")]
    NoBlocks,
    #[error("Missing 'origin' or 'import' field")]
    MissingOrigin,
    #[error("'origin' and 'import' are mutually exclusive")]
    ConflictingOrigin,
    #[error("Unsupported file format. Please use .toml or .json files")]
    UnsupportedFileFormat,
}

/// A chain launch described as data: where the store lives, which image to
/// start from, and the ordered block specifications.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct RunConfig {
    /// Root directory of the filesystem store
    pub store_root: String,
    /// Reference of an image already in the store
    pub origin: Option<String>,
    /// Path of an image file to import into the store as the origin
    pub import: Option<String>,
    pub blocks: Vec<BlockSpec>,
}

impl RunConfig {
    /// Load a run configuration from a TOML file
    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Load a run configuration from a TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a run configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Load a run configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Auto-detect file format and load the configuration
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        match path_ref.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            _ => Err(ConfigError::UnsupportedFileFormat),
        }
    }

    /// Convert the configuration to a pretty JSON string
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(&self)?)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.blocks.is_empty() {
            return Err(ConfigError::NoBlocks);
        }
        match (&self.origin, &self.import) {
            (None, None) => Err(ConfigError::MissingOrigin),
            (Some(_), Some(_)) => Err(ConfigError::ConflictingOrigin),
            _ => Ok(()),
        }
    }
}
