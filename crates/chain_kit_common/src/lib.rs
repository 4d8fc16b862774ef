//! # Chain Kit Common - Shared Types and Utilities
//!
//! A foundational library providing the shared vocabulary for the chain kit
//! ecosystem: image references, image metadata, block identities and option
//! values. Everything that the store, the processing blocks and the launcher
//! need to agree on lives here.
//!
//! ## Example
//!
//! ```rust
//! use chain_kit_common::{ImageMetadata, ImageRef, OptionValue};
//!
//! let reference = ImageRef::new("img-42");
//! assert_eq!(reference.to_string(), "img-42");
//!
//! let metadata = ImageMetadata::new("nucleus-stack", 512, 512).unwrap();
//! assert_eq!(metadata.channels, 1);
//!
//! let sigma = OptionValue::Float(1.5);
//! assert_eq!(sigma.as_float(), Some(1.5));
//! ```

use serde::{Deserialize, Serialize};
use schemars::JsonSchema;
use thiserror::Error;

// Re-exports for convenience
pub use chrono::{DateTime, Utc};

/// Result type for chain kit vocabulary operations
pub type Result<T> = std::result::Result<T, ChainKitError>;

/// Standard error type for the shared vocabulary
#[derive(Error, Debug)]
pub enum ChainKitError {
    #[error("Invalid image dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Image name must not be empty")]
    EmptyName,

    #[error("Invalid value: {message}")]
    InvalidValue { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Opaque, stable handle to an image held by the store.
///
/// The core never inspects the handle; it only passes it back to the store
/// that minted it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ImageRef(String);

impl ImageRef {
    /// Create a reference from a store-assigned identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The raw identifier as assigned by the store
    pub fn id(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ImageRef {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Metadata describing an image held by (or destined for) the store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ImageMetadata {
    /// Human-readable image name
    pub name: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Number of channels
    pub channels: u32,
    /// Number of z-sections in the stack
    pub z_sections: u32,
    /// Number of time points
    pub time_points: u32,
    /// Physical pixel size in micrometres, when known
    pub pixel_size_um: Option<f64>,
    /// Acquisition timestamp, when known
    pub acquired_at: Option<DateTime<Utc>>,
    /// Free-form description
    pub description: Option<String>,
}

impl ImageMetadata {
    /// Create metadata for a single-channel, single-section, single-timepoint image
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(ChainKitError::EmptyName);
        }
        if width == 0 || height == 0 {
            return Err(ChainKitError::InvalidDimensions { width, height });
        }
        Ok(Self {
            name,
            width,
            height,
            channels: 1,
            z_sections: 1,
            time_points: 1,
            pixel_size_um: None,
            acquired_at: None,
            description: None,
        })
    }

    pub fn with_channels(mut self, channels: u32) -> Self {
        self.channels = channels;
        self
    }

    pub fn with_pixel_size_um(mut self, pixel_size_um: f64) -> Self {
        self.pixel_size_um = Some(pixel_size_um);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Metadata for an image derived from this one, named by appending a suffix
    pub fn derived(&self, suffix: &str) -> Self {
        let mut derived = self.clone();
        derived.name = format!("{}-{}", self.name, suffix);
        derived.acquired_at = None;
        derived
    }
}

/// Stable name/version pair identifying a processing block variant.
///
/// Used for logging, per-member status reporting and option namespacing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub struct BlockIdentity {
    pub name: String,
    pub version: String,
}

impl BlockIdentity {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for BlockIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// A typed option value, as supplied by an operator or resolved from a default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl OptionValue {
    /// Name of the value's type, for validation messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::Text(_) => "text",
        }
    }

    /// Numeric view of the value; integers widen to floats
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for OptionValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::Text(v) => f.write_str(v),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_display() {
        let r = ImageRef::new("img-7");
        assert_eq!(r.to_string(), "img-7");
        assert_eq!(r.id(), "img-7");
    }

    #[test]
    fn test_metadata_rejects_zero_dimensions() {
        assert!(ImageMetadata::new("x", 0, 100).is_err());
        assert!(ImageMetadata::new("x", 100, 0).is_err());
        assert!(ImageMetadata::new("", 100, 100).is_err());
    }

    #[test]
    fn test_metadata_derived() {
        let meta = ImageMetadata::new("stack", 64, 64)
            .unwrap()
            .with_pixel_size_um(0.5);
        let child = meta.derived("denoised");
        assert_eq!(child.name, "stack-denoised");
        assert_eq!(child.pixel_size_um, Some(0.5));
        assert_eq!(child.width, 64);
    }

    #[test]
    fn test_block_identity_display() {
        let id = BlockIdentity::new("denoise", "1.2.0");
        assert_eq!(id.to_string(), "denoise@1.2.0");
    }

    #[test]
    fn test_option_value_accessors() {
        assert_eq!(OptionValue::Float(2.5).as_float(), Some(2.5));
        assert_eq!(OptionValue::Int(4).as_float(), Some(4.0));
        assert_eq!(OptionValue::Int(4).as_int(), Some(4));
        assert_eq!(OptionValue::Bool(true).as_bool(), Some(true));
        assert_eq!(OptionValue::Text("a".into()).as_text(), Some("a"));
        assert_eq!(OptionValue::Text("a".into()).as_float(), None);
    }
}
