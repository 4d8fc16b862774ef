//! Declarative block specifications.
//!
//! The launcher describes a chain as data (TOML/JSON); each spec variant
//! constructs the corresponding block with its explicit option overrides.

use std::collections::BTreeMap;

use chain_kit_common::OptionValue;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString, IntoStaticStr, VariantNames};

use crate::algorithms::{
    ExternalTool, GaussianDenoise, IntensityStats, RichardsonLucyDeconvolve, Threshold,
};
use crate::block::Block;
use crate::error::ProcessingError;

fn enabled_default() -> bool {
    true
}

/// One block of a chain, as configured by an operator
#[derive(
    Debug, Clone,
    Serialize, Deserialize, JsonSchema,
    Display, EnumString, EnumIter, VariantNames, IntoStaticStr,
    PartialEq
)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BlockSpec {
    /// Gaussian denoising; sigma defaults from the image's pixel size
    GaussianDenoise {
        #[schemars(range(min = 0.01))]
        sigma: Option<f64>,
        #[serde(default = "enabled_default")]
        enabled: bool,
    },
    /// Richardson-Lucy deconvolution with a Gaussian PSF
    Deconvolve {
        #[schemars(range(min = 0.01))]
        psf_sigma: f64,
        #[schemars(range(min = 1, max = 100))]
        iterations: Option<i64>,
        #[serde(default = "enabled_default")]
        enabled: bool,
    },
    /// Binary threshold on the luminance plane
    Threshold {
        #[schemars(range(min = 0, max = 255))]
        level: Option<i64>,
        #[serde(default = "enabled_default")]
        enabled: bool,
    },
    /// Luminance statistics report attached to the input image
    IntensityStats {
        #[schemars(range(min = 2, max = 1024))]
        bins: Option<i64>,
        #[serde(default = "enabled_default")]
        enabled: bool,
    },
    /// An installed command-line tool run over a materialized image
    ExternalTool {
        /// Executable name, resolved on PATH unless `bin` is given
        program: String,
        /// Explicit executable path
        bin: Option<String>,
        /// Argument template; `{input}` and `{output}` are substituted
        args: Vec<String>,
        timeout_secs: Option<i64>,
        #[serde(default = "enabled_default")]
        enabled: bool,
    },
}

impl BlockSpec {
    /// Get the JSON schema for all block specs
    pub fn schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(BlockSpec)
    }

    /// Get a list of all available spec names
    pub fn names() -> &'static [&'static str] {
        <Self as VariantNames>::VARIANTS
    }

    /// Get a description of the spec
    pub fn description(&self) -> &'static str {
        match self {
            Self::GaussianDenoise { .. } => "Gaussian denoising with image-derived default width",
            Self::Deconvolve { .. } => "Richardson-Lucy deconvolution with a Gaussian PSF",
            Self::Threshold { .. } => "Binary threshold on the luminance plane",
            Self::IntensityStats { .. } => "Luminance statistics published as a JSON report",
            Self::ExternalTool { .. } => "An installed executable run over a materialized image",
        }
    }

    /// Build the configured block. Only external tools can fail here, when
    /// their executable cannot be resolved.
    pub fn into_block(self) -> Result<Block, ProcessingError> {
        let block = match self {
            Self::GaussianDenoise { sigma, enabled } => {
                let mut supplied = BTreeMap::new();
                if let Some(sigma) = sigma {
                    supplied.insert("sigma".to_string(), OptionValue::Float(sigma));
                }
                configure(Block::new(GaussianDenoise).with_options(supplied), enabled)
            }
            Self::Deconvolve {
                psf_sigma,
                iterations,
                enabled,
            } => {
                let mut supplied = BTreeMap::from([(
                    "psf_sigma".to_string(),
                    OptionValue::Float(psf_sigma),
                )]);
                if let Some(iterations) = iterations {
                    supplied.insert("iterations".to_string(), OptionValue::Int(iterations));
                }
                configure(
                    Block::new(RichardsonLucyDeconvolve).with_options(supplied),
                    enabled,
                )
            }
            Self::Threshold { level, enabled } => {
                let mut supplied = BTreeMap::new();
                if let Some(level) = level {
                    supplied.insert("level".to_string(), OptionValue::Int(level));
                }
                configure(Block::new(Threshold).with_options(supplied), enabled)
            }
            Self::IntensityStats { bins, enabled } => {
                let mut supplied = BTreeMap::new();
                if let Some(bins) = bins {
                    supplied.insert("bins".to_string(), OptionValue::Int(bins));
                }
                configure(Block::new(IntensityStats).with_options(supplied), enabled)
            }
            Self::ExternalTool {
                program,
                bin,
                args,
                timeout_secs,
                enabled,
            } => {
                let tool = match bin {
                    Some(bin) => ExternalTool::with_path(&program, bin, args)?,
                    None => ExternalTool::new(&program, args)?,
                };
                let mut supplied = BTreeMap::new();
                if let Some(timeout_secs) = timeout_secs {
                    supplied.insert("timeout_secs".to_string(), OptionValue::Int(timeout_secs));
                }
                configure(Block::new(tool).with_options(supplied), enabled)
            }
        };
        Ok(block)
    }
}

fn configure(block: Block, enabled: bool) -> Block {
    if enabled {
        block
    } else {
        block.disabled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_round_trip() {
        let spec = BlockSpec::Deconvolve {
            psf_sigma: 1.5,
            iterations: Some(12),
            enabled: true,
        };
        let body = serde_json::to_string(&spec).unwrap();
        assert!(body.contains("\"type\":\"deconvolve\""));
        let back: BlockSpec = serde_json::from_str(&body).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_enabled_defaults_true() {
        let spec: BlockSpec = serde_json::from_str(
            r#"{"type": "gaussian_denoise", "params": {"sigma": 2.0}}"#,
        )
        .unwrap();
        let block = spec.into_block().unwrap();
        assert!(block.enabled());
        assert_eq!(block.identity().name, "denoise");
    }

    #[test]
    fn test_disabled_spec_builds_disabled_block() {
        let spec = BlockSpec::Threshold {
            level: None,
            enabled: false,
        };
        let block = spec.into_block().unwrap();
        assert!(!block.enabled());
    }

    #[test]
    fn test_unresolvable_external_tool_fails_at_build() {
        let spec = BlockSpec::ExternalTool {
            program: "surely-not-installed-anywhere".into(),
            bin: None,
            args: vec!["{input}".into(), "{output}".into()],
            timeout_secs: None,
            enabled: true,
        };
        assert!(matches!(
            spec.into_block(),
            Err(ProcessingError::MissingBinary(_))
        ));
    }

    #[test]
    fn test_names_cover_every_variant() {
        let names = BlockSpec::names();
        assert!(names.contains(&"gaussian_denoise"));
        assert!(names.contains(&"deconvolve"));
        assert!(names.contains(&"external_tool"));
        assert_eq!(names.len(), 5);
    }

    #[test]
    fn test_schema_generates() {
        let schema = BlockSpec::schema();
        let body = serde_json::to_string(&schema).unwrap();
        assert!(body.contains("psf_sigma"));
    }
}
