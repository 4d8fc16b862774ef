use chain_kit_common::{ImageRef, OptionValue};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use strum::Display;
use thiserror::Error;

use crate::block::BlockStage;
use crate::store::StoreError;

pub type Result<T> = std::result::Result<T, BlockError>;

/// Fatal errors of a block lifecycle run.
///
/// Any of these transitions the block to `Failed` and aborts the owning
/// chain. Annotation problems are not errors; they surface as warnings on
/// an otherwise successful result.
#[derive(Error, Debug)]
pub enum BlockError {
    #[error("failed to acquire image {reference}: {source}")]
    Acquisition {
        reference: ImageRef,
        #[source]
        source: StoreError,
    },

    #[error("invalid value for option `{option}` ({value}): {reason}")]
    OptionValidation {
        option: String,
        value: OptionValue,
        reason: String,
    },

    #[error("processing failed: {0}")]
    Processing(#[from] ProcessingError),

    #[error("failed to publish output: {0}")]
    Publish(#[source] StoreError),

    #[error("resolved options are not available while the block is {stage}")]
    OptionsUnavailable { stage: BlockStage },

    #[error("cannot enter the {entering} stage while the block is {current}")]
    StageOrder {
        entering: BlockStage,
        current: BlockStage,
    },
}

impl BlockError {
    /// Shorthand for an option validation failure
    pub fn invalid_option(
        option: impl Into<String>,
        value: OptionValue,
        reason: impl Into<String>,
    ) -> Self {
        Self::OptionValidation {
            option: option.into(),
            value,
            reason: reason.into(),
        }
    }

    /// The coarse kind of this error, for aggregate reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Acquisition { .. } => ErrorKind::Acquisition,
            Self::OptionValidation { .. } => ErrorKind::OptionValidation,
            Self::Processing(_) => ErrorKind::Processing,
            Self::Publish(_) => ErrorKind::Publish,
            Self::OptionsUnavailable { .. } | Self::StageOrder { .. } => ErrorKind::Lifecycle,
        }
    }
}

/// Coarse error classification carried in block and chain results
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Acquisition,
    OptionValidation,
    Processing,
    Publish,
    Lifecycle,
}

/// Errors raised by the algorithm-specific process stage
#[derive(Error, Debug)]
pub enum ProcessingError {
    #[error("no executable found for `{0}`")]
    MissingBinary(String),

    #[error("`{command}` exited with status {status}")]
    BadExit { command: String, status: i32 },

    #[error("processing exceeded the {limit_secs}s timeout")]
    Timeout { limit_secs: u64 },

    #[error("image cannot be processed: {0}")]
    InvalidImage(String),

    #[error("{0}")]
    Algorithm(String),

    #[error("I/O during processing: {0}")]
    Io(#[from] std::io::Error),

    #[error("image codec error: {0}")]
    Codec(#[from] image::ImageError),
}

/// Errors building a chain
#[derive(Error, Debug)]
pub enum ChainError {
    #[error("a chain needs at least one block")]
    Empty,
}
