//! # Blocks - Batch Image Processing Chains
//!
//! A trait-based library for composing image-processing pipelines run on a
//! processing grid. An atomic unit of work (a *block*) goes through a fixed
//! five-stage lifecycle (acquire, configure, process, publish, annotate),
//! and ordered sequences of blocks (*chains*) feed each published output
//! into the next member while recording provenance links in the store.
//!
//! ## Core Features
//!
//! - **Trait-based Architecture**: add an algorithm by implementing the
//!   [`Processor`] trait; acquisition, option validation, publication and
//!   provenance annotation are inherited from the lifecycle
//! - **Store Abstraction**: all persistence goes through the [`ImageStore`]
//!   capability trait; in-memory and directory-backed stores included
//! - **Image-derived Defaults**: option defaults may be computed from the
//!   acquired image, so validation runs after acquisition
//! - **Provenance Links**: every published output is linked to its source,
//!   and a chain links its very first input to its very last output
//! - **Best-effort Annotation**: a published result never fails because a
//!   log attachment or link could not be written
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blocks::{Block, Chain, NoopKeepAlive};
//! use blocks::algorithms::GaussianDenoise;
//! use blocks::store::fs::FsStore;
//! use chain_kit_common::ImageRef;
//!
//! let store = FsStore::open("./store")?;
//! let mut chain = Chain::builder()
//!     .add_block(Block::new(GaussianDenoise))
//!     .build()?;
//!
//! let result = chain.launch(&store, &ImageRef::new("img-1"), &NoopKeepAlive);
//! println!("final: {:?}", result.final_ref);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

// Core modules
pub mod algorithms;
pub mod block;
pub mod chain;
pub mod error;
pub mod keepalive;
pub mod log;
pub mod options;
pub mod spec;
pub mod store;

// Re-exports for convenience
pub use block::{
    AcquiredImage, Block, BlockResult, BlockStage, BlockStatus, ProcessContext, ProcessOutput,
    Processor,
};
pub use chain::{Chain, ChainBuilder, ChainResult, ChainStatus, MemberOutcome};
pub use error::{BlockError, ChainError, ErrorKind, ProcessingError, Result};
pub use keepalive::{KeepAlive, NoopKeepAlive};
pub use log::LogBuffer;
pub use options::{Constraint, DefaultSource, OptionDecl, OptionKind, ResolvedOptions};
pub use spec::BlockSpec;
pub use store::{FetchedImage, ImageStore, StoreError};
