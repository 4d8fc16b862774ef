//! The store capability surface.
//!
//! Everything a block reads or writes goes through [`ImageStore`]: image
//! payloads, store-side option defaults, file annotations and parent→child
//! provenance links. The core treats each store write as atomic and durable
//! and does no locking of its own; a lifecycle run owns its references
//! exclusively for its duration.

pub mod fs;
pub mod memory;

use chain_kit_common::{ImageMetadata, ImageRef, OptionValue};
use image::DynamicImage;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("image {0} not found")]
    NotFound(ImageRef),
    #[error("image {reference} is unreadable: {reason}")]
    Unreadable { reference: ImageRef, reason: String },
    #[error("no stored default for option `{option}` of {reference}")]
    NoDefault { reference: ImageRef, option: String },
    #[error("store rejected the image: {0}")]
    StoreRejected(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("failed to attach file: {0}")]
    AttachFailed(String),
    #[error("failed to create provenance link: {0}")]
    LinkFailed(String),
}

/// An image payload together with its metadata, as fetched from a store
#[derive(Debug, Clone)]
pub struct FetchedImage {
    pub pixels: DynamicImage,
    pub metadata: ImageMetadata,
}

/// A backend holding images, metadata and annotations.
///
/// Implementations take `&self`; a store is shared between the members of a
/// chain and must manage its own interior mutability.
pub trait ImageStore: Send + Sync {
    /// Fetch an image's pixel data and metadata
    fn fetch_image(&self, reference: &ImageRef) -> Result<FetchedImage, StoreError>;

    /// Fetch a store-side default value for an option of the given image
    fn fetch_default(&self, reference: &ImageRef, option: &str)
        -> Result<OptionValue, StoreError>;

    /// Persist a new image, obtaining its reference
    fn store_image(
        &self,
        pixels: DynamicImage,
        metadata: ImageMetadata,
    ) -> Result<ImageRef, StoreError>;

    /// Attach a named file (log, report) to an image
    fn attach_file(
        &self,
        reference: &ImageRef,
        name: &str,
        content: &[u8],
        mime: &str,
    ) -> Result<(), StoreError>;

    /// Record a directed parent→child provenance link
    fn link_parent_child(&self, parent: &ImageRef, child: &ImageRef) -> Result<(), StoreError>;
}
