//! In-memory store, for tests and demos.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chain_kit_common::{ImageMetadata, ImageRef, OptionValue};
use image::DynamicImage;

use super::{FetchedImage, ImageStore, StoreError};

#[derive(Debug, Clone)]
pub struct Attachment {
    pub name: String,
    pub content: Vec<u8>,
    pub mime: String,
}

#[derive(Default)]
struct Inner {
    images: BTreeMap<String, FetchedImage>,
    attachments: BTreeMap<String, Vec<Attachment>>,
    defaults: BTreeMap<(String, String), OptionValue>,
    links: Vec<(ImageRef, ImageRef)>,
    next_id: u64,
    fail_writes: bool,
    fail_attachments: bool,
    fail_links: bool,
}

/// An [`ImageStore`] backed by process memory.
///
/// References are minted sequentially as `img-1`, `img-2`, …  Failure
/// injection toggles let tests exercise the publish and annotation error
/// paths.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed an image, obtaining its reference
    pub fn insert_image(&self, pixels: DynamicImage, metadata: ImageMetadata) -> ImageRef {
        let mut inner = self.lock();
        let reference = Self::mint(&mut inner);
        inner
            .images
            .insert(reference.id().to_string(), FetchedImage { pixels, metadata });
        reference
    }

    /// Register a store-side default for an option of the given image
    pub fn set_default(&self, reference: &ImageRef, option: &str, value: OptionValue) {
        self.lock()
            .defaults
            .insert((reference.id().to_string(), option.to_string()), value);
    }

    /// Make subsequent `store_image` calls fail
    pub fn fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    /// Make subsequent `attach_file` calls fail
    pub fn fail_attachments(&self, fail: bool) {
        self.lock().fail_attachments = fail;
    }

    /// Make subsequent `link_parent_child` calls fail
    pub fn fail_links(&self, fail: bool) {
        self.lock().fail_links = fail;
    }

    pub fn contains(&self, reference: &ImageRef) -> bool {
        self.lock().images.contains_key(reference.id())
    }

    pub fn image_count(&self) -> usize {
        self.lock().images.len()
    }

    /// All recorded parent→child links, in creation order
    pub fn links(&self) -> Vec<(ImageRef, ImageRef)> {
        self.lock().links.clone()
    }

    /// Attachments on the given image, in creation order
    pub fn attachments(&self, reference: &ImageRef) -> Vec<Attachment> {
        self.lock()
            .attachments
            .get(reference.id())
            .cloned()
            .unwrap_or_default()
    }

    fn mint(inner: &mut Inner) -> ImageRef {
        inner.next_id += 1;
        ImageRef::new(format!("img-{}", inner.next_id))
    }
}

impl ImageStore for MemoryStore {
    fn fetch_image(&self, reference: &ImageRef) -> Result<FetchedImage, StoreError> {
        self.lock()
            .images
            .get(reference.id())
            .cloned()
            .ok_or_else(|| StoreError::NotFound(reference.clone()))
    }

    fn fetch_default(
        &self,
        reference: &ImageRef,
        option: &str,
    ) -> Result<OptionValue, StoreError> {
        self.lock()
            .defaults
            .get(&(reference.id().to_string(), option.to_string()))
            .cloned()
            .ok_or_else(|| StoreError::NoDefault {
                reference: reference.clone(),
                option: option.to_string(),
            })
    }

    fn store_image(
        &self,
        pixels: DynamicImage,
        metadata: ImageMetadata,
    ) -> Result<ImageRef, StoreError> {
        let mut inner = self.lock();
        if inner.fail_writes {
            return Err(StoreError::StoreUnavailable("writes disabled".into()));
        }
        let reference = Self::mint(&mut inner);
        inner
            .images
            .insert(reference.id().to_string(), FetchedImage { pixels, metadata });
        Ok(reference)
    }

    fn attach_file(
        &self,
        reference: &ImageRef,
        name: &str,
        content: &[u8],
        mime: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.fail_attachments {
            return Err(StoreError::AttachFailed("attachments disabled".into()));
        }
        if !inner.images.contains_key(reference.id()) {
            return Err(StoreError::AttachFailed(format!("unknown image {reference}")));
        }
        inner
            .attachments
            .entry(reference.id().to_string())
            .or_default()
            .push(Attachment {
                name: name.to_string(),
                content: content.to_vec(),
                mime: mime.to_string(),
            });
        Ok(())
    }

    fn link_parent_child(&self, parent: &ImageRef, child: &ImageRef) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if inner.fail_links {
            return Err(StoreError::LinkFailed("links disabled".into()));
        }
        if !inner.images.contains_key(parent.id()) || !inner.images.contains_key(child.id()) {
            return Err(StoreError::LinkFailed(format!(
                "unknown image in link {parent} -> {child}"
            )));
        }
        inner.links.push((parent.clone(), child.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    fn blank(name: &str) -> (DynamicImage, ImageMetadata) {
        (
            DynamicImage::new_luma8(8, 8),
            ImageMetadata::new(name, 8, 8).unwrap(),
        )
    }

    #[test]
    fn test_sequential_references() {
        let store = MemoryStore::new();
        let (pixels, meta) = blank("a");
        let first = store.insert_image(pixels, meta);
        let (pixels, meta) = blank("b");
        let second = store.store_image(pixels, meta).unwrap();
        assert_eq!(first.id(), "img-1");
        assert_eq!(second.id(), "img-2");
    }

    #[test]
    fn test_fetch_missing_image() {
        let store = MemoryStore::new();
        let err = store.fetch_image(&ImageRef::new("img-99")).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_defaults_per_image() {
        let store = MemoryStore::new();
        let (pixels, meta) = blank("a");
        let reference = store.insert_image(pixels, meta);
        store.set_default(&reference, "sigma", OptionValue::Float(2.0));

        let value = store.fetch_default(&reference, "sigma").unwrap();
        assert_eq!(value, OptionValue::Float(2.0));
        assert!(matches!(
            store.fetch_default(&reference, "other"),
            Err(StoreError::NoDefault { .. })
        ));
    }

    #[test]
    fn test_failure_injection() {
        let store = MemoryStore::new();
        let (pixels, meta) = blank("a");
        let reference = store.insert_image(pixels, meta);

        store.fail_attachments(true);
        assert!(store
            .attach_file(&reference, "log.txt", b"x", "text/plain")
            .is_err());
        store.fail_attachments(false);
        assert!(store
            .attach_file(&reference, "log.txt", b"x", "text/plain")
            .is_ok());
        assert_eq!(store.attachments(&reference).len(), 1);
    }

    #[test]
    fn test_links_require_both_ends() {
        let store = MemoryStore::new();
        let (pixels, meta) = blank("a");
        let parent = store.insert_image(pixels, meta);
        let missing = ImageRef::new("img-42");
        assert!(store.link_parent_child(&parent, &missing).is_err());
        assert!(store.links().is_empty());
    }
}
