//! Directory-backed store.
//!
//! Layout under the root directory:
//!
//! ```text
//! root/
//!   images/img-<n>.png       pixel data
//!   images/img-<n>.json      metadata sidecar
//!   attachments/img-<n>/     file annotations
//!   links.json               parent→child lineage records
//!   defaults.json            store-side option defaults
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chain_kit_common::{ImageMetadata, ImageRef, OptionValue};
use image::DynamicImage;
use serde::{Deserialize, Serialize};

use super::{FetchedImage, ImageStore, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LinkRecord {
    parent: String,
    child: String,
}

pub struct FsStore {
    root: PathBuf,
    next_id: Mutex<u64>,
}

impl FsStore {
    /// Open a store rooted at `root`, creating the layout if needed.
    ///
    /// Reference numbering resumes from the highest id already present.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(root.join("images"))
            .and_then(|_| fs::create_dir_all(root.join("attachments")))
            .map_err(|e| StoreError::StoreUnavailable(e.to_string()))?;

        let mut highest = 0u64;
        let entries = fs::read_dir(root.join("images"))
            .map_err(|e| StoreError::StoreUnavailable(e.to_string()))?;
        for entry in entries.flatten() {
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|n| n.strip_prefix("img-"))
                .and_then(|n| n.strip_suffix(".png"))
                .and_then(|n| n.parse::<u64>().ok())
            {
                highest = highest.max(id);
            }
        }

        Ok(Self {
            root,
            next_id: Mutex::new(highest),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Import an image file from the local filesystem, obtaining its reference
    pub fn import(&self, path: impl AsRef<Path>) -> Result<ImageRef, StoreError> {
        let path = path.as_ref();
        let pixels = image::open(path).map_err(|e| StoreError::StoreRejected(e.to_string()))?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("import")
            .to_string();
        let metadata = ImageMetadata::new(name, pixels.width(), pixels.height())
            .map_err(|e| StoreError::StoreRejected(e.to_string()))?;
        self.store_image(pixels, metadata)
    }

    /// All recorded parent→child links, in creation order
    pub fn links(&self) -> Result<Vec<(ImageRef, ImageRef)>, StoreError> {
        Ok(self
            .read_links()?
            .into_iter()
            .map(|r| (ImageRef::new(r.parent), ImageRef::new(r.child)))
            .collect())
    }

    /// Register a store-side default, shared by every image in this store
    pub fn set_default(&self, option: &str, value: OptionValue) -> Result<(), StoreError> {
        let mut defaults = self.read_defaults()?;
        defaults.insert(option.to_string(), value);
        let body = serde_json::to_vec_pretty(&defaults)
            .map_err(|e| StoreError::StoreUnavailable(e.to_string()))?;
        fs::write(self.root.join("defaults.json"), body)
            .map_err(|e| StoreError::StoreUnavailable(e.to_string()))
    }

    fn image_path(&self, reference: &ImageRef) -> PathBuf {
        self.root.join("images").join(format!("{}.png", reference))
    }

    fn sidecar_path(&self, reference: &ImageRef) -> PathBuf {
        self.root.join("images").join(format!("{}.json", reference))
    }

    fn read_links(&self) -> Result<Vec<LinkRecord>, StoreError> {
        let path = self.root.join("links.json");
        if !path.exists() {
            return Ok(Vec::new());
        }
        let body = fs::read(&path).map_err(|e| StoreError::StoreUnavailable(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| StoreError::StoreUnavailable(e.to_string()))
    }

    fn read_defaults(
        &self,
    ) -> Result<std::collections::BTreeMap<String, OptionValue>, StoreError> {
        let path = self.root.join("defaults.json");
        if !path.exists() {
            return Ok(Default::default());
        }
        let body = fs::read(&path).map_err(|e| StoreError::StoreUnavailable(e.to_string()))?;
        serde_json::from_slice(&body).map_err(|e| StoreError::StoreUnavailable(e.to_string()))
    }

    fn mint(&self) -> ImageRef {
        let mut next = self
            .next_id
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        *next += 1;
        ImageRef::new(format!("img-{}", *next))
    }
}

impl ImageStore for FsStore {
    fn fetch_image(&self, reference: &ImageRef) -> Result<FetchedImage, StoreError> {
        let image_path = self.image_path(reference);
        if !image_path.exists() {
            return Err(StoreError::NotFound(reference.clone()));
        }
        let pixels = image::open(&image_path).map_err(|e| StoreError::Unreadable {
            reference: reference.clone(),
            reason: e.to_string(),
        })?;
        let sidecar = fs::read(self.sidecar_path(reference)).map_err(|e| StoreError::Unreadable {
            reference: reference.clone(),
            reason: e.to_string(),
        })?;
        let metadata = serde_json::from_slice(&sidecar).map_err(|e| StoreError::Unreadable {
            reference: reference.clone(),
            reason: e.to_string(),
        })?;
        Ok(FetchedImage { pixels, metadata })
    }

    fn fetch_default(
        &self,
        reference: &ImageRef,
        option: &str,
    ) -> Result<OptionValue, StoreError> {
        self.read_defaults()?
            .get(option)
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
        let reference = self.mint();
        pixels
            .save(self.image_path(&reference))
            .map_err(|e| StoreError::StoreRejected(e.to_string()))?;
        let sidecar = serde_json::to_vec_pretty(&metadata)
            .map_err(|e| StoreError::StoreRejected(e.to_string()))?;
        fs::write(self.sidecar_path(&reference), sidecar)
            .map_err(|e| StoreError::StoreRejected(e.to_string()))?;
        Ok(reference)
    }

    fn attach_file(
        &self,
        reference: &ImageRef,
        name: &str,
        content: &[u8],
        _mime: &str,
    ) -> Result<(), StoreError> {
        if !self.image_path(reference).exists() {
            return Err(StoreError::AttachFailed(format!("unknown image {reference}")));
        }
        let dir = self.root.join("attachments").join(reference.id());
        fs::create_dir_all(&dir).map_err(|e| StoreError::AttachFailed(e.to_string()))?;
        fs::write(dir.join(name), content).map_err(|e| StoreError::AttachFailed(e.to_string()))
    }

    fn link_parent_child(&self, parent: &ImageRef, child: &ImageRef) -> Result<(), StoreError> {
        if !self.image_path(parent).exists() || !self.image_path(child).exists() {
            return Err(StoreError::LinkFailed(format!(
                "unknown image in link {parent} -> {child}"
            )));
        }
        let mut links = self.read_links()?;
        links.push(LinkRecord {
            parent: parent.id().to_string(),
            child: child.id().to_string(),
        });
        let body = serde_json::to_vec_pretty(&links)
            .map_err(|e| StoreError::LinkFailed(e.to_string()))?;
        fs::write(self.root.join("links.json"), body)
            .map_err(|e| StoreError::LinkFailed(e.to_string()))
    }
}
