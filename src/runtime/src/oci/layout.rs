//! Image layout facade.
//!
//! Combines the blob store and the reference index of one OCI layout
//! directory and adds the image-level operations the build needs: creating
//! single-manifest images, resolving tags to manifests and configs, and
//! unpacking tagged images.

use std::collections::BTreeSet;
use std::io::Read;
use std::path::Path;

use oci_spec::image::ImageConfiguration;
use serde::de::DeserializeOwned;
use stratum_core::error::{Result, StratumError};
use tokio_util::sync::CancellationToken;

use super::blob::{BlobReader, BlobStore};
use super::config::ConfigGenerator;
use super::dir::OciDir;
use super::refs::ReferenceIndex;
use super::types::{
    Blob, Descriptor, Manifest, MEDIA_TYPE_IMAGE_CONFIG, MEDIA_TYPE_IMAGE_MANIFEST,
};
use super::unpack::{MapOptions, TarUnpacker, Unpacker};

/// An opened OCI image layout.
pub struct ImageLayout {
    dir: OciDir,
    blobs: BlobStore,
    refs: ReferenceIndex,
    unpacker: Box<dyn Unpacker>,
}

impl std::fmt::Debug for ImageLayout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageLayout")
            .field("root", &self.dir.root())
            .finish()
    }
}

impl ImageLayout {
    /// Open an existing layout.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_cancellation(path, CancellationToken::new())
    }

    /// Open an existing layout whose operations observe `cancel`.
    pub fn open_with_cancellation(path: &Path, cancel: CancellationToken) -> Result<Self> {
        let dir = OciDir::open(path, cancel)?;
        tracing::debug!(path = %path.display(), "Opened image layout");
        Ok(Self {
            blobs: BlobStore::new(dir.clone()),
            refs: ReferenceIndex::new(dir.clone()),
            dir,
            unpacker: Box::new(TarUnpacker::new()),
        })
    }

    /// Initialise a new layout at `path` and open it.
    pub fn create(path: &Path) -> Result<Self> {
        Self::create_with_cancellation(path, CancellationToken::new())
    }

    pub fn create_with_cancellation(path: &Path, cancel: CancellationToken) -> Result<Self> {
        if cancel.is_cancelled() {
            return Err(StratumError::Cancelled("create image layout".to_string()));
        }
        OciDir::create(path)?;
        Self::open_with_cancellation(path, cancel)
    }

    /// Replace the unpacker used by [`ImageLayout::unpack`].
    pub fn with_unpacker(mut self, unpacker: Box<dyn Unpacker>) -> Self {
        self.unpacker = unpacker;
        self
    }

    pub fn path(&self) -> &Path {
        self.dir.root()
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    /// Point tag `to` at whatever `from` currently resolves to.
    pub fn tag(&self, from: &str, to: &str) -> Result<()> {
        let descriptor = self.resolve(from)?;
        self.refs.update_reference(to, &descriptor)?;
        tracing::info!(from, to, digest = %descriptor.digest, "Tagged image");
        Ok(())
    }

    /// Remove a tag. Returns whether it existed.
    pub fn untag(&self, name: &str) -> Result<bool> {
        self.refs.delete_reference(name)
    }

    /// Point `name` at an existing descriptor.
    pub fn update_reference(&self, name: &str, descriptor: &Descriptor) -> Result<()> {
        self.refs.update_reference(name, descriptor)
    }

    pub fn put_blob<R: Read>(&self, reader: R) -> Result<Blob> {
        self.blobs.put_blob(reader)
    }

    pub fn get_blob(&self, descriptor: &Descriptor) -> Result<BlobReader> {
        self.blobs.get_blob(descriptor)
    }

    /// Store `config` and a manifest over `layers`, tag the manifest as
    /// `tag`, and return the manifest descriptor.
    pub fn new_image(
        &self,
        tag: &str,
        config: &ConfigGenerator,
        layers: &[Blob],
        layer_media_type: &str,
    ) -> Result<Descriptor> {
        let config_blob = self.blobs.put_blob_json(config.image())?;
        let config_desc = config_blob.to_descriptor(MEDIA_TYPE_IMAGE_CONFIG)?;

        let layer_descs = layers
            .iter()
            .map(|blob| blob.to_descriptor(layer_media_type))
            .collect::<Result<Vec<_>>>()?;

        let manifest = Manifest::new(config_desc, layer_descs);
        let manifest_desc = self
            .blobs
            .put_blob_json(&manifest)?
            .to_descriptor(MEDIA_TYPE_IMAGE_MANIFEST)?;

        self.refs.update_reference(tag, &manifest_desc)?;
        tracing::info!(
            tag,
            digest = %manifest_desc.digest,
            layers = layers.len(),
            "Created image"
        );
        Ok(manifest_desc)
    }

    /// Descriptor that `tag` points to.
    pub fn resolve(&self, tag: &str) -> Result<Descriptor> {
        self.refs.resolve_reference(tag)
    }

    /// Manifest of a tagged image.
    pub fn lookup_manifest(&self, tag: &str) -> Result<Manifest> {
        let desc = self.resolve(tag)?;
        if desc.media_type != MEDIA_TYPE_IMAGE_MANIFEST {
            return Err(StratumError::UnsupportedMediaType {
                digest: desc.digest.to_string(),
                expected: MEDIA_TYPE_IMAGE_MANIFEST.to_string(),
                found: desc.media_type,
            });
        }

        let manifest: Manifest = self.read_json(&desc)?;
        if let Some(media_type) = &manifest.media_type {
            if media_type != MEDIA_TYPE_IMAGE_MANIFEST {
                return Err(StratumError::UnsupportedMediaType {
                    digest: desc.digest.to_string(),
                    expected: MEDIA_TYPE_IMAGE_MANIFEST.to_string(),
                    found: media_type.clone(),
                });
            }
        }
        Ok(manifest)
    }

    /// Open every layer of a tagged image, in manifest order.
    ///
    /// If any layer cannot be opened, the handles opened so far are closed
    /// before the error is returned.
    pub fn layers_for_tag(&self, tag: &str) -> Result<Vec<BlobReader>> {
        let manifest = self.lookup_manifest(tag)?;
        let mut readers = Vec::with_capacity(manifest.layers.len());
        for layer in &manifest.layers {
            match self.blobs.get_blob(layer) {
                Ok(reader) => readers.push(reader),
                Err(e) => {
                    for reader in readers.iter_mut() {
                        reader.close();
                    }
                    return Err(e);
                }
            }
        }
        Ok(readers)
    }

    /// Decode the image configuration stored as `blob`.
    ///
    /// Manifests and indexes declare themselves through `mediaType` (or at
    /// least `schemaVersion`) and are rejected as `UnsupportedMediaType`.
    pub fn lookup_config(&self, blob: &Blob) -> Result<ImageConfiguration> {
        let desc = blob.to_descriptor(MEDIA_TYPE_IMAGE_CONFIG)?;
        let value: serde_json::Value = self.read_json(&desc)?;

        let declared = match value.get("mediaType").and_then(|m| m.as_str()) {
            Some(media_type) => Some(media_type.to_string()),
            None if value.get("schemaVersion").is_some() => {
                Some("image manifest or index".to_string())
            }
            None => None,
        };
        if let Some(found) = declared.filter(|m| m != MEDIA_TYPE_IMAGE_CONFIG) {
            return Err(StratumError::UnsupportedMediaType {
                digest: desc.digest.to_string(),
                expected: MEDIA_TYPE_IMAGE_CONFIG.to_string(),
                found,
            });
        }

        serde_json::from_value(value).map_err(|e| {
            StratumError::SerializationError(format!(
                "Failed to decode image configuration {}: {}",
                desc.digest, e
            ))
        })
    }

    /// Image configuration of a tagged image.
    pub fn config_for_tag(&self, tag: &str) -> Result<ImageConfiguration> {
        let manifest = self.lookup_manifest(tag)?;
        if manifest.config.media_type != MEDIA_TYPE_IMAGE_CONFIG {
            return Err(StratumError::UnsupportedMediaType {
                digest: manifest.config.digest.to_string(),
                expected: MEDIA_TYPE_IMAGE_CONFIG.to_string(),
                found: manifest.config.media_type,
            });
        }
        self.read_json(&manifest.config)
    }

    pub fn list_tags(&self) -> Result<BTreeSet<String>> {
        self.refs.list_references()
    }

    /// Materialize the image tagged `tag` into `dest`.
    pub fn unpack(&self, tag: &str, dest: &Path, options: &MapOptions) -> Result<()> {
        let manifest = self.lookup_manifest(tag)?;
        self.unpacker.unpack(&self.blobs, &manifest, dest, options)
    }

    /// Release the layout. Later operations on it, or on blob handles
    /// still open, fail.
    pub fn close(&self) {
        self.dir.close();
        tracing::debug!(path = %self.dir.root().display(), "Closed image layout");
    }

    fn read_json<T: DeserializeOwned>(&self, desc: &Descriptor) -> Result<T> {
        let mut reader = self.blobs.get_blob(desc)?;
        let data = reader.read_verified()?;
        reader.close();
        serde_json::from_slice(&data).map_err(|e| {
            StratumError::SerializationError(format!(
                "Failed to decode blob {}: {}",
                desc.digest, e
            ))
        })
    }
}
