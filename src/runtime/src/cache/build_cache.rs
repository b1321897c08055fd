//! Persistent build cache keyed by layer specification hashes.
//!
//! Each entry records the hash of the whole layer specification at the time
//! the layer was built. A lookup recomputes the hash from the current
//! specification, so any edit to a layer (in memory or in the stratumfile)
//! turns a previous entry into a miss.
//!
//! The cache file is rewritten atomically on every put. A single process
//! should own a cache file at a time.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use stratum_core::error::{Result, StratumError};
use stratum_core::{BuildConfig, Layer};

use super::imports::hash_import;
use super::specs::LayerSpecs;
use crate::oci::dir::write_atomic;
use crate::oci::{BlobStore, Descriptor, ImageLayout};

/// Format version of `build.cache`. Files with another version are ignored.
pub const CACHE_FORMAT_VERSION: u32 = 1;

/// One persisted build result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub spec_hash: String,
    /// Output blob; `None` for build-only layers
    #[serde(default)]
    pub descriptor: Option<Descriptor>,
    /// Content hashes of local imports, keyed by import path
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub imports: BTreeMap<String, String>,
    /// Unix timestamp of the put
    pub cached_at: i64,
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheFile {
    version: u32,
    #[serde(default)]
    cache: BTreeMap<String, CacheEntry>,
}

#[derive(Debug, Deserialize)]
struct VersionHeader {
    #[serde(default)]
    version: Option<u32>,
}

/// What a cached build produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CachedOutput {
    /// A layer blob stored in the image layout
    Blob(Descriptor),
    /// A build-only layer, whose output is its rootfs directory
    BuildOnly,
}

impl CachedOutput {
    pub fn descriptor(&self) -> Option<&Descriptor> {
        match self {
            CachedOutput::Blob(desc) => Some(desc),
            CachedOutput::BuildOnly => None,
        }
    }
}

/// Layer name → last successful build.
#[derive(Debug)]
pub struct BuildCache {
    path: PathBuf,
    rootfs_dir: PathBuf,
    blobs: BlobStore,
    specs: LayerSpecs,
    entries: BTreeMap<String, CacheEntry>,
}

impl BuildCache {
    /// Load the cache for `config`, starting empty if no file exists yet.
    pub fn open(config: &BuildConfig, layout: &ImageLayout, specs: LayerSpecs) -> Result<Self> {
        let path = config.cache_path();
        let entries = load_entries(&path)?;
        tracing::debug!(
            path = %path.display(),
            entries = entries.len(),
            "Opened build cache"
        );

        Ok(Self {
            path,
            rootfs_dir: config.rootfs_dir.clone(),
            blobs: layout.blobs().clone(),
            specs,
            entries,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Persisted entries, by layer name.
    pub fn entries(&self) -> &BTreeMap<String, CacheEntry> {
        &self.entries
    }

    pub fn specs(&self) -> &LayerSpecs {
        &self.specs
    }

    /// Record a successful build of `name` against its current specification.
    ///
    /// Returns only after the cache file has been durably rewritten.
    pub fn put(&mut self, name: &str, output: CachedOutput) -> Result<()> {
        let layer = self.layer(name)?;
        let spec_hash = layer.spec_hash()?;

        let mut imports = BTreeMap::new();
        for import in layer.local_imports() {
            imports.insert(import.path.clone(), hash_import(Path::new(&import.path))?);
        }

        let entry = CacheEntry {
            spec_hash,
            descriptor: output.descriptor().cloned(),
            imports,
            cached_at: chrono::Utc::now().timestamp(),
        };

        let previous = self.entries.insert(name.to_string(), entry);
        if let Err(e) = self.persist() {
            match previous {
                Some(prev) => self.entries.insert(name.to_string(), prev),
                None => self.entries.remove(name),
            };
            return Err(e);
        }

        tracing::debug!(layer = name, "Cached build result");
        Ok(())
    }

    /// Cached output of `name`, if it is still valid for the current
    /// specification.
    pub fn lookup(&self, name: &str) -> Result<Option<CachedOutput>> {
        let layer = self.layer(name)?;
        let Some(entry) = self.entries.get(name) else {
            tracing::debug!(layer = name, "Cache miss: no entry");
            return Ok(None);
        };

        let spec_hash = layer.spec_hash()?;
        if spec_hash != entry.spec_hash {
            tracing::debug!(
                layer = name,
                cached = %entry.spec_hash,
                current = %spec_hash,
                "Cache miss: specification changed"
            );
            return Ok(None);
        }

        for import in layer.local_imports() {
            let path = Path::new(&import.path);
            if std::fs::symlink_metadata(path).is_err() {
                tracing::debug!(layer = name, import = %import.path, "Cache miss: import missing");
                return Ok(None);
            }
            let current = hash_import(path)?;
            if entry.imports.get(&import.path) != Some(&current) {
                tracing::debug!(layer = name, import = %import.path, "Cache miss: import changed");
                return Ok(None);
            }
        }

        let output = match &entry.descriptor {
            Some(desc) => {
                if !self.blobs.has_blob(&desc.digest)? {
                    tracing::debug!(layer = name, digest = %desc.digest, "Cache miss: blob missing");
                    return Ok(None);
                }
                CachedOutput::Blob(desc.clone())
            }
            None => CachedOutput::BuildOnly,
        };

        if layer.build_only && !self.rootfs_dir.join(name).is_dir() {
            tracing::debug!(layer = name, "Cache miss: build-only rootfs missing");
            return Ok(None);
        }

        tracing::debug!(layer = name, "Cache hit");
        Ok(Some(output))
    }

    fn layer(&self, name: &str) -> Result<Layer> {
        self.specs
            .get(name)
            .ok_or_else(|| StratumError::not_found("layer", name))
    }

    fn persist(&self) -> Result<()> {
        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)
            .map_err(|e| StratumError::io(format!("Failed to create {}", dir.display()), e))?;

        let file = CacheFile {
            version: CACHE_FORMAT_VERSION,
            cache: self.entries.clone(),
        };
        write_atomic(&self.path, &serde_json::to_vec_pretty(&file)?)
    }
}

fn load_entries(path: &Path) -> Result<BTreeMap<String, CacheEntry>> {
    let content = match std::fs::read(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
        Err(e) => {
            return Err(StratumError::io(
                format!("Failed to read {}", path.display()),
                e,
            ))
        }
    };

    let corrupt = |e: serde_json::Error| StratumError::CacheCorrupt {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let header: VersionHeader = serde_json::from_slice(&content).map_err(corrupt)?;
    if header.version != Some(CACHE_FORMAT_VERSION) {
        tracing::warn!(
            path = %path.display(),
            found = ?header.version,
            expected = CACHE_FORMAT_VERSION,
            "Discarding build cache with unknown version"
        );
        return Ok(BTreeMap::new());
    }

    let file: CacheFile = serde_json::from_slice(&content).map_err(corrupt)?;
    Ok(file.cache)
}
