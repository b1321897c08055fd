//! Manifest unpacking into a root filesystem.
//!
//! Layers are applied in manifest order. Whiteout entries (`.wh.<name>`)
//! delete the named path from lower layers and the opaque marker
//! (`.wh..wh..opq`) empties its directory. Symlinks are recreated as-is,
//! including dangling ones.

use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use serde::{Deserialize, Serialize};
use stratum_core::error::{Result, StratumError};
use tar::Archive;

use super::blob::BlobStore;
use super::types::{
    Descriptor, Manifest, MEDIA_TYPE_DOCKER_LAYER_GZIP, MEDIA_TYPE_LAYER_GZIP,
    MEDIA_TYPE_LAYER_TAR,
};

const WHITEOUT_PREFIX: &str = ".wh.";
const OPAQUE_WHITEOUT: &str = ".wh..wh..opq";

/// One contiguous range of a user-namespace id map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMapping {
    pub container_id: u32,
    pub host_id: u32,
    pub size: u32,
}

/// Ownership handling while unpacking.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapOptions {
    /// Skip ownership changes entirely
    #[serde(default)]
    pub rootless: bool,
    #[serde(default)]
    pub uid_mappings: Vec<IdMapping>,
    #[serde(default)]
    pub gid_mappings: Vec<IdMapping>,
}

impl MapOptions {
    /// Options for an unprivileged unpack.
    pub fn rootless() -> Self {
        Self {
            rootless: true,
            ..Default::default()
        }
    }

    pub fn map_uid(&self, id: u32) -> Option<u32> {
        map_id(&self.uid_mappings, id)
    }

    pub fn map_gid(&self, id: u32) -> Option<u32> {
        map_id(&self.gid_mappings, id)
    }
}

fn map_id(mappings: &[IdMapping], id: u32) -> Option<u32> {
    if mappings.is_empty() {
        return Some(id);
    }
    mappings.iter().find_map(|m| {
        let offset = id.checked_sub(m.container_id)?;
        if offset < m.size {
            m.host_id.checked_add(offset)
        } else {
            None
        }
    })
}

/// Materializes an image manifest into a directory.
pub trait Unpacker: Send + Sync {
    fn unpack(
        &self,
        blobs: &BlobStore,
        manifest: &Manifest,
        dest: &Path,
        options: &MapOptions,
    ) -> Result<()>;
}

/// Unpacker for plain and gzip-compressed tar layers.
#[derive(Debug, Clone, Default)]
pub struct TarUnpacker;

impl TarUnpacker {
    pub fn new() -> Self {
        Self
    }

    /// Apply a single uncompressed tar stream on top of `dest`.
    pub fn apply_layer<R: Read>(
        &self,
        reader: R,
        dest: &Path,
        options: &MapOptions,
    ) -> Result<()> {
        let root = dest.canonicalize().map_err(|e| {
            StratumError::io(format!("Failed to resolve {}", dest.display()), e)
        })?;

        let mut archive = Archive::new(reader);
        archive.set_preserve_permissions(true);
        archive.set_overwrite(true);
        archive.set_unpack_xattrs(false);

        let entries = archive
            .entries()
            .map_err(|e| StratumError::io("Failed to read layer entries", e))?;

        for entry in entries {
            let mut entry =
                entry.map_err(|e| StratumError::io("Failed to read layer entry", e))?;
            let raw_path = entry
                .path()
                .map_err(|e| StratumError::io("Invalid path in layer entry", e))?
                .into_owned();

            let Some(path) = sanitize(&raw_path) else {
                tracing::warn!(path = %raw_path.display(), "Skipping entry escaping the rootfs");
                continue;
            };
            let file_name = path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default()
                .to_string();

            if let Some(hidden) = file_name.strip_prefix(WHITEOUT_PREFIX) {
                if let Some(parent) = resolve_parent(dest, &root, &path)? {
                    if file_name == OPAQUE_WHITEOUT {
                        clear_dir(&parent)?;
                    } else {
                        remove_path(&parent.join(hidden))?;
                    }
                }
                continue;
            }

            if !file_name.is_empty() {
                if let Some(parent) = resolve_parent(dest, &root, &path)? {
                    prepare_target(
                        &parent.join(&file_name),
                        entry.header().entry_type().is_dir(),
                    )?;
                }
            }

            let target = dest.join(&path);

            let unpacked = entry.unpack_in(dest).map_err(|e| {
                StratumError::io(format!("Failed to unpack {}", path.display()), e)
            })?;
            if !unpacked {
                tracing::warn!(path = %path.display(), "Skipped layer entry");
                continue;
            }

            if !options.rootless {
                let header = entry.header();
                let uid = header
                    .uid()
                    .map_err(|e| StratumError::io("Invalid uid in layer entry", e))?;
                let gid = header
                    .gid()
                    .map_err(|e| StratumError::io("Invalid gid in layer entry", e))?;
                let (host_uid, host_gid) = host_ids(&target, uid, gid, options)?;
                chown(&target, host_uid, host_gid)?;
            }
        }

        Ok(())
    }
}

impl Unpacker for TarUnpacker {
    fn unpack(
        &self,
        blobs: &BlobStore,
        manifest: &Manifest,
        dest: &Path,
        options: &MapOptions,
    ) -> Result<()> {
        std::fs::create_dir_all(dest).map_err(|e| {
            StratumError::io(format!("Failed to create {}", dest.display()), e)
        })?;

        for layer in &manifest.layers {
            let gzip = layer_is_gzip(layer)?;

            let mut check = blobs.get_blob(layer)?;
            let intact = layer
                .digest
                .matches(&mut check)
                .map_err(|e| StratumError::io(format!("Failed to read layer {}", layer.digest), e))?;
            check.close();
            if !intact {
                return Err(StratumError::HashMismatch {
                    source_path: format!("layer {}", layer.digest),
                    expected: layer.digest.to_string(),
                    actual: "different content".to_string(),
                });
            }

            let reader = blobs.get_blob(layer)?;
            tracing::debug!(digest = %layer.digest, gzip, "Applying layer");
            if gzip {
                self.apply_layer(GzDecoder::new(reader), dest, options)?;
            } else {
                self.apply_layer(reader, dest, options)?;
            }
        }

        tracing::info!(
            dest = %dest.display(),
            layers = manifest.layers.len(),
            "Unpacked image"
        );
        Ok(())
    }
}

fn layer_is_gzip(layer: &Descriptor) -> Result<bool> {
    match layer.media_type.as_str() {
        MEDIA_TYPE_LAYER_TAR => Ok(false),
        MEDIA_TYPE_LAYER_GZIP | MEDIA_TYPE_DOCKER_LAYER_GZIP => Ok(true),
        other => Err(StratumError::UnsupportedMediaType {
            digest: layer.digest.to_string(),
            expected: format!("{} or {}", MEDIA_TYPE_LAYER_TAR, MEDIA_TYPE_LAYER_GZIP),
            found: other.to_string(),
        }),
    }
}

/// Relative form of an archive path, or `None` if it climbs out.
fn sanitize(path: &Path) -> Option<PathBuf> {
    let mut clean = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => clean.push(part),
            Component::CurDir | Component::RootDir => {}
            Component::ParentDir | Component::Prefix(_) => return None,
        }
    }
    Some(clean)
}

/// Resolve the directory holding `path` inside the rootfs at `dest`.
///
/// Lower layers may have planted symlinks along the way; the resolved
/// directory must still lie under `root` (the canonical `dest`). Returns
/// `None` when the directory does not exist yet.
fn resolve_parent(dest: &Path, root: &Path, path: &Path) -> Result<Option<PathBuf>> {
    let parent = dest.join(path.parent().unwrap_or_else(|| Path::new("")));
    match parent.canonicalize() {
        Ok(resolved) if resolved.starts_with(root) => Ok(Some(resolved)),
        Ok(resolved) => Err(StratumError::InvalidLayer {
            layer: path.display().to_string(),
            message: format!(
                "parent directory resolves to {} outside of {}",
                resolved.display(),
                root.display()
            ),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StratumError::io(
            format!("Failed to resolve {}", parent.display()),
            e,
        )),
    }
}

/// Remove whatever is at `target` unless a directory is being laid over a
/// directory.
fn prepare_target(target: &Path, entry_is_dir: bool) -> Result<()> {
    match std::fs::symlink_metadata(target) {
        Ok(meta) if meta.is_dir() && entry_is_dir => Ok(()),
        Ok(_) => remove_path(target),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StratumError::io(
            format!("Failed to stat {}", target.display()),
            e,
        )),
    }
}

fn remove_path(path: &Path) -> Result<()> {
    let result = match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path),
        Ok(_) => std::fs::remove_file(path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => Err(e),
    };
    result.map_err(|e| StratumError::io(format!("Failed to remove {}", path.display()), e))
}

fn clear_dir(dir: &Path) -> Result<()> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(StratumError::io(
                format!("Failed to read {}", dir.display()),
                e,
            ))
        }
    };
    for entry in entries {
        let entry = entry
            .map_err(|e| StratumError::io(format!("Failed to read {}", dir.display()), e))?;
        remove_path(&entry.path())?;
    }
    Ok(())
}

/// Host owner for a tar entry's uid and gid.
fn host_ids(target: &Path, uid: u64, gid: u64, options: &MapOptions) -> Result<(u32, u32)> {
    let unmapped = |kind: &str, id: u64| StratumError::InvalidLayer {
        layer: target.display().to_string(),
        message: format!("{} {} has no host mapping", kind, id),
    };
    let host_uid = u32::try_from(uid)
        .ok()
        .and_then(|id| options.map_uid(id))
        .ok_or_else(|| unmapped("uid", uid))?;
    let host_gid = u32::try_from(gid)
        .ok()
        .and_then(|id| options.map_gid(id))
        .ok_or_else(|| unmapped("gid", gid))?;
    Ok((host_uid, host_gid))
}

#[cfg(unix)]
fn chown(target: &Path, uid: u32, gid: u32) -> Result<()> {
    std::os::unix::fs::lchown(target, Some(uid), Some(gid)).map_err(|e| {
        StratumError::io(format!("Failed to chown {}", target.display()), e)
    })
}

#[cfg(not(unix))]
fn chown(_target: &Path, _uid: u32, _gid: u32) -> Result<()> {
    Ok(())
}
