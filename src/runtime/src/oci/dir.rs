//! Shared handle on an OCI layout directory.
//!
//! The blob store and the reference index both operate on the same
//! directory and share its cancellation token and closed flag.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use stratum_core::error::{Result, StratumError};
use tokio_util::sync::CancellationToken;

use super::digest::Digest;
use super::types::{Index, LayoutMarker, IMAGE_LAYOUT_VERSION};

pub const LAYOUT_FILE: &str = "oci-layout";
pub const INDEX_FILE: &str = "index.json";
pub const BLOBS_DIR: &str = "blobs";

#[derive(Debug)]
struct Inner {
    root: PathBuf,
    cancel: CancellationToken,
    closed: AtomicBool,
}

/// Cloneable handle on an opened layout directory.
#[derive(Debug, Clone)]
pub struct OciDir {
    inner: Arc<Inner>,
}

impl OciDir {
    /// Open an existing layout, checking its marker and index.
    pub fn open(root: &Path, cancel: CancellationToken) -> Result<Self> {
        validate_layout(root)?;
        Ok(Self {
            inner: Arc::new(Inner {
                root: root.to_path_buf(),
                cancel,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Initialise an empty layout at `root`, creating the directory if needed.
    pub fn create(root: &Path) -> Result<()> {
        if root.join(LAYOUT_FILE).exists() {
            return Err(StratumError::AlreadyExists(root.to_path_buf()));
        }

        let blobs = root.join(BLOBS_DIR).join("sha256");
        std::fs::create_dir_all(&blobs).map_err(|e| {
            StratumError::io(format!("Failed to create {}", blobs.display()), e)
        })?;

        write_atomic(
            &root.join(LAYOUT_FILE),
            &serde_json::to_vec(&LayoutMarker::default())?,
        )?;
        write_atomic(
            &root.join(INDEX_FILE),
            &serde_json::to_vec(&Index::default())?,
        )?;

        tracing::info!(path = %root.display(), "Created OCI image layout");
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.inner.root
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn index_path(&self) -> PathBuf {
        self.inner.root.join(INDEX_FILE)
    }

    /// On-disk location of a blob.
    pub fn blob_path(&self, digest: &Digest) -> PathBuf {
        self.inner
            .root
            .join(BLOBS_DIR)
            .join(digest.algorithm().as_str())
            .join(digest.hex())
    }

    /// Fail if the handle was closed or the operation was cancelled.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(StratumError::io(
                operation.to_string(),
                std::io::Error::new(std::io::ErrorKind::Other, "image layout is closed"),
            ));
        }
        if self.inner.cancel.is_cancelled() {
            return Err(StratumError::Cancelled(operation.to_string()));
        }
        Ok(())
    }

    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

/// Check that `root` looks like an OCI image layout.
pub fn validate_layout(root: &Path) -> Result<()> {
    let not_a_store = |reason: String| StratumError::NotAStore {
        path: root.to_path_buf(),
        reason,
    };

    if !root.exists() {
        return Err(StratumError::not_found(
            "image layout",
            root.display().to_string(),
        ));
    }
    if !root.is_dir() {
        return Err(not_a_store("not a directory".to_string()));
    }

    let marker_path = root.join(LAYOUT_FILE);
    let content = std::fs::read(&marker_path)
        .map_err(|e| not_a_store(format!("cannot read {}: {}", LAYOUT_FILE, e)))?;
    let marker: LayoutMarker = serde_json::from_slice(&content)
        .map_err(|e| not_a_store(format!("invalid {}: {}", LAYOUT_FILE, e)))?;
    if marker.image_layout_version != IMAGE_LAYOUT_VERSION {
        return Err(not_a_store(format!(
            "unsupported imageLayoutVersion {}",
            marker.image_layout_version
        )));
    }

    if !root.join(INDEX_FILE).is_file() {
        return Err(not_a_store(format!("missing {}", INDEX_FILE)));
    }
    if !root.join(BLOBS_DIR).is_dir() {
        return Err(not_a_store(format!("missing {} directory", BLOBS_DIR)));
    }

    Ok(())
}

/// Replace `path` with `data` so readers never observe a partial file.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
        StratumError::io(format!("Failed to create temp file in {}", parent.display()), e)
    })?;
    tmp.write_all(data)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| StratumError::io(format!("Failed to write {}", path.display()), e))?;
    tmp.persist(path)
        .map_err(|e| StratumError::io(format!("Failed to replace {}", path.display()), e.error))?;
    Ok(())
}
