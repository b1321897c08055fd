//! Content hashes of local imports.
//!
//! A file hashes to the SHA-256 of its bytes. A directory hashes over its
//! sorted relative paths together with each file's hash and each symlink's
//! target, so renames and retargeted links change the result.

use std::fs::File;
use std::path::Path;

use sha2::{Digest, Sha256};
use stratum_core::error::{Result, StratumError};

/// `sha256:<hex>` content hash of the file, directory or symlink at `path`.
pub fn hash_import(path: &Path) -> Result<String> {
    let meta = std::fs::symlink_metadata(path)
        .map_err(|e| StratumError::io(format!("Failed to stat import {}", path.display()), e))?;

    let hex = if meta.file_type().is_symlink() {
        let mut hasher = Sha256::new();
        hash_symlink(&mut hasher, path)?;
        hex::encode(hasher.finalize())
    } else if meta.is_dir() {
        let mut hasher = Sha256::new();
        hash_dir(&mut hasher, path, path)?;
        hex::encode(hasher.finalize())
    } else {
        sha256_file(path)?
    };
    Ok(format!("sha256:{}", hex))
}

/// Hex SHA-256 of a file's contents, streamed.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).map_err(|e| {
        StratumError::io(format!("Failed to open {} for hashing", path.display()), e)
    })?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .map_err(|e| StratumError::io(format!("Failed to hash {}", path.display()), e))?;
    Ok(hex::encode(hasher.finalize()))
}

fn hash_symlink(hasher: &mut Sha256, path: &Path) -> Result<()> {
    let target = std::fs::read_link(path)
        .map_err(|e| StratumError::io(format!("Failed to read link {}", path.display()), e))?;
    hasher.update(b"l");
    hasher.update(target.to_string_lossy().as_bytes());
    hasher.update([0]);
    Ok(())
}

fn hash_dir(hasher: &mut Sha256, root: &Path, current: &Path) -> Result<()> {
    let mut entries = std::fs::read_dir(current)
        .map_err(|e| StratumError::io(format!("Failed to read {}", current.display()), e))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| StratumError::io(format!("Failed to read {}", current.display()), e))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path);
        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0]);

        let file_type = entry
            .file_type()
            .map_err(|e| StratumError::io(format!("Failed to stat {}", path.display()), e))?;
        if file_type.is_symlink() {
            hash_symlink(hasher, &path)?;
        } else if file_type.is_dir() {
            hasher.update(b"d");
            hash_dir(hasher, root, &path)?;
        } else {
            hasher.update(b"f");
            hasher.update(sha256_file(&path)?.as_bytes());
            hasher.update([0]);
        }
    }
    Ok(())
}
