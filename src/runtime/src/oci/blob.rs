//! Content-addressed blob storage under `blobs/<algorithm>/<hex>`.
//!
//! Blobs are written to a temp file in the target directory while being
//! hashed, then renamed into place. A blob whose digest is already present
//! is not rewritten.

use std::fs::File;
use std::io::{Read, Write};

use serde::Serialize;
use stratum_core::error::{Result, StratumError};

use super::digest::{Digest, Digester};
use super::dir::OciDir;
use super::types::{Blob, Descriptor};

const CHUNK_SIZE: usize = 64 * 1024;

/// Blob half of an image layout.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: OciDir,
}

impl BlobStore {
    pub fn new(dir: OciDir) -> Self {
        Self { dir }
    }

    /// Stream `reader` into the store and return its digest and size.
    ///
    /// Cancellation is checked before the write and between chunks. A
    /// cancelled or failed write leaves no partial blob behind.
    pub fn put_blob<R: Read>(&self, mut reader: R) -> Result<Blob> {
        self.dir.check("put blob")?;

        let staging = self.dir.root().join("blobs").join("sha256");
        std::fs::create_dir_all(&staging).map_err(|e| {
            StratumError::io(format!("Failed to create {}", staging.display()), e)
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&staging)
            .map_err(|e| StratumError::io("Failed to create blob temp file", e))?;

        let mut digester = Digester::new();
        let mut buf = vec![0u8; CHUNK_SIZE];
        loop {
            self.dir.check("put blob")?;
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(StratumError::io("Failed to read blob content", e)),
            };
            digester.update(&buf[..n]);
            tmp.write_all(&buf[..n])
                .map_err(|e| StratumError::io("Failed to write blob temp file", e))?;
        }

        let size = digester.size() as i64;
        let digest = digester.finish();
        let path = self.dir.blob_path(&digest);

        if path.is_file() {
            tracing::debug!(digest = %digest, "Blob already present");
        } else {
            tmp.as_file()
                .sync_all()
                .map_err(|e| StratumError::io("Failed to sync blob", e))?;
            tmp.persist(&path).map_err(|e| {
                StratumError::io(format!("Failed to store blob {}", digest), e.error)
            })?;
            tracing::debug!(digest = %digest, size, "Stored blob");
        }

        Ok(Blob {
            hash: digest.hex().to_string(),
            size,
        })
    }

    /// Serialize `value` as JSON and store it.
    pub fn put_blob_json<T: Serialize>(&self, value: &T) -> Result<Blob> {
        let data = serde_json::to_vec(value)?;
        self.put_blob(data.as_slice())
    }

    /// Whether a blob with `digest` is stored.
    pub fn has_blob(&self, digest: &Digest) -> Result<bool> {
        self.dir.check("stat blob")?;
        Ok(self.dir.blob_path(digest).is_file())
    }

    /// Open the blob named by `descriptor`.
    pub fn get_blob(&self, descriptor: &Descriptor) -> Result<BlobReader> {
        self.dir.check("get blob")?;
        let path = self.dir.blob_path(&descriptor.digest);
        let file = File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StratumError::not_found("blob", descriptor.digest.to_string())
            } else {
                StratumError::io(format!("Failed to open blob {}", descriptor.digest), e)
            }
        })?;

        Ok(BlobReader {
            descriptor: descriptor.clone(),
            dir: self.dir.clone(),
            file: Some(file),
        })
    }

    /// Close the underlying layout. Idempotent; later operations fail.
    pub fn close(&self) {
        self.dir.close();
    }
}

/// Open handle on one stored blob.
///
/// The underlying file is released by [`BlobReader::close`] or on drop,
/// whichever comes first. Reads after close fail.
#[derive(Debug)]
pub struct BlobReader {
    descriptor: Descriptor,
    dir: OciDir,
    file: Option<File>,
}

impl BlobReader {
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    pub fn is_closed(&self) -> bool {
        self.file.is_none()
    }

    /// Release the handle. Safe to call more than once.
    pub fn close(&mut self) {
        self.file = None;
    }

    /// Read the whole blob, checking it against the descriptor's digest
    /// and size.
    pub fn read_verified(&mut self) -> Result<Vec<u8>> {
        self.dir.check("read blob")?;
        let mut data = Vec::new();
        self.read_to_end(&mut data).map_err(|e| {
            StratumError::io(format!("Failed to read blob {}", self.descriptor.digest), e)
        })?;

        let expected = &self.descriptor.digest;
        let actual_size = data.len() as i64;
        let digest_ok = expected.matches(&mut data.as_slice()).unwrap_or(false);
        if actual_size != self.descriptor.size || !digest_ok {
            let actual = Digest::sha256(&data);
            return Err(StratumError::HashMismatch {
                source_path: format!("blob {}", expected),
                expected: format!("{} ({} bytes)", expected, self.descriptor.size),
                actual: format!("{} ({} bytes)", actual, actual_size),
            });
        }
        Ok(data)
    }
}

impl Read for BlobReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.dir.cancel_token().is_cancelled() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "operation cancelled",
            ));
        }
        match self.file.as_mut() {
            Some(file) => file.read(buf),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "blob handle is closed",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::types::MEDIA_TYPE_LAYER_TAR;
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    fn store(tmp: &TempDir) -> (BlobStore, CancellationToken) {
        OciDir::create(tmp.path()).unwrap();
        let token = CancellationToken::new();
        let dir = OciDir::open(tmp.path(), token.clone()).unwrap();
        (BlobStore::new(dir), token)
    }

    fn blob_count(tmp: &TempDir) -> usize {
        std::fs::read_dir(tmp.path().join("blobs/sha256"))
            .unwrap()
            .count()
    }

    #[test]
    fn test_put_then_get() {
        let tmp = TempDir::new().unwrap();
        let (blobs, _) = store(&tmp);

        let blob = blobs.put_blob(&b"hello"[..]).unwrap();
        assert_eq!(blob.hash, Digest::sha256(b"hello").hex());
        assert_eq!(blob.size, 5);

        let desc = blob.to_descriptor(MEDIA_TYPE_LAYER_TAR).unwrap();
        assert!(blobs.has_blob(&desc.digest).unwrap());
        let mut reader = blobs.get_blob(&desc).unwrap();
        assert_eq!(reader.read_verified().unwrap(), b"hello");
    }

    #[test]
    fn test_put_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let (blobs, _) = store(&tmp);

        let a = blobs.put_blob(&b"same"[..]).unwrap();
        let b = blobs.put_blob(&b"same"[..]).unwrap();
        assert_eq!(a, b);
        assert_eq!(blob_count(&tmp), 1);
    }

    #[test]
    fn test_put_large_blob_spans_chunks() {
        let tmp = TempDir::new().unwrap();
        let (blobs, _) = store(&tmp);

        let data = vec![7u8; CHUNK_SIZE * 3 + 11];
        let blob = blobs.put_blob(data.as_slice()).unwrap();
        assert_eq!(blob.size, data.len() as i64);
        assert_eq!(blob.hash, Digest::sha256(&data).hex());
    }

    #[test]
    fn test_get_missing_blob() {
        let tmp = TempDir::new().unwrap();
        let (blobs, _) = store(&tmp);

        let desc = Descriptor::new(MEDIA_TYPE_LAYER_TAR, Digest::sha256(b"absent"), 6);
        let err = blobs.get_blob(&desc).unwrap_err();
        assert!(err.is_not_found());
        assert!(!blobs.has_blob(&desc.digest).unwrap());
    }

    #[test]
    fn test_cancelled_put_leaves_nothing() {
        let tmp = TempDir::new().unwrap();
        let (blobs, token) = store(&tmp);

        token.cancel();
        let err = blobs.put_blob(&b"data"[..]).unwrap_err();
        assert!(matches!(err, StratumError::Cancelled(_)));
        assert_eq!(blob_count(&tmp), 0);
    }

    #[test]
    fn test_reader_close_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let (blobs, _) = store(&tmp);

        let desc = blobs
            .put_blob(&b"abc"[..])
            .unwrap()
            .to_descriptor(MEDIA_TYPE_LAYER_TAR)
            .unwrap();
        let mut reader = blobs.get_blob(&desc).unwrap();
        reader.close();
        reader.close();
        assert!(reader.is_closed());
        let mut buf = [0u8; 4];
        assert!(reader.read(&mut buf).is_err());
    }

    #[test]
    fn test_read_verified_detects_corruption() {
        let tmp = TempDir::new().unwrap();
        let (blobs, _) = store(&tmp);

        let blob = blobs.put_blob(&b"original"[..]).unwrap();
        let desc = blob.to_descriptor(MEDIA_TYPE_LAYER_TAR).unwrap();
        std::fs::write(
            tmp.path().join("blobs/sha256").join(&blob.hash),
            b"tampered",
        )
        .unwrap();

        let mut reader = blobs.get_blob(&desc).unwrap();
        let err = reader.read_verified().unwrap_err();
        assert!(matches!(err, StratumError::HashMismatch { .. }));
    }

    #[test]
    fn test_closed_store_rejects_operations() {
        let tmp = TempDir::new().unwrap();
        let (blobs, _) = store(&tmp);
        let desc = blobs
            .put_blob(&b"kept"[..])
            .unwrap()
            .to_descriptor(MEDIA_TYPE_LAYER_TAR)
            .unwrap();

        blobs.close();
        blobs.close();
        assert!(matches!(
            blobs.put_blob(&b"more"[..]).unwrap_err(),
            StratumError::StorageIo { .. }
        ));
        assert!(blobs.get_blob(&desc).is_err());
        assert!(blobs.has_blob(&desc.digest).is_err());
    }

    #[test]
    fn test_put_json() {
        let tmp = TempDir::new().unwrap();
        let (blobs, _) = store(&tmp);

        let blob = blobs.put_blob_json(&serde_json::json!({"a": 1})).unwrap();
        let expected = serde_json::to_vec(&serde_json::json!({"a": 1})).unwrap();
        assert_eq!(blob.size, expected.len() as i64);
    }
}
