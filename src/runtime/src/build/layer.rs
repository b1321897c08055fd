//! Layer tarball creation.
//!
//! Turns a built root filesystem into a single OCI layer stream.

use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use stratum_core::error::{Result, StratumError};

use crate::oci::digest::{Digest, Digester};
use crate::oci::types::{MEDIA_TYPE_LAYER_GZIP, MEDIA_TYPE_LAYER_TAR};

/// Compression applied to produced layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LayerCompression {
    None,
    #[default]
    Gzip,
}

impl LayerCompression {
    /// Media type of a layer written with this compression.
    pub fn media_type(self) -> &'static str {
        match self {
            LayerCompression::None => MEDIA_TYPE_LAYER_TAR,
            LayerCompression::Gzip => MEDIA_TYPE_LAYER_GZIP,
        }
    }
}

/// Write every entry under `src_dir` to `output` as a tar stream and
/// return the digest of the uncompressed tar (the layer's diff id).
///
/// Entries are added in sorted order so identical trees produce identical
/// archives. Symlinks are stored as symlinks, never followed.
pub fn create_layer_from_dir<W: Write>(
    src_dir: &Path,
    output: W,
    compression: LayerCompression,
) -> Result<Digest> {
    let diff_id = match compression {
        LayerCompression::None => {
            let mut builder = tar::Builder::new(DiffIdWriter::new(output));
            write_tree(&mut builder, src_dir)?;
            builder.into_inner().map_err(finalize_error)?.finish()
        }
        LayerCompression::Gzip => {
            let encoder = GzEncoder::new(output, Compression::default());
            let mut builder = tar::Builder::new(DiffIdWriter::new(encoder));
            write_tree(&mut builder, src_dir)?;
            let writer = builder.into_inner().map_err(finalize_error)?;
            let (encoder, diff_id) = writer.into_parts();
            encoder.finish().map_err(finalize_error)?;
            diff_id
        }
    };
    Ok(diff_id)
}

/// Hashes the tar stream on its way into the (possibly compressing) writer.
struct DiffIdWriter<W> {
    inner: W,
    digester: Digester,
}

impl<W: Write> DiffIdWriter<W> {
    fn new(inner: W) -> Self {
        Self {
            inner,
            digester: Digester::new(),
        }
    }

    fn into_parts(self) -> (W, Digest) {
        (self.inner, self.digester.finish())
    }

    fn finish(self) -> Digest {
        self.digester.finish()
    }
}

impl<W: Write> Write for DiffIdWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let written = self.inner.write(buf)?;
        self.digester.update(&buf[..written]);
        Ok(written)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

fn write_tree<W: Write>(builder: &mut tar::Builder<W>, root: &Path) -> Result<()> {
    builder.follow_symlinks(false);
    add_dir_to_tar(builder, root, root)
}

fn add_dir_to_tar<W: Write>(
    builder: &mut tar::Builder<W>,
    root: &Path,
    current: &Path,
) -> Result<()> {
    let mut entries = std::fs::read_dir(current)
        .map_err(|e| StratumError::io(format!("Failed to read directory {}", current.display()), e))?
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|e| StratumError::io(format!("Failed to read directory {}", current.display()), e))?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(&path);
        let file_type = entry
            .file_type()
            .map_err(|e| StratumError::io(format!("Failed to stat {}", path.display()), e))?;

        if file_type.is_dir() {
            builder
                .append_dir(relative, &path)
                .map_err(|e| add_error(relative, e))?;
            add_dir_to_tar(builder, root, &path)?;
        } else {
            builder
                .append_path_with_name(&path, relative)
                .map_err(|e| add_error(relative, e))?;
        }
    }
    Ok(())
}

fn add_error(path: &Path, e: std::io::Error) -> StratumError {
    StratumError::io(format!("Failed to add {} to layer", path.display()), e)
}

fn finalize_error(e: std::io::Error) -> StratumError {
    StratumError::io("Failed to finalize layer", e)
}
