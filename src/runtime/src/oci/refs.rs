//! Tag references stored as annotated entries of `index.json`.
//!
//! Every mutation rewrites the whole index atomically. Mutations from one
//! process are serialized by an in-memory lock.

use std::collections::BTreeSet;

use parking_lot::Mutex;
use stratum_core::error::{Result, StratumError};

use super::dir::{write_atomic, OciDir};
use super::types::{Descriptor, Index, ANNOTATION_REF_NAME};

/// Name → descriptor mapping of an image layout.
#[derive(Debug)]
pub struct ReferenceIndex {
    dir: OciDir,
    write_lock: Mutex<()>,
}

impl ReferenceIndex {
    pub fn new(dir: OciDir) -> Self {
        Self {
            dir,
            write_lock: Mutex::new(()),
        }
    }

    fn load_index(&self) -> Result<Index> {
        let path = self.dir.index_path();
        let content = std::fs::read(&path)
            .map_err(|e| StratumError::io(format!("Failed to read {}", path.display()), e))?;
        serde_json::from_slice(&content).map_err(|e| {
            StratumError::SerializationError(format!(
                "Failed to parse {}: {}",
                path.display(),
                e
            ))
        })
    }

    fn save_index(&self, index: &Index) -> Result<()> {
        let data = serde_json::to_vec_pretty(index)?;
        write_atomic(&self.dir.index_path(), &data)
    }

    /// Point `name` at `descriptor`, replacing any previous entries for it.
    pub fn update_reference(&self, name: &str, descriptor: &Descriptor) -> Result<()> {
        self.dir.check("update reference")?;
        let _guard = self.write_lock.lock();

        let mut index = self.load_index()?;
        let before = index.manifests.len();
        index.manifests.retain(|d| d.ref_name() != Some(name));
        index.manifests.push(descriptor.with_ref_name(name));
        self.save_index(&index)?;

        tracing::debug!(
            tag = name,
            digest = %descriptor.digest,
            replaced = before + 1 - index.manifests.len(),
            "Updated reference"
        );
        Ok(())
    }

    /// Descriptor that `name` points to.
    ///
    /// Entries with identical content count once; distinct candidates make
    /// the name ambiguous.
    pub fn resolve_reference(&self, name: &str) -> Result<Descriptor> {
        self.dir.check("resolve reference")?;
        let index = self.load_index()?;

        let mut candidates: Vec<Descriptor> = Vec::new();
        for desc in index.manifests.into_iter().filter(|d| d.ref_name() == Some(name)) {
            if !candidates.contains(&desc) {
                candidates.push(desc);
            }
        }

        match candidates.len() {
            0 => Err(StratumError::not_found("tag", name)),
            1 => Ok(strip_ref_name(candidates.remove(0))),
            count => Err(StratumError::Ambiguous {
                name: name.to_string(),
                count,
            }),
        }
    }

    /// All tag names present in the index.
    pub fn list_references(&self) -> Result<BTreeSet<String>> {
        self.dir.check("list references")?;
        let index = self.load_index()?;
        Ok(index
            .manifests
            .iter()
            .filter_map(|d| d.ref_name().map(str::to_string))
            .collect())
    }

    /// Remove every entry for `name`. Returns whether anything was removed.
    pub fn delete_reference(&self, name: &str) -> Result<bool> {
        self.dir.check("delete reference")?;
        let _guard = self.write_lock.lock();

        let mut index = self.load_index()?;
        let before = index.manifests.len();
        index.manifests.retain(|d| d.ref_name() != Some(name));
        if index.manifests.len() == before {
            return Ok(false);
        }
        self.save_index(&index)?;
        tracing::debug!(tag = name, "Deleted reference");
        Ok(true)
    }
}

fn strip_ref_name(mut desc: Descriptor) -> Descriptor {
    if let Some(annotations) = desc.annotations.as_mut() {
        annotations.remove(ANNOTATION_REF_NAME);
        if annotations.is_empty() {
            desc.annotations = None;
        }
    }
    desc
}
