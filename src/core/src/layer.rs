//! Fully-resolved layer specifications.
//!
//! A [`Layer`] is what the stratumfile loader produces after every
//! polymorphic directive has been flattened. Its identity for caching is the
//! SHA-256 of its canonical JSON serialization, which covers every field.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, StratumError};

/// Where a layer's base filesystem comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Image pulled from a registry (`docker://...`)
    Docker,
    /// Image in a local OCI layout (`oci:path:tag`)
    Oci,
    /// Tarball extracted as the base
    Tar,
    /// Another layer of the same build
    Built,
    /// Empty filesystem
    Scratch,
}

impl SourceType {
    /// Whether the base comes from a container image rather than the build itself.
    pub fn is_image(self) -> bool {
        matches!(self, SourceType::Docker | SourceType::Oci)
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SourceType::Docker => "docker",
            SourceType::Oci => "oci",
            SourceType::Tar => "tar",
            SourceType::Built => "built",
            SourceType::Scratch => "scratch",
        };
        f.write_str(s)
    }
}

/// Base image reference of a layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSource {
    #[serde(rename = "type")]
    pub source_type: SourceType,
    #[serde(default)]
    pub url: String,
    /// Layer name when `source_type` is `built`
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub insecure: bool,
}

/// A single imported file or URL, with an optional expected content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportSpec {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl ImportSpec {
    /// Whether the import refers to a remote URL rather than a local path.
    pub fn is_url(&self) -> bool {
        is_url(&self.path)
    }
}

/// A host path bind-mounted into the build container.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BindMount {
    pub source: String,
    pub target: String,
}

/// Fully-resolved definition of one build layer.
///
/// Every field participates in [`Layer::spec_hash`]. Maps are `BTreeMap` so
/// the serialization is independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Layer {
    pub from: Option<ImageSource>,
    pub import: Vec<ImportSpec>,
    pub run: Vec<String>,
    pub cmd: Vec<String>,
    pub entrypoint: Vec<String>,
    pub full_command: Vec<String>,
    pub build_env_passthrough: Vec<String>,
    pub build_env: BTreeMap<String, String>,
    pub environment: BTreeMap<String, String>,
    pub volumes: Vec<String>,
    pub labels: BTreeMap<String, String>,
    pub generate_labels: Vec<String>,
    pub working_dir: String,
    pub build_only: bool,
    pub binds: Vec<BindMount>,
    pub runtime_user: String,
}

impl Layer {
    /// Deterministic serialization used for hashing.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| {
            StratumError::SerializationError(format!("Failed to serialize layer: {}", e))
        })
    }

    /// Content hash of the whole specification, as `sha256:<hex>`.
    pub fn spec_hash(&self) -> Result<String> {
        let bytes = self.canonical_bytes()?;
        Ok(format!("sha256:{}", hex::encode(Sha256::digest(&bytes))))
    }

    /// Imports that live on the local filesystem.
    pub fn local_imports(&self) -> impl Iterator<Item = &ImportSpec> {
        self.import.iter().filter(|i| !i.is_url())
    }

    /// Name of the layer this one is built on, if it extends a built layer.
    pub fn built_parent(&self) -> Option<&str> {
        match &self.from {
            Some(src) if src.source_type == SourceType::Built => Some(src.tag.as_str()),
            _ => None,
        }
    }
}

/// Whether `path` carries a URL scheme (`http://`, `docker://`, ...).
pub fn is_url(path: &str) -> bool {
    match path.split_once("://") {
        Some((scheme, _)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '-' || c == '.')
        }
        None => false,
    }
}
