use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, StratumError};

/// Name of the persisted build cache file inside `stratum_dir`.
pub const BUILD_CACHE_FILE: &str = "build.cache";

/// Build configuration
///
/// Locates the three directories a build run works against. Relative paths
/// are interpreted relative to the process working directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildConfig {
    /// Working state (build cache, layer bases)
    pub stratum_dir: PathBuf,

    /// OCI image layout that receives built images
    pub oci_dir: PathBuf,

    /// Per-layer root filesystems
    pub rootfs_dir: PathBuf,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            stratum_dir: PathBuf::from(".stratum"),
            oci_dir: PathBuf::from("oci"),
            rootfs_dir: PathBuf::from("roots"),
        }
    }
}

impl BuildConfig {
    /// Configuration with every directory placed under `root`.
    pub fn with_root(root: &Path) -> Self {
        Self {
            stratum_dir: root.join(".stratum"),
            oci_dir: root.join("oci"),
            rootfs_dir: root.join("roots"),
        }
    }

    /// Load a YAML configuration file. Missing keys take their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            StratumError::ConfigError(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        serde_yaml::from_str(&content).map_err(|e| {
            StratumError::ConfigError(format!(
                "Failed to parse config file {}: {}",
                path.display(),
                e
            ))
        })
    }

    /// Path of the persisted build cache.
    pub fn cache_path(&self) -> PathBuf {
        self.stratum_dir.join(BUILD_CACHE_FILE)
    }

    /// Root filesystem directory of a single layer.
    pub fn layer_rootfs(&self, name: &str) -> PathBuf {
        self.rootfs_dir.join(name)
    }
}
