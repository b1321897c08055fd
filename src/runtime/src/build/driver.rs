//! Build driver.
//!
//! Builds layers in dependency order, consulting the build cache first and
//! only running the container runtime on a miss. Each built layer is
//! packaged as a single-layer image tagged with the layer's name.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use stratum_core::env::process_env;
use stratum_core::error::{Result, StratumError};
use stratum_core::{BuildConfig, ImageSource, Layer, SourceType};

use super::import::{copy_tree, grab};
use super::layer::{create_layer_from_dir, LayerCompression};
use super::runtime::{Container, ContainerRuntime};
use crate::cache::{BuildCache, CachedOutput};
use crate::oci::{ConfigGenerator, Descriptor, ImageLayout, MapOptions, TarUnpacker};

/// Result of building one layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutcome {
    /// Served from the build cache without running anything
    Cached(CachedOutput),
    /// Built by the container runtime in this run
    Built(CachedOutput),
}

impl BuildOutcome {
    pub fn output(&self) -> &CachedOutput {
        match self {
            BuildOutcome::Cached(output) | BuildOutcome::Built(output) => output,
        }
    }

    pub fn was_built(&self) -> bool {
        matches!(self, BuildOutcome::Built(_))
    }
}

/// Drives layer builds against one image layout and build cache.
pub struct BuildDriver<'a> {
    config: &'a BuildConfig,
    layout: &'a ImageLayout,
    cache: &'a mut BuildCache,
    runtime: &'a dyn ContainerRuntime,
    env: BTreeMap<String, String>,
    compression: LayerCompression,
    map_options: MapOptions,
    outcomes: HashMap<String, BuildOutcome>,
    in_progress: Vec<String>,
}

impl<'a> BuildDriver<'a> {
    pub fn new(
        config: &'a BuildConfig,
        layout: &'a ImageLayout,
        cache: &'a mut BuildCache,
        runtime: &'a dyn ContainerRuntime,
    ) -> Self {
        Self {
            config,
            layout,
            cache,
            runtime,
            env: process_env(),
            compression: LayerCompression::default(),
            map_options: MapOptions::rootless(),
            outcomes: HashMap::new(),
            in_progress: Vec::new(),
        }
    }

    /// Use `env` instead of the process environment as the passthrough source.
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_compression(mut self, compression: LayerCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Ownership mapping used when unpacking base images.
    pub fn with_map_options(mut self, options: MapOptions) -> Self {
        self.map_options = options;
        self
    }

    /// Build `name`, building the layer it extends first.
    ///
    /// A layer whose parent was rebuilt in this run is rebuilt too, even if
    /// its own cache entry is still valid.
    pub fn build(&mut self, name: &str) -> Result<BuildOutcome> {
        if let Some(done) = self.outcomes.get(name) {
            return Ok(done.clone());
        }
        if self.in_progress.iter().any(|n| n == name) {
            return Err(StratumError::InvalidLayer {
                layer: name.to_string(),
                message: format!(
                    "dependency cycle: {} -> {}",
                    self.in_progress.join(" -> "),
                    name
                ),
            });
        }
        let layer = self
            .cache
            .specs()
            .get(name)
            .ok_or_else(|| StratumError::not_found("layer", name))?;

        self.in_progress.push(name.to_string());
        let result = self.build_layer(name, &layer);
        self.in_progress.pop();

        let outcome = result?;
        self.outcomes.insert(name.to_string(), outcome.clone());
        Ok(outcome)
    }

    /// Build every named layer, in the given order.
    pub fn build_all(&mut self, names: &[String]) -> Result<Vec<(String, BuildOutcome)>> {
        names
            .iter()
            .map(|name| Ok((name.clone(), self.build(name)?)))
            .collect()
    }

    fn build_layer(&mut self, name: &str, layer: &Layer) -> Result<BuildOutcome> {
        let parent_rebuilt = match layer.built_parent() {
            Some(parent) => self.build(parent)?.was_built(),
            None => false,
        };

        if parent_rebuilt {
            tracing::debug!(layer = name, "Parent was rebuilt, skipping cache");
        } else if let Some(output) = self.cache.lookup(name)? {
            if let CachedOutput::Blob(desc) = &output {
                self.ensure_tag(name, desc)?;
            }
            tracing::info!(layer = name, "Using cached layer");
            return Ok(BuildOutcome::Cached(output));
        }

        let output = self.run(name, layer)?;
        self.cache.put(name, output.clone())?;
        Ok(BuildOutcome::Built(output))
    }

    fn ensure_tag(&self, name: &str, desc: &Descriptor) -> Result<()> {
        match self.layout.resolve(name) {
            Ok(current) if current == *desc => Ok(()),
            Ok(_) => self.layout.update_reference(name, desc),
            Err(e) if e.is_not_found() => self.layout.update_reference(name, desc),
            Err(e) => Err(e),
        }
    }

    fn run(&self, name: &str, layer: &Layer) -> Result<CachedOutput> {
        let rootfs = self.config.layer_rootfs(name);
        self.prepare_rootfs(layer, &rootfs)?;

        let import_dir = self.config.stratum_dir.join("imports").join(name);
        reset_dir(&import_dir)?;

        let container = Container {
            name,
            rootfs: &rootfs,
        };
        for import in &layer.import {
            grab(self.runtime, &container, import, &import_dir)?;
        }

        let env = layer.build_environment(name, &self.env)?;
        tracing::info!(layer = name, commands = layer.run.len(), "Building layer");
        self.runtime
            .build_layer(&container, layer, &import_dir, &env)?;

        if layer.build_only {
            return Ok(CachedOutput::BuildOnly);
        }
        Ok(CachedOutput::Blob(self.package(name, layer, &rootfs)?))
    }

    fn prepare_rootfs(&self, layer: &Layer, rootfs: &Path) -> Result<()> {
        reset_dir(rootfs)?;
        let Some(source) = &layer.from else {
            return Ok(());
        };

        match source.source_type {
            SourceType::Scratch => Ok(()),
            SourceType::Built => {
                let parent_rootfs = self.config.layer_rootfs(&source.tag);
                if parent_rootfs.is_dir() {
                    copy_tree(&parent_rootfs, rootfs)
                } else {
                    self.layout.unpack(&source.tag, rootfs, &self.map_options)
                }
            }
            SourceType::Oci => {
                let (path, tag) = parse_oci_source(source)?;
                let base = ImageLayout::open(&path)?;
                let result = base.unpack(&tag, rootfs, &self.map_options);
                base.close();
                result
            }
            SourceType::Tar => {
                let path = Path::new(source.url.trim_start_matches("file://"));
                let file = open_archive(path)?;
                let unpacker = TarUnpacker::new();
                if is_gzip(path)? {
                    unpacker.apply_layer(flate2::read::GzDecoder::new(file), rootfs, &self.map_options)
                } else {
                    unpacker.apply_layer(file, rootfs, &self.map_options)
                }
            }
            SourceType::Docker => Err(StratumError::BuildError {
                layer: source.url.clone(),
                message: "registry images cannot be fetched; copy the image into an OCI layout and use an oci source".to_string(),
            }),
        }
    }

    fn package(&self, name: &str, layer: &Layer, rootfs: &Path) -> Result<Descriptor> {
        std::fs::create_dir_all(&self.config.stratum_dir).map_err(|e| {
            StratumError::io(
                format!("Failed to create {}", self.config.stratum_dir.display()),
                e,
            )
        })?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.config.stratum_dir)
            .map_err(|e| StratumError::io("Failed to create layer file", e))?;

        let diff_id = create_layer_from_dir(rootfs, tmp.as_file_mut(), self.compression)?;
        let reader = tmp
            .reopen()
            .map_err(|e| StratumError::io("Failed to reopen layer file", e))?;
        let blob = self.layout.put_blob(reader)?;

        let mut config = ConfigGenerator::for_layer(layer);
        config.set_diff_ids(vec![diff_id.to_string()]);
        self.layout
            .new_image(name, &config, &[blob], self.compression.media_type())
    }
}

/// Split `oci:<path>:<tag>`; a non-empty `tag` field takes precedence.
fn parse_oci_source(source: &ImageSource) -> Result<(PathBuf, String)> {
    let url = source.url.strip_prefix("oci:").unwrap_or(&source.url);
    if !source.tag.is_empty() {
        return Ok((PathBuf::from(url), source.tag.clone()));
    }
    match url.rsplit_once(':') {
        Some((path, tag)) if !path.is_empty() && !tag.is_empty() => {
            Ok((PathBuf::from(path), tag.to_string()))
        }
        _ => Err(StratumError::InvalidLayer {
            layer: source.url.clone(),
            message: "oci source must look like oci:<path>:<tag>".to_string(),
        }),
    }
}

fn open_archive(path: &Path) -> Result<File> {
    File::open(path)
        .map_err(|e| StratumError::io(format!("Failed to open {}", path.display()), e))
}

fn is_gzip(path: &Path) -> Result<bool> {
    let mut magic = [0u8; 2];
    let mut file = open_archive(path)?;
    let mut read = 0;
    while read < magic.len() {
        match file.read(&mut magic[read..]) {
            Ok(0) => break,
            Ok(n) => read += n,
            Err(e) => {
                return Err(StratumError::io(
                    format!("Failed to read {}", path.display()),
                    e,
                ))
            }
        }
    }
    Ok(read == 2 && magic == [0x1f, 0x8b])
}

fn reset_dir(path: &Path) -> Result<()> {
    if std::fs::symlink_metadata(path).is_ok() {
        std::fs::remove_dir_all(path)
            .map_err(|e| StratumError::io(format!("Failed to remove {}", path.display()), e))?;
    }
    std::fs::create_dir_all(path)
        .map_err(|e| StratumError::io(format!("Failed to create {}", path.display()), e))
}
