//! Image configuration generation.

use std::collections::HashMap;

use oci_spec::image::{Config, ImageConfiguration};
use stratum_core::Layer;

/// Builds an OCI image configuration document.
#[derive(Debug, Clone, Default)]
pub struct ConfigGenerator {
    image: ImageConfiguration,
}

impl ConfigGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration, e.g. a base image's.
    pub fn from_image(image: ImageConfiguration) -> Self {
        Self { image }
    }

    /// Configuration carrying the runtime settings of a layer.
    pub fn for_layer(layer: &Layer) -> Self {
        let mut generator = Self::new();

        if !layer.full_command.is_empty() {
            generator.set_entrypoint(layer.full_command.clone());
            generator.set_cmd(Vec::new());
        } else {
            if !layer.entrypoint.is_empty() {
                generator.set_entrypoint(layer.entrypoint.clone());
            }
            if !layer.cmd.is_empty() {
                generator.set_cmd(layer.cmd.clone());
            }
        }

        if !layer.environment.is_empty() {
            generator.set_env(
                layer
                    .environment
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect(),
            );
        }
        if !layer.working_dir.is_empty() {
            generator.set_working_dir(&layer.working_dir);
        }
        if !layer.runtime_user.is_empty() {
            generator.set_user(&layer.runtime_user);
        }
        if !layer.volumes.is_empty() {
            generator.set_volumes(layer.volumes.clone());
        }
        if !layer.labels.is_empty() {
            generator.set_labels(
                layer
                    .labels
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect(),
            );
        }

        generator
    }

    fn current_config(&self) -> Config {
        self.image.config().clone().unwrap_or_default()
    }

    fn update(&mut self, f: impl FnOnce(&mut Config)) {
        let mut config = self.current_config();
        f(&mut config);
        self.image.set_config(Some(config));
    }

    pub fn set_entrypoint(&mut self, entrypoint: Vec<String>) {
        self.update(|c| {
            c.set_entrypoint(Some(entrypoint));
        });
    }

    pub fn set_cmd(&mut self, cmd: Vec<String>) {
        self.update(|c| {
            c.set_cmd(Some(cmd));
        });
    }

    pub fn set_env(&mut self, env: Vec<String>) {
        self.update(|c| {
            c.set_env(Some(env));
        });
    }

    pub fn set_working_dir(&mut self, dir: &str) {
        self.update(|c| {
            c.set_working_dir(Some(dir.to_string()));
        });
    }

    pub fn set_user(&mut self, user: &str) {
        self.update(|c| {
            c.set_user(Some(user.to_string()));
        });
    }

    pub fn set_volumes(&mut self, volumes: Vec<String>) {
        self.update(|c| {
            c.set_volumes(Some(volumes));
        });
    }

    pub fn set_labels(&mut self, labels: HashMap<String, String>) {
        self.update(|c| {
            c.set_labels(Some(labels));
        });
    }

    /// Record the uncompressed digests of the image's layers, in order.
    pub fn set_diff_ids(&mut self, diff_ids: Vec<String>) {
        let mut rootfs = self.image.rootfs().clone();
        rootfs.set_diff_ids(diff_ids);
        self.image.set_rootfs(rootfs);
    }

    /// The configuration built so far.
    pub fn image(&self) -> &ImageConfiguration {
        &self.image
    }
}
