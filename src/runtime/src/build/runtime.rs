//! Container runtime seam for layer builds.
//!
//! The build driver prepares a layer's root filesystem on the host and
//! hands it to a [`ContainerRuntime`] to mount host paths and run the
//! layer's commands inside it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;

use stratum_core::error::{Result, StratumError};
use stratum_core::Layer;

/// Where the layer's imports are mounted inside the container.
pub const IMPORT_MOUNT: &str = "/stratum";

/// The container a layer is built in.
#[derive(Debug, Clone, Copy)]
pub struct Container<'a> {
    /// Layer name
    pub name: &'a str,
    /// Host directory used as the container's root
    pub rootfs: &'a Path,
}

impl Container<'_> {
    /// Host path of `target` inside the container.
    pub fn host_path(&self, target: &str) -> PathBuf {
        self.rootfs.join(target.trim_start_matches('/'))
    }

    pub fn build_error(&self, message: impl Into<String>) -> StratumError {
        StratumError::BuildError {
            layer: self.name.to_string(),
            message: message.into(),
        }
    }

    pub fn command_failed(&self, command: &str, status: i32, stderr: &str) -> StratumError {
        StratumError::CommandFailed {
            layer: self.name.to_string(),
            command: command.to_string(),
            status,
            stderr: stderr.trim().to_string(),
        }
    }
}

/// Executes build steps inside a layer's container.
pub trait ContainerRuntime {
    /// Make host `source` visible at `target` inside the container.
    fn bind_mount(&self, container: &Container<'_>, source: &Path, target: &str) -> Result<()>;

    /// Undo a [`ContainerRuntime::bind_mount`].
    fn unmount(&self, container: &Container<'_>, target: &str) -> Result<()>;

    /// Run a shell command inside the container.
    fn execute(
        &self,
        container: &Container<'_>,
        command: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<()>;

    /// Run every build command of `layer`, with its imports at
    /// [`IMPORT_MOUNT`] and its bind mounts in place.
    ///
    /// Mounts are undone whether or not the commands succeed.
    fn build_layer(
        &self,
        container: &Container<'_>,
        layer: &Layer,
        import_dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut mounted: Vec<String> = Vec::new();
        let result = (|| -> Result<()> {
            self.bind_mount(container, import_dir, IMPORT_MOUNT)?;
            mounted.push(IMPORT_MOUNT.to_string());
            for bind in &layer.binds {
                self.bind_mount(container, Path::new(&bind.source), &bind.target)?;
                mounted.push(bind.target.clone());
            }
            for command in &layer.run {
                tracing::info!(layer = container.name, command = %command, "Running build command");
                self.execute(container, command, env)?;
            }
            Ok(())
        })();

        let mut unmount_result = Ok(());
        for target in mounted.iter().rev() {
            if let Err(e) = self.unmount(container, target) {
                tracing::warn!(layer = container.name, target = %target, error = %e, "Failed to unmount");
                if unmount_result.is_ok() {
                    unmount_result = Err(e);
                }
            }
        }
        result.and(unmount_result)
    }
}

/// Runs build commands with `chroot` and mounts with `mount --bind`.
///
/// Requires root on a Linux host.
#[derive(Debug, Clone, Default)]
pub struct ChrootRuntime;

impl ChrootRuntime {
    pub fn new() -> Self {
        Self
    }

    fn run(container: &Container<'_>, cmd: &mut Command, what: &str) -> Result<String> {
        let output = cmd
            .output()
            .map_err(|e| container.build_error(format!("Failed to execute {}: {}", what, e)))?;

        if !output.status.success() {
            return Err(container.command_failed(
                what,
                output.status.code().unwrap_or(-1),
                &String::from_utf8_lossy(&output.stderr),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

impl ContainerRuntime for ChrootRuntime {
    fn bind_mount(&self, container: &Container<'_>, source: &Path, target: &str) -> Result<()> {
        let dest = container.host_path(target);
        let created = if source.is_dir() {
            std::fs::create_dir_all(&dest)
        } else {
            dest.parent()
                .map(std::fs::create_dir_all)
                .unwrap_or(Ok(()))
                .and_then(|_| {
                    std::fs::OpenOptions::new()
                        .create(true)
                        .write(true)
                        .open(&dest)
                        .map(|_| ())
                })
        };
        created.map_err(|e| {
            StratumError::io(format!("Failed to create mount point {}", dest.display()), e)
        })?;

        Self::run(
            container,
            Command::new("mount").arg("--bind").arg(source).arg(&dest),
            "mount",
        )?;
        Ok(())
    }

    fn unmount(&self, container: &Container<'_>, target: &str) -> Result<()> {
        let dest = container.host_path(target);
        Self::run(container, Command::new("umount").arg(&dest), "umount")?;
        Ok(())
    }

    fn execute(
        &self,
        container: &Container<'_>,
        command: &str,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut cmd = Command::new("chroot");
        cmd.arg(container.rootfs).arg("/bin/sh").arg("-c").arg(command);
        cmd.env_clear();
        cmd.env(
            "PATH",
            "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin",
        );
        cmd.env("HOME", "/root");
        cmd.envs(env);

        let stdout = Self::run(container, &mut cmd, "build command")?;
        if !stdout.is_empty() {
            tracing::debug!(layer = container.name, output = %stdout.trim_end(), "Command output");
        }
        Ok(())
    }
}
