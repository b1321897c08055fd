//! CLI command definitions and dispatch.

mod build;
mod cache;
mod init;
mod inspect;
mod tag;
mod tags;
mod unpack;
mod untag;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use stratum_core::BuildConfig;
use stratum_runtime::ImageLayout;
use tokio_util::sync::CancellationToken;

/// Stratum - layered OCI image builder.
#[derive(Parser)]
#[command(name = "stratum", version, about)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Options shared by every command.
#[derive(Args, Debug, Default)]
pub struct GlobalArgs {
    /// Configuration file (YAML); defaults to ~/.config/stratum/config.yaml if present
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Working state directory (build cache)
    #[arg(long, global = true)]
    pub stratum_dir: Option<PathBuf>,

    /// OCI image layout directory
    #[arg(long, global = true)]
    pub oci_dir: Option<PathBuf>,

    /// Per-layer root filesystem directory
    #[arg(long, global = true)]
    pub roots_dir: Option<PathBuf>,
}

/// Available commands.
#[derive(Subcommand)]
pub enum Command {
    /// Create an empty OCI image layout
    Init(init::InitArgs),
    /// List tags in the image layout
    Tags(tags::TagsArgs),
    /// Point a new tag at an existing image
    Tag(tag::TagArgs),
    /// Remove a tag (blobs are kept)
    Untag(untag::UntagArgs),
    /// Display an image's manifest and configuration as JSON
    Inspect(inspect::InspectArgs),
    /// Extract a tagged image into a directory
    Unpack(unpack::UnpackArgs),
    /// Inspect the build cache
    Cache(cache::CacheArgs),
    /// Build layers from a stratumfile
    Build(build::BuildArgs),
}

/// Shared state handed to every command.
pub(crate) struct Context {
    pub config: BuildConfig,
    pub cancel: CancellationToken,
}

impl Context {
    /// Open the configured image layout.
    pub fn open_layout(&self) -> stratum_core::Result<ImageLayout> {
        ImageLayout::open_with_cancellation(&self.config.oci_dir, self.cancel.clone())
    }
}

impl GlobalArgs {
    /// Resolve the build configuration: file first, then flag overrides.
    pub fn build_config(&self) -> stratum_core::Result<BuildConfig> {
        let file = self.config.clone().or_else(|| {
            dirs::config_dir()
                .map(|d| d.join("stratum").join("config.yaml"))
                .filter(|p| p.is_file())
        });

        let mut config = match file {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading configuration");
                BuildConfig::load(&path)?
            }
            None => BuildConfig::default(),
        };

        if let Some(dir) = &self.stratum_dir {
            config.stratum_dir = dir.clone();
        }
        if let Some(dir) = &self.oci_dir {
            config.oci_dir = dir.clone();
        }
        if let Some(dir) = &self.roots_dir {
            config.rootfs_dir = dir.clone();
        }
        Ok(config)
    }
}

/// Run store work on the blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, Box<dyn std::error::Error>>
where
    F: FnOnce() -> stratum_core::Result<T> + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(f).await??)
}

/// Dispatch a parsed CLI to the appropriate command handler.
pub async fn dispatch(cli: Cli, cancel: CancellationToken) -> Result<(), Box<dyn std::error::Error>> {
    let ctx = Context {
        config: cli.global.build_config()?,
        cancel,
    };

    match cli.command {
        Command::Init(args) => init::execute(args, ctx).await,
        Command::Tags(args) => tags::execute(args, ctx).await,
        Command::Tag(args) => tag::execute(args, ctx).await,
        Command::Untag(args) => untag::execute(args, ctx).await,
        Command::Inspect(args) => inspect::execute(args, ctx).await,
        Command::Unpack(args) => unpack::execute(args, ctx).await,
        Command::Cache(args) => cache::execute(args, ctx).await,
        Command::Build(args) => build::execute(args, ctx).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "stratum",
            "tags",
            "--oci-dir",
            "/tmp/images",
            "--roots-dir",
            "/tmp/roots",
        ])
        .unwrap();
        let config = GlobalArgs {
            config: None,
            ..cli.global
        }
        .build_config()
        .unwrap();

        assert_eq!(config.oci_dir, PathBuf::from("/tmp/images"));
        assert_eq!(config.rootfs_dir, PathBuf::from("/tmp/roots"));
    }

    #[test]
    fn test_config_file_then_flags() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("stratum.yaml");
        std::fs::write(&file, "stratum_dir: /state\noci_dir: /images\n").unwrap();

        let args = GlobalArgs {
            config: Some(file),
            oci_dir: Some(PathBuf::from("/override")),
            ..Default::default()
        };
        let config = args.build_config().unwrap();
        assert_eq!(config.stratum_dir, PathBuf::from("/state"));
        assert_eq!(config.oci_dir, PathBuf::from("/override"));
        assert_eq!(config.rootfs_dir, PathBuf::from("roots"));
    }

    #[test]
    fn test_missing_config_file() {
        let args = GlobalArgs {
            config: Some(PathBuf::from("/nonexistent/stratum.yaml")),
            ..Default::default()
        };
        assert!(args.build_config().is_err());
    }
}
