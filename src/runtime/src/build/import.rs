//! Layer imports.
//!
//! Local imports are verified and copied on the host. URL imports are
//! fetched and verified inside the build container, with the import
//! directory mounted at [`IMPORT_MOUNT`].

use std::collections::BTreeMap;
use std::path::Path;

use stratum_core::error::{Result, StratumError};
use stratum_core::ImportSpec;

use super::runtime::{Container, ContainerRuntime, IMPORT_MOUNT};
use crate::cache::imports::{hash_import, sha256_file};

/// Bring `import` into `target_dir`, failing with `HashMismatch` if it
/// carries an expected hash that the content does not match.
pub fn grab(
    runtime: &dyn ContainerRuntime,
    container: &Container<'_>,
    import: &ImportSpec,
    target_dir: &Path,
) -> Result<()> {
    std::fs::create_dir_all(target_dir).map_err(|e| {
        StratumError::io(format!("Failed to create {}", target_dir.display()), e)
    })?;

    if import.is_url() {
        grab_url(runtime, container, import, target_dir)
    } else {
        grab_local(import, target_dir)
    }
}

fn grab_local(import: &ImportSpec, target_dir: &Path) -> Result<()> {
    let source = Path::new(&import.path);
    if let Some(expected) = &import.hash {
        let actual = if source.is_file() {
            sha256_file(source)?
        } else {
            hash_import(source)?
                .trim_start_matches("sha256:")
                .to_string()
        };
        if normalize_hash(expected) != actual {
            return Err(StratumError::HashMismatch {
                source_path: import.path.clone(),
                expected: expected.clone(),
                actual,
            });
        }
    }

    let name = source.file_name().ok_or_else(|| StratumError::InvalidLayer {
        layer: import.path.clone(),
        message: "import path has no file name".to_string(),
    })?;
    copy_tree(source, &target_dir.join(name))?;
    tracing::debug!(source = %import.path, "Imported local path");
    Ok(())
}

fn grab_url(
    runtime: &dyn ContainerRuntime,
    container: &Container<'_>,
    import: &ImportSpec,
    target_dir: &Path,
) -> Result<()> {
    let file_name = import
        .path
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("download");
    let dest = format!("{}/{}", IMPORT_MOUNT, file_name);

    let quote = |s: &str| {
        shlex::try_quote(s)
            .map(|q| q.into_owned())
            .map_err(|e| container.build_error(format!("Cannot quote '{}': {}", s, e)))
    };
    let fetch = format!("curl -fsSL -o {} {}", quote(&dest)?, quote(&import.path)?);
    let check = import
        .hash
        .as_ref()
        .map(|hash| {
            let line = format!("{}  {}", normalize_hash(hash), dest);
            Ok::<_, StratumError>(format!("echo {} | sha256sum --check", quote(&line)?))
        })
        .transpose()?;

    runtime.bind_mount(container, target_dir, IMPORT_MOUNT)?;
    let env = BTreeMap::new();
    let result = runtime.execute(container, &fetch, &env).and_then(|_| match &check {
        Some(check) => runtime.execute(container, check, &env).map_err(|e| match e {
            StratumError::CommandFailed { .. } => StratumError::HashMismatch {
                source_path: import.path.clone(),
                expected: import.hash.clone().unwrap_or_default(),
                actual: "content with a different sha256".to_string(),
            },
            other => other,
        }),
        None => Ok(()),
    });
    let unmounted = runtime.unmount(container, IMPORT_MOUNT);
    result?;
    unmounted?;

    tracing::debug!(source = %import.path, "Imported URL");
    Ok(())
}

fn normalize_hash(hash: &str) -> String {
    hash.trim_start_matches("sha256:").to_lowercase()
}

/// Recursively copy `src` to `dst`, recreating symlinks instead of
/// following them.
pub fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    let meta = std::fs::symlink_metadata(src)
        .map_err(|e| StratumError::io(format!("Failed to stat {}", src.display()), e))?;

    if meta.file_type().is_symlink() {
        let target = std::fs::read_link(src)
            .map_err(|e| StratumError::io(format!("Failed to read link {}", src.display()), e))?;
        return symlink(&target, dst);
    }

    if !meta.is_dir() {
        std::fs::copy(src, dst).map_err(|e| {
            StratumError::io(
                format!("Failed to copy {} to {}", src.display(), dst.display()),
                e,
            )
        })?;
        return Ok(());
    }

    std::fs::create_dir_all(dst)
        .map_err(|e| StratumError::io(format!("Failed to create {}", dst.display()), e))?;
    std::fs::set_permissions(dst, meta.permissions())
        .map_err(|e| StratumError::io(format!("Failed to chmod {}", dst.display()), e))?;

    let entries = std::fs::read_dir(src)
        .map_err(|e| StratumError::io(format!("Failed to read {}", src.display()), e))?;
    for entry in entries {
        let entry =
            entry.map_err(|e| StratumError::io(format!("Failed to read {}", src.display()), e))?;
        copy_tree(&entry.path(), &dst.join(entry.file_name()))?;
    }
    Ok(())
}

#[cfg(unix)]
fn symlink(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .map_err(|e| StratumError::io(format!("Failed to create link {}", link.display()), e))
}

#[cfg(not(unix))]
fn symlink(_target: &Path, link: &Path) -> Result<()> {
    Err(StratumError::io(
        format!("Failed to create link {}", link.display()),
        std::io::Error::new(std::io::ErrorKind::Unsupported, "symlinks need a unix host"),
    ))
}
