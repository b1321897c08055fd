//! Build cache soundness across process restarts.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use stratum_core::{BuildConfig, Stratumfile};
use stratum_runtime::build::{BuildDriver, Container, ContainerRuntime};
use stratum_runtime::cache::{BuildCache, CachedOutput, LayerSpecs};
use stratum_runtime::oci::{ImageLayout, MEDIA_TYPE_LAYER_TAR};
use tempfile::TempDir;

const STRATUMFILE: &str = r#"
foo:
  from:
    type: docker
    url: docker://centos:latest
  run: zomg
  build_only: true
bar:
  from:
    type: scratch
  run:
    - one
    - two
"#;

struct Workspace {
    _tmp: TempDir,
    config: BuildConfig,
    layout: ImageLayout,
    specs: LayerSpecs,
}

fn workspace() -> Workspace {
    let tmp = TempDir::new().unwrap();
    let config = BuildConfig::with_root(tmp.path());
    let layout = ImageLayout::create(&config.oci_dir).unwrap();
    let file = Stratumfile::parse(STRATUMFILE, tmp.path()).unwrap();
    Workspace {
        _tmp: tmp,
        config,
        layout,
        specs: LayerSpecs::from_stratumfile(&file),
    }
}

#[test]
fn changed_run_invalidates_after_reopen() {
    let ws = workspace();
    let desc = ws
        .layout
        .put_blob(&b"foo layer"[..])
        .unwrap()
        .to_descriptor(MEDIA_TYPE_LAYER_TAR)
        .unwrap();

    let mut cache = BuildCache::open(&ws.config, &ws.layout, ws.specs.clone()).unwrap();
    cache.put("foo", CachedOutput::Blob(desc)).unwrap();
    drop(cache);

    let cache = BuildCache::open(&ws.config, &ws.layout, ws.specs.clone()).unwrap();
    assert!(ws.specs.update("foo", |layer| layer.run = vec!["jmh".to_string()]));
    assert_eq!(cache.lookup("foo").unwrap(), None);
}

#[test]
fn unchanged_layer_hits() {
    let ws = workspace();
    let desc = ws
        .layout
        .put_blob(&b"bar layer"[..])
        .unwrap()
        .to_descriptor(MEDIA_TYPE_LAYER_TAR)
        .unwrap();

    let mut cache = BuildCache::open(&ws.config, &ws.layout, ws.specs.clone()).unwrap();
    cache.put("bar", CachedOutput::Blob(desc.clone())).unwrap();
    assert_eq!(
        cache.lookup("bar").unwrap(),
        Some(CachedOutput::Blob(desc.clone()))
    );

    let reopened = BuildCache::open(&ws.config, &ws.layout, ws.specs.clone()).unwrap();
    assert_eq!(
        reopened.lookup("bar").unwrap(),
        Some(CachedOutput::Blob(desc))
    );
}

/// Records executed commands and leaves a marker file per command.
#[derive(Default)]
struct MarkerRuntime {
    executed: parking_lot::Mutex<Vec<String>>,
}

impl ContainerRuntime for MarkerRuntime {
    fn bind_mount(
        &self,
        _container: &Container<'_>,
        _source: &Path,
        _target: &str,
    ) -> stratum_core::Result<()> {
        Ok(())
    }

    fn unmount(&self, _container: &Container<'_>, _target: &str) -> stratum_core::Result<()> {
        Ok(())
    }

    fn execute(
        &self,
        container: &Container<'_>,
        command: &str,
        _env: &BTreeMap<String, String>,
    ) -> stratum_core::Result<()> {
        self.executed.lock().push(command.to_string());
        fs::write(container.rootfs.join(command), command).unwrap();
        Ok(())
    }
}

#[test]
fn rebuild_of_unchanged_layer_skips_runtime() {
    let ws = workspace();
    let runtime = MarkerRuntime::default();

    for _ in 0..3 {
        let mut cache = BuildCache::open(&ws.config, &ws.layout, ws.specs.clone()).unwrap();
        BuildDriver::new(&ws.config, &ws.layout, &mut cache, &runtime)
            .with_env(BTreeMap::new())
            .build("bar")
            .unwrap();
    }

    assert_eq!(*runtime.executed.lock(), vec!["one", "two"]);
    assert!(ws.layout.list_tags().unwrap().contains("bar"));
}
