//! End-to-end behavior of an on-disk image layout.

use std::fs;
use std::io::Read;
use std::path::Path;

use stratum_core::StratumError;
use stratum_runtime::oci::{
    Blob, ConfigGenerator, Descriptor, ImageLayout, MapOptions, MEDIA_TYPE_IMAGE_CONFIG,
    MEDIA_TYPE_LAYER_TAR,
};
use tempfile::TempDir;

fn blob_count(layout: &Path) -> usize {
    fs::read_dir(layout.join("blobs/sha256")).unwrap().count()
}

fn read_all(layout: &ImageLayout, desc: &Descriptor) -> Vec<u8> {
    let mut reader = layout.get_blob(desc).unwrap();
    let mut bytes = Vec::new();
    reader.read_to_end(&mut bytes).unwrap();
    reader.close();
    bytes
}

#[test]
fn put_blob_is_idempotent() {
    let tmp = TempDir::new().unwrap();
    let layout = ImageLayout::create(&tmp.path().join("oci")).unwrap();

    let first = layout.put_blob(&b"some layer bytes"[..]).unwrap();
    let second = layout.put_blob(&b"some layer bytes"[..]).unwrap();

    assert_eq!(first, second);
    assert_eq!(blob_count(layout.path()), 1);
}

#[test]
fn blobs_read_back_identical() {
    let tmp = TempDir::new().unwrap();
    let layout = ImageLayout::create(&tmp.path().join("oci")).unwrap();

    let big = vec![7u8; 200_000];
    for content in [&b""[..], &b"x"[..], &big[..]] {
        let blob = layout.put_blob(content).unwrap();
        let desc = blob.to_descriptor(MEDIA_TYPE_LAYER_TAR).unwrap();
        assert_eq!(read_all(&layout, &desc), content);
    }
}

#[test]
fn tags_are_mutable() {
    let tmp = TempDir::new().unwrap();
    let layout = ImageLayout::create(&tmp.path().join("oci")).unwrap();
    let d1 = layout
        .put_blob(&b"one"[..])
        .unwrap()
        .to_descriptor(MEDIA_TYPE_LAYER_TAR)
        .unwrap();
    let d2 = layout
        .put_blob(&b"two"[..])
        .unwrap()
        .to_descriptor(MEDIA_TYPE_LAYER_TAR)
        .unwrap();

    layout.update_reference("t", &d1).unwrap();
    layout.update_reference("t", &d2).unwrap();
    assert_eq!(layout.resolve("t").unwrap(), d2);
}

#[test]
fn missing_and_ambiguous_tags() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("oci");
    let layout = ImageLayout::create(&root).unwrap();

    assert!(layout.resolve("nope").unwrap_err().is_not_found());

    let a = "a".repeat(64);
    let b = "b".repeat(64);
    let index = format!(
        r#"{{"schemaVersion":2,"manifests":[
            {{"mediaType":"application/vnd.oci.image.manifest.v1+json","digest":"sha256:{a}","size":1,
              "annotations":{{"org.opencontainers.image.ref.name":"dup"}}}},
            {{"mediaType":"application/vnd.oci.image.manifest.v1+json","digest":"sha256:{b}","size":1,
              "annotations":{{"org.opencontainers.image.ref.name":"dup"}}}}]}}"#
    );
    fs::write(root.join("index.json"), index).unwrap();

    match layout.resolve("dup").unwrap_err() {
        StratumError::Ambiguous { name, count } => {
            assert_eq!(name, "dup");
            assert_eq!(count, 2);
        }
        other => panic!("unexpected error: {:?}", other),
    }
}

#[test]
fn manifest_round_trip() {
    let tmp = TempDir::new().unwrap();
    let layout = ImageLayout::create(&tmp.path().join("oci")).unwrap();
    let layers = vec![
        layout.put_blob(&b"layer one"[..]).unwrap(),
        layout.put_blob(&b"layer two"[..]).unwrap(),
    ];
    let mut config = ConfigGenerator::new();
    config.set_entrypoint(vec!["/bin/app".to_string()]);
    config.set_working_dir("/srv");

    layout
        .new_image("app", &config, &layers, MEDIA_TYPE_LAYER_TAR)
        .unwrap();

    let manifest = layout.lookup_manifest("app").unwrap();
    let expected: Vec<Descriptor> = layers
        .iter()
        .map(|b| b.to_descriptor(MEDIA_TYPE_LAYER_TAR).unwrap())
        .collect();
    assert_eq!(manifest.layers, expected);
    assert_eq!(manifest.config.media_type, MEDIA_TYPE_IMAGE_CONFIG);

    let decoded = layout
        .lookup_config(&Blob::from(&manifest.config))
        .unwrap();
    assert_eq!(&decoded, config.image());
}

#[test]
fn survives_reopen() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("oci");
    {
        let layout = ImageLayout::create(&root).unwrap();
        let layer = layout.put_blob(&b"layer"[..]).unwrap();
        layout
            .new_image("app", &ConfigGenerator::new(), &[layer], MEDIA_TYPE_LAYER_TAR)
            .unwrap();
        layout.close();
    }

    let layout = ImageLayout::open(&root).unwrap();
    assert_eq!(
        layout.list_tags().unwrap().into_iter().collect::<Vec<_>>(),
        vec!["app"]
    );
    assert_eq!(layout.layers_for_tag("app").unwrap().len(), 1);
}

#[cfg(unix)]
#[test]
fn unpack_preserves_dangling_symlink() {
    let tmp = TempDir::new().unwrap();
    let layout = ImageLayout::create(&tmp.path().join("oci")).unwrap();

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_entry_type(tar::EntryType::Symlink);
    header.set_size(0);
    header.set_mode(0o777);
    builder
        .append_link(&mut header, "broken", "/does/not/exist")
        .unwrap();
    let layer = layout
        .put_blob(builder.into_inner().unwrap().as_slice())
        .unwrap();
    layout
        .new_image("linked", &ConfigGenerator::new(), &[layer], MEDIA_TYPE_LAYER_TAR)
        .unwrap();

    let dest = tmp.path().join("rootfs");
    layout
        .unpack("linked", &dest, &MapOptions::rootless())
        .unwrap();

    let link = dest.join("broken");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&link).unwrap(), Path::new("/does/not/exist"));
    assert!(!link.exists());
}
