//! Integration test: drive the `stratum` binary against a temporary layout.

use std::path::Path;
use std::process::Command;

use stratum_runtime::oci::MEDIA_TYPE_LAYER_TAR;
use stratum_runtime::{ConfigGenerator, ImageLayout};
use tempfile::TempDir;

/// Run stratum with its directories rooted at `root`; returns (stdout, stderr, success).
fn stratum(root: &Path, args: &[&str]) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_stratum"))
        .arg("--oci-dir")
        .arg(root.join("oci"))
        .arg("--stratum-dir")
        .arg(root.join(".stratum"))
        .arg("--roots-dir")
        .arg(root.join("roots"))
        .args(args)
        .output()
        .expect("failed to run stratum");

    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn seed_image(root: &Path, tag: &str) {
    let layout = ImageLayout::open(&root.join("oci")).unwrap();
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(5);
    header.set_mode(0o644);
    builder
        .append_data(&mut header, "hello.txt", &b"hello"[..])
        .unwrap();
    let layer = layout
        .put_blob(builder.into_inner().unwrap().as_slice())
        .unwrap();

    let mut config = ConfigGenerator::new();
    config.set_cmd(vec!["/bin/sh".to_string()]);
    layout
        .new_image(tag, &config, &[layer], MEDIA_TYPE_LAYER_TAR)
        .unwrap();
}

#[test]
fn init_twice_fails() {
    let tmp = TempDir::new().unwrap();
    let (_, _, ok) = stratum(tmp.path(), &["init"]);
    assert!(ok);
    assert!(tmp.path().join("oci/oci-layout").is_file());

    let (_, stderr, ok) = stratum(tmp.path(), &["init"]);
    assert!(!ok);
    assert!(stderr.starts_with("Error:"), "{stderr}");
}

#[test]
fn tag_inspect_unpack() {
    let tmp = TempDir::new().unwrap();
    assert!(stratum(tmp.path(), &["init"]).2);
    seed_image(tmp.path(), "app");

    let (_, _, ok) = stratum(tmp.path(), &["tag", "app", "app-stable"]);
    assert!(ok);
    let (stdout, _, _) = stratum(tmp.path(), &["tags", "--quiet"]);
    assert_eq!(stdout.lines().collect::<Vec<_>>(), vec!["app", "app-stable"]);

    let (stdout, _, ok) = stratum(tmp.path(), &["inspect", "app-stable"]);
    assert!(ok);
    let json: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(json["Layers"].as_array().unwrap().len(), 1);
    assert_eq!(json["Config"]["config"]["Cmd"][0], "/bin/sh");

    let dest = tmp.path().join("out");
    let (_, stderr, ok) = stratum(
        tmp.path(),
        &["unpack", "app", dest.to_str().unwrap(), "--rootless"],
    );
    assert!(ok, "{stderr}");
    assert_eq!(
        std::fs::read_to_string(dest.join("hello.txt")).unwrap(),
        "hello"
    );
}

#[test]
fn missing_tag_is_an_error() {
    let tmp = TempDir::new().unwrap();
    assert!(stratum(tmp.path(), &["init"]).2);

    let (_, stderr, ok) = stratum(tmp.path(), &["tag", "missing", "other"]);
    assert!(!ok);
    assert!(stderr.contains("missing"), "{stderr}");

    let (_, _, ok) = stratum(tmp.path(), &["untag", "missing"]);
    assert!(!ok);
}

#[test]
fn empty_cache_lists_header_only() {
    let tmp = TempDir::new().unwrap();
    assert!(stratum(tmp.path(), &["init"]).2);

    let (stdout, _, ok) = stratum(tmp.path(), &["cache", "list"]);
    assert!(ok);
    assert!(stdout.contains("LAYER"));
    assert_eq!(stdout.lines().filter(|l| !l.trim().is_empty()).count(), 1);
}
