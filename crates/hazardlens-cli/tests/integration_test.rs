//! Integration tests for the hazardlens binary

use hazardlens_backends::{sha256_hex, sign_digest};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

const KEY: &[u8] = b"key";
const KEY_HEX: &str = "6b6579";

fn hazardlens(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_hazardlens"))
        .current_dir(dir)
        .env("RUST_LOG", "hazardlens=warn")
        .args(args)
        .output()
        .expect("failed to run hazardlens")
}

/// Write a model artifact and return its manifest entry
fn model_entry(dir: &Path, id: &str, kind: &str, model_id: &str, published: &[u8], on_disk: &[u8]) -> String {
    let path: PathBuf = dir.join(format!("{model_id}.safetensors"));
    std::fs::write(&path, on_disk).unwrap();
    let digest = sha256_hex(published);
    format!(
        "  - id: {id}\n    kind: {kind}\n    model: {{ model_id: {model_id}, path: \"{}\", sha256: \"{digest}\", signature: \"{}\" }}\n",
        path.display(),
        sign_digest(KEY, &digest)
    )
}

fn write_backends(dir: &Path, trusted: &[(&str, &[u8])], entries: &[String]) {
    let mut yaml = format!("signing_key: \"{KEY_HEX}\"\ntrusted_models:\n");
    for (model_id, published) in trusted {
        yaml.push_str(&format!("  {model_id}: \"{}\"\n", sha256_hex(published)));
    }
    yaml.push_str("backends:\n");
    for entry in entries {
        yaml.push_str(entry);
    }
    std::fs::write(dir.join("backends.yaml"), yaml).unwrap();
}

#[test]
fn test_verify_models_accepts_published_artifacts() {
    let dir = tempfile::tempdir().unwrap();
    let lite = model_entry(dir.path(), "lite-cpu", "on_device_cpu", "construction_safety_lite", b"lite", b"lite");
    write_backends(dir.path(), &[("construction_safety_lite", b"lite")], &[lite]);

    let output = hazardlens(dir.path(), &["verify-models"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(reports[0]["backend"], "lite-cpu");
    assert_eq!(reports[0]["status"], "verified");
}

#[test]
fn test_verify_models_fails_on_tampered_artifact() {
    let dir = tempfile::tempdir().unwrap();
    let lite = model_entry(dir.path(), "lite-cpu", "on_device_cpu", "construction_safety_lite", b"lite", b"lite");
    let full = model_entry(
        dir.path(),
        "full-npu",
        "on_device_npu",
        "construction_safety_full",
        b"full",
        b"full with a payload",
    );
    write_backends(
        dir.path(),
        &[("construction_safety_lite", b"lite"), ("construction_safety_full", b"full")],
        &[lite, full],
    );

    let output = hazardlens(dir.path(), &["verify-models"]);
    assert!(!output.status.success());

    let reports: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(reports[0]["status"], "verified");
    assert_eq!(reports[1]["backend"], "full-npu");
    assert_eq!(reports[1]["status"], "rejected");
    assert!(String::from_utf8_lossy(&output.stderr).contains("1 of 2 on-device models failed verification"));
}

#[test]
fn test_analyze_offline_without_on_device_backend_fails() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("backends.yaml"),
        "backends:\n  - id: cloud\n    kind: cloud\n    cloud: { endpoint: \"https://vision.example.com/v1/detect\" }\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("frame.rgb"), vec![90u8; 64 * 48 * 3]).unwrap();

    let output = hazardlens(
        dir.path(),
        &["analyze", "--image", "frame.rgb", "--width", "64", "--height", "48", "--connectivity", "offline"],
    );

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("no usable backend"));
    assert!(output.stdout.is_empty());
}

#[test]
fn test_analyze_rejects_frame_size_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("frame.rgb"), vec![90u8; 100]).unwrap();

    let output = hazardlens(
        dir.path(),
        &["analyze", "--image", "frame.rgb", "--width", "64", "--height", "48"],
    );

    assert!(!output.status.success());
    assert!(output.stdout.is_empty());
}

#[test]
fn test_analyze_rejects_unknown_connectivity() {
    let dir = tempfile::tempdir().unwrap();
    let output = hazardlens(
        dir.path(),
        &["analyze", "--image", "frame.rgb", "--width", "64", "--height", "48", "--connectivity", "excellent"],
    );

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("unrecognized value 'excellent'"));
}
