//! End-to-end tests for the `prism` binary.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tempfile::TempDir;

/// Temporary index root plus a scrubbed environment for the binary.
struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    fn prism_cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_prism"));
        cmd.arg("--root").arg(self.root());
        for var in [
            "PRISM_CONFIG",
            "PRISM_ROOT",
            "PRISM_POOL_KIND",
            "PRISM_POOL_WORKERS",
            "PRISM_SYNC_CACHE_DIR",
            "PIP_DOWNLOAD_CACHE",
        ] {
            cmd.env_remove(var);
        }
        cmd.env("RUST_LOG", "warn");
        cmd
    }

    fn run(&self, args: &[&str]) -> Output {
        self.prism_cmd()
            .args(args)
            .output()
            .expect("failed to run prism")
    }

    fn add_sdist(&self, name: &str, version: &str) -> PathBuf {
        write_sdist(self.root(), name, version)
    }

    fn manifest(&self) -> serde_json::Value {
        let bytes = std::fs::read(self.root().join("index.json")).expect("manifest missing");
        serde_json::from_slice(&bytes).expect("manifest is not JSON")
    }
}

fn write_sdist(dir: &Path, name: &str, version: &str) -> PathBuf {
    let path = dir.join(format!("{name}-{version}.tar.gz"));
    let file = File::create(&path).expect("failed to create archive");
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let pkg_info = format!("Metadata-Version: 1.0\nName: {name}\nVersion: {version}\n");
    let mut header = tar::Header::new_gnu();
    header.set_size(pkg_info.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{name}-{version}/PKG-INFO"), pkg_info.as_bytes())
        .expect("failed to append PKG-INFO");
    builder
        .into_inner()
        .and_then(flate2::write::GzEncoder::finish)
        .expect("failed to finish archive");
    path
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "prism failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
}

#[test]
fn test_help_command() {
    let ctx = TestContext::new();
    let output = ctx.run(&["--help"]);
    assert_success(&output);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Usage:"));
    assert!(!stdout.contains("worker"));
}

#[test]
fn test_update_writes_manifest_and_listings() {
    let ctx = TestContext::new();
    ctx.add_sdist("demo", "1.0");

    assert_success(&ctx.run(&["update"]));

    let manifest = ctx.manifest();
    let entries = manifest.as_object().expect("manifest is an object");
    assert_eq!(entries.len(), 1);
    let entry = entries.values().next().unwrap();
    assert_eq!(entry["name"], "demo");
    assert_eq!(entry["filename"], "demo-1.0.tar.gz");
    assert!(ctx.root().join("index.html").exists());
    assert!(ctx.root().join("demo").join("index.json").exists());
}

#[test]
fn test_process_pool_update() {
    let ctx = TestContext::new();
    ctx.add_sdist("demo", "1.0");
    ctx.add_sdist("other", "2.0");
    std::fs::write(ctx.root().join("broken-1.0.tar.gz"), b"garbage").unwrap();

    let output = ctx
        .prism_cmd()
        .env("PRISM_POOL_KIND", "process")
        .env("PRISM_POOL_WORKERS", "2")
        .arg("update")
        .output()
        .expect("failed to run prism");
    assert_success(&output);

    assert_eq!(ctx.manifest().as_object().unwrap().len(), 2);
    assert!(ctx.root().join("_errors").join("broken-1.0.tar.gz").exists());
}

#[test]
fn test_rebuild_prunes_vanished_project() {
    let ctx = TestContext::new();
    ctx.add_sdist("demo", "1.0");
    let gone = ctx.add_sdist("gone", "1.0");
    assert_success(&ctx.run(&["update"]));

    std::fs::remove_file(gone).unwrap();
    assert_success(&ctx.run(&["rebuild"]));

    assert_eq!(ctx.manifest().as_object().unwrap().len(), 1);
    assert!(!ctx.root().join("gone").join("index.json").exists());
}

#[test]
fn test_sync_from_cache() {
    let ctx = TestContext::new();
    let cache = TempDir::new().unwrap();
    write_sdist(cache.path(), "cached", "0.3");

    let output = ctx
        .prism_cmd()
        .env("PIP_DOWNLOAD_CACHE", cache.path())
        .arg("sync")
        .output()
        .expect("failed to run prism");
    assert_success(&output);
    assert!(ctx.root().join("cached-0.3.tar.gz").exists());
    assert_eq!(ctx.manifest().as_object().unwrap().len(), 1);
}

#[test]
fn test_sync_without_source_fails() {
    let ctx = TestContext::new();
    let output = ctx.run(&["sync"]);
    assert!(!output.status.success());
}

#[test]
fn test_inspect_prints_json() {
    let ctx = TestContext::new();
    let path = ctx.add_sdist("demo", "1.0");

    let output = ctx.run(&["inspect", path.to_str().unwrap()]);
    assert_success(&output);
    let line: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(line["name"], "demo");
    assert_eq!(line["version"], "1.0");
    assert_eq!(line["format"], "sdist");
    assert_eq!(line["hash"].as_str().unwrap().len(), 64);
    assert!(path.exists());
}

#[test]
fn test_inspect_reports_bad_archive() {
    let ctx = TestContext::new();
    let path = ctx.root().join("notes.txt");
    std::fs::write(&path, "hello").unwrap();

    let output = ctx.run(&["inspect", path.to_str().unwrap()]);
    assert!(!output.status.success());
    let line: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert!(line["error"].as_str().unwrap().contains("Unsupported"));
}

#[test]
fn test_worker_rejects_unknown_kind() {
    let ctx = TestContext::new();
    let output = ctx.run(&["worker", "compile"]);
    assert!(!output.status.success());
}
