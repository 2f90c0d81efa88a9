#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use prism_core::{IndexConfig, PackageIndex, TaskRunner};
use tempfile::TempDir;

/// Temporary index root with a thread pool index opened on it.
pub struct TestContext {
    pub temp_dir: TempDir,
    pub index: Arc<PackageIndex>,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let index = PackageIndex::open(IndexConfig::for_root(temp_dir.path()))
            .expect("failed to open index")
            .with_runner(TaskRunner::threads(4));
        Self {
            temp_dir,
            index: Arc::new(index),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn add_sdist(&self, name: &str, version: &str) -> PathBuf {
        write_sdist(self.root(), &format!("{name}-{version}.tar.gz"), name, version)
    }

    pub fn leaf_versions(&self, project: &str) -> Vec<String> {
        let records = self
            .index
            .builder()
            .read_leaf(project)
            .expect("failed to read leaf");
        records.into_iter().map(|r| r.version).collect()
    }

    pub fn home(&self) -> String {
        std::fs::read_to_string(self.root().join("index.html")).expect("failed to read home")
    }
}

/// Gzipped sdist at `<dir>/<file_name>` declaring `name` and `version`.
pub fn write_sdist(dir: &Path, file_name: &str, name: &str, version: &str) -> PathBuf {
    let path = dir.join(file_name);
    let file = File::create(&path).expect("failed to create archive");
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let pkg_info = format!("Metadata-Version: 1.0\nName: {name}\nVersion: {version}\n");
    let mut header = tar::Header::new_gnu();
    header.set_size(pkg_info.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(1_600_000_000);
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

pub fn write_corrupt(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, b"\x1f\x8bnot really gzip").expect("failed to write corrupt archive");
    path
}
