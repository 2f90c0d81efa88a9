//! Fixture archives for unit tests.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use zip::write::SimpleFileOptions;

fn pkg_info(name: &str, version: &str) -> String {
    format!("Metadata-Version: 1.1\nName: {name}\nVersion: {version}\nSummary: test fixture\n\nName: body-not-header\n")
}

fn append_tar<W: Write>(builder: &mut tar::Builder<W>, path: &str, data: &[u8]) {
    let mut header = tar::Header::new_gnu();
    header.set_size(data.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(1_600_000_000);
    header.set_cksum();
    builder.append_data(&mut header, path, data).unwrap();
}

fn write_sdist_tar<W: Write>(writer: W, name: &str, version: &str) -> W {
    let top = format!("{name}-{version}");
    let mut builder = tar::Builder::new(writer);
    append_tar(&mut builder, &format!("{top}/setup.py"), b"from setuptools import setup\n");
    append_tar(
        &mut builder,
        &format!("{top}/{name}.egg-info/PKG-INFO"),
        pkg_info(name, "0.0.0-nested").as_bytes(),
    );
    append_tar(&mut builder, &format!("{top}/PKG-INFO"), pkg_info(name, version).as_bytes());
    builder.into_inner().unwrap()
}

/// `<dir>/<name>-<version>.tar.gz`
pub(crate) fn write_sdist_gz(dir: &Path, name: &str, version: &str) -> PathBuf {
    let path = dir.join(format!("{name}-{version}.tar.gz"));
    let encoder = flate2::write::GzEncoder::new(File::create(&path).unwrap(), flate2::Compression::default());
    write_sdist_tar(encoder, name, version).finish().unwrap();
    path
}

/// Gzipped sdist at `<dir>/<file_name>` whose `PKG-INFO` declares `name`,
/// which need not be usable as a path.
pub(crate) fn write_sdist_named(dir: &Path, file_name: &str, name: &str, version: &str) -> PathBuf {
    let path = dir.join(file_name);
    let encoder = flate2::write::GzEncoder::new(File::create(&path).unwrap(), flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    append_tar(&mut builder, "pkg/PKG-INFO", pkg_info(name, version).as_bytes());
    builder.into_inner().unwrap().finish().unwrap();
    path
}

/// `<dir>/<name>-<version>.tar.bz2`
pub(crate) fn write_sdist_bz2(dir: &Path, name: &str, version: &str) -> PathBuf {
    let path = dir.join(format!("{name}-{version}.tar.bz2"));
    let encoder = bzip2::write::BzEncoder::new(File::create(&path).unwrap(), bzip2::Compression::default());
    write_sdist_tar(encoder, name, version).finish().unwrap();
    path
}

/// `<dir>/<name>-<version>.zip`
pub(crate) fn write_sdist_zip(dir: &Path, name: &str, version: &str) -> PathBuf {
    let path = dir.join(format!("{name}-{version}.zip"));
    let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
    let opts = SimpleFileOptions::default();
    zip.start_file(format!("{name}-{version}/setup.py"), opts).unwrap();
    zip.write_all(b"from setuptools import setup\n").unwrap();
    zip.start_file(format!("{name}-{version}/PKG-INFO"), opts).unwrap();
    zip.write_all(pkg_info(name, version).as_bytes()).unwrap();
    zip.finish().unwrap();
    path
}

/// `<dir>/<name>-<version>-py3.egg`
pub(crate) fn write_egg(dir: &Path, name: &str, version: &str) -> PathBuf {
    let path = dir.join(format!("{name}-{version}-py3.egg"));
    let mut zip = zip::ZipWriter::new(File::create(&path).unwrap());
    let opts = SimpleFileOptions::default();
    zip.start_file(format!("{name}/__init__.py"), opts).unwrap();
    zip.write_all(b"").unwrap();
    zip.start_file("EGG-INFO/PKG-INFO", opts).unwrap();
    zip.write_all(pkg_info(name, version).as_bytes()).unwrap();
    zip.finish().unwrap();
    path
}

/// A file with an archive suffix but garbage content.
pub(crate) fn write_corrupt(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, b"this is not an archive").unwrap();
    path
}
