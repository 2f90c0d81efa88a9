//! Archive inspection
//!
//! Classifies package archives by suffix, reads `PKG-INFO` out of source
//! distributions (gzip/bzip2 tarballs or zip files) and legacy `.egg`
//! bundles, and hashes archive bytes for deduplication.

use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

use prism_schema::{ContentHash, FormatTag, PackageMeta};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};
use zip::ZipArchive;

use crate::error::InspectError;
use crate::pool::{Task, TaskError};

const PKG_INFO: &str = "PKG-INFO";
const EGG_PKG_INFO: &str = "EGG-INFO/PKG-INFO";

/// Container encoding, finer grained than [`FormatTag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    TarGz,
    TarBz2,
    Zip,
    Egg,
}

impl Container {
    fn detect(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".egg") {
            Some(Self::Egg)
        } else if name.ends_with(".gz") || name.ends_with(".tgz") {
            Some(Self::TarGz)
        } else if name.ends_with(".bz2") {
            Some(Self::TarBz2)
        } else if name.ends_with(".zip") {
            Some(Self::Zip)
        } else {
            None
        }
    }
}

/// Classify an archive by its file name suffix.
///
/// # Errors
///
/// Returns [`InspectError::UnsupportedFormat`] if the suffix is not recognized.
pub fn classify(path: &Path) -> Result<FormatTag, InspectError> {
    path.file_name()
        .and_then(|n| FormatTag::from_file_name(&n.to_string_lossy()))
        .ok_or_else(|| InspectError::UnsupportedFormat(path.to_path_buf()))
}

/// Whether `path` has a recognized archive suffix.
pub fn is_archive(path: &Path) -> bool {
    classify(path).is_ok()
}

/// Read the project name and version out of an archive.
///
/// # Errors
///
/// Returns [`InspectError::UnsupportedFormat`] for unknown suffixes and
/// [`InspectError::CorruptArchive`] when the archive cannot be read or has
/// no usable `PKG-INFO`.
pub fn extract(path: &Path) -> Result<PackageMeta, InspectError> {
    let container =
        Container::detect(path).ok_or_else(|| InspectError::UnsupportedFormat(path.to_path_buf()))?;

    let file = File::open(path).map_err(|e| InspectError::corrupt(path, e))?;
    let pkg_info = match container {
        Container::TarGz => {
            read_tar_pkg_info(flate2::read::GzDecoder::new(BufReader::new(file)))
        }
        Container::TarBz2 => {
            read_tar_pkg_info(bzip2::read::BzDecoder::new(BufReader::new(file)))
        }
        Container::Zip => read_zip_pkg_info(file, false),
        Container::Egg => read_zip_pkg_info(file, true),
    }
    .map_err(|reason| InspectError::corrupt(path, reason))?;

    let meta = parse_pkg_info(&pkg_info)
        .ok_or_else(|| InspectError::corrupt(path, "PKG-INFO lacks Name or Version"))?;
    if !is_usable_project_name(&meta.name) {
        return Err(InspectError::corrupt(
            path,
            format!("project name '{}' cannot name a listing directory", meta.name),
        ));
    }
    debug!(path = %path.display(), name = %meta.name, version = %meta.version, "Extracted metadata");
    Ok(meta)
}

/// A project name doubles as a directory under the root.
fn is_usable_project_name(name: &str) -> bool {
    !matches!(name, "." | "..") && !name.contains(['/', '\\', '\0'])
}

/// Hash the archive's bytes.
///
/// # Errors
///
/// Returns an I/O error if the file cannot be read.
pub fn content_hash(path: &Path) -> Result<ContentHash, InspectError> {
    Ok(ContentHash::compute_file(path)?)
}

/// Find the shallowest `PKG-INFO` member of a tar stream.
fn read_tar_pkg_info<R: Read>(reader: R) -> Result<String, String> {
    let mut archive = tar::Archive::new(reader);
    let mut best: Option<(usize, String)> = None;

    for entry in archive.entries().map_err(|e| e.to_string())? {
        let mut entry = entry.map_err(|e| e.to_string())?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_path = entry.path().map_err(|e| e.to_string())?.into_owned();
        if entry_path.file_name().is_none_or(|n| n != PKG_INFO) {
            continue;
        }
        let depth = entry_path.components().count();
        if best.as_ref().is_some_and(|(d, _)| *d <= depth) {
            continue;
        }
        let mut raw = Vec::new();
        entry.read_to_end(&mut raw).map_err(|e| e.to_string())?;
        best = Some((depth, String::from_utf8_lossy(&raw).into_owned()));
    }

    best.map(|(_, text)| text)
        .ok_or_else(|| "no PKG-INFO found in archive".to_string())
}

/// Read `PKG-INFO` from a zip sdist, or `EGG-INFO/PKG-INFO` from an egg.
fn read_zip_pkg_info(file: File, egg: bool) -> Result<String, String> {
    let mut archive = ZipArchive::new(BufReader::new(file)).map_err(|e| e.to_string())?;

    let index = if egg {
        archive.index_for_name(EGG_PKG_INFO)
    } else {
        (0..archive.len())
            .filter_map(|i| {
                let member = archive.by_index(i).ok()?;
                let name = member.enclosed_name()?;
                (!member.is_dir() && name.file_name().is_some_and(|n| n == PKG_INFO))
                    .then(|| (name.components().count(), i))
            })
            .min()
            .map(|(_, i)| i)
    };
    let index = index.ok_or_else(|| "no PKG-INFO found in archive".to_string())?;

    let mut member = archive.by_index(index).map_err(|e| e.to_string())?;
    let mut raw = Vec::new();
    member.read_to_end(&mut raw).map_err(|e| e.to_string())?;
    Ok(String::from_utf8_lossy(&raw).into_owned())
}

/// Parse the RFC 822 style header block of a `PKG-INFO` file.
///
/// Only the headers before the first blank line are considered; the body
/// (long description) may contain lines that look like headers.
pub fn parse_pkg_info(text: &str) -> Option<PackageMeta> {
    let mut name = None;
    let mut version = None;

    for line in text.lines() {
        if line.trim().is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if key.eq_ignore_ascii_case("name") && name.is_none() {
            name = Some(value.to_string());
        } else if key.eq_ignore_ascii_case("version") && version.is_none() {
            version = Some(value.to_string());
        }
    }

    match (name, version) {
        (Some(name), Some(version)) if !name.is_empty() && !version.is_empty() => {
            Some(PackageMeta { name, version })
        }
        _ => None,
    }
}

/// Error handler that moves failed archives out of the index root.
#[derive(Debug, Clone)]
pub struct Quarantine {
    dir: PathBuf,
}

impl Quarantine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Move `path` into the quarantine folder, returning its new location.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the folder cannot be created or the rename fails.
    pub fn relocate(&self, path: &Path, cause: &InspectError) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let file_name = path
            .file_name()
            .ok_or_else(|| std::io::Error::other(format!("no file name in {}", path.display())))?;
        let target = self.dir.join(file_name);
        fs::rename(path, &target)?;
        error!(
            path = %path.display(),
            quarantine = %target.display(),
            error = %cause,
            "Archive failed inspection, moved to quarantine"
        );
        Ok(target)
    }
}

/// Archive reader with an optional quarantine policy.
///
/// Without a quarantine, [`Inspector::inspect`] hands back the raw error.
/// With one, unsupported and corrupt archives are relocated and reported
/// as `Ok(None)` so a batch can carry on.
#[derive(Debug, Clone, Default)]
pub struct Inspector {
    quarantine: Option<Quarantine>,
    reserved: Vec<String>,
}

impl Inspector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quarantine(quarantine: Quarantine) -> Self {
        Self {
            quarantine: Some(quarantine),
            reserved: Vec::new(),
        }
    }

    /// Treat archives declaring one of `names` as corrupt. The index
    /// root keeps its own files under these names.
    pub fn with_reserved(mut self, names: Vec<String>) -> Self {
        self.reserved = names;
        self
    }

    pub fn quarantine(&self) -> Option<&Quarantine> {
        self.quarantine.as_ref()
    }

    /// # Errors
    ///
    /// Returns the inspection error when no quarantine is bound, or when
    /// relocating the archive itself fails.
    pub fn inspect(&self, path: &Path) -> Result<Option<PackageMeta>, InspectError> {
        let extracted = classify(path)
            .and_then(|_| extract(path))
            .and_then(|meta| self.check_reserved(path, meta));
        match extracted {
            Ok(meta) => Ok(Some(meta)),
            Err(err) if err.is_quarantinable() => match &self.quarantine {
                Some(quarantine) => {
                    quarantine.relocate(path, &err)?;
                    Ok(None)
                }
                None => Err(err),
            },
            Err(err) => Err(err),
        }
    }

    fn check_reserved(&self, path: &Path, meta: PackageMeta) -> Result<PackageMeta, InspectError> {
        if self.reserved.iter().any(|r| r == &meta.name) {
            return Err(InspectError::corrupt(
                path,
                format!("project name '{}' is reserved by the index", meta.name),
            ));
        }
        Ok(meta)
    }
}

/// What happened to one archive in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum InspectOutcome {
    /// The hash was already known; metadata was not re-read.
    Known,
    Extracted { meta: PackageMeta },
    Quarantined,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inspected {
    pub path: PathBuf,
    pub hash: ContentHash,
    pub outcome: InspectOutcome,
}

impl Inspected {
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn meta(&self) -> Option<&PackageMeta> {
        match &self.outcome {
            InspectOutcome::Extracted { meta } => Some(meta),
            InspectOutcome::Known | InspectOutcome::Quarantined => None,
        }
    }
}

/// Unit of work for the pool: hash one archive and extract its metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectTask {
    pub path: PathBuf,
    /// Quarantine folder; `None` surfaces failures as task errors.
    pub quarantine: Option<PathBuf>,
    /// Project names the index cannot list.
    #[serde(default)]
    pub reserved: Vec<String>,
    /// Hash computed by an earlier pass, reused instead of re-reading.
    #[serde(default)]
    pub hash: Option<ContentHash>,
}

impl InspectTask {
    pub fn new(path: PathBuf, quarantine: Option<PathBuf>) -> Self {
        Self {
            path,
            quarantine,
            reserved: Vec::new(),
            hash: None,
        }
    }

    pub fn with_reserved(mut self, reserved: Vec<String>) -> Self {
        self.reserved = reserved;
        self
    }

    pub fn with_hash(mut self, hash: ContentHash) -> Self {
        self.hash = Some(hash);
        self
    }
}

impl Task for InspectTask {
    const KIND: &'static str = "inspect";
    type Output = Inspected;

    fn run(self) -> Result<Inspected, TaskError> {
        let hash = match self.hash {
            Some(hash) => hash,
            None => content_hash(&self.path).map_err(TaskError::failed)?,
        };

        let inspector = match self.quarantine {
            Some(dir) => Inspector::with_quarantine(Quarantine::new(dir)),
            None => Inspector::new(),
        }
        .with_reserved(self.reserved);
        let outcome = match inspector.inspect(&self.path).map_err(TaskError::failed)? {
            Some(meta) => InspectOutcome::Extracted { meta },
            None => InspectOutcome::Quarantined,
        };
        Ok(Inspected {
            path: self.path,
            hash,
            outcome,
        })
    }
}

/// Unit of work for the pool: hash one file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HashTask {
    pub path: PathBuf,
}

impl Task for HashTask {
    const KIND: &'static str = "hash";
    type Output = (PathBuf, ContentHash);

    fn run(self) -> Result<Self::Output, TaskError> {
        let hash = content_hash(&self.path).map_err(TaskError::failed)?;
        Ok((self.path, hash))
    }
}
