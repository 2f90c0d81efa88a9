use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::btree_map;

use crate::hash::ContentHash;

/// File suffixes recognized as package archives, matched case-insensitively.
pub const RECOGNIZED_EXTENSIONS: [&str; 5] = [".egg", ".gz", ".bz2", ".tgz", ".zip"];

/// Archive family, decided purely from the file suffix.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FormatTag {
    /// Source distribution: `.gz`, `.tgz`, `.bz2` or `.zip`.
    Sdist,
    /// Legacy binary bundle: `.egg`.
    LegacyBundle,
}

impl FormatTag {
    /// Classify a file name by suffix.
    ///
    /// Returns `None` when the suffix is not one of [`RECOGNIZED_EXTENSIONS`].
    pub fn from_file_name(name: &str) -> Option<Self> {
        let lower = name.to_ascii_lowercase();
        if lower.ends_with(".egg") {
            Some(Self::LegacyBundle)
        } else if [".gz", ".tgz", ".bz2", ".zip"]
            .iter()
            .any(|ext| lower.ends_with(ext))
        {
            Some(Self::Sdist)
        } else {
            None
        }
    }
}

impl std::fmt::Display for FormatTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sdist => write!(f, "sdist"),
            Self::LegacyBundle => write!(f, "legacy-bundle"),
        }
    }
}

/// Name and version extracted from an archive's metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PackageMeta {
    /// Project name as declared by the archive (e.g. "demo").
    pub name: String,
    /// Version string as declared by the archive (e.g. "1.0").
    pub version: String,
}

/// One manifest value: an immutable record created once per distinct hash.
///
/// The hash itself is the manifest key and is not repeated here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageEntry {
    /// Project name.
    pub name: String,
    /// Version string.
    pub version: String,
    /// File name of the archive directly under the index root.
    pub filename: String,
    /// UNIX epoch seconds at which the entry was first recorded.
    pub added: i64,
}

impl PackageEntry {
    /// Build an entry for `filename` from extracted metadata.
    pub fn new(meta: PackageMeta, filename: impl Into<String>, added: i64) -> Self {
        Self {
            name: meta.name,
            version: meta.version,
            filename: filename.into(),
            added,
        }
    }
}

/// Persisted mapping of content hash to [`PackageEntry`].
///
/// Serialized as a JSON object keyed by lowercase hex hash. Keys are kept
/// sorted so that persisting an unchanged manifest is byte-identical.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Manifest {
    entries: BTreeMap<ContentHash, PackageEntry>,
}

impl Manifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `hash` already has an entry.
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.entries.contains_key(hash)
    }

    /// Look up the entry recorded for `hash`.
    pub fn get(&self, hash: &ContentHash) -> Option<&PackageEntry> {
        self.entries.get(hash)
    }

    /// Insert an entry only if `hash` is not yet present.
    ///
    /// Existing entries are never overwritten. Returns `true` when the entry
    /// was added.
    pub fn insert_new(&mut self, hash: ContentHash, entry: PackageEntry) -> bool {
        match self.entries.entry(hash) {
            btree_map::Entry::Occupied(_) => false,
            btree_map::Entry::Vacant(slot) => {
                slot.insert(entry);
                true
            }
        }
    }

    /// Number of entries (distinct hashes).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the manifest has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct project names across all entries.
    pub fn project_count(&self) -> usize {
        self.entries
            .values()
            .map(|e| e.name.as_str())
            .collect::<std::collections::BTreeSet<_>>()
            .len()
    }

    /// Iterate over `(hash, entry)` pairs in hash order.
    pub fn iter(&self) -> btree_map::Iter<'_, ContentHash, PackageEntry> {
        self.entries.iter()
    }

    /// All recorded hashes.
    pub fn hashes(&self) -> impl Iterator<Item = &ContentHash> {
        self.entries.keys()
    }
}

impl<'a> IntoIterator for &'a Manifest {
    type Item = (&'a ContentHash, &'a PackageEntry);
    type IntoIter = btree_map::Iter<'a, ContentHash, PackageEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// One row of a per-project leaf listing (`<root>/<project>/index.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LeafRecord {
    /// Archive file name.
    pub filename: String,
    /// Project name.
    pub name: String,
    /// Version string.
    pub version: String,
    /// Modification time, epoch seconds.
    pub mtime: i64,
    /// Status change time, epoch seconds.
    pub ctime: i64,
    /// Access time, epoch seconds.
    pub atime: i64,
    /// Archive size in bytes. Absent in listings written by older tools.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl LeafRecord {
    /// The stat signature recorded by this row, if it carries a size.
    pub fn signature(&self) -> Option<Signature> {
        self.size.map(|size| Signature {
            size,
            mtime: self.mtime,
        })
    }
}

/// Cheap file identity used for drift detection: size plus mtime seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Signature {
    /// File size in bytes.
    pub size: u64,
    /// Modification time, epoch seconds.
    pub mtime: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(c: char) -> ContentHash {
        ContentHash::parse(&c.to_string().repeat(64)).unwrap()
    }

    fn entry(name: &str, version: &str) -> PackageEntry {
        PackageEntry {
            name: name.to_string(),
            version: version.to_string(),
            filename: format!("{name}-{version}.tar.gz"),
            added: 1_700_000_000,
        }
    }

    #[test]
    fn classify_suffixes() {
        assert_eq!(
            FormatTag::from_file_name("demo-1.0.tar.gz"),
            Some(FormatTag::Sdist)
        );
        assert_eq!(FormatTag::from_file_name("demo-1.0.TGZ"), Some(FormatTag::Sdist));
        assert_eq!(FormatTag::from_file_name("demo-1.0.tar.bz2"), Some(FormatTag::Sdist));
        assert_eq!(FormatTag::from_file_name("demo-1.0.zip"), Some(FormatTag::Sdist));
        assert_eq!(
            FormatTag::from_file_name("demo-1.0-py2.7.egg"),
            Some(FormatTag::LegacyBundle)
        );
        assert_eq!(FormatTag::from_file_name("demo-1.0.whl"), None);
        assert_eq!(FormatTag::from_file_name("index.json"), None);
    }

    #[test]
    fn insert_new_never_overwrites() {
        let mut manifest = Manifest::new();
        assert!(manifest.insert_new(hash('a'), entry("demo", "1.0")));
        assert!(!manifest.insert_new(hash('a'), entry("other", "9.9")));
        assert_eq!(manifest.len(), 1);
        assert_eq!(manifest.get(&hash('a')).unwrap().name, "demo");
    }

    #[test]
    fn manifest_json_shape() {
        let mut manifest = Manifest::new();
        manifest.insert_new(hash('b'), entry("demo", "2.0"));
        manifest.insert_new(hash('a'), entry("demo", "1.0"));

        let json = serde_json::to_value(&manifest).unwrap();
        let obj = json.as_object().unwrap();
        assert_eq!(obj.len(), 2);
        let first = &obj[&"a".repeat(64)];
        assert_eq!(first["name"], "demo");
        assert_eq!(first["version"], "1.0");
        assert_eq!(first["filename"], "demo-1.0.tar.gz");
        assert_eq!(first["added"], 1_700_000_000);
        assert_eq!(manifest.project_count(), 1);
    }

    #[test]
    fn leaf_record_without_size_has_no_signature() {
        let json = r#"{"filename":"demo-1.0.tar.gz","name":"demo","version":"1.0","mtime":5,"ctime":5,"atime":5}"#;
        let record: LeafRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.signature(), None);

        let sized = LeafRecord {
            size: Some(42),
            ..record
        };
        assert_eq!(sized.signature(), Some(Signature { size: 42, mtime: 5 }));
    }
}
