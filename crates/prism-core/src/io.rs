//! Filesystem helpers shared by the manifest store and the index builder.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use prism_schema::Signature;

/// Write `contents` to `path` via a temp file in the same directory and a rename.
///
/// Readers either see the previous file or the complete new one, never a
/// partially written file.
pub fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = tempfile::Builder::new()
        .prefix(".prism-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    tmp.write_all(contents)?;
    tmp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o644))?;
    }

    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Size and timestamps of a file, epoch seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub mtime: i64,
    pub ctime: i64,
    pub atime: i64,
}

impl FileStat {
    pub fn signature(&self) -> Signature {
        Signature {
            size: self.size,
            mtime: self.mtime,
        }
    }
}

#[cfg(unix)]
pub fn stat(path: &Path) -> io::Result<FileStat> {
    use std::os::unix::fs::MetadataExt;

    let meta = fs::metadata(path)?;
    Ok(FileStat {
        size: meta.len(),
        mtime: meta.mtime(),
        ctime: meta.ctime(),
        atime: meta.atime(),
    })
}

#[cfg(not(unix))]
pub fn stat(path: &Path) -> io::Result<FileStat> {
    fn secs(time: io::Result<std::time::SystemTime>) -> i64 {
        time.ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64)
    }

    let meta = fs::metadata(path)?;
    let mtime = secs(meta.modified());
    Ok(FileStat {
        size: meta.len(),
        mtime,
        ctime: meta.created().map_or(mtime, |t| secs(Ok(t))),
        atime: secs(meta.accessed()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_atomic_replaces_contents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");

        write_atomic(&path, b"{}").unwrap();
        write_atomic(&path, b"{\"a\":1}").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}");
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn write_atomic_creates_parent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("demo").join("index.html");
        write_atomic(&path, b"<html></html>").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn stat_reports_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("blob");
        fs::write(&path, vec![0u8; 1234]).unwrap();

        let st = stat(&path).unwrap();
        assert_eq!(st.size, 1234);
        assert_eq!(st.signature().size, 1234);
        assert!(st.mtime > 0);
    }
}
