//! Shallow directory listing over the Cassandra data tree.
//!
//! The data directory is laid out as `<root>/<keyspace>/<table>/...`; every
//! operation here looks exactly one level deep and returns entries sorted by
//! name so manifests and transfers are built in a stable order.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// A regular file discovered in a directory
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Full path to the file
    pub path: PathBuf,

    /// File name within its directory
    pub name: String,

    /// File size in bytes
    pub size: u64,
}

fn immediate_children(dir: &Path) -> WalkDir {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
}

/// List the immediate subdirectories of `dir`
pub fn list_subdirectories(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();

    for entry in immediate_children(dir) {
        let entry = entry?;
        if entry.file_type().is_dir() {
            dirs.push(entry.into_path());
        }
    }

    Ok(dirs)
}

/// List the regular files directly inside `dir` (subdirectories are not descended)
pub fn list_files(dir: &Path) -> io::Result<Vec<FileInfo>> {
    let mut files = Vec::new();

    for entry in immediate_children(dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let size = entry.metadata()?.len();
        files.push(FileInfo {
            name: entry.file_name().to_string_lossy().into_owned(),
            path: entry.into_path(),
            size,
        });
    }

    Ok(files)
}

/// Remove every entry beneath `dir`, leaving `dir` itself in place.
///
/// Stops at the first failure; entries removed before it stay removed.
pub fn clear_directory(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();

    for entry in immediate_children(dir) {
        let entry = entry?;
        let path = entry.into_path();
        tracing::debug!("Removing {}", path.display());

        let meta = fs::symlink_metadata(&path)?;
        if meta.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed.push(path);
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_list_empty_directory() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        assert!(list_subdirectories(temp_dir.path())?.is_empty());
        assert!(list_files(temp_dir.path())?.is_empty());
        Ok(())
    }

    #[test]
    fn test_subdirectories_sorted_and_files_excluded() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("zeta"))?;
        fs::create_dir(temp_dir.path().join("alpha"))?;
        fs::write(temp_dir.path().join("readme.txt"), b"not a keyspace")?;

        let dirs = list_subdirectories(temp_dir.path())?;
        let names: Vec<_> = dirs
            .iter()
            .map(|d| d.file_name().unwrap().to_str().unwrap())
            .collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
        Ok(())
    }

    #[test]
    fn test_list_files_is_shallow() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        fs::write(temp_dir.path().join("a-Data.db"), b"12345")?;
        fs::create_dir(temp_dir.path().join("nested"))?;
        fs::write(temp_dir.path().join("nested/b-Data.db"), b"ignored")?;

        let files = list_files(temp_dir.path())?;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].name, "a-Data.db");
        assert_eq!(files[0].size, 5);
        Ok(())
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let temp_dir = TempDir::new().unwrap();
        assert!(list_subdirectories(&temp_dir.path().join("missing")).is_err());
    }

    #[test]
    fn test_clear_directory_keeps_root() -> io::Result<()> {
        let temp_dir = TempDir::new()?;
        let table = temp_dir.path().join("t1");
        fs::create_dir_all(table.join("snapshots/2024"))?;
        fs::write(table.join("snapshots/2024/a-Data.db"), b"x")?;
        fs::write(temp_dir.path().join("loose.db"), b"y")?;

        let removed = clear_directory(temp_dir.path())?;
        assert_eq!(removed.len(), 2);
        assert!(temp_dir.path().exists());
        assert!(fs::read_dir(temp_dir.path())?.next().is_none());
        Ok(())
    }
}
