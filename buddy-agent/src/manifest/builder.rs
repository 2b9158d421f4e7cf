//! Discovers the snapshot directories that make up a backup.

use super::Manifest;
use crate::fs::list_subdirectories;
use crate::Result;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use tracing::debug;

/// Walks `<data_root>/<keyspace>/<table>/snapshots/<name>` and records every
/// snapshot directory that is not skip-listed.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    skipped_keyspaces: Vec<String>,
    /// keyspace → substrings; a table whose name contains one is skipped
    skipped_tables: HashMap<String, Vec<String>>,
}

impl Default for ManifestBuilder {
    fn default() -> Self {
        let mut skipped_tables = HashMap::new();
        skipped_tables.insert(
            "system".to_string(),
            vec![
                "local".to_string(),
                "peers".to_string(),
                "LocationInfo".to_string(),
            ],
        );

        Self {
            skipped_keyspaces: vec!["OpsCenter".to_string()],
            skipped_tables,
        }
    }
}

impl ManifestBuilder {
    pub fn new(
        skipped_keyspaces: Vec<String>,
        skipped_tables: HashMap<String, Vec<String>>,
    ) -> Self {
        Self {
            skipped_keyspaces,
            skipped_tables,
        }
    }

    fn skips_keyspace(&self, keyspace: &str) -> bool {
        self.skipped_keyspaces.iter().any(|k| k == keyspace)
    }

    fn skips_table(&self, keyspace: &str, table: &str) -> bool {
        self.skipped_tables
            .get(keyspace)
            .is_some_and(|patterns| patterns.iter().any(|p| table.contains(p.as_str())))
    }

    /// Build the manifest for snapshot `name`, to be stored at `remote_path`.
    ///
    /// Keyspaces and tables are visited in name order. Every keyspace is
    /// listed in `keyspaces`, skip-listed ones included. `paths` is left empty;
    /// it is filled in as the directories are uploaded.
    pub fn build(&self, data_root: &Path, name: &str, remote_path: &str) -> Result<Manifest> {
        let mut manifest = Manifest::new(name, remote_path);

        for keyspace_dir in list_subdirectories(data_root)? {
            let keyspace = dir_name(&keyspace_dir);
            manifest.keyspaces.push(keyspace.clone());
            if self.skips_keyspace(&keyspace) {
                debug!("Skipping keyspace {}", keyspace);
                continue;
            }

            for table_dir in list_subdirectories(&keyspace_dir)? {
                let table = dir_name(&table_dir);
                if self.skips_table(&keyspace, &table) {
                    debug!("Skipping table {}/{}", keyspace, table);
                    continue;
                }

                let snapshot_dir = table_dir.join("snapshots").join(name);
                if !is_existing_dir(&snapshot_dir)? {
                    continue;
                }

                manifest.directories.push(snapshot_dir);
                manifest.tables.push(format!("{}/{}", keyspace, table));
            }
        }

        debug!(
            "Manifest {} covers {} keyspaces, {} directories",
            name,
            manifest.keyspaces.len(),
            manifest.directories.len()
        );
        Ok(manifest)
    }
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn is_existing_dir(path: &Path) -> io::Result<bool> {
    match fs::metadata(path) {
        Ok(meta) => Ok(meta.is_dir()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}
