//! Backup manifest.
//!
//! A manifest fully describes one node backup and is the only artifact needed
//! to restore it. It is stored as `manifest.json` next to the uploaded table
//! directories:
//!
//! ```text
//! <prefix>/<cluster>/<host id>/<name>/manifest.json
//! <prefix>/<cluster>/<host id>/<name>/<keyspace>/<table>/<sstable files>
//! ```

pub mod builder;

pub use builder::ManifestBuilder;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// File name of the serialized manifest inside a backup's directory
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Backup name, usually a `YYYYMMDDhhmmss` timestamp
    pub name: String,

    /// Remote location of the backup directory (relative to the store root)
    pub path: String,

    #[serde(default)]
    pub cluster_name: String,

    #[serde(default)]
    pub hosts: Vec<String>,

    #[serde(default)]
    pub compression: String,

    #[serde(default)]
    pub keyspaces: Vec<String>,

    /// Local snapshot directories discovered at creation time
    #[serde(skip)]
    pub directories: Vec<PathBuf>,

    /// `<keyspace>/<table>` of each entry in `directories`
    #[serde(skip)]
    pub tables: Vec<String>,

    /// Table directories relative to `path`, one per entry in `directories`
    #[serde(default)]
    pub paths: Vec<String>,
}

impl Manifest {
    pub fn new(name: &str, path: &str) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_string(),
            compression: "none".to_string(),
            ..Self::default()
        }
    }

    /// Remote key of this manifest's `manifest.json`
    pub fn location(&self) -> String {
        join_remote(&[&self.path, MANIFEST_FILE])
    }

    pub fn to_json(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_json(data: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(data)?)
    }
}

/// `<prefix>/<cluster>/<host id>/<name>` with spaces in the cluster name
/// replaced by `_-_`
pub fn backup_path(prefix: &str, cluster_name: &str, host_id: &str, name: &str) -> String {
    join_remote(&[prefix, &cluster_name.replace(' ', "_-_"), host_id, name])
}

/// Join remote key segments with `/`, dropping empty segments and stray slashes
pub fn join_remote(parts: &[&str]) -> String {
    parts
        .iter()
        .flat_map(|part| part.split('/'))
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Parent directory of a remote key (`""` for top-level keys)
pub fn remote_parent(key: &str) -> String {
    let key = join_remote(&[key]);
    match key.rsplit_once('/') {
        Some((parent, _)) => parent.to_string(),
        None => String::new(),
    }
}
