//! Launch settings for the Cassandra process.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the engine is launched and where it keeps its files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Path to the `cassandra` launcher script
    pub executable: PathBuf,

    /// Whether the node joins the token ring on start
    #[serde(default)]
    pub join_ring: bool,

    /// Young generation size (`HEAP_NEWSIZE`)
    pub new_heap_size: String,

    /// Maximum heap size (`MAX_HEAP_SIZE`)
    pub heap_size: String,

    pub data_path: PathBuf,
    pub commit_path: PathBuf,
    pub backup_path: PathBuf,
    pub cache_path: PathBuf,

    /// JMX port nodetool talks to
    pub jmx_port: u16,

    /// Off-heap limit (`MAX_DIRECT_MEMORY`)
    pub max_direct_memory: String,
}

impl EngineConfig {
    /// Environment entries the launcher script expects, in addition to the
    /// agent's own environment
    pub fn env(&self) -> Vec<(String, String)> {
        vec![
            ("HEAP_NEWSIZE".to_string(), self.new_heap_size.clone()),
            ("MAX_HEAP_SIZE".to_string(), self.heap_size.clone()),
            ("DATA_DIR".to_string(), self.data_path.display().to_string()),
            ("COMMIT_LOG_DIR".to_string(), self.commit_path.display().to_string()),
            ("LOCAL_BACKUP_DIR".to_string(), self.backup_path.display().to_string()),
            ("CACHE_DIR".to_string(), self.cache_path.display().to_string()),
            ("JMX_PORT".to_string(), self.jmx_port.to_string()),
            ("MAX_DIRECT_MEMORY".to_string(), self.max_direct_memory.clone()),
            ("cassandra.join_ring".to_string(), self.join_ring.to_string()),
        ]
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("/usr/local/bin/cassandra"),
            join_ring: false,
            new_heap_size: "200M".to_string(),
            heap_size: "2G".to_string(),
            data_path: PathBuf::from("/usr/local/var/lib/cassandra/data"),
            commit_path: PathBuf::from("/usr/local/var/lib/cassandra/commitlog"),
            backup_path: PathBuf::from("/usr/local/var/lib/cassandra/backups"),
            cache_path: PathBuf::from("/usr/local/var/lib/cassandra/cache"),
            jmx_port: 7199,
            max_direct_memory: "1G".to_string(),
        }
    }
}
