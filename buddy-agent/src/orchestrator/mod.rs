//! Create and restore workflows for the local node.
//!
//! The orchestrator is the only component that sequences the engine, the
//! admin tool and the transfer engine. At most one workflow runs at a time;
//! a second request fails fast with `Busy` instead of queueing.

pub mod readiness;

pub use readiness::{poll_until, ReadinessPolicy};

use crate::engine::Engine;
use crate::manifest::{backup_path, join_remote, ManifestBuilder, MANIFEST_FILE};
use crate::nodetool::{AdminTool, ClusterInfo, NodeInfo};
use crate::transfer::{format_bytes, TransferEngine};
use crate::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Local timestamp layout used for snapshot names
const NAME_FORMAT: &str = "%Y%m%d%H%M%S";

/// Who the local node is, learned during startup
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub node: NodeInfo,
    pub cluster: ClusterInfo,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Key prefix all backups live under
    pub remote_prefix: String,
    pub readiness: ReadinessPolicy,
    pub clear_snapshot_after_upload: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateRequest {
    /// Snapshot name; a timestamp is generated when absent
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateReply {
    pub name: String,
    /// Remote directory holding the backup and its manifest
    pub path: String,
    pub size: u64,
    pub files_uploaded: usize,
    pub files_failed: usize,
    pub keyspaces: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestoreRequest {
    /// Backup name of this node, resolved under the configured prefix
    #[serde(default)]
    pub name: Option<String>,

    /// Full manifest key; takes precedence over `name`
    #[serde(default)]
    pub path: Option<String>,

    /// Keyspaces to wipe before restoring; empty means all of them
    #[serde(default)]
    pub keyspaces: Vec<String>,

    #[serde(default)]
    pub tables: Vec<String>,
}

/// Where a restore reads its manifest from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreSource<'a> {
    Path(&'a str),
    Name(&'a str),
}

impl RestoreRequest {
    pub fn validate(&self) -> Result<()> {
        self.source().map(|_| ())
    }

    pub fn source(&self) -> Result<RestoreSource<'_>> {
        match (non_empty(&self.path), non_empty(&self.name)) {
            (Some(path), _) => Ok(RestoreSource::Path(path)),
            (None, Some(name)) => {
                validate_name(name)?;
                Ok(RestoreSource::Name(name))
            }
            (None, None) => Err(AgentError::Validation(
                "restore requires a backup name or a manifest path".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RestoreReply {
    pub name: String,
    pub manifest_path: String,
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Snapshot of what the agent is doing, for health reporting
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub busy: bool,
    /// `None` while a workflow holds the engine
    pub engine_running: Option<bool>,
    pub node_id: Option<String>,
    pub cluster_name: Option<String>,
}

pub struct SnapshotOrchestrator {
    engine: Mutex<Box<dyn Engine>>,
    admin: Arc<dyn AdminTool>,
    transfer: TransferEngine,
    builder: ManifestBuilder,
    settings: OrchestratorSettings,
    identity: RwLock<Option<Identity>>,
    workflow: Mutex<()>,
}

impl SnapshotOrchestrator {
    pub fn new(
        engine: Box<dyn Engine>,
        admin: Arc<dyn AdminTool>,
        transfer: TransferEngine,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            engine: Mutex::new(engine),
            admin,
            transfer,
            builder: ManifestBuilder::default(),
            settings,
            identity: RwLock::new(None),
            workflow: Mutex::new(()),
        }
    }

    pub async fn identity(&self) -> Option<Identity> {
        self.identity.read().await.clone()
    }

    pub async fn status(&self) -> Status {
        let identity = self.identity().await;
        let engine_running = match self.engine.try_lock() {
            Ok(engine) => Some(engine.running()),
            Err(_) => None,
        };

        Status {
            busy: self.workflow.try_lock().is_err(),
            engine_running,
            node_id: identity.as_ref().map(|i| i.node.id.clone()),
            cluster_name: identity.map(|i| i.cluster.name),
        }
    }

    /// Start the engine and wait until it reports its host ID and cluster name
    pub async fn startup(&self) -> Result<Identity> {
        info!("Starting engine");
        self.engine.lock().await.start().await?;

        let admin = self.admin.as_ref();
        let policy = self.settings.readiness;
        let started = Instant::now();
        let node = poll_until(&policy, "node info", move || admin.info(), NodeInfo::is_ready).await?;
        info!("Node {} is up (dc {}, rack {})", node.id, node.data_center, node.rack);

        // both phases share one deadline
        let remaining = ReadinessPolicy {
            deadline: policy.deadline.saturating_sub(started.elapsed()),
            ..policy
        };
        let cluster = poll_until(
            &remaining,
            "cluster info",
            move || admin.cluster_info(),
            ClusterInfo::is_ready,
        )
        .await?;
        info!("Joined cluster {}", cluster.name);

        let identity = Identity { node, cluster };
        *self.identity.write().await = Some(identity.clone());
        Ok(identity)
    }

    /// Snapshot every keyspace and upload it
    pub async fn create(&self, request: CreateRequest) -> Result<CreateReply> {
        let _workflow = self.begin()?;
        let identity = self.require_identity().await?;
        if !self.engine.lock().await.running() {
            return Err(AgentError::NotReady("engine is not running".to_string()));
        }

        let name = match non_empty(&request.name) {
            Some(name) => {
                validate_name(name)?;
                name.to_string()
            }
            None => manifest_name_now(),
        };
        info!("Creating snapshot {}", name);

        let output = self.admin.snapshot(&name, &[], &[]).await?;
        debug!("nodetool snapshot: {}", output.trim());

        let remote_path = self.remote_base(&identity, &name);
        let builder = self.builder.clone();
        let data_root = self.transfer.data_root().to_path_buf();
        let snapshot_name = name.clone();
        let mut manifest = tokio::task::spawn_blocking(move || {
            builder.build(&data_root, &snapshot_name, &remote_path)
        })
        .await??;
        manifest.cluster_name = identity.cluster.name.clone();
        manifest.hosts = vec![identity.node.id.clone()];

        let outcome = self.transfer.put(&mut manifest).await?;
        info!(
            "Snapshot {} stored at {} ({} files, {})",
            name,
            manifest.path,
            outcome.succeeded(),
            format_bytes(outcome.total_bytes())
        );

        if self.settings.clear_snapshot_after_upload {
            if let Err(e) = self.admin.clear_snapshot(&name, &[], &[]).await {
                warn!("Failed to clear local snapshot {}: {}", name, e);
            }
        }

        Ok(CreateReply {
            name,
            path: manifest.path,
            size: outcome.total_bytes(),
            files_uploaded: outcome.succeeded(),
            files_failed: outcome.failed(),
            keyspaces: manifest.keyspaces,
        })
    }

    /// Replace local data with a stored backup and bring the node back up
    pub async fn restore(&self, request: RestoreRequest) -> Result<RestoreReply> {
        let source = request.source()?;
        let _workflow = self.begin()?;

        let manifest_path = match source {
            RestoreSource::Path(path) => path.to_string(),
            RestoreSource::Name(name) => {
                let identity = self.require_identity().await?;
                join_remote(&[&self.remote_base(&identity, name), MANIFEST_FILE])
            }
        };
        info!("Restoring from {}", manifest_path);
        if !request.tables.is_empty() {
            debug!("Restore limited to tables {:?}", request.tables);
        }

        {
            let mut engine = self.engine.lock().await;
            engine.stop().await?;
            if engine.running() {
                return Err(AgentError::Stop(
                    "engine still running, refusing to clear data".to_string(),
                ));
            }

            match engine.clear_data(&request.keyspaces).await {
                Ok(removed) => info!("Cleared {} data entries", removed.len()),
                Err(e) => warn!("Failed to clear data before restore: {}", e),
            }
        }

        let (manifest, outcome) = self.transfer.get(&manifest_path).await?;
        self.startup().await?;

        Ok(RestoreReply {
            name: manifest.name,
            manifest_path,
            directories: outcome.directories,
            files: outcome.files,
            bytes: outcome.bytes,
        })
    }

    /// Stop the engine, e.g. when the agent itself is shutting down
    pub async fn shutdown(&self) -> Result<()> {
        info!("Stopping engine");
        self.engine.lock().await.stop().await
    }

    /// `<prefix>/<cluster>/<host id>/<name>`
    pub fn remote_base(&self, identity: &Identity, name: &str) -> String {
        backup_path(
            &self.settings.remote_prefix,
            &identity.cluster.name,
            &identity.node.id,
            name,
        )
    }

    fn begin(&self) -> Result<tokio::sync::MutexGuard<'_, ()>> {
        self.workflow
            .try_lock()
            .map_err(|_| AgentError::Busy("a create or restore is already running".to_string()))
    }

    async fn require_identity(&self) -> Result<Identity> {
        self.identity()
            .await
            .ok_or_else(|| AgentError::NotReady("node identity is not known yet".to_string()))
    }
}

/// Snapshot name for the current local time, `YYYYMMDDhhmmss`
pub fn manifest_name_now() -> String {
    chrono::Local::now().format(NAME_FORMAT).to_string()
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn validate_name(name: &str) -> Result<()> {
    if name.contains('/') || name == "." || name == ".." {
        return Err(AgentError::Validation(format!("invalid snapshot name {:?}", name)));
    }
    Ok(())
}
