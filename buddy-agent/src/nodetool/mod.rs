//! Cassandra's administrative tool.
//!
//! `Nodetool` shells out to the nodetool executable; the report types decode
//! its plaintext output into node and cluster identity.

pub mod cluster;
pub mod info;
pub mod pattern;

pub use cluster::ClusterInfo;
pub use info::NodeInfo;

use crate::config::NodetoolConfig;
use crate::{AgentError, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::process::Command;
use tracing::debug;

/// Administrative operations the orchestrator relies on
#[async_trait]
pub trait AdminTool: Send + Sync {
    /// `nodetool info`
    async fn info(&self) -> Result<NodeInfo>;

    /// `nodetool describecluster`
    async fn cluster_info(&self) -> Result<ClusterInfo>;

    /// Take a named snapshot; empty lists mean every keyspace / table.
    /// Returns the tool's output.
    async fn snapshot(&self, name: &str, keyspaces: &[String], tables: &[String])
        -> Result<String>;

    /// Remove a named snapshot from disk
    async fn clear_snapshot(&self, name: &str, keyspaces: &[String], tables: &[String])
        -> Result<()>;
}

/// Runs the nodetool executable
#[derive(Debug, Clone)]
pub struct Nodetool {
    executable: PathBuf,
    host: Option<String>,
    port: Option<u16>,
}

impl Nodetool {
    pub fn new(config: &NodetoolConfig) -> Self {
        Self {
            executable: config.executable.clone(),
            host: config.host.clone(),
            port: config.port,
        }
    }

    /// Load newly placed SSTables for one table without a restart.
    ///
    /// Restore restarts the engine instead, so no workflow calls this; it is
    /// here for callers that place SSTables into a live node.
    pub async fn refresh(&self, keyspace: &str, table: &str) -> Result<()> {
        if keyspace.is_empty() || table.is_empty() {
            return Err(AgentError::Validation(
                "refresh requires keyspace and table".to_string(),
            ));
        }
        self.exec(vec!["refresh".into(), keyspace.into(), table.into()])
            .await?;
        Ok(())
    }

    fn connection_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(host) = &self.host {
            args.push("-h".to_string());
            args.push(host.clone());
        }
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        args
    }

    async fn exec(&self, args: Vec<String>) -> Result<String> {
        let command = args.first().cloned().unwrap_or_default();
        let mut full_args = self.connection_args();
        full_args.extend(args);
        debug!("Executing {} {:?}", self.executable.display(), full_args);

        let output = Command::new(&self.executable)
            .args(&full_args)
            .output()
            .await
            .map_err(|e| {
                AgentError::Command(format!("{}: {}", self.executable.display(), e))
            })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(combined)
        } else {
            Err(AgentError::Command(format!(
                "{} exited with {}: {}",
                command,
                output.status,
                combined.trim()
            )))
        }
    }
}

/// Arguments for `snapshot` / `clearsnapshot`: `[-cf t]* [-t name] [ks]*`
pub fn snapshot_args(
    command: &str,
    name: &str,
    keyspaces: &[String],
    tables: &[String],
) -> Vec<String> {
    let mut args = vec![command.to_string()];
    for table in tables {
        args.push("-cf".to_string());
        args.push(table.clone());
    }
    if !name.is_empty() {
        args.push("-t".to_string());
        args.push(name.to_string());
    }
    args.extend(keyspaces.iter().cloned());
    args
}

#[async_trait]
impl AdminTool for Nodetool {
    async fn info(&self) -> Result<NodeInfo> {
        let report = self.exec(vec!["info".into()]).await?;
        Ok(NodeInfo::parse(&report))
    }

    async fn cluster_info(&self) -> Result<ClusterInfo> {
        let report = self.exec(vec!["describecluster".into()]).await?;
        Ok(ClusterInfo::parse(&report))
    }

    async fn snapshot(
        &self,
        name: &str,
        keyspaces: &[String],
        tables: &[String],
    ) -> Result<String> {
        self.exec(snapshot_args("snapshot", name, keyspaces, tables))
            .await
    }

    async fn clear_snapshot(
        &self,
        name: &str,
        keyspaces: &[String],
        tables: &[String],
    ) -> Result<()> {
        self.exec(snapshot_args("clearsnapshot", name, keyspaces, tables))
            .await?;
        Ok(())
    }
}
