//! `nodetool describecluster` report.

use super::pattern::{group, parse_report, FieldRule};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Cluster-wide facts as seen by the local node
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterInfo {
    pub name: String,
    pub snitch: String,
    pub partitioner: String,
    /// Schema version → member addresses, in reported order
    pub schema_versions: BTreeMap<String, Vec<String>>,
}

impl ClusterInfo {
    /// Decode a `nodetool describecluster` report. Never fails.
    pub fn parse(report: &str) -> Self {
        parse_report(report, &CLUSTER_RULES)
    }

    /// The node has reported the cluster name
    pub fn is_ready(&self) -> bool {
        !self.name.is_empty()
    }

    /// Cluster name made safe for object keys: spaces become `_-_`
    pub fn path_safe_name(&self) -> String {
        self.name.replace(' ', "_-_")
    }
}

static CLUSTER_RULES: LazyLock<Vec<FieldRule<ClusterInfo>>> = LazyLock::new(|| {
    vec![
        FieldRule::new(r"(?i)^\s*Name\s*:\s*(.+)$", |c, m| c.name = group(m, 1).to_string()),
        FieldRule::new(r"(?i)^\s*Snitch\s*:\s*(.+)$", |c, m| {
            c.snitch = group(m, 1).to_string()
        }),
        FieldRule::new(r"(?i)^\s*Partitioner\s*:\s*(.+)$", |c, m| {
            c.partitioner = group(m, 1).to_string()
        }),
        FieldRule::new(
            r"^\s+([0-9A-Za-z]+(?:-[0-9A-Za-z]+){4})\s*:\s*\[(.*)\]\s*$",
            |c, m| {
                let members = group(m, 2)
                    .split(',')
                    .map(str::trim)
                    .filter(|addr| !addr.is_empty())
                    .map(str::to_string)
                    .collect();
                c.schema_versions.insert(group(m, 1).to_string(), members);
            },
        ),
    ]
});
