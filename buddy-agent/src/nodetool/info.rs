//! `nodetool info` report.

use super::pattern::{group, parse_bool, parse_report, FieldRule};
use serde::Serialize;
use std::sync::LazyLock;

/// The local node's view of itself
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct NodeInfo {
    /// Host ID, used to namespace backups
    pub id: String,
    pub gossip_active: bool,
    pub thrift_active: bool,
    pub native_transport_active: bool,
    /// Load with its unit, e.g. `123.4 KB`
    pub load: String,
    pub generation_number: i64,
    pub uptime_seconds: u64,
    pub heap_used_mb: f64,
    pub heap_max_mb: f64,
    pub heap_usage_percent: f64,
    pub data_center: String,
    pub rack: String,
    pub exceptions: i64,
}

impl NodeInfo {
    /// Decode a `nodetool info` report. Never fails.
    pub fn parse(report: &str) -> Self {
        parse_report(report, &INFO_RULES)
    }

    /// The node has reported its host ID
    pub fn is_ready(&self) -> bool {
        !self.id.is_empty()
    }

    /// Gossip, thrift and native transport flags, in that order
    pub fn transports_active(&self) -> [bool; 3] {
        [
            self.gossip_active,
            self.thrift_active,
            self.native_transport_active,
        ]
    }

    fn set_heap(&mut self, used: &str, max: &str) {
        if let Ok(used) = used.parse() {
            self.heap_used_mb = used;
        }
        if let Ok(max) = max.parse() {
            self.heap_max_mb = max;
        }
        self.heap_usage_percent = heap_usage_percent(self.heap_used_mb, self.heap_max_mb);
    }
}

/// `100 * used / max`, or 0 when `max` is not positive
pub fn heap_usage_percent(used: f64, max: f64) -> f64 {
    if max > 0.0 && used.is_finite() {
        used / max * 100.0
    } else {
        0.0
    }
}

static INFO_RULES: LazyLock<Vec<FieldRule<NodeInfo>>> = LazyLock::new(|| {
    vec![
        FieldRule::new(r"(?i)^\s*ID\s*:\s*([0-9a-z\-]+)\s*$", |n, c| {
            n.id = group(c, 1).to_string()
        }),
        FieldRule::new(r"(?i)^\s*Gossip active\s*:\s*(\S+)\s*$", |n, c| {
            if let Some(v) = parse_bool(group(c, 1)) {
                n.gossip_active = v;
            }
        }),
        FieldRule::new(r"(?i)^\s*Thrift active\s*:\s*(\S+)\s*$", |n, c| {
            if let Some(v) = parse_bool(group(c, 1)) {
                n.thrift_active = v;
            }
        }),
        FieldRule::new(r"(?i)^\s*Native Transport active\s*:\s*(\S+)\s*$", |n, c| {
            if let Some(v) = parse_bool(group(c, 1)) {
                n.native_transport_active = v;
            }
        }),
        FieldRule::new(r"(?i)^\s*Load\s*:\s*([0-9.]+\s*[KMGTP]?i?B)\s*$", |n, c| {
            n.load = group(c, 1).to_string()
        }),
        FieldRule::new(r"(?i)^\s*Generation No\s*:\s*(\S+)\s*$", |n, c| {
            if let Ok(v) = group(c, 1).parse() {
                n.generation_number = v;
            }
        }),
        FieldRule::new(r"(?i)^\s*Uptime \(seconds\)\s*:\s*(\S+)\s*$", |n, c| {
            if let Ok(v) = group(c, 1).parse() {
                n.uptime_seconds = v;
            }
        }),
        FieldRule::new(
            r"(?i)^\s*Heap Memory \(MB\)\s*:\s*(\S+)\s*/\s*(\S+)\s*$",
            |n, c| n.set_heap(group(c, 1), group(c, 2)),
        ),
        FieldRule::new(r"(?i)^\s*Data Center\s*:\s*(.+)$", |n, c| {
            n.data_center = group(c, 1).to_string()
        }),
        FieldRule::new(r"(?i)^\s*Rack\s*:\s*(.+)$", |n, c| n.rack = group(c, 1).to_string()),
        FieldRule::new(r"(?i)^\s*Exceptions\s*:\s*(\S+)\s*$", |n, c| {
            if let Ok(v) = group(c, 1).parse() {
                n.exceptions = v;
            }
        }),
    ]
});

#[cfg(test)]
mod tests {
    use super::*;

    const REPORT: &str = "\
ID                     : 4f1d5b8e-9a4c-4e0b-8d2f-3a1c7e9b0d11
Gossip active          : true
Thrift active          : false
Native Transport active: true
Load                   : 215.34 KB
Generation No          : 1460628403
Uptime (seconds)       : 3721
Heap Memory (MB)       : 512.50 / 2048.00
Off Heap Memory (MB)   : 1.20
Data Center            : datacenter1
Rack                   : rack1
Exceptions             : 2
Key Cache              : entries 12, size 1.01 KB, capacity 100 MB
";

    #[test]
    fn test_parse_full_report() {
        let info = NodeInfo::parse(REPORT);

        assert_eq!(info.id, "4f1d5b8e-9a4c-4e0b-8d2f-3a1c7e9b0d11");
        assert_eq!(info.transports_active(), [true, false, true]);
        assert_eq!(info.load, "215.34 KB");
        assert_eq!(info.generation_number, 1460628403);
        assert_eq!(info.uptime_seconds, 3721);
        assert_eq!(info.heap_used_mb, 512.5);
        assert_eq!(info.heap_max_mb, 2048.0);
        assert!((info.heap_usage_percent - 25.0244140625).abs() < 1e-9);
        assert_eq!(info.data_center, "datacenter1");
        assert_eq!(info.rack, "rack1");
        assert_eq!(info.exceptions, 2);
        assert!(info.is_ready());
    }

    #[test]
    fn test_partial_report_keeps_defaults() {
        let info = NodeInfo::parse("Rack : r7\nsomething unexpected: 42\n");

        assert_eq!(info.rack, "r7");
        assert_eq!(info.id, "");
        assert_eq!(info.generation_number, 0);
        assert!(!info.gossip_active);
        assert!(!info.is_ready());
    }

    #[test]
    fn test_malformed_values_are_ignored() {
        let info = NodeInfo::parse(
            "Gossip active : maybe\nGeneration No : soon\nExceptions : lots\nHeap Memory (MB) : abc / 100\n",
        );

        assert!(!info.gossip_active);
        assert_eq!(info.generation_number, 0);
        assert_eq!(info.exceptions, 0);
        assert_eq!(info.heap_used_mb, 0.0);
        assert_eq!(info.heap_max_mb, 100.0);
        assert_eq!(info.heap_usage_percent, 0.0);
    }

    #[test]
    fn test_zero_heap_max_is_zero_percent() {
        let info = NodeInfo::parse("Heap Memory (MB) : 12.0 / 0\n");
        assert_eq!(info.heap_usage_percent, 0.0);
        assert_eq!(heap_usage_percent(5.0, 0.0), 0.0);
        assert_eq!(heap_usage_percent(50.0, 200.0), 25.0);
    }

    #[test]
    fn test_case_and_whitespace_tolerant() {
        let info = NodeInfo::parse("   gossip ACTIVE:TRUE  \n\tdata center:   dc-east  \n");
        assert!(info.gossip_active);
        assert_eq!(info.data_center, "dc-east");
    }

    #[test]
    fn test_parsing_is_deterministic() {
        assert_eq!(NodeInfo::parse(REPORT), NodeInfo::parse(REPORT));
        assert_eq!(NodeInfo::parse(""), NodeInfo::default());
    }
}
