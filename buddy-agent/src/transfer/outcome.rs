//! Per-file transfer records and their aggregates.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Result of moving one file between the data directory and the store
#[derive(Debug, Clone, Serialize)]
pub struct TransferRecord {
    pub local: PathBuf,
    pub remote: String,
    pub bytes: u64,
    /// Failure description, `None` when the transfer succeeded
    pub error: Option<String>,
}

impl TransferRecord {
    pub fn succeeded(local: PathBuf, remote: String, bytes: u64) -> Self {
        Self {
            local,
            remote,
            bytes,
            error: None,
        }
    }

    pub fn failed(local: PathBuf, remote: String, error: impl ToString) -> Self {
        Self {
            local,
            remote,
            bytes: 0,
            error: Some(error.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Everything an upload pass did
#[derive(Debug, Clone, Default, Serialize)]
pub struct TransferOutcome {
    pub records: Vec<TransferRecord>,
    /// Highest number of transfers observed running at once
    pub peak_in_flight: usize,
}

impl TransferOutcome {
    pub fn succeeded(&self) -> usize {
        self.records.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.records.len() - self.succeeded()
    }

    pub fn total_bytes(&self) -> u64 {
        self.records.iter().map(|r| r.bytes).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TransferRecord> {
        self.records.iter().filter(|r| !r.is_success())
    }
}

/// Totals of a download pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RestoreOutcome {
    pub directories: usize,
    pub files: usize,
    pub bytes: u64,
}

impl RestoreOutcome {
    pub fn absorb(&mut self, other: RestoreOutcome) {
        self.directories += other.directories;
        self.files += other.files;
        self.bytes += other.bytes;
    }
}

/// Counts concurrently running transfers and remembers the high-water mark
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    current: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl InFlight {
    /// Register a running transfer until the guard is dropped
    pub fn enter(&self) -> InFlightGuard {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        InFlightGuard {
            current: Arc::clone(&self.current),
        }
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

pub struct InFlightGuard {
    current: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_counts() {
        let outcome = TransferOutcome {
            records: vec![
                TransferRecord::succeeded("a".into(), "r/a".into(), 10),
                TransferRecord::failed("b".into(), "r/b".into(), "connection reset"),
                TransferRecord::succeeded("c".into(), "r/c".into(), 5),
            ],
            peak_in_flight: 2,
        };

        assert_eq!(outcome.succeeded(), 2);
        assert_eq!(outcome.failed(), 1);
        assert_eq!(outcome.total_bytes(), 15);
        let failures: Vec<_> = outcome.failures().map(|r| r.remote.as_str()).collect();
        assert_eq!(failures, vec!["r/b"]);
    }

    #[test]
    fn test_in_flight_peak() {
        let in_flight = InFlight::default();
        {
            let _a = in_flight.enter();
            let _b = in_flight.enter();
        }
        let _c = in_flight.enter();

        assert_eq!(in_flight.peak(), 2);
    }

    #[test]
    fn test_restore_outcome_absorb() {
        let mut total = RestoreOutcome::default();
        total.absorb(RestoreOutcome { directories: 1, files: 3, bytes: 30 });
        total.absorb(RestoreOutcome { directories: 1, files: 0, bytes: 0 });
        assert_eq!(total, RestoreOutcome { directories: 2, files: 3, bytes: 30 });
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }
}
