//! Bounded polling for node readiness.

use crate::{AgentError, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessPolicy {
    /// Delay before each probe
    pub interval: Duration,
    pub max_attempts: u32,
    /// Budget for the whole polling phase
    pub deadline: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            max_attempts: 300,
            deadline: Duration::from_secs(600),
        }
    }
}

/// Probe until `ready` accepts a result, sleeping `interval` before each
/// attempt. Probe errors count as "not ready yet".
///
/// Fails with `Timeout` once `max_attempts` probes were made or `deadline`
/// passed, whichever comes first.
pub async fn poll_until<T, F, Fut, R>(
    policy: &ReadinessPolicy,
    what: &str,
    mut probe: F,
    ready: R,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    R: Fn(&T) -> bool,
{
    let attempts = async {
        for attempt in 1..=policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
            match probe().await {
                Ok(value) if ready(&value) => return Some(value),
                Ok(_) => debug!("{} not ready (attempt {})", what, attempt),
                Err(e) => debug!("{} probe failed (attempt {}): {}", what, attempt, e),
            }
        }
        None
    };

    match tokio::time::timeout(policy.deadline, attempts).await {
        Ok(Some(value)) => Ok(value),
        Ok(None) => Err(AgentError::Timeout(format!(
            "{} not ready after {} attempts",
            what, policy.max_attempts
        ))),
        Err(_) => Err(AgentError::Timeout(format!(
            "{} not ready within {:?}",
            what, policy.deadline
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32, deadline_ms: u64) -> ReadinessPolicy {
        ReadinessPolicy {
            interval: Duration::from_millis(5),
            max_attempts,
            deadline: Duration::from_millis(deadline_ms),
        }
    }

    #[tokio::test]
    async fn test_returns_first_ready_value() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = poll_until(
            &policy(10, 5_000),
            "node",
            move || async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) },
            |n| *n >= 3,
        )
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_errors_count_as_not_ready() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let value = poll_until(
            &policy(10, 5_000),
            "node",
            move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AgentError::Command("connection refused".to_string()))
                } else {
                    Ok("id")
                }
            },
            |id| !id.is_empty(),
        )
        .await
        .unwrap();

        assert_eq!(value, "id");
    }

    #[tokio::test]
    async fn test_attempt_limit_times_out() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let err = poll_until(
            &policy(4, 5_000),
            "node",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(String::new())
            },
            |id| !id.is_empty(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, AgentError::Timeout(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_deadline_times_out() {
        let err = poll_until(
            &policy(u32::MAX, 50),
            "cluster",
            || async { Ok(false) },
            |ready| *ready,
        )
        .await
        .unwrap_err();

        match err {
            AgentError::Timeout(msg) => assert!(msg.contains("within")),
            other => panic!("unexpected error: {other}"),
        }
    }
}
