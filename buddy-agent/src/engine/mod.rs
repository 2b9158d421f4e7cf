//! Supervision of the local Cassandra process.
//!
//! The supervisor owns the only handle to the child process. It can start the
//! engine with its launch environment, stop it with SIGTERM, probe whether it
//! is alive and wipe keyspace data while it is down.

pub mod env;

pub use env::EngineConfig;

use crate::{AgentError, Result};
use async_trait::async_trait;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Exit code a shell wrapper reports when its child died of SIGTERM (128 + 15)
const SIGTERM_EXIT_CODE: i32 = 143;

/// Lifecycle of the supervised process
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    NotStarted,
    Running,
    Stopped,
}

/// Operations the orchestrator needs from the database engine
#[async_trait]
pub trait Engine: Send + Sync {
    /// Launch the engine process
    async fn start(&mut self) -> Result<()>;

    /// Terminate the engine and wait for it to exit
    async fn stop(&mut self) -> Result<()>;

    /// Whether the engine process is alive
    fn running(&self) -> bool;

    /// Remove all data under the given keyspaces (every keyspace when empty).
    ///
    /// Only safe while the engine is stopped; callers must check `running()` first.
    async fn clear_data(&self, keyspaces: &[String]) -> Result<Vec<PathBuf>>;
}

/// Supervises a single Cassandra process
pub struct ProcessSupervisor {
    config: EngineConfig,
    child: Option<Child>,
    state: EngineState,
}

impl ProcessSupervisor {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            child: None,
            state: EngineState::NotStarted,
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    fn pid(&self) -> Option<Pid> {
        self.child
            .as_ref()
            .and_then(|child| child.id())
            .map(|pid| Pid::from_raw(pid as i32))
    }
}

#[async_trait]
impl Engine for ProcessSupervisor {
    async fn start(&mut self) -> Result<()> {
        info!("Starting engine: {} -f", self.config.executable.display());

        let mut child = Command::new(&self.config.executable)
            .arg("-f")
            .envs(self.config.env())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                AgentError::Launch(format!("{}: {}", self.config.executable.display(), e))
            })?;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, "stderr"));
        }

        info!("Engine started with pid {:?}", child.id());
        self.child = Some(child);
        self.state = EngineState::Running;
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        if !self.running() {
            if self.state == EngineState::Running {
                self.state = EngineState::Stopped;
            }
            return Ok(());
        }

        let pid = match self.pid() {
            Some(pid) => pid,
            None => return Ok(()),
        };

        info!("Sending SIGTERM to engine pid {}", pid);
        kill(pid, Signal::SIGTERM)
            .map_err(|e| AgentError::Stop(format!("failed to signal pid {}: {}", pid, e)))?;

        let status = match self.child.as_mut() {
            Some(child) => child
                .wait()
                .await
                .map_err(|e| AgentError::Stop(format!("failed to wait for pid {}: {}", pid, e)))?,
            None => return Ok(()),
        };

        self.child = None;
        self.state = EngineState::Stopped;

        if is_graceful_exit(&status) {
            info!("Engine stopped ({})", status);
            Ok(())
        } else {
            Err(AgentError::Stop(format!("engine exited abnormally: {}", status)))
        }
    }

    fn running(&self) -> bool {
        match self.pid() {
            // signal 0 only checks that the process exists and can be signalled
            Some(pid) => kill(pid, None::<Signal>).is_ok(),
            None => false,
        }
    }

    async fn clear_data(&self, keyspaces: &[String]) -> Result<Vec<PathBuf>> {
        let data_path = self.config.data_path.clone();
        let keyspaces = keyspaces.to_vec();
        tokio::task::spawn_blocking(move || clear_keyspaces(&data_path, &keyspaces)).await?
    }
}

/// Delete the contents of each keyspace directory under `data_root`.
///
/// An empty `keyspaces` list targets every keyspace directory present.
pub fn clear_keyspaces(data_root: &Path, keyspaces: &[String]) -> Result<Vec<PathBuf>> {
    let targets: Vec<PathBuf> = if keyspaces.is_empty() {
        crate::fs::list_subdirectories(data_root)?
    } else {
        keyspaces.iter().map(|ks| data_root.join(ks)).collect()
    };

    let mut removed = Vec::new();
    for keyspace_dir in targets {
        info!("Clearing keyspace directory {}", keyspace_dir.display());
        removed.extend(crate::fs::clear_directory(&keyspace_dir)?);
    }

    Ok(removed)
}

fn is_graceful_exit(status: &ExitStatus) -> bool {
    status.success()
        || status.signal() == Some(Signal::SIGTERM as i32)
        || status.code() == Some(SIGTERM_EXIT_CODE)
}

async fn forward_output<R>(stream: R, name: &'static str)
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!("engine {}: {}", name, line),
            Ok(None) => break,
            Err(e) => {
                warn!("Stopped reading engine {}: {}", name, e);
                break;
            }
        }
    }
}
