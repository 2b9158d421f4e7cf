//! Configuration management for the buddy agent.
//!
//! Built-in defaults are layered under an optional TOML file, which is in turn
//! overridden by `BUDDY__<SECTION>__<KEY>` environment variables.

use crate::engine::EngineConfig;
use crate::orchestrator::readiness::ReadinessPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment variable overrides.
const ENV_PREFIX: &str = "BUDDY";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub agent: AgentConfig,
    pub engine: EngineConfig,
    pub nodetool: NodetoolConfig,
    pub store: StoreConfig,
    pub orchestrator: OrchestratorConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent identifier, used in logs only
    pub id: String,

    /// HTTP server port
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodetoolConfig {
    /// Path to the nodetool executable
    pub executable: PathBuf,

    /// JMX host passed as `-h`
    #[serde(default)]
    pub host: Option<String>,

    /// JMX port passed as `-p`
    #[serde(default)]
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Object store URL (`s3://bucket`, `file:///path`, `memory://`)
    pub url: String,

    /// Key prefix all backups are stored under
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Maximum concurrent file uploads
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Fail the whole upload when a single file fails
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Delay between readiness probes
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Probes per readiness phase before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Budget for startup readiness, shared by the node and cluster phases
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,

    /// Run `nodetool clearsnapshot` once a snapshot has been uploaded
    #[serde(default)]
    pub clear_snapshot_after_upload: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_prefix() -> String {
    "cassandra-backups".to_string()
}

fn default_max_parallel() -> usize {
    20
}

fn default_poll_interval_ms() -> u64 {
    1000
}

fn default_max_attempts() -> u32 {
    300
}

fn default_deadline_secs() -> u64 {
    600
}

fn default_log_level() -> String {
    "info".to_string()
}

impl OrchestratorConfig {
    pub fn readiness(&self) -> ReadinessPolicy {
        ReadinessPolicy {
            interval: Duration::from_millis(self.poll_interval_ms),
            max_attempts: self.max_attempts,
            deadline: Duration::from_secs(self.deadline_secs),
        }
    }
}

impl Config {
    /// Load configuration from defaults, an optional TOML file and the environment
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder =
            ::config::Config::builder().add_source(::config::Config::try_from(&Config::default())?);

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path).required(true));
        }

        let settings = builder
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> crate::Result<()> {
        if self.store.max_parallel == 0 {
            return Err(crate::AgentError::Config(
                "store.max_parallel must be at least 1".to_string(),
            ));
        }
        if self.orchestrator.max_attempts == 0 {
            return Err(crate::AgentError::Config(
                "orchestrator.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            agent: AgentConfig {
                id: hostname::get()
                    .ok()
                    .and_then(|h| h.into_string().ok())
                    .unwrap_or_else(|| "buddy-agent-01".to_string()),
                port: 3000,
            },
            engine: EngineConfig::default(),
            nodetool: NodetoolConfig {
                executable: PathBuf::from("/usr/local/bin/nodetool"),
                host: None,
                port: None,
            },
            store: StoreConfig {
                url: "file:///var/lib/cassandra-buddy".to_string(),
                prefix: default_prefix(),
                max_parallel: default_max_parallel(),
                strict: false,
            },
            orchestrator: OrchestratorConfig {
                poll_interval_ms: default_poll_interval_ms(),
                max_attempts: default_max_attempts(),
                deadline_secs: default_deadline_secs(),
                clear_snapshot_after_upload: false,
            },
            log: LogConfig {
                level: default_log_level(),
            },
        }
    }
}
