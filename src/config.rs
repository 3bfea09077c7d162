/*!
Configuration of a supervisor process.

The configuration file is a JSON object keyed by process name, so several
processes of one deployment can share a file. A process record names its
socket endpoints, the dataflow interpretation, the transform kind, and one
entry per worker manager. Validation happens at load time; a broken record
is fatal at startup.
*/

use crate::queue::OverflowPolicy;
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("configuration is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("no configuration entry for process `{0}`")]
    MissingProcess(String),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// How the data listeners interpret incoming messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataflowType {
    /// Length-prefixed telemetry frames; the production path.
    Binary,
    /// A UTF-8 path naming a file of self-contained records.
    Filename,
    /// An opaque string pushed verbatim.
    String,
}

/// Which socket shape a channel uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SocketMode {
    PushPull,
    PubSub,
    /// No sockets; data arrives through some process-specific channel.
    Custom,
}

fn default_workers() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct ManagerConfig {
    pub name: String,
    pub worker_name: String,
    #[serde(default = "default_workers")]
    pub num_workers: usize,
    pub result_socket_type: SocketMode,
    pub result_dataflow_type: DataflowType,
    /// Endpoint URI, or the literal `"none"` to disable the lane.
    pub result_lp_socket: String,
    pub result_hp_socket: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePolicyKind {
    Unbounded,
    DropOldest,
    DropNewest,
    Block,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessConfig {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub logs_path: Option<String>,
    #[serde(default)]
    pub logging: Option<String>,
    pub processing_type: String,
    pub dataflow_type: DataflowType,
    pub datasocket_type: SocketMode,
    pub data_lp_socket: String,
    pub data_hp_socket: String,
    pub command_socket: String,
    pub monitoring_socket: String,
    /// Control endpoint of the acquisition frontend, when this process
    /// drives acquisition start/stop.
    #[serde(default)]
    pub ctrl_socket: Option<String>,
    #[serde(default)]
    pub run_id: u16,
    /// Optional queue bound; unbounded when absent.
    #[serde(default)]
    pub queue_limit: Option<usize>,
    #[serde(default)]
    pub queue_policy: Option<QueuePolicyKind>,
    /// Record sink: XML schema descriptor, output directory, batch size.
    #[serde(default)]
    pub sink_model: Option<String>,
    #[serde(default)]
    pub sink_output: Option<String>,
    #[serde(default)]
    pub sink_batch_rows: Option<usize>,
    pub workers: Vec<ManagerConfig>,
}

impl ProcessConfig {
    pub fn from_file(path: &Path, name: &str) -> Result<ProcessConfig, ConfigError> {
        let text = fs::read_to_string(path)?;
        ProcessConfig::from_str(&text, name)
    }

    pub fn from_str(text: &str, name: &str) -> Result<ProcessConfig, ConfigError> {
        let mut all: HashMap<String, ProcessConfig> = serde_json::from_str(text)?;
        let mut cfg = all
            .remove(name)
            .ok_or_else(|| ConfigError::MissingProcess(name.to_owned()))?;
        cfg.name = name.to_owned();
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.is_empty() {
            return Err(ConfigError::Invalid("no worker managers configured".into()));
        }
        for m in &self.workers {
            if m.num_workers == 0 {
                return Err(ConfigError::Invalid(format!(
                    "manager `{}` has zero workers",
                    m.name
                )));
            }
            if m.name.is_empty() || m.worker_name.is_empty() {
                return Err(ConfigError::Invalid("manager or worker name is empty".into()));
            }
        }
        if self.queue_policy.is_some() && self.queue_policy != Some(QueuePolicyKind::Unbounded)
            && self.queue_limit.is_none()
        {
            return Err(ConfigError::Invalid(
                "queue_policy needs a queue_limit".into(),
            ));
        }
        Ok(())
    }

    /// The overflow policy the managers' queues are built with.
    pub fn overflow_policy(&self) -> OverflowPolicy {
        match (self.queue_policy, self.queue_limit) {
            (Some(QueuePolicyKind::DropOldest), Some(cap)) => OverflowPolicy::DropOldest(cap),
            (Some(QueuePolicyKind::DropNewest), Some(cap)) => OverflowPolicy::DropNewest(cap),
            (Some(QueuePolicyKind::Block), Some(cap)) => OverflowPolicy::Block(cap),
            _ => OverflowPolicy::Unbounded,
        }
    }
}
