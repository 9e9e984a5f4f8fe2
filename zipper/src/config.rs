use serde::Deserialize;
use std::fs::File;
use std::time::Duration;

use backends::types::{BackendConfig, Timeouts};

#[derive(Debug, Deserialize)]
pub struct Config {
    pub listener: Listener,
    pub backends: Vec<BackendGroupConfig>,
    /// Defaults applied to every group without its own timeouts.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default = "default_max_tries")]
    pub max_tries: usize,
    pub concurrency_limit: Option<usize>,
    pub metrics: Option<MetricsConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BackendGroupConfig {
    pub group_name: String,
    pub protocol: String,
    pub servers: Vec<String>,
    pub timeouts: Option<TimeoutConfig>,
    pub max_tries: Option<usize>,
    pub concurrency_limit: Option<usize>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    #[serde(default = "default_find_secs")]
    pub find_secs: u64,
    #[serde(default = "default_render_secs")]
    pub render_secs: u64,
    #[serde(default = "default_connect_millis")]
    pub connect_millis: u64,
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct MetricsConfig {
    pub statsd_host: String,
    pub statsd_port: u16,
}

fn default_max_tries() -> usize {
    3
}

fn default_find_secs() -> u64 {
    2
}

fn default_render_secs() -> u64 {
    10
}

fn default_connect_millis() -> u64 {
    200
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            find_secs: default_find_secs(),
            render_secs: default_render_secs(),
            connect_millis: default_connect_millis(),
        }
    }
}

impl TimeoutConfig {
    pub fn to_timeouts(self) -> Timeouts {
        Timeouts {
            find: Duration::from_secs(self.find_secs),
            render: Duration::from_secs(self.render_secs),
            connect: Duration::from_millis(self.connect_millis),
        }
    }
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let data = serde_yaml::from_reader(file)?;

        Ok(data)
    }

    /// Per-group config with the top-level defaults layered underneath.
    pub fn backend_config(&self, group: &BackendGroupConfig) -> BackendConfig {
        BackendConfig {
            group_name: group.group_name.clone(),
            servers: group.servers.clone(),
            protocol: group.protocol.clone(),
            timeouts: group.timeouts.unwrap_or(self.timeouts).to_timeouts(),
            max_tries: group.max_tries.unwrap_or(self.max_tries),
            concurrency_limit: group.concurrency_limit.or(self.concurrency_limit),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
}
