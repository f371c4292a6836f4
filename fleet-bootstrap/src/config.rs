// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Configuration related types used by fleet-bootstrap

use crate::definition::SystemProperties;
use camino::{Utf8Path, Utf8PathBuf};
use dropshot::ConfigLogging;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use thiserror::Error;

/// Roles whose failure leaves the rest of a cluster unable to start.
pub const DEFAULT_CRITICAL_ROLES: &[&str] = &[
    "hadoop_namenode",
    "hadoop_resourcemanager",
    "hadoop_jobtracker",
    "hbase_master",
    "zookeeper",
];

/// Port of the broker's HTTP management API.
pub const DEFAULT_BUS_PORT: u16 = 15672;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub log: ConfigLogging,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
}

impl Config {
    /// Load a `Config` from the given TOML file
    pub fn from_file<P: AsRef<Utf8Path>>(
        path: P,
    ) -> Result<Config, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|error| {
            ConfigError::Io { error, path: path.to_owned() }
        })?;
        let config: Config =
            toml::from_str(&data).map_err(|error| ConfigError::Parse {
                error,
                path: path.to_owned(),
            })?;
        config.validate().map_err(|message| ConfigError::Invalid {
            message,
            path: path.to_owned(),
        })?;
        Ok(config)
    }

    /// Reject settings that parse but cannot work.
    pub fn validate(&self) -> Result<(), String> {
        if self.monitor.interval_secs == 0 {
            return Err("monitor.interval_secs must be at least 1".to_string());
        }
        let probe = &self.bootstrap.probe;
        if probe.timeout_secs == 0 {
            return Err(
                "bootstrap.probe.timeout_secs must be at least 1".to_string()
            );
        }
        if probe.attempts == 0 {
            return Err(
                "bootstrap.probe.attempts must be at least 1".to_string()
            );
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {path}")]
    Io {
        #[source]
        error: std::io::Error,
        path: Utf8PathBuf,
    },
    #[error("Failed to parse config file: {path}")]
    Parse {
        #[source]
        error: toml::de::Error,
        path: Utf8PathBuf,
    },
    #[error("Invalid config file {path}: {message}")]
    Invalid { message: String, path: Utf8PathBuf },
}

/// How a bootstrap session schedules its nodes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapConfig {
    /// Largest number of nodes bootstrapped at once; 0 means no limit.
    pub max_concurrent: usize,
    /// Bootstrap one facet at a time, in definition order.
    pub bootstrap_by_facet: bool,
    /// Skip probing and configuration runs; every node "succeeds".
    pub dry_run: bool,
    /// Pause between starting consecutive workers of a batch.
    pub stagger_ms: u64,
    pub probe: ProbeConfig,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig {
            max_concurrent: 0,
            bootstrap_by_facet: false,
            dry_run: false,
            stagger_ms: 100,
            probe: ProbeConfig::default(),
        }
    }
}

impl BootstrapConfig {
    pub fn stagger(&self) -> Duration {
        Duration::from_millis(self.stagger_ms)
    }
}

/// SSH reachability probing parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub port: u16,
    pub timeout_secs: u64,
    /// Total attempts, including the first.
    pub attempts: u32,
    pub interval_secs: u64,
    /// Extra pause after a refused connection, while sshd is coming up.
    pub refused_pause_secs: u64,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        ProbeConfig {
            port: 22,
            timeout_secs: 5,
            attempts: 11,
            interval_secs: 3,
            refused_pause_secs: 2,
        }
    }
}

impl ProbeConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn refused_pause(&self) -> Duration {
        Duration::from_secs(self.refused_pause_secs)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Administratively disable publishing to the status bus.
    pub disabled: bool,
    /// How often a running cloud task is polled for progress.
    pub interval_secs: u64,
    /// Roles whose failure raises the cluster abort flag.
    pub critical_roles: BTreeSet<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        MonitorConfig {
            disabled: false,
            interval_secs: 10,
            critical_roles: DEFAULT_CRITICAL_ROLES
                .iter()
                .map(|role| role.to_string())
                .collect(),
        }
    }
}

impl MonitorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

/// Where status snapshots are published.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Base URL of the broker's HTTP management API.
    pub url: String,
    pub vhost: String,
    pub exchange: String,
    pub routing_key: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            url: format!("http://localhost:{DEFAULT_BUS_PORT}"),
            vhost: "/".to_string(),
            exchange: "fleet.provision".to_string(),
            routing_key: "provision.status".to_string(),
            username: None,
            password: None,
        }
    }
}

impl BusConfig {
    /// Let the broker settings carried in a cluster definition win over the
    /// ones from the config file.
    pub fn apply_system_properties(&mut self, props: &SystemProperties) {
        // `rabbitmq_port` is the broker's AMQP listener, not its management
        // API, so only the host is taken from the definition.
        if let Some(host) = &props.rabbitmq_host {
            self.url = management_url(&self.url, host);
        }
        if let Some(username) = &props.rabbitmq_username {
            self.username = Some(username.clone());
        }
        if let Some(password) = &props.rabbitmq_password {
            self.password = Some(password.clone());
        }
        if let Some(exchange) = &props.rabbitmq_exchange {
            self.exchange = exchange.clone();
        }
        if let Some(channel) = &props.rabbitmq_channel {
            self.routing_key = channel.clone();
        }
    }
}

/// `configured` with its host replaced by `host`; scheme, port and path
/// are kept.
fn management_url(configured: &str, host: &str) -> String {
    match reqwest::Url::parse(configured) {
        Ok(mut url) => match url.set_host(Some(host)) {
            Ok(()) => url.as_str().trim_end_matches('/').to_string(),
            Err(_) => format!("http://{host}:{DEFAULT_BUS_PORT}"),
        },
        _ => format!("http://{host}:{DEFAULT_BUS_PORT}"),
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: Utf8PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig { path: Utf8PathBuf::from("/var/lib/fleet-bootstrap") }
    }
}

/// How the configuration-management pass is run on a node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub ssh_user: String,
    pub identity_file: Option<Utf8PathBuf>,
    pub command: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        RunnerConfig {
            ssh_user: "root".to_string(),
            identity_file: None,
            command: "sudo chef-client".to_string(),
        }
    }
}
