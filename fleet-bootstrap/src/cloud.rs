// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Interface to the cloud control plane that creates, starts, stops,
//! reconfigures and destroys the machines of a cluster.
//!
//! Actions are submitted as tasks which are then polled for progress; the
//! control plane never pushes anything to us.

use crate::definition::ClusterDefinition;
use crate::record::{NodeProvisionRecord, ProvisionStatus};
use async_trait::async_trait;
use fleet_common::ExitCode;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloudAction {
    Create,
    Start,
    Stop,
    Destroy,
    /// Reapply the cluster's machine-level settings to existing machines.
    Config,
}

impl CloudAction {
    /// Exit code reported when this action fails.
    pub fn failure_code(self) -> ExitCode {
        match self {
            CloudAction::Create => ExitCode::CreateFailure,
            CloudAction::Start => ExitCode::StartFailure,
            CloudAction::Stop => ExitCode::StopFailure,
            CloudAction::Destroy => ExitCode::DeleteFailure,
            CloudAction::Config => ExitCode::Failure,
        }
    }
}

impl fmt::Display for CloudAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CloudAction::Create => "create",
            CloudAction::Start => "start",
            CloudAction::Stop => "stop",
            CloudAction::Destroy => "destroy",
            CloudAction::Config => "config",
        })
    }
}

fn full_progress() -> u8 {
    100
}

/// One machine as described by the control plane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerDescriptor {
    pub name: String,
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub status: Option<ProvisionStatus>,
    #[serde(default)]
    pub action: String,
    /// Progress of the current action on this machine, 0 to 100.
    #[serde(default = "full_progress")]
    pub progress: u8,
    #[serde(default)]
    pub rack: Option<String>,
}

impl ServerDescriptor {
    pub fn is_running(&self) -> bool {
        self.status.is_some_and(ProvisionStatus::is_running)
    }

    /// Whether the machine exists in the cloud at all.
    pub fn exists(&self) -> bool {
        self.status != Some(ProvisionStatus::NotExist)
    }

    /// The address to reach the machine on, if it has one.
    pub fn address(&self) -> Option<&str> {
        self.ip_address.as_deref().filter(|ip| !ip.is_empty())
    }

    /// The provisioning record implied by this description. A machine
    /// whose action is still under way is unfinished.
    pub fn to_record(&self) -> NodeProvisionRecord {
        let finished = self.progress >= 100;
        NodeProvisionRecord {
            finished,
            succeed: finished.then_some(true),
            bootstrapped: false,
            status: self.status.unwrap_or_default(),
            progress: self.progress.min(100),
            action: self.action.clone(),
            error_msg: String::new(),
            name: Some(self.name.clone()),
            hostname: self.hostname.clone(),
            ip_address: self.ip_address.clone(),
            rack: self.rack.clone(),
        }
    }
}

/// Outcome so far of a submitted task.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskResult {
    pub servers: Vec<ServerDescriptor>,
    pub succeed: bool,
    pub total: usize,
    pub success: usize,
    pub failure: usize,
    pub running: usize,
    pub error_msg: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskProgress {
    pub percent: u8,
    pub finished: bool,
    pub result: TaskResult,
}

#[derive(Debug, Error)]
pub enum CloudError {
    #[error("cloud control plane rejected {action} of cluster {cluster}: {message}")]
    Rejected { action: CloudAction, cluster: String, message: String },
    #[error("lost track of cloud task: {0}")]
    Task(String),
}

#[async_trait]
pub trait CloudControlPlane: Send + Sync {
    async fn submit(
        &self,
        action: CloudAction,
        definition: &ClusterDefinition,
    ) -> Result<Box<dyn CloudTask>, CloudError>;

    /// The machines of the cluster that currently exist, as the control
    /// plane sees them.
    async fn list_servers(
        &self,
        definition: &ClusterDefinition,
    ) -> Result<Vec<ServerDescriptor>, CloudError>;
}

#[async_trait]
pub trait CloudTask: Send + Sync {
    async fn finished(&self) -> Result<bool, CloudError>;
    async fn progress(&self) -> Result<TaskProgress, CloudError>;
}

/// A control plane for machines that were provisioned ahead of time.
///
/// The inventory comes from the cluster definition file. Every action
/// "completes" immediately: the machines are reported in the state the
/// action would have left them in.
#[derive(Debug)]
pub struct StaticCloud {
    servers: Mutex<Vec<ServerDescriptor>>,
}

impl StaticCloud {
    pub fn new(servers: Vec<ServerDescriptor>) -> Self {
        StaticCloud { servers: Mutex::new(servers) }
    }
}

#[async_trait]
impl CloudControlPlane for StaticCloud {
    async fn submit(
        &self,
        action: CloudAction,
        _definition: &ClusterDefinition,
    ) -> Result<Box<dyn CloudTask>, CloudError> {
        let servers = self
            .servers
            .lock()
            .unwrap()
            .iter()
            .cloned()
            .map(|mut server| {
                server.status = Some(match action {
                    CloudAction::Create | CloudAction::Start => server
                        .status
                        .filter(|status| status.is_running())
                        .unwrap_or(ProvisionStatus::VmReady),
                    CloudAction::Stop => ProvisionStatus::PoweredOff,
                    CloudAction::Destroy => ProvisionStatus::NotExist,
                    CloudAction::Config => {
                        server.status.unwrap_or(ProvisionStatus::VmReady)
                    }
                });
                server.progress = 100;
                server.action.clear();
                server
            })
            .collect::<Vec<_>>();
        let total = servers.len();
        *self.servers.lock().unwrap() = servers.clone();
        Ok(Box::new(CompletedTask {
            progress: TaskProgress {
                percent: 100,
                finished: true,
                result: TaskResult {
                    servers,
                    succeed: true,
                    total,
                    success: total,
                    failure: 0,
                    running: 0,
                    error_msg: String::new(),
                },
            },
        }))
    }

    async fn list_servers(
        &self,
        _definition: &ClusterDefinition,
    ) -> Result<Vec<ServerDescriptor>, CloudError> {
        Ok(self
            .servers
            .lock()
            .unwrap()
            .iter()
            .filter(|server| server.status != Some(ProvisionStatus::NotExist))
            .cloned()
            .collect())
    }
}

#[derive(Debug)]
struct CompletedTask {
    progress: TaskProgress,
}

#[async_trait]
impl CloudTask for CompletedTask {
    async fn finished(&self) -> Result<bool, CloudError> {
        Ok(true)
    }

    async fn progress(&self) -> Result<TaskProgress, CloudError> {
        Ok(self.progress.clone())
    }
}
