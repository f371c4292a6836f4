// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Running the configuration-management pass on a node.

use crate::config::RunnerConfig;
use crate::target::NodeDescriptor;
use async_trait::async_trait;
use slog::{debug, Logger};
use std::io;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

/// Result of a configuration run that got as far as exiting.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    /// 0 on success.
    pub exit_code: i32,
    /// A failure message to report instead of the generic one.
    pub message: Option<String>,
}

impl RunOutcome {
    pub fn success() -> Self {
        RunOutcome { exit_code: 0, message: None }
    }

    pub fn failed(exit_code: i32, message: Option<String>) -> Self {
        RunOutcome { exit_code, message }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("node {node} has no address to run on")]
    NoAddress { node: String },
    #[error("failed to run `{program}` for node {node}")]
    Spawn {
        node: String,
        program: String,
        #[source]
        err: io::Error,
    },
    #[error("configuration run on node {node} was killed by a signal")]
    Killed { node: String },
    #[error("configuration run on node {node} failed: {message}")]
    Other { node: String, message: String },
}

#[async_trait]
pub trait ConfigurationRunner: Send + Sync {
    async fn run(
        &self,
        node: &NodeDescriptor,
    ) -> Result<RunOutcome, RunnerError>;
}

/// Runs the configured command on the node over `ssh`.
#[derive(Clone, Debug)]
pub struct SshRunner {
    log: Logger,
    config: RunnerConfig,
}

impl SshRunner {
    pub fn new(log: &Logger, config: RunnerConfig) -> Self {
        SshRunner { log: log.new(slog::o!("component" => "SshRunner")), config }
    }

    fn args(&self, address: &str) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(identity) = &self.config.identity_file {
            args.push("-i".to_string());
            args.push(identity.to_string());
        }
        args.extend([
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            format!("{}@{}", self.config.ssh_user, address),
            self.config.command.clone(),
        ]);
        args
    }
}

#[async_trait]
impl ConfigurationRunner for SshRunner {
    async fn run(
        &self,
        node: &NodeDescriptor,
    ) -> Result<RunOutcome, RunnerError> {
        let name = node.name.to_string();
        let address = node
            .address
            .as_deref()
            .filter(|a| !a.is_empty())
            .ok_or_else(|| RunnerError::NoAddress { node: name.clone() })?;

        let args = self.args(address);
        debug!(self.log, "running configuration pass";
            "node" => &name,
            "args" => ?args,
        );
        let output = Command::new("ssh")
            .args(&args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| RunnerError::Spawn {
                node: name.clone(),
                program: "ssh".to_string(),
                err,
            })?;

        match output.status.code() {
            Some(0) => Ok(RunOutcome::success()),
            Some(code) => {
                debug!(self.log, "configuration pass failed";
                    "node" => &name,
                    "exit_code" => code,
                    "stderr" => %String::from_utf8_lossy(&output.stderr),
                );
                Ok(RunOutcome::failed(code, None))
            }
            None => Err(RunnerError::Killed { node: name }),
        }
    }
}
