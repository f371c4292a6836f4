// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Driving create/start/stop/destroy/config through the cloud control plane
//! while reporting progress.

use crate::cloud::{CloudAction, CloudControlPlane, CloudError, TaskProgress};
use crate::definition::ClusterDefinition;
use crate::monitor::ProgressMonitor;
use crate::publisher::StatusPublisher;
use crate::store::StoreError;
use crate::target::Target;
use fleet_common::ExitCode;
use slog::{debug, info, o, Logger};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecycleAction {
    Create,
    /// Power machines on; `bootstrap` if a bootstrap session follows.
    Start { bootstrap: bool },
    Stop,
    Destroy,
    Config,
}

impl LifecycleAction {
    pub fn cloud_action(self) -> CloudAction {
        match self {
            LifecycleAction::Create => CloudAction::Create,
            LifecycleAction::Start { .. } => CloudAction::Start,
            LifecycleAction::Stop => CloudAction::Stop,
            LifecycleAction::Destroy => CloudAction::Destroy,
            LifecycleAction::Config => CloudAction::Config,
        }
    }

    /// Whether this action is the last step of the command. If not, a
    /// bootstrap follows and owns the second half of the progress bar.
    pub fn is_last_action(self) -> bool {
        match self {
            LifecycleAction::Create => false,
            LifecycleAction::Start { bootstrap } => !bootstrap,
            LifecycleAction::Stop
            | LifecycleAction::Destroy
            | LifecycleAction::Config => true,
        }
    }

    pub fn failure_code(self) -> ExitCode {
        self.cloud_action().failure_code()
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.cloud_action(), f)
    }
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("failed to reset progress of {target} before {action}")]
    Store {
        action: LifecycleAction,
        target: String,
        #[source]
        error: StoreError,
    },
    #[error("{action} of {target} failed")]
    Cloud {
        action: LifecycleAction,
        target: String,
        #[source]
        error: CloudError,
    },
}

impl LifecycleError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            LifecycleError::Store { action, .. }
            | LifecycleError::Cloud { action, .. } => action.failure_code(),
        }
    }
}

pub struct LifecycleDriver {
    log: Logger,
    cloud: Arc<dyn CloudControlPlane>,
    monitor: Arc<ProgressMonitor>,
    publisher: Arc<StatusPublisher>,
    definition: ClusterDefinition,
    interval: Duration,
}

impl LifecycleDriver {
    pub fn new(
        log: &Logger,
        cloud: Arc<dyn CloudControlPlane>,
        monitor: Arc<ProgressMonitor>,
        publisher: Arc<StatusPublisher>,
        definition: ClusterDefinition,
        interval: Duration,
    ) -> Self {
        LifecycleDriver {
            log: log.new(o!("component" => "LifecycleDriver")),
            cloud,
            monitor,
            publisher,
            definition,
            interval,
        }
    }

    /// Run `action` on `target` to completion, reporting progress every
    /// `interval`.
    ///
    /// Returns whether the control plane reports success. On return the
    /// target carries the addresses the control plane last reported.
    pub async fn run(
        &self,
        action: LifecycleAction,
        target: &mut Target,
    ) -> Result<bool, LifecycleError> {
        let skip_when_empty = matches!(
            action,
            LifecycleAction::Destroy | LifecycleAction::Config
        );
        if skip_when_empty && target.is_empty() {
            info!(self.log, "nothing to {action}"; "target" => target.name());
            let result = self.monitor.final_result(target, true);
            self.publisher.publish_best_effort(&result).await;
            return Ok(true);
        }

        info!(self.log, "Start to {action} cluster {}", target.name();
            "nodes" => target.len(),
        );
        self.monitor.start_progress(target).await.map_err(|error| {
            LifecycleError::Store {
                action,
                target: target.name().to_string(),
                error,
            }
        })?;

        let cloud_err = |error| LifecycleError::Cloud {
            action,
            target: target.name().to_string(),
            error,
        };
        let task = self
            .cloud
            .submit(action.cloud_action(), &self.definition)
            .await
            .map_err(cloud_err)?;
        while !task.finished().await.map_err(cloud_err)? {
            tokio::time::sleep(self.interval).await;
            let progress = task.progress().await.map_err(cloud_err)?;
            debug!(self.log, "cloud task progress";
                "action" => %action,
                "percent" => progress.percent,
            );
            self.report(action, target, &progress).await;
        }
        let progress = task.progress().await.map_err(cloud_err)?;
        self.report(action, target, &progress).await;

        target.update_servers(&progress.result.servers);
        let succeed = progress.result.succeed;
        info!(
            self.log,
            "{} to {action} cluster {}",
            if succeed { "Succeeded" } else { "Failed" },
            target.name();
            "error" => &progress.result.error_msg,
        );
        Ok(succeed)
    }

    async fn report(
        &self,
        action: LifecycleAction,
        target: &Target,
        progress: &TaskProgress,
    ) {
        // Destroyed machines may be gone from the store's point of view, so
        // a finished destroy reports the task's own summary.
        let snapshot = if action == LifecycleAction::Destroy && progress.finished
        {
            Some(self.monitor.task_summary(target, progress))
        } else {
            self.monitor
                .record_task_progress(target, progress, action.is_last_action())
                .await
        };
        if let Some(snapshot) = snapshot {
            self.publisher.publish_best_effort(&snapshot).await;
        }
    }
}
