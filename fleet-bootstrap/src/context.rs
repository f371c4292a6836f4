// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Wiring the components of a run together.

use crate::bus::{BusConnector, HttpBus, RecordingBus};
use crate::cloud::{CloudControlPlane, CloudError, StaticCloud};
use crate::config::Config;
use crate::definition::DefinitionFile;
use crate::lifecycle::{LifecycleAction, LifecycleDriver, LifecycleError};
use crate::monitor::ProgressMonitor;
use crate::orchestrator::{BootstrapError, Orchestrator};
use crate::probe::{Prober, TcpProber};
use crate::publisher::StatusPublisher;
use crate::record::ClusterProgressSnapshot;
use crate::runner::{ConfigurationRunner, SshRunner};
use crate::store::{AbortSignalStore, FileStore, ServiceRegistry, StateStore};
use crate::target::{Slice, SliceError, Target};
use crate::worker::NodeWorker;
use display_error_chain::DisplayErrorChain;
use fleet_common::ExitCode;
use slog::{info, o, warn, Logger};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ActionError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
}

impl ActionError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            ActionError::Lifecycle(error) => error.exit_code(),
            ActionError::Bootstrap(_) => ExitCode::BootstrapFailure,
        }
    }
}

/// The external systems a run talks to.
pub struct Collaborators {
    pub store: Arc<dyn StateStore>,
    pub flags: Arc<dyn AbortSignalStore>,
    pub registry: Arc<dyn ServiceRegistry>,
    pub bus: Arc<dyn BusConnector>,
    pub prober: Arc<dyn Prober>,
    pub runner: Arc<dyn ConfigurationRunner>,
    pub cloud: Arc<dyn CloudControlPlane>,
}

impl Collaborators {
    /// The real thing, as described by `config`.
    ///
    /// Dry runs never touch the broker: with monitoring disabled they
    /// publish into a [`RecordingBus`] instead.
    pub fn from_config(
        log: &Logger,
        config: &Config,
        definition: &DefinitionFile,
    ) -> Collaborators {
        let store = Arc::new(FileStore::new(config.store.path.clone()));
        let bus: Arc<dyn BusConnector> =
            if config.bootstrap.dry_run && config.monitor.disabled {
                Arc::new(RecordingBus::new())
            } else {
                Arc::new(HttpBus::new(&bus_config(config, definition)))
            };
        Collaborators {
            store: store.clone(),
            flags: store.clone(),
            registry: store,
            bus,
            prober: Arc::new(TcpProber),
            runner: Arc::new(SshRunner::new(log, config.runner.clone())),
            cloud: Arc::new(StaticCloud::new(definition.servers())),
        }
    }
}

fn bus_config(
    config: &Config,
    definition: &DefinitionFile,
) -> crate::config::BusConfig {
    let mut bus = config.bus.clone();
    if let Some(props) = &definition.system_properties {
        bus.apply_system_properties(props);
    }
    bus
}

/// Everything needed to act on one cluster.
pub struct Fleet {
    log: Logger,
    definition: DefinitionFile,
    monitor: Arc<ProgressMonitor>,
    publisher: Arc<StatusPublisher>,
    orchestrator: Orchestrator,
    lifecycle: LifecycleDriver,
    cloud: Arc<dyn CloudControlPlane>,
    store: Arc<dyn StateStore>,
}

impl Fleet {
    pub fn new(
        log: &Logger,
        config: &Config,
        definition: DefinitionFile,
        collaborators: Collaborators,
    ) -> Fleet {
        let log = log.new(o!(
            "cluster" => definition.cluster_definition.name.clone(),
        ));
        let monitor = Arc::new(ProgressMonitor::new(
            &log,
            collaborators.store.clone(),
            collaborators.flags,
            config.monitor.critical_roles.clone(),
        ));
        let publisher = Arc::new(
            StatusPublisher::new(
                &log,
                collaborators.bus,
                bus_config(config, &definition),
                config.monitor.disabled,
            )
            .with_definition(definition.cluster_definition.clone()),
        );
        let worker = Arc::new(NodeWorker::new(
            &log,
            collaborators.prober,
            collaborators.runner,
            monitor.clone(),
            config.bootstrap.probe.clone(),
            config.bootstrap.dry_run,
        ));
        let orchestrator = Orchestrator::new(
            &log,
            config.bootstrap.clone(),
            worker,
            monitor.clone(),
            publisher.clone(),
            collaborators.registry,
        );
        let lifecycle = LifecycleDriver::new(
            &log,
            collaborators.cloud.clone(),
            monitor.clone(),
            publisher.clone(),
            definition.cluster_definition.clone(),
            config.monitor.interval(),
        );
        Fleet {
            log,
            definition,
            monitor,
            publisher,
            orchestrator,
            lifecycle,
            cloud: collaborators.cloud,
            store: collaborators.store,
        }
    }

    pub fn definition(&self) -> &DefinitionFile {
        &self.definition
    }

    /// Resolve a `CLUSTER[-FACET[-INDEXES]]` selector against the inventory.
    pub fn target(&self, slice: &str) -> Result<Target, SliceError> {
        let slice: Slice = slice.parse()?;
        Target::select(
            &self.definition.cluster_definition,
            &self.definition.servers(),
            &slice,
        )
    }

    pub async fn bootstrap(
        &self,
        target: &Target,
    ) -> Result<ExitCode, BootstrapError> {
        self.orchestrator.bootstrap(target).await
    }

    /// Run a cloud action, then bootstrap if the action calls for it.
    ///
    /// Returns the exit code of the whole command. While machines are
    /// being started for a bootstrap, their run flag is raised so they do
    /// not configure themselves at boot.
    pub async fn run_action(
        &self,
        action: LifecycleAction,
        target: &mut Target,
    ) -> Result<ExitCode, ActionError> {
        let flag_runs = action == LifecycleAction::Start { bootstrap: true };
        if flag_runs {
            self.set_run_flags(target, true).await;
        }
        let result = self.lifecycle.run(action, target).await;
        if flag_runs {
            self.set_run_flags(target, false).await;
        }
        let succeed = result?;
        if !succeed {
            return Ok(action.failure_code());
        }
        if action.is_last_action() {
            return Ok(ExitCode::Success);
        }
        Ok(self.bootstrap(target).await?)
    }

    async fn set_run_flags(&self, target: &Target, driven: bool) {
        for node in target.nodes() {
            let name = node.name.as_str();
            if let Err(error) = self.store.set_run_flag(name, driven).await {
                warn!(
                    self.log,
                    "failed to set run flag: {}",
                    DisplayErrorChain::new(&error);
                    "node" => name,
                    "driven" => driven,
                );
            }
        }
    }

    /// Record and publish the cluster's current state as the cloud sees it.
    pub async fn report_status(
        &self,
        target: &Target,
    ) -> Result<ClusterProgressSnapshot, CloudError> {
        let servers =
            self.cloud.list_servers(&self.definition.cluster_definition).await?;
        let snapshot = self.monitor.sync_cluster_status(target, &servers).await;
        info!(self.log, "cluster status";
            "target" => target.name(),
            "nodes" => snapshot.total,
            "running" => servers
                .iter()
                .filter(|s| s.is_running() && target.contains(&s.name))
                .count(),
        );
        self.publisher.publish_best_effort(&snapshot).await;
        Ok(snapshot)
    }

    /// Publish the command's final result, right before exiting.
    pub async fn publish_final_result(&self, target: &Target, succeed: bool) {
        let result = self.monitor.final_result(target, succeed);
        self.publisher.publish_best_effort(&result).await;
    }
}
