// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bootstrapping every node of a target, in batches.

use crate::config::BootstrapConfig;
use crate::monitor::{BootstrapOutcome, NodeError, ProgressMonitor};
use crate::publisher::StatusPublisher;
use crate::store::{ServiceRegistry, StoreError};
use crate::target::{NodeDescriptor, Target};
use crate::worker::NodeWorker;
use batch_task_set::{batch_ranges, BatchTaskSet};
use display_error_chain::DisplayErrorChain;
use fleet_common::ExitCode;
use slog::{error, info, o, warn, Logger};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("failed to start bootstrap session for {target}")]
    StartSession {
        target: String,
        #[source]
        error: StoreError,
    },
}

/// Runs a bootstrap session over a [`Target`].
///
/// Nodes are split into pools (one per facet, or a single pool) and each
/// pool into batches of at most `max_concurrent` nodes. Batches run one
/// after the other; the nodes of a batch run concurrently. The cluster
/// abort flag is cleared when the session ends, however it ends.
pub struct Orchestrator {
    log: Logger,
    config: BootstrapConfig,
    worker: Arc<NodeWorker>,
    monitor: Arc<ProgressMonitor>,
    publisher: Arc<StatusPublisher>,
    registry: Arc<dyn ServiceRegistry>,
}

impl Orchestrator {
    pub fn new(
        log: &Logger,
        config: BootstrapConfig,
        worker: Arc<NodeWorker>,
        monitor: Arc<ProgressMonitor>,
        publisher: Arc<StatusPublisher>,
        registry: Arc<dyn ServiceRegistry>,
    ) -> Self {
        Orchestrator {
            log: log.new(o!("component" => "Orchestrator")),
            config,
            worker,
            monitor,
            publisher,
            registry,
        }
    }

    pub async fn bootstrap(
        &self,
        target: &Target,
    ) -> Result<ExitCode, BootstrapError> {
        if target.is_empty() {
            return Ok(ExitCode::Success);
        }
        info!(
            self.log,
            "Start bootstrapping nodes in cluster {}",
            target.cluster_name();
            "target" => target.name(),
            "nodes" => target.len(),
        );

        let names: Vec<String> =
            target.nodes().iter().map(|n| n.name.to_string()).collect();
        if let Err(error) = self.registry.clear_entries(&names).await {
            warn!(
                self.log,
                "failed to reset service registry: {}",
                DisplayErrorChain::new(&error);
                "target" => target.name(),
            );
        }

        let result = self.run_session(target).await;
        self.monitor.end_session(target).await;
        result
    }

    async fn run_session(
        &self,
        target: &Target,
    ) -> Result<ExitCode, BootstrapError> {
        self.monitor.start_session(target).await.map_err(|error| {
            BootstrapError::StartSession {
                target: target.name().to_string(),
                error,
            }
        })?;
        self.report(target).await;

        let mut codes = Vec::with_capacity(target.len());
        for (facet, pool) in self.pools(target) {
            if let Some(facet) = &facet {
                info!(self.log, "Bootstrapping machines in facet {facet}";
                    "nodes" => pool.len(),
                );
            }
            let ranges = batch_ranges(pool.len(), self.config.max_concurrent);
            let batches = ranges.len();
            for range in ranges {
                if batches > 1 {
                    info!(
                        self.log,
                        "Bootstrapping machines {} to {} of {}",
                        range.start,
                        range.end - 1,
                        pool.len();
                        "facet" => facet.as_deref().unwrap_or(""),
                    );
                }
                codes.extend(self.run_batch(target, &pool[range]).await);
                if self.monitor.abort_requested(target.cluster_name()).await {
                    warn!(
                        self.log,
                        "a critical node failed; nodes still to be \
                         bootstrapped will see the abort flag";
                        "cluster" => target.cluster_name(),
                    );
                }
            }
        }

        self.report(target).await;
        let result = ExitCode::aggregate(codes);
        info!(
            self.log,
            "Finished bootstrapping nodes in cluster {}",
            target.cluster_name();
            "exit_code" => result.code(),
        );
        Ok(result)
    }

    /// The node pools to bootstrap, in order. By facet, only machines the
    /// cloud knows are taken, and facets left with no nodes are skipped.
    fn pools(
        &self,
        target: &Target,
    ) -> Vec<(Option<String>, Vec<NodeDescriptor>)> {
        if !self.config.bootstrap_by_facet {
            return vec![(None, target.nodes().to_vec())];
        }
        target
            .facet_order()
            .iter()
            .map(|facet| {
                let mut nodes = target.facet_nodes(facet);
                nodes.retain(|node| node.in_cloud);
                (Some(facet.clone()), nodes)
            })
            .filter(|(_, nodes)| !nodes.is_empty())
            .collect()
    }

    /// Bootstrap `batch` concurrently and wait for all of it.
    async fn run_batch(
        &self,
        target: &Target,
        batch: &[NodeDescriptor],
    ) -> Vec<ExitCode> {
        let mut set = BatchTaskSet::new(self.config.stagger());
        for node in batch {
            let worker = self.worker.clone();
            let task_node = node.clone();
            set.spawn(node.clone(), async move {
                worker.bootstrap_node(&task_node).await
            })
            .await;
        }

        let mut codes = Vec::with_capacity(batch.len());
        while let Some((node, result)) = set.join_next().await {
            let code = match result {
                Ok(outcome) => outcome.exit_code,
                Err(join_error) => {
                    error!(
                        self.log,
                        "worker for node {} did not finish: {}",
                        node.name,
                        DisplayErrorChain::new(&join_error);
                        "node" => node.name.to_string(),
                    );
                    let name = node.name.as_str();
                    let outcome = BootstrapOutcome::failure(
                        name,
                        NodeError::bootstrap_failure(name, None),
                    );
                    self.monitor.record_outcome(&node, &outcome).await;
                    outcome.exit_code
                }
            };
            codes.push(code);
            self.report(target).await;
        }
        codes
    }

    async fn report(&self, target: &Target) {
        let snapshot = self.monitor.snapshot(target).await;
        self.publisher.publish_best_effort(&snapshot).await;
    }
}
