// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bootstrapping a single node.

use crate::config::ProbeConfig;
use crate::monitor::{BootstrapOutcome, NodeError, ProgressMonitor};
use crate::probe::{probe_with_retries, Prober};
use crate::runner::ConfigurationRunner;
use crate::target::NodeDescriptor;
use display_error_chain::DisplayErrorChain;
use fleet_common::ExitCode;
use slog::{error, info, o, Logger};
use std::sync::Arc;

/// Takes one node from "has an address" to "configuration run finished" and
/// reports how that went to the [`ProgressMonitor`].
///
/// Nothing that goes wrong with the node escapes as an error: every failure
/// becomes a [`BootstrapOutcome`] so sibling workers are unaffected.
pub struct NodeWorker {
    log: Logger,
    prober: Arc<dyn Prober>,
    runner: Arc<dyn ConfigurationRunner>,
    monitor: Arc<ProgressMonitor>,
    probe: ProbeConfig,
    dry_run: bool,
}

impl NodeWorker {
    pub fn new(
        log: &Logger,
        prober: Arc<dyn Prober>,
        runner: Arc<dyn ConfigurationRunner>,
        monitor: Arc<ProgressMonitor>,
        probe: ProbeConfig,
        dry_run: bool,
    ) -> Self {
        NodeWorker {
            log: log.new(o!("component" => "NodeWorker")),
            prober,
            runner,
            monitor,
            probe,
            dry_run,
        }
    }

    pub async fn bootstrap_node(
        &self,
        node: &NodeDescriptor,
    ) -> BootstrapOutcome {
        let log = self.log.new(o!("node" => node.name.to_string()));
        let outcome = self.run(&log, node).await;
        match &outcome.error {
            None => info!(log, "bootstrapped node"),
            Some(err) => error!(log, "{err}";
                "address" => node.address.as_deref().unwrap_or(""),
                "exit_code" => outcome.exit_code.code(),
            ),
        }
        self.monitor.record_outcome(node, &outcome).await;
        outcome
    }

    async fn run(
        &self,
        log: &Logger,
        node: &NodeDescriptor,
    ) -> BootstrapOutcome {
        let name = node.name.as_str();
        let Some(address) = node.address.as_deref().filter(|a| !a.is_empty())
        else {
            return BootstrapOutcome::failure(
                name,
                NodeError::IpNotAvailable { node: name.to_string() },
            );
        };

        if self.dry_run {
            info!(log, "dry run, not bootstrapping node"; "address" => address);
            return BootstrapOutcome::success(name);
        }

        let probe =
            probe_with_retries(log, self.prober.as_ref(), address, &self.probe)
                .await;
        if !probe.is_reachable() {
            return BootstrapOutcome::failure(
                name,
                NodeError::CannotSshToNode {
                    node: name.to_string(),
                    address: address.to_string(),
                },
            );
        }

        info!(log, "running configuration pass"; "address" => address);
        match self.runner.run(node).await {
            Ok(run) => match ExitCode::from_run_status(run.exit_code) {
                ExitCode::Success => BootstrapOutcome::success(name),
                _ => BootstrapOutcome::failure(
                    name,
                    NodeError::bootstrap_failure(name, run.message),
                ),
            },
            Err(err) => {
                error!(
                    log,
                    "configuration run failed: {}",
                    DisplayErrorChain::new(&err);
                    "address" => address,
                    "roles" => ?node.roles,
                );
                BootstrapOutcome::failure(
                    name,
                    NodeError::bootstrap_failure(name, None),
                )
            }
        }
    }
}
