// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tracking provisioning progress of the nodes of a cluster.
//!
//! The [`ProgressMonitor`] is the only component that writes node
//! provisioning records and the cluster abort flag. Workers report
//! outcomes to it; the cloud lifecycle driver feeds it task progress.
//! Both get back [`ClusterProgressSnapshot`]s to publish.
//!
//! Apart from starting a session, store failures here are logged and
//! otherwise ignored: losing track of progress must never stop nodes from
//! being bootstrapped.

use crate::cloud::{ServerDescriptor, TaskProgress};
use crate::record::{
    ClusterProgressSnapshot, NodeProvisionRecord, ProvisionStatus,
};
use crate::store::{AbortSignalStore, StateStore, StoreError};
use crate::target::{NodeDescriptor, Target};
use display_error_chain::DisplayErrorChain;
use fleet_common::ExitCode;
use slog::{debug, info, o, warn, Logger};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;

/// Why a node could not be bootstrapped.
///
/// The messages are shown to whoever runs the bootstrap, so they name the
/// node and say what to do next.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NodeError {
    #[error(
        "Cannot bootstrap node {node} because it does not have an IP address."
    )]
    IpNotAvailable { node: String },
    #[error(
        "Unable to SSH to node {node} with the IP address {address}, so \
         cannot bootstrap the node."
    )]
    CannotSshToNode { node: String, address: String },
    #[error("{message}")]
    BootstrapFailure { node: String, message: String },
}

impl NodeError {
    /// A failed configuration run, with the runner's message if it had one.
    pub fn bootstrap_failure(node: &str, message: Option<String>) -> Self {
        let message = message.unwrap_or_else(|| {
            format!(
                "Cannot bootstrap node {node}. SSH to this node and run the \
                 command 'sudo chef-client' to view error messages."
            )
        });
        NodeError::BootstrapFailure { node: node.to_string(), message }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            NodeError::IpNotAvailable { .. } => ExitCode::IpNotAvailable,
            NodeError::CannotSshToNode { .. } => ExitCode::CannotSshToNode,
            NodeError::BootstrapFailure { .. } => ExitCode::BootstrapFailure,
        }
    }
}

/// What one worker reports about its node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootstrapOutcome {
    pub node: String,
    pub exit_code: ExitCode,
    pub error: Option<NodeError>,
}

impl BootstrapOutcome {
    pub fn success(node: &str) -> Self {
        BootstrapOutcome {
            node: node.to_string(),
            exit_code: ExitCode::Success,
            error: None,
        }
    }

    pub fn failure(node: &str, error: NodeError) -> Self {
        BootstrapOutcome {
            node: node.to_string(),
            exit_code: error.exit_code(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_code.is_success()
    }
}

pub struct ProgressMonitor {
    log: Logger,
    store: Arc<dyn StateStore>,
    flags: Arc<dyn AbortSignalStore>,
    critical_roles: BTreeSet<String>,
}

impl ProgressMonitor {
    pub fn new(
        log: &Logger,
        store: Arc<dyn StateStore>,
        flags: Arc<dyn AbortSignalStore>,
        critical_roles: BTreeSet<String>,
    ) -> Self {
        ProgressMonitor {
            log: log.new(o!("component" => "ProgressMonitor")),
            store,
            flags,
            critical_roles,
        }
    }

    /// Current record of `node`, or a fresh one naming it.
    async fn load_or_default(&self, node: &str) -> NodeProvisionRecord {
        let record = match self.store.load(node).await {
            Ok(record) => record,
            Err(error) => {
                warn!(
                    self.log,
                    "failed to read provisioning record: {}",
                    DisplayErrorChain::new(&error);
                    "node" => node,
                );
                None
            }
        };
        let mut record = record.unwrap_or_default();
        if record.name.is_none() {
            record.name = Some(node.to_string());
        }
        record
    }

    async fn save_best_effort(&self, node: &str, record: &NodeProvisionRecord) {
        if let Err(error) = self.store.save(node, record).await {
            warn!(
                self.log,
                "failed to save provisioning record: {}",
                DisplayErrorChain::new(&error);
                "node" => node,
            );
        }
    }

    /// Reset every node of `target` to "bootstrap starting" and clear the
    /// cluster's abort flag.
    ///
    /// Unlike the other operations, a store failure here is returned: a
    /// session that cannot record its start has nothing to report on.
    pub async fn start_session(
        &self,
        target: &Target,
    ) -> Result<(), StoreError> {
        debug!(self.log, "initializing bootstrap progress";
            "target" => target.name(),
        );
        for node in target.nodes() {
            let name = node.name.as_str();
            let mut record = self.store.load(name).await?.unwrap_or_default();
            record.name.get_or_insert_with(|| name.to_string());
            record.start_bootstrap();
            self.store.save(name, &record).await?;
        }
        self.flags.set_abort(target.cluster_name(), false).await
    }

    /// Fold one worker's outcome into its node's record, raising the abort
    /// flag if a node with a critical role failed.
    pub async fn record_outcome(
        &self,
        node: &NodeDescriptor,
        outcome: &BootstrapOutcome,
    ) {
        let name = node.name.as_str();
        let mut record = self.load_or_default(name).await;
        if outcome.is_success() {
            record.mark_bootstrap_succeeded();
        } else {
            let message = match &outcome.error {
                Some(error) => error.to_string(),
                None => NodeError::bootstrap_failure(name, None).to_string(),
            };
            record.mark_bootstrap_failed(message);
        }
        self.save_best_effort(name, &record).await;

        if !outcome.is_success() {
            self.evaluate_abort(node).await;
        }
    }

    async fn evaluate_abort(&self, node: &NodeDescriptor) {
        let Some(role) =
            node.roles.iter().find(|role| self.critical_roles.contains(*role))
        else {
            return;
        };
        let cluster = node.name.cluster();
        match self.flags.get_abort(cluster).await {
            Ok(Some(true)) => return,
            Ok(_) => (),
            Err(error) => {
                warn!(
                    self.log,
                    "failed to read abort flag: {}",
                    DisplayErrorChain::new(&error);
                    "cluster" => cluster,
                );
            }
        }
        info!(
            self.log,
            "aborting bootstrap of cluster {cluster}: node {} with role \
             {role} failed",
            node.name;
            "cluster" => cluster,
            "role" => role,
        );
        if let Err(error) = self.flags.set_abort(cluster, true).await {
            warn!(
                self.log,
                "failed to raise abort flag: {}",
                DisplayErrorChain::new(&error);
                "cluster" => cluster,
            );
        }
    }

    /// Clear the abort flag at the end of a session, however it ended.
    pub async fn end_session(&self, target: &Target) {
        let cluster = target.cluster_name();
        if let Err(error) = self.flags.set_abort(cluster, false).await {
            warn!(
                self.log,
                "failed to clear abort flag: {}",
                DisplayErrorChain::new(&error);
                "cluster" => cluster,
            );
        }
    }

    /// Whether a critical node of `cluster` has failed in this session.
    pub async fn abort_requested(&self, cluster: &str) -> bool {
        match self.flags.get_abort(cluster).await {
            Ok(flag) => flag.unwrap_or(false),
            Err(error) => {
                warn!(
                    self.log,
                    "failed to read abort flag: {}",
                    DisplayErrorChain::new(&error);
                    "cluster" => cluster,
                );
                false
            }
        }
    }

    /// Aggregate the current records of every node of `target`.
    pub async fn snapshot(&self, target: &Target) -> ClusterProgressSnapshot {
        let mut records = Vec::with_capacity(target.len());
        for node in target.nodes() {
            let record = self.load_or_default(node.name.as_str()).await;
            records.push((node.facet.clone(), record));
        }
        ClusterProgressSnapshot::from_records(target.cluster_name(), records)
    }

    /// Reset progress tracking ahead of a cloud action on `target`.
    pub async fn start_progress(
        &self,
        target: &Target,
    ) -> Result<(), StoreError> {
        debug!(self.log, "initializing progress"; "target" => target.name());
        for node in target.nodes() {
            let name = node.name.as_str();
            let mut record = self.store.load(name).await?.unwrap_or_default();
            record.name.get_or_insert_with(|| name.to_string());
            record.start_cloud_action();
            self.store.save(name, &record).await?;
        }
        Ok(())
    }

    /// Fold the progress of a cloud task into the records of `target`.
    ///
    /// When the action is followed by a bootstrap (`is_last_action` is
    /// false) the cloud's share of the progress is halved and completed
    /// machines stay unfinished. Nodes whose progress and action have not
    /// moved are not rewritten, and if no node moved there is nothing to
    /// report.
    pub async fn record_task_progress(
        &self,
        target: &Target,
        progress: &TaskProgress,
        is_last_action: bool,
    ) -> Option<ClusterProgressSnapshot> {
        let result = &progress.result;
        if result.servers.is_empty() || (progress.finished && !result.succeed)
        {
            return Some(self.task_summary(target, progress));
        }

        let mut changed = false;
        for server in &result.servers {
            if !target.contains(&server.name) {
                continue;
            }
            let mut record = server.to_record();
            if !is_last_action {
                record.progress = server.progress.min(100) / 2;
                if record.is_success() {
                    record.finished = false;
                    record.succeed = None;
                }
            }

            let stored = match self.store.load(&server.name).await {
                Ok(stored) => stored,
                Err(error) => {
                    warn!(
                        self.log,
                        "failed to read provisioning record: {}",
                        DisplayErrorChain::new(&error);
                        "node" => &server.name,
                    );
                    None
                }
            };
            if stored.is_some_and(|stored| {
                stored.progress == record.progress
                    && stored.action == record.action
            }) {
                debug!(self.log, "no progress on node, skipping update";
                    "node" => &server.name,
                );
                continue;
            }
            changed = true;
            self.save_best_effort(&server.name, &record).await;
        }

        if changed {
            Some(self.snapshot(target).await)
        } else {
            debug!(self.log, "no progress on cluster, skipping report";
                "target" => target.name(),
            );
            None
        }
    }

    /// Task-level view of a cloud action, without per-node detail. The
    /// counts are the control plane's own.
    pub fn task_summary(
        &self,
        target: &Target,
        progress: &TaskProgress,
    ) -> ClusterProgressSnapshot {
        let result = &progress.result;
        let mut snapshot =
            ClusterProgressSnapshot::empty(target.cluster_name());
        snapshot.total = result.total;
        snapshot.success = result.success;
        snapshot.failure = result.failure;
        snapshot.running = result.running;
        snapshot.progress = progress.percent.min(100);
        snapshot.finished = progress.finished;
        snapshot.succeed = result.succeed;
        snapshot.error_msg = result.error_msg.clone();
        snapshot
    }

    /// The report sent as an action's last word: every node accounted for,
    /// no per-node detail.
    pub fn final_result(
        &self,
        target: &Target,
        succeed: bool,
    ) -> ClusterProgressSnapshot {
        let mut snapshot =
            ClusterProgressSnapshot::empty(target.cluster_name());
        snapshot.total = target.len();
        snapshot.success = target.len();
        snapshot.progress = 100;
        snapshot.finished = true;
        snapshot.succeed = succeed;
        snapshot
    }

    /// Record what the cloud currently says about each node of `target` and
    /// report the result as a completed snapshot.
    pub async fn sync_cluster_status(
        &self,
        target: &Target,
        servers: &[ServerDescriptor],
    ) -> ClusterProgressSnapshot {
        let mut records = Vec::with_capacity(target.len());
        for node in target.nodes() {
            let name = node.name.as_str();
            let mut record = self.load_or_default(name).await;
            match servers.iter().find(|s| s.name == name) {
                None => record.status = ProvisionStatus::NotExist,
                Some(server) if !server.is_running() => {
                    record.status = ProvisionStatus::PoweredOff;
                    merge_server(&mut record, server);
                }
                Some(server) => {
                    // Running machines keep their bootstrap status.
                    if !record.status.is_running() {
                        record.status =
                            server.status.unwrap_or(ProvisionStatus::PoweredOn);
                    }
                    merge_server(&mut record, server);
                }
            }
            self.save_best_effort(name, &record).await;
            records.push((node.facet.clone(), record));
        }

        let mut snapshot = ClusterProgressSnapshot::from_records(
            target.cluster_name(),
            records,
        );
        snapshot.total = target.len();
        snapshot.success = target.len();
        snapshot.failure = 0;
        snapshot.running = 0;
        snapshot.progress = 100;
        snapshot.finished = true;
        snapshot.succeed = !target.is_empty();
        snapshot.error_msg.clear();
        snapshot
    }
}

/// Copy what the cloud knows about a machine's placement into its record.
/// The machine's in-flight `action` is not carried over.
fn merge_server(record: &mut NodeProvisionRecord, server: &ServerDescriptor) {
    record.progress = server.progress.min(100);
    if server.hostname.is_some() {
        record.hostname = server.hostname.clone();
    }
    if server.ip_address.is_some() {
        record.ip_address = server.ip_address.clone();
    }
    if server.rack.is_some() {
        record.rack = server.rack.clone();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cloud::TaskResult;
    use crate::definition::test::definition_file;
    use crate::store::InMemoryStore;
    use fleet_test_utils::dev::test_setup_log;

    fn target() -> Target {
        let file = definition_file();
        Target::select(
            &file.cluster_definition,
            &file.servers(),
            &"hadoop".parse().unwrap(),
        )
        .unwrap()
    }

    fn monitor(log: &Logger, store: &Arc<InMemoryStore>) -> ProgressMonitor {
        ProgressMonitor::new(
            log,
            store.clone(),
            store.clone(),
            ["hadoop_namenode".to_string()].into_iter().collect(),
        )
    }

    #[test]
    fn node_error_messages() {
        let err = NodeError::IpNotAvailable { node: "hadoop-worker-1".into() };
        assert_eq!(
            err.to_string(),
            "Cannot bootstrap node hadoop-worker-1 because it does not have \
             an IP address."
        );
        assert_eq!(err.exit_code().code(), 31);

        let err = NodeError::CannotSshToNode {
            node: "hadoop-worker-0".into(),
            address: "10.0.0.20".into(),
        };
        assert_eq!(
            err.to_string(),
            "Unable to SSH to node hadoop-worker-0 with the IP address \
             10.0.0.20, so cannot bootstrap the node."
        );
        assert_eq!(err.exit_code().code(), 32);

        let err = NodeError::bootstrap_failure("hadoop-master-0", None);
        assert_eq!(
            err.to_string(),
            "Cannot bootstrap node hadoop-master-0. SSH to this node and run \
             the command 'sudo chef-client' to view error messages."
        );
        let err = NodeError::bootstrap_failure(
            "hadoop-master-0",
            Some("disk full".to_string()),
        );
        assert_eq!(err.to_string(), "disk full");
        assert_eq!(err.exit_code(), ExitCode::BootstrapFailure);
    }

    #[tokio::test]
    async fn start_session_is_idempotent() {
        let logctx = test_setup_log("start_session_is_idempotent");
        let store = Arc::new(InMemoryStore::new());
        let monitor = monitor(&logctx.log, &store);
        let target = target();

        monitor.start_session(&target).await.unwrap();
        let first = store.records();
        let node = target.node("hadoop-master-0").unwrap();
        monitor
            .record_outcome(
                node,
                &BootstrapOutcome::failure(
                    "hadoop-master-0",
                    NodeError::bootstrap_failure("hadoop-master-0", None),
                ),
            )
            .await;
        assert!(monitor.abort_requested("hadoop").await);

        monitor.start_session(&target).await.unwrap();
        assert_eq!(store.records(), first);
        assert!(!monitor.abort_requested("hadoop").await);

        assert_eq!(first.len(), 3);
        for record in first.values() {
            assert!(!record.finished);
            assert_eq!(record.succeed, None);
            assert!(!record.bootstrapped);
            assert_eq!(record.status, ProvisionStatus::VmReady);
            assert_eq!(record.progress, 10);
            assert_eq!(record.action, "bootstrapping");
            assert_eq!(record.error_msg, "");
        }
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn outcomes_and_abort() {
        let logctx = test_setup_log("outcomes_and_abort");
        let store = Arc::new(InMemoryStore::new());
        let monitor = monitor(&logctx.log, &store);
        let target = target();
        monitor.start_session(&target).await.unwrap();

        let snapshot = monitor.snapshot(&target).await;
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.running, 3);
        assert_eq!(snapshot.progress, 10);
        assert!(!snapshot.finished);

        // A worker without a critical role fails: no abort.
        let worker = target.node("hadoop-worker-0").unwrap();
        monitor
            .record_outcome(
                worker,
                &BootstrapOutcome::failure(
                    "hadoop-worker-0",
                    NodeError::CannotSshToNode {
                        node: "hadoop-worker-0".into(),
                        address: "10.0.0.20".into(),
                    },
                ),
            )
            .await;
        assert!(!monitor.abort_requested("hadoop").await);
        let record = &store.records()["hadoop-worker-0"];
        assert_eq!(record.status, ProvisionStatus::BootstrapFailed);
        assert!(record.error_msg.contains("10.0.0.20"));

        let master = target.node("hadoop-master-0").unwrap();
        monitor
            .record_outcome(master, &BootstrapOutcome::success("hadoop-master-0"))
            .await;
        let record = &store.records()["hadoop-master-0"];
        assert_eq!(record.status, ProvisionStatus::BootstrapSucceeded);
        assert!(record.bootstrapped);

        // The master then fails in a later pass: abort, and it sticks.
        monitor
            .record_outcome(
                master,
                &BootstrapOutcome::failure(
                    "hadoop-master-0",
                    NodeError::bootstrap_failure("hadoop-master-0", None),
                ),
            )
            .await;
        assert!(monitor.abort_requested("hadoop").await);
        monitor
            .record_outcome(
                worker,
                &BootstrapOutcome::success("hadoop-worker-0"),
            )
            .await;
        assert!(monitor.abort_requested("hadoop").await);

        let snapshot = monitor.snapshot(&target).await;
        assert_eq!(
            (snapshot.success, snapshot.failure, snapshot.running),
            (1, 1, 1)
        );
        assert!(!snapshot.finished);
        assert_eq!(snapshot.groups["worker"].instances.len(), 2);

        monitor.end_session(&target).await;
        assert!(!monitor.abort_requested("hadoop").await);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn snapshot_names_missing_records() {
        let logctx = test_setup_log("snapshot_names_missing_records");
        let store = Arc::new(InMemoryStore::new());
        let monitor = monitor(&logctx.log, &store);
        let snapshot = monitor.snapshot(&target()).await;
        assert_eq!(snapshot.total, 3);
        assert_eq!(snapshot.running, 3);
        assert_eq!(snapshot.error_msg, "");
        let names: Vec<_> = snapshot.groups["worker"]
            .instances
            .iter()
            .map(|r| r.name.clone().unwrap())
            .collect();
        assert_eq!(names, ["hadoop-worker-0", "hadoop-worker-1"]);
        logctx.cleanup_successful();
    }

    fn server(name: &str, progress: u8, action: &str) -> ServerDescriptor {
        ServerDescriptor {
            name: name.to_string(),
            hostname: None,
            ip_address: Some("10.0.0.1".to_string()),
            status: Some(ProvisionStatus::PoweredOn),
            action: action.to_string(),
            progress,
            rack: None,
        }
    }

    fn task(servers: Vec<ServerDescriptor>, finished: bool) -> TaskProgress {
        let total = servers.len();
        TaskProgress {
            percent: if finished { 100 } else { 40 },
            finished,
            result: TaskResult {
                servers,
                succeed: true,
                total,
                success: 0,
                failure: 0,
                running: total,
                error_msg: String::new(),
            },
        }
    }

    #[tokio::test]
    async fn task_progress_skips_unchanged_nodes() {
        let logctx = test_setup_log("task_progress_skips_unchanged_nodes");
        let store = Arc::new(InMemoryStore::new());
        let monitor = monitor(&logctx.log, &store);
        let target = target();
        monitor.start_progress(&target).await.unwrap();
        let saves = store.save_count();

        let progress = task(
            vec![
                server("hadoop-master-0", 40, "Creating VM"),
                server("hadoop-worker-0", 40, "Creating VM"),
                server("hadoop-worker-1", 40, "Creating VM"),
                server("hbase-master-0", 40, "Creating VM"),
            ],
            false,
        );
        let snapshot =
            monitor.record_task_progress(&target, &progress, false).await;
        let snapshot = snapshot.expect("first poll reports");
        assert_eq!(store.save_count(), saves + 3);
        assert_eq!(snapshot.progress, 20);
        assert_eq!(snapshot.running, 3);

        // Same poll again: nothing written, nothing to report.
        let snapshot =
            monitor.record_task_progress(&target, &progress, false).await;
        assert_eq!(snapshot, None);
        assert_eq!(store.save_count(), saves + 3);

        // Completed machines stay unfinished when a bootstrap follows.
        let progress = task(
            vec![
                server("hadoop-master-0", 100, ""),
                server("hadoop-worker-0", 100, ""),
                server("hadoop-worker-1", 100, ""),
            ],
            true,
        );
        let snapshot = monitor
            .record_task_progress(&target, &progress, false)
            .await
            .unwrap();
        assert_eq!(snapshot.progress, 50);
        assert_eq!(snapshot.running, 3);
        assert!(!snapshot.finished);

        // As the last action, completed machines are done.
        let snapshot = monitor
            .record_task_progress(&target, &progress, true)
            .await
            .unwrap();
        assert_eq!(snapshot.progress, 100);
        assert_eq!(snapshot.success, 3);
        assert!(snapshot.succeed);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn failed_task_reports_summary() {
        let logctx = test_setup_log("failed_task_reports_summary");
        let store = Arc::new(InMemoryStore::new());
        let monitor = monitor(&logctx.log, &store);
        let target = target();

        let mut progress = task(vec![server("hadoop-master-0", 100, "")], true);
        progress.result.succeed = false;
        progress.result.failure = 1;
        progress.result.running = 0;
        progress.result.error_msg = "out of capacity".to_string();
        let snapshot = monitor
            .record_task_progress(&target, &progress, true)
            .await
            .unwrap();
        assert!(snapshot.groups.is_empty());
        assert_eq!(snapshot.failure, 1);
        assert_eq!(snapshot.error_msg, "out of capacity");
        assert_eq!(store.save_count(), 0);

        let snapshot = monitor
            .record_task_progress(&target, &task(Vec::new(), false), false)
            .await
            .unwrap();
        assert_eq!(snapshot.total, 0);
        assert_eq!(snapshot.progress, 40);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn final_result_and_status_sync() {
        let logctx = test_setup_log("final_result_and_status_sync");
        let store = Arc::new(InMemoryStore::new());
        let monitor = monitor(&logctx.log, &store);
        let target = target();

        let result = monitor.final_result(&target, false);
        assert_eq!((result.total, result.success), (3, 3));
        assert!(result.finished && !result.succeed);
        assert_eq!(result.progress, 100);
        assert!(result.groups.is_empty());

        let mut stopped = server("hadoop-worker-0", 100, "");
        stopped.status = Some(ProvisionStatus::PoweredOff);
        let servers = vec![server("hadoop-master-0", 100, ""), stopped];
        let snapshot = monitor.sync_cluster_status(&target, &servers).await;
        assert!(snapshot.finished && snapshot.succeed);
        assert_eq!(snapshot.total, 3);
        let records = store.records();
        assert_eq!(
            records["hadoop-master-0"].status,
            ProvisionStatus::PoweredOn
        );
        assert_eq!(
            records["hadoop-worker-0"].status,
            ProvisionStatus::PoweredOff
        );
        assert_eq!(
            records["hadoop-worker-1"].status,
            ProvisionStatus::NotExist
        );
        assert_eq!(snapshot.groups["master"].instances.len(), 1);
        logctx.cleanup_successful();
    }

    #[tokio::test]
    async fn status_sync_keeps_bootstrap_status() {
        let logctx = test_setup_log("status_sync_keeps_bootstrap_status");
        let store = Arc::new(InMemoryStore::new());
        let monitor = monitor(&logctx.log, &store);
        let target = target();
        monitor.start_session(&target).await.unwrap();
        let master = target.node("hadoop-master-0").unwrap();
        let outcome = BootstrapOutcome::success("hadoop-master-0");
        monitor.record_outcome(master, &outcome).await;

        let mut rebooting = server("hadoop-master-0", 100, "Rebooting VM");
        rebooting.hostname = Some("master0.hadoop.local".to_string());
        let servers = vec![
            rebooting,
            server("hadoop-worker-0", 100, "Powering on VM"),
            server("hadoop-worker-1", 100, ""),
        ];
        monitor.sync_cluster_status(&target, &servers).await;
        monitor.sync_cluster_status(&target, &servers).await;

        let records = store.records();
        let record = &records["hadoop-master-0"];
        assert_eq!(record.status, ProvisionStatus::BootstrapSucceeded);
        assert!(record.bootstrapped);
        assert_eq!(record.action, "");
        assert_eq!(record.hostname.as_deref(), Some("master0.hadoop.local"));
        assert_eq!(record.ip_address.as_deref(), Some("10.0.0.1"));

        // Still mid-session, never bootstrapped: the session status stays.
        let record = &records["hadoop-worker-0"];
        assert_eq!(record.status, ProvisionStatus::VmReady);
        assert_eq!(record.action, "bootstrapping");
        logctx.cleanup_successful();
    }
}
