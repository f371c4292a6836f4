// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-node provisioning records and the cluster snapshots built from them.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Label stored in `action` while a node is being bootstrapped.
pub const ACTION_BOOTSTRAPPING: &str = "bootstrapping";

/// Progress a node starts a bootstrap session at.
pub const BOOTSTRAP_START_PROGRESS: u8 = 10;

/// Cluster-level error text used when a finished session did not succeed.
pub const ERROR_BOOTSTRAP_FAIL: &str = "Bootstrapping VM failed.";

/// Where a node is in its provisioning life.
///
/// The serialized names are what status consumers already understand and
/// must stay as they are.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
pub enum ProvisionStatus {
    #[default]
    #[serde(rename = "Not Exist")]
    NotExist,
    #[serde(rename = "VM Ready")]
    VmReady,
    #[serde(rename = "Powered On", alias = "poweredOn")]
    PoweredOn,
    #[serde(rename = "Powered Off", alias = "poweredOff")]
    PoweredOff,
    #[serde(rename = "Service Ready")]
    BootstrapSucceeded,
    #[serde(rename = "Bootstrap Failed")]
    BootstrapFailed,
}

impl ProvisionStatus {
    /// Whether a machine in this state is powered on.
    pub fn is_running(self) -> bool {
        matches!(
            self,
            ProvisionStatus::VmReady
                | ProvisionStatus::PoweredOn
                | ProvisionStatus::BootstrapSucceeded
                | ProvisionStatus::BootstrapFailed
        )
    }
}

/// The provisioning sub-record of one node.
///
/// `finished == false` implies `succeed == None`, and a
/// [`ProvisionStatus::BootstrapSucceeded`] status implies the record is
/// finished and succeeded. The transition helpers below keep both true.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeProvisionRecord {
    pub finished: bool,
    pub succeed: Option<bool>,
    pub bootstrapped: bool,
    pub status: ProvisionStatus,
    pub progress: u8,
    pub action: String,
    pub error_msg: String,

    // Identity of the machine as last reported by the cloud. These ride
    // along in published snapshots but are not part of the state machine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rack: Option<String>,
}

impl NodeProvisionRecord {
    /// Reset the state machine to "bootstrap starting", keeping identity.
    pub fn start_bootstrap(&mut self) {
        self.finished = false;
        self.succeed = None;
        self.bootstrapped = false;
        self.status = ProvisionStatus::VmReady;
        self.progress = BOOTSTRAP_START_PROGRESS;
        self.action = ACTION_BOOTSTRAPPING.to_string();
        self.error_msg.clear();
    }

    /// Reset progress tracking ahead of a cloud lifecycle action.
    pub fn start_cloud_action(&mut self) {
        self.finished = false;
        self.succeed = None;
        self.progress = 0;
        self.action.clear();
    }

    pub fn mark_bootstrap_succeeded(&mut self) {
        self.finished = true;
        self.succeed = Some(true);
        self.bootstrapped = true;
        self.status = ProvisionStatus::BootstrapSucceeded;
        self.progress = 100;
        self.action.clear();
        self.error_msg.clear();
    }

    pub fn mark_bootstrap_failed(&mut self, error_msg: String) {
        self.finished = true;
        self.succeed = Some(false);
        self.bootstrapped = false;
        self.status = ProvisionStatus::BootstrapFailed;
        self.progress = 100;
        self.action.clear();
        self.error_msg = error_msg;
    }

    pub fn is_success(&self) -> bool {
        self.finished && self.succeed == Some(true)
    }

    pub fn is_failure(&self) -> bool {
        self.finished && self.succeed != Some(true)
    }
}

/// The nodes of one facet as they appear in a snapshot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FacetGroup {
    pub name: String,
    pub instances: Vec<NodeProvisionRecord>,
}

/// Point-in-time aggregate of the provisioning records of a cluster.
///
/// Always satisfies `success + failure + running == total`,
/// `finished == (running == 0)` and `succeed == (success == total)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClusterProgressSnapshot {
    pub cluster_name: String,
    pub total: usize,
    pub success: usize,
    pub failure: usize,
    pub running: usize,
    pub progress: u8,
    pub finished: bool,
    pub succeed: bool,
    pub error_msg: String,
    pub groups: BTreeMap<String, FacetGroup>,
}

impl ClusterProgressSnapshot {
    /// Aggregate `(facet, record)` pairs into a snapshot.
    ///
    /// Records may come from a store that workers are concurrently writing
    /// to; whatever mix of old and new values is observed, the counts are
    /// derived from the same reads and so stay consistent with each other.
    pub fn from_records<I>(cluster_name: &str, records: I) -> Self
    where
        I: IntoIterator<Item = (String, NodeProvisionRecord)>,
    {
        let mut snapshot = ClusterProgressSnapshot::empty(cluster_name);
        let mut progress_sum: u64 = 0;
        for (facet, record) in records {
            snapshot.total += 1;
            if record.is_success() {
                snapshot.success += 1;
            } else if record.is_failure() {
                snapshot.failure += 1;
            } else {
                snapshot.running += 1;
            }
            progress_sum += u64::from(record.progress.min(100));
            snapshot
                .groups
                .entry(facet.clone())
                .or_insert_with(|| FacetGroup {
                    name: facet,
                    instances: Vec::new(),
                })
                .instances
                .push(record);
        }
        if snapshot.total != 0 {
            // The mean of values in [0, 100] is itself in [0, 100].
            snapshot.progress = (progress_sum / snapshot.total as u64) as u8;
        }
        snapshot.finished = snapshot.running == 0;
        snapshot.succeed = snapshot.success == snapshot.total;
        if snapshot.finished && !snapshot.succeed {
            snapshot.error_msg = ERROR_BOOTSTRAP_FAIL.to_string();
        }
        snapshot
    }

    /// A snapshot with no member records and zeroed counters.
    pub fn empty(cluster_name: &str) -> Self {
        ClusterProgressSnapshot {
            cluster_name: cluster_name.to_string(),
            total: 0,
            success: 0,
            failure: 0,
            running: 0,
            progress: 0,
            finished: false,
            succeed: false,
            error_msg: String::new(),
            groups: BTreeMap::new(),
        }
    }
}
