// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster lifecycle actions driven through [`Fleet`], the way the
//! command-line tool drives them.

use fleet_bootstrap::bus::RecordingBus;
use fleet_bootstrap::cloud::{CloudControlPlane, StaticCloud};
use fleet_bootstrap::fakes::{FakeCloud, FakeProber, FakeRunner};
use fleet_bootstrap::lifecycle::LifecycleAction;
use fleet_bootstrap::record::ProvisionStatus;
use fleet_bootstrap::store::InMemoryStore;
use fleet_bootstrap::target::SliceError;
use fleet_bootstrap::{Collaborators, Config, DefinitionFile, Fleet};
use fleet_common::ExitCode;
use fleet_test_utils::dev::test_setup_log;
use serde_json::json;
use slog::Logger;
use std::sync::Arc;

const CONFIG: &str = r#"
[log]
mode = "stderr-terminal"
level = "info"

[bootstrap]
stagger_ms = 0

[bootstrap.probe]
attempts = 1
interval_secs = 0

[monitor]
critical_roles = ["zookeeper"]
"#;

fn definition() -> DefinitionFile {
    serde_json::from_value(json!({
        "cluster_definition": {
            "name": "zk",
            "owner": "ops",
            "groups": [
                {"name": "ensemble", "roles": ["zookeeper"], "instance_num": 3}
            ]
        },
        "cluster_data": {
            "groups": [{
                "name": "ensemble",
                "instances": [
                    {"name": "zk-ensemble-0", "ip_address": "192.168.0.10"},
                    {"name": "zk-ensemble-1", "ip_address": "192.168.0.11"},
                    {"name": "zk-ensemble-2", "ip_address": "192.168.0.12"}
                ]
            }]
        }
    }))
    .unwrap()
}

struct Harness {
    store: Arc<InMemoryStore>,
    bus: Arc<RecordingBus>,
    runner: Arc<FakeRunner>,
    fleet: Fleet,
}

fn harness(log: &Logger, cloud: Option<Arc<dyn CloudControlPlane>>) -> Harness {
    let config: Config = toml::from_str(CONFIG).unwrap();
    let definition = definition();
    definition.validate().unwrap();

    let store = Arc::new(InMemoryStore::new());
    let bus = Arc::new(RecordingBus::new());
    let runner = Arc::new(FakeRunner::new());
    let cloud = cloud
        .unwrap_or_else(|| Arc::new(StaticCloud::new(definition.servers())));
    let collaborators = Collaborators {
        store: store.clone(),
        flags: store.clone(),
        registry: store.clone(),
        bus: bus.clone(),
        prober: Arc::new(FakeProber::new()),
        runner: runner.clone(),
        cloud,
    };
    let fleet = Fleet::new(log, &config, definition, collaborators);
    Harness { store, bus, runner, fleet }
}

fn statuses(store: &InMemoryStore) -> Vec<ProvisionStatus> {
    store.records().values().map(|record| record.status).collect()
}

#[tokio::test]
async fn create_bootstraps_new_machines() {
    let logctx = test_setup_log("create_bootstraps_new_machines");
    let h = harness(&logctx.log, None);
    let mut target = h.fleet.target("zk").unwrap();
    assert_eq!(target.len(), 3);

    let code =
        h.fleet.run_action(LifecycleAction::Create, &mut target).await.unwrap();
    assert_eq!(code, ExitCode::Success);
    assert_eq!(h.runner.run_count(), 3);
    assert!(h.store.records().values().all(|record| record.bootstrapped));

    let last = h.bus.last_payload().unwrap();
    assert_eq!(last["success"], 3);
    assert_eq!(last["finished"], true);
    assert_eq!(last["cluster_data"]["owner"], "ops");

    h.fleet.publish_final_result(&target, true).await;
    let last = h.bus.last_payload().unwrap();
    assert_eq!(last["total"], 3);
    assert_eq!(last["success"], 3);
    assert_eq!(last["progress"], 100);
    assert_eq!(last["cluster_data"], json!({"name": "zk"}));
    logctx.cleanup_successful();
}

#[tokio::test]
async fn start_without_bootstrap_skips_configuration() {
    let logctx = test_setup_log("start_without_bootstrap_skips_configuration");
    let h = harness(&logctx.log, None);
    let mut target = h.fleet.target("zk-ensemble-0,2").unwrap();
    assert_eq!(target.len(), 2);

    let code = h
        .fleet
        .run_action(LifecycleAction::Start { bootstrap: false }, &mut target)
        .await
        .unwrap();
    assert_eq!(code, ExitCode::Success);
    assert_eq!(h.runner.run_count(), 0);

    let records = h.store.records();
    assert_eq!(records.len(), 2);
    assert!(records.values().all(|record| record.is_success()));
    assert!(!records.contains_key("zk-ensemble-1"));
    assert!(h.store.run_flag_writes().is_empty());
    logctx.cleanup_successful();
}

fn flag_writes(nodes: &[&str], driven: bool) -> Vec<(String, bool)> {
    nodes.iter().map(|node| (node.to_string(), driven)).collect()
}

#[tokio::test]
async fn start_with_bootstrap_brackets_the_run_flag() {
    let logctx = test_setup_log("start_with_bootstrap_brackets_the_run_flag");
    let h = harness(&logctx.log, None);
    let mut target = h.fleet.target("zk-ensemble-1..2").unwrap();

    let code = h
        .fleet
        .run_action(LifecycleAction::Start { bootstrap: true }, &mut target)
        .await
        .unwrap();
    assert_eq!(code, ExitCode::Success);
    assert_eq!(h.runner.run_count(), 2);

    let nodes = ["zk-ensemble-1", "zk-ensemble-2"];
    let mut expected = flag_writes(&nodes, true);
    expected.extend(flag_writes(&nodes, false));
    assert_eq!(h.store.run_flag_writes(), expected);
    logctx.cleanup_successful();
}

#[tokio::test]
async fn config_reapplies_settings_without_bootstrap() {
    let logctx = test_setup_log("config_reapplies_settings_without_bootstrap");
    let h = harness(&logctx.log, None);
    let mut target = h.fleet.target("zk").unwrap();

    let code = h
        .fleet
        .run_action(LifecycleAction::Config, &mut target)
        .await
        .unwrap();
    assert_eq!(code, ExitCode::Success);
    assert_eq!(h.runner.run_count(), 0);
    assert!(h.store.run_flag_writes().is_empty());
    assert!(h.store.records().values().all(|record| record.is_success()));

    let last = h.bus.last_payload().unwrap();
    assert_eq!(last["total"], 3);
    assert_eq!(last["success"], 3);
    assert_eq!(last["finished"], true);

    let rejected = harness(
        &logctx.log,
        Some(Arc::new(FakeCloud::rejecting("maintenance window"))),
    );
    let err = rejected
        .fleet
        .run_action(LifecycleAction::Config, &mut target)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), ExitCode::Failure);
    logctx.cleanup_successful();
}

#[tokio::test]
async fn status_follows_the_cloud() {
    let logctx = test_setup_log("status_follows_the_cloud");
    let h = harness(&logctx.log, None);
    let mut target = h.fleet.target("zk").unwrap();

    let code =
        h.fleet.run_action(LifecycleAction::Stop, &mut target).await.unwrap();
    assert_eq!(code, ExitCode::Success);
    let snapshot = h.fleet.report_status(&target).await.unwrap();
    assert_eq!(snapshot.total, 3);
    assert!(snapshot.succeed);
    assert!(snapshot.finished);
    assert!(statuses(&h.store)
        .iter()
        .all(|status| *status == ProvisionStatus::PoweredOff));

    let code = h
        .fleet
        .run_action(LifecycleAction::Destroy, &mut target)
        .await
        .unwrap();
    assert_eq!(code, ExitCode::Success);
    h.fleet.report_status(&target).await.unwrap();
    assert!(statuses(&h.store)
        .iter()
        .all(|status| *status == ProvisionStatus::NotExist));
    logctx.cleanup_successful();
}

#[tokio::test]
async fn rejected_start_maps_to_start_failure() {
    let logctx = test_setup_log("rejected_start_maps_to_start_failure");
    let h = harness(
        &logctx.log,
        Some(Arc::new(FakeCloud::rejecting("out of capacity"))),
    );
    let mut target = h.fleet.target("zk").unwrap();

    let err = h
        .fleet
        .run_action(LifecycleAction::Start { bootstrap: true }, &mut target)
        .await
        .unwrap_err();
    assert_eq!(err.exit_code(), ExitCode::StartFailure);
    assert_eq!(h.runner.run_count(), 0);

    // The flag comes back down even though the start never ran.
    let nodes = ["zk-ensemble-0", "zk-ensemble-1", "zk-ensemble-2"];
    let mut expected = flag_writes(&nodes, true);
    expected.extend(flag_writes(&nodes, false));
    assert_eq!(h.store.run_flag_writes(), expected);
    logctx.cleanup_successful();
}

#[test]
fn slices_must_name_the_cluster() {
    let logctx = test_setup_log("slices_must_name_the_cluster");
    let h = harness(&logctx.log, None);
    assert!(matches!(
        h.fleet.target("hbase-master"),
        Err(SliceError::WrongCluster { .. })
    ));
    assert!(matches!(
        h.fleet.target("zk-observer"),
        Err(SliceError::UnknownFacet { .. })
    ));
    logctx.cleanup_successful();
}
