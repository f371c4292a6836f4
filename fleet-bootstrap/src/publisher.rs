// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Delivering progress snapshots to the status bus.

use crate::bus::{BusConnector, BusError};
use crate::config::BusConfig;
use crate::definition::ClusterDefinition;
use crate::record::ClusterProgressSnapshot;
use display_error_chain::DisplayErrorChain;
use serde_json::{Map, Value};
use slog::{debug, o, warn, Logger};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize status of cluster {cluster}")]
    Serialize {
        cluster: String,
        #[source]
        error: serde_json::Error,
    },
    #[error(transparent)]
    Bus(#[from] BusError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Monitoring is disabled; nothing was sent.
    Disabled,
    /// Same payload as the last one sent for this cluster.
    Unchanged,
    Published,
}

/// Sends snapshots to the bus, skipping any that would repeat the last
/// payload sent for the same cluster.
///
/// The "last sent" cache lives in the publisher, so a new process always
/// publishes at least once.
pub struct StatusPublisher {
    log: Logger,
    connector: Arc<dyn BusConnector>,
    config: BusConfig,
    disabled: bool,
    definition: Option<ClusterDefinition>,
    last_published: Mutex<BTreeMap<String, String>>,
}

impl StatusPublisher {
    pub fn new(
        log: &Logger,
        connector: Arc<dyn BusConnector>,
        config: BusConfig,
        disabled: bool,
    ) -> Self {
        StatusPublisher {
            log: log.new(o!("component" => "StatusPublisher")),
            connector,
            config,
            disabled,
            definition: None,
            last_published: Mutex::new(BTreeMap::new()),
        }
    }

    /// Merge the static shape of `definition` into every published
    /// snapshot that carries per-node detail.
    pub fn with_definition(mut self, definition: ClusterDefinition) -> Self {
        self.definition = Some(definition);
        self
    }

    pub async fn publish(
        &self,
        snapshot: &ClusterProgressSnapshot,
    ) -> Result<PublishOutcome, PublishError> {
        if self.disabled {
            warn!(self.log, "monitoring is disabled, not publishing status";
                "cluster" => &snapshot.cluster_name,
            );
            return Ok(PublishOutcome::Disabled);
        }

        let payload = serde_json::to_string(&self.build_payload(snapshot))
            .map_err(|error| PublishError::Serialize {
                cluster: snapshot.cluster_name.clone(),
                error,
            })?;
        {
            let last = self.last_published.lock().unwrap();
            if last.get(&snapshot.cluster_name) == Some(&payload) {
                debug!(self.log, "status unchanged, skipping publish";
                    "cluster" => &snapshot.cluster_name,
                );
                return Ok(PublishOutcome::Unchanged);
            }
        }

        debug!(self.log, "publishing status";
            "cluster" => &snapshot.cluster_name,
            "payload" => &payload,
        );
        let mut conn = self.connector.connect().await?;
        let sent: Result<(), BusError> = async {
            conn.ensure_topic(&self.config.exchange, true).await?;
            conn.publish(
                &self.config.exchange,
                &self.config.routing_key,
                payload.as_bytes(),
            )
            .await
        }
        .await;
        let closed = conn.close().await;
        sent?;
        closed?;

        self.last_published
            .lock()
            .unwrap()
            .insert(snapshot.cluster_name.clone(), payload);
        Ok(PublishOutcome::Published)
    }

    /// Publish, logging rather than returning any failure.
    pub async fn publish_best_effort(
        &self,
        snapshot: &ClusterProgressSnapshot,
    ) {
        if let Err(error) = self.publish(snapshot).await {
            warn!(
                self.log,
                "failed to publish status: {}",
                DisplayErrorChain::new(&error);
                "cluster" => &snapshot.cluster_name,
            );
        }
    }

    /// The JSON document consumers receive.
    ///
    /// `cluster_data.groups` maps each facet in the snapshot to the facet's
    /// definition overlaid with its live `name` and `instances`. Snapshots
    /// without per-node detail only carry the cluster name.
    pub fn build_payload(&self, snapshot: &ClusterProgressSnapshot) -> Value {
        let mut cluster_data = Map::new();
        let definition = self
            .definition
            .as_ref()
            .filter(|def| def.name == snapshot.cluster_name);

        if !snapshot.groups.is_empty() {
            if let Some(definition) = definition {
                cluster_data.extend(definition.extra.clone());
            }
            let mut groups = Map::new();
            for (facet, group) in &snapshot.groups {
                let mut entry = definition
                    .and_then(|def| def.facet(facet))
                    .and_then(|facet| serde_json::to_value(facet).ok())
                    .and_then(|value| match value {
                        Value::Object(map) => Some(map),
                        _ => None,
                    })
                    .unwrap_or_default();
                entry.insert(
                    "name".to_string(),
                    Value::from(group.name.clone()),
                );
                entry.insert(
                    "instances".to_string(),
                    serde_json::to_value(&group.instances)
                        .unwrap_or(Value::Array(Vec::new())),
                );
                groups.insert(facet.clone(), Value::Object(entry));
            }
            cluster_data.insert("groups".to_string(), Value::Object(groups));
        }
        cluster_data.insert(
            "name".to_string(),
            Value::from(snapshot.cluster_name.clone()),
        );

        let mut payload = Map::new();
        payload.insert("total".to_string(), snapshot.total.into());
        payload.insert("success".to_string(), snapshot.success.into());
        payload.insert("failure".to_string(), snapshot.failure.into());
        payload.insert("running".to_string(), snapshot.running.into());
        payload.insert("finished".to_string(), snapshot.finished.into());
        payload.insert("succeed".to_string(), snapshot.succeed.into());
        payload.insert("progress".to_string(), snapshot.progress.into());
        payload.insert(
            "error_msg".to_string(),
            snapshot.error_msg.clone().into(),
        );
        payload.insert("cluster_data".to_string(), Value::Object(cluster_data));
        Value::Object(payload)
    }
}
