// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cluster definition files.
//!
//! A definition file is the JSON document handed to us by whatever designed
//! the cluster. It carries the static shape of the cluster (facets and their
//! roles), optionally the inventory of machines already provisioned for it,
//! and optionally the coordinates of the status bus.

use crate::cloud::ServerDescriptor;
use camino::{Utf8Path, Utf8PathBuf};
use fleet_common::node::NAME_SEPARATOR;
use fleet_common::NodeName;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DefinitionFile {
    pub cluster_definition: ClusterDefinition,
    #[serde(default)]
    pub cluster_data: Option<ClusterInventory>,
    #[serde(default)]
    pub system_properties: Option<SystemProperties>,
}

/// The static shape of a cluster.
///
/// Keys other than `name` and `groups` are kept verbatim and published
/// alongside live status, so consumers see the cluster as it was designed.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterDefinition {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<FacetDefinition>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FacetDefinition {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub instance_num: usize,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Machines already provisioned for the cluster, grouped by facet.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ClusterInventory {
    #[serde(default)]
    pub groups: Vec<InventoryGroup>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InventoryGroup {
    pub name: String,
    #[serde(default)]
    pub instances: Vec<ServerDescriptor>,
}

/// Status bus coordinates carried in a definition file.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemProperties {
    pub rabbitmq_host: Option<String>,
    pub rabbitmq_port: Option<u16>,
    pub rabbitmq_username: Option<String>,
    pub rabbitmq_password: Option<String>,
    pub rabbitmq_exchange: Option<String>,
    pub rabbitmq_channel: Option<String>,
}

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("Failed to read cluster definition: {path}")]
    Io {
        #[source]
        error: std::io::Error,
        path: Utf8PathBuf,
    },
    #[error("Malformed cluster definition: {path}")]
    Parse {
        #[source]
        error: serde_json::Error,
        path: Utf8PathBuf,
    },
    #[error("cluster name {0:?} must be non-empty and must not contain '-'")]
    BadClusterName(String),
    #[error("facet {facet:?} is defined more than once in cluster {cluster}")]
    DuplicateFacet { cluster: String, facet: String },
    #[error("facet name must not be empty in cluster {0}")]
    EmptyFacetName(String),
    #[error("server {server:?} does not belong to facet {facet:?} of cluster {cluster}")]
    ForeignServer { cluster: String, facet: String, server: String },
}

impl DefinitionFile {
    /// Load and validate a definition file.
    pub fn from_file<P: AsRef<Utf8Path>>(
        path: P,
    ) -> Result<DefinitionFile, DefinitionError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|error| {
            DefinitionError::Io { error, path: path.to_owned() }
        })?;
        let file: DefinitionFile = serde_json::from_str(&data).map_err(
            |error| DefinitionError::Parse { error, path: path.to_owned() },
        )?;
        file.validate()?;
        Ok(file)
    }

    pub fn validate(&self) -> Result<(), DefinitionError> {
        let def = &self.cluster_definition;
        if def.name.is_empty() || def.name.contains(NAME_SEPARATOR) {
            return Err(DefinitionError::BadClusterName(def.name.clone()));
        }

        let mut seen = BTreeSet::new();
        for facet in &def.groups {
            if facet.name.is_empty() {
                return Err(DefinitionError::EmptyFacetName(def.name.clone()));
            }
            if !seen.insert(facet.name.as_str()) {
                return Err(DefinitionError::DuplicateFacet {
                    cluster: def.name.clone(),
                    facet: facet.name.clone(),
                });
            }
        }

        for group in self.inventory_groups() {
            for server in &group.instances {
                let belongs = server.name.parse::<NodeName>().is_ok_and(|n| {
                    n.cluster() == def.name
                        && n.facet() == group.name
                        && seen.contains(group.name.as_str())
                });
                if !belongs {
                    return Err(DefinitionError::ForeignServer {
                        cluster: def.name.clone(),
                        facet: group.name.clone(),
                        server: server.name.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn inventory_groups(&self) -> impl Iterator<Item = &InventoryGroup> {
        self.cluster_data.iter().flat_map(|data| data.groups.iter())
    }

    /// Every machine listed in the inventory, in facet order.
    pub fn servers(&self) -> Vec<ServerDescriptor> {
        self.inventory_groups()
            .flat_map(|group| group.instances.iter().cloned())
            .collect()
    }
}

impl ClusterDefinition {
    pub fn facet(&self, name: &str) -> Option<&FacetDefinition> {
        self.groups.iter().find(|facet| facet.name == name)
    }

    /// Facet names in definition order.
    pub fn facet_names(&self) -> Vec<String> {
        self.groups.iter().map(|facet| facet.name.clone()).collect()
    }
}
