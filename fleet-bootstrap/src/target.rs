// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Slices of a cluster: the set of nodes an action applies to.

use crate::cloud::ServerDescriptor;
use crate::definition::ClusterDefinition;
use fleet_common::node::NAME_SEPARATOR;
use fleet_common::NodeName;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Most indexes a single slice may name.
pub const MAX_SLICE_INDEXES: usize = 10_000;

/// A `CLUSTER[-FACET[-INDEXES]]` selector.
///
/// `INDEXES` is a comma-separated list of indexes or inclusive `a..b`
/// ranges, e.g. `hadoop-worker-0,3..5`. As with [`NodeName`], a facet name
/// may itself contain separators; a trailing segment that starts with a
/// digit is the index list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slice {
    pub cluster: String,
    pub facet: Option<String>,
    pub indexes: Option<BTreeSet<usize>>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SliceError {
    #[error("empty cluster slice")]
    Empty,
    #[error("bad index list {0:?} in cluster slice")]
    BadIndexes(String),
    #[error("index list {indexes:?} names more than {max} nodes")]
    TooManyIndexes { indexes: String, max: usize },
    #[error("slice names cluster {slice:?} but the definition is for {definition:?}")]
    WrongCluster { slice: String, definition: String },
    #[error("facet {facet:?} is not defined in cluster {cluster}")]
    UnknownFacet { cluster: String, facet: String },
    #[error("cannot name a node of facet {facet:?} in cluster {cluster}")]
    BadNodeName { cluster: String, facet: String },
}

impl FromStr for Slice {
    type Err = SliceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (cluster, rest) = match s.split_once(NAME_SEPARATOR) {
            Some((cluster, rest)) => (cluster, Some(rest)),
            None => (s, None),
        };
        if cluster.is_empty() {
            return Err(SliceError::Empty);
        }
        let (facet, indexes) = match rest {
            None => (None, None),
            Some(rest) => match rest.rsplit_once(NAME_SEPARATOR) {
                Some((facet, list))
                    if list.starts_with(|c: char| c.is_ascii_digit()) =>
                {
                    (Some(facet), Some(parse_indexes(list)?))
                }
                _ => (Some(rest), None),
            },
        };
        Ok(Slice {
            cluster: cluster.to_string(),
            facet: facet.map(str::to_string),
            indexes,
        })
    }
}

fn parse_indexes(s: &str) -> Result<BTreeSet<usize>, SliceError> {
    let bad = || SliceError::BadIndexes(s.to_string());
    let too_many = || SliceError::TooManyIndexes {
        indexes: s.to_string(),
        max: MAX_SLICE_INDEXES,
    };
    let mut indexes = BTreeSet::new();
    for item in s.split(',') {
        match item.split_once("..") {
            Some((lo, hi)) => {
                let lo: usize = lo.parse().map_err(|_| bad())?;
                let hi: usize = hi.parse().map_err(|_| bad())?;
                if lo > hi {
                    return Err(bad());
                }
                if hi - lo >= MAX_SLICE_INDEXES {
                    return Err(too_many());
                }
                indexes.extend(lo..=hi);
            }
            None => {
                indexes.insert(item.parse().map_err(|_| bad())?);
            }
        }
        if indexes.len() > MAX_SLICE_INDEXES {
            return Err(too_many());
        }
    }
    Ok(indexes)
}

impl fmt::Display for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cluster)?;
        if let Some(facet) = &self.facet {
            write!(f, "{NAME_SEPARATOR}{facet}")?;
        }
        if let Some(indexes) = &self.indexes {
            let list: Vec<String> =
                indexes.iter().map(|i| i.to_string()).collect();
            write!(f, "{NAME_SEPARATOR}{}", list.join(","))?;
        }
        Ok(())
    }
}

/// One node selected by a slice.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeDescriptor {
    pub name: NodeName,
    pub facet: String,
    pub index: usize,
    /// Last known address; `None` if the node has not been given one.
    pub address: Option<String>,
    /// Roles the node runs, resolved from its facet.
    pub roles: Vec<String>,
    /// Whether the cloud (or its inventory) knows this machine exists.
    pub in_cloud: bool,
}

impl NodeDescriptor {
    pub fn has_address(&self) -> bool {
        self.address.as_deref().is_some_and(|a| !a.is_empty())
    }
}

/// The ordered set of nodes an action applies to.
///
/// Nodes are ordered by facet (in definition order) and then by index.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Target {
    name: String,
    cluster_name: String,
    facet_order: Vec<String>,
    nodes: Vec<NodeDescriptor>,
}

impl Target {
    /// Resolve `slice` against a cluster definition and its inventory.
    ///
    /// A facet's nodes are indexes `0..instance_num` plus any machine the
    /// inventory lists for the facet.
    pub fn select(
        definition: &ClusterDefinition,
        servers: &[ServerDescriptor],
        slice: &Slice,
    ) -> Result<Target, SliceError> {
        if slice.cluster != definition.name {
            return Err(SliceError::WrongCluster {
                slice: slice.cluster.clone(),
                definition: definition.name.clone(),
            });
        }
        if let Some(facet) = &slice.facet {
            if definition.facet(facet).is_none() {
                return Err(SliceError::UnknownFacet {
                    cluster: definition.name.clone(),
                    facet: facet.clone(),
                });
            }
        }

        let mut nodes = Vec::new();
        for facet in &definition.groups {
            if slice.facet.as_ref().is_some_and(|f| *f != facet.name) {
                continue;
            }
            let inventory: Vec<(NodeName, &ServerDescriptor)> = servers
                .iter()
                .filter_map(|s| Some((s.name.parse::<NodeName>().ok()?, s)))
                .filter(|(n, _)| {
                    n.cluster() == definition.name && n.facet() == facet.name
                })
                .collect();
            let mut indexes: BTreeSet<usize> =
                (0..facet.instance_num).collect();
            indexes.extend(inventory.iter().map(|(n, _)| n.index()));
            if let Some(wanted) = &slice.indexes {
                indexes.retain(|i| wanted.contains(i));
            }

            for index in indexes {
                let name = NodeName::new(&definition.name, &facet.name, index)
                    .map_err(|_| SliceError::BadNodeName {
                        cluster: definition.name.clone(),
                        facet: facet.name.clone(),
                    })?;
                let server =
                    inventory.iter().find(|(n, _)| *n == name).map(|(_, s)| s);
                nodes.push(NodeDescriptor {
                    name,
                    facet: facet.name.clone(),
                    index,
                    address: server.and_then(|s| s.ip_address.clone()),
                    roles: facet.roles.clone(),
                    in_cloud: server.is_some_and(|s| s.exists()),
                });
            }
        }

        Ok(Target {
            name: slice.to_string(),
            cluster_name: definition.name.clone(),
            facet_order: definition.facet_names(),
            nodes,
        })
    }

    /// Build a target directly from nodes, e.g. for a subset of another
    /// target.
    pub fn from_nodes(
        name: impl Into<String>,
        cluster_name: impl Into<String>,
        facet_order: Vec<String>,
        nodes: Vec<NodeDescriptor>,
    ) -> Target {
        Target {
            name: name.into(),
            cluster_name: cluster_name.into(),
            facet_order,
            nodes,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cluster_name(&self) -> &str {
        &self.cluster_name
    }

    pub fn facet_order(&self) -> &[String] {
        &self.facet_order
    }

    pub fn nodes(&self) -> &[NodeDescriptor] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.iter().any(|n| n.name.as_str() == name)
    }

    pub fn node(&self, name: &str) -> Option<&NodeDescriptor> {
        self.nodes.iter().find(|n| n.name.as_str() == name)
    }

    /// The nodes of this target that belong to `facet`, in index order.
    pub fn facet_nodes(&self, facet: &str) -> Vec<NodeDescriptor> {
        self.nodes.iter().filter(|n| n.facet == facet).cloned().collect()
    }

    /// Take the addresses reported by the control plane. A reported
    /// machine is in the cloud unless it says it no longer exists.
    pub fn update_servers(&mut self, servers: &[ServerDescriptor]) {
        for server in servers {
            if let Some(node) =
                self.nodes.iter_mut().find(|n| n.name.as_str() == server.name)
            {
                node.address = server.ip_address.clone();
                node.in_cloud = server.exists();
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::definition::test::definition_file;
    use crate::record::ProvisionStatus;

    #[test]
    fn parse_slices() {
        let slice: Slice = "hadoop".parse().unwrap();
        assert_eq!(slice.cluster, "hadoop");
        assert_eq!(slice.facet, None);
        assert_eq!(slice.indexes, None);

        let slice: Slice = "hadoop-worker-0,3..5".parse().unwrap();
        assert_eq!(slice.facet.as_deref(), Some("worker"));
        assert_eq!(slice.indexes, Some(BTreeSet::from([0, 3, 4, 5])));
        assert_eq!(slice.to_string(), "hadoop-worker-0,3,4,5");

        assert_eq!("".parse::<Slice>(), Err(SliceError::Empty));
        assert_eq!("-worker".parse::<Slice>(), Err(SliceError::Empty));
        assert_eq!(
            "hadoop-worker-5..2".parse::<Slice>(),
            Err(SliceError::BadIndexes("5..2".to_string()))
        );
        assert!("hadoop-worker-1,x".parse::<Slice>().is_err());
    }

    #[test]
    fn facet_names_may_contain_separators() {
        let slice: Slice = "hadoop-data-node-0..1".parse().unwrap();
        assert_eq!(slice.facet.as_deref(), Some("data-node"));
        assert_eq!(slice.indexes, Some(BTreeSet::from([0, 1])));
        assert_eq!(slice.to_string(), "hadoop-data-node-0,1");

        let slice: Slice = "hadoop-data-node".parse().unwrap();
        assert_eq!(slice.facet.as_deref(), Some("data-node"));
        assert_eq!(slice.indexes, None);

        // Slices agree with node names on where the facet ends.
        let name: NodeName = "hadoop-data-node-1".parse().unwrap();
        let slice: Slice = name.as_str().parse().unwrap();
        assert_eq!(slice.facet.as_deref(), Some(name.facet()));
        assert_eq!(slice.indexes, Some(BTreeSet::from([name.index()])));
    }

    #[test]
    fn huge_index_ranges_are_rejected() {
        let too_many = |list: &str| SliceError::TooManyIndexes {
            indexes: list.to_string(),
            max: MAX_SLICE_INDEXES,
        };
        assert_eq!(
            "hadoop-worker-0..99999999999".parse::<Slice>(),
            Err(too_many("0..99999999999"))
        );
        assert_eq!(
            "hadoop-worker-0..9999,10000".parse::<Slice>(),
            Err(too_many("0..9999,10000"))
        );

        let slice: Slice = "hadoop-worker-5..10004".parse().unwrap();
        assert_eq!(slice.indexes.unwrap().len(), MAX_SLICE_INDEXES);
    }

    #[test]
    fn select_whole_cluster() {
        let file = definition_file();
        let target = Target::select(
            &file.cluster_definition,
            &file.servers(),
            &"hadoop".parse().unwrap(),
        )
        .unwrap();
        let names: Vec<&str> =
            target.nodes().iter().map(|n| n.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["hadoop-master-0", "hadoop-worker-0", "hadoop-worker-1"]
        );
        assert_eq!(target.cluster_name(), "hadoop");
        assert_eq!(target.facet_order(), ["master", "worker"]);

        let master = target.node("hadoop-master-0").unwrap();
        assert_eq!(master.address.as_deref(), Some("10.0.0.10"));
        assert!(master.roles.contains(&"hadoop_namenode".to_string()));
        assert!(!target.node("hadoop-worker-1").unwrap().has_address());
        assert_eq!(target.facet_nodes("worker").len(), 2);
        assert!(target.nodes().iter().all(|n| n.in_cloud));
    }

    #[test]
    fn nodes_missing_from_inventory_are_not_in_cloud() {
        let mut file = definition_file();
        file.cluster_definition.groups[1].instance_num = 3;
        let target = Target::select(
            &file.cluster_definition,
            &file.servers(),
            &"hadoop-worker".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(target.len(), 3);
        let missing = target.node("hadoop-worker-2").unwrap();
        assert!(!missing.in_cloud);
        assert!(!missing.has_address());
        assert!(target.node("hadoop-worker-1").unwrap().in_cloud);

        let mut gone = file.servers();
        for server in &mut gone {
            server.status = Some(ProvisionStatus::NotExist);
        }
        let target = Target::select(
            &file.cluster_definition,
            &gone,
            &"hadoop".parse().unwrap(),
        )
        .unwrap();
        assert!(target.nodes().iter().all(|n| !n.in_cloud));
    }

    #[test]
    fn select_facet_and_indexes() {
        let file = definition_file();
        let target = Target::select(
            &file.cluster_definition,
            &file.servers(),
            &"hadoop-worker-1".parse().unwrap(),
        )
        .unwrap();
        assert_eq!(target.len(), 1);
        assert!(target.contains("hadoop-worker-1"));
        assert_eq!(target.name(), "hadoop-worker-1");

        let err = Target::select(
            &file.cluster_definition,
            &file.servers(),
            &"hadoop-gateway".parse().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, SliceError::UnknownFacet { .. }));

        let err = Target::select(
            &file.cluster_definition,
            &file.servers(),
            &"hbase".parse().unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, SliceError::WrongCluster { .. }));
    }

    #[test]
    fn update_servers_refreshes_addresses() {
        let file = definition_file();
        let mut target = Target::select(
            &file.cluster_definition,
            &[],
            &"hadoop".parse().unwrap(),
        )
        .unwrap();
        assert!(target.nodes().iter().all(|n| !n.has_address()));
        assert!(target.nodes().iter().all(|n| !n.in_cloud));
        target.update_servers(&file.servers());
        assert!(target.node("hadoop-worker-0").unwrap().has_address());
        assert!(target.nodes().iter().all(|n| n.in_cloud));
    }
}
