// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Node naming.
//!
//! Every node is named `cluster-facet-index`. The cluster a node belongs to
//! is the portion of its name before the first `-`, which is also the key
//! used for cluster-scoped records such as the abort flag.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const NAME_SEPARATOR: char = '-';

/// The full name of a node, validated to have the `cluster-facet-index`
/// shape.
#[derive(
    Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct NodeName {
    full: String,
    // Byte offsets of the two separators in `full`.
    first_sep: usize,
    last_sep: usize,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NodeNameError {
    #[error("node name {0:?} is not of the form cluster-facet-index")]
    Malformed(String),
    #[error("node name {name:?} has a non-numeric index {index:?}")]
    BadIndex { name: String, index: String },
}

impl NodeName {
    pub fn new(
        cluster: &str,
        facet: &str,
        index: usize,
    ) -> Result<NodeName, NodeNameError> {
        format!("{cluster}{NAME_SEPARATOR}{facet}{NAME_SEPARATOR}{index}")
            .parse()
    }

    pub fn as_str(&self) -> &str {
        &self.full
    }

    pub fn cluster(&self) -> &str {
        &self.full[..self.first_sep]
    }

    /// The facet portion of the name. Facet names may themselves contain
    /// separators, so this is everything between the cluster and the index.
    pub fn facet(&self) -> &str {
        &self.full[self.first_sep + 1..self.last_sep]
    }

    pub fn index(&self) -> usize {
        // Validated during parsing.
        self.full[self.last_sep + 1..].parse().unwrap_or_default()
    }
}

/// The cluster portion of any name (node name, slice name or cluster name
/// alone).
pub fn cluster_name_of(name: &str) -> &str {
    name.split(NAME_SEPARATOR).next().unwrap_or(name)
}

impl FromStr for NodeName {
    type Err = NodeNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || NodeNameError::Malformed(s.to_string());
        let first_sep = s.find(NAME_SEPARATOR).ok_or_else(malformed)?;
        let last_sep = s.rfind(NAME_SEPARATOR).ok_or_else(malformed)?;
        if first_sep == 0 || last_sep <= first_sep + 1 {
            return Err(malformed());
        }
        let index = &s[last_sep + 1..];
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(NodeNameError::BadIndex {
                name: s.to_string(),
                index: index.to_string(),
            });
        }
        Ok(NodeName { full: s.to_string(), first_sep, last_sep })
    }
}

impl TryFrom<String> for NodeName {
    type Error = NodeNameError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<NodeName> for String {
    fn from(name: NodeName) -> Self {
        name.full
    }
}

impl fmt::Display for NodeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full)
    }
}
