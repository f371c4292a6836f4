// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Access to the shared store holding node provisioning records and
//! cluster flags.
//!
//! The store is last-writer-wins. Records are keyed by node name; flags are
//! keyed by cluster name.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::InMemoryStore;

use crate::record::NodeProvisionRecord;
use async_trait::async_trait;
use camino::Utf8PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access {path}")]
    Io {
        #[source]
        error: std::io::Error,
        path: Utf8PathBuf,
    },
    #[error("failed to parse {path}")]
    Parse {
        #[source]
        error: serde_json::Error,
        path: Utf8PathBuf,
    },
    #[error("document {path} is not a JSON object")]
    NotAnObject { path: Utf8PathBuf },
    #[error("invalid store key {0:?}")]
    BadKey(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Per-node provisioning records.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Read the provisioning sub-record of `node`, if it has one.
    async fn load(
        &self,
        node: &str,
    ) -> Result<Option<NodeProvisionRecord>, StoreError>;

    /// Replace the provisioning sub-record of `node`, leaving the rest of
    /// the node's document untouched.
    async fn save(
        &self,
        node: &str,
        record: &NodeProvisionRecord,
    ) -> Result<(), StoreError>;

    /// Mark whether configuration runs on `node` are driven from here.
    /// While set, the node's own agent skips its run at boot.
    async fn set_run_flag(
        &self,
        node: &str,
        driven: bool,
    ) -> Result<(), StoreError>;
}

/// Per-cluster abort flags.
#[async_trait]
pub trait AbortSignalStore: Send + Sync {
    async fn set_abort(
        &self,
        cluster: &str,
        abort: bool,
    ) -> Result<(), StoreError>;

    /// `None` if the flag has never been written for `cluster`.
    async fn get_abort(&self, cluster: &str)
        -> Result<Option<bool>, StoreError>;
}

/// Registry through which bootstrapped services find each other.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    /// Forget whatever `nodes` previously registered.
    async fn clear_entries(&self, nodes: &[String]) -> Result<(), StoreError>;
}

// Node and cluster names end up as file names.
fn check_key(key: &str) -> Result<&str, StoreError> {
    if key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\', '\0'])
    {
        return Err(StoreError::BadKey(key.to_string()));
    }
    Ok(key)
}
