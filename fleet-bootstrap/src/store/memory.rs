// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use super::{AbortSignalStore, ServiceRegistry, StateStore, StoreError};
use crate::record::NodeProvisionRecord;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// A store that lives only as long as the process.
///
/// Used by tests and by dry runs.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: Mutex<BTreeMap<String, NodeProvisionRecord>>,
    flags: Mutex<BTreeMap<String, bool>>,
    run_flags: Mutex<Vec<(String, bool)>>,
    cleared: Mutex<Vec<Vec<String>>>,
    saves: AtomicUsize,
    // Node-document writes still accepted; `None` means unlimited.
    saves_left: Mutex<Option<usize>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record currently stored, keyed by node name.
    pub fn records(&self) -> BTreeMap<String, NodeProvisionRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Node lists passed to each `clear_entries` call, in order.
    pub fn cleared(&self) -> Vec<Vec<String>> {
        self.cleared.lock().unwrap().clone()
    }

    /// Number of `save` calls made so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Every `set_run_flag` call that was accepted, in order.
    pub fn run_flag_writes(&self) -> Vec<(String, bool)> {
        self.run_flags.lock().unwrap().clone()
    }

    /// Make node-document reads and writes fail (or work again). Cluster
    /// flags and the service registry are unaffected.
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.saves_left.lock().unwrap() = unavailable.then_some(0);
    }

    /// Accept `saves` more node-document writes, then behave as if
    /// [`set_unavailable`](Self::set_unavailable) had been called.
    pub fn fail_after_saves(&self, saves: usize) {
        *self.saves_left.lock().unwrap() = Some(saves);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        match *self.saves_left.lock().unwrap() {
            Some(0) => Err(StoreError::Unavailable("node records".to_string())),
            _ => Ok(()),
        }
    }

    fn take_save(&self) -> Result<(), StoreError> {
        let mut left = self.saves_left.lock().unwrap();
        match left.as_mut() {
            Some(0) => Err(StoreError::Unavailable("node records".to_string())),
            Some(n) => {
                *n -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

#[async_trait]
impl StateStore for InMemoryStore {
    async fn load(
        &self,
        node: &str,
    ) -> Result<Option<NodeProvisionRecord>, StoreError> {
        self.check_available()?;
        Ok(self.records.lock().unwrap().get(node).cloned())
    }

    async fn save(
        &self,
        node: &str,
        record: &NodeProvisionRecord,
    ) -> Result<(), StoreError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.take_save()?;
        self.records.lock().unwrap().insert(node.to_string(), record.clone());
        Ok(())
    }

    async fn set_run_flag(
        &self,
        node: &str,
        driven: bool,
    ) -> Result<(), StoreError> {
        self.take_save()?;
        self.run_flags.lock().unwrap().push((node.to_string(), driven));
        Ok(())
    }
}

#[async_trait]
impl AbortSignalStore for InMemoryStore {
    async fn set_abort(
        &self,
        cluster: &str,
        abort: bool,
    ) -> Result<(), StoreError> {
        self.flags.lock().unwrap().insert(cluster.to_string(), abort);
        Ok(())
    }

    async fn get_abort(
        &self,
        cluster: &str,
    ) -> Result<Option<bool>, StoreError> {
        Ok(self.flags.lock().unwrap().get(cluster).copied())
    }
}

#[async_trait]
impl ServiceRegistry for InMemoryStore {
    async fn clear_entries(&self, nodes: &[String]) -> Result<(), StoreError> {
        self.cleared.lock().unwrap().push(nodes.to_vec());
        Ok(())
    }
}
