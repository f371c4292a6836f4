// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::collections::HashMap;
use std::future::Future;
use std::ops::Range;
use std::time::Duration;
use tokio::task::{Id, JoinError, JoinSet};

/// The default pause between spawning consecutive members of a batch.
pub const DEFAULT_STAGGER: Duration = Duration::from_millis(100);

/// Split `len` items into consecutive batches of at most `max_concurrent`
/// items each.
///
/// A `max_concurrent` of zero means "unlimited": everything runs as one
/// batch. Only the last batch may be smaller than `max_concurrent`.
pub fn batch_ranges(len: usize, max_concurrent: usize) -> Vec<Range<usize>> {
    if len == 0 {
        return Vec::new();
    }
    if max_concurrent == 0 || len <= max_concurrent {
        return vec![0..len];
    }
    (0..len)
        .step_by(max_concurrent)
        .map(|start| start..usize::min(start + max_concurrent, len))
        .collect()
}

/// One batch of tokio tasks that run concurrently and are joined together.
///
/// Each task is spawned with a caller-chosen key. [BatchTaskSet::join_all]
/// is a full barrier: it returns only once every task has finished, and
/// hands back each task's key with its result, including tasks that
/// panicked.
///
/// # Why not just use a JoinSet?
///
/// A [JoinSet] reports a panicked task only by its task [Id], which the
/// caller has no way to map back to the work it submitted. It also starts
/// everything at once; members of a batch here are started `stagger` apart
/// so that a large batch does not open all of its connections in the same
/// instant.
pub struct BatchTaskSet<K, T> {
    set: JoinSet<T>,
    keys: HashMap<Id, K>,
    stagger: Duration,
}

impl<K, T: 'static + Send> Default for BatchTaskSet<K, T> {
    fn default() -> Self {
        BatchTaskSet::new(DEFAULT_STAGGER)
    }
}

impl<K, T: 'static + Send> BatchTaskSet<K, T> {
    /// Creates a new, empty [BatchTaskSet] that waits `stagger` between
    /// spawns.
    pub fn new(stagger: Duration) -> BatchTaskSet<K, T> {
        Self { set: JoinSet::new(), keys: HashMap::new(), stagger }
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// Spawn `future` as a member of this batch.
    ///
    /// Every spawn after the first waits `stagger` before starting its task.
    pub async fn spawn<F>(&mut self, key: K, future: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        if !self.keys.is_empty() && !self.stagger.is_zero() {
            tokio::time::sleep(self.stagger).await;
        }
        let handle = self.set.spawn(future);
        self.keys.insert(handle.id(), key);
    }

    /// Waits for the next task to complete and returns its key and result.
    ///
    /// Returns `None` once every task in the batch has been joined.
    pub async fn join_next(&mut self) -> Option<(K, Result<T, JoinError>)> {
        let (id, result) = match self.set.join_next_with_id().await? {
            Ok((id, output)) => (id, Ok(output)),
            Err(error) => (error.id(), Err(error)),
        };
        let key = self
            .keys
            .remove(&id)
            .expect("every spawned task id is recorded before it is joined");
        Some((key, result))
    }

    /// Wait for every task in the batch and return all of their results.
    pub async fn join_all(mut self) -> Vec<(K, Result<T, JoinError>)> {
        let mut results = Vec::with_capacity(self.set.len());
        while let Some(result) = self.join_next().await {
            results.push(result);
        }
        results
    }
}
