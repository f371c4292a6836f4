// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Scriptable stand-ins for the external collaborators, for tests and dry
//! runs.

use crate::cloud::{
    CloudAction, CloudControlPlane, CloudError, CloudTask, ServerDescriptor,
    TaskProgress,
};
use crate::definition::ClusterDefinition;
use crate::probe::{ProbeResult, Prober};
use crate::runner::{ConfigurationRunner, RunOutcome, RunnerError};
use crate::target::NodeDescriptor;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type ScriptedRun = Result<RunOutcome, RunnerError>;

/// A [`ConfigurationRunner`] that succeeds unless told otherwise.
///
/// Also tracks how many runs were in flight at once.
#[derive(Debug, Default)]
pub struct FakeRunner {
    delay: Duration,
    scripts: Mutex<BTreeMap<String, VecDeque<ScriptedRun>>>,
    panics: Mutex<BTreeSet<String>>,
    started: Mutex<Vec<String>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every run take `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue the result of the next run on `node`.
    pub fn script(&self, node: &str, result: ScriptedRun) {
        self.scripts
            .lock()
            .unwrap()
            .entry(node.to_string())
            .or_default()
            .push_back(result);
    }

    /// Make the next run on `node` exit with `code`.
    pub fn fail(&self, node: &str, code: i32) {
        self.script(node, Ok(RunOutcome::failed(code, None)));
    }

    /// Make the next run on `node` panic.
    pub fn panic_on(&self, node: &str) {
        self.panics.lock().unwrap().insert(node.to_string());
    }

    pub fn run_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    /// Nodes in the order their runs started.
    pub fn started(&self) -> Vec<String> {
        self.started.lock().unwrap().clone()
    }

    /// The most runs that were ever in flight at the same time.
    pub fn max_concurrent(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigurationRunner for FakeRunner {
    async fn run(
        &self,
        node: &NodeDescriptor,
    ) -> Result<RunOutcome, RunnerError> {
        let name = node.name.to_string();
        self.started.lock().unwrap().push(name.clone());
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(active, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.active.fetch_sub(1, Ordering::SeqCst);

        if self.panics.lock().unwrap().remove(&name) {
            panic!("configuration run on {name} panicked");
        }
        self.scripts
            .lock()
            .unwrap()
            .get_mut(&name)
            .and_then(|script| script.pop_front())
            .unwrap_or_else(|| Ok(RunOutcome::success()))
    }
}

/// A [`Prober`] for which every address is reachable unless marked
/// otherwise.
#[derive(Debug, Default)]
pub struct FakeProber {
    unreachable: Mutex<BTreeSet<String>>,
    probes: AtomicUsize,
}

impl FakeProber {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every probe of `address` time out.
    pub fn set_unreachable(&self, address: &str) {
        self.unreachable.lock().unwrap().insert(address.to_string());
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for FakeProber {
    async fn probe(
        &self,
        address: &str,
        _port: u16,
        _timeout: Duration,
    ) -> ProbeResult {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.lock().unwrap().contains(address) {
            ProbeResult::TimedOut
        } else {
            ProbeResult::Reachable
        }
    }
}

/// A control plane whose tasks replay a fixed sequence of progress reports.
///
/// Each call to [`CloudTask::progress`] returns the next report (the last
/// one repeats); [`CloudTask::finished`] reflects the report that the next
/// `progress` call will return.
#[derive(Debug, Default)]
pub struct FakeCloud {
    steps: Vec<TaskProgress>,
    rejection: Option<String>,
    submitted: Mutex<Vec<CloudAction>>,
}

impl FakeCloud {
    pub fn new(steps: Vec<TaskProgress>) -> Self {
        FakeCloud { steps, ..Default::default() }
    }

    /// A control plane that refuses every action.
    pub fn rejecting(message: &str) -> Self {
        FakeCloud { rejection: Some(message.to_string()), ..Default::default() }
    }

    /// Actions submitted so far.
    pub fn submitted(&self) -> Vec<CloudAction> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl CloudControlPlane for FakeCloud {
    async fn submit(
        &self,
        action: CloudAction,
        definition: &ClusterDefinition,
    ) -> Result<Box<dyn CloudTask>, CloudError> {
        if let Some(message) = &self.rejection {
            return Err(CloudError::Rejected {
                action,
                cluster: definition.name.clone(),
                message: message.clone(),
            });
        }
        self.submitted.lock().unwrap().push(action);
        Ok(Box::new(FakeTask {
            steps: Arc::new(self.steps.clone()),
            cursor: AtomicUsize::new(0),
        }))
    }

    /// The servers of the last scripted report.
    async fn list_servers(
        &self,
        _definition: &ClusterDefinition,
    ) -> Result<Vec<ServerDescriptor>, CloudError> {
        Ok(self
            .steps
            .last()
            .map(|step| step.result.servers.clone())
            .unwrap_or_default())
    }
}

#[derive(Debug)]
struct FakeTask {
    steps: Arc<Vec<TaskProgress>>,
    cursor: AtomicUsize,
}

impl FakeTask {
    fn current(&self) -> Result<&TaskProgress, CloudError> {
        let last = self
            .steps
            .len()
            .checked_sub(1)
            .ok_or_else(|| CloudError::Task("no progress scripted".into()))?;
        let index = self.cursor.load(Ordering::SeqCst).min(last);
        Ok(&self.steps[index])
    }
}

#[async_trait]
impl CloudTask for FakeTask {
    async fn finished(&self) -> Result<bool, CloudError> {
        Ok(self.current()?.finished)
    }

    async fn progress(&self) -> Result<TaskProgress, CloudError> {
        let progress = self.current()?.clone();
        self.cursor.fetch_add(1, Ordering::SeqCst);
        Ok(progress)
    }
}
