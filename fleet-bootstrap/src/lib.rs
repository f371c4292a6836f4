// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bootstrapping the nodes of a cluster and reporting how it is going.
//!
//! A bootstrap session takes every node of a [`target::Target`] through a
//! reachability probe and a configuration run, a bounded number of nodes
//! at a time. Per-node progress lands in a shared [`store`]; aggregated
//! snapshots are published on a message [`bus`] for whatever renders
//! progress to the user. The same progress machinery follows cloud
//! [`lifecycle`] actions (create, start, stop, destroy).

pub mod bus;
pub mod cloud;
pub mod config;
mod context;
pub mod definition;
pub mod fakes;
pub mod lifecycle;
pub mod monitor;
pub mod orchestrator;
pub mod probe;
pub mod publisher;
pub mod record;
pub mod runner;
pub mod store;
pub mod target;
pub mod worker;

pub use config::Config;
pub use context::{ActionError, Collaborators, Fleet};
pub use definition::DefinitionFile;
