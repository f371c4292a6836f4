// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # Fleet bootstrap common facilities
//!
//! Types shared between the bootstrap library, its command-line tool and
//! the tests: the exit codes surfaced to callers, the node naming scheme
//! (`cluster-facet-index`), retry policies and the helpers used by
//! executables to report fatal errors.

pub mod backoff;
pub mod cmd;
pub mod exit;
pub mod node;

pub use exit::ExitCode;
pub use node::NodeName;
