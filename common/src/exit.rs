// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Exit codes returned by bootstrap sessions and cluster lifecycle actions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Exit status surfaced to whatever invoked a cluster action.
///
/// The numeric values are a stable contract with callers of the
/// command-line tool and must not be renumbered.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ExitCode {
    Success,
    Failure,
    CreateFailure,
    BootstrapFailure,
    DeleteFailure,
    StopFailure,
    StartFailure,
    /// The node has no address, so no connection was attempted.
    IpNotAvailable,
    /// The node's SSH port never accepted a connection.
    CannotSshToNode,
}

impl ExitCode {
    pub const fn code(self) -> i32 {
        match self {
            ExitCode::Success => 0,
            ExitCode::Failure => 1,
            ExitCode::CreateFailure => 2,
            ExitCode::BootstrapFailure => 3,
            ExitCode::DeleteFailure => 4,
            ExitCode::StopFailure => 5,
            ExitCode::StartFailure => 6,
            ExitCode::IpNotAvailable => 31,
            ExitCode::CannotSshToNode => 32,
        }
    }

    pub const fn is_success(self) -> bool {
        matches!(self, ExitCode::Success)
    }

    /// Translate the raw exit status of a configuration run.
    ///
    /// Anything other than zero is a bootstrap failure; the run's own
    /// status values carry no meaning to our callers.
    pub const fn from_run_status(status: i32) -> ExitCode {
        if status == 0 {
            ExitCode::Success
        } else {
            ExitCode::BootstrapFailure
        }
    }

    /// Fold per-node exit codes into the aggregate result of a session.
    pub fn aggregate<I>(codes: I) -> ExitCode
    where
        I: IntoIterator<Item = ExitCode>,
    {
        if codes.into_iter().all(ExitCode::is_success) {
            ExitCode::Success
        } else {
            ExitCode::BootstrapFailure
        }
    }
}

impl fmt::Display for ExitCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        // Every code fits in a u8.
        std::process::ExitCode::from(code.code() as u8)
    }
}
