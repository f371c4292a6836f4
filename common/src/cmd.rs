// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Facilities used by the command-line tools

use crate::ExitCode;
use display_error_chain::DisplayErrorChain;
use std::env::current_exe;
use std::process::exit;

/// Represents a fatal error in a command-line program
#[derive(Debug)]
pub enum CmdError {
    /// incorrect command-line arguments
    Usage(String),
    /// all other errors, along with the exit code the process should use
    Failure { code: ExitCode, error: anyhow::Error },
}

impl CmdError {
    pub fn failure(code: ExitCode, error: impl Into<anyhow::Error>) -> Self {
        CmdError::Failure { code, error: error.into() }
    }

    pub fn exit_code(&self) -> ExitCode {
        match self {
            CmdError::Usage(_) => ExitCode::Failure,
            CmdError::Failure { code, .. } => *code,
        }
    }
}

/// Exits the current process on a fatal error.
pub fn fatal(cmd_error: CmdError) -> ! {
    let arg0_result = current_exe().ok();
    let arg0 = arg0_result
        .as_deref()
        .and_then(|pathbuf| pathbuf.file_stem())
        .and_then(|file_name| file_name.to_str())
        .unwrap_or("command");
    let code = cmd_error.exit_code();
    let message = match cmd_error {
        CmdError::Usage(m) => m,
        CmdError::Failure { error, .. } => {
            let source: &(dyn std::error::Error + 'static) = error.as_ref();
            DisplayErrorChain::new(source).to_string()
        }
    };
    eprintln!("{}: {}", arg0, message);
    exit(code.code());
}
