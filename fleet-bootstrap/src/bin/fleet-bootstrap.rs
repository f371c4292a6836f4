// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Executable for fleet-bootstrap: cluster lifecycle actions and node
//! bootstrapping

use anyhow::Context;
use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};
use fleet_bootstrap::lifecycle::LifecycleAction;
use fleet_bootstrap::{Collaborators, Config, DefinitionFile, Fleet};
use fleet_common::cmd::{fatal, CmdError};
use fleet_common::ExitCode;
use slog::info;

#[derive(Debug, Parser)]
#[clap(name = "fleet-bootstrap", about = "Bootstrap the nodes of a cluster")]
struct Args {
    /// Path to the TOML configuration file
    #[clap(long, global = true, default_value = "fleet-bootstrap.toml")]
    config: Utf8PathBuf,

    /// Path to the JSON cluster definition file
    #[clap(long = "from-file", global = true)]
    from_file: Option<Utf8PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the configuration pass on existing machines
    Bootstrap { slice: String },
    /// Create machines, then bootstrap them
    Create { slice: String },
    /// Power machines on
    Start {
        slice: String,
        /// Bootstrap the machines once they are running
        #[clap(long)]
        bootstrap: bool,
    },
    /// Power machines off
    Stop { slice: String },
    /// Destroy machines
    Destroy { slice: String },
    /// Reapply machine-level settings to existing machines
    Config { slice: String },
    /// Record and publish the current state of the machines
    Status { slice: String },
}

impl Command {
    fn slice(&self) -> &str {
        match self {
            Command::Bootstrap { slice }
            | Command::Create { slice }
            | Command::Start { slice, .. }
            | Command::Stop { slice }
            | Command::Destroy { slice }
            | Command::Config { slice }
            | Command::Status { slice } => slice,
        }
    }

    fn lifecycle_action(&self) -> Option<LifecycleAction> {
        match self {
            Command::Bootstrap { .. } | Command::Status { .. } => None,
            Command::Create { .. } => Some(LifecycleAction::Create),
            Command::Start { bootstrap, .. } => {
                Some(LifecycleAction::Start { bootstrap: *bootstrap })
            }
            Command::Stop { .. } => Some(LifecycleAction::Stop),
            Command::Destroy { .. } => Some(LifecycleAction::Destroy),
            Command::Config { .. } => Some(LifecycleAction::Config),
        }
    }
}

#[tokio::main]
async fn main() {
    match do_run().await {
        Ok(ExitCode::Success) => {}
        Ok(code) => std::process::exit(code.code()),
        Err(cmd_error) => fatal(cmd_error),
    }
}

async fn do_run() -> Result<ExitCode, CmdError> {
    let args = Args::parse();

    let config = Config::from_file(&args.config)
        .map_err(|e| CmdError::failure(ExitCode::Failure, e))?;
    let definition_path = args.from_file.as_ref().ok_or_else(|| {
        CmdError::Usage(String::from("--from-file is required"))
    })?;
    let definition = DefinitionFile::from_file(definition_path)
        .map_err(|e| CmdError::failure(ExitCode::Failure, e))?;

    let log = config
        .log
        .to_logger("fleet-bootstrap")
        .context("initializing logger")
        .map_err(|e| CmdError::failure(ExitCode::Failure, e))?;

    let collaborators = Collaborators::from_config(&log, &config, &definition);
    let fleet = Fleet::new(&log, &config, definition, collaborators);
    let mut target = fleet
        .target(args.command.slice())
        .map_err(|e| CmdError::Usage(e.to_string()))?;
    info!(log, "selected target";
        "target" => target.name(),
        "nodes" => target.len(),
        "dry_run" => config.bootstrap.dry_run,
    );

    let result = match (&args.command, args.command.lifecycle_action()) {
        (Command::Status { .. }, _) => {
            return fleet
                .report_status(&target)
                .await
                .map(|_| ExitCode::Success)
                .map_err(|e| CmdError::failure(ExitCode::Failure, e));
        }
        (_, Some(action)) => fleet
            .run_action(action, &mut target)
            .await
            .map_err(|e| CmdError::failure(e.exit_code(), e)),
        (_, None) => fleet
            .bootstrap(&target)
            .await
            .map_err(|e| CmdError::failure(ExitCode::BootstrapFailure, e)),
    };

    let succeed = matches!(result, Ok(ExitCode::Success));
    fleet.publish_final_result(&target, succeed).await;
    result
}
