// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Checking whether a node accepts SSH connections yet.

use crate::config::ProbeConfig;
use async_trait::async_trait;
use fleet_common::backoff::{
    fixed_interval_policy, retry_notify, BackoffError,
};
use slog::{debug, info, warn, Logger};
use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;

/// Outcome of a single connection attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeResult {
    Reachable,
    TimedOut,
    Refused,
    Unreachable,
    Failed(io::ErrorKind),
}

impl ProbeResult {
    pub fn is_reachable(self) -> bool {
        self == ProbeResult::Reachable
    }

    fn from_io_error(error: &io::Error) -> ProbeResult {
        match error.kind() {
            io::ErrorKind::ConnectionRefused => ProbeResult::Refused,
            io::ErrorKind::TimedOut => ProbeResult::TimedOut,
            io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::HostUnreachable => ProbeResult::Unreachable,
            kind => ProbeResult::Failed(kind),
        }
    }
}

impl fmt::Display for ProbeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeResult::Reachable => f.write_str("reachable"),
            ProbeResult::TimedOut => f.write_str("connection timed out"),
            ProbeResult::Refused => f.write_str("connection refused"),
            ProbeResult::Unreachable => f.write_str("network unreachable"),
            ProbeResult::Failed(kind) => write!(f, "connection failed: {kind}"),
        }
    }
}

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> ProbeResult;
}

/// Probes by opening (and immediately closing) a TCP connection.
#[derive(Clone, Copy, Debug, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(
        &self,
        address: &str,
        port: u16,
        timeout: Duration,
    ) -> ProbeResult {
        match tokio::time::timeout(timeout, TcpStream::connect((address, port)))
            .await
        {
            // The stream is dropped here, closing the connection.
            Ok(Ok(_stream)) => ProbeResult::Reachable,
            Ok(Err(error)) => ProbeResult::from_io_error(&error),
            Err(_elapsed) => ProbeResult::TimedOut,
        }
    }
}

/// Probe `address` until it is reachable or `config.attempts` attempts have
/// failed, pausing `config.interval_secs` between attempts.
///
/// Returns the result of the last attempt.
pub async fn probe_with_retries(
    log: &Logger,
    prober: &dyn Prober,
    address: &str,
    config: &ProbeConfig,
) -> ProbeResult {
    let attempts = config.attempts.max(1);
    let attempt = AtomicU32::new(0);

    let try_probe = || async {
        let n = attempt.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(log, "probing node"; "address" => address, "attempt" => n);
        let result =
            prober.probe(address, config.port, config.timeout()).await;
        if result.is_reachable() {
            return Ok(result);
        }
        if n >= attempts {
            return Err(BackoffError::permanent(result));
        }
        if result == ProbeResult::Refused && !config.refused_pause().is_zero()
        {
            tokio::time::sleep(config.refused_pause()).await;
        }
        Err(BackoffError::transient(result))
    };
    let log_failure = |result: ProbeResult, delay: Duration| {
        warn!(log, "node not reachable yet, will retry in {:?}", delay;
            "address" => address,
            "port" => config.port,
            "result" => %result,
        );
    };

    match retry_notify(
        fixed_interval_policy(config.interval()),
        try_probe,
        log_failure,
    )
    .await
    {
        Ok(result) => {
            info!(log, "node is reachable";
                "address" => address,
                "attempts" => attempt.load(Ordering::SeqCst),
            );
            result
        }
        Err(result) => result,
    }
}
