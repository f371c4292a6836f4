// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Module providing utilities for retrying operations.

use std::time::Duration;

pub use ::backoff::future::{retry, retry_notify};
pub use ::backoff::Error as BackoffError;
pub use ::backoff::{backoff::Backoff, ExponentialBackoff, Notify};

/// Return a policy that waits exactly `interval` between attempts and never
/// gives up on its own.
///
/// Callers that need a bounded number of attempts count them inside the
/// operation and return [`BackoffError::permanent`] once they are out.
pub fn fixed_interval_policy(interval: Duration) -> ExponentialBackoff {
    ExponentialBackoff {
        current_interval: interval,
        initial_interval: interval,
        randomization_factor: 0.0,
        multiplier: 1.0,
        max_interval: interval,
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}
