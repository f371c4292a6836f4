// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Show when each SSH reachability attempt fires under the default probe
//! policy (11 attempts, 3 seconds apart, 5 second connect timeout)

use fleet_common::backoff;
use fleet_common::backoff::Backoff;
use std::time::Duration;

const ATTEMPTS: u32 = 11;
const INTERVAL: Duration = Duration::from_secs(3);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

fn main() {
    let mut policy = backoff::fixed_interval_policy(INTERVAL);
    let mut worst_case = Duration::ZERO;
    for attempt in 1..=ATTEMPTS {
        println!(
            "attempt {:2} starts by T={:3}s (worst case)",
            attempt,
            worst_case.as_secs()
        );
        worst_case += CONNECT_TIMEOUT;
        if attempt < ATTEMPTS {
            if let Some(next) = policy.next_backoff() {
                worst_case += next;
            }
        }
    }
    println!("gives up by T={}s", worst_case.as_secs());
}
