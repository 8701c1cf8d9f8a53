// crates/unit-harness/src/readiness.rs
// ============================================================================
// Module: Readiness Helpers
// Description: Readiness probes for the server under test.
// Purpose: Wait for sockets to come up without arbitrary sleeps.
// Dependencies: tokio
// ============================================================================

//! ## Overview
//! [`wait_for_ready`] retries an async probe at a fixed interval until it
//! succeeds or the deadline passes.
//! Invariants:
//! - The last probe error is carried in the timeout error.

use std::time::Duration;
use std::time::Instant;

use tokio::time::sleep;

use crate::error::HarnessError;

/// Delay between probe attempts.
const PROBE_INTERVAL: Duration = Duration::from_millis(50);

/// Polls `probe` until it succeeds or `timeout` expires.
///
/// # Errors
///
/// Returns [`HarnessError::Timeout`] carrying the last probe error when the
/// deadline passes.
pub async fn wait_for_ready<F, Fut, T>(
    mut probe: F,
    timeout: Duration,
    label: &str,
) -> Result<T, HarnessError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, HarnessError>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts = attempts.saturating_add(1);
        match probe().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if start.elapsed() > timeout {
                    return Err(HarnessError::Timeout {
                        operation: format!("{label} readiness ({attempts} attempts, last: {err})"),
                        after: timeout,
                    });
                }
                sleep(PROBE_INTERVAL).await;
            }
        }
    }
}
