// system-tests/tests/helpers/timeouts.rs
// ============================================================================
// Module: System Test Timeouts
// Description: Centralized timeout configuration with overrides.
// Purpose: Keep system-test timeouts consistent and configurable across suites.
// ============================================================================

//! ## Overview
//! Default bounds for daemon startup and requests, widened by
//! `UNIT_SYSTEM_TEST_TIMEOUT_SEC`.

use std::time::Duration;

use system_tests::config::SystemTestConfig;

/// Startup bound for the daemon before overrides.
pub const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Bound on each request and frame read before overrides.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Returns the effective timeout, honoring `UNIT_SYSTEM_TEST_TIMEOUT_SEC` when set.
/// The override acts as a minimum to avoid shortening explicitly longer test timeouts.
#[must_use]
pub fn resolve_timeout(config: &SystemTestConfig, requested: Duration) -> Duration {
    config.timeout.map_or(requested, |override_timeout| std::cmp::max(requested, override_timeout))
}
