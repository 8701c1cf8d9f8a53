// system-tests/tests/helpers/logging.rs
// ============================================================================
// Module: System Test Logging
// Description: One-time tracing setup for system-test binaries.
// Dependencies: tracing-subscriber
// ============================================================================

//! ## Overview
//! Installs a `tracing` subscriber that honors `RUST_LOG` and writes through
//! the test harness capture.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is unset.
const DEFAULT_FILTER: &str = "unit_harness=info";

/// Installs the test-writer subscriber once per binary.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        // Another subscriber may already be installed by the test runner.
        let _ = tracing_subscriber::fmt().with_env_filter(filter).with_test_writer().try_init();
    });
}
