// system-tests/tests/helpers/mod.rs
// ============================================================================
// Module: System Test Helpers
// Description: Shared helpers for application-server system-tests.
// Purpose: Provide the sandboxed server, artifact reporting, and logging setup.
// Dependencies: system-tests, unit-harness
// ============================================================================

//! ## Overview
//! Shared helpers for the application-server system-tests.
//! Invariants:
//! - Every scenario runs against its own daemon and temp directory.
//! - Missing daemons or runtimes are reported as skips, never as failures.

#![allow(dead_code, reason = "Shared helpers are reused across multiple test suites.")]

pub mod artifacts;
pub mod harness;
pub mod logging;
pub mod timeouts;
