// system-tests/src/config/mod.rs
// ============================================================================
// Module: System Test Configuration
// Description: Centralized configuration for application-server system tests.
// Purpose: Provide typed access to daemon, runtime, and fixture locations.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! System-test configuration is read from `UNIT_SYSTEM_TEST_*` environment
//! variables, optionally layered over a TOML file, and mapped into a small
//! typed structure for reuse across test helpers.

// ============================================================================
// SECTION: Modules
// ============================================================================

mod env;

// ============================================================================
// SECTION: Tests
// ============================================================================


// ============================================================================
// SECTION: Re-exports
// ============================================================================

pub use env::DEFAULT_LISTEN_PORT;
pub use env::SystemTestConfig;
pub use env::SystemTestEnv;
pub use env::read_env_strict;
