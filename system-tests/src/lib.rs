// system-tests/src/lib.rs
// ============================================================================
// Module: Unit System Tests Library
// Description: Shared configuration for application-server system tests.
// Purpose: Provide typed settings to the scenario binaries in `tests/`.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! This crate hosts the configuration shared by the system-test binaries in
//! `system-tests/tests`. Scenario code lives in `tests/suites` and is only
//! built with the `system-tests` feature.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
