// system-tests/tests/python_targets.rs
// ============================================================================
// Module: Python Targets Suite
// Description: Aggregates Python target routing system tests into one binary.
// Purpose: Share helpers while keeping each scenario family in its own binary.
// Dependencies: suites/*, helpers
// ============================================================================

//! ## Overview
//! Aggregates Python target routing system tests into one binary.
//! Invariants:
//! - Scenarios in this binary run one at a time against their own daemon.
//! - A missing daemon or runtime is recorded as a skip.

mod helpers;

#[path = "suites/python_targets.rs"]
mod python_targets;
