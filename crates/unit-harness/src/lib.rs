// crates/unit-harness/src/lib.rs
// ============================================================================
// Module: Unit Harness Library
// Description: Application and WebSocket harnesses for application-server tests.
// Purpose: Drive a sandboxed server process over its control API, HTTP, and WebSocket.
// Dependencies: tokio, semver, serde_json, sha1, base64, tracing
// ============================================================================

//! ## Overview
//! Unit Harness starts the application server under test, loads application
//! fixtures through the server's control API, and exposes the two primitives
//! the system-test suites are written against:
//!
//! - [`ApplicationHarness`]: `load` an application, then `get` or `request`.
//! - [`WebSocketHarness`]: `upgrade`, then `frame_write` / `frame_read`.
//!
//! Invariants:
//! - Exactly one application is loaded per [`ApplicationHarness`].
//! - Every network read is bounded by a timeout.
//! - Runtime prerequisites are evaluated before an application is loaded;
//!   an unmet prerequisite is reported as [`HarnessError::PrerequisiteUnmet`]
//!   so callers can skip rather than fail.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod app;
pub mod control;
pub mod error;
pub mod harness;
pub mod http;
pub mod prerequisites;
pub mod readiness;
pub mod server;
pub mod version;
pub mod websocket;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use app::ApplicationDescriptor;
pub use app::PythonTarget;
pub use app::RuntimeFamily;
pub use control::ControlAddr;
pub use control::ControlAddrError;
pub use control::ControlClient;
pub use error::HarnessError;
pub use harness::ApplicationHarness;
pub use harness::FixtureLayout;
pub use harness::WebSocketHarness;
pub use http::HttpClient;
pub use http::HttpRequest;
pub use http::HttpResponse;
pub use prerequisites::ModuleInventory;
pub use prerequisites::PrerequisiteOutcome;
pub use prerequisites::Prerequisites;
pub use server::ServerOptions;
pub use server::UnitServer;
pub use version::RuntimeVersion;
pub use version::VersionError;
pub use version::VersionPredicate;
pub use websocket::Frame;
pub use websocket::FrameError;
pub use websocket::FrameWrite;
pub use websocket::Opcode;
pub use websocket::WsSocket;
