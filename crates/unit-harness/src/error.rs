// crates/unit-harness/src/error.rs
// ============================================================================
// Module: Harness Errors
// Description: Error type shared by the application and WebSocket harnesses.
// Purpose: Give suites stable, matchable failure categories.
// Dependencies: thiserror
// ============================================================================

//! ## Overview
//! [`HarnessError`] is the single error type surfaced by harness operations.
//! Suites distinguish [`HarnessError::PrerequisiteUnmet`] (skip) from every
//! other variant (fail).

use std::time::Duration;

use thiserror::Error;

use crate::websocket::FrameError;

/// Harness failures.
///
/// # Invariants
/// - Variants are stable for programmatic handling.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// A runtime prerequisite is not met; the scenario should be skipped.
    #[error("prerequisite not met: {0}")]
    PrerequisiteUnmet(String),
    /// Harness or environment configuration is invalid.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// Socket or filesystem I/O failed.
    #[error("io failure: {0}")]
    Io(String),
    /// An operation exceeded its bounded wait.
    #[error("{operation} timed out after {} ms", .after.as_millis())]
    Timeout {
        /// Operation label.
        operation: String,
        /// Elapsed bound.
        after: Duration,
    },
    /// The peer sent an HTTP message that could not be parsed.
    #[error("malformed http response: {0}")]
    MalformedResponse(String),
    /// The WebSocket upgrade handshake was rejected or invalid.
    #[error("websocket handshake failed: {0}")]
    Handshake(String),
    /// A WebSocket frame could not be read or decoded.
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The control API rejected a request.
    #[error("control api error: {0}")]
    Control(String),
    /// The server process failed to start, stop, or reported alerts.
    #[error("server process failure: {0}")]
    Process(String),
    /// An application is already loaded into this harness.
    #[error("application already loaded: {0}")]
    AlreadyLoaded(String),
    /// An operation required a loaded application.
    #[error("no application loaded")]
    NoApplicationLoaded,
}

impl HarnessError {
    /// Returns true when the error means the scenario should be skipped.
    #[must_use]
    pub const fn is_skip(&self) -> bool {
        matches!(self, Self::PrerequisiteUnmet(_))
    }

    /// Builds an I/O error with an operation label.
    pub(crate) fn io(context: &str, err: &std::io::Error) -> Self {
        Self::Io(format!("{context}: {err}"))
    }
}

/// Runs a future under a bounded wait, mapping expiry to [`HarnessError::Timeout`].
pub(crate) async fn bounded<T, F>(operation: &str, after: Duration, fut: F) -> Result<T, HarnessError>
where
    F: Future<Output = Result<T, HarnessError>>,
{
    tokio::time::timeout(after, fut).await.unwrap_or_else(|_| {
        Err(HarnessError::Timeout {
            operation: operation.to_string(),
            after,
        })
    })
}
