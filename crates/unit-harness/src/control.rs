// crates/unit-harness/src/control.rs
// ============================================================================
// Module: Control API
// Description: Socket address parsing and the server's JSON control API client.
// Purpose: Apply and read server configuration for a scenario.
// Dependencies: tokio, serde_json, thiserror, tracing
// ============================================================================

//! ## Overview
//! The server is configured at runtime through a JSON API served on a
//! dedicated socket. [`ControlAddr`] parses the address forms the server
//! accepts on its command line (`unix:<path>`, `[v6]:port`, `host:port`) and
//! doubles as the address type for application listeners. [`ControlClient`]
//! wraps `PUT`/`GET`/`DELETE` on `/config`.
//!
//! Invariants:
//! - A reply carrying an `error` member is always a failure, whatever the status.
//! - Unix socket paths are non-empty.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::HarnessError;
use crate::http::BoxStream;
use crate::http::HttpClient;
use crate::http::HttpRequest;
use crate::http::HttpResponse;

// ============================================================================
// SECTION: Addresses
// ============================================================================

/// Address parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlAddrError {
    /// `unix:` was given without a path.
    #[error("unix domain socket '{0}' name is invalid")]
    EmptyUnixPath(String),
    /// The inet address or port did not parse.
    #[error("invalid socket address '{0}'")]
    InvalidInet(String),
}

/// Address of a stream socket: the control API or an application listener.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ControlAddr {
    /// Unix domain socket path.
    Unix(PathBuf),
    /// TCP address.
    Inet(SocketAddr),
}

impl ControlAddr {
    /// Parses `unix:<path>`, `[v6addr]:port`, or `v4addr:port`.
    ///
    /// # Errors
    ///
    /// Returns [`ControlAddrError`] for empty Unix paths or invalid inet
    /// addresses.
    pub fn parse(raw: &str) -> Result<Self, ControlAddrError> {
        let trimmed = raw.trim();
        if let Some(path) = trimmed.strip_prefix("unix:") {
            if path.is_empty() {
                return Err(ControlAddrError::EmptyUnixPath(raw.to_string()));
            }
            return Ok(Self::Unix(PathBuf::from(path)));
        }
        let addr: SocketAddr =
            trimmed.parse().map_err(|_| ControlAddrError::InvalidInet(raw.to_string()))?;
        if trimmed.starts_with('[') != addr.is_ipv6() {
            return Err(ControlAddrError::InvalidInet(raw.to_string()));
        }
        Ok(Self::Inet(addr))
    }

    /// Opens a stream connection to the address.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Io`] when the connection fails, or
    /// [`HarnessError::Config`] for Unix sockets on platforms without them.
    pub async fn connect(&self) -> Result<BoxStream, HarnessError> {
        match self {
            Self::Inet(addr) => {
                let stream = TcpStream::connect(addr)
                    .await
                    .map_err(|err| HarnessError::io(&format!("connect {addr}"), &err))?;
                stream.set_nodelay(true).map_err(|err| HarnessError::io("set nodelay", &err))?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Self::Unix(path) => {
                let stream = tokio::net::UnixStream::connect(path).await.map_err(|err| {
                    HarnessError::io(&format!("connect unix:{}", path.display()), &err)
                })?;
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            Self::Unix(path) => Err(HarnessError::Config(format!(
                "unix sockets are unsupported on this platform: {}",
                path.display()
            ))),
        }
    }
}

impl FromStr for ControlAddr {
    type Err = ControlAddrError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ControlAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unix(path) => write!(f, "unix:{}", path.display()),
            Self::Inet(addr) => addr.fmt(f),
        }
    }
}

// ============================================================================
// SECTION: Control Client
// ============================================================================

/// JSON control API client.
#[derive(Debug, Clone)]
pub struct ControlClient {
    /// Underlying HTTP client bound to the control socket.
    http: HttpClient,
}

impl ControlClient {
    /// Creates a control client for an address.
    #[must_use]
    pub fn new(addr: ControlAddr, timeout: Duration) -> Self {
        Self {
            http: HttpClient::new(addr, timeout),
        }
    }

    /// Returns the control socket address.
    #[must_use]
    pub const fn addr(&self) -> &ControlAddr {
        self.http.endpoint()
    }

    /// Replaces the configuration subtree at `path` (relative to `/config`).
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Control`] when the server rejects the change.
    pub async fn conf(&self, value: &Value, path: &str) -> Result<Value, HarnessError> {
        let body = serde_json::to_vec(value)
            .map_err(|err| HarnessError::Config(format!("serialize config: {err}")))?;
        let target = config_path(path);
        debug!(path = %target, "applying configuration");
        let response = self.http.request(&HttpRequest::put(&target, body)).await?;
        control_reply(&response)
    }

    /// Reads the configuration subtree at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Control`] when the path does not exist.
    pub async fn conf_get(&self, path: &str) -> Result<Value, HarnessError> {
        let response = self.http.request(&HttpRequest::get(&config_path(path))).await?;
        control_reply(&response)
    }

    /// Deletes the configuration subtree at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Control`] when the server rejects the deletion.
    pub async fn conf_delete(&self, path: &str) -> Result<Value, HarnessError> {
        let response = self.http.request(&HttpRequest::delete(&config_path(path))).await?;
        control_reply(&response)
    }
}

/// Joins a relative config path onto `/config`.
fn config_path(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() { "/config".to_string() } else { format!("/config/{trimmed}") }
}

/// Interprets a control API reply.
fn control_reply(response: &HttpResponse) -> Result<Value, HarnessError> {
    let value = response.json()?;
    if let Some(error) = value.get("error") {
        let message = error.as_str().map_or_else(|| error.to_string(), str::to_string);
        let detail = value.get("detail").and_then(Value::as_str).unwrap_or_default();
        return Err(if detail.is_empty() {
            HarnessError::Control(message)
        } else {
            HarnessError::Control(format!("{message}: {detail}"))
        });
    }
    if !response.is_success() {
        return Err(HarnessError::Control(format!("unexpected status {}", response.status())));
    }
    Ok(value)
}
