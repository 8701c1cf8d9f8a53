// crates/unit-harness/src/http.rs
// ============================================================================
// Module: HTTP/1.1 Client
// Description: Minimal blocking-style HTTP/1.1 client over TCP or Unix sockets.
// Purpose: Issue single requests and return case-preserving response snapshots.
// Dependencies: tokio, serde_json, tracing
// ============================================================================

//! ## Overview
//! The harness speaks HTTP/1.1 directly instead of through a pooled client so
//! that header case and order are preserved exactly as the server sent them,
//! and so the same connection can be handed to the WebSocket codec after an
//! upgrade.
//!
//! Invariants:
//! - One request per connection; `Connection: close` is sent unless overridden.
//! - Response heads are capped at [`MAX_HEAD_BYTES`] and bodies at the
//!   client's body limit ([`DEFAULT_MAX_BODY`] unless overridden).
//! - Every request runs under the client's bounded timeout.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncBufRead;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tracing::debug;

use crate::control::ControlAddr;
use crate::error::HarnessError;
use crate::error::bounded;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Maximum size of a response status line plus headers.
pub const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Maximum size of one chunk-size or chunk-terminator line.
pub const MAX_LINE_BYTES: usize = 8 * 1024;

/// Default cap on a buffered response body.
pub const DEFAULT_MAX_BODY: usize = 64 * 1024 * 1024;

/// Default `Host` header value.
pub const DEFAULT_HOST: &str = "localhost";

// ============================================================================
// SECTION: Streams
// ============================================================================

/// Byte stream the client can speak HTTP over.
pub trait Stream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Stream for T {}

/// Type-erased connection to a TCP or Unix socket.
pub type BoxStream = Box<dyn Stream>;

// ============================================================================
// SECTION: Request
// ============================================================================

/// Outgoing HTTP/1.1 request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Request method.
    pub method: String,
    /// Request target (path and query).
    pub path: String,
    /// Headers in send order.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: Vec<u8>,
}

impl HttpRequest {
    /// Creates a request with no headers or body.
    #[must_use]
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    /// Creates a GET request.
    #[must_use]
    pub fn get(path: &str) -> Self {
        Self::new("GET", path)
    }

    /// Creates a PUT request with a body.
    #[must_use]
    pub fn put(path: &str, body: Vec<u8>) -> Self {
        Self::new("PUT", path).with_body(body)
    }

    /// Creates a DELETE request.
    #[must_use]
    pub fn delete(path: &str) -> Self {
        Self::new("DELETE", path)
    }

    /// Appends a header.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Replaces the body.
    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = body;
        self
    }

    /// Returns true when a header with the name is present (case-insensitive).
    fn has_header(&self, name: &str) -> bool {
        self.headers.iter().any(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    /// Serializes the request, filling in `Host`, `Content-Length`, and
    /// `Connection` when absent.
    #[must_use]
    pub fn encode(&self, host: &str) -> Vec<u8> {
        let mut head = format!("{} {} HTTP/1.1\r\n", self.method, self.path);
        if !self.has_header("Host") {
            head.push_str(&format!("Host: {host}\r\n"));
        }
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        let sends_body = !self.body.is_empty() || matches!(self.method.as_str(), "PUT" | "POST");
        if sends_body && !self.has_header("Content-Length") {
            head.push_str(&format!("Content-Length: {}\r\n", self.body.len()));
        }
        if !self.has_header("Connection") {
            head.push_str("Connection: close\r\n");
        }
        head.push_str("\r\n");
        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}

// ============================================================================
// SECTION: Response
// ============================================================================

/// Immutable snapshot of an HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    /// Protocol version from the status line.
    version: String,
    /// Status code.
    status: u16,
    /// Reason phrase.
    reason: String,
    /// Headers in receive order with original case.
    headers: Vec<(String, String)>,
    /// Response body.
    body: Vec<u8>,
}

impl HttpResponse {
    /// Returns the protocol version (for example `HTTP/1.1`).
    #[must_use]
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the status code.
    #[must_use]
    pub const fn status(&self) -> u16 {
        self.status
    }

    /// Returns the reason phrase.
    #[must_use]
    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Returns every header in receive order.
    #[must_use]
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// Returns the first header whose name matches exactly.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(key, _)| key == name).map(|(_, value)| value.as_str())
    }

    /// Returns the first header whose name matches ignoring ASCII case.
    #[must_use]
    pub fn header_ci(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Returns the raw body.
    #[must_use]
    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Returns the body as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::MalformedResponse`] when the body is not UTF-8.
    pub fn body_text(&self) -> Result<&str, HarnessError> {
        std::str::from_utf8(&self.body)
            .map_err(|err| HarnessError::MalformedResponse(format!("body is not utf-8: {err}")))
    }

    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::MalformedResponse`] when the body is not JSON.
    pub fn json(&self) -> Result<Value, HarnessError> {
        serde_json::from_slice(&self.body)
            .map_err(|err| HarnessError::MalformedResponse(format!("body is not json: {err}")))
    }

    /// Returns true when the status is 2xx.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }
}

// ============================================================================
// SECTION: Wire Parsing
// ============================================================================

/// Reads one CRLF- or LF-terminated line of at most `budget` bytes and
/// charges it against `budget`; `what` names the section in errors.
async fn read_line<R>(
    reader: &mut R,
    budget: &mut usize,
    what: &str,
) -> Result<String, HarnessError>
where
    R: AsyncBufRead + Unpin,
{
    if *budget == 0 {
        return Err(HarnessError::MalformedResponse(format!("{what} too large")));
    }
    let mut line = Vec::new();
    let limit = u64::try_from(*budget).unwrap_or(u64::MAX);
    let read = (&mut *reader)
        .take(limit)
        .read_until(b'\n', &mut line)
        .await
        .map_err(|err| HarnessError::io("read response line", &err))?;
    if read == 0 {
        return Err(HarnessError::MalformedResponse(format!("connection closed mid-{what}")));
    }
    if line.last() != Some(&b'\n') {
        return Err(HarnessError::MalformedResponse(if read >= *budget {
            format!("{what} too large")
        } else {
            format!("unterminated {what} line")
        }));
    }
    *budget -= read;
    line.pop();
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    String::from_utf8(line)
        .map_err(|_| HarnessError::MalformedResponse(format!("non utf-8 {what} line")))
}

/// Reads a status line and headers, leaving the body unread.
///
/// # Errors
///
/// Returns [`HarnessError::MalformedResponse`] on invalid status lines or
/// headers, or when the head exceeds [`MAX_HEAD_BYTES`].
pub async fn read_head<R>(reader: &mut R) -> Result<HttpResponse, HarnessError>
where
    R: AsyncBufRead + Unpin,
{
    let mut budget = MAX_HEAD_BYTES;
    let status_line = read_line(reader, &mut budget, "response head").await?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(HarnessError::MalformedResponse(format!("bad status line: '{status_line}'")));
    }
    let status = parts
        .next()
        .filter(|code| code.len() == 3)
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| HarnessError::MalformedResponse(format!("bad status code: '{status_line}'")))?;
    let reason = parts.next().unwrap_or_default().to_string();
    let mut headers = Vec::new();
    loop {
        let line = read_line(reader, &mut budget, "response head").await?;
        if line.is_empty() {
            break;
        }
        let (name, value) = line
            .split_once(':')
            .filter(|(name, _)| !name.is_empty() && !name.contains(char::is_whitespace))
            .ok_or_else(|| HarnessError::MalformedResponse(format!("bad header: '{line}'")))?;
        headers.push((name.to_string(), value.trim().to_string()));
    }
    Ok(HttpResponse {
        version: version.to_string(),
        status,
        reason,
        headers,
        body: Vec::new(),
    })
}

/// Reads the body that follows `head`, completing the response.
///
/// Bodies larger than `max_body` bytes are rejected before they are buffered.
///
/// # Errors
///
/// Returns [`HarnessError::MalformedResponse`] on invalid framing or an
/// oversized body and [`HarnessError::Io`] on socket failures.
pub async fn read_body<R>(
    reader: &mut R,
    mut head: HttpResponse,
    method: &str,
    max_body: usize,
) -> Result<HttpResponse, HarnessError>
where
    R: AsyncBufRead + Unpin,
{
    let bodiless = method.eq_ignore_ascii_case("HEAD")
        || (100..200).contains(&head.status)
        || head.status == 204
        || head.status == 304;
    if bodiless {
        return Ok(head);
    }
    let chunked = head
        .header_ci("Transfer-Encoding")
        .is_some_and(|value| value.to_ascii_lowercase().contains("chunked"));
    head.body = if chunked {
        read_chunked(reader, max_body).await?
    } else if let Some(length) = head.header_ci("Content-Length") {
        let declared: u64 = length.trim().parse().map_err(|_| {
            HarnessError::MalformedResponse(format!("bad content-length: '{length}'"))
        })?;
        let length = usize::try_from(declared)
            .ok()
            .filter(|length| *length <= max_body)
            .ok_or_else(|| body_too_large(declared, max_body))?;
        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await.map_err(|err| HarnessError::io("read body", &err))?;
        body
    } else {
        let mut body = Vec::new();
        let limit = u64::try_from(max_body).unwrap_or(u64::MAX).saturating_add(1);
        (&mut *reader)
            .take(limit)
            .read_to_end(&mut body)
            .await
            .map_err(|err| HarnessError::io("read body", &err))?;
        if body.len() > max_body {
            return Err(HarnessError::MalformedResponse(format!(
                "body exceeds limit of {max_body} bytes"
            )));
        }
        body
    };
    Ok(head)
}

/// Error for a body larger than the client accepts.
fn body_too_large(declared: u64, max_body: usize) -> HarnessError {
    HarnessError::MalformedResponse(format!(
        "body of {declared} bytes exceeds limit of {max_body} bytes"
    ))
}

/// Decodes a chunked transfer-encoded body, discarding trailers.
///
/// Each size line and terminator gets its own [`MAX_LINE_BYTES`] bound; the
/// trailer section shares one [`MAX_HEAD_BYTES`] bound.
async fn read_chunked<R>(reader: &mut R, max_body: usize) -> Result<Vec<u8>, HarnessError>
where
    R: AsyncBufRead + Unpin,
{
    let mut body = Vec::new();
    loop {
        let mut line_budget = MAX_LINE_BYTES;
        let line = read_line(reader, &mut line_budget, "chunk size").await?;
        let size_field = line.split(';').next().unwrap_or_default().trim();
        let size = u64::from_str_radix(size_field, 16)
            .map_err(|_| HarnessError::MalformedResponse(format!("bad chunk size: '{line}'")))?;
        if size == 0 {
            let mut trailers = MAX_HEAD_BYTES;
            while !read_line(reader, &mut trailers, "chunk trailer").await?.is_empty() {}
            return Ok(body);
        }
        let start = body.len();
        let end = usize::try_from(size)
            .ok()
            .and_then(|size| start.checked_add(size))
            .filter(|end| *end <= max_body)
            .ok_or_else(|| {
                let total = u64::try_from(start).unwrap_or(u64::MAX).saturating_add(size);
                body_too_large(total, max_body)
            })?;
        body.resize(end, 0);
        reader
            .read_exact(&mut body[start..])
            .await
            .map_err(|err| HarnessError::io("read chunk", &err))?;
        let mut line_budget = MAX_LINE_BYTES;
        if !read_line(reader, &mut line_budget, "chunk terminator").await?.is_empty() {
            return Err(HarnessError::MalformedResponse("chunk missing terminator".to_string()));
        }
    }
}

// ============================================================================
// SECTION: Client
// ============================================================================

/// HTTP/1.1 client bound to one socket address.
#[derive(Debug, Clone)]
pub struct HttpClient {
    /// Target socket.
    endpoint: ControlAddr,
    /// `Host` header value.
    host: String,
    /// Bound on each request.
    timeout: Duration,
    /// Largest response body accepted.
    max_body: usize,
}

impl HttpClient {
    /// Creates a client for an endpoint with a per-request timeout.
    #[must_use]
    pub fn new(endpoint: ControlAddr, timeout: Duration) -> Self {
        Self {
            endpoint,
            host: DEFAULT_HOST.to_string(),
            timeout,
            max_body: DEFAULT_MAX_BODY,
        }
    }

    /// Overrides the response body limit.
    #[must_use]
    pub const fn with_max_body(mut self, max_body: usize) -> Self {
        self.max_body = max_body;
        self
    }

    /// Overrides the `Host` header.
    #[must_use]
    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    /// Returns the target endpoint.
    #[must_use]
    pub const fn endpoint(&self) -> &ControlAddr {
        &self.endpoint
    }

    /// Returns the `Host` header value.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Returns the per-request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Opens a buffered connection to the endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Io`] when the connection cannot be established.
    pub async fn connect(&self) -> Result<BufReader<BoxStream>, HarnessError> {
        let stream = self.endpoint.connect().await?;
        Ok(BufReader::new(stream))
    }

    /// Sends a request and reads the full response.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Timeout`] when the bound elapses, or the I/O and
    /// parsing errors of the exchange.
    pub async fn request(&self, request: &HttpRequest) -> Result<HttpResponse, HarnessError> {
        let label = format!("{} {}", request.method, request.path);
        bounded(&label, self.timeout, async {
            let mut conn = self.connect().await?;
            conn.write_all(&request.encode(&self.host))
                .await
                .map_err(|err| HarnessError::io("write request", &err))?;
            conn.flush().await.map_err(|err| HarnessError::io("flush request", &err))?;
            let head = read_head(&mut conn).await?;
            let response = read_body(&mut conn, head, &request.method, self.max_body).await?;
            debug!(
                endpoint = %self.endpoint,
                request = %label,
                status = response.status(),
                body_len = response.body().len(),
                "http exchange complete"
            );
            Ok::<_, HarnessError>(response)
        })
        .await
    }

    /// Issues a GET request.
    ///
    /// # Errors
    ///
    /// See [`HttpClient::request`].
    pub async fn get(&self, path: &str) -> Result<HttpResponse, HarnessError> {
        self.request(&HttpRequest::get(path)).await
    }
}
