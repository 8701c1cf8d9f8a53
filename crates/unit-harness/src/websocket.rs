// crates/unit-harness/src/websocket.rs
// ============================================================================
// Module: WebSocket Codec
// Description: RFC 6455 handshake helpers, frame codec, and client socket.
// Purpose: Let scenarios exchange individual frames with an upgraded connection.
// Dependencies: tokio, sha1, base64, rand, thiserror, tracing
// ============================================================================

//! ## Overview
//! The codec works frame by frame so scenarios can assert on exactly what the
//! server put on the wire. Client frames are masked with a fresh random key
//! unless a [`FrameWrite`] says otherwise; server frames are unmasked only when
//! their mask bit is set.
//!
//! Invariants:
//! - Payload lengths use the smallest size class (7-bit, 16-bit, 64-bit).
//! - Control frames are never longer than [`MAX_CONTROL_PAYLOAD`] or fragmented
//!   on read.
//! - Frames on one [`WsSocket`] are written and read strictly in order.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use sha1::Digest;
use sha1::Sha1;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tracing::debug;

use crate::error::HarnessError;
use crate::error::bounded;
use crate::http::BoxStream;
use crate::http::HttpRequest;
use crate::http::HttpResponse;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// GUID appended to the client key when computing the accept key.
pub const ACCEPT_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Largest payload the client accepts in a single frame.
pub const DEFAULT_MAX_PAYLOAD: u64 = 16 * 1024 * 1024;

/// Default bound on a single frame read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);

/// Close status for a normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Frame-level protocol failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The opcode is reserved by RFC 6455.
    #[error("reserved opcode {0:#x}")]
    ReservedOpcode(u8),
    /// A control frame declared more than 125 payload bytes.
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlFrameTooLarge(u64),
    /// A control frame arrived without FIN.
    #[error("fragmented control frame ({0})")]
    FragmentedControlFrame(Opcode),
    /// A 64-bit length had its most significant bit set.
    #[error("payload length {0:#x} has the high bit set")]
    LengthOverflow(u64),
    /// The payload exceeds the client's limit.
    #[error("payload of {len} bytes exceeds limit {max}")]
    PayloadTooLarge {
        /// Declared payload length.
        len: u64,
        /// Configured maximum.
        max: u64,
    },
    /// A close frame payload was one byte long or had a non UTF-8 reason.
    #[error("invalid close frame payload")]
    InvalidClosePayload,
    /// A frame of a different kind was expected.
    #[error("expected {expected} frame, got {got}")]
    UnexpectedFrame {
        /// Expected opcode.
        expected: Opcode,
        /// Received opcode.
        got: Opcode,
    },
    /// A close frame arrived with a different status code.
    #[error("expected close code {}, got {}", display_code(*.expected), display_code(*.got))]
    UnexpectedCloseCode {
        /// Expected code.
        expected: Option<u16>,
        /// Received code.
        got: Option<u16>,
    },
    /// A text payload was not valid UTF-8.
    #[error("text payload is not utf-8")]
    InvalidUtf8,
    /// The peer closed the connection.
    #[error("connection closed")]
    Closed,
    /// Socket I/O failed.
    #[error("frame io failure: {0}")]
    Io(String),
}

impl From<std::io::Error> for FrameError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof { Self::Closed } else { Self::Io(err.to_string()) }
    }
}

/// Renders an optional close code; `none` for a close frame without a body.
fn display_code(code: Option<u16>) -> String {
    code.map_or_else(|| "none".to_string(), |code| code.to_string())
}

// ============================================================================
// SECTION: Opcodes
// ============================================================================

/// WebSocket frame opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    /// Continuation of a fragmented message.
    Continuation,
    /// UTF-8 text data.
    Text,
    /// Binary data.
    Binary,
    /// Connection close.
    Close,
    /// Ping.
    Ping,
    /// Pong.
    Pong,
}

impl Opcode {
    /// Decodes a 4-bit opcode.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::ReservedOpcode`] for reserved values.
    pub const fn from_u8(value: u8) -> Result<Self, FrameError> {
        match value {
            0x0 => Ok(Self::Continuation),
            0x1 => Ok(Self::Text),
            0x2 => Ok(Self::Binary),
            0x8 => Ok(Self::Close),
            0x9 => Ok(Self::Ping),
            0xA => Ok(Self::Pong),
            other => Err(FrameError::ReservedOpcode(other)),
        }
    }

    /// Returns the 4-bit wire value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    /// Returns true for close, ping, and pong.
    #[must_use]
    pub const fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Continuation => "continuation",
            Self::Text => "text",
            Self::Binary => "binary",
            Self::Close => "close",
            Self::Ping => "ping",
            Self::Pong => "pong",
        };
        f.write_str(name)
    }
}

// ============================================================================
// SECTION: Frames
// ============================================================================

/// One decoded WebSocket frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bit 1.
    pub rsv1: bool,
    /// Reserved bit 2.
    pub rsv2: bool,
    /// Reserved bit 3.
    pub rsv3: bool,
    /// Frame opcode.
    pub opcode: Opcode,
    /// Whether the frame arrived masked.
    pub masked: bool,
    /// Unmasked payload.
    pub payload: Vec<u8>,
}

impl Frame {
    /// Returns the payload as UTF-8 text.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidUtf8`] when the payload is not UTF-8.
    pub fn text(&self) -> Result<&str, FrameError> {
        std::str::from_utf8(&self.payload).map_err(|_| FrameError::InvalidUtf8)
    }

    /// Returns the close status code of a close frame, if any.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidClosePayload`] for a one-byte payload.
    pub fn close_code(&self) -> Result<Option<u16>, FrameError> {
        match self.payload.as_slice() {
            [] => Ok(None),
            [_] => Err(FrameError::InvalidClosePayload),
            [high, low, ..] => Ok(Some(u16::from_be_bytes([*high, *low]))),
        }
    }

    /// Returns the close reason of a close frame.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::InvalidClosePayload`] when the reason is not UTF-8.
    pub fn close_reason(&self) -> Result<&str, FrameError> {
        self.payload
            .get(2..)
            .map_or(Ok(""), std::str::from_utf8)
            .map_err(|_| FrameError::InvalidClosePayload)
    }
}

/// Mask selection for an outgoing frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Masking {
    /// Fresh random key (the client default).
    Random,
    /// Fixed key, for deterministic wire images.
    Key([u8; 4]),
    /// Unmasked, as a server would send.
    None,
}

/// Options for writing a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameWrite {
    /// Final fragment flag.
    pub fin: bool,
    /// Reserved bits, low three bits used (rsv1 = 0b100).
    pub rsv: u8,
    /// Mask selection.
    pub masking: Masking,
    /// Writes the encoded frame in chunks of this many bytes.
    pub chop_size: Option<usize>,
    /// Declared length overriding the real payload length.
    pub declared_length: Option<u64>,
}

impl Default for FrameWrite {
    fn default() -> Self {
        Self {
            fin: true,
            rsv: 0,
            masking: Masking::Random,
            chop_size: None,
            declared_length: None,
        }
    }
}

impl FrameWrite {
    /// Default client frame: FIN set, randomly masked, written at once.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the FIN flag.
    #[must_use]
    pub const fn fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    /// Sets the reserved bits.
    #[must_use]
    pub const fn rsv(mut self, rsv: u8) -> Self {
        self.rsv = rsv & 0b111;
        self
    }

    /// Sets the masking mode.
    #[must_use]
    pub const fn masking(mut self, masking: Masking) -> Self {
        self.masking = masking;
        self
    }

    /// Writes the frame in chunks.
    #[must_use]
    pub const fn chop_size(mut self, size: usize) -> Self {
        self.chop_size = Some(size);
        self
    }

    /// Overrides the declared payload length.
    #[must_use]
    pub const fn declared_length(mut self, length: u64) -> Self {
        self.declared_length = Some(length);
        self
    }
}

/// Encodes one frame.
#[must_use]
pub fn encode_frame(opcode: Opcode, payload: &[u8], options: &FrameWrite) -> Vec<u8> {
    let length = options.declared_length.unwrap_or(payload.len() as u64);
    let mut out = Vec::with_capacity(payload.len() + 14);
    let fin = if options.fin { 0x80 } else { 0 };
    out.push(fin | ((options.rsv & 0b111) << 4) | opcode.as_u8());
    let key = match options.masking {
        Masking::Random => Some(rand::random::<[u8; 4]>()),
        Masking::Key(key) => Some(key),
        Masking::None => None,
    };
    let mask_bit = if key.is_some() { 0x80 } else { 0 };
    if let Ok(short @ 0..=125) = u8::try_from(length) {
        out.push(mask_bit | short);
    } else if let Ok(medium) = u16::try_from(length) {
        out.push(mask_bit | 126);
        out.extend_from_slice(&medium.to_be_bytes());
    } else {
        out.push(mask_bit | 127);
        out.extend_from_slice(&length.to_be_bytes());
    }
    match key {
        Some(key) => {
            out.extend_from_slice(&key);
            out.extend(payload.iter().zip(key.iter().cycle()).map(|(byte, mask)| byte ^ mask));
        }
        None => out.extend_from_slice(payload),
    }
    out
}

/// Builds a close frame payload.
#[must_use]
pub fn close_payload(code: u16, reason: &str) -> Vec<u8> {
    let mut payload = code.to_be_bytes().to_vec();
    payload.extend_from_slice(reason.as_bytes());
    payload
}

/// Reads and decodes exactly one frame.
///
/// # Errors
///
/// Returns [`FrameError`] for malformed headers, oversize payloads, or a
/// closed connection.
pub async fn read_frame<R>(reader: &mut R, max_payload: u64) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut head = [0u8; 2];
    reader.read_exact(&mut head).await?;
    let fin = head[0] & 0x80 != 0;
    let opcode = Opcode::from_u8(head[0] & 0x0f)?;
    let masked = head[1] & 0x80 != 0;
    let length = match head[1] & 0x7f {
        126 => u64::from(reader.read_u16().await?),
        127 => {
            let length = reader.read_u64().await?;
            if length & (1 << 63) != 0 {
                return Err(FrameError::LengthOverflow(length));
            }
            length
        }
        short => u64::from(short),
    };
    if opcode.is_control() {
        if length > MAX_CONTROL_PAYLOAD as u64 {
            return Err(FrameError::ControlFrameTooLarge(length));
        }
        if !fin {
            return Err(FrameError::FragmentedControlFrame(opcode));
        }
    }
    if length > max_payload {
        return Err(FrameError::PayloadTooLarge {
            len: length,
            max: max_payload,
        });
    }
    let mut key = [0u8; 4];
    if masked {
        reader.read_exact(&mut key).await?;
    }
    let size = usize::try_from(length).map_err(|_| FrameError::PayloadTooLarge {
        len: length,
        max: max_payload,
    })?;
    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;
    if masked {
        for (byte, mask) in payload.iter_mut().zip(key.iter().cycle()) {
            *byte ^= mask;
        }
    }
    Ok(Frame {
        fin,
        rsv1: head[0] & 0x40 != 0,
        rsv2: head[0] & 0x20 != 0,
        rsv3: head[0] & 0x10 != 0,
        opcode,
        masked,
        payload,
    })
}

// ============================================================================
// SECTION: Handshake
// ============================================================================

/// Generates a random base64 `Sec-WebSocket-Key`.
#[must_use]
pub fn generate_key() -> String {
    STANDARD.encode(rand::random::<[u8; 16]>())
}

/// Computes the `Sec-WebSocket-Accept` value for a client key.
#[must_use]
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(ACCEPT_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Builds the upgrade request for `path`.
#[must_use]
pub fn handshake_request(path: &str, key: &str, protocol: Option<&str>) -> HttpRequest {
    let request = HttpRequest::get(path)
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Key", key)
        .header("Sec-WebSocket-Version", "13");
    match protocol {
        Some(protocol) => request.header("Sec-WebSocket-Protocol", protocol),
        None => request,
    }
}

/// Verifies a switching-protocols response against the client key.
///
/// # Errors
///
/// Returns [`HarnessError::Handshake`] when the status, upgrade headers, or
/// accept key are wrong.
pub fn verify_upgrade(response: &HttpResponse, key: &str) -> Result<(), HarnessError> {
    if response.status() != 101 {
        return Err(HarnessError::Handshake(format!("expected status 101, got {}", response.status())));
    }
    let upgrade = response.header_ci("Upgrade").unwrap_or_default();
    if !upgrade.eq_ignore_ascii_case("websocket") {
        return Err(HarnessError::Handshake(format!("bad upgrade header '{upgrade}'")));
    }
    let connection = response.header_ci("Connection").unwrap_or_default();
    if !connection.split(',').any(|token| token.trim().eq_ignore_ascii_case("upgrade")) {
        return Err(HarnessError::Handshake(format!("bad connection header '{connection}'")));
    }
    let expected = accept_key(key);
    match response.header_ci("Sec-WebSocket-Accept") {
        Some(accept) if accept == expected => Ok(()),
        Some(other) => Err(HarnessError::Handshake(format!(
            "accept key mismatch: expected {expected}, got {other}"
        ))),
        None => Err(HarnessError::Handshake("missing Sec-WebSocket-Accept".to_string())),
    }
}

// ============================================================================
// SECTION: Socket
// ============================================================================

/// Upgraded WebSocket connection owned by one scenario.
pub struct WsSocket {
    /// Buffered connection; may already hold bytes read past the handshake.
    conn: BufReader<BoxStream>,
    /// Bound on each frame read.
    read_timeout: Duration,
    /// Largest accepted payload.
    max_payload: u64,
}

impl fmt::Debug for WsSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsSocket")
            .field("read_timeout", &self.read_timeout)
            .field("max_payload", &self.max_payload)
            .finish_non_exhaustive()
    }
}

impl WsSocket {
    /// Wraps an upgraded connection.
    #[must_use]
    pub fn new(conn: BufReader<BoxStream>, read_timeout: Duration) -> Self {
        Self {
            conn,
            read_timeout,
            max_payload: DEFAULT_MAX_PAYLOAD,
        }
    }

    /// Overrides the accepted payload limit.
    #[must_use]
    pub const fn with_max_payload(mut self, max_payload: u64) -> Self {
        self.max_payload = max_payload;
        self
    }

    /// Writes one masked frame with FIN set.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Frame`] when the write fails.
    pub async fn frame_write(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), HarnessError> {
        self.frame_write_with(opcode, payload, &FrameWrite::new()).await
    }

    /// Writes one frame with explicit options.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Frame`] when the write fails.
    pub async fn frame_write_with(
        &mut self,
        opcode: Opcode,
        payload: &[u8],
        options: &FrameWrite,
    ) -> Result<(), HarnessError> {
        let bytes = encode_frame(opcode, payload, options);
        let chunk = options.chop_size.filter(|size| *size > 0).unwrap_or(bytes.len().max(1));
        for part in bytes.chunks(chunk) {
            self.conn.write_all(part).await.map_err(FrameError::from)?;
            self.conn.flush().await.map_err(FrameError::from)?;
        }
        debug!(%opcode, len = payload.len(), fin = options.fin, "frame written");
        Ok(())
    }

    /// Reads exactly one frame.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Timeout`] when no frame arrives in time and
    /// [`HarnessError::Frame`] for protocol errors or a closed connection.
    pub async fn frame_read(&mut self) -> Result<Frame, HarnessError> {
        let max_payload = self.max_payload;
        let conn = &mut self.conn;
        let frame = bounded("websocket frame read", self.read_timeout, async move {
            read_frame(conn, max_payload).await.map_err(HarnessError::from)
        })
        .await?;
        debug!(opcode = %frame.opcode, len = frame.payload.len(), fin = frame.fin, "frame read");
        Ok(frame)
    }

    /// Sends a data message, fragmented when `fragment_size` is set.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Frame`] when a write fails.
    pub async fn message(
        &mut self,
        opcode: Opcode,
        payload: &[u8],
        fragment_size: Option<usize>,
    ) -> Result<(), HarnessError> {
        let size = fragment_size.filter(|size| *size > 0).unwrap_or(payload.len().max(1));
        let mut fragments = payload.chunks(size).peekable();
        if fragments.peek().is_none() {
            return self.frame_write(opcode, payload).await;
        }
        let mut current = opcode;
        while let Some(fragment) = fragments.next() {
            let fin = fragments.peek().is_none();
            self.frame_write_with(current, fragment, &FrameWrite::new().fin(fin)).await?;
            current = Opcode::Continuation;
        }
        Ok(())
    }

    /// Reads a complete data message, reassembling fragments.
    ///
    /// Pings received in between are answered with pongs and unsolicited
    /// pongs are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Frame`] when the fragment sequence is invalid or
    /// the peer closes.
    pub async fn message_read(&mut self) -> Result<(Opcode, Vec<u8>), HarnessError> {
        let mut message: Option<(Opcode, Vec<u8>)> = None;
        loop {
            let frame = self.frame_read().await?;
            match frame.opcode {
                Opcode::Ping => {
                    self.frame_write(Opcode::Pong, &frame.payload).await?;
                    continue;
                }
                Opcode::Pong => continue,
                Opcode::Close => {
                    return Err(FrameError::UnexpectedFrame {
                        expected: message.as_ref().map_or(Opcode::Text, |_| Opcode::Continuation),
                        got: Opcode::Close,
                    }
                    .into());
                }
                Opcode::Continuation => {
                    let Some((_, data)) = message.as_mut() else {
                        return Err(FrameError::UnexpectedFrame {
                            expected: Opcode::Text,
                            got: Opcode::Continuation,
                        }
                        .into());
                    };
                    data.extend_from_slice(&frame.payload);
                }
                Opcode::Text | Opcode::Binary => {
                    if message.is_some() {
                        return Err(FrameError::UnexpectedFrame {
                            expected: Opcode::Continuation,
                            got: frame.opcode,
                        }
                        .into());
                    }
                    message = Some((frame.opcode, frame.payload));
                }
            }
            if frame.fin
                && let Some(done) = message.take()
            {
                return Ok(done);
            }
        }
    }

    /// Sends a close frame.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Frame`] when the write fails.
    pub async fn close(&mut self, code: u16, reason: &str) -> Result<(), HarnessError> {
        self.frame_write(Opcode::Close, &close_payload(code, reason)).await
    }

    /// Reads the next frame and asserts it is a close frame with `expected` code.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Frame`] when a different frame or code arrives.
    pub async fn check_close(&mut self, expected: Option<u16>) -> Result<Frame, HarnessError> {
        let frame = self.frame_read().await?;
        if frame.opcode != Opcode::Close {
            return Err(FrameError::UnexpectedFrame {
                expected: Opcode::Close,
                got: frame.opcode,
            }
            .into());
        }
        let got = frame.close_code()?;
        if expected.is_some() && got != expected {
            return Err(FrameError::UnexpectedCloseCode {
                expected,
                got,
            }
            .into());
        }
        Ok(frame)
    }

    /// Shuts down the write half and releases the socket.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Io`] when the shutdown fails.
    pub async fn shutdown(mut self) -> Result<(), HarnessError> {
        self.conn.get_mut().shutdown().await.map_err(|err| HarnessError::io("websocket shutdown", &err))
    }
}
