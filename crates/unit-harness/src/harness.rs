// crates/unit-harness/src/harness.rs
// ============================================================================
// Module: Harnesses
// Description: Application and WebSocket harnesses composed by scenarios.
// Purpose: Expose load/get and upgrade/frame primitives over a running server.
// Dependencies: tokio, walkdir, tracing
// ============================================================================

//! ## Overview
//! Scenarios hold an [`ApplicationHarness`] and, when they need one, a
//! [`WebSocketHarness`] side by side; neither depends on the other.
//!
//! Invariants:
//! - [`ApplicationHarness::load`] succeeds at most once per harness.
//! - Prerequisites are evaluated before any file is copied or config applied.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tracing::info;
use walkdir::WalkDir;

use crate::app::ApplicationDescriptor;
use crate::app::LoadContext;
use crate::app::RuntimeFamily;
use crate::control::ControlClient;
use crate::error::HarnessError;
use crate::error::bounded;
use crate::http::HttpClient;
use crate::http::HttpRequest;
use crate::http::HttpResponse;
use crate::http::read_head;
use crate::prerequisites::ModuleInventory;
use crate::websocket::DEFAULT_READ_TIMEOUT;
use crate::websocket::Frame;
use crate::websocket::Opcode;
use crate::websocket::WsSocket;
use crate::websocket::generate_key;
use crate::websocket::handshake_request;
use crate::websocket::verify_upgrade;

// ============================================================================
// SECTION: Fixture Layout
// ============================================================================

/// Where fixtures come from and where they are staged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixtureLayout {
    /// Root holding `node/` and `python/` fixture trees.
    pub fixtures_root: PathBuf,
    /// Per-test directory fixtures are copied into.
    pub workspace: PathBuf,
    /// Node executable passed to `/usr/bin/env`.
    pub node_binary: String,
    /// Directory containing `unit-http` and other Node dependencies.
    pub node_modules: Option<PathBuf>,
    /// Listener key, for example `*:7080`.
    pub listener: String,
}

// ============================================================================
// SECTION: Application Harness
// ============================================================================

/// Loads one application and issues HTTP requests against it.
#[derive(Debug)]
pub struct ApplicationHarness {
    /// Control API client.
    control: ControlClient,
    /// Client bound to the application listener.
    http: HttpClient,
    /// Discovered runtime modules.
    inventory: ModuleInventory,
    /// Fixture locations.
    layout: FixtureLayout,
    /// Name of the loaded application.
    loaded: Option<String>,
}

impl ApplicationHarness {
    /// Creates a harness with nothing loaded.
    #[must_use]
    pub const fn new(
        control: ControlClient,
        http: HttpClient,
        inventory: ModuleInventory,
        layout: FixtureLayout,
    ) -> Self {
        Self {
            control,
            http,
            inventory,
            layout,
            loaded: None,
        }
    }

    /// Returns the discovered runtime modules.
    #[must_use]
    pub const fn inventory(&self) -> &ModuleInventory {
        &self.inventory
    }

    /// Returns the client bound to the application listener.
    #[must_use]
    pub const fn http(&self) -> &HttpClient {
        &self.http
    }

    /// Returns the loaded application name.
    #[must_use]
    pub fn loaded(&self) -> Option<&str> {
        self.loaded.as_deref()
    }

    /// Stages the fixture and configures the server to serve it.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::PrerequisiteUnmet`] when the runtime is missing
    /// or too old, [`HarnessError::AlreadyLoaded`] on a second load, and
    /// [`HarnessError::Control`] when the server rejects the configuration.
    pub async fn load(&mut self, app: &ApplicationDescriptor) -> Result<(), HarnessError> {
        if let Some(name) = &self.loaded {
            return Err(HarnessError::AlreadyLoaded(name.clone()));
        }
        app.prerequisites().evaluate(&self.inventory).into_result()?;
        let node_modules = match app.family() {
            RuntimeFamily::Node { .. } => Some(self.node_modules()?),
            RuntimeFamily::Python => None,
        };
        let source = app.fixture_dir(&self.layout.fixtures_root);
        if !source.is_dir() {
            return Err(HarnessError::Config(format!(
                "fixture directory missing: {}",
                source.display()
            )));
        }
        let app_dir = self.layout.workspace.join(app.family().module_name());
        stage_fixture(source, app_dir.clone(), node_modules).await?;

        let ctx = LoadContext {
            app_dir,
            listener: self.layout.listener.clone(),
            node_binary: self.layout.node_binary.clone(),
        };
        let reply = self.control.conf(&app.render_config(&ctx), "").await?;
        if reply.get("success").is_none() {
            return Err(HarnessError::Control(format!("unexpected reply: {reply}")));
        }
        info!(application = app.module_path(), entry = app.entry(), "application loaded");
        self.loaded = Some(app.module_path().to_string());
        Ok(())
    }

    /// Issues a GET against the loaded application.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::NoApplicationLoaded`] before `load`, otherwise
    /// the errors of [`HttpClient::request`].
    pub async fn get(&self, path: &str) -> Result<HttpResponse, HarnessError> {
        self.request(&HttpRequest::get(path)).await
    }

    /// Issues an arbitrary request against the loaded application.
    ///
    /// # Errors
    ///
    /// See [`ApplicationHarness::get`].
    pub async fn request(&self, request: &HttpRequest) -> Result<HttpResponse, HarnessError> {
        if self.loaded.is_none() {
            return Err(HarnessError::NoApplicationLoaded);
        }
        self.http.request(request).await
    }

    /// Replaces configuration at `path` (relative to `/config`).
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Control`] when the server rejects the change.
    pub async fn conf(&self, value: &Value, path: &str) -> Result<Value, HarnessError> {
        self.control.conf(value, path).await
    }

    /// Reads configuration at `path` (relative to `/config`).
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Control`] when the path does not exist.
    pub async fn conf_get(&self, path: &str) -> Result<Value, HarnessError> {
        self.control.conf_get(path).await
    }

    /// Resolves the `node_modules` directory, requiring `unit-http`.
    fn node_modules(&self) -> Result<PathBuf, HarnessError> {
        let Some(dir) = &self.layout.node_modules else {
            return Err(HarnessError::PrerequisiteUnmet(
                "node_modules directory is not configured".to_string(),
            ));
        };
        if !dir.join("unit-http").is_dir() {
            return Err(HarnessError::PrerequisiteUnmet(format!(
                "unit-http is not installed in {}",
                dir.display()
            )));
        }
        Ok(dir.clone())
    }
}

/// Copies a fixture (and optionally `node_modules`) into the workspace.
async fn stage_fixture(
    source: PathBuf,
    target: PathBuf,
    node_modules: Option<PathBuf>,
) -> Result<(), HarnessError> {
    tokio::task::spawn_blocking(move || {
        if target.exists() {
            std::fs::remove_dir_all(&target)?;
        }
        copy_tree(&source, &target)?;
        if let Some(modules) = node_modules {
            copy_tree(&modules, &target.join("node_modules"))?;
        }
        Ok::<(), io::Error>(())
    })
    .await
    .map_err(|err| HarnessError::Io(format!("stage fixture join failed: {err}")))?
    .map_err(|err| HarnessError::io("stage fixture", &err))
}

/// Recursively copies `source` into `target`, following symlinks.
fn copy_tree(source: &Path, target: &Path) -> io::Result<()> {
    for entry in WalkDir::new(source).follow_links(true) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(source).map_err(io::Error::other)?;
        let destination = target.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&destination)?;
        } else {
            std::fs::copy(entry.path(), &destination)?;
        }
    }
    Ok(())
}

// ============================================================================
// SECTION: WebSocket Harness
// ============================================================================

/// Performs upgrades against the application listener and moves frames.
#[derive(Debug, Clone)]
pub struct WebSocketHarness {
    /// Client bound to the application listener.
    http: HttpClient,
    /// Bound on each frame read.
    read_timeout: Duration,
    /// Offered subprotocol.
    protocol: Option<String>,
}

impl WebSocketHarness {
    /// Creates a harness offering the `chat` subprotocol.
    #[must_use]
    pub fn new(http: HttpClient) -> Self {
        Self {
            http,
            read_timeout: DEFAULT_READ_TIMEOUT,
            protocol: Some("chat".to_string()),
        }
    }

    /// Overrides the frame read bound.
    #[must_use]
    pub const fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Overrides the offered subprotocol.
    #[must_use]
    pub fn with_protocol(mut self, protocol: Option<&str>) -> Self {
        self.protocol = protocol.map(str::to_string);
        self
    }

    /// Upgrades `/` and returns the handshake response, socket, and key.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Handshake`] unless the server answers `101`
    /// with the correct accept key.
    pub async fn upgrade(&self) -> Result<(HttpResponse, WsSocket, String), HarnessError> {
        self.upgrade_path("/").await
    }

    /// Upgrades `path`.
    ///
    /// # Errors
    ///
    /// See [`WebSocketHarness::upgrade`].
    pub async fn upgrade_path(
        &self,
        path: &str,
    ) -> Result<(HttpResponse, WsSocket, String), HarnessError> {
        let key = generate_key();
        let request = handshake_request(path, &key, self.protocol.as_deref());
        let (response, conn) = bounded("websocket upgrade", self.http.timeout(), async {
            let mut conn = self.http.connect().await?;
            conn.write_all(&request.encode(self.http.host()))
                .await
                .map_err(|err| HarnessError::io("write upgrade", &err))?;
            conn.flush().await.map_err(|err| HarnessError::io("flush upgrade", &err))?;
            let response = read_head(&mut conn).await?;
            Ok::<_, HarnessError>((response, conn))
        })
        .await?;
        verify_upgrade(&response, &key)?;
        info!(path, "websocket upgraded");
        Ok((response, WsSocket::new(conn, self.read_timeout), key))
    }

    /// Writes one masked frame with FIN set.
    ///
    /// # Errors
    ///
    /// See [`WsSocket::frame_write`].
    pub async fn frame_write(
        &self,
        sock: &mut WsSocket,
        opcode: Opcode,
        payload: &[u8],
    ) -> Result<(), HarnessError> {
        sock.frame_write(opcode, payload).await
    }

    /// Reads exactly one frame.
    ///
    /// # Errors
    ///
    /// See [`WsSocket::frame_read`].
    pub async fn frame_read(&self, sock: &mut WsSocket) -> Result<Frame, HarnessError> {
        sock.frame_read().await
    }
}
