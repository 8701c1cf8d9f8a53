// system-tests/tests/helpers/harness.rs
// ============================================================================
// Module: Sandboxed Server
// Description: Starts a daemon per scenario and wires both harnesses to it.
// Purpose: Turn missing daemons or runtimes into skips before any assertion.
// Dependencies: system-tests, unit-harness, tempfile
// ============================================================================

//! ## Overview
//! [`start_unit`] launches the daemon in a fresh temp directory, builds the
//! runtime inventory from its log plus a probe of the Node binary, and returns
//! an [`ApplicationHarness`] and [`WebSocketHarness`] pointed at the listener.

use std::net::Ipv4Addr;
use std::net::SocketAddr;
use std::sync::OnceLock;

use system_tests::config::SystemTestConfig;
use system_tests::config::SystemTestEnv;
use tempfile::TempDir;
use tracing::info;
use unit_harness::ApplicationDescriptor;
use unit_harness::ApplicationHarness;
use unit_harness::ControlAddr;
use unit_harness::FixtureLayout;
use unit_harness::HarnessError;
use unit_harness::HttpClient;
use unit_harness::ServerOptions;
use unit_harness::UnitServer;
use unit_harness::WebSocketHarness;

use super::logging::init_tracing;
use super::timeouts::REQUEST_TIMEOUT;
use super::timeouts::STARTUP_TIMEOUT;
use super::timeouts::resolve_timeout;

/// Result of preparing a scenario.
pub enum Setup<T> {
    /// Ready to run.
    Ready(T),
    /// Environment cannot run the scenario; carries the reason.
    Skip(String),
}

/// Running daemon plus the harnesses bound to it.
pub struct UnitSandbox {
    /// Application loader and HTTP client.
    pub app: ApplicationHarness,
    /// WebSocket client for the same listener.
    pub ws: WebSocketHarness,
    /// Daemon process.
    server: UnitServer,
    /// Holds the daemon state and staged fixtures until the scenario ends.
    _dir: TempDir,
}

impl UnitSandbox {
    /// Loads `app`, mapping unmet prerequisites to a skip.
    pub async fn load(&mut self, app: &ApplicationDescriptor) -> Result<Setup<()>, HarnessError> {
        match self.app.load(app).await {
            Ok(()) => Ok(Setup::Ready(())),
            Err(HarnessError::PrerequisiteUnmet(reason)) => Ok(Setup::Skip(reason)),
            Err(err) => Err(err),
        }
    }

    /// Stops the daemon and fails on unexpected log alerts.
    pub async fn shutdown(self) -> Result<(), HarnessError> {
        self.server.stop().await
    }
}

/// Starts a sandboxed daemon, or returns why the scenario cannot run.
pub async fn start_unit(
    config: &SystemTestConfig,
) -> Result<Setup<UnitSandbox>, Box<dyn std::error::Error>> {
    init_tracing();
    let Some(unitd) = config.unitd.clone() else {
        return Ok(Setup::Skip(format!("{} is not set", SystemTestEnv::Unitd.as_str())));
    };
    if !unitd.is_file() {
        return Ok(Setup::Skip(format!("daemon not found at {}", unitd.display())));
    }
    let request_timeout = resolve_timeout(config, REQUEST_TIMEOUT);

    let dir = tempfile::Builder::new().prefix("unit-st-").tempdir()?;
    let mut options = ServerOptions::new(unitd, dir.path().join("server"));
    options.modules_dir.clone_from(&config.modules_dir);
    options.startup_timeout = resolve_timeout(config, STARTUP_TIMEOUT);
    options.request_timeout = request_timeout;
    let server = UnitServer::start(options).await?;

    let mut inventory = server.inventory().await?;
    inventory.probe_runtime("node", &config.node).await?;

    let listener = SocketAddr::from((Ipv4Addr::LOCALHOST, config.listen_port));
    let http = HttpClient::new(ControlAddr::Inet(listener), request_timeout);
    let layout = FixtureLayout {
        fixtures_root: config.fixtures_dir.clone(),
        workspace: dir.path().join("apps"),
        node_binary: config.node.display().to_string(),
        node_modules: config.node_modules.clone(),
        listener: format!("*:{}", config.listen_port),
    };
    info!(%listener, fixtures = %config.fixtures_dir.display(), "sandbox ready");
    Ok(Setup::Ready(UnitSandbox {
        app: ApplicationHarness::new(server.control().clone(), http.clone(), inventory, layout),
        ws: WebSocketHarness::new(http).with_read_timeout(request_timeout),
        server,
        _dir: dir,
    }))
}

/// Serializes scenarios within one binary; they share the listener port.
pub async fn serial() -> tokio::sync::MutexGuard<'static, ()> {
    static LOCK: OnceLock<tokio::sync::Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| tokio::sync::Mutex::new(())).lock().await
}
