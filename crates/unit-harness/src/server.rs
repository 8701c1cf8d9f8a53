// crates/unit-harness/src/server.rs
// ============================================================================
// Module: Server Process
// Description: Spawn, probe, and stop the application server under test.
// Purpose: Give each scenario a private daemon with its own state and sockets.
// Dependencies: tokio, tracing, nix
// ============================================================================

//! ## Overview
//! [`UnitServer::start`] runs the daemon in the foreground with every path
//! (control socket, pid, log, state, tmp) inside a per-test work directory,
//! then waits for the control API. [`UnitServer::stop`] asks the daemon to
//! quit with `SIGQUIT`, kills it if it has not exited within the stop bound,
//! and fails when the log carries unexpected `[alert]` lines.
//!
//! Invariants:
//! - The child is killed on drop; no daemon outlives its scenario.
//! - A graceful stop is always attempted before `SIGKILL`.
//! - Alerts matching a configured skip pattern are ignored.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Child;
use tokio::process::Command;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::control::ControlAddr;
use crate::control::ControlClient;
use crate::error::HarnessError;
use crate::prerequisites::ModuleInventory;
use crate::readiness::wait_for_ready;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default bound on daemon startup.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default bound on a single control or application request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Default bound on a graceful stop before the daemon is killed.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Number of log lines quoted in startup failures.
const LOG_TAIL_LINES: usize = 20;

// ============================================================================
// SECTION: Options
// ============================================================================

/// Launch options for the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOptions {
    /// Daemon executable.
    pub binary: PathBuf,
    /// Directory holding language modules, when not the build default.
    pub modules_dir: Option<PathBuf>,
    /// Per-test directory for sockets, logs, and state.
    pub work_dir: PathBuf,
    /// Control socket; defaults to a Unix socket in `work_dir`.
    pub control: Option<ControlAddr>,
    /// Bound on startup.
    pub startup_timeout: Duration,
    /// Bound on each control request.
    pub request_timeout: Duration,
    /// Bound on a graceful stop.
    pub stop_timeout: Duration,
    /// Additional command-line arguments.
    pub extra_args: Vec<String>,
    /// Substrings of alert lines that do not fail the scenario.
    pub alert_skip: Vec<String>,
}

impl ServerOptions {
    /// Creates options with default timeouts and a Unix control socket.
    #[must_use]
    pub fn new(binary: PathBuf, work_dir: PathBuf) -> Self {
        Self {
            binary,
            modules_dir: None,
            work_dir,
            control: None,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            stop_timeout: DEFAULT_STOP_TIMEOUT,
            extra_args: Vec::new(),
            alert_skip: Vec::new(),
        }
    }

    /// Returns the effective control address.
    #[must_use]
    pub fn control_addr(&self) -> ControlAddr {
        self.control
            .clone()
            .unwrap_or_else(|| ControlAddr::Unix(self.work_dir.join("control.unit.sock")))
    }

    /// Returns the daemon log path.
    #[must_use]
    pub fn log_path(&self) -> PathBuf {
        self.work_dir.join("unit.log")
    }

    /// Returns the daemon command-line arguments.
    #[must_use]
    pub fn command_args(&self) -> Vec<String> {
        let path = |name: &str| self.work_dir.join(name).display().to_string();
        let mut args = vec![
            "--no-daemonize".to_string(),
            "--control".to_string(),
            self.control_addr().to_string(),
            "--pid".to_string(),
            path("unit.pid"),
            "--log".to_string(),
            path("unit.log"),
            "--state".to_string(),
            path("state"),
            "--tmpdir".to_string(),
            path("tmp"),
        ];
        if let Some(modules) = &self.modules_dir {
            args.push("--modules".to_string());
            args.push(modules.display().to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

// ============================================================================
// SECTION: Server
// ============================================================================

/// Running daemon owned by one scenario.
#[derive(Debug)]
pub struct UnitServer {
    /// Daemon process.
    child: Child,
    /// Control API client.
    control: ControlClient,
    /// Daemon log file.
    log_path: PathBuf,
    /// Alert substrings to ignore.
    alert_skip: Vec<String>,
    /// Bound on a graceful stop.
    stop_timeout: Duration,
}

impl UnitServer {
    /// Spawns the daemon and waits until the control API answers.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Process`] when the daemon cannot be spawned or
    /// does not become ready; the message carries the log tail.
    pub async fn start(options: ServerOptions) -> Result<Self, HarnessError> {
        for dir in ["state", "tmp"] {
            tokio::fs::create_dir_all(options.work_dir.join(dir))
                .await
                .map_err(|err| HarnessError::io("create server directories", &err))?;
        }
        let args = options.command_args();
        let mut child = Command::new(&options.binary)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                HarnessError::Process(format!("spawn {}: {err}", options.binary.display()))
            })?;
        let control = ControlClient::new(options.control_addr(), options.request_timeout);
        let log_path = options.log_path();
        info!(binary = %options.binary.display(), control = %control.addr(), "server starting");

        let probe_client = control.clone();
        let ready = wait_for_ready(
            || {
                let client = probe_client.clone();
                async move { client.conf_get("").await.map(|_| ()) }
            },
            options.startup_timeout,
            "control api",
        )
        .await;
        if let Err(err) = ready {
            let exited = child.try_wait().ok().flatten();
            if let Err(kill_err) = child.kill().await {
                warn!(error = %kill_err, "failed to kill server after startup failure");
            }
            let tail = log_tail(&log_path).await;
            return Err(HarnessError::Process(match exited {
                Some(status) => format!("server exited early ({status}): {err}\n{tail}"),
                None => format!("server not ready: {err}\n{tail}"),
            }));
        }
        info!(control = %control.addr(), "server ready");
        Ok(Self {
            child,
            control,
            log_path,
            alert_skip: options.alert_skip,
            stop_timeout: options.stop_timeout,
        })
    }

    /// Returns the control API client.
    #[must_use]
    pub const fn control(&self) -> &ControlClient {
        &self.control
    }

    /// Returns the daemon log path.
    #[must_use]
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Reads the daemon log.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Io`] when the log cannot be read.
    pub async fn read_log(&self) -> Result<String, HarnessError> {
        let bytes = tokio::fs::read(&self.log_path)
            .await
            .map_err(|err| HarnessError::io("read server log", &err))?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Returns the modules the daemon reported during discovery.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Io`] when the log cannot be read.
    pub async fn inventory(&self) -> Result<ModuleInventory, HarnessError> {
        Ok(ModuleInventory::from_server_log(&self.read_log().await?))
    }

    /// Stops the daemon and checks its log for alerts.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Process`] when the daemon cannot be reaped or the
    /// log carries unexpected alerts, and [`HarnessError::Io`] when the log
    /// cannot be read.
    pub async fn stop(mut self) -> Result<(), HarnessError> {
        let exited = self
            .child
            .try_wait()
            .map_err(|err| HarnessError::Process(format!("poll server: {err}")))?;
        match exited {
            Some(status) => warn!(%status, "server exited before stop"),
            None => self.terminate().await?,
        }
        info!("server stopped");
        let log = self.read_log().await?;
        check_alerts(&log, &self.alert_skip)
    }

    /// Sends `SIGQUIT` and waits up to the stop bound, then kills the daemon.
    async fn terminate(&mut self) -> Result<(), HarnessError> {
        if request_quit(&self.child) {
            match tokio::time::timeout(self.stop_timeout, self.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!(%status, "server quit");
                    return Ok(());
                }
                Ok(Err(err)) => {
                    return Err(HarnessError::Process(format!("wait for server: {err}")));
                }
                Err(_) => warn!(
                    timeout_ms = u64::try_from(self.stop_timeout.as_millis()).unwrap_or(u64::MAX),
                    "server ignored quit signal; killing"
                ),
            }
        }
        self.child.kill().await.map_err(|err| HarnessError::Process(format!("kill server: {err}")))
    }
}

/// Delivers the daemon's graceful shutdown signal; false when it was not sent.
#[cfg(unix)]
fn request_quit(child: &Child) -> bool {
    use nix::sys::signal::Signal;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) else {
        return false;
    };
    match kill(Pid::from_raw(pid), Signal::SIGQUIT) {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, pid, "failed to send quit signal");
            false
        }
    }
}

/// Platforms without signals go straight to kill.
#[cfg(not(unix))]
const fn request_quit(_child: &Child) -> bool {
    false
}

// ============================================================================
// SECTION: Log Helpers
// ============================================================================

/// Fails when `log` has `[alert]` lines not matching any skip substring.
///
/// # Errors
///
/// Returns [`HarnessError::Process`] listing the offending lines.
pub fn check_alerts(log: &str, skip: &[String]) -> Result<(), HarnessError> {
    let alerts: Vec<&str> = log
        .lines()
        .filter(|line| line.contains("[alert]"))
        .filter(|line| !skip.iter().any(|pattern| line.contains(pattern.as_str())))
        .collect();
    if alerts.is_empty() {
        return Ok(());
    }
    for alert in &alerts {
        warn!(line = alert, "server alert");
    }
    Err(HarnessError::Process(format!("alerts in server log:\n{}", alerts.join("\n"))))
}

/// Returns the last lines of the log, or a placeholder when unreadable.
async fn log_tail(path: &Path) -> String {
    let Ok(bytes) = tokio::fs::read(path).await else {
        return format!("(no log at {})", path.display());
    };
    let text = String::from_utf8_lossy(&bytes);
    let lines: Vec<&str> = text.lines().collect();
    lines[lines.len().saturating_sub(LOG_TAIL_LINES)..].join("\n")
}
