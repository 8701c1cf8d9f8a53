// system-tests/src/config/env.rs
// ============================================================================
// Module: System Test Environment
// Description: Environment- and file-backed configuration for system tests.
// Purpose: Centralize settings parsing with strict UTF-8 validation.
// Dependencies: serde, toml
// ============================================================================

//! ## Overview
//! Settings come from an optional TOML file named by
//! `UNIT_SYSTEM_TEST_CONFIG`, then from `UNIT_SYSTEM_TEST_*` environment
//! variables, which win over the file. Invalid UTF-8, empty values, and
//! malformed numbers fail closed.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

// ============================================================================
// SECTION: Environment Constants
// ============================================================================

/// Listener port used when none is configured.
pub const DEFAULT_LISTEN_PORT: u16 = 7080;

/// Node binary used when none is configured.
const DEFAULT_NODE: &str = "node";

/// Environment keys for system test configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemTestEnv {
    /// Daemon executable; suites skip when unset.
    Unitd,
    /// Directory holding the daemon's language modules.
    ModulesDir,
    /// Node executable used for the runtime probe and by applications.
    Node,
    /// Directory holding `unit-http` and `websocket`.
    NodeModules,
    /// Root of the application fixtures.
    FixturesDir,
    /// Optional run root override.
    RunRoot,
    /// Optional timeout override in seconds (positive integer).
    TimeoutSeconds,
    /// Application listener port.
    ListenPort,
    /// Optional TOML file supplying the same settings.
    Config,
}

impl SystemTestEnv {
    /// Returns the canonical environment variable name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unitd => "UNIT_SYSTEM_TEST_UNITD",
            Self::ModulesDir => "UNIT_SYSTEM_TEST_MODULES_DIR",
            Self::Node => "UNIT_SYSTEM_TEST_NODE",
            Self::NodeModules => "UNIT_SYSTEM_TEST_NODE_MODULES",
            Self::FixturesDir => "UNIT_SYSTEM_TEST_FIXTURES_DIR",
            Self::RunRoot => "UNIT_SYSTEM_TEST_RUN_ROOT",
            Self::TimeoutSeconds => "UNIT_SYSTEM_TEST_TIMEOUT_SEC",
            Self::ListenPort => "UNIT_SYSTEM_TEST_LISTEN_PORT",
            Self::Config => "UNIT_SYSTEM_TEST_CONFIG",
        }
    }
}

// ============================================================================
// SECTION: Config Types
// ============================================================================

/// Typed system test configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemTestConfig {
    /// Daemon executable.
    pub unitd: Option<PathBuf>,
    /// Language modules directory passed to the daemon.
    pub modules_dir: Option<PathBuf>,
    /// Node executable.
    pub node: PathBuf,
    /// Node dependencies copied next to each Node fixture.
    pub node_modules: Option<PathBuf>,
    /// Root of the application fixtures.
    pub fixtures_dir: PathBuf,
    /// Optional run root override.
    pub run_root: Option<PathBuf>,
    /// Optional timeout override in seconds (positive integer).
    pub timeout: Option<Duration>,
    /// Application listener port.
    pub listen_port: u16,
}

impl Default for SystemTestConfig {
    fn default() -> Self {
        Self {
            unitd: None,
            modules_dir: None,
            node: PathBuf::from(DEFAULT_NODE),
            node_modules: None,
            fixtures_dir: default_fixtures_dir(),
            run_root: None,
            timeout: None,
            listen_port: DEFAULT_LISTEN_PORT,
        }
    }
}

/// Settings file layout; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct FileConfig {
    /// Daemon executable.
    unitd: Option<PathBuf>,
    /// Language modules directory.
    modules_dir: Option<PathBuf>,
    /// Node executable.
    node: Option<PathBuf>,
    /// Node dependencies.
    node_modules: Option<PathBuf>,
    /// Fixture root.
    fixtures_dir: Option<PathBuf>,
    /// Run root.
    run_root: Option<PathBuf>,
    /// Timeout in seconds.
    timeout_sec: Option<u64>,
    /// Listener port.
    listen_port: Option<u16>,
}

impl SystemTestConfig {
    /// Loads configuration from the optional settings file and the environment.
    ///
    /// # Errors
    ///
    /// Returns an error when an environment value is not valid UTF-8, is empty,
    /// or fails validation, or when the settings file cannot be read or parsed.
    pub fn load() -> Result<Self, String> {
        let mut config = Self::default();
        if let Some(path) = read_env_nonempty(SystemTestEnv::Config.as_str())? {
            config.apply_file(Path::new(&path))?;
        }
        config.apply_env()?;
        Ok(config)
    }

    /// Overlays values from a TOML settings file.
    ///
    /// Relative paths in the file resolve against the file's directory.
    fn apply_file(&mut self, path: &Path) -> Result<(), String> {
        let raw = std::fs::read_to_string(path)
            .map_err(|err| format!("failed to read {}: {err}", path.display()))?;
        let file: FileConfig = toml::from_str(&raw)
            .map_err(|err| format!("invalid settings file {}: {err}", path.display()))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let anchor = |value: PathBuf| if value.is_relative() { base.join(value) } else { value };

        if let Some(unitd) = file.unitd {
            self.unitd = Some(anchor(unitd));
        }
        if let Some(modules_dir) = file.modules_dir {
            self.modules_dir = Some(anchor(modules_dir));
        }
        if let Some(node) = file.node {
            // A bare command name is looked up on PATH, not next to the file.
            self.node = if node.components().count() > 1 { anchor(node) } else { node };
        }
        if let Some(node_modules) = file.node_modules {
            self.node_modules = Some(anchor(node_modules));
        }
        if let Some(fixtures_dir) = file.fixtures_dir {
            self.fixtures_dir = anchor(fixtures_dir);
        }
        if let Some(run_root) = file.run_root {
            self.run_root = Some(anchor(run_root));
        }
        if let Some(secs) = file.timeout_sec {
            self.timeout = Some(timeout_from_secs("timeout_sec", secs)?);
        }
        if let Some(port) = file.listen_port {
            self.listen_port = port_nonzero("listen_port", port)?;
        }
        Ok(())
    }

    /// Overlays values from `UNIT_SYSTEM_TEST_*` variables.
    fn apply_env(&mut self) -> Result<(), String> {
        let path = |key: SystemTestEnv| -> Result<Option<PathBuf>, String> {
            Ok(read_env_nonempty(key.as_str())?.map(PathBuf::from))
        };
        if let Some(unitd) = path(SystemTestEnv::Unitd)? {
            self.unitd = Some(unitd);
        }
        if let Some(modules_dir) = path(SystemTestEnv::ModulesDir)? {
            self.modules_dir = Some(modules_dir);
        }
        if let Some(node) = path(SystemTestEnv::Node)? {
            self.node = node;
        }
        if let Some(node_modules) = path(SystemTestEnv::NodeModules)? {
            self.node_modules = Some(node_modules);
        }
        if let Some(fixtures_dir) = path(SystemTestEnv::FixturesDir)? {
            self.fixtures_dir = fixtures_dir;
        }
        if let Some(run_root) = path(SystemTestEnv::RunRoot)? {
            self.run_root = Some(run_root);
        }
        if let Some(raw) = read_env_nonempty(SystemTestEnv::TimeoutSeconds.as_str())? {
            self.timeout = Some(parse_timeout_seconds(SystemTestEnv::TimeoutSeconds.as_str(), &raw)?);
        }
        if let Some(raw) = read_env_nonempty(SystemTestEnv::ListenPort.as_str())? {
            self.listen_port = parse_port(SystemTestEnv::ListenPort.as_str(), &raw)?;
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Returns the fixtures shipped with this crate.
fn default_fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

/// Reads an environment variable and enforces UTF-8 validity.
///
/// # Errors
///
/// Returns an error when the environment variable contains invalid UTF-8.
pub fn read_env_strict(name: &str) -> Result<Option<String>, String> {
    std::env::var_os(name).map_or(Ok(None), |raw| {
        raw.into_string().map(Some).map_err(|_| format!("{name} must be valid UTF-8"))
    })
}

/// Reads an environment variable and rejects empty values.
///
/// # Errors
///
/// Returns an error when the variable is set but empty or whitespace.
fn read_env_nonempty(name: &str) -> Result<Option<String>, String> {
    match read_env_strict(name)? {
        Some(value) if value.trim().is_empty() => Err(format!("{name} must not be empty")),
        Some(value) => Ok(Some(value)),
        None => Ok(None),
    }
}

/// Parses a positive timeout value from an environment variable string.
///
/// # Errors
///
/// Returns an error when the value is non-numeric or zero.
fn parse_timeout_seconds(name: &str, raw: &str) -> Result<Duration, String> {
    let secs: u64 = raw
        .trim()
        .parse()
        .map_err(|_| format!("{name} must be a positive integer number of seconds"))?;
    timeout_from_secs(name, secs)
}

/// Rejects a zero timeout.
fn timeout_from_secs(name: &str, secs: u64) -> Result<Duration, String> {
    if secs == 0 {
        return Err(format!("{name} must be greater than zero"));
    }
    Ok(Duration::from_secs(secs))
}

/// Parses a TCP port from an environment variable string.
///
/// # Errors
///
/// Returns an error when the value is not an integer in `1..=65535`.
fn parse_port(name: &str, raw: &str) -> Result<u16, String> {
    let port: u16 =
        raw.trim().parse().map_err(|_| format!("{name} must be a port number (1-65535)"))?;
    port_nonzero(name, port)
}

/// Rejects port zero.
fn port_nonzero(name: &str, port: u16) -> Result<u16, String> {
    if port == 0 {
        return Err(format!("{name} must be a port number (1-65535)"));
    }
    Ok(port)
}
