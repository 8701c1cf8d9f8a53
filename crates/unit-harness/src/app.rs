// crates/unit-harness/src/app.rs
// ============================================================================
// Module: Application Descriptors
// Description: Per-test description of an application fixture and its config.
// Purpose: Render the control API configuration that loads a fixture.
// Dependencies: serde_json, urlencoding
// ============================================================================

//! ## Overview
//! An [`ApplicationDescriptor`] names a fixture directory, its entry file, the
//! runtime family that executes it, and the minimum runtime version. The
//! harness copies the fixture into a per-test workspace and applies the
//! configuration rendered by [`ApplicationDescriptor::render_config`].
//!
//! Node applications run as `external` applications under `/usr/bin/env node`
//! with the `unit-http` loader preloaded; ES-module applications additionally
//! get the ESM loader hook, which is what makes `import http from "http"`
//! resolve to the server's shim.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;

use serde_json::Map;
use serde_json::Value;
use serde_json::json;

use crate::prerequisites::Prerequisites;
use crate::version::RuntimeVersion;
use crate::version::VersionPredicate;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Oldest Node.js release whose loader hooks the require shim supports.
///
/// Comparison follows semver, so prereleases such as `14.16.0-rc.1` sort
/// below the release and do not satisfy the gate. A loose dotted-number
/// comparison would accept them.
pub const NODE_ES_MODULES_MIN: RuntimeVersion = RuntimeVersion::new(14, 16, 0);

/// CommonJS preload module shipped by `unit-http`.
const NODE_REQUIRE_LOADER: &str = "unit-http/loader";

/// ESM loader hook shipped by `unit-http`.
const NODE_ESM_LOADER: &str = "unit-http/loader.mjs";

// ============================================================================
// SECTION: Types
// ============================================================================

/// Runtime family that executes an application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeFamily {
    /// Node.js, as an external application.
    Node {
        /// Whether the entry file is loaded as an ES module.
        es_modules: bool,
    },
    /// Python WSGI/ASGI.
    Python,
}

impl RuntimeFamily {
    /// Returns the module name used for prerequisite checks and fixture lookup.
    #[must_use]
    pub const fn module_name(self) -> &'static str {
        match self {
            Self::Node { .. } => "node",
            Self::Python => "python",
        }
    }
}

/// Named Python entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PythonTarget {
    /// Target name referenced by `applications/<app>/<name>`.
    pub name: String,
    /// Python module.
    pub module: String,
    /// Callable within the module.
    pub callable: String,
    /// Optional URI prefix stripped into `SCRIPT_NAME`.
    pub prefix: Option<String>,
}

impl PythonTarget {
    /// Creates a target without a prefix.
    #[must_use]
    pub fn new(name: &str, module: &str, callable: &str) -> Self {
        Self {
            name: name.to_string(),
            module: module.to_string(),
            callable: callable.to_string(),
            prefix: None,
        }
    }

    /// Sets the URI prefix.
    #[must_use]
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        self.prefix = Some(prefix.to_string());
        self
    }
}

/// Inputs the harness supplies when rendering configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadContext {
    /// Directory the fixture was copied to.
    pub app_dir: PathBuf,
    /// Listener key, for example `*:7080`.
    pub listener: String,
    /// Node executable name or path passed to `/usr/bin/env`.
    pub node_binary: String,
}

/// Description of one application fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationDescriptor {
    /// Fixture path relative to the family's fixture root.
    module_path: String,
    /// Entry file (Node) or module name (Python).
    entry: String,
    /// Executing runtime.
    family: RuntimeFamily,
    /// Minimum runtime version.
    min_version: VersionPredicate,
    /// Python targets; empty for single-entry applications.
    targets: Vec<PythonTarget>,
    /// Python interface (`wsgi` or `asgi`); detected by the server when unset.
    protocol: Option<String>,
}

impl ApplicationDescriptor {
    /// Describes a Node ES-module application gated on [`NODE_ES_MODULES_MIN`].
    #[must_use]
    pub fn node_es_module(module_path: &str, entry: &str) -> Self {
        Self {
            module_path: module_path.to_string(),
            entry: entry.to_string(),
            family: RuntimeFamily::Node {
                es_modules: true,
            },
            min_version: VersionPredicate::AtLeast(NODE_ES_MODULES_MIN),
            targets: Vec::new(),
            protocol: None,
        }
    }

    /// Describes a CommonJS Node application.
    #[must_use]
    pub fn node(module_path: &str, entry: &str) -> Self {
        Self {
            module_path: module_path.to_string(),
            entry: entry.to_string(),
            family: RuntimeFamily::Node {
                es_modules: false,
            },
            min_version: VersionPredicate::Any,
            targets: Vec::new(),
            protocol: None,
        }
    }

    /// Describes a Python application whose entry is `module`.
    #[must_use]
    pub fn python(module_path: &str, module: &str) -> Self {
        Self {
            module_path: module_path.to_string(),
            entry: module.to_string(),
            family: RuntimeFamily::Python,
            min_version: VersionPredicate::Any,
            targets: Vec::new(),
            protocol: None,
        }
    }

    /// Replaces the minimum version predicate.
    #[must_use]
    pub fn with_min_version(mut self, predicate: VersionPredicate) -> Self {
        self.min_version = predicate;
        self
    }

    /// Adds a Python target.
    #[must_use]
    pub fn with_target(mut self, target: PythonTarget) -> Self {
        self.targets.push(target);
        self
    }

    /// Pins the Python interface instead of letting the server detect it.
    #[must_use]
    pub fn with_protocol(mut self, protocol: &str) -> Self {
        self.protocol = Some(protocol.to_string());
        self
    }

    /// Returns the fixture path, which is also the application name.
    #[must_use]
    pub fn module_path(&self) -> &str {
        &self.module_path
    }

    /// Returns the entry file or module.
    #[must_use]
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Returns the runtime family.
    #[must_use]
    pub const fn family(&self) -> RuntimeFamily {
        self.family
    }

    /// Returns the minimum version predicate.
    #[must_use]
    pub const fn min_version(&self) -> &VersionPredicate {
        &self.min_version
    }

    /// Returns the pinned Python interface, if any.
    #[must_use]
    pub fn protocol(&self) -> Option<&str> {
        self.protocol.as_deref()
    }

    /// Returns the Python targets.
    #[must_use]
    pub fn targets(&self) -> &[PythonTarget] {
        &self.targets
    }

    /// Returns the prerequisites implied by the family and minimum version.
    #[must_use]
    pub fn prerequisites(&self) -> Prerequisites {
        Prerequisites::new().require(self.family.module_name(), self.min_version.clone())
    }

    /// Resolves the fixture directory under `fixtures_root`.
    #[must_use]
    pub fn fixture_dir(&self, fixtures_root: &Path) -> PathBuf {
        fixtures_root.join(self.family.module_name()).join(&self.module_path)
    }

    /// Returns the `pass` destination for the whole application or one target.
    #[must_use]
    pub fn pass(&self, target: Option<&str>) -> String {
        let name = urlencoding::encode(&self.module_path);
        match target {
            Some(target) => format!("applications/{name}/{}", urlencoding::encode(target)),
            None => format!("applications/{name}"),
        }
    }

    /// Renders the application object placed under `/config/applications`.
    #[must_use]
    pub fn application_entry(&self, ctx: &LoadContext) -> Value {
        let dir = ctx.app_dir.display().to_string();
        match self.family {
            RuntimeFamily::Node {
                es_modules,
            } => {
                let mut arguments = vec![ctx.node_binary.clone()];
                if es_modules {
                    arguments.extend(["--loader".to_string(), NODE_ESM_LOADER.to_string()]);
                }
                arguments.extend([
                    "--require".to_string(),
                    NODE_REQUIRE_LOADER.to_string(),
                    self.entry.clone(),
                ]);
                json!({
                    "type": "external",
                    "processes": {"spare": 0},
                    "working_directory": dir,
                    "executable": "/usr/bin/env",
                    "arguments": arguments,
                })
            }
            RuntimeFamily::Python => {
                let mut entry = json!({
                    "type": "python",
                    "processes": {"spare": 0},
                    "path": dir,
                    "working_directory": dir,
                });
                if let Some(protocol) = &self.protocol {
                    entry["protocol"] = Value::String(protocol.clone());
                }
                if self.targets.is_empty() {
                    entry["module"] = Value::String(self.entry.clone());
                } else {
                    let mut targets = Map::new();
                    for target in &self.targets {
                        let mut value = json!({
                            "module": target.module,
                            "callable": target.callable,
                        });
                        if let Some(prefix) = &target.prefix {
                            value["prefix"] = Value::String(prefix.clone());
                        }
                        targets.insert(target.name.clone(), value);
                    }
                    entry["targets"] = Value::Object(targets);
                }
                entry
            }
        }
    }

    /// Renders a complete configuration: one listener, the application, and
    /// one `/<target>` route per Python target.
    #[must_use]
    pub fn render_config(&self, ctx: &LoadContext) -> Value {
        let mut applications = Map::new();
        applications.insert(self.module_path.clone(), self.application_entry(ctx));
        if self.targets.is_empty() {
            return json!({
                "listeners": {ctx.listener.clone(): {"pass": self.pass(None)}},
                "applications": applications,
            });
        }
        let routes: Vec<Value> = self
            .targets
            .iter()
            .map(|target| {
                json!({
                    "match": {"uri": format!("/{}", target.name)},
                    "action": {"pass": self.pass(Some(&target.name))},
                })
            })
            .collect();
        json!({
            "listeners": {ctx.listener.clone(): {"pass": "routes"}},
            "routes": routes,
            "applications": applications,
        })
    }
}
