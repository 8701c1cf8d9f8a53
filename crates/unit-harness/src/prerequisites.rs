// crates/unit-harness/src/prerequisites.rs
// ============================================================================
// Module: Prerequisites
// Description: Declarative runtime prerequisites and discovered module inventory.
// Purpose: Decide before a scenario runs whether it should execute or skip.
// Dependencies: tokio, tracing
// ============================================================================

//! ## Overview
//! A suite declares [`Prerequisites`] as a map of module name to
//! [`VersionPredicate`]. The harness builds a [`ModuleInventory`] from the
//! server's discovery log and from probing external runtimes, then evaluates
//! the map. Any unmet entry yields [`PrerequisiteOutcome::Unmet`], which suites
//! report as a skip.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::io::ErrorKind;
use std::path::Path;

use tokio::process::Command;
use tracing::debug;
use tracing::warn;

use crate::error::HarnessError;
use crate::version::RuntimeVersion;
use crate::version::VersionPredicate;

// ============================================================================
// SECTION: Inventory
// ============================================================================

/// Runtime modules available to the server under test.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleInventory {
    /// Module name to discovered versions.
    modules: BTreeMap<String, BTreeSet<RuntimeVersion>>,
}

impl ModuleInventory {
    /// Creates an empty inventory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a module version.
    pub fn insert(&mut self, name: &str, version: RuntimeVersion) {
        self.modules.entry(name.to_string()).or_default().insert(version);
    }

    /// Returns the versions discovered for a module.
    #[must_use]
    pub fn versions(&self, name: &str) -> Option<&BTreeSet<RuntimeVersion>> {
        self.modules.get(name)
    }

    /// Returns true when no module has been discovered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Builds an inventory from the server's discovery log.
    ///
    /// Lines of the form `module: <name> <version> "<path>"` are recorded;
    /// everything else is ignored.
    #[must_use]
    pub fn from_server_log(log: &str) -> Self {
        let mut inventory = Self::new();
        for line in log.lines() {
            let Some((_, rest)) = line.split_once("module: ") else {
                continue;
            };
            let mut fields = rest.split_whitespace();
            let (Some(name), Some(raw_version), Some(path)) =
                (fields.next(), fields.next(), fields.next())
            else {
                continue;
            };
            if !path.starts_with('"') {
                continue;
            }
            match RuntimeVersion::parse(raw_version) {
                Ok(version) => inventory.insert(name, version),
                Err(err) => debug!(module = name, %err, "ignoring unparsable module version"),
            }
        }
        inventory
    }

    /// Merges another inventory into this one.
    pub fn merge(&mut self, other: Self) {
        for (name, versions) in other.modules {
            self.modules.entry(name).or_default().extend(versions);
        }
    }

    /// Probes an external runtime binary with `--version` and records it.
    ///
    /// A binary that cannot be spawned or prints an unparsable version is
    /// treated as absent.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Io`] when spawning fails for a reason other than
    /// the binary being missing.
    pub async fn probe_runtime(&mut self, name: &str, binary: &Path) -> Result<(), HarnessError> {
        let output = match Command::new(binary).arg("--version").output().await {
            Ok(output) => output,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                warn!(module = name, binary = %binary.display(), "runtime binary not found");
                return Ok(());
            }
            Err(err) => return Err(HarnessError::io("probe runtime", &err)),
        };
        if !output.status.success() {
            warn!(module = name, status = %output.status, "runtime version probe failed");
            return Ok(());
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let raw = stdout.lines().next().unwrap_or_default();
        match RuntimeVersion::parse(raw) {
            Ok(version) => {
                debug!(module = name, %version, "runtime probed");
                self.insert(name, version);
            }
            Err(err) => warn!(module = name, %err, "runtime printed an unparsable version"),
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Prerequisites
// ============================================================================

/// Result of evaluating [`Prerequisites`] against an inventory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PrerequisiteOutcome {
    /// Every module is present with a satisfying version; carries the matches.
    Satisfied(BTreeMap<String, Vec<RuntimeVersion>>),
    /// At least one module is missing or too old.
    Unmet(String),
}

impl PrerequisiteOutcome {
    /// Converts the outcome into a result, mapping `Unmet` to a skip error.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::PrerequisiteUnmet`] when the outcome is unmet.
    pub fn into_result(self) -> Result<BTreeMap<String, Vec<RuntimeVersion>>, HarnessError> {
        match self {
            Self::Satisfied(matches) => Ok(matches),
            Self::Unmet(reason) => Err(HarnessError::PrerequisiteUnmet(reason)),
        }
    }
}

/// Declarative prerequisite map: module name to version predicate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prerequisites {
    /// Required modules.
    modules: BTreeMap<String, VersionPredicate>,
}

impl Prerequisites {
    /// Creates an empty prerequisite map (always satisfied).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a module requirement.
    #[must_use]
    pub fn require(mut self, module: &str, predicate: VersionPredicate) -> Self {
        self.modules.insert(module.to_string(), predicate);
        self
    }

    /// Evaluates the map against discovered modules.
    #[must_use]
    pub fn evaluate(&self, inventory: &ModuleInventory) -> PrerequisiteOutcome {
        let mut satisfied = BTreeMap::new();
        for (module, predicate) in &self.modules {
            let Some(versions) = inventory.versions(module) else {
                return PrerequisiteOutcome::Unmet(format!("module {module} is not available"));
            };
            let matching: Vec<RuntimeVersion> =
                versions.iter().filter(|version| predicate.matches(version)).cloned().collect();
            if matching.is_empty() {
                let found =
                    versions.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ");
                return PrerequisiteOutcome::Unmet(format!(
                    "module {module} requires {predicate}, found {found}"
                ));
            }
            satisfied.insert(module.clone(), matching);
        }
        PrerequisiteOutcome::Satisfied(satisfied)
    }
}
