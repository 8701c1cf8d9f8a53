// crates/unit-harness/src/version.rs
// ============================================================================
// Module: Runtime Versions
// Description: Comparable runtime versions parsed from loose version strings.
// Purpose: Gate scenarios on installed runtime versions without string compares.
// Dependencies: semver, thiserror
// ============================================================================

//! ## Overview
//! Runtimes report versions in inconsistent shapes (`v14.16.0`, `3.8`,
//! `18.0.0-pre`, `3.12.0rc1`). [`RuntimeVersion::parse`] normalizes them into a
//! [`semver::Version`] so they order totally, and [`VersionPredicate`] expresses
//! the gate a scenario declares.
//!
//! Invariants:
//! - Missing minor/patch components are zero-filled.
//! - A pre-release orders below its release (`18.0.0-pre < 18.0.0`).

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;
use std::str::FromStr;

use semver::BuildMetadata;
use semver::Prerelease;
use semver::Version;
use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Version parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VersionError {
    /// Input was empty after trimming.
    #[error("version string is empty")]
    Empty,
    /// A numeric component was missing or not a number.
    #[error("invalid version component in '{0}'")]
    InvalidComponent(String),
    /// More than three numeric components were supplied.
    #[error("too many version components in '{0}'")]
    TooManyComponents(String),
    /// The pre-release or build suffix is not a valid identifier list.
    #[error("invalid version suffix in '{0}'")]
    InvalidSuffix(String),
}

// ============================================================================
// SECTION: Runtime Version
// ============================================================================

/// Totally ordered runtime version.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RuntimeVersion(Version);

impl RuntimeVersion {
    /// Builds a release version from numeric components.
    #[must_use]
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self(Version::new(major, minor, patch))
    }

    /// Parses a loose version string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] when the string is empty, has non-numeric or
    /// too many components, or carries an invalid suffix.
    pub fn parse(raw: &str) -> Result<Self, VersionError> {
        let trimmed = raw.trim();
        let trimmed = trimmed.strip_prefix(['v', 'V']).unwrap_or(trimmed);
        if trimmed.is_empty() {
            return Err(VersionError::Empty);
        }
        let split = trimmed.find(|ch: char| !ch.is_ascii_digit() && ch != '.').unwrap_or(trimmed.len());
        let (core, suffix) = trimmed.split_at(split);
        let mut numbers = [0u64; 3];
        let parts: Vec<&str> = core.split('.').collect();
        if parts.len() > numbers.len() {
            return Err(VersionError::TooManyComponents(raw.to_string()));
        }
        for (slot, part) in numbers.iter_mut().zip(&parts) {
            *slot = part.parse().map_err(|_| VersionError::InvalidComponent(raw.to_string()))?;
        }
        let mut version = Version::new(numbers[0], numbers[1], numbers[2]);
        let (pre, build) = match suffix.split_once('+') {
            Some((pre, build)) => (pre, Some(build)),
            None => (suffix, None),
        };
        let pre = pre.strip_prefix('-').unwrap_or(pre);
        if !pre.is_empty() {
            version.pre =
                Prerelease::new(pre).map_err(|_| VersionError::InvalidSuffix(raw.to_string()))?;
        }
        if let Some(build) = build {
            version.build =
                BuildMetadata::new(build).map_err(|_| VersionError::InvalidSuffix(raw.to_string()))?;
        }
        Ok(Self(version))
    }

    /// Returns the normalized semantic version.
    #[must_use]
    pub const fn as_semver(&self) -> &Version {
        &self.0
    }
}

impl FromStr for RuntimeVersion {
    type Err = VersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ============================================================================
// SECTION: Predicates
// ============================================================================

/// Predicate a scenario declares over an installed runtime version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionPredicate {
    /// Any installed version satisfies the predicate.
    Any,
    /// The installed version must be at least this version.
    AtLeast(RuntimeVersion),
}

impl VersionPredicate {
    /// Builds an `AtLeast` predicate from a loose version string.
    ///
    /// # Errors
    ///
    /// Returns [`VersionError`] when the minimum version does not parse.
    pub fn at_least(raw: &str) -> Result<Self, VersionError> {
        RuntimeVersion::parse(raw).map(Self::AtLeast)
    }

    /// Returns true when `version` satisfies the predicate.
    #[must_use]
    pub fn matches(&self, version: &RuntimeVersion) -> bool {
        match self {
            Self::Any => true,
            Self::AtLeast(minimum) => version >= minimum,
        }
    }
}

impl fmt::Display for VersionPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any version"),
            Self::AtLeast(minimum) => write!(f, ">= {minimum}"),
        }
    }
}
