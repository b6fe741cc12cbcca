//! Trusted package allowlist: a YAML file enumerating permitted
//! `pip_packages` with semver constraints plus an explicit `blocked` set.
//! Workflow validation ((vi)) rejects any `pip_packages` entry
//! not covered here.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::ConfigError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub name: String,
    /// Semver constraint string, e.g. "^1.2" or ">=2,<3".
    pub version_constraint: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrustedPackageAllowlist {
    #[serde(default)]
    pub allowed: Vec<AllowlistEntry>,
    #[serde(default)]
    pub blocked: Vec<String>,
}

/// Outcome of a single installation-attempt audit entry ("audit-
/// logged with timestamp, package, version, context, and outcome").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllowlistAuditEntry {
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub package: String,
    pub version: String,
    pub context: String,
    pub allowed: bool,
}

impl TrustedPackageAllowlist {
    pub fn from_yaml(src: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(src).map_err(|e| ConfigError::InvalidAllowlist(e.to_string()))
    }

    fn index(&self) -> HashMap<&str, &AllowlistEntry> {
        self.allowed.iter().map(|e| (e.name.as_str(), e)).collect()
    }

    /// Whether `name@version` is permitted: not in `blocked`, present in
    /// `allowed`, and satisfies that entry's semver constraint.
    pub fn permits(&self, name: &str, version: &str) -> bool {
        if self.blocked.iter().any(|b| b == name) {
            return false;
        }
        let index = self.index();
        let Some(entry) = index.get(name) else {
            return false;
        };
        let Ok(req) = semver::VersionReq::parse(&entry.version_constraint) else {
            return false;
        };
        let Ok(ver) = semver::Version::parse(version) else {
            return false;
        };
        req.matches(&ver)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn permits_matching_version() {
        let allowlist = TrustedPackageAllowlist::from_yaml(
            "allowed:\n  - name: requests\n    version_constraint: \">=2.0.0, <3.0.0\"\nblocked: []\n",
        )
        .unwrap();
        assert!(allowlist.permits("requests", "2.31.0"));
        assert!(!allowlist.permits("requests", "3.0.0"));
        assert!(!allowlist.permits("unknown-pkg", "1.0.0"));
    }

    #[test]
    fn blocked_overrides_allowed() {
        let allowlist = TrustedPackageAllowlist::from_yaml(
            "allowed:\n  - name: evilpkg\n    version_constraint: \"*\"\nblocked: [evilpkg]\n",
        )
        .unwrap();
        assert!(!allowlist.permits("evilpkg", "1.0.0"));
    }
}
