//! Promotion history: a JSON sidecar recording which artifact
//! version is currently canonical per tool name. Deleting the file
//! reverts promotions, since the Cluster Optimizer always re-derives
//! canonical status from Artifact Memory on the next `promote` call.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionRecord {
    pub artifact_id: String,
    pub version: semver::Version,
    pub promoted_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PromotionHistory {
    /// tool/workflow name -> its currently-canonical record.
    entries: HashMap<String, PromotionRecord>,
}

impl PromotionHistory {
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(raw) => serde_json::from_str(&raw).with_context(|| format!("parsing promotion history {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("reading promotion history {}", path.display())),
        }
    }

    pub async fn persist(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.with_context(|| format!("creating {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(self).context("serializing promotion history")?;
        tokio::fs::write(path, serialized).await.with_context(|| format!("writing promotion history {}", path.display()))
    }

    pub fn record(&mut self, name: impl Into<String>, artifact_id: impl Into<String>, version: semver::Version, promoted_at: chrono::DateTime<chrono::Utc>) {
        self.entries.insert(name.into(), PromotionRecord { artifact_id: artifact_id.into(), version, promoted_at });
    }

    pub fn canonical_of(&self, name: &str) -> Option<&PromotionRecord> {
        self.entries.get(name)
    }
}

pub fn default_path(project_root: &Path) -> PathBuf {
    project_root.join(".forgeflow/promotion_history.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("promotion_history.json");

        let mut history = PromotionHistory::default();
        history.record("summarize", "artifact-1", semver::Version::new(0, 2, 0), chrono::Utc::now());
        history.persist(&path).await.unwrap();

        let reloaded = PromotionHistory::load(&path).await.unwrap();
        assert_eq!(reloaded.canonical_of("summarize").unwrap().artifact_id, "artifact-1");
    }

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let history = PromotionHistory::load(&dir.path().join("nope.json")).await.unwrap();
        assert!(history.canonical_of("anything").is_none());
    }
}
