//! Disk-backed config layer loading: `ConfigLayerStack`
//! only models an in-memory stack of already-parsed TOML layers; reading
//! the actual files from the conventional System/User/Project/Workspace
//! locations is binary-edge glue, the way `vtcode-config`'s own loader
//! walks a fixed search path before handing parsed layers to the merge
//! step it shares with this crate's `forgeflow-config`.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use forgeflow_config::{ConfigLayerEntry, ConfigLayerSource, ConfigLayerStack};

/// `BACKEND_FOR_ROLE_<ROLE>=<model_key>` environment overrides are folded
/// into a synthetic Runtime layer shaped like `[roles.<role>] model_key =
/// "..."`, so they flow through the same merge/substitution path as every
/// other layer instead of being read ad hoc at resolution time.
const BACKEND_FOR_ROLE_PREFIX: &str = "BACKEND_FOR_ROLE_";

async fn read_toml_layer(source: ConfigLayerSource, path: &Path) -> Result<Option<ConfigLayerEntry>> {
    match tokio::fs::read_to_string(path).await {
        Ok(raw) => {
            let parsed: toml::Value = toml::from_str(&raw).with_context(|| format!("parsing config layer {}", path.display()))?;
            Ok(Some(ConfigLayerEntry::new(source, parsed)))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading config layer {}", path.display())),
    }
}

fn runtime_overrides_layer() -> ConfigLayerEntry {
    let mut roles = toml::value::Table::new();
    for (key, value) in std::env::vars() {
        if let Some(role) = key.strip_prefix(BACKEND_FOR_ROLE_PREFIX) {
            let mut role_table = toml::value::Table::new();
            role_table.insert("model_key".to_string(), toml::Value::String(value));
            roles.insert(role.to_lowercase(), toml::Value::Table(role_table));
        }
    }
    let mut root = toml::value::Table::new();
    root.insert("roles".to_string(), toml::Value::Table(roles));
    ConfigLayerEntry::new(ConfigLayerSource::Runtime, toml::Value::Table(root))
}

/// Build the layer stack from the conventional search path: system-wide,
/// per-user, project-local, then an explicit workspace override, each
/// loaded only if present. A missing file is silently skipped; a present
/// but malformed file is a hard error.
pub async fn load_config_layers(project_root: &Path) -> Result<ConfigLayerStack> {
    let mut stack = ConfigLayerStack::default();

    let system_path = PathBuf::from("/etc/forgeflow/config.toml");
    if let Some(layer) = read_toml_layer(ConfigLayerSource::System { file: system_path.clone() }, &system_path).await? {
        stack.push(layer);
    }

    if let Some(home) = std::env::var_os("HOME") {
        let user_path = PathBuf::from(home).join(".config/forgeflow/config.toml");
        if let Some(layer) = read_toml_layer(ConfigLayerSource::User { file: user_path.clone() }, &user_path).await? {
            stack.push(layer);
        }
    }

    let project_path = project_root.join("forgeflow.toml");
    if let Some(layer) = read_toml_layer(ConfigLayerSource::Project { file: project_path.clone() }, &project_path).await? {
        stack.push(layer);
    }

    let workspace_path = std::env::var("FORGEFLOW_WORKSPACE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| project_root.join(".forgeflow/workspace.toml"));
    if let Some(layer) = read_toml_layer(ConfigLayerSource::Workspace { file: workspace_path.clone() }, &workspace_path).await? {
        stack.push(layer);
    }

    stack.push(runtime_overrides_layer());
    Ok(stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;

    #[tokio::test]
    async fn missing_layers_are_skipped_not_errors() {
        let dir = assert_fs::TempDir::new().unwrap();
        let stack = load_config_layers(dir.path()).await.unwrap();
        // Only the synthetic Runtime layer is guaranteed present.
        assert_eq!(stack.layers().len(), 1);
    }

    #[tokio::test]
    async fn project_layer_loads_when_present() {
        let dir = assert_fs::TempDir::new().unwrap();
        dir.child("forgeflow.toml").write_str("[roles.overseer]\nmodel_key = \"local-overseer\"\n").unwrap();
        let stack = load_config_layers(dir.path()).await.unwrap();
        assert_eq!(stack.layers().len(), 2);
    }
}
