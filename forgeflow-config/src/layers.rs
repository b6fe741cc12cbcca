//! Layered configuration: file + environment overrides.
//!
//! Follows `vtcode-config::loader::layers`/`merge`'s approach: a stack of
//! TOML layers ordered lowest-to-highest precedence,
//! merged recursively (tables merge, scalars/arrays are replaced by the
//! overlay), then `${NAME}` / `${NAME:-default}` placeholders are
//! substituted once over the merged, effective configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use toml::Value as TomlValue;

use forgeflow_commons::template::substitute_env_placeholders;

/// Source of a configuration layer, lowest to highest precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ConfigLayerSource {
    System { file: PathBuf },
    User { file: PathBuf },
    Project { file: PathBuf },
    Workspace { file: PathBuf },
    Runtime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigLayerEntry {
    pub source: ConfigLayerSource,
    pub config: TomlValue,
}

impl ConfigLayerEntry {
    pub fn new(source: ConfigLayerSource, config: TomlValue) -> Self {
        Self { source, config }
    }
}

/// Recursively merge two TOML values: tables merge key-by-key, anything
/// else is replaced wholesale by `overlay`.
pub fn merge_toml_values(base: &mut TomlValue, overlay: &TomlValue) {
    match (base, overlay) {
        (TomlValue::Table(base_table), TomlValue::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                if let Some(base_value) = base_table.get_mut(key) {
                    merge_toml_values(base_value, value);
                } else {
                    base_table.insert(key.clone(), value.clone());
                }
            }
        }
        (base, overlay) => {
            *base = overlay.clone();
        }
    }
}

/// A stack of configuration layers, ordered from lowest to highest
/// precedence: system < user < project < workspace < runtime.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayerStack {
    layers: Vec<ConfigLayerEntry>,
}

impl ConfigLayerStack {
    pub fn new(layers: Vec<ConfigLayerEntry>) -> Self {
        Self { layers }
    }

    pub fn push(&mut self, layer: ConfigLayerEntry) {
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[ConfigLayerEntry] {
        &self.layers
    }

    /// Merge all layers, then substitute `${NAME}` / `${NAME:-default}`
    /// placeholders in every string leaf using `lookup` (typically
    /// `std::env::var`).
    pub fn effective_config(&self, lookup: impl Fn(&str) -> Option<String> + Copy) -> TomlValue {
        let mut merged = TomlValue::Table(toml::map::Map::new());
        for layer in &self.layers {
            merge_toml_values(&mut merged, &layer.config);
        }
        substitute_in_value(&mut merged, lookup);
        merged
    }
}

fn substitute_in_value(value: &mut TomlValue, lookup: impl Fn(&str) -> Option<String> + Copy) {
    match value {
        TomlValue::String(s) => {
            *s = substitute_env_placeholders(s, lookup);
        }
        TomlValue::Table(table) => {
            for (_, v) in table.iter_mut() {
                substitute_in_value(v, lookup);
            }
        }
        TomlValue::Array(items) => {
            for v in items.iter_mut() {
                substitute_in_value(v, lookup);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(src: &str) -> TomlValue {
        toml::from_str(src).unwrap()
    }

    #[test]
    fn overlay_wins_on_conflicting_scalar() {
        let mut base = table("role = \"a\"\n");
        let overlay = table("role = \"b\"\n");
        merge_toml_values(&mut base, &overlay);
        assert_eq!(base["role"].as_str(), Some("b"));
    }

    #[test]
    fn nested_tables_merge_key_by_key() {
        let mut base = table("[roles]\noverseer = \"x\"\n");
        let overlay = table("[roles]\ngenerator = \"y\"\n");
        merge_toml_values(&mut base, &overlay);
        assert_eq!(base["roles"]["overseer"].as_str(), Some("x"));
        assert_eq!(base["roles"]["generator"].as_str(), Some("y"));
    }

    #[test]
    fn stack_applies_layers_in_precedence_order_then_substitutes_env() {
        let mut stack = ConfigLayerStack::default();
        stack.push(ConfigLayerEntry::new(
            ConfigLayerSource::System { file: "a".into() },
            table("key = \"${FOO:-sys}\"\n"),
        ));
        stack.push(ConfigLayerEntry::new(
            ConfigLayerSource::Workspace { file: "b".into() },
            table("other = \"workspace\"\n"),
        ));
        let effective = stack.effective_config(|name| (name == "FOO").then(|| "resolved".to_string()));
        assert_eq!(effective["key"].as_str(), Some("resolved"));
        assert_eq!(effective["other"].as_str(), Some("workspace"));
    }
}
