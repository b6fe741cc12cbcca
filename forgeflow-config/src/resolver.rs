//! `ConfigResolver`: (a) `resolve_model(role, level)`, (b) `backend_of`,
//! (c) role properties, built from an effective, merged, env-substituted
//! TOML configuration.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::layers::ConfigLayerStack;
use crate::roles::{Backend, Role, RoleDefaults};

/// Metadata for a single model_key: the concrete model name and the
/// backend it routes to. The Backend Router (C2) looks this up by
/// model_key only — it must never infer the backend from the model name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelKeyMetadata {
    pub model_name: String,
    pub backend: Backend,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    roles: HashMap<String, RawRole>,
    #[serde(default)]
    level_defaults: HashMap<String, String>,
    #[serde(default)]
    model_keys: HashMap<String, RawModelKey>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct RawRole {
    model_key: String,
    #[serde(default)]
    fallback_tiers: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct RawModelKey {
    model_name: String,
    backend: String,
}

/// The Config Resolver (C1).
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    roles: HashMap<Role, RoleDefaults>,
    level_defaults: HashMap<String, String>,
    model_keys: HashMap<String, ModelKeyMetadata>,
}

impl ConfigResolver {
    /// Build a resolver from a merged, env-substituted layer stack.
    pub fn from_layers(
        stack: &ConfigLayerStack,
        lookup: impl Fn(&str) -> Option<String> + Copy,
    ) -> Result<Self, ConfigError> {
        let effective = stack.effective_config(lookup);
        let raw: RawConfig = effective
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse {
                path: "<effective>".to_string(),
                source: anyhow::anyhow!(e.to_string()),
            })?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawConfig) -> Result<Self, ConfigError> {
        let mut roles = HashMap::new();
        for (name, role_cfg) in raw.roles {
            let role: Role = name
                .parse()
                .map_err(|_| ConfigError::UnknownRole(name.clone()))?;
            roles.insert(
                role,
                RoleDefaults {
                    role,
                    model_key: role_cfg.model_key,
                    fallback_tiers: role_cfg.fallback_tiers,
                },
            );
        }

        let mut model_keys = HashMap::new();
        for (key, meta) in raw.model_keys {
            let backend: Backend = meta
                .backend
                .parse()
                .map_err(|_| ConfigError::MissingBackend(key.clone()))?;
            model_keys.insert(
                key,
                ModelKeyMetadata {
                    model_name: meta.model_name,
                    backend,
                },
            );
        }

        Ok(Self {
            roles,
            level_defaults: raw.level_defaults,
            model_keys,
        })
    }

    /// Resolve `role` (falling back to `level`'s default model_key if the
    /// role has no explicit mapping) to a model_key.
    pub fn resolve_model(&self, role: Role, level: &str) -> Result<String, ConfigError> {
        if let Some(defaults) = self.roles.get(&role) {
            return Ok(defaults.model_key.clone());
        }
        self.level_defaults
            .get(level)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownRole(role.to_string()))
    }

    /// The fallback chain configured for a role (`fallback_tiers`).
    pub fn fallback_tiers(&self, role: Role) -> Vec<String> {
        self.roles
            .get(&role)
            .map(|d| d.fallback_tiers.clone())
            .unwrap_or_default()
    }

    /// Backend of a model_key. Never infers from the model
    /// name — `UnknownModelKey`/`MissingBackend` on lookup failure.
    pub fn backend_of(&self, model_key: &str) -> Result<Backend, ConfigError> {
        self.model_keys
            .get(model_key)
            .map(|m| m.backend)
            .ok_or_else(|| ConfigError::UnknownModelKey(model_key.to_string()))
    }

    /// Full metadata for a model_key.
    pub fn model_key_metadata(&self, model_key: &str) -> Result<&ModelKeyMetadata, ConfigError> {
        self.model_keys
            .get(model_key)
            .ok_or_else(|| ConfigError::UnknownModelKey(model_key.to_string()))
    }

    /// `(model_key, model_name)` for a role.
    pub fn role_properties(&self, role: Role) -> Result<(String, String), ConfigError> {
        let model_key = self
            .roles
            .get(&role)
            .map(|d| d.model_key.clone())
            .ok_or_else(|| ConfigError::UnknownRole(role.to_string()))?;
        let meta = self.model_key_metadata(&model_key)?;
        Ok((model_key, meta.model_name.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::{ConfigLayerEntry, ConfigLayerSource};

    fn resolver_with(toml_src: &str) -> ConfigResolver {
        let mut stack = ConfigLayerStack::default();
        stack.push(ConfigLayerEntry::new(
            ConfigLayerSource::Workspace { file: "forgeflow.toml".into() },
            toml::from_str(toml_src).unwrap(),
        ));
        ConfigResolver::from_layers(&stack, |_| None).unwrap()
    }

    #[test]
    fn resolves_role_to_model_key() {
        let resolver = resolver_with(
            r#"
            [roles.overseer]
            model_key = "claude-big"
            fallback_tiers = ["claude-small"]

            [model_keys.claude-big]
            model_name = "claude-opus"
            backend = "anthropic"
            "#,
        );
        assert_eq!(resolver.resolve_model(Role::Overseer, "standard").unwrap(), "claude-big");
        assert_eq!(resolver.backend_of("claude-big").unwrap(), Backend::Anthropic);
        assert_eq!(resolver.fallback_tiers(Role::Overseer), vec!["claude-small".to_string()]);
    }

    #[test]
    fn falls_back_to_level_default_when_role_unmapped() {
        let resolver = resolver_with(
            r#"
            [level_defaults]
            standard = "gpt-standard"

            [model_keys.gpt-standard]
            model_name = "gpt-4o-mini"
            backend = "openai"
            "#,
        );
        assert_eq!(resolver.resolve_model(Role::Generator, "standard").unwrap(), "gpt-standard");
    }

    #[test]
    fn unknown_model_key_errors() {
        let resolver = resolver_with("");
        assert!(matches!(
            resolver.backend_of("nope"),
            Err(ConfigError::UnknownModelKey(_))
        ));
    }
}
