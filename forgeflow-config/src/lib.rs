//! C1 Config Resolver: layered configuration loading, role ->
//! model-key resolution, backend lookup, and the trusted package allowlist.

pub mod allowlist;
pub mod error;
pub mod layers;
pub mod resolver;
pub mod roles;

pub use allowlist::{AllowlistEntry, TrustedPackageAllowlist};
pub use error::ConfigError;
pub use layers::{ConfigLayerEntry, ConfigLayerSource, ConfigLayerStack};
pub use resolver::{ConfigResolver, ModelKeyMetadata};
pub use roles::{Backend, Role, RoleDefaults};
