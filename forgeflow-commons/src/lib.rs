//! Shared primitives reused across the forgeflow workspace: a canonical
//! error-category taxonomy, the externally-visible error envelope
//!, content hashing for artifact/tool versioning, and
//! brace-placeholder template rendering.

pub mod error_context;
pub mod hashing;
pub mod template;

pub use error_context::{ErrorCategory, ErrorContext, ErrorEnvelope};
pub use hashing::definition_hash;
pub use template::render_template;
