//! C2 Backend Router and C3 Embedder.

pub mod embedder;
pub mod error;
pub mod router;
pub mod types;

pub use embedder::{Embedder, EmbeddingBackend};
pub use error::RoutingError;
pub use router::{BackendClient, BackendRouter};
pub use types::{GenerateOptions, RetryPolicy};
