//! Route registry: maps HTTP verb + path templates to actions.

pub mod metadata;
pub mod path;
pub mod registry;

pub use metadata::RouteMetadata;
pub use path::PathTemplate;
pub use registry::{RouteEntry, RouteMatch, RouteRegistry};

/// Errors raised while building a [`RouteRegistry`].
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("invalid route path {path:?}: {reason}")]
    InvalidPath { path: String, reason: &'static str },
    #[error("duplicate route {method} {path} (conflicts with {existing})")]
    Duplicate {
        method: http::Method,
        path: String,
        existing: String,
    },
}
