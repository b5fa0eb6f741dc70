//! `ActionKit` Server: route registry, request adapter, and HTTP serving for
//! actions defined with `actionkit-core`.

pub mod adapter;
pub mod network;
pub mod remote;
pub mod routing;

pub use adapter::{ParsedRequest, RequestAdapter};
pub use network::{NetworkModule, ServerConfig, ShutdownController};
pub use remote::HttpInvoker;
pub use routing::{RouteError, RouteMetadata, RouteRegistry};
