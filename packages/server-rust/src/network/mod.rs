//! Networking: configuration, middleware, probes, shutdown, and the server
//! lifecycle.

pub mod config;
pub mod health;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::ServerConfig;
pub use middleware::layer_router;
pub use module::NetworkModule;
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
