//! Server configuration, read from flags and environment.

use std::time::Duration;

use clap::Parser;

use crate::adapter::DEFAULT_BODY_LIMIT;

/// Configuration for the action server.
#[derive(Debug, Clone, Parser)]
#[command(name = "actionkit", about = "Serve actions over HTTP", version)]
pub struct ServerConfig {
    /// Bind address.
    #[arg(long, env = "ACTIONKIT_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port to listen on. 0 means OS-assigned.
    #[arg(long, env = "ACTIONKIT_PORT", default_value_t = 0)]
    pub port: u16,

    /// Prepended to every registered route path.
    #[arg(long, default_value = "")]
    pub path_prefix: String,

    /// Transport-level limit on total request processing time.
    #[arg(long, default_value_t = 30_000)]
    pub request_timeout_ms: u64,

    /// Bodies larger than this contribute nothing to action input.
    #[arg(long, default_value_t = DEFAULT_BODY_LIMIT)]
    pub body_limit_bytes: usize,

    /// Allowed CORS origin; repeat for several. `*` allows any.
    #[arg(long = "cors-origin", default_value = "*")]
    pub cors_origins: Vec<String>,

    /// Emit logs as JSON lines.
    #[arg(long)]
    pub log_json: bool,

    /// Grace period for in-flight requests after shutdown is signalled.
    #[arg(long, default_value_t = 30_000)]
    pub drain_timeout_ms: u64,
}

impl ServerConfig {
    /// Whole-request timeout applied by the HTTP layer stack.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// How long shutdown waits for in-flight requests.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// `host:port` for the listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 0,
            path_prefix: String::new(),
            request_timeout_ms: 30_000,
            body_limit_bytes: DEFAULT_BODY_LIMIT,
            cors_origins: vec!["*".to_string()],
            log_json: false,
            drain_timeout_ms: 30_000,
        }
    }
}
