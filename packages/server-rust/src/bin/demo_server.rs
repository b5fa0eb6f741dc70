//! Demo server exposing a few sample actions.
//!
//! ```text
//! ACTIONKIT_PORT=3000 cargo run --bin demo-server -- --path-prefix /api
//! curl -X POST localhost:3000/api/increment -d '{"number": 5}'
//! curl localhost:3000/api/posts/42 -H 'authorization: Bearer demo'
//! ```

use std::time::Duration;

use actionkit_core::{
    ActionBuilder, ActionError, FieldDef, FieldKind, ObjectSchema, ProcedureChain, RetryPolicy,
};
use actionkit_server::{NetworkModule, RouteMetadata, RouteRegistry, ServerConfig};
use clap::Parser;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Deserialize)]
struct Increment {
    number: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PostId {
    post_id: u64,
}

/// Context produced by the auth link.
#[derive(Debug, Clone)]
struct User {
    token: String,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn registry(prefix: &str) -> anyhow::Result<RouteRegistry> {
    let increment = ActionBuilder::new("increment")
        .input::<Increment>(
            ObjectSchema::new().field(FieldDef::new("number", FieldKind::Number).coerce()),
        )
        .handler(|args| async move { anyhow::Ok(args.input.number + 1.0) });

    let authed = ProcedureChain::new().then_ctx(|(), meta| async move {
        let token = meta
            .request
            .as_ref()
            .and_then(|r| r.headers.get("authorization"))
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned);
        match token {
            Some(token) => anyhow::Ok(User { token }),
            None => Err(ActionError::not_authorized("bearer token required").into()),
        }
    });

    let get_post = authed
        .action("get-post")
        .input::<PostId>(
            ObjectSchema::new().field(FieldDef::new("postId", FieldKind::Integer).coerce()),
        )
        .retry(RetryPolicy::exponential(3, Duration::from_millis(50)))
        .timeout(Duration::from_secs(2))
        .handler(|args| async move {
            anyhow::Ok(json!({
                "id": args.input.post_id,
                "title": format!("Post {}", args.input.post_id),
                "viewer": args.ctx.token,
            }))
        });

    let registry = RouteRegistry::new()
        .with_prefix(prefix)
        .with_defaults(RouteMetadata::new().tags(["demo"]))
        .route(
            http::Method::POST,
            "/increment",
            increment.shared(),
            Some(RouteMetadata::new().summary("Add one to a number")),
        )?
        .get("/posts/{postId}", get_post.shared())?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_tracing(config.log_json);

    let registry = registry(&config.path_prefix)?;
    for entry in registry.entries() {
        info!(
            method = %entry.method,
            path = entry.template.as_str(),
            action = entry.action.name(),
            "route"
        );
    }

    let mut module = NetworkModule::new(config, registry);
    let port = module.start().await?;
    info!(port, "demo server ready");

    module
        .serve(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
}
