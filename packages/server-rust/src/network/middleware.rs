//! Middleware between the listener and the request adapter.
//!
//! Two stacks are applied. The action stack wraps only the adapter fallback:
//! body limit and per-request metrics. The transport stack wraps every route,
//! probes included. In both, the first layer listed sees the request first
//! and the response last.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info_span, Span};

use super::config::ServerConfig;
use crate::adapter::{MetricsLayer, RequestAdapter};
use crate::routing::registry::ALL_METHODS;

/// Mounts `adapter` as the fallback of `router` behind the action stack,
/// then wraps the whole router in the transport stack.
///
/// Transport order: request id, trace, gzip, CORS, timeout, request-id
/// propagation. The timeout bounds the whole HTTP exchange and answers 408
/// with an empty body. Action-level timeouts run inside the engine and
/// produce a `TIMEOUT` error body instead.
#[must_use]
pub fn layer_router(router: Router, adapter: RequestAdapter, config: &ServerConfig) -> Router {
    let actions = ServiceBuilder::new()
        .layer(MetricsLayer)
        .service(adapter.with_body_limit(config.body_limit_bytes));

    let transport = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(CompressionLayer::new())
        .layer(cors_layer(&config.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout(),
        ))
        .layer(PropagateRequestIdLayer::x_request_id());

    router.fallback_service(actions).layer(transport)
}

/// Span for one HTTP exchange, tagged with the id assigned by the outer layer.
fn request_span(req: &Request<Body>) -> Span {
    let request_id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-");
    info_span!(
        "http",
        method = %req.method(),
        path = req.uri().path(),
        request_id
    )
}

/// `*` anywhere in `origins` allows every origin.
fn cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(origins.iter().filter_map(|o| o.parse().ok()))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods(ALL_METHODS.to_vec())
        .allow_headers(Any)
}
