//! Request adapter: resolves an HTTP request to an action and runs it.
//!
//! Two entry points share one pipeline. [`RequestAdapter::handle`] produces a
//! wire response; [`RequestAdapter::handle_structured`] returns the result
//! tuple for callers that render their own response.

pub mod input;
pub mod metrics;

use std::convert::Infallible;
use std::sync::Arc;
use std::task::{Context, Poll};

use actionkit_core::{ActionResult, ExecuteOptions, SharedAction, WireResult};
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use futures_util::future::BoxFuture;
use http::{Request, StatusCode};
use serde_json::Value;
use tower::Service;
use tracing::debug;

use crate::network::ShutdownController;
use crate::routing::RouteRegistry;

pub use self::metrics::{MetricsLayer, MetricsService};

/// Default cap on request body size.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// A request resolved to its action with assembled input.
pub struct ParsedRequest {
    pub action: SharedAction,
    pub input: Value,
    /// Matched route template.
    pub route: String,
    pub request: Arc<http::request::Parts>,
}

impl std::fmt::Debug for ParsedRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedRequest")
            .field("action", &self.action.name())
            .field("route", &self.route)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

/// Dispatches requests to the actions of a [`RouteRegistry`].
///
/// Cheap to clone; also usable directly as a `tower::Service`.
#[derive(Debug, Clone)]
pub struct RequestAdapter {
    registry: Arc<RouteRegistry>,
    body_limit: usize,
    shutdown: Option<Arc<ShutdownController>>,
}

impl RequestAdapter {
    /// Adapter over `registry` with the default body limit.
    #[must_use]
    pub fn new(registry: RouteRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            body_limit: DEFAULT_BODY_LIMIT,
            shutdown: None,
        }
    }

    /// Bodies larger than `limit` bytes contribute nothing to the input.
    #[must_use]
    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = limit;
        self
    }

    /// Counts every request served through the `Service` impl as in flight.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Arc<ShutdownController>) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    /// Routes this adapter dispatches to.
    #[must_use]
    pub fn registry(&self) -> &RouteRegistry {
        &self.registry
    }

    /// Finds the route for `req` and assembles its input. `None` means no
    /// route matched.
    pub async fn parse(&self, req: Request<Body>) -> Option<ParsedRequest> {
        let (parts, body) = req.into_parts();

        let (action, route, params) = {
            let Some(found) = self.registry.find(&parts.method, parts.uri.path()) else {
                debug!(method = %parts.method, path = parts.uri.path(), "no route matched");
                return None;
            };
            (
                SharedAction::clone(&found.entry.action),
                found.entry.template.as_str().to_string(),
                found.params,
            )
        };

        let query = input::query_params(&parts.uri);
        let body = if input::carries_body(&parts.method) {
            input::read_body(&parts.headers, body, self.body_limit).await
        } else {
            None
        };

        Some(ParsedRequest {
            action,
            input: input::assemble(query, body, params),
            route,
            request: Arc::new(parts),
        })
    }

    /// Runs the parsed request's action. The transport request travels to
    /// procedure links as request metadata.
    pub async fn dispatch(&self, parsed: ParsedRequest) -> ActionResult<Value> {
        let opts = ExecuteOptions {
            input_override: None,
            request: Some(parsed.request),
        };
        parsed.action.call_json(parsed.input, opts).await
    }

    /// Structured-result mode. `None` means no route matched.
    pub async fn handle_structured(&self, req: Request<Body>) -> Option<WireResult<Value>> {
        let parsed = self.parse(req).await?;
        Some(WireResult(self.dispatch(parsed).await))
    }

    /// Wire-response mode: 200 with the data as JSON, the error's mapped
    /// status with the error as JSON, or an empty 404.
    pub async fn handle(&self, req: Request<Body>) -> Response {
        let Some(parsed) = self.parse(req).await else {
            return StatusCode::NOT_FOUND.into_response();
        };

        match self.dispatch(parsed).await {
            Ok(data) => (StatusCode::OK, Json(data)).into_response(),
            Err(err) => {
                let status = StatusCode::from_u16(err.http_status())
                    .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
                (status, Json(err)).into_response()
            }
        }
    }

    /// An axum router that sends every request to this adapter.
    #[must_use]
    pub fn into_router(self) -> Router {
        Router::new().fallback_service(self)
    }
}

impl Service<Request<Body>> for RequestAdapter {
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Response, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let adapter = self.clone();
        let guard = self.shutdown.as_ref().map(|s| s.in_flight_guard());
        Box::pin(async move {
            let response = adapter.handle(req).await;
            drop(guard);
            Ok(response)
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use actionkit_core::{
        ActionBuilder, ActionError, ErrorCode, FieldDef, FieldKind, ObjectSchema, ProcedureChain,
    };
    use http::header::CONTENT_TYPE;
    use serde::Deserialize;
    use serde_json::json;
    use tower::ServiceExt;

    use super::*;

    #[derive(Debug, Clone, Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct ReplyQuery {
        post_id: i64,
        reply_id: i64,
        verbose: Option<bool>,
    }

    fn registry() -> RouteRegistry {
        let reply = ActionBuilder::new("reply")
            .input::<ReplyQuery>(
                ObjectSchema::new()
                    .field(FieldDef::new("postId", FieldKind::Integer).coerce())
                    .field(FieldDef::new("replyId", FieldKind::Integer).coerce())
                    .field(FieldDef::new("verbose", FieldKind::Boolean).coerce().optional()),
            )
            .handler(|args| async move {
                let q = args.input;
                anyhow::Ok(json!({ "post": q.post_id, "reply": q.reply_id, "verbose": q.verbose }))
            });

        let echo = ActionBuilder::new("echo").handler(|args| async move { anyhow::Ok(args.input) });

        let guarded = ProcedureChain::new()
            .then_ctx(|(), meta| async move {
                let authorized = meta
                    .request
                    .as_ref()
                    .and_then(|r| r.headers.get("authorization"))
                    .is_some();
                if authorized {
                    anyhow::Ok(())
                } else {
                    Err(ActionError::not_authorized("missing credentials").into())
                }
            })
            .action("secret")
            .handler(|_args| async { anyhow::Ok("classified") });

        let slow = ActionBuilder::new("slow")
            .timeout(Duration::from_millis(20))
            .handler(|_args| async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                anyhow::Ok(())
            });

        RouteRegistry::new()
            .get("/posts/{postId}/replies/{replyId}", reply.shared())
            .unwrap()
            .all("/echo", echo.shared())
            .unwrap()
            .get("/secret", guarded.shared())
            .unwrap()
            .get("/slow", slow.shared())
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    async fn body_json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn path_params_reach_the_action() {
        let adapter = RequestAdapter::new(registry());
        let resp = adapter
            .handle(get("/posts/42/replies/7?verbose=true&postId=1"))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            body_json(resp).await,
            json!({ "post": 42, "reply": 7, "verbose": true })
        );
    }

    #[tokio::test]
    async fn unmatched_route_is_an_empty_404() {
        let adapter = RequestAdapter::new(registry());
        let resp = adapter.handle(get("/nope")).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());

        assert!(adapter.handle_structured(get("/nope")).await.is_none());
    }

    #[tokio::test]
    async fn method_must_match() {
        let adapter = RequestAdapter::new(registry());
        let req = Request::post("/posts/1/replies/2").body(Body::empty()).unwrap();
        assert_eq!(adapter.handle(req).await.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn parse_errors_map_to_400() {
        let adapter = RequestAdapter::new(registry());
        let resp = adapter.handle(get("/posts/abc/replies/7")).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["code"], "INPUT_PARSE_ERROR");
        assert!(body["fieldErrors"]["postId"].is_array());
    }

    #[tokio::test]
    async fn chain_failures_map_to_401() {
        let adapter = RequestAdapter::new(registry());
        let resp = adapter.handle(get("/secret")).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(body_json(resp).await["code"], "NOT_AUTHORIZED");

        let req = Request::get("/secret")
            .header("authorization", "Bearer t")
            .body(Body::empty())
            .unwrap();
        let resp = adapter.handle(req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!("classified"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_map_to_408() {
        let adapter = RequestAdapter::new(registry());
        let resp = adapter.handle(get("/slow")).await;
        assert_eq!(resp.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(body_json(resp).await["code"], "TIMEOUT");
    }

    #[tokio::test]
    async fn json_and_form_bodies_merge_under_query() {
        let adapter = RequestAdapter::new(registry());

        let req = Request::post("/echo?a=q&b=q")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"b":"body","c":3}"#))
            .unwrap();
        let result = adapter.handle_structured(req).await.unwrap().into_result();
        assert_eq!(result, Ok(json!({ "a": "q", "b": "body", "c": 3 })));

        let req = Request::put("/echo")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("name=Ada"))
            .unwrap();
        let result = adapter.handle_structured(req).await.unwrap().into_result();
        assert_eq!(result, Ok(json!({ "name": "Ada" })));
    }

    #[tokio::test]
    async fn broken_body_degrades_to_no_body() {
        let adapter = RequestAdapter::new(registry()).with_body_limit(8);
        let req = Request::post("/echo?a=1")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"a":"this body is too long"}"#))
            .unwrap();
        let result = adapter.handle_structured(req).await.unwrap().into_result();
        assert_eq!(result, Ok(json!({ "a": "1" })));
    }

    #[tokio::test]
    async fn structured_mode_returns_the_error_tuple() {
        let adapter = RequestAdapter::new(registry());
        let wire = adapter.handle_structured(get("/secret")).await.unwrap();
        let err = wire.into_result().unwrap_err();
        assert_eq!(err.code, ErrorCode::NotAuthorized);
    }

    #[tokio::test]
    async fn works_as_a_tower_service_and_router() {
        let adapter = RequestAdapter::new(registry());
        let resp = adapter.clone().oneshot(get("/echo?x=1")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = adapter.into_router().oneshot(get("/echo?x=2")).await.unwrap();
        assert_eq!(body_json(resp).await, json!({ "x": "2" }));
    }

    #[tokio::test]
    async fn service_calls_are_tracked_in_flight() {
        let shutdown = Arc::new(ShutdownController::new());
        let adapter = RequestAdapter::new(registry()).with_shutdown(Arc::clone(&shutdown));
        let resp = adapter.oneshot(get("/echo")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(shutdown.in_flight_count(), 0);
    }
}
