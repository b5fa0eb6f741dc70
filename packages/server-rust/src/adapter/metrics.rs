//! Request metrics middleware.
//!
//! Records per-request duration and status in a `tracing` span and in the
//! `metrics` facade. Without an installed recorder the metric calls are no-ops.

use std::task::{Context, Poll};
use std::time::Instant;

use futures_util::future::BoxFuture;
use http::{Request, Response};
use tower::{Layer, Service};
use tracing::{field, info, info_span, Instrument, Span};

/// Counter labelled by `method` and `status`.
pub const REQUESTS_TOTAL: &str = "actionkit_requests_total";
/// Histogram labelled by `method`.
pub const REQUEST_DURATION_SECONDS: &str = "actionkit_request_duration_seconds";

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Records a request counter and a latency histogram per response.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service produced by [`MetricsLayer`].
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S, B, R> Service<Request<B>> for MetricsService<S>
where
    S: Service<Request<B>, Response = Response<R>>,
    S::Future: Send + 'static,
    S::Error: Send + 'static,
    R: Send + 'static,
{
    type Response = Response<R>;
    type Error = S::Error;
    type Future = BoxFuture<'static, Result<Response<R>, S::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let method = req.method().to_string();
        let span = info_span!(
            "request",
            method = %method,
            path = %req.uri().path(),
            status = field::Empty,
            duration_ms = field::Empty,
        );

        let fut = self.inner.call(req);

        Box::pin(
            async move {
                let start = Instant::now();
                let result = fut.await;
                let elapsed = start.elapsed();

                let status = match &result {
                    Ok(response) => response.status().as_str().to_string(),
                    Err(_) => "error".to_string(),
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
                Span::current().record("status", status.as_str());
                Span::current().record("duration_ms", duration_ms);

                metrics::counter!(
                    REQUESTS_TOTAL,
                    "method" => method.clone(),
                    "status" => status.clone()
                )
                .increment(1);
                metrics::histogram!(REQUEST_DURATION_SECONDS, "method" => method)
                    .record(elapsed.as_secs_f64());

                info!(status = %status, duration_ms, "request complete");
                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
