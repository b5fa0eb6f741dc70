//! Health, liveness, and readiness probes.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::{json, Value};

use super::shutdown::{HealthState, ShutdownController};

/// State shared by the probe handlers.
#[derive(Debug, Clone)]
pub struct ProbeState {
    pub shutdown: Arc<ShutdownController>,
    pub routes: usize,
    pub start_time: Instant,
}

/// Always 200; the body reports the actual state.
pub async fn health_handler(State(state): State<ProbeState>) -> Json<Value> {
    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "routes": state.routes,
        "in_flight": state.shutdown.in_flight_count(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

/// Always 200 while the process is serving.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// 200 only while `Ready`.
pub async fn readiness_handler(State(state): State<ProbeState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe_state() -> ProbeState {
        ProbeState {
            shutdown: Arc::new(ShutdownController::new()),
            routes: 3,
            start_time: Instant::now(),
        }
    }

    #[tokio::test]
    async fn health_reports_state_and_routes() {
        let state = probe_state();
        state.shutdown.set_ready();
        let Json(body) = health_handler(State(state)).await;
        assert_eq!(body["state"], "ready");
        assert_eq!(body["routes"], 3);
        assert_eq!(body["in_flight"], 0);
    }

    #[tokio::test]
    async fn readiness_follows_health_state() {
        let state = probe_state();
        assert_eq!(
            readiness_handler(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
        state.shutdown.set_ready();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);
        state.shutdown.trigger_shutdown();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
