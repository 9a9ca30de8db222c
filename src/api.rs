// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! HTTP API — the core's four required external endpoints (`§6`) plus the
//! ambient observability routes (`§6.1`).
//!
//! Endpoints:
//!   GET  /healthz                                          → liveness probe
//!   GET  /detector/status                                   → reconciler snapshot (JSON)
//!   GET  /cctv/stream/{cam_id}                               → raw MJPEG passthrough
//!   GET  /detector/stream_detector/{det_id}?tracking=bool    → annotated MJPEG feed
//!   GET  /detector/fps_info/{det_id}                         → telemetry snapshot (JSON)
//!   POST /detector/webrtc_offer/{det_id}                     → SDP offer/answer exchange

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::config::ConfigStore;
use crate::detector_manager::DetectorManager;
use crate::streams::mjpeg;
use crate::streams::webrtc::WebRtcManager;

/// Shared state passed to all handlers.
pub struct AppState {
    pub config: Arc<ConfigStore>,
    pub detector_manager: Arc<DetectorManager>,
    pub webrtc_manager: Arc<WebRtcManager>,
}

#[derive(Deserialize)]
pub struct TrackingParams {
    #[serde(default)]
    tracking: Option<bool>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
pub struct OfferBody {
    sdp: String,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    sdp_type: String,
}

#[derive(Serialize)]
struct AnswerBody {
    sdp: String,
    #[serde(rename = "type")]
    sdp_type: &'static str,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, axum::Json(ErrorBody { error: message.into() })).into_response()
}

/// MJPEG responses must force clients to never cache a multipart frame
/// boundary, per `§4.5.1` (verbatim from `spec.md`).
const MJPEG_HEADERS: [(&str, &str); 4] = [
    ("content-type", "multipart/x-mixed-replace; boundary=frame"),
    ("cache-control", "no-cache, no-store, must-revalidate"),
    ("pragma", "no-cache"),
    ("expires", "0"),
];

/// Build the axum router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(handle_healthz))
        .route("/detector/status", get(handle_detector_status))
        .route("/cctv/stream/{cam_id}", get(handle_cctv_stream))
        .route("/detector/stream_detector/{det_id}", get(handle_detector_stream))
        .route("/detector/fps_info/{det_id}", get(handle_fps_info))
        .route("/detector/webrtc_offer/{det_id}", post(handle_webrtc_offer))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn start_server(state: Arc<AppState>, addr: &str) {
    let app = build_router(state);
    info!(addr, "HTTP API listening on http://{addr}");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(error = %e, "failed to bind HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!(error = %e, "HTTP server error");
    }
}

async fn handle_healthz() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(serde_json::json!({"status": "ok"})))
}

async fn handle_detector_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (StatusCode::OK, axum::Json(state.detector_manager.get_status()))
}

/// `GET /cctv/stream/{cam_id}`: raw camera passthrough, per `§4.5.1`/`§6`.
async fn handle_cctv_stream(State(state): State<Arc<AppState>>, Path(cam_id): Path<u64>) -> axum::response::Response {
    let Some(camera) = state.config.get_camera(cam_id) else {
        return error_response(StatusCode::BAD_REQUEST, format!("camera '{cam_id}' not found"));
    };
    if !camera.enabled {
        return error_response(StatusCode::BAD_REQUEST, format!("camera '{cam_id}' disabled"));
    }

    let consumer_id = format!("cctv_http_{}", uniquify());
    let stream_manager = state.detector_manager.stream_manager().clone();
    stream_manager.cleanup_dead();
    let worker = match stream_manager.get_stream(&camera.url, &consumer_id).await {
        Some(w) => w,
        None => match stream_manager.force_restart(&camera.url, &consumer_id).await {
            Some(w) => w,
            None => return error_response(StatusCode::INTERNAL_SERVER_ERROR, "stream unobtainable"),
        },
    };

    let body = mjpeg::raw_cctv_stream(cam_id, consumer_id, camera.url, worker, stream_manager, state.config.clone());
    (StatusCode::OK, MJPEG_HEADERS, Body::from_stream(body)).into_response()
}

/// `GET /detector/stream_detector/{det_id}?tracking=`: annotated feed, per
/// `§4.5.2`/`§6`. The `tracking` query param is a short-lived reconcile
/// override, not a persisted config mutation.
async fn handle_detector_stream(
    State(state): State<Arc<AppState>>,
    Path(det_id): Path<u64>,
    Query(params): Query<TrackingParams>,
) -> axum::response::Response {
    let Some(detector) = state.config.get_detector(det_id) else {
        return error_response(StatusCode::BAD_REQUEST, format!("detector '{det_id}' not running"));
    };
    if !detector.running {
        return error_response(StatusCode::BAD_REQUEST, format!("detector '{det_id}' not running"));
    }

    if let Some(tracking) = params.tracking {
        let mut overrides = HashMap::new();
        overrides.insert(det_id, tracking);
        state.detector_manager.reconcile(overrides).await;
    }

    if !state.detector_manager.is_running(det_id) {
        return error_response(StatusCode::BAD_REQUEST, format!("detector '{det_id}' not running"));
    }

    let body = mjpeg::annotated_detector_stream(det_id, detector.camera_id, state.detector_manager.clone(), state.config.clone());
    (StatusCode::OK, MJPEG_HEADERS, Body::from_stream(body)).into_response()
}

/// `GET /detector/fps_info/{det_id}`: telemetry snapshot, per `§6`. Stale
/// entries (>5s) are already replaced with zeros by `GlobalState::get_telemetry`.
async fn handle_fps_info(State(state): State<Arc<AppState>>, Path(det_id): Path<u64>) -> impl IntoResponse {
    let telemetry = state.detector_manager.global().get_telemetry(det_id);
    (StatusCode::OK, axum::Json(telemetry))
}

/// `POST /detector/webrtc_offer/{det_id}`: SDP offer/answer exchange, per
/// `§6`. The `det_id` path segment always wins over any `a=detector_id`
/// attribute embedded in the offer SDP.
async fn handle_webrtc_offer(
    State(state): State<Arc<AppState>>,
    Path(det_id): Path<u64>,
    axum::Json(body): axum::Json<OfferBody>,
) -> axum::response::Response {
    match state.webrtc_manager.handle_offer(det_id, body.sdp).await {
        Ok(answer_sdp) => (
            StatusCode::OK,
            axum::Json(AnswerBody {
                sdp: answer_sdp,
                sdp_type: "answer",
            }),
        )
            .into_response(),
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn uniquify() -> u64 {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}
