use crate::core::Control;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::get,
    Router,
};
use rockcast_proto::protocol::{Command, SessionView, TrackSnapshot};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

pub fn start_server(bind_address: String, port: u16, control: Control) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);

        if let Err(e) = axum::serve(listener, router(control)).await {
            error!("HTTP server error: {}", e);
        }
    })
}

pub fn router(control: Control) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/snapshot", get(get_snapshot))
        .route("/api/start", get(start).post(start))
        .route("/api/stop", get(stop).post(stop))
        .route("/api/volume/:volume", get(set_volume).post(set_volume))
        .route("/api/volume", get(get_volume))
        .layer(cors)
        .with_state(control)
}

async fn get_state(State(control): State<Control>) -> Json<SessionView> {
    Json(control.state_manager.get_state().await)
}

async fn get_snapshot(State(control): State<Control>) -> Json<TrackSnapshot> {
    Json(control.state_manager.get_state().await.snapshot)
}

async fn start(State(control): State<Control>) -> StatusCode {
    info!("HTTP API: Start");
    control.execute(Command::Start).await;
    StatusCode::OK
}

async fn stop(State(control): State<Control>) -> StatusCode {
    info!("HTTP API: Stop");
    control.execute(Command::Stop).await;
    StatusCode::OK
}

async fn set_volume(State(control): State<Control>, Path(volume): Path<i32>) -> StatusCode {
    info!("HTTP API: Set volume to {}%", volume);
    control.execute(Command::Volume { value: volume }).await;
    StatusCode::OK
}

async fn get_volume(State(control): State<Control>) -> Json<VolumeStatus> {
    let volume = control.state_manager.get_state().await.volume;
    Json(VolumeStatus { volume })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::control;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use rockcast_proto::protocol::SessionState;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn call(app: &Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    async fn wait_for_state(app: &Router, want: &str) -> serde_json::Value {
        for _ in 0..100 {
            let (_, view) = call(app, "GET", "/api/state").await;
            if view["state"] == want {
                return view;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("state never became {want}");
    }

    #[tokio::test]
    async fn test_state_reports_idle_view() {
        let dir = tempfile::tempdir().unwrap();
        let (control, _sink) = control(&dir);
        let app = router(control);

        let (status, view) = call(&app, "GET", "/api/state").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(view["state"], "Idle");
        assert_eq!(view["volume"], 70);
        assert_eq!(view["candidates"].as_array().map(Vec::len), Some(2));
    }

    #[tokio::test]
    async fn test_start_then_stop() {
        let dir = tempfile::tempdir().unwrap();
        let (control, sink) = control(&dir);
        let app = router(control.clone());

        let (status, _) = call(&app, "POST", "/api/start").await;
        assert_eq!(status, StatusCode::OK);
        wait_for_state(&app, "Playing").await;
        assert_eq!(*sink.opens.lock().unwrap(), vec!["http://a.test/stream"]);

        let (status, _) = call(&app, "GET", "/api/stop").await;
        assert_eq!(status, StatusCode::OK);
        let view = wait_for_state(&app, "Stopped").await;
        assert_eq!(view["snapshot"]["current_track"], "");

        assert_eq!(control.state_manager.get_state().await.state, SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_volume_is_clamped_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (control, _sink) = control(&dir);
        let app = router(control);

        let (status, _) = call(&app, "POST", "/api/volume/140").await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = call(&app, "GET", "/api/volume").await;
        assert_eq!(body["volume"], 100);

        let saved = std::fs::read_to_string(dir.path().join("state.json")).unwrap();
        assert!(saved.contains("100"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let dir = tempfile::tempdir().unwrap();
        let (control, _sink) = control(&dir);
        let (status, _) = call(&router(control), "GET", "/api/next").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
