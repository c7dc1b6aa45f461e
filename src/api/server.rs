use std::convert::Infallible;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use rust_embed::Embed;

use crate::storage::{DetectionLog, FrameStore};
use crate::supervisor::Supervisor;

/// Poll cadence of a live feed, ~20 Hz. Frames are overwritten upstream, so
/// a slow client only ever skips frames, never applies backpressure.
const FEED_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Embed)]
#[folder = "src/assets/"]
struct Assets;

/// Read-only view over the shared state; handlers never mutate worker or
/// device state.
#[derive(Clone)]
pub struct AppState {
    pub supervisor: Supervisor,
    pub frames: FrameStore,
    pub detections: DetectionLog,
}

pub async fn start_server(state: AppState, port: u16) -> Result<(), std::io::Error> {
    let app = router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("starting HTTP server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/assets/{*path}", get(static_handler))
        .route("/api/cameras", get(cameras_handler))
        .route("/api/recent_detections", get(recent_detections_handler))
        .route("/video_feed/{index}", get(video_feed_handler))
        .with_state(state)
}

async fn index_handler() -> impl IntoResponse {
    match Assets::get("index.html") {
        Some(content) => Html(content.data.to_vec()).into_response(),
        None => (StatusCode::NOT_FOUND, "index.html not found").into_response(),
    }
}

async fn static_handler(Path(path): Path<String>) -> impl IntoResponse {
    match Assets::get(&path) {
        Some(content) => {
            let mime = mime_guess::from_path(&path).first_or_octet_stream();
            (
                [(header::CONTENT_TYPE, mime.as_ref())],
                content.data.to_vec(),
            )
                .into_response()
        }
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}

async fn cameras_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.supervisor.active())
}

async fn recent_detections_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(state.detections.snapshot())
}

/// Continuous multipart JPEG stream for the device at `index` in the sorted
/// active list. Emission is skipped entirely while no frame is available;
/// the handler never blocks on the producer.
async fn video_feed_handler(
    State(state): State<AppState>,
    Path(index): Path<usize>,
) -> Response {
    let devices = state.supervisor.active();
    let Some(device) = devices.get(index).cloned() else {
        return (StatusCode::NOT_FOUND, "no device at this index").into_response();
    };

    let frames = state.frames.clone();
    let stream = async_stream::stream! {
        let mut interval = tokio::time::interval(FEED_INTERVAL);
        loop {
            interval.tick().await;
            let Some(entry) = frames.get(&device) else {
                continue;
            };
            let part_header = format!(
                "--frame\r\nContent-Type: image/jpeg\r\nX-Timestamp: {:.3}\r\n\r\n",
                entry.timestamp
            );
            let mut part = Vec::with_capacity(part_header.len() + entry.jpeg.len() + 2);
            part.extend_from_slice(part_header.as_bytes());
            part.extend_from_slice(&entry.jpeg);
            part.extend_from_slice(b"\r\n");
            yield Ok::<_, Infallible>(Bytes::from(part));
        }
    };

    (
        [
            (
                header::CONTENT_TYPE,
                "multipart/x-mixed-replace; boundary=frame",
            ),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::time::Duration;

    use opencv::core::Mat;

    use crate::analytics::{DetectError, Detection, Detector, Model, RateLimiter};
    use crate::storage::DetectionRecord;
    use crate::worker::WorkerContext;

    struct NoopModel;

    impl Model for NoopModel {
        fn infer(&mut self, _frame: &Mat) -> Result<Vec<Detection>, DetectError> {
            Ok(Vec::new())
        }
    }

    fn test_state() -> AppState {
        let frames = FrameStore::new();
        let detections = DetectionLog::new(50);
        let supervisor = Supervisor::new(WorkerContext {
            client: reqwest::Client::new(),
            frames: frames.clone(),
            log: detections.clone(),
            limiter: RateLimiter::new(Duration::from_secs(5)),
            detector: Detector::new(Box::new(NoopModel)),
            snapshots: None,
            failure_threshold: 1000,
            backoff: Duration::from_secs(60),
        });
        AppState {
            supervisor,
            frames,
            detections,
        }
    }

    async fn serve(state: AppState) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(state);
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn video_feed_index_out_of_range_is_404() {
        let addr = serve(test_state()).await;
        let response = reqwest::get(format!("http://{addr}/video_feed/0"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn video_feed_streams_the_latest_frame_as_multipart() {
        let state = test_state();
        state.supervisor.register("127.0.0.1:1");
        state.frames.put("127.0.0.1:1", vec![0xFF, 0xD8, 0xAB, 0xFF, 0xD9]);
        let addr = serve(state).await;

        let mut response = reqwest::get(format!("http://{addr}/video_feed/0"))
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let text = String::from_utf8_lossy(&chunk);
        assert!(text.starts_with("--frame\r\nContent-Type: image/jpeg\r\nX-Timestamp:"));
    }

    #[tokio::test]
    async fn recent_detections_returns_the_newest_first_snapshot() {
        let state = test_state();
        for i in 0..3 {
            state.detections.append(DetectionRecord {
                source: "10.0.0.5".to_string(),
                timestamp: i as f64,
                detections: vec![Detection {
                    bbox: [1.0, 2.0, 3.0, 4.0],
                    score: 0.9,
                    label_id: 2,
                    label_name: "car".to_string(),
                }],
            });
        }
        let addr = serve(state).await;

        let body: serde_json::Value =
            reqwest::get(format!("http://{addr}/api/recent_detections"))
                .await
                .unwrap()
                .json()
                .await
                .unwrap();

        let records = body.as_array().unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0]["timestamp"], 2.0);
        assert_eq!(records[2]["timestamp"], 0.0);
        assert_eq!(records[0]["detections"][0]["label_name"], "car");
    }

    #[tokio::test]
    async fn cameras_lists_active_devices_in_sorted_order() {
        let state = test_state();
        state.supervisor.register("127.0.0.1:2");
        state.supervisor.register("127.0.0.1:1");
        let addr = serve(state).await;

        let body: Vec<String> = reqwest::get(format!("http://{addr}/api/cameras"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body, vec!["127.0.0.1:1", "127.0.0.1:2"]);
    }
}
