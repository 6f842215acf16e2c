//! Control-plane integration tests.
//!
//! The full axum router is served in-process over real components running
//! in test mode, so every assertion goes through HTTP exactly as the UI
//! would. No capture hardware or media server is required; endpoints that
//! need them are asserted on their failure contracts instead.

use std::net::SocketAddr;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::net::TcpListener;

use r58_studio::web::{router, AppState};
use r58_studio::{Config, Platform};

struct TestServer {
    addr: SocketAddr,
    client: reqwest::Client,
    _dirs: TempDir,
}

impl TestServer {
    async fn start() -> TestServer {
        let dirs = tempfile::tempdir().expect("tempdir");
        let root = dirs.path();

        let scenes_dir = root.join("scenes");
        std::fs::create_dir_all(&scenes_dir).unwrap();
        std::fs::write(
            scenes_dir.join("quad.json"),
            json!({
                "id": "quad",
                "width": 1920,
                "height": 1080,
                "slots": [
                    { "source": "cam0", "x": 0.0, "y": 0.0, "w": 0.5, "h": 0.5, "z": 1 },
                    { "source": "cam2", "x": 0.5, "y": 0.0, "w": 0.5, "h": 0.5, "z": 1 },
                ]
            })
            .to_string(),
        )
        .unwrap();
        std::fs::write(
            scenes_dir.join("cam0_full.json"),
            json!({
                "id": "cam0_full",
                "width": 1920,
                "height": 1080,
                "slots": [ { "source": "cam0", "x": 0.0, "y": 0.0, "w": 1.0, "h": 1.0, "z": 1 } ]
            })
            .to_string(),
        )
        .unwrap();

        let toml = format!(
            r#"
            [[cameras]]
            id = "cam0"
            device = "/dev/video0"

            [[cameras]]
            id = "cam1"
            device = "/dev/video1"
            enabled = false

            [[cameras]]
            id = "cam2"
            device = "/dev/video2"

            [[cameras]]
            id = "cam3"
            device = "/dev/video3"
            enabled = false

            [recording]
            recordings-root = "{rec}"
            sessions-dir = "{sessions}"
            min-disk-space-mb = 0
            warning-disk-space-mb = 0

            [mixer]
            scenes-dir = "{scenes}"

            [mode-manager]
            state-file = "{mode_file}"
            "#,
            rec = root.join("recordings").display(),
            sessions = root.join("sessions").display(),
            scenes = scenes_dir.display(),
            mode_file = root.join("mode.json").display(),
        );
        let config: Config = toml::from_str(&toml).expect("test config parses");
        config.validate().expect("test config is valid");

        // Test mode swaps hardware elements, but these tests never start a
        // pipeline; they drive the control plane only.
        let state = AppState::build(config, Platform { test_mode: true });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(state)).await.unwrap();
        });

        TestServer { addr, client: reqwest::Client::new(), _dirs: dirs }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    async fn get(&self, path: &str) -> (u16, Value) {
        let resp = self.client.get(self.url(path)).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }

    async fn post(&self, path: &str, body: Option<Value>) -> (u16, Value) {
        let mut req = self.client.post(self.url(path));
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap_or(Value::Null))
    }
}

#[tokio::test]
async fn health_reports_version() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn config_endpoint_echoes_cameras() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/api/config").await;
    assert_eq!(status, 200);
    assert_eq!(body["cameras"].as_array().unwrap().len(), 4);
    assert_eq!(body["mixer"]["media-server-path"], "mixer_program");
}

#[tokio::test]
async fn ingest_status_lists_all_cameras_with_enabled_flags() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/api/ingest/status").await;
    assert_eq!(status, 200);

    let cameras = body["cameras"].as_array().unwrap();
    assert_eq!(cameras.len(), 4);
    for cam in cameras {
        let id = cam["id"].as_str().unwrap();
        let expected_enabled = id == "cam0" || id == "cam2";
        assert_eq!(cam["enabled"].as_bool().unwrap(), expected_enabled, "camera {id}");
        assert_eq!(cam["status"], "idle");
        assert_eq!(cam["streaming"], false);
    }
}

#[tokio::test]
async fn ingest_rejects_unknown_and_disabled_cameras() {
    let server = TestServer::start().await;

    let (status, body) = server.post("/api/ingest/ghost/start", None).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "unknown_id");

    let (status, body) = server.post("/api/ingest/cam1/start", None).await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn record_start_all_reports_per_camera_failures_when_ingest_is_down() {
    let server = TestServer::start().await;

    let (status, body) = server.post("/api/record/start-all", None).await;
    assert_eq!(status, 200);
    assert!(body["session_id"].is_null());
    let cameras = body["cameras"].as_object().unwrap();
    // Only enabled cameras appear in the report.
    assert_eq!(cameras.len(), 2);
    for (id, outcome) in cameras {
        assert_eq!(outcome["result"], "failed", "camera {id}");
        assert!(outcome["reason"].as_str().unwrap().contains("not streaming"));
    }

    // Nothing recording, so stopping twice stays a no-op.
    let (status, body) = server.post("/api/record/stop-all", None).await;
    assert_eq!(status, 200);
    assert!(body["session"].is_null());
    let (status, _) = server.post("/api/record/stop-all", None).await;
    assert_eq!(status, 200);

    let (_, sessions) = server.get("/api/record/sessions").await;
    assert_eq!(sessions.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn record_status_includes_disk_guard() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/api/record/status").await;
    assert_eq!(status, 200);
    assert!(body["active_session"].is_null());
    assert_eq!(body["disk"]["level"], "ok");
    assert!(body["disk"]["free_mb"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn scenes_are_served_from_the_store() {
    let server = TestServer::start().await;

    let (status, body) = server.get("/api/scenes").await;
    assert_eq!(status, 200);
    let ids: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["cam0_full", "quad"]);

    let (status, body) = server.get("/api/scenes/quad").await;
    assert_eq!(status, 200);
    assert_eq!(body["slots"].as_array().unwrap().len(), 2);

    let (status, body) = server.get("/api/scenes/nope").await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "unknown_id");
}

#[tokio::test]
async fn mixer_scene_change_names_missing_sources() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post("/api/mixer/scene", Some(json!({ "scene_id": "quad" })))
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"], "sources_unavailable");
    let missing = body["detail"]["missing"].as_array().unwrap();
    let missing: Vec<&str> = missing.iter().map(|m| m.as_str().unwrap()).collect();
    assert!(missing.contains(&"cam0"));
    assert!(missing.contains(&"cam2"));

    // The mixer stayed where it was.
    let (_, status_body) = server.get("/api/mixer/status").await;
    assert_eq!(status_body["state"], "null");
    assert!(status_body["preview"].is_null());
}

#[tokio::test]
async fn mixer_take_without_pipeline_is_an_invalid_request() {
    let server = TestServer::start().await;
    let (status, body) = server
        .post("/api/mixer/take", Some(json!({ "transition": "mix" })))
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn reveal_status_shows_both_fixed_outputs() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/api/reveal/status").await;
    assert_eq!(status, 200);

    let outputs = body["outputs"].as_array().unwrap();
    assert_eq!(outputs.len(), 2);
    assert_eq!(outputs[0]["id"], "slides");
    assert_eq!(outputs[0]["mediamtx_path"], "slides");
    assert_eq!(outputs[1]["id"], "slides_overlay");
    assert_eq!(outputs[1]["mediamtx_path"], "slides_overlay");
    assert!(outputs.iter().all(|o| o["status"] == "idle"));

    let (status, body) = server.post("/api/reveal/slides_extra/stop", None).await;
    assert_eq!(status, 404);
    assert_eq!(body["error"], "unknown_id");
}

#[tokio::test]
async fn overlay_crud_over_http() {
    let server = TestServer::start().await;

    let (status, created) = server
        .post(
            "/api/overlay/elements",
            Some(json!({
                "id": "lt_host",
                "variant": "lower_third",
                "title": "Jane Doe",
                "subtitle": "Host",
            })),
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(created["id"], "lt_host");
    assert_eq!(created["phase"], "entering");

    let (_, list) = server.get("/api/overlay/elements").await;
    assert_eq!(list.as_array().unwrap().len(), 1);

    let (status, hidden) = server.post("/api/overlay/elements/lt_host/hide", None).await;
    assert_eq!(status, 200);
    assert_eq!(hidden["phase"], "exiting");

    // Updating with a different variant is refused.
    let resp = server
        .client
        .put(server.url("/api/overlay/elements/lt_host"))
        .json(&json!({ "variant": "ticker", "text": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "invalid_request");

    let (status, _) = server.post("/api/overlay/clear", None).await;
    assert_eq!(status, 200);
    let (_, list) = server.get("/api/overlay/elements").await;
    assert_eq!(list.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn mode_round_trip_over_http() {
    let server = TestServer::start().await;

    let (status, body) = server.get("/api/mode").await;
    assert_eq!(status, 200);
    assert_eq!(body["mode"], "recorder");

    let (status, body) = server
        .post("/api/mode", Some(json!({ "mode": "vdo_publisher" })))
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["mode"], "vdo_publisher");
    let services = body["services"].as_array().unwrap();
    assert_eq!(services.len(), 2);
    assert!(services.iter().all(|s| s["active"] == true));

    let (_, body) = server.get("/api/mode/status").await;
    assert_eq!(body["mode"], "vdo_publisher");
    assert_eq!(body["transitioning"], false);

    let (status, body) = server
        .post("/api/mode", Some(json!({ "mode": "recorder" })))
        .await;
    assert_eq!(status, 200);
    assert!(body["services"].as_array().unwrap().iter().all(|s| s["active"] == false));
}

#[tokio::test]
async fn streams_endpoint_fails_loudly_without_a_media_server() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/api/streams").await;
    assert_eq!(status, 502);
    assert_eq!(body["error"], "media_server");
}

#[tokio::test]
async fn whep_proxy_surfaces_media_server_failures() {
    // No media server runs in this test; the proxy must fail loudly with a
    // structured body instead of hanging or panicking.
    let server = TestServer::start().await;
    let resp = server
        .client
        .post(server.url("/whep/cam0"))
        .header("content-type", "application/sdp")
        .body("v=0")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 502);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"], "media_server");
}
