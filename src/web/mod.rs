//! HTTP/WebSocket control plane.
//!
//! Thin translation between HTTP and the long-lived components. All state
//! lives in the components; handlers copy snapshots out and map the crate
//! error kinds onto structured response bodies.

mod handlers;
mod whep;
mod ws;

use std::path::Path;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::config::Config;
use crate::error::Error;
use crate::graphics::RevealManager;
use crate::ingest::IngestManager;
use crate::media::mediamtx::Mediamtx;
use crate::media::probe::V4lProber;
use crate::mixer::{MixerCore, OverlayManager, SceneStore};
use crate::mode::ModeManager;
use crate::recording::RecordingSubscriber;
use crate::Platform;

/// Long-lived components shared with every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub ingest: Arc<IngestManager>,
    pub recording: Arc<RecordingSubscriber>,
    pub mixer: Arc<MixerCore>,
    pub scenes: Arc<SceneStore>,
    pub reveal: Arc<RevealManager>,
    pub overlays: Arc<OverlayManager>,
    pub mode: Arc<ModeManager>,
    pub mediamtx: Arc<Mediamtx>,
}

impl AppState {
    /// Construct every component once; nothing is started yet.
    pub fn build(config: Config, platform: Platform) -> AppState {
        let config = Arc::new(config);
        let mediamtx = Arc::new(Mediamtx::new(config.mediamtx.clone()));
        let scenes = Arc::new(SceneStore::load(&config.mixer.scenes_dir));
        let overlays = Arc::new(OverlayManager::new());

        let ingest = IngestManager::new(
            config.cameras.clone(),
            config.ingest.clone(),
            platform,
            Arc::clone(&mediamtx),
            Arc::new(V4lProber),
        );
        let recording = RecordingSubscriber::new(
            config.cameras.clone(),
            config.recording.clone(),
            config.external_cameras.clone(),
            Arc::clone(&ingest),
            Arc::clone(&mediamtx),
        );
        let reveal = RevealManager::new(config.reveal.clone(), platform, Arc::clone(&mediamtx));
        let mixer = MixerCore::new(
            config.mixer.clone(),
            platform,
            &config.cameras,
            Arc::clone(&scenes),
            Arc::clone(&ingest),
            Arc::clone(&reveal),
            Arc::clone(&overlays),
            Arc::clone(&mediamtx),
        );
        let mode = ModeManager::new(
            config.mode_manager.clone(),
            platform,
            config.enabled_cameras().map(|c| c.id.clone()).collect(),
            Arc::clone(&ingest),
            Arc::clone(&recording),
        );

        let state = AppState {
            config,
            ingest,
            recording,
            mixer,
            scenes,
            reveal,
            overlays,
            mode,
            mediamtx,
        };
        state.startup_selftest(platform);
        state
    }

    /// Non-fatal configuration cross-checks, logged at startup.
    fn startup_selftest(&self, platform: Platform) {
        for scene in self.scenes.list() {
            for source in scene.sources() {
                let known = self.config.camera(source).is_some()
                    || crate::graphics::OUTPUT_IDS.contains(&source);
                if !known {
                    warn!(scene = %scene.id, source, "Scene references an unknown source");
                }
            }
        }
        if self.scenes.is_empty() && self.config.mixer.enabled {
            warn!(dir = %self.config.mixer.scenes_dir.display(), "Mixer enabled but no scenes loaded");
        }
        if !platform.test_mode {
            for cam in self.config.enabled_cameras() {
                if !Path::new(&cam.device).exists() {
                    warn!(camera = %cam.id, device = %cam.device, "Capture device not present");
                }
            }
        }
    }

    /// Spawn the background supervisors; they exit on the shutdown signal.
    pub fn spawn_supervisors(&self, shutdown: watch::Receiver<bool>) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            tokio::spawn(Arc::clone(&self.ingest).run_supervisor(shutdown.clone())),
            tokio::spawn(Arc::clone(&self.recording).run_supervisor(shutdown.clone())),
            tokio::spawn(Arc::clone(&self.mixer).run_supervisor(shutdown.clone())),
            tokio::spawn(Arc::clone(&self.reveal).run_supervisor(shutdown)),
        ]
    }
}

/// Error wrapper mapping crate kinds to structured responses.
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::UnknownId { .. } => StatusCode::NOT_FOUND,
            Error::InvalidRequest(_) | Error::ConfigInvalid(_) => StatusCode::BAD_REQUEST,
            Error::SourcesUnavailable { .. } | Error::ResourceContention(_) => StatusCode::CONFLICT,
            Error::DiskExhausted { .. } => StatusCode::INSUFFICIENT_STORAGE,
            Error::Timeout(..) => StatusCode::GATEWAY_TIMEOUT,
            Error::MediaServer(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let detail = match &self.0 {
            Error::SourcesUnavailable { missing } => {
                Some(serde_json::json!({ "missing": missing }))
            }
            _ => None,
        };
        let body = serde_json::json!({
            "error": self.0.kind(),
            "message": self.0.to_string(),
            "detail": detail,
        });
        (status, Json(body)).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Assemble the full router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/config", get(handlers::config))
        .route("/streams", get(handlers::streams))
        .route("/ingest/status", get(handlers::ingest_status))
        .route("/ingest/start-all", post(handlers::ingest_start_all))
        .route("/ingest/stop-all", post(handlers::ingest_stop_all))
        .route("/ingest/:camera/start", post(handlers::ingest_start))
        .route("/ingest/:camera/stop", post(handlers::ingest_stop))
        .route("/record/status", get(handlers::record_status))
        .route("/record/start-all", post(handlers::record_start_all))
        .route("/record/stop-all", post(handlers::record_stop_all))
        .route("/record/:camera/start", post(handlers::record_start))
        .route("/record/:camera/stop", post(handlers::record_stop))
        .route("/record/session", get(handlers::record_current_session))
        .route("/record/sessions", get(handlers::record_sessions))
        .route("/record/sessions/:id", get(handlers::record_session))
        .route("/record/triggers", get(handlers::record_triggers))
        .route("/mixer/status", get(handlers::mixer_status))
        .route("/mixer/start", post(handlers::mixer_start))
        .route("/mixer/stop", post(handlers::mixer_stop))
        .route("/mixer/scene", post(handlers::mixer_set_scene))
        .route("/mixer/take", post(handlers::mixer_take))
        .route("/scenes", get(handlers::scenes_list))
        .route("/scenes/:id", get(handlers::scene_get))
        .route("/reveal/status", get(handlers::reveal_status))
        .route("/reveal/:output/start", post(handlers::reveal_start))
        .route("/reveal/:output/stop", post(handlers::reveal_stop))
        .route("/overlay/elements", get(handlers::overlay_list).post(handlers::overlay_create))
        .route(
            "/overlay/elements/:id",
            get(handlers::overlay_get)
                .put(handlers::overlay_update)
                .delete(handlers::overlay_delete),
        )
        .route("/overlay/elements/:id/show", post(handlers::overlay_show))
        .route("/overlay/elements/:id/hide", post(handlers::overlay_hide))
        .route("/overlay/clear", post(handlers::overlay_clear))
        .route("/mode", get(handlers::mode_get).post(handlers::mode_set))
        .route("/mode/status", get(handlers::mode_status));

    let static_dir = state.config.server.static_dir.clone();

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .route("/whep/:path", post(whep::offer))
        .route("/whep/:path/:session", patch(whep::ice_patch))
        .route("/ws/overlay", get(ws::overlay_socket))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
