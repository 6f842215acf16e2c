//! REST handlers: request parsing in, component call, snapshot out.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::graphics::{RevealReport, RevealSnapshot};
use crate::ingest::{CameraSnapshot, IngestStatus};
use crate::mixer::overlay::{CreateElement, ElementSnapshot, OverlayKind};
use crate::mixer::scene::Scene;
use crate::mixer::{MixerStatus, TransitionKind};
use crate::mode::{ModeStatus, SystemMode};
use crate::recording::{
    CameraRecordSnapshot, RecordingStatus, SessionMeta, StartAllReport, TriggerState,
};

use super::{ApiResult, AppState};

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", version: env!("CARGO_PKG_VERSION") })
}

pub async fn config(State(state): State<AppState>) -> Json<Config> {
    Json((*state.config).clone())
}

/// Paths the media server currently serves, straight off its admin API.
pub async fn streams(State(state): State<AppState>) -> ApiResult<Vec<crate::media::mediamtx::PathInfo>> {
    Ok(Json(state.mediamtx.list_paths().await?))
}

// ---- ingest ----------------------------------------------------------------

pub async fn ingest_status(State(state): State<AppState>) -> Json<IngestStatus> {
    Json(state.ingest.status())
}

pub async fn ingest_start_all(State(state): State<AppState>) -> Json<IngestStatus> {
    state.ingest.start_all().await;
    Json(state.ingest.status())
}

pub async fn ingest_stop_all(State(state): State<AppState>) -> Json<IngestStatus> {
    state.ingest.stop_all().await;
    Json(state.ingest.status())
}

pub async fn ingest_start(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> ApiResult<CameraSnapshot> {
    Ok(Json(state.ingest.start(&camera).await?))
}

pub async fn ingest_stop(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> ApiResult<CameraSnapshot> {
    Ok(Json(state.ingest.stop(&camera).await?))
}

// ---- recording -------------------------------------------------------------

pub async fn record_status(State(state): State<AppState>) -> Json<RecordingStatus> {
    Json(state.recording.status())
}

pub async fn record_start_all(State(state): State<AppState>) -> ApiResult<StartAllReport> {
    Ok(Json(state.recording.start_all().await?))
}

#[derive(Serialize)]
pub struct StopAllResponse {
    pub session: Option<SessionMeta>,
}

pub async fn record_stop_all(State(state): State<AppState>) -> ApiResult<StopAllResponse> {
    Ok(Json(StopAllResponse { session: state.recording.stop_all().await? }))
}

pub async fn record_start(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> ApiResult<CameraRecordSnapshot> {
    Ok(Json(state.recording.start(&camera).await?))
}

pub async fn record_stop(
    State(state): State<AppState>,
    Path(camera): Path<String>,
) -> ApiResult<CameraRecordSnapshot> {
    Ok(Json(state.recording.stop(&camera).await?))
}

#[derive(Serialize)]
pub struct CurrentSessionResponse {
    pub session: Option<SessionMeta>,
}

pub async fn record_current_session(State(state): State<AppState>) -> Json<CurrentSessionResponse> {
    Json(CurrentSessionResponse { session: state.recording.current_session() })
}

pub async fn record_sessions(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.recording.sessions())
}

pub async fn record_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<SessionMeta> {
    Ok(Json(state.recording.session_meta(&id)?))
}

pub async fn record_triggers(State(state): State<AppState>) -> Json<Vec<TriggerState>> {
    Json(state.recording.trigger_status())
}

// ---- mixer -----------------------------------------------------------------

pub async fn mixer_status(State(state): State<AppState>) -> Json<MixerStatus> {
    Json(state.mixer.status())
}

pub async fn mixer_start(State(state): State<AppState>) -> ApiResult<MixerStatus> {
    Ok(Json(state.mixer.start().await?))
}

pub async fn mixer_stop(State(state): State<AppState>) -> ApiResult<MixerStatus> {
    Ok(Json(state.mixer.stop().await?))
}

#[derive(Deserialize)]
pub struct SetSceneBody {
    pub scene_id: String,
}

pub async fn mixer_set_scene(
    State(state): State<AppState>,
    Json(body): Json<SetSceneBody>,
) -> ApiResult<MixerStatus> {
    Ok(Json(state.mixer.set_scene(&body.scene_id).await?))
}

#[derive(Deserialize)]
pub struct TakeBody {
    #[serde(default)]
    pub transition: TransitionKind,
}

pub async fn mixer_take(
    State(state): State<AppState>,
    Json(body): Json<TakeBody>,
) -> ApiResult<MixerStatus> {
    Ok(Json(state.mixer.take(body.transition).await?))
}

// ---- scenes ----------------------------------------------------------------

pub async fn scenes_list(State(state): State<AppState>) -> Json<Vec<Scene>> {
    Json(state.scenes.list().iter().map(|s| (**s).clone()).collect())
}

pub async fn scene_get(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Scene> {
    Ok(Json((*state.scenes.get(&id)?).clone()))
}

// ---- reveal ----------------------------------------------------------------

pub async fn reveal_status(State(state): State<AppState>) -> Json<RevealReport> {
    Json(state.reveal.status())
}

#[derive(Deserialize)]
pub struct RevealStartBody {
    pub presentation_id: String,
    pub url: String,
}

pub async fn reveal_start(
    State(state): State<AppState>,
    Path(output): Path<String>,
    Json(body): Json<RevealStartBody>,
) -> ApiResult<RevealSnapshot> {
    Ok(Json(state.reveal.start(&output, &body.presentation_id, &body.url).await?))
}

pub async fn reveal_stop(
    State(state): State<AppState>,
    Path(output): Path<String>,
) -> ApiResult<RevealSnapshot> {
    Ok(Json(state.reveal.stop(&output).await?))
}

// ---- overlay ---------------------------------------------------------------

pub async fn overlay_list(State(state): State<AppState>) -> Json<Vec<ElementSnapshot>> {
    Json(state.overlays.list())
}

pub async fn overlay_create(
    State(state): State<AppState>,
    Json(body): Json<CreateElement>,
) -> ApiResult<ElementSnapshot> {
    Ok(Json(state.overlays.create(body)?))
}

pub async fn overlay_get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ElementSnapshot> {
    Ok(Json(state.overlays.get(&id)?))
}

pub async fn overlay_update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(kind): Json<OverlayKind>,
) -> ApiResult<ElementSnapshot> {
    Ok(Json(state.overlays.update(&id, kind)?))
}

pub async fn overlay_delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<serde_json::Value> {
    state.overlays.delete(&id)?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub async fn overlay_show(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ElementSnapshot> {
    Ok(Json(state.overlays.show(&id)?))
}

pub async fn overlay_hide(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<ElementSnapshot> {
    Ok(Json(state.overlays.hide(&id)?))
}

pub async fn overlay_clear(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.overlays.clear();
    Json(serde_json::json!({ "cleared": true }))
}

// ---- mode ------------------------------------------------------------------

#[derive(Serialize)]
pub struct ModeResponse {
    pub mode: SystemMode,
}

pub async fn mode_get(State(state): State<AppState>) -> Json<ModeResponse> {
    Json(ModeResponse { mode: state.mode.get_mode() })
}

#[derive(Deserialize)]
pub struct ModeBody {
    pub mode: SystemMode,
}

pub async fn mode_set(
    State(state): State<AppState>,
    Json(body): Json<ModeBody>,
) -> ApiResult<ModeStatus> {
    Ok(Json(state.mode.set_mode(body.mode).await?))
}

pub async fn mode_status(State(state): State<AppState>) -> Json<ModeStatus> {
    Json(state.mode.status().await)
}
