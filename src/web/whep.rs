//! Same-origin WHEP proxy.
//!
//! Browsers negotiate WebRTC with the media server through these endpoints
//! so every URL stays on our origin; the bodies pass through verbatim and
//! only the session `Location` is rewritten under our `/whep` mount.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use super::{ApiError, AppState};

/// `POST /whep/{path}`: forward the SDP offer, answer with the SDP answer.
pub async fn offer(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: String,
) -> Response {
    match state.mediamtx.whep_offer(&path, body).await {
        Ok(answer) => {
            let mut builder = Response::builder()
                .status(StatusCode::from_u16(answer.status).unwrap_or(StatusCode::BAD_GATEWAY))
                .header(header::CONTENT_TYPE, "application/sdp");
            if let Some(location) = answer.location {
                builder = builder.header(header::LOCATION, rewrite_location(&path, &location));
            }
            builder
                .body(answer.sdp.into())
                .unwrap_or_else(|_| StatusCode::BAD_GATEWAY.into_response())
        }
        Err(e) => ApiError(e).into_response(),
    }
}

/// `PATCH /whep/{path}/{session}`: forward trickle-ICE candidates.
pub async fn ice_patch(
    State(state): State<AppState>,
    Path((path, session)): Path<(String, String)>,
    body: String,
) -> Response {
    let upstream = format!("/{path}/whep/{session}");
    match state.mediamtx.whep_patch(&upstream, body).await {
        Ok(status) => StatusCode::from_u16(status)
            .unwrap_or(StatusCode::BAD_GATEWAY)
            .into_response(),
        Err(e) => ApiError(e).into_response(),
    }
}

/// Map the media server's session location onto our mount.
///
/// The server issues `/{path}/whep/{session}`; the browser must PATCH the
/// same-origin `/whep/{path}/{session}` instead.
fn rewrite_location(path: &str, upstream_location: &str) -> String {
    let session = upstream_location.rsplit('/').next().unwrap_or(upstream_location);
    format!("/whep/{path}/{session}")
}
