//! Thin client over the local media server (MediaMTX).
//!
//! Four surfaces: RTSP publish/read URL construction, the admin HTTP API
//! and WHEP forwarding for the browser-facing proxy. The server itself is a
//! black box; nothing here assumes more than its HTTP contract.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::MediamtxConfig;
use crate::error::{Error, Result};

/// Bound on any admin/WHEP call.
const HTTP_TIMEOUT: Duration = Duration::from_secs(3);

pub struct Mediamtx {
    cfg: MediamtxConfig,
    client: reqwest::Client,
}

/// Subset of the admin API's path description we care about.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathInfo {
    pub name: String,
    #[serde(default)]
    pub ready: bool,
}

#[derive(Debug, Deserialize)]
struct PathList {
    #[serde(default)]
    items: Vec<PathInfo>,
}

/// Response of a forwarded WHEP offer.
#[derive(Debug)]
pub struct WhepAnswer {
    pub status: u16,
    pub sdp: String,
    /// Session resource issued by the media server, needed for ICE PATCH.
    pub location: Option<String>,
}

impl Mediamtx {
    pub fn new(cfg: MediamtxConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");
        Mediamtx { cfg, client }
    }

    /// RTSP URL a pipeline publishes to. Loopback IPv4 only.
    pub fn publish_url(&self, path: &str) -> String {
        self.cfg.rtsp_url(path)
    }

    /// Whether the WebRTC distribution stage accepts this codec.
    pub fn supports_codec(&self, codec: crate::config::Codec) -> bool {
        self.cfg.webrtc_codecs.contains(&codec)
    }

    /// RTSP URL a pipeline subscribes from.
    pub fn subscribe_url(&self, path: &str) -> String {
        self.cfg.rtsp_url(path)
    }

    /// List the paths the media server currently knows about.
    pub async fn list_paths(&self) -> Result<Vec<PathInfo>> {
        let url = self.cfg.api_url("/v3/paths/list");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::MediaServer(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(Error::MediaServer(format!("{url} returned {}", resp.status())));
        }
        let list: PathList = resp.json().await.map_err(|e| Error::MediaServer(e.to_string()))?;
        Ok(list.items)
    }

    /// Whether a published path exists and is ready for readers.
    pub async fn path_ready(&self, path: &str) -> Result<bool> {
        let url = self.cfg.api_url(&format!("/v3/paths/get/{path}"));
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::MediaServer(e.to_string()))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !resp.status().is_success() {
            return Err(Error::MediaServer(format!("{url} returned {}", resp.status())));
        }
        let info: PathInfo = resp.json().await.map_err(|e| Error::MediaServer(e.to_string()))?;
        Ok(info.ready)
    }

    /// Forward a WHEP SDP offer, returning the answer and session location.
    pub async fn whep_offer(&self, path: &str, offer_sdp: String) -> Result<WhepAnswer> {
        let url = self.cfg.whep_url(path);
        let resp = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/sdp")
            .body(offer_sdp)
            .send()
            .await
            .map_err(|e| Error::MediaServer(e.to_string()))?;

        let status = resp.status().as_u16();
        let location = resp
            .headers()
            .get(reqwest::header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);
        let sdp = resp.text().await.map_err(|e| Error::MediaServer(e.to_string()))?;

        Ok(WhepAnswer { status, sdp, location })
    }

    /// Forward a WHEP ICE PATCH to the session resource the server issued.
    pub async fn whep_patch(&self, session_path: &str, body: String) -> Result<u16> {
        let url = format!(
            "http://{}:{}{}",
            self.cfg.host, self.cfg.whep_port, session_path
        );
        let resp = self
            .client
            .patch(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/trickle-ice-sdpfrag")
            .body(body)
            .send()
            .await
            .map_err(|e| Error::MediaServer(e.to_string()))?;
        Ok(resp.status().as_u16())
    }
}
