//! Session metadata documents.
//!
//! One record-all span is a session; its JSON lands in the sessions
//! directory when the session stops and is the durable record of what was
//! captured where.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Outcome of one camera within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    Recording,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraRecordMeta {
    pub file: PathBuf,
    pub status: RecordOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMeta {
    pub session_id: String,
    pub start_iso: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_iso: Option<String>,
    /// Set when the disk guard forced an early stop.
    #[serde(default)]
    pub degraded: bool,
    pub cameras: BTreeMap<String, CameraRecordMeta>,
}

impl SessionMeta {
    pub fn new(started_at: DateTime<Local>) -> Self {
        SessionMeta {
            session_id: session_id_at(started_at),
            start_iso: started_at.to_rfc3339(),
            end_iso: None,
            degraded: false,
            cameras: BTreeMap::new(),
        }
    }

    /// Per-camera output path: `{root}/{camera}/recording_{session}.{ext}`.
    pub fn output_path(&self, recordings_root: &Path, camera_id: &str, ext: &str) -> PathBuf {
        recordings_root
            .join(camera_id)
            .join(format!("recording_{}.{ext}", self.session_id))
    }

    pub fn document_path(&self, sessions_dir: &Path) -> PathBuf {
        sessions_dir.join(format!("{}.json", self.session_id))
    }

    pub fn save(&self, sessions_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(sessions_dir)?;
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::InvalidRequest(format!("session serialization failed: {e}")))?;
        std::fs::write(self.document_path(sessions_dir), json)?;
        Ok(())
    }

    pub fn load(sessions_dir: &Path, session_id: &str) -> Result<Self> {
        let path = sessions_dir.join(format!("{session_id}.json"));
        let content = std::fs::read_to_string(&path).map_err(|_| Error::UnknownId {
            kind: "session",
            id: session_id.to_string(),
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::InvalidRequest(format!("corrupt session document: {e}")))
    }

    /// Session ids present in the sessions directory, newest first.
    pub fn list(sessions_dir: &Path) -> Vec<String> {
        let mut ids: Vec<String> = std::fs::read_dir(sessions_dir)
            .map(|entries| {
                entries
                    .flatten()
                    .filter_map(|e| {
                        let name = e.file_name().to_string_lossy().into_owned();
                        name.strip_suffix(".json")
                            .filter(|stem| stem.starts_with("session_"))
                            .map(str::to_owned)
                    })
                    .collect()
            })
            .unwrap_or_default();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids
    }
}

/// Session id derived from wall time: `session_YYYYMMDD_HHMMSS`.
pub fn session_id_at(t: DateTime<Local>) -> String {
    format!("session_{}", t.format("%Y%m%d_%H%M%S"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 12, 18, 11, 44, 50).unwrap()
    }

    #[test]
    fn session_id_encodes_wall_time() {
        assert_eq!(session_id_at(fixed_time()), "session_20251218_114450");
    }

    #[test]
    fn output_path_encodes_session_and_camera() {
        let meta = SessionMeta::new(fixed_time());
        let path = meta.output_path(Path::new("/recordings"), "cam0", "mp4");
        assert_eq!(
            path,
            PathBuf::from("/recordings/cam0/recording_session_20251218_114450.mp4")
        );
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut meta = SessionMeta::new(fixed_time());
        meta.cameras.insert(
            "cam0".into(),
            CameraRecordMeta {
                file: PathBuf::from("/recordings/cam0/recording_session_20251218_114450.mp4"),
                status: RecordOutcome::Completed,
                error: None,
            },
        );
        meta.end_iso = Some(fixed_time().to_rfc3339());
        meta.save(dir.path()).unwrap();

        let doc = dir.path().join("session_20251218_114450.json");
        assert!(doc.exists());

        let loaded = SessionMeta::load(dir.path(), &meta.session_id).unwrap();
        assert_eq!(loaded.session_id, meta.session_id);
        assert_eq!(loaded.cameras.len(), 1);
        assert_eq!(loaded.cameras["cam0"].status, RecordOutcome::Completed);
        assert!(loaded
            .cameras["cam0"]
            .file
            .to_string_lossy()
            .ends_with("recording_session_20251218_114450.mp4"));
    }

    #[test]
    fn list_returns_newest_first_and_skips_foreign_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("session_20250101_000000.json"), "{}").unwrap();
        std::fs::write(dir.path().join("session_20251218_114450.json"), "{}").unwrap();
        std::fs::write(dir.path().join(".DS_Store"), "").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let ids = SessionMeta::list(dir.path());
        assert_eq!(
            ids,
            vec!["session_20251218_114450".to_string(), "session_20250101_000000".to_string()]
        );
    }

    #[test]
    fn unknown_session_is_a_structured_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = SessionMeta::load(dir.path(), "session_19700101_000000").unwrap_err();
        assert!(matches!(err, Error::UnknownId { kind: "session", .. }));
    }
}
