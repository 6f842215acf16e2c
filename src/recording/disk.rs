//! Free-space probing for the recording disk guard.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use crate::config::RecordingConfig;

/// Free bytes available to unprivileged writers on the filesystem holding
/// `path`.
pub fn free_space(path: &Path) -> io::Result<u64> {
    let c_path = CString::new(path.as_os_str().as_bytes())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let mut stat: libc::statvfs = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::statvfs(c_path.as_ptr(), &mut stat) };
    if rc != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(stat.f_bavail as u64 * stat.f_frsize as u64)
}

/// Disk guard verdict for a given amount of free space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiskLevel {
    Ok,
    Warning,
    Critical,
}

pub fn classify(free_bytes: u64, cfg: &RecordingConfig) -> DiskLevel {
    if free_bytes < cfg.min_disk_bytes() {
        DiskLevel::Critical
    } else if free_bytes < cfg.warning_disk_bytes() {
        DiskLevel::Warning
    } else {
        DiskLevel::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn cfg() -> RecordingConfig {
        toml::from_str(
            r#"
            recordings-root = "/tmp/rec"
            sessions-dir = "/tmp/sessions"
            min-disk-space-mb = 500
            warning-disk-space-mb = 2000
            "#,
        )
        .unwrap()
    }

    #[test]
    fn classification_boundaries() {
        let cfg = cfg();
        let mib = 1024 * 1024;
        // Just above the hard minimum still records.
        assert_eq!(classify(500 * mib, &cfg), DiskLevel::Warning);
        assert_eq!(classify(500 * mib - 1, &cfg), DiskLevel::Critical);
        assert_eq!(classify(2000 * mib, &cfg), DiskLevel::Ok);
        assert_eq!(classify(2000 * mib - 1, &cfg), DiskLevel::Warning);
    }

    #[test]
    fn free_space_on_tmp_is_nonzero() {
        let free = free_space(&PathBuf::from("/tmp")).unwrap();
        assert!(free > 0);
    }

    #[test]
    fn free_space_on_missing_path_errors() {
        assert!(free_space(&PathBuf::from("/definitely/not/here")).is_err());
    }
}
