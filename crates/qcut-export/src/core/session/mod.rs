//! Export Session Management
//!
//! Every export owns one temp directory `<tempRoot>/qcut-export/<sessionId>`.
//! Materialized blobs, normalized segments, concat lists and frames all live
//! there. The directory is removed when the session is cleaned up or dropped.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::core::fs::validate_path_id_component;
use crate::core::{Canvas, CoreResult, ExportError, Platform, QualityPreset, SessionId};

/// Directory under the temp root that holds all sessions
pub const SESSIONS_DIR: &str = "qcut-export";

/// Subdirectory for raw and filtered frames
pub const FRAMES_DIR: &str = "frames";

/// Session-scoped temp directory, exclusively owned by one export
#[derive(Debug)]
pub struct ExportSession {
    session_id: SessionId,
    temp_dir: PathBuf,
    cleaned: bool,
}

impl ExportSession {
    /// Allocates a session directory. A fresh ULID is used when no id is given.
    ///
    /// Fails with `SessionInUse` when a directory for the id already exists.
    pub async fn create(temp_root: &Path, session_id: Option<&str>) -> CoreResult<Self> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => ulid::Ulid::new().to_string(),
        };
        validate_path_id_component(&session_id, "sessionId").map_err(ExportError::InvalidOptions)?;

        let sessions_root = temp_root.join(SESSIONS_DIR);
        tokio::fs::create_dir_all(&sessions_root).await?;

        let temp_dir = sessions_root.join(&session_id);
        match tokio::fs::create_dir(&temp_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                warn!(session_id = %session_id, "Rejected duplicate export session");
                return Err(ExportError::SessionInUse(session_id));
            }
            Err(e) => return Err(e.into()),
        }

        info!(session_id = %session_id, dir = %temp_dir.display(), "Export session created");
        Ok(Self {
            session_id,
            temp_dir,
            cleaned: false,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.temp_dir.join(FRAMES_DIR)
    }

    /// Path of a file directly inside the session directory.
    pub fn file_path(&self, name: &str) -> CoreResult<PathBuf> {
        validate_path_id_component(name, "fileName").map_err(ExportError::InvalidOptions)?;
        Ok(self.temp_dir.join(name))
    }

    /// Removes the session directory.
    pub async fn cleanup(mut self) -> CoreResult<()> {
        self.cleaned = true;
        match tokio::fs::remove_dir_all(&self.temp_dir).await {
            Ok(()) => {
                debug!(session_id = %self.session_id, "Export session cleaned up");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for ExportSession {
    fn drop(&mut self) {
        if self.cleaned {
            return;
        }
        if let Err(e) = std::fs::remove_dir_all(&self.temp_dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    session_id = %self.session_id,
                    error = %e,
                    "Failed to remove export session directory"
                );
            }
        }
    }
}

/// Immutable per-export parameters shared by the resolver, graph builder and
/// orchestrator.
#[derive(Clone, Debug)]
pub struct ExportContext {
    pub session_id: SessionId,
    pub temp_dir: PathBuf,
    pub canvas: Canvas,
    pub fps: f64,
    /// Clamped export duration (seconds)
    pub duration: f64,
    pub platform: Platform,
    pub quality: QualityPreset,
}

impl ExportContext {
    pub fn new(
        session: &ExportSession,
        canvas: Canvas,
        fps: f64,
        duration: f64,
        platform: Platform,
        quality: QualityPreset,
    ) -> Self {
        Self {
            session_id: session.session_id().to_string(),
            temp_dir: session.temp_dir().to_path_buf(),
            canvas,
            fps,
            duration,
            platform,
            quality,
        }
    }

    pub fn frames_dir(&self) -> PathBuf {
        self.temp_dir.join(FRAMES_DIR)
    }

    /// Number of frames covering the export duration.
    pub fn total_frames(&self) -> u64 {
        (self.duration * self.fps).ceil().max(1.0) as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_create_and_cleanup() {
        let root = TempDir::new().unwrap();
        let session = ExportSession::create(root.path(), Some("s1")).await.unwrap();
        let dir = session.temp_dir().to_path_buf();
        assert!(dir.is_dir());
        assert_eq!(dir, root.path().join(SESSIONS_DIR).join("s1"));

        session.cleanup().await.unwrap();
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_duplicate_session_id_is_rejected() {
        let root = TempDir::new().unwrap();
        let _first = ExportSession::create(root.path(), Some("dup")).await.unwrap();
        let second = ExportSession::create(root.path(), Some("dup")).await;
        assert!(matches!(second, Err(ExportError::SessionInUse(id)) if id == "dup"));
    }

    #[tokio::test]
    async fn test_drop_removes_directory() {
        let root = TempDir::new().unwrap();
        let dir = {
            let session = ExportSession::create(root.path(), None).await.unwrap();
            tokio::fs::write(session.temp_dir().join("x.bin"), b"1")
                .await
                .unwrap();
            session.temp_dir().to_path_buf()
        };
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn test_invalid_session_ids_are_rejected() {
        let root = TempDir::new().unwrap();
        let result = ExportSession::create(root.path(), Some("../escape")).await;
        assert!(matches!(result, Err(ExportError::InvalidOptions(_))));
    }

    #[tokio::test]
    async fn test_file_path_validates_names() {
        let root = TempDir::new().unwrap();
        let session = ExportSession::create(root.path(), Some("s2")).await.unwrap();
        assert!(session.file_path("list.txt").is_ok());
        assert!(session.file_path("../list.txt").is_err());
    }
}
