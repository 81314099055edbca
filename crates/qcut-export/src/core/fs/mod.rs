//! Filesystem utilities.
//!
//! Path validation for anything derived from caller-supplied identifiers, plus
//! helpers for the partial-output contract: encoders write to a sibling
//! `*.partial.<ext>` file which is renamed only once the encode succeeded.

use std::path::{Path, PathBuf};

use tracing::warn;

use crate::core::{CoreResult, ExportError};

// =============================================================================
// Path Validation Utilities
// =============================================================================

/// Validates that an identifier component is safe to use in file paths.
///
/// Rejects empty strings, traversal sequences (`..`), path separators, drive
/// letter indicators and control characters. Session ids and frame names pass
/// through here before they are joined onto the session directory.
pub fn validate_path_id_component(id: &str, label: &str) -> Result<(), String> {
    let trimmed = id.trim();
    if trimmed.is_empty() {
        return Err(format!("{label} is empty or contains only whitespace"));
    }
    if trimmed != id {
        return Err(format!("Invalid {label}: leading or trailing whitespace"));
    }
    if trimmed.contains("..")
        || trimmed.contains('/')
        || trimmed.contains('\\')
        || trimmed.contains(':')
    {
        return Err(format!("Invalid {label}: contains path traversal characters"));
    }
    if trimmed.chars().any(|c| c.is_control()) {
        return Err(format!("Invalid {label}: contains control characters"));
    }
    Ok(())
}

/// Reduces an arbitrary original filename to a safe single path component.
///
/// Only the final component is kept; anything outside `[A-Za-z0-9._-]` becomes
/// `_`. Never returns an empty string or a dot-only name.
pub fn sanitize_file_component(name: &str) -> String {
    let last = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim();

    let sanitized: String = last
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.chars().all(|c| c == '.' || c == '_') {
        return "media".to_string();
    }
    sanitized
}

// =============================================================================
// Output Helpers
// =============================================================================

/// Sibling path the encoder writes to before the final rename:
/// `out/video.mp4` → `out/video.partial.mp4`.
pub fn partial_output_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    let file_name = match output.extension() {
        Some(ext) => format!("{stem}.partial.{}", ext.to_string_lossy()),
        None => format!("{stem}.partial"),
    };
    output.with_file_name(file_name)
}

/// Removes a file, treating "not found" as success.
pub async fn remove_file_if_exists(path: &Path) -> CoreResult<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(ExportError::IoError(e)),
    }
}

/// Best-effort removal used on failure paths; errors are only logged.
pub async fn discard_file(path: &Path) {
    if let Err(e) = remove_file_if_exists(path).await {
        warn!(path = %path.display(), error = %e, "Failed to remove partial output");
    }
}

/// Moves a finished partial file into place and verifies it is non-empty.
///
/// Returns the final file size. On any failure both paths are removed so no
/// truncated output survives.
pub async fn promote_partial_output(partial: &Path, output: &Path) -> CoreResult<u64> {
    let size = match tokio::fs::metadata(partial).await {
        Ok(meta) => meta.len(),
        Err(e) => {
            discard_file(partial).await;
            return Err(ExportError::EncoderProcessFailure {
                exit_code: Some(0),
                stderr_tail: format!("Encoder reported success but produced no output: {e}"),
            });
        }
    };

    if size == 0 {
        discard_file(partial).await;
        return Err(ExportError::EncoderProcessFailure {
            exit_code: Some(0),
            stderr_tail: "Encoder produced an empty output file".to_string(),
        });
    }

    if cfg!(windows) {
        remove_file_if_exists(output).await?;
    }
    if let Err(e) = tokio::fs::rename(partial, output).await {
        discard_file(partial).await;
        return Err(ExportError::IoError(e));
    }

    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(meta.len()),
        _ => {
            discard_file(output).await;
            Err(ExportError::EncoderProcessFailure {
                exit_code: Some(0),
                stderr_tail: "Output file missing after rename".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_path_id_component_rejects_traversal() {
        assert!(validate_path_id_component("01HX", "sessionId").is_ok());
        assert!(validate_path_id_component("", "sessionId").is_err());
        assert!(validate_path_id_component("../etc", "sessionId").is_err());
        assert!(validate_path_id_component("a/b", "sessionId").is_err());
        assert!(validate_path_id_component("C:x", "sessionId").is_err());
        assert!(validate_path_id_component("a\u{0}b", "sessionId").is_err());
        assert!(validate_path_id_component(" a", "sessionId").is_err());
    }

    #[test]
    fn test_sanitize_file_component() {
        assert_eq!(sanitize_file_component("My Clip (1).mp4"), "My_Clip__1_.mp4");
        assert_eq!(sanitize_file_component("../../secret.png"), "secret.png");
        assert_eq!(sanitize_file_component(r"C:\Users\me\a.webm"), "a.webm");
        assert_eq!(sanitize_file_component(".."), "media");
        assert_eq!(sanitize_file_component(""), "media");
    }

    #[test]
    fn test_partial_output_path() {
        assert_eq!(
            partial_output_path(Path::new("/out/video.mp4")),
            PathBuf::from("/out/video.partial.mp4")
        );
        assert_eq!(
            partial_output_path(Path::new("/out/video")),
            PathBuf::from("/out/video.partial")
        );
    }

    #[tokio::test]
    async fn test_promote_partial_output_renames_non_empty_file() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("final.mp4");
        let partial = partial_output_path(&output);
        tokio::fs::write(&partial, b"data").await.unwrap();

        let size = promote_partial_output(&partial, &output).await.unwrap();
        assert_eq!(size, 4);
        assert!(output.exists());
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn test_promote_partial_output_rejects_empty_file() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("final.mp4");
        let partial = partial_output_path(&output);
        tokio::fs::write(&partial, b"").await.unwrap();

        let err = promote_partial_output(&partial, &output).await.unwrap_err();
        assert!(matches!(err, ExportError::EncoderProcessFailure { .. }));
        assert!(!output.exists());
        assert!(!partial.exists());
    }

    #[tokio::test]
    async fn test_remove_file_if_exists_ignores_missing() {
        let dir = TempDir::new().unwrap();
        assert!(remove_file_if_exists(&dir.path().join("missing")).await.is_ok());
    }
}
