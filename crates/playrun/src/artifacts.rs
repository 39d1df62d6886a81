//! Artifact layout under the output directory.
//!
//! ```text
//! <output_dir>/
//!   <case-name>/
//!     screenshot-attempt-1.png
//!     video-attempt-1.webm
//! ```
//!
//! Names that are not already safe path components get a short digest of
//! the raw name appended, so `login a` and `login-a` never share a directory.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::warn;

use crate::error::E2eResult;

#[derive(Debug, Clone)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn case_dir(&self, case_name: &str) -> PathBuf {
        self.root.join(case_dir_name(case_name))
    }

    pub fn screenshot_path(&self, case_name: &str, attempt: u32) -> PathBuf {
        self.case_dir(case_name)
            .join(format!("screenshot-attempt-{}.png", attempt))
    }

    pub fn video_path(&self, case_name: &str, attempt: u32) -> PathBuf {
        self.case_dir(case_name)
            .join(format!("video-attempt-{}.webm", attempt))
    }

    /// Directory the engine records into before the video is kept or dropped
    pub fn video_staging_dir(&self, case_name: &str, attempt: u32) -> PathBuf {
        self.case_dir(case_name)
            .join(format!(".video-attempt-{}", attempt))
    }

    /// Remove artifacts left by a previous run of the same case
    pub async fn reset_case_dir(&self, case_name: &str) -> E2eResult<()> {
        let dir = self.case_dir(case_name);
        if tokio::fs::metadata(&dir).await.is_ok() {
            tokio::fs::remove_dir_all(&dir).await?;
        }
        Ok(())
    }
}

/// Move a recorded video to its final location
pub async fn retain_video(recorded: &Path, dest: &Path) -> E2eResult<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(recorded, dest).await.is_err() {
        tokio::fs::copy(recorded, dest).await?;
        tokio::fs::remove_file(recorded).await?;
    }
    remove_staging_dir(recorded).await;
    Ok(())
}

/// Delete a recorded video the policy does not keep
pub async fn discard_video(recorded: &Path) {
    if let Err(e) = tokio::fs::remove_file(recorded).await {
        warn!("Failed to remove video {}: {}", recorded.display(), e);
    }
    remove_staging_dir(recorded).await;
}

async fn remove_staging_dir(recorded: &Path) {
    if let Some(dir) = recorded.parent() {
        let is_staging = dir
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(".video-attempt-"))
            .unwrap_or(false);
        if is_staging {
            let _ = tokio::fs::remove_dir_all(dir).await;
        }
    }
}

/// Directory name for a case, unique per raw test name
pub fn case_dir_name(name: &str) -> String {
    let sanitized = sanitize_name(name);
    if sanitized == name {
        return sanitized;
    }
    let digest = Sha256::digest(name.as_bytes());
    format!("{}-{}", sanitized, hex::encode(&digest[..4]))
}

/// Turn a test name into a single safe path component
pub fn sanitize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_matches(|c| c == '-' || c == '.');
    if trimmed.is_empty() {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_name() {
        assert_eq!(
            sanitize_name("Verify the google page navigation "),
            "Verify-the-google-page-navigation"
        );
        assert_eq!(sanitize_name("../../etc/passwd"), "etc-passwd");
        assert_eq!(sanitize_name("***"), "unnamed");
        assert_eq!(sanitize_name("login_flow.v2"), "login_flow.v2");
    }

    #[test]
    fn test_paths_include_attempt_number() {
        let layout = ArtifactLayout::new("out");
        assert_eq!(
            layout.screenshot_path("locators_demo", 2),
            PathBuf::from("out/locators_demo/screenshot-attempt-2.png")
        );
        assert_eq!(
            layout.video_path("locators_demo", 1),
            PathBuf::from("out/locators_demo/video-attempt-1.webm")
        );
    }

    #[test]
    fn test_case_dir_name_is_unique_per_raw_name() {
        assert_eq!(case_dir_name("login-a"), "login-a");

        let spaced = case_dir_name("login a");
        assert!(spaced.starts_with("login-a-"), "got {spaced}");
        assert_eq!(spaced.len(), "login-a-".len() + 8);
        assert_ne!(spaced, case_dir_name("login-a"));
        assert_ne!(spaced, case_dir_name("login/a"));
        assert_eq!(spaced, case_dir_name("login a"));
    }

    #[tokio::test]
    async fn test_retain_video_moves_file_and_clears_staging() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ArtifactLayout::new(dir.path());
        let staging = layout.video_staging_dir("case", 1);
        std::fs::create_dir_all(&staging).unwrap();
        let recorded = staging.join("abc123.webm");
        std::fs::write(&recorded, b"webm").unwrap();

        let dest = layout.video_path("case", 1);
        retain_video(&recorded, &dest).await.unwrap();

        assert!(dest.exists());
        assert!(!staging.exists());
    }
}
