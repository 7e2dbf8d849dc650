use std::path::{Component, Path, PathBuf};

use thiserror::Error;

use crate::config::ALLOWED_VIDEO_EXTENSIONS;
use crate::manifest::UploadStatus;
use crate::youtube::UploadError;

/// Why a pending item ended in something other than `uploaded`.
#[derive(Error, Debug)]
pub enum ItemError {
    #[error("missing uploader_account_email")]
    NoAccount,
    #[error("could not authenticate account '{0}'")]
    AuthFailed(String),
    #[error("missing essential metadata: {}", .0.join(", "))]
    MissingMetadata(Vec<&'static str>),
    #[error("video file not found at {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("unsupported extension on '{0}' (allowed: {exts})", exts = ALLOWED_VIDEO_EXTENSIONS.join(", "))]
    UnsupportedExtension(String),
    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),
}

impl ItemError {
    /// Terminal status recorded in the manifest for this failure.
    pub fn status(&self) -> UploadStatus {
        match self {
            ItemError::NoAccount => UploadStatus::SkippedNoEmail,
            ItemError::AuthFailed(_) => UploadStatus::SkippedAuthFail,
            ItemError::MissingMetadata(_) => UploadStatus::SkippedMissingMeta,
            ItemError::FileNotFound(_) => UploadStatus::FileNotFound,
            ItemError::UnsupportedExtension(_) => UploadStatus::UnsupportedExtension,
            ItemError::Upload(_) => UploadStatus::Failed,
        }
    }
}

/// Resolve `filename` under `videos_dir`, checking existence then extension.
///
/// Absolute names and names with `..` never resolve, so a row cannot point
/// outside the video directory.
pub fn locate_video(videos_dir: &Path, filename: &str) -> Result<PathBuf, ItemError> {
    let path = videos_dir.join(filename);
    if !stays_inside(filename) || !path.exists() {
        return Err(ItemError::FileNotFound(path));
    }
    if !has_allowed_extension(filename) {
        return Err(ItemError::UnsupportedExtension(filename.to_string()));
    }
    Ok(path)
}

fn stays_inside(filename: &str) -> bool {
    Path::new(filename)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

pub fn has_allowed_extension(filename: &str) -> bool {
    let lower = filename.to_ascii_lowercase();
    ALLOWED_VIDEO_EXTENSIONS
        .iter()
        .any(|ext| lower.ends_with(ext))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_extensions_ignore_case() {
        assert!(has_allowed_extension("clip.mp4"));
        assert!(has_allowed_extension("CLIP.MOV"));
        assert!(has_allowed_extension("a.b.WebM"));
        assert!(!has_allowed_extension("notes.txt"));
        assert!(!has_allowed_extension("NOTES.TXT"));
        assert!(!has_allowed_extension("mp4"));
    }

    #[test]
    fn test_locate_checks_existence_before_extension() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            locate_video(dir.path(), "ghost.txt"),
            Err(ItemError::FileNotFound(_))
        ));

        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        assert!(matches!(
            locate_video(dir.path(), "notes.txt"),
            Err(ItemError::UnsupportedExtension(_))
        ));

        std::fs::write(dir.path().join("clip.webm"), b"x").unwrap();
        assert_eq!(
            locate_video(dir.path(), "clip.webm").unwrap(),
            dir.path().join("clip.webm")
        );
    }

    #[test]
    fn test_names_escaping_the_video_dir_are_not_found() {
        let root = tempfile::tempdir().unwrap();
        let videos = root.path().join("videos");
        std::fs::create_dir(&videos).unwrap();
        let outside = root.path().join("outside.mp4");
        std::fs::write(&outside, b"x").unwrap();

        assert!(matches!(
            locate_video(&videos, "../outside.mp4"),
            Err(ItemError::FileNotFound(_))
        ));
        assert!(matches!(
            locate_video(&videos, outside.to_str().unwrap()),
            Err(ItemError::FileNotFound(_))
        ));

        std::fs::create_dir(videos.join("day1")).unwrap();
        std::fs::write(videos.join("day1").join("clip.mp4"), b"x").unwrap();
        assert!(locate_video(&videos, "day1/clip.mp4").is_ok());
    }

    #[test]
    fn test_unsupported_extension_message_lists_allowed() {
        let message = ItemError::UnsupportedExtension("notes.txt".into()).to_string();
        assert_eq!(
            message,
            "unsupported extension on 'notes.txt' (allowed: .mp4, .mov, .avi, .webm)"
        );
    }

    #[test]
    fn test_status_mapping_is_total() {
        let cases = [
            (ItemError::NoAccount, UploadStatus::SkippedNoEmail),
            (ItemError::AuthFailed("a".into()), UploadStatus::SkippedAuthFail),
            (ItemError::MissingMetadata(vec!["title"]), UploadStatus::SkippedMissingMeta),
            (ItemError::FileNotFound("x".into()), UploadStatus::FileNotFound),
            (ItemError::UnsupportedExtension("x.txt".into()), UploadStatus::UnsupportedExtension),
            (ItemError::Upload(UploadError::MissingLocation), UploadStatus::Failed),
        ];
        for (error, status) in cases {
            assert_eq!(error.status(), status);
            assert_ne!(status, UploadStatus::Pending);
        }
    }
}
