pub mod step;

use std::path::{Path, PathBuf};

use log::{info, warn};
use thiserror::Error;

use crate::manifest::{Manifest, ManifestError, UploadStatus, WorkItem};
use crate::session::SessionCache;
use crate::youtube::{ClientFactory, UploadRequest, VideoUploader};
use step::ItemError;

/// Result of a single [`UploadCoordinator::run_once`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No row is `pending`; the manifest was not rewritten.
    NothingToDo,
    /// One row was moved to a terminal status and the manifest saved.
    Processed {
        row: usize,
        filename: String,
        status: UploadStatus,
        video_id: Option<String>,
    },
}

/// Failures that end a run without a recorded status: setup problems before
/// any row is touched, or the final save.
#[derive(Error, Debug)]
pub enum RunError {
    #[error("video directory not found: {}", .0.display())]
    VideoDirMissing(PathBuf),
    #[error(transparent)]
    Manifest(#[from] ManifestError),
    #[error("failed to save manifest: {0}")]
    Save(#[source] ManifestError),
}

/// Moves exactly one pending manifest row to a terminal status per run.
pub struct UploadCoordinator<F: ClientFactory> {
    sessions: SessionCache<F>,
    category_id: String,
}

impl<F: ClientFactory> UploadCoordinator<F> {
    pub fn new(sessions: SessionCache<F>, category_id: impl Into<String>) -> Self {
        Self {
            sessions,
            category_id: category_id.into(),
        }
    }

    pub fn sessions(&self) -> &SessionCache<F> {
        &self.sessions
    }

    /// Process the first `pending` row of the manifest at `manifest_path`.
    ///
    /// Steps:
    /// 1. Check `videos_dir` exists and load the manifest.
    /// 2. Pick the first row whose status is `pending`; stop if there is none.
    /// 3. Resolve the account, session, metadata and video file, then upload.
    /// 4. Record the resulting status and save the whole manifest.
    ///
    /// Item-level problems become a status, never an `Err`.
    pub fn run_once(
        &mut self,
        manifest_path: &Path,
        videos_dir: &Path,
    ) -> Result<RunOutcome, RunError> {
        if !videos_dir.is_dir() {
            return Err(RunError::VideoDirMissing(videos_dir.to_path_buf()));
        }

        let mut manifest = Manifest::load(manifest_path)?;
        info!(
            "found {} video entries in {}",
            manifest.len(),
            manifest_path.display()
        );

        let (row, filename, result) = {
            let Some(item) = manifest.items().find(|item| item.is_pending()) else {
                info!(
                    "no pending videos in {} to upload at this time",
                    manifest_path.display()
                );
                return Ok(RunOutcome::NothingToDo);
            };
            info!("attempting next pending video: {}", item.filename);
            (item.index, item.filename.to_string(), self.process(&item, videos_dir))
        };

        let (status, video_id) = match result {
            Ok(video_id) => {
                info!("video '{filename}' uploaded with ID {video_id}");
                (UploadStatus::Uploaded, Some(video_id))
            }
            Err(e) => {
                let status = e.status();
                warn!("video '{filename}': {e}; status set to '{status}'");
                (status, None)
            }
        };

        manifest.set_status(row, status);
        manifest.save(manifest_path).map_err(RunError::Save)?;

        Ok(RunOutcome::Processed {
            row,
            filename,
            status,
            video_id,
        })
    }

    fn process(&mut self, item: &WorkItem<'_>, videos_dir: &Path) -> Result<String, ItemError> {
        let account = item.account();
        if account.is_empty() {
            return Err(ItemError::NoAccount);
        }

        let session = self
            .sessions
            .acquire(account)
            .ok_or_else(|| ItemError::AuthFailed(account.to_string()))?;

        let missing = item.missing_metadata();
        if !missing.is_empty() {
            return Err(ItemError::MissingMetadata(missing));
        }

        let request = UploadRequest {
            title: item.title.to_string(),
            description: item.description.to_string(),
            tags: item.tag_list(),
            visibility: item.visibility(),
            made_for_kids: item.made_for_kids(),
            category_id: self.category_id.clone(),
        };

        let path = step::locate_video(videos_dir, item.filename)?;
        Ok(session.client().upload(&request, &path)?)
    }
}
