//! YouTube Data API v3 resumable upload.
//!
//! The upload happens in two HTTP round-trips:
//!
//! 1. **initiate**: POST the video metadata to the upload endpoint with
//!    `uploadType=resumable`. The `Location` response header carries the
//!    session URI.
//! 2. **upload**: PUT the raw video bytes to that URI, streamed from disk.
//!    The response body is a Videos resource whose `id` is the new video ID.
//!
//! A failed session is never resumed; the next invocation starts over.

use std::fs::File;
use std::path::Path;

use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use reqwest::blocking::{Body, Client};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;
use crate::credentials::CredentialBundle;
use crate::manifest::Visibility;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("cannot read video file: {0}")]
    Io(#[from] std::io::Error),
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{stage} rejected with HTTP {status}: {body}")]
    Rejected {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[error("no Location header in upload-initiation response")]
    MissingLocation,
}

/// Metadata sent along with the media.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadRequest {
    pub title: String,
    pub description: String,
    pub tags: Vec<String>,
    pub visibility: Visibility,
    pub made_for_kids: bool,
    pub category_id: String,
}

/// The remote upload operation.
pub trait VideoUploader {
    /// Upload `file` and return the provider-assigned video ID.
    fn upload(&self, request: &UploadRequest, file: &Path) -> Result<String, UploadError>;
}

/// Builds an uploader bound to one account's credentials.
pub trait ClientFactory {
    type Client: VideoUploader;

    fn build(&self, credential: &CredentialBundle) -> Self::Client;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource<'a> {
    snippet: Snippet<'a>,
    status: Status<'a>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Snippet<'a> {
    title: &'a str,
    description: &'a str,
    tags: &'a [String],
    category_id: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Status<'a> {
    privacy_status: &'a str,
    self_declared_made_for_kids: bool,
}

impl<'a> From<&'a UploadRequest> for VideoResource<'a> {
    fn from(req: &'a UploadRequest) -> Self {
        Self {
            snippet: Snippet {
                title: &req.title,
                description: &req.description,
                tags: &req.tags,
                category_id: &req.category_id,
            },
            status: Status {
                privacy_status: req.visibility.as_str(),
                self_declared_made_for_kids: req.made_for_kids,
            },
        }
    }
}

#[derive(Deserialize)]
struct UploadedVideo {
    id: String,
}

/// Authenticated YouTube client for a single account.
pub struct YoutubeClient {
    http: Client,
    access_token: String,
    upload_base_url: String,
}

impl YoutubeClient {
    pub fn new(http: Client, access_token: impl Into<String>, upload_base_url: impl Into<String>) -> Self {
        Self {
            http,
            access_token: access_token.into(),
            upload_base_url: upload_base_url.into(),
        }
    }

    fn initiate(&self, request: &UploadRequest, file_size: u64) -> Result<String, UploadError> {
        let endpoint = format!(
            "{}/youtube/v3/videos?uploadType=resumable&part=snippet,status",
            self.upload_base_url.trim_end_matches('/')
        );
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&self.access_token)
            .header("X-Upload-Content-Type", config::UPLOAD_MIME_TYPE)
            .header("X-Upload-Content-Length", file_size.to_string())
            .json(&VideoResource::from(request))
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Rejected {
                stage: "upload initiation",
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(UploadError::MissingLocation)
    }
}

impl VideoUploader for YoutubeClient {
    fn upload(&self, request: &UploadRequest, file: &Path) -> Result<String, UploadError> {
        let size = std::fs::metadata(file)?.len();
        let name = file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!("uploading '{name}' ({size} bytes) with title '{}'", request.title);

        let session_uri = self.initiate(request, size)?;

        let progress = ProgressBar::new(size);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("##-"),
        );
        let reader = progress.wrap_read(File::open(file)?);

        let response = self
            .http
            .put(session_uri)
            .bearer_auth(&self.access_token)
            .header(CONTENT_TYPE, config::UPLOAD_MIME_TYPE)
            .body(Body::sized(reader, size))
            .send();
        progress.finish_and_clear();
        let response = response?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Rejected {
                stage: "media upload",
                status: status.as_u16(),
                body: response.text().unwrap_or_default(),
            });
        }

        let video: UploadedVideo = response.json()?;
        info!("uploaded '{name}' → {}{}", config::WATCH_URL_PREFIX, video.id);
        Ok(video.id)
    }
}

/// Produces [`YoutubeClient`]s sharing one HTTP connection pool.
pub struct YoutubeClientFactory {
    http: Client,
    upload_base_url: String,
}

impl YoutubeClientFactory {
    pub fn new(upload_base_url: impl Into<String>) -> Result<Self, UploadError> {
        // Uploads can run for hours; no overall timeout.
        let http = Client::builder().timeout(None).build()?;
        Ok(Self {
            http,
            upload_base_url: upload_base_url.into(),
        })
    }
}

impl ClientFactory for YoutubeClientFactory {
    type Client = YoutubeClient;

    fn build(&self, credential: &CredentialBundle) -> YoutubeClient {
        YoutubeClient::new(
            self.http.clone(),
            credential.access_token.clone(),
            self.upload_base_url.clone(),
        )
    }
}
