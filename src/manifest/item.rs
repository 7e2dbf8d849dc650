use std::fmt;
use std::str::FromStr;

use log::warn;

/// Upload status of a manifest row.
///
/// `Pending` is the only status the coordinator acts on; every other value is
/// terminal and never reprocessed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UploadStatus {
    Pending,
    Uploaded,
    Failed,
    SkippedNoEmail,
    SkippedAuthFail,
    SkippedMissingMeta,
    FileNotFound,
    UnsupportedExtension,
}

impl UploadStatus {
    pub const ALL: [UploadStatus; 8] = [
        UploadStatus::Pending,
        UploadStatus::Uploaded,
        UploadStatus::Failed,
        UploadStatus::SkippedNoEmail,
        UploadStatus::SkippedAuthFail,
        UploadStatus::SkippedMissingMeta,
        UploadStatus::FileNotFound,
        UploadStatus::UnsupportedExtension,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            UploadStatus::Pending => "pending",
            UploadStatus::Uploaded => "uploaded",
            UploadStatus::Failed => "failed",
            UploadStatus::SkippedNoEmail => "skipped_no_email",
            UploadStatus::SkippedAuthFail => "skipped_auth_fail",
            UploadStatus::SkippedMissingMeta => "skipped_missing_meta",
            UploadStatus::FileNotFound => "file_not_found",
            UploadStatus::UnsupportedExtension => "unsupported_extension",
        }
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown upload status: {0:?}")]
pub struct UnknownStatus(pub String);

impl FromStr for UploadStatus {
    type Err = UnknownStatus;

    /// Case-insensitive; surrounding whitespace is not stripped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        UploadStatus::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Visibility of the uploaded video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    Public,
    #[default]
    Private,
    Unlisted,
}

impl Visibility {
    pub fn as_str(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Unlisted => "unlisted",
        }
    }

    /// Parse a `privacy_status` cell. Empty or unrecognised values fall back
    /// to `Private`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "public" => Visibility::Public,
            "unlisted" => Visibility::Unlisted,
            "private" | "" => Visibility::Private,
            other => {
                warn!("unrecognised privacy_status {other:?}, uploading as private");
                Visibility::Private
            }
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a comma-separated tag list, trimming each entry and dropping empties.
pub fn parse_tags(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect()
}

/// Only a case-insensitive `true` is true.
pub fn parse_flag(raw: &str) -> bool {
    raw.eq_ignore_ascii_case("true")
}

/// Borrowed view of one manifest row, keyed by the required columns.
#[derive(Debug, Clone, Copy)]
pub struct WorkItem<'a> {
    pub index: usize,
    pub filename: &'a str,
    pub title: &'a str,
    pub description: &'a str,
    pub tags: &'a str,
    pub privacy_status: &'a str,
    pub made_for_kids_flag: &'a str,
    pub upload_status: &'a str,
    pub uploader_account_email: &'a str,
}

impl WorkItem<'_> {
    pub fn status(&self) -> Option<UploadStatus> {
        self.upload_status.parse().ok()
    }

    pub fn is_pending(&self) -> bool {
        self.status() == Some(UploadStatus::Pending)
    }

    /// The owning account with surrounding whitespace removed.
    pub fn account(&self) -> &str {
        self.uploader_account_email.trim()
    }

    /// Names of the required text fields that are empty.
    pub fn missing_metadata(&self) -> Vec<&'static str> {
        [
            ("filename", self.filename),
            ("title", self.title),
            ("description", self.description),
            ("tags", self.tags),
        ]
        .into_iter()
        .filter(|(_, value)| value.is_empty())
        .map(|(name, _)| name)
        .collect()
    }

    pub fn tag_list(&self) -> Vec<String> {
        parse_tags(self.tags)
    }

    pub fn visibility(&self) -> Visibility {
        Visibility::parse_lenient(self.privacy_status)
    }

    pub fn made_for_kids(&self) -> bool {
        parse_flag(self.made_for_kids_flag)
    }
}
