mod item;

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

pub use item::{parse_flag, parse_tags, UnknownStatus, UploadStatus, Visibility, WorkItem};

/// Columns every manifest must carry, in canonical order.
pub const REQUIRED_COLUMNS: [&str; 8] = [
    "filename",
    "title",
    "description",
    "tags",
    "privacy_status",
    "made_for_kids_flag",
    "upload_status",
    "uploader_account_email",
];

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest file not found: {}", .0.display())]
    NotFound(PathBuf),
    #[error(
        "manifest {} is missing required columns: {}; expected header: {}",
        .path.display(),
        .missing.join(", "),
        REQUIRED_COLUMNS.join(",")
    )]
    MissingColumns { path: PathBuf, missing: Vec<String> },
    #[error("failed to parse manifest {}: {source}", .path.display())]
    Csv { path: PathBuf, source: csv::Error },
    #[error("manifest I/O error on {}: {source}", .path.display())]
    Io { path: PathBuf, source: io::Error },
}

/// Header positions of the required columns.
#[derive(Debug, Clone, Copy)]
struct Columns {
    filename: usize,
    title: usize,
    description: usize,
    tags: usize,
    privacy_status: usize,
    made_for_kids_flag: usize,
    upload_status: usize,
    uploader_account_email: usize,
}

impl Columns {
    fn resolve(headers: &[String]) -> Result<Self, Vec<String>> {
        let position = |name: &str| headers.iter().position(|h| h == name);
        let missing: Vec<String> = REQUIRED_COLUMNS
            .into_iter()
            .filter(|name| position(*name).is_none())
            .map(|name| name.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(missing);
        }
        let at = |name: &str| position(name).unwrap_or_default();
        Ok(Self {
            filename: at("filename"),
            title: at("title"),
            description: at("description"),
            tags: at("tags"),
            privacy_status: at("privacy_status"),
            made_for_kids_flag: at("made_for_kids_flag"),
            upload_status: at("upload_status"),
            uploader_account_email: at("uploader_account_email"),
        })
    }
}

/// The ordered work queue: header plus rows, each row as wide as the header.
#[derive(Debug, Clone)]
pub struct Manifest {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    columns: Columns,
    terminator: csv::Terminator,
}

impl Manifest {
    /// Build a manifest from a header and raw rows.
    ///
    /// Rows shorter than the header are padded with empty cells; cells beyond
    /// the header are dropped.
    pub fn from_records(
        headers: Vec<String>,
        rows: Vec<Vec<String>>,
    ) -> Result<Self, Vec<String>> {
        let columns = Columns::resolve(&headers)?;
        let width = headers.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Ok(Self {
            headers,
            rows,
            columns,
            terminator: csv::Terminator::Any(b'\n'),
        })
    }

    /// Read a manifest from disk and check its header.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = fs::read_to_string(path).map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ManifestError::NotFound(path.to_path_buf())
            } else {
                ManifestError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;
        let content = content.strip_prefix('\u{feff}').unwrap_or(&content);
        let csv_err = |source: csv::Error| ManifestError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(content.as_bytes());

        let headers: Vec<String> = reader
            .headers()
            .map_err(csv_err)?
            .iter()
            .map(String::from)
            .collect();

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(csv_err)?;
            rows.push(record.iter().map(String::from).collect());
        }

        let mut manifest =
            Self::from_records(headers, rows).map_err(|missing| ManifestError::MissingColumns {
                path: path.to_path_buf(),
                missing,
            })?;
        if content
            .split_once('\n')
            .is_some_and(|(header, _)| header.ends_with('\r'))
        {
            manifest.terminator = csv::Terminator::CRLF;
        }
        Ok(manifest)
    }

    /// Write the full header and every row, replacing `path`.
    ///
    /// The data goes to a sibling temporary file first and is renamed over the
    /// target, so an interrupted save leaves the previous manifest intact.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        let io_err = |source: io::Error| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        };
        let csv_err = |source: csv::Error| ManifestError::Csv {
            path: path.to_path_buf(),
            source,
        };

        let mut writer = csv::WriterBuilder::new()
            .terminator(self.terminator)
            .from_writer(Vec::new());
        writer.write_record(&self.headers).map_err(csv_err)?;
        for row in &self.rows {
            writer.write_record(row).map_err(csv_err)?;
        }
        let bytes = writer
            .into_inner()
            .map_err(|e| io_err(io::Error::other(e.to_string())))?;

        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = path.with_file_name(tmp_name);
        fs::write(&tmp_path, bytes).map_err(io_err)?;
        fs::rename(&tmp_path, path).map_err(io_err)?;

        info!("updated {} with latest upload statuses", path.display());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Raw cells of row `index`, in header order.
    pub fn row(&self, index: usize) -> Option<&[String]> {
        self.rows.get(index).map(Vec::as_slice)
    }

    pub fn item(&self, index: usize) -> Option<WorkItem<'_>> {
        let row = self.rows.get(index)?;
        let c = &self.columns;
        Some(WorkItem {
            index,
            filename: &row[c.filename],
            title: &row[c.title],
            description: &row[c.description],
            tags: &row[c.tags],
            privacy_status: &row[c.privacy_status],
            made_for_kids_flag: &row[c.made_for_kids_flag],
            upload_status: &row[c.upload_status],
            uploader_account_email: &row[c.uploader_account_email],
        })
    }

    pub fn items(&self) -> impl Iterator<Item = WorkItem<'_>> {
        (0..self.rows.len()).filter_map(|i| self.item(i))
    }

    /// Index of the first row whose status is `pending`.
    pub fn first_pending(&self) -> Option<usize> {
        self.items().find(|item| item.is_pending()).map(|item| item.index)
    }

    /// Overwrite the `upload_status` cell of row `index`.
    ///
    /// Returns `false` if the row does not exist.
    pub fn set_status(&mut self, index: usize, status: UploadStatus) -> bool {
        let column = self.columns.upload_status;
        match self.rows.get_mut(index) {
            Some(row) => {
                row[column] = status.as_str().to_string();
                true
            }
            None => false,
        }
    }

    /// Row counts keyed by the raw status cell (lowercased).
    pub fn status_counts(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for item in self.items() {
            *counts
                .entry(item.upload_status.to_ascii_lowercase())
                .or_insert(0) += 1;
        }
        counts
    }
}
