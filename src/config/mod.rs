use std::path::PathBuf;

// OAuth parameters
pub const UPLOAD_SCOPE: &str = "https://www.googleapis.com/auth/youtube.upload";
pub const DEFAULT_CLIENT_SECRETS_FILE: &str = "client_secrets.json";
pub const DEFAULT_OAUTH_PORT: u16 = 0; // ephemeral
pub const EXPIRY_SKEW_SECS: i64 = 60;

// Credential cache
pub const DEFAULT_TOKEN_DIR: &str = ".";
pub const TOKEN_FILE_PREFIX: &str = "token_";
pub const TOKEN_FILE_EXTENSION: &str = "json";

// Work queue
pub const DEFAULT_MANIFEST_FILE: &str = "metadata.csv";
pub const DEFAULT_VIDEOS_DIRECTORY: &str = "videos";
pub const ALLOWED_VIDEO_EXTENSIONS: [&str; 4] = [".mp4", ".mov", ".avi", ".webm"];

// YouTube Data API v3
pub const DEFAULT_UPLOAD_BASE_URL: &str = "https://www.googleapis.com/upload";
pub const DEFAULT_CATEGORY_ID: &str = "22"; // People & Blogs
pub const UPLOAD_MIME_TYPE: &str = "video/*";
pub const WATCH_URL_PREFIX: &str = "https://www.youtube.com/watch?v=";

/// Deterministic credential file name for an account identifier.
///
/// Characters outside `[A-Za-z0-9@._-]` are replaced with `_` so the
/// identifier can never escape the token directory.
pub fn token_file_name(account_id: &str) -> String {
    let sanitized: String = account_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '@' | '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!("{TOKEN_FILE_PREFIX}{sanitized}.{TOKEN_FILE_EXTENSION}")
}

/// Runtime configuration for one invocation.
#[derive(Debug, Clone)]
pub struct UploaderConfig {
    pub manifest_path: PathBuf,
    pub videos_dir: PathBuf,
    pub client_secrets: PathBuf,
    pub token_dir: PathBuf,
    pub oauth_port: u16,
    pub open_browser: bool,
    pub upload_base_url: String,
    pub category_id: String,
}

impl Default for UploaderConfig {
    fn default() -> Self {
        Self {
            manifest_path: PathBuf::from(DEFAULT_MANIFEST_FILE),
            videos_dir: PathBuf::from(DEFAULT_VIDEOS_DIRECTORY),
            client_secrets: PathBuf::from(DEFAULT_CLIENT_SECRETS_FILE),
            token_dir: PathBuf::from(DEFAULT_TOKEN_DIR),
            oauth_port: DEFAULT_OAUTH_PORT,
            open_browser: true,
            upload_base_url: DEFAULT_UPLOAD_BASE_URL.to_string(),
            category_id: DEFAULT_CATEGORY_ID.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_file_name_keeps_email() {
        assert_eq!(token_file_name("me@example.com"), "token_me@example.com.json");
    }

    #[test]
    fn test_token_file_name_sanitizes_separators() {
        assert_eq!(token_file_name("../evil/x y"), "token_.._evil_x_y.json");
    }
}
