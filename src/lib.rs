pub mod config;
pub mod credentials;
pub mod manifest;
pub mod pipeline;
pub mod session;
pub mod youtube;

pub use config::UploaderConfig;
pub use credentials::{CredentialBundle, CredentialStore, GoogleOAuth, OAuthClient};
pub use manifest::{Manifest, UploadStatus};
pub use pipeline::{RunError, RunOutcome, UploadCoordinator};
pub use session::SessionCache;
pub use youtube::YoutubeClientFactory;
