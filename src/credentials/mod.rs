//! Per-account credential cache.
//!
//! Each account identifier owns one JSON credential file under the token
//! directory. [`CredentialStore::obtain`] walks the lifecycle
//! load → validate → refresh → interactive authorization → persist and hands
//! back a bundle that is valid right now.

mod callback;
mod oauth;

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config;

pub use callback::{CallbackParams, LoopbackListener};
pub use oauth::{GoogleOAuth, MissingClientSecrets, OAuthClient};

/// Token material authorizing API calls for one account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<DateTime<Utc>>,
    #[serde(default)]
    pub scopes: Vec<String>,
}

impl CredentialBundle {
    /// A bundle is valid while it has an access token whose expiry (if any)
    /// lies beyond the skew window.
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        if self.access_token.is_empty() {
            return false;
        }
        match self.expiry {
            Some(expiry) => expiry - Duration::seconds(config::EXPIRY_SKEW_SECS) > now,
            None => true,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }

    pub fn can_refresh(&self) -> bool {
        self.refresh_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

#[derive(Error, Debug)]
pub enum CredentialLoadError {
    #[error("cannot read credential file: {0}")]
    Io(#[from] io::Error),
    #[error("corrupted credential file: {0}")]
    Corrupt(#[from] serde_json::Error),
}

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("token refresh failed: {0}")]
    Refresh(String),
    #[error("authorization denied: {0}")]
    Denied(String),
    #[error("authorization callback state did not match the request")]
    StateMismatch,
    #[error("malformed authorization callback: {0}")]
    Callback(String),
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("invalid client secrets: {0}")]
    ClientSecrets(String),
    #[error("authorization I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("authorization HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Obtains a fresh bundle through a user-in-the-loop consent flow.
pub trait InteractiveAuthorizer {
    /// Blocks until the user completes (or abandons) consent for `account_id`.
    fn authorize(&self, account_id: &str) -> Result<CredentialBundle, AuthError>;
}

/// Exchanges a refresh token for a new access token.
pub trait TokenRefresher {
    fn refresh(&self, bundle: &CredentialBundle) -> Result<CredentialBundle, AuthError>;
}

/// Loads, validates, refreshes and persists one credential bundle per account.
pub struct CredentialStore {
    dir: PathBuf,
    authorizer: Box<dyn InteractiveAuthorizer>,
    refresher: Box<dyn TokenRefresher>,
}

impl CredentialStore {
    pub fn new(
        dir: impl Into<PathBuf>,
        authorizer: Box<dyn InteractiveAuthorizer>,
        refresher: Box<dyn TokenRefresher>,
    ) -> Self {
        Self {
            dir: dir.into(),
            authorizer,
            refresher,
        }
    }

    /// Location of the credential file for `account_id`.
    pub fn token_path(&self, account_id: &str) -> PathBuf {
        self.dir.join(config::token_file_name(account_id))
    }

    /// Return a currently valid bundle for `account_id`.
    ///
    /// Per call this performs at most one file read, one delete, one write,
    /// one refresh request and one interactive flow. Load and refresh
    /// failures are recovered; only an interactive failure is returned.
    /// A refresh that could not even be attempted for lack of client secrets
    /// leaves the stored file alone.
    pub fn obtain(&self, account_id: &str) -> Result<CredentialBundle, AuthError> {
        let path = self.token_path(account_id);

        let stored = match load_bundle(&path) {
            Ok(stored) => stored,
            Err(e) => {
                warn!("error loading token for '{account_id}': {e}; will re-authenticate");
                purge(&path);
                None
            }
        };

        if let Some(bundle) = stored {
            if bundle.is_valid() {
                debug!("using cached credentials for '{account_id}' from {}", path.display());
                return Ok(bundle);
            }
            if bundle.can_refresh() {
                info!("refreshing credentials for '{account_id}'");
                match self.refresher.refresh(&bundle) {
                    Ok(refreshed) if refreshed.is_valid() => {
                        persist(&path, account_id, &refreshed);
                        return Ok(refreshed);
                    }
                    Ok(_) => {
                        warn!("refresh for '{account_id}' returned an expired token; will re-authenticate");
                        purge(&path);
                    }
                    Err(e @ AuthError::ClientSecrets(_)) => {
                        warn!("cannot refresh token for '{account_id}': {e}; keeping {}", path.display());
                    }
                    Err(e) => {
                        warn!("error refreshing token for '{account_id}': {e}; will re-authenticate");
                        purge(&path);
                    }
                }
            } else {
                info!("stored credentials for '{account_id}' expired and hold no refresh token");
            }
        }

        info!("authenticating account '{account_id}'; complete the consent flow in your browser");
        let fresh = self.authorizer.authorize(account_id).map_err(|e| {
            error!("failed to complete authentication for '{account_id}': {e}");
            e
        })?;
        persist(&path, account_id, &fresh);
        Ok(fresh)
    }
}

fn load_bundle(path: &Path) -> Result<Option<CredentialBundle>, CredentialLoadError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    info!("loading credentials from {}", path.display());
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn purge(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!("removed {}", path.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("could not remove {}: {e}", path.display()),
    }
}

/// A write failure is logged, not returned: the caller still holds a valid
/// bundle for this run and the next run simply re-authorizes.
fn persist(path: &Path, account_id: &str, bundle: &CredentialBundle) {
    match write_bundle(path, bundle) {
        Ok(()) => info!("credentials for '{account_id}' saved to {}", path.display()),
        Err(e) => error!("could not save credentials for '{account_id}' to {}: {e}", path.display()),
    }
}

fn write_bundle(path: &Path, bundle: &CredentialBundle) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(bundle)?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(&json)?;
    file.sync_all()
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    use super::*;

    pub fn bundle(token: &str, expires_in_secs: i64, refresh: Option<&str>) -> CredentialBundle {
        CredentialBundle {
            access_token: token.to_string(),
            refresh_token: refresh.map(String::from),
            expiry: Some(Utc::now() + Duration::seconds(expires_in_secs)),
            scopes: vec![config::UPLOAD_SCOPE.to_string()],
        }
    }

    /// Shared call log for the fakes below.
    #[derive(Default)]
    pub struct Calls {
        pub authorize: Cell<usize>,
        pub refresh: Cell<usize>,
        pub accounts: RefCell<Vec<String>>,
    }

    pub struct FakeAuthorizer {
        pub calls: Rc<Calls>,
        pub succeed: bool,
    }

    impl InteractiveAuthorizer for FakeAuthorizer {
        fn authorize(&self, account_id: &str) -> Result<CredentialBundle, AuthError> {
            self.calls.authorize.set(self.calls.authorize.get() + 1);
            self.calls.accounts.borrow_mut().push(account_id.to_string());
            if self.succeed {
                Ok(bundle(&format!("fresh-{account_id}"), 3600, Some("refresh-1")))
            } else {
                Err(AuthError::Denied("access_denied".into()))
            }
        }
    }

    pub struct FakeRefresher {
        pub calls: Rc<Calls>,
        pub succeed: bool,
        pub expires_in_secs: i64,
    }

    impl TokenRefresher for FakeRefresher {
        fn refresh(&self, old: &CredentialBundle) -> Result<CredentialBundle, AuthError> {
            self.calls.refresh.set(self.calls.refresh.get() + 1);
            if self.succeed {
                Ok(CredentialBundle {
                    refresh_token: old.refresh_token.clone(),
                    ..bundle("refreshed", self.expires_in_secs, None)
                })
            } else {
                Err(AuthError::Refresh("invalid_grant".into()))
            }
        }
    }

    pub fn store(dir: &Path, authorize_ok: bool, refresh_ok: bool) -> (CredentialStore, Rc<Calls>) {
        let calls = Rc::new(Calls::default());
        let store = CredentialStore::new(
            dir,
            Box::new(FakeAuthorizer {
                calls: Rc::clone(&calls),
                succeed: authorize_ok,
            }),
            Box::new(FakeRefresher {
                calls: Rc::clone(&calls),
                succeed: refresh_ok,
                expires_in_secs: 3600,
            }),
        );
        (store, calls)
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::testing::{bundle, store, Calls, FakeAuthorizer, FakeRefresher};
    use super::*;

    const ACCOUNT: &str = "creator@example.com";

    fn seed(store: &CredentialStore, bundle: &CredentialBundle) -> PathBuf {
        let path = store.token_path(ACCOUNT);
        write_bundle(&path, bundle).unwrap();
        path
    }

    fn read(path: &Path) -> CredentialBundle {
        serde_json::from_slice(&fs::read(path).unwrap()).unwrap()
    }

    #[test]
    fn test_validity_window() {
        let now = Utc::now();
        assert!(bundle("t", 3600, None).is_valid_at(now));
        assert!(!bundle("t", 30, None).is_valid_at(now));
        assert!(!bundle("", 3600, None).is_valid_at(now));
        let no_expiry = CredentialBundle {
            expiry: None,
            ..bundle("t", 0, None)
        };
        assert!(no_expiry.is_valid_at(now));
    }

    #[test]
    fn test_missing_file_runs_interactive_flow_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let (store, calls) = store(dir.path(), true, true);

        let obtained = store.obtain(ACCOUNT).unwrap();
        assert_eq!(obtained.access_token, format!("fresh-{ACCOUNT}"));
        assert_eq!(calls.authorize.get(), 1);
        assert_eq!(calls.refresh.get(), 0);
        assert_eq!(read(&store.token_path(ACCOUNT)), obtained);
    }

    #[test]
    fn test_valid_cached_bundle_is_reused_without_write() {
        let dir = tempfile::tempdir().unwrap();
        let (store, calls) = store(dir.path(), true, true);
        let cached = bundle("cached", 3600, Some("r"));
        let path = seed(&store, &cached);
        let before = fs::read(&path).unwrap();

        assert_eq!(store.obtain(ACCOUNT).unwrap(), cached);
        assert_eq!(calls.authorize.get(), 0);
        assert_eq!(calls.refresh.get(), 0);
        assert_eq!(fs::read(&path).unwrap(), before);
    }

    #[test]
    fn test_expired_bundle_is_refreshed_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let (store, calls) = store(dir.path(), true, true);
        let path = seed(&store, &bundle("stale", -10, Some("keep-me")));

        let obtained = store.obtain(ACCOUNT).unwrap();
        assert_eq!(obtained.access_token, "refreshed");
        assert_eq!(obtained.refresh_token.as_deref(), Some("keep-me"));
        assert_eq!(calls.refresh.get(), 1);
        assert_eq!(calls.authorize.get(), 0);
        assert_eq!(read(&path), obtained);
    }

    #[test]
    fn test_refresh_failure_falls_back_to_interactive() {
        let dir = tempfile::tempdir().unwrap();
        let (store, calls) = store(dir.path(), true, false);
        let path = seed(&store, &bundle("stale", -10, Some("revoked")));

        let obtained = store.obtain(ACCOUNT).unwrap();
        assert_eq!(calls.refresh.get(), 1);
        assert_eq!(calls.authorize.get(), 1);
        assert_eq!(read(&path), obtained);
    }

    #[test]
    fn test_refresh_failure_and_interactive_failure_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let (store, calls) = store(dir.path(), false, false);
        let path = seed(&store, &bundle("stale", -10, Some("revoked")));

        assert!(store.obtain(ACCOUNT).is_err());
        assert_eq!(calls.refresh.get(), 1);
        assert_eq!(calls.authorize.get(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_refresh_returning_expired_token_falls_back_to_interactive() {
        let dir = tempfile::tempdir().unwrap();
        let calls = Rc::new(Calls::default());
        let store = CredentialStore::new(
            dir.path(),
            Box::new(FakeAuthorizer {
                calls: Rc::clone(&calls),
                succeed: true,
            }),
            Box::new(FakeRefresher {
                calls: Rc::clone(&calls),
                succeed: true,
                expires_in_secs: -5,
            }),
        );
        let path = seed(&store, &bundle("stale", -10, Some("r")));

        let obtained = store.obtain(ACCOUNT).unwrap();
        assert_eq!(obtained.access_token, format!("fresh-{ACCOUNT}"));
        assert_eq!(calls.refresh.get(), 1);
        assert_eq!(calls.authorize.get(), 1);
        assert_eq!(read(&path), obtained);
    }

    #[test]
    fn test_missing_client_secrets_keeps_refresh_token_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store = CredentialStore::new(
            dir.path(),
            Box::new(MissingClientSecrets::new("client_secrets.json: not found")),
            Box::new(MissingClientSecrets::new("client_secrets.json: not found")),
        );
        let stale = bundle("stale", -10, Some("good-refresh-token"));
        let path = seed(&store, &stale);

        assert!(matches!(store.obtain(ACCOUNT), Err(AuthError::ClientSecrets(_))));
        assert_eq!(read(&path), stale);
    }

    #[test]
    fn test_expired_without_refresh_token_skips_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let (store, calls) = store(dir.path(), true, true);
        seed(&store, &bundle("stale", -10, None));

        store.obtain(ACCOUNT).unwrap();
        assert_eq!(calls.refresh.get(), 0);
        assert_eq!(calls.authorize.get(), 1);
    }

    #[test]
    fn test_corrupted_file_is_purged() {
        let dir = tempfile::tempdir().unwrap();
        let (store, calls) = store(dir.path(), false, true);
        let path = store.token_path(ACCOUNT);
        fs::write(&path, b"\x80not json").unwrap();

        assert!(matches!(store.obtain(ACCOUNT), Err(AuthError::Denied(_))));
        assert_eq!(calls.authorize.get(), 1);
        assert!(!path.exists());
    }

    #[test]
    fn test_interactive_failure_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _calls) = store(dir.path(), false, true);
        assert!(store.obtain(ACCOUNT).is_err());
        assert!(!store.token_path(ACCOUNT).exists());
    }
}
