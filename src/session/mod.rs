use log::{info, warn};

use crate::credentials::CredentialStore;
use crate::youtube::ClientFactory;

/// An authenticated client bound to one account for the rest of the run.
pub struct AuthSession<C> {
    account_id: String,
    client: C,
}

impl<C> AuthSession<C> {
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn client(&self) -> &C {
        &self.client
    }
}

/// Hands out [`AuthSession`]s, reusing the last one while the account stays
/// the same.
pub struct SessionCache<F: ClientFactory> {
    store: CredentialStore,
    factory: F,
    current: Option<AuthSession<F::Client>>,
}

impl<F: ClientFactory> SessionCache<F> {
    pub fn new(store: CredentialStore, factory: F) -> Self {
        Self {
            store,
            factory,
            current: None,
        }
    }

    /// Account of the cached session, if any.
    pub fn current_account(&self) -> Option<&str> {
        self.current.as_ref().map(AuthSession::account_id)
    }

    /// Session for `account_id`, or `None` if credentials could not be obtained.
    ///
    /// A failed acquisition leaves any previously cached session in place.
    pub fn acquire(&mut self, account_id: &str) -> Option<&AuthSession<F::Client>> {
        if self.current_account() != Some(account_id) {
            info!("switching authentication to '{account_id}'");
            match self.store.obtain(account_id) {
                Ok(credential) => {
                    let client = self.factory.build(&credential);
                    self.current = Some(AuthSession {
                        account_id: account_id.to_string(),
                        client,
                    });
                    info!("authenticated as '{account_id}'");
                }
                Err(e) => {
                    warn!("could not authenticate '{account_id}': {e}");
                    return None;
                }
            }
        }
        self.current.as_ref()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::{Cell, RefCell};
    use std::path::{Path, PathBuf};
    use std::rc::Rc;

    use crate::credentials::CredentialBundle;
    use crate::youtube::{ClientFactory, UploadError, UploadRequest, VideoUploader};

    /// Everything the fake uploader was asked to do.
    #[derive(Default)]
    pub struct UploadLog {
        pub built: Cell<usize>,
        pub requests: RefCell<Vec<(String, UploadRequest, PathBuf)>>,
    }

    pub struct FakeUploader {
        token: String,
        log: Rc<UploadLog>,
        succeed: bool,
    }

    impl VideoUploader for FakeUploader {
        fn upload(&self, request: &UploadRequest, file: &Path) -> Result<String, UploadError> {
            self.log.requests.borrow_mut().push((
                self.token.clone(),
                request.clone(),
                file.to_path_buf(),
            ));
            if self.succeed {
                Ok("vid123".to_string())
            } else {
                Err(UploadError::Rejected {
                    stage: "media upload",
                    status: 503,
                    body: "backend error".into(),
                })
            }
        }
    }

    pub struct FakeFactory {
        pub log: Rc<UploadLog>,
        pub succeed: bool,
    }

    impl ClientFactory for FakeFactory {
        type Client = FakeUploader;

        fn build(&self, credential: &CredentialBundle) -> FakeUploader {
            self.log.built.set(self.log.built.get() + 1);
            FakeUploader {
                token: credential.access_token.clone(),
                log: Rc::clone(&self.log),
                succeed: self.succeed,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use super::testing::{FakeFactory, UploadLog};
    use super::*;
    use crate::credentials::testing::{store, Calls};

    fn cache(
        dir: &std::path::Path,
        authorize_ok: bool,
    ) -> (SessionCache<FakeFactory>, Rc<Calls>, Rc<UploadLog>) {
        let (store, calls) = store(dir, authorize_ok, true);
        let log = Rc::new(UploadLog::default());
        let factory = FakeFactory {
            log: Rc::clone(&log),
            succeed: true,
        };
        (SessionCache::new(store, factory), calls, log)
    }

    #[test]
    fn test_same_account_reuses_session() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sessions, calls, log) = cache(dir.path(), true);

        assert!(sessions.acquire("a@example.com").is_some());
        assert!(sessions.acquire("a@example.com").is_some());
        assert_eq!(calls.authorize.get(), 1);
        assert_eq!(log.built.get(), 1);
    }

    #[test]
    fn test_different_account_acquires_again() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sessions, calls, log) = cache(dir.path(), true);

        sessions.acquire("a@example.com").unwrap();
        let session = sessions.acquire("b@example.com").unwrap();
        assert_eq!(session.account_id(), "b@example.com");
        assert_eq!(calls.authorize.get(), 2);
        assert_eq!(log.built.get(), 2);
        assert_eq!(*calls.accounts.borrow(), vec!["a@example.com", "b@example.com"]);
    }

    #[test]
    fn test_failed_acquisition_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let (mut sessions, calls, log) = cache(dir.path(), false);

        assert!(sessions.acquire("a@example.com").is_none());
        assert_eq!(calls.authorize.get(), 1);
        assert_eq!(log.built.get(), 0);
        assert_eq!(sessions.current_account(), None);
    }
}
