use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use log::{info, warn};
use rand::RngCore;
use reqwest::blocking::Client;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use url::Url;

use super::callback::LoopbackListener;
use super::{AuthError, CredentialBundle, InteractiveAuthorizer, TokenRefresher};

const DEFAULT_AUTH_URI: &str = "https://accounts.google.com/o/oauth2/auth";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";

/// Application credentials from a Google `client_secrets.json`.
#[derive(Debug, Clone, Deserialize)]
pub struct OAuthClient {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_auth_uri() -> String {
    DEFAULT_AUTH_URI.to_string()
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Deserialize)]
struct ClientSecretsFile {
    installed: Option<OAuthClient>,
    web: Option<OAuthClient>,
}

impl OAuthClient {
    /// Parse either the `installed` or the `web` section of a client secrets document.
    pub fn from_json(json: &str) -> Result<Self, AuthError> {
        let file: ClientSecretsFile =
            serde_json::from_str(json).map_err(|e| AuthError::ClientSecrets(e.to_string()))?;
        file.installed
            .or(file.web)
            .ok_or_else(|| AuthError::ClientSecrets("no \"installed\" or \"web\" section".into()))
    }

    pub fn from_file(path: &Path) -> Result<Self, AuthError> {
        let json = fs::read_to_string(path)
            .map_err(|e| AuthError::ClientSecrets(format!("{}: {e}", path.display())))?;
        Self::from_json(&json)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

impl TokenResponse {
    fn into_bundle(self, previous: Option<&CredentialBundle>) -> CredentialBundle {
        let scopes = match self.scope {
            Some(scope) => scope.split_whitespace().map(String::from).collect(),
            None => previous.map(|b| b.scopes.clone()).unwrap_or_default(),
        };
        CredentialBundle {
            access_token: self.access_token,
            refresh_token: self
                .refresh_token
                .or_else(|| previous.and_then(|b| b.refresh_token.clone())),
            expiry: self.expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
            scopes,
        }
    }
}

/// Google OAuth 2.0 installed-application flow with a loopback redirect.
#[derive(Clone)]
pub struct GoogleOAuth {
    client: OAuthClient,
    scopes: Vec<String>,
    port: u16,
    open_browser: bool,
    http: Client,
}

impl GoogleOAuth {
    pub fn new(client: OAuthClient, scopes: Vec<String>, port: u16, open_browser: bool) -> Self {
        Self {
            client,
            scopes,
            port,
            open_browser,
            http: Client::new(),
        }
    }

    /// Consent URL for `account_id`, carrying `state` and the PKCE challenge.
    fn consent_url(
        &self,
        account_id: &str,
        redirect_uri: &str,
        state: &str,
        challenge: &str,
    ) -> Result<Url, AuthError> {
        let scope = self.scopes.join(" ");
        Url::parse_with_params(
            &self.client.auth_uri,
            [
                ("response_type", "code"),
                ("client_id", self.client.client_id.as_str()),
                ("redirect_uri", redirect_uri),
                ("scope", scope.as_str()),
                ("state", state),
                ("code_challenge", challenge),
                ("code_challenge_method", "S256"),
                ("access_type", "offline"),
                ("prompt", "consent"),
                ("login_hint", account_id),
            ],
        )
        .map_err(|e| AuthError::ClientSecrets(format!("bad auth_uri: {e}")))
    }

    fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
        verifier: &str,
    ) -> Result<CredentialBundle, AuthError> {
        let token = self
            .request_token(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
                ("redirect_uri", redirect_uri),
                ("code_verifier", verifier),
            ])
            .map_err(AuthError::TokenExchange)?;
        Ok(token.into_bundle(None))
    }

    fn request_token(&self, form: &[(&str, &str)]) -> Result<TokenResponse, String> {
        let response = self
            .http
            .post(&self.client.token_uri)
            .form(form)
            .send()
            .map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(format!("HTTP {status}: {}", body.trim()));
        }
        response.json().map_err(|e| e.to_string())
    }
}

impl InteractiveAuthorizer for GoogleOAuth {
    fn authorize(&self, account_id: &str) -> Result<CredentialBundle, AuthError> {
        let listener = LoopbackListener::bind(self.port)?;
        let redirect_uri = listener.redirect_uri()?;

        let state = random_token(24);
        let verifier = random_token(64);
        let challenge = pkce_challenge(&verifier);
        let url = self.consent_url(account_id, &redirect_uri, &state, &challenge)?;

        info!("open this URL to authorize '{account_id}':\n{url}");
        if self.open_browser {
            if let Err(e) = open_in_browser(url.as_str()) {
                warn!("could not launch a browser ({e}); open the URL manually");
            }
        }

        let code = listener.wait_for_code(&state)?;
        self.exchange_code(&code, &redirect_uri, &verifier)
    }
}

impl TokenRefresher for GoogleOAuth {
    fn refresh(&self, bundle: &CredentialBundle) -> Result<CredentialBundle, AuthError> {
        let refresh_token = bundle
            .refresh_token
            .as_deref()
            .ok_or_else(|| AuthError::Refresh("no refresh token".into()))?;
        let token = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("client_id", self.client.client_id.as_str()),
                ("client_secret", self.client.client_secret.as_str()),
            ])
            .map_err(AuthError::Refresh)?;
        Ok(token.into_bundle(Some(bundle)))
    }
}

/// Stand-in used when no client secrets could be loaded: cached tokens keep
/// working, anything that needs the OAuth client fails with the load error.
pub struct MissingClientSecrets {
    reason: String,
}

impl MissingClientSecrets {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl InteractiveAuthorizer for MissingClientSecrets {
    fn authorize(&self, _account_id: &str) -> Result<CredentialBundle, AuthError> {
        Err(AuthError::ClientSecrets(self.reason.clone()))
    }
}

impl TokenRefresher for MissingClientSecrets {
    fn refresh(&self, _bundle: &CredentialBundle) -> Result<CredentialBundle, AuthError> {
        Err(AuthError::ClientSecrets(self.reason.clone()))
    }
}

/// URL-safe random string built from `bytes` random bytes.
fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// PKCE S256 challenge: base64url(sha256(verifier)).
fn pkce_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

fn open_in_browser(url: &str) -> std::io::Result<()> {
    let mut command = if cfg!(target_os = "macos") {
        Command::new("open")
    } else if cfg!(target_os = "windows") {
        let mut c = Command::new("rundll32");
        c.arg("url.dll,FileProtocolHandler");
        c
    } else {
        Command::new("xdg-open")
    };
    command
        .arg(url)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;
    Ok(())
}
