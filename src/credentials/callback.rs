use std::collections::HashMap;
use std::io;
use std::net::Ipv4Addr;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Html;
use axum::routing::get;
use axum::Router;
use log::{debug, warn};
use tokio::net::TcpListener;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::{mpsc, oneshot};

use super::AuthError;

const SUCCESS_PAGE: &str = "<html><body><h3>Authorization complete.</h3>\
<p>You may close this window and return to the terminal.</p></body></html>";
const FAILURE_PAGE: &str = "<html><body><h3>Authorization failed.</h3>\
<p>Check the terminal for details.</p></body></html>";

/// Query parameters delivered to the loopback redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackParams {
    Code { code: String, state: Option<String> },
    Error { error: String, description: Option<String> },
    /// A request carrying neither, e.g. the browser probing `/`.
    Unrelated,
}

impl CallbackParams {
    pub fn from_query(query: &HashMap<String, String>) -> Self {
        let get = |key: &str| query.get(key).cloned();
        match (get("code"), get("error")) {
            (_, Some(error)) => CallbackParams::Error {
                error,
                description: get("error_description"),
            },
            (Some(code), None) => CallbackParams::Code {
                code,
                state: get("state"),
            },
            (None, None) => CallbackParams::Unrelated,
        }
    }
}

/// One-shot HTTP server on `127.0.0.1` that receives the OAuth redirect.
///
/// The socket is bound up front so the redirect URI is known before the
/// consent URL is built; requests queue until [`wait_for_code`] serves them.
///
/// [`wait_for_code`]: LoopbackListener::wait_for_code
pub struct LoopbackListener {
    runtime: Runtime,
    listener: TcpListener,
}

impl LoopbackListener {
    /// Bind to `port`; `0` picks an ephemeral port.
    pub fn bind(port: u16) -> io::Result<Self> {
        let runtime = Builder::new_current_thread().enable_all().build()?;
        let listener = runtime.block_on(TcpListener::bind((Ipv4Addr::LOCALHOST, port)))?;
        Ok(Self { runtime, listener })
    }

    pub fn port(&self) -> io::Result<u16> {
        Ok(self.listener.local_addr()?.port())
    }

    pub fn redirect_uri(&self) -> io::Result<String> {
        Ok(format!("http://{}:{}/", Ipv4Addr::LOCALHOST, self.port()?))
    }

    /// Serve requests until one carries the authorization code or an error.
    ///
    /// Blocks indefinitely; the user may take as long as they like. Stray
    /// connections and unrelated paths get a response and are otherwise
    /// ignored.
    pub fn wait_for_code(self, expected_state: &str) -> Result<String, AuthError> {
        let Self { runtime, listener } = self;
        let (tx, mut rx) = mpsc::channel(1);
        let app = Router::new().route("/", get(receive)).with_state(tx);

        let received = runtime.block_on(async move {
            let (stop_tx, stop_rx) = oneshot::channel::<()>();
            let server = tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = stop_rx.await;
                    })
                    .await
            });

            let params = rx.recv().await;
            let _ = stop_tx.send(());
            match server.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("authorization callback server error: {e}"),
                Err(e) => warn!("authorization callback server stopped abnormally: {e}"),
            }
            params
        });

        match received {
            Some(CallbackParams::Code { code, state }) => {
                if state.as_deref() != Some(expected_state) {
                    return Err(AuthError::StateMismatch);
                }
                Ok(code)
            }
            Some(CallbackParams::Error { error, description }) => {
                let detail = match description {
                    Some(d) => format!("{error}: {d}"),
                    None => error,
                };
                Err(AuthError::Denied(detail))
            }
            Some(CallbackParams::Unrelated) | None => Err(AuthError::Callback(
                "callback server stopped before the redirect arrived".into(),
            )),
        }
    }
}

async fn receive(
    State(tx): State<mpsc::Sender<CallbackParams>>,
    Query(query): Query<HashMap<String, String>>,
) -> (StatusCode, Html<&'static str>) {
    let params = CallbackParams::from_query(&query);
    let page = match params {
        CallbackParams::Code { .. } => SUCCESS_PAGE,
        CallbackParams::Error { .. } => FAILURE_PAGE,
        CallbackParams::Unrelated => return (StatusCode::NOT_FOUND, Html("")),
    };
    if tx.try_send(params).is_err() {
        debug!("ignoring repeated authorization callback");
    }
    (StatusCode::OK, Html(page))
}
