use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn};

use ytqueue::config::{
    UploaderConfig, DEFAULT_CATEGORY_ID, DEFAULT_CLIENT_SECRETS_FILE, DEFAULT_MANIFEST_FILE,
    DEFAULT_OAUTH_PORT, DEFAULT_TOKEN_DIR, DEFAULT_UPLOAD_BASE_URL, DEFAULT_VIDEOS_DIRECTORY,
    UPLOAD_SCOPE,
};
use ytqueue::credentials::{CredentialStore, GoogleOAuth, MissingClientSecrets, OAuthClient};
use ytqueue::manifest::Manifest;
use ytqueue::{RunError, RunOutcome, SessionCache, UploadCoordinator, YoutubeClientFactory};

const EXIT_SUCCESS: u8 = 0;
const EXIT_FAILURE: u8 = 1;
const EXIT_NO_VIDEO_DIR: u8 = 2;
const EXIT_BAD_MANIFEST: u8 = 3;
const EXIT_NOTHING_PENDING: u8 = 4;

/// Upload the next pending video from a CSV manifest to YouTube.
#[derive(Parser)]
#[command(name = "ytqueue", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct AuthOptions {
    /// Google OAuth client secrets file
    #[arg(long, default_value = DEFAULT_CLIENT_SECRETS_FILE)]
    client_secrets: PathBuf,

    /// Directory holding per-account credential files
    #[arg(long, default_value = DEFAULT_TOKEN_DIR)]
    token_dir: PathBuf,

    /// Loopback port for the OAuth redirect (0 = any free port)
    #[arg(long, default_value_t = DEFAULT_OAUTH_PORT)]
    oauth_port: u16,

    /// Print the consent URL instead of launching a browser
    #[arg(long)]
    no_browser: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Process the next pending manifest row (one upload per invocation)
    Run {
        /// Manifest CSV path
        #[arg(short, long, default_value = DEFAULT_MANIFEST_FILE)]
        manifest: PathBuf,

        /// Directory the manifest's filenames are relative to
        #[arg(short, long, default_value = DEFAULT_VIDEOS_DIRECTORY)]
        videos: PathBuf,

        /// YouTube category ID for uploads (default: 22, People & Blogs)
        #[arg(long, default_value = DEFAULT_CATEGORY_ID)]
        category_id: String,

        /// Upload endpoint base URL
        #[arg(long, default_value = DEFAULT_UPLOAD_BASE_URL)]
        upload_base_url: String,

        #[command(flatten)]
        auth: AuthOptions,
    },

    /// Authorize an account ahead of time and cache its credentials
    Auth {
        /// Account identifier (usually the Google account email)
        #[arg(short, long)]
        account: String,

        #[command(flatten)]
        auth: AuthOptions,
    },

    /// Summarise the manifest without changing it
    Status {
        /// Manifest CSV path
        #[arg(short, long, default_value = DEFAULT_MANIFEST_FILE)]
        manifest: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match execute(cli) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("unexpected error: {e:#}");
            ExitCode::from(EXIT_FAILURE)
        }
    }
}

fn execute(cli: Cli) -> Result<u8> {
    match cli.command {
        Commands::Run {
            manifest,
            videos,
            category_id,
            upload_base_url,
            auth,
        } => {
            let cfg = UploaderConfig {
                manifest_path: manifest,
                videos_dir: videos,
                category_id,
                upload_base_url,
                ..config_with(auth)
            };
            run(&cfg)
        }

        Commands::Auth { account, auth } => {
            let cfg = config_with(auth);
            let store = credential_store(&cfg);
            match store.obtain(&account) {
                Ok(_) => {
                    info!(
                        "'{account}' is authorized; credentials cached at {}",
                        store.token_path(&account).display()
                    );
                    Ok(EXIT_SUCCESS)
                }
                Err(e) => {
                    error!("could not authorize '{account}': {e}");
                    Ok(EXIT_FAILURE)
                }
            }
        }

        Commands::Status { manifest } => status(&manifest),
    }
}

fn config_with(auth: AuthOptions) -> UploaderConfig {
    UploaderConfig {
        client_secrets: auth.client_secrets,
        token_dir: auth.token_dir,
        oauth_port: auth.oauth_port,
        open_browser: !auth.no_browser,
        ..Default::default()
    }
}

/// Build the credential store. Missing client secrets only matter once a
/// refresh or consent flow is actually needed.
fn credential_store(cfg: &UploaderConfig) -> CredentialStore {
    match OAuthClient::from_file(&cfg.client_secrets) {
        Ok(client) => {
            let oauth = GoogleOAuth::new(
                client,
                vec![UPLOAD_SCOPE.to_string()],
                cfg.oauth_port,
                cfg.open_browser,
            );
            CredentialStore::new(&cfg.token_dir, Box::new(oauth.clone()), Box::new(oauth))
        }
        Err(e) => {
            warn!("{e}; only cached, unexpired credentials can be used");
            let reason = e.to_string();
            CredentialStore::new(
                &cfg.token_dir,
                Box::new(MissingClientSecrets::new(reason.clone())),
                Box::new(MissingClientSecrets::new(reason)),
            )
        }
    }
}

fn run(cfg: &UploaderConfig) -> Result<u8> {
    let factory = YoutubeClientFactory::new(cfg.upload_base_url.clone())
        .context("failed to build HTTP client")?;
    let sessions = SessionCache::new(credential_store(cfg), factory);
    let mut coordinator = UploadCoordinator::new(sessions, cfg.category_id.clone());

    match coordinator.run_once(&cfg.manifest_path, &cfg.videos_dir) {
        Ok(RunOutcome::NothingToDo) => Ok(EXIT_NOTHING_PENDING),
        Ok(RunOutcome::Processed {
            row,
            filename,
            status,
            ..
        }) => {
            info!("row {} ('{filename}') is now '{status}'", row + 1);
            Ok(EXIT_SUCCESS)
        }
        Err(RunError::VideoDirMissing(dir)) => {
            error!(
                "video directory {} not found; create it and place your videos inside",
                dir.display()
            );
            Ok(EXIT_NO_VIDEO_DIR)
        }
        Err(RunError::Manifest(e)) => {
            error!("{e}");
            Ok(EXIT_BAD_MANIFEST)
        }
        Err(e @ RunError::Save(_)) => Err(e.into()),
    }
}

fn status(path: &std::path::Path) -> Result<u8> {
    let manifest = match Manifest::load(path) {
        Ok(manifest) => manifest,
        Err(e) => {
            error!("{e}");
            return Ok(EXIT_BAD_MANIFEST);
        }
    };

    println!("{}: {} rows", path.display(), manifest.len());
    for (status, count) in manifest.status_counts() {
        let label = if status.is_empty() { "(blank)" } else { status.as_str() };
        println!("  {label:<24} {count}");
    }

    let next = manifest.items().find(|item| item.is_pending());
    match next {
        Some(item) => {
            println!(
                "next: row {} '{}' for {}",
                item.index + 1,
                item.filename,
                if item.account().is_empty() { "(no account)" } else { item.account() }
            );
            Ok(EXIT_SUCCESS)
        }
        None => {
            println!("next: nothing pending");
            Ok(EXIT_NOTHING_PENDING)
        }
    }
}
