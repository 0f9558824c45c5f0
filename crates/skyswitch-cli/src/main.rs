//! skyswitch - switch cloud sessions from the terminal.
//!
//! Shares the session catalogue and credentials file with the desktop app.
//! Sessions are created there; this binary starts, stops and inspects them.

mod bridge;
mod sso_commands;

use std::future::Future;
use std::io;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use skyswitch_core::azure::AzCommand;
use skyswitch_core::config::APP_NAME;
use skyswitch_core::models::{CredentialsInfo, Session};
use skyswitch_core::oidc::HttpOidcTransport;
use skyswitch_core::sso::HttpSsoPortal;
use skyswitch_core::sts::AwsSdkSts;
use skyswitch_core::{
    Backends, CredentialFile, JsonWorkspaceRepository, Keychain, KeyringKeychain, MemoryKeychain,
    RotationService, SessionContext, SessionNotifier, SessionRegistry, WorkspaceConfig,
};

use bridge::TerminalBridge;

#[derive(Parser)]
#[command(name = "skyswitch", version, about = "Short-lived AWS and Azure credentials on demand")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level (RUST_LOG takes precedence).
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List sessions and their status.
    List,
    /// Start a session by name or id.
    Start { session: String },
    /// Stop a session by name or id.
    Stop { session: String },
    /// Refresh an active session's credentials now.
    Rotate { session: String },
    /// Delete a session.
    Delete {
        session: String,
        /// Delete even if chained sessions depend on it.
        #[arg(long)]
        force: bool,
    },
    /// Print fresh credentials as shell exports without starting the session.
    Credentials { session: String },
    /// SSO portal integrations.
    Sso {
        #[command(subcommand)]
        action: sso_commands::SsoAction,
    },
    /// Keep active sessions rotated until interrupted.
    Watch,
}

/// Initialize the tracing subscriber for logging
fn init_tracing(verbose: bool) {
    // RUST_LOG wins over --verbose
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn open_keychain() -> Arc<dyn Keychain> {
    let keyring = KeyringKeychain::new(APP_NAME);
    if keyring.is_available() {
        Arc::new(keyring)
    } else {
        warn!("OS keychain unavailable; secrets will not outlive this process");
        Arc::new(MemoryKeychain::new())
    }
}

fn build_registry(
    config: WorkspaceConfig,
    cancel: CancellationToken,
) -> Result<Arc<SessionRegistry>> {
    let workspace_path = config.workspace_file_path()?;
    let repository = JsonWorkspaceRepository::open(workspace_path.clone())
        .with_context(|| format!("Failed to open workspace {}", workspace_path.display()))?;
    let credential_file = CredentialFile::new(config.credentials_file_path()?);

    let ctx = Arc::new(SessionContext::new(
        Arc::new(repository),
        Arc::new(credential_file),
        open_keychain(),
        SessionNotifier::new(),
        Arc::new(config),
    ));

    let backends = Backends {
        sts: Arc::new(AwsSdkSts),
        bridge: Arc::new(TerminalBridge::new(cancel)),
        oidc: Arc::new(HttpOidcTransport::new().context("Failed to build SSO OIDC client")?),
        portal: Arc::new(HttpSsoPortal::new().context("Failed to build SSO portal client")?),
        azure: Arc::new(AzCommand::new()),
    };

    Ok(Arc::new(SessionRegistry::new(ctx, backends)))
}

/// Resolve a session by id, then by unique name.
fn find_session(registry: &SessionRegistry, reference: &str) -> Result<Session> {
    let sessions = registry.sessions()?;
    if let Some(session) = sessions.iter().find(|s| s.session_id == reference) {
        return Ok(session.clone());
    }
    let mut matches: Vec<Session> = sessions
        .into_iter()
        .filter(|s| s.session_name == reference)
        .collect();
    match matches.len() {
        0 => bail!("No session named '{}'", reference),
        1 => Ok(matches.remove(0)),
        n => bail!(
            "{} sessions are named '{}'; use one of the ids: {}",
            n,
            reference,
            matches
                .iter()
                .map(|s| s.session_id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Close open prompts and abort any SSO device flow in progress.
fn cancel_prompts(registry: &SessionRegistry, cancel: &CancellationToken) {
    cancel.cancel();
    registry.sso_integrations().cancel_login();
}

/// Run a registry call until it finishes or Ctrl-C arrives. On Ctrl-C the
/// call is cancelled and allowed to unwind, so a session being started
/// falls back to Inactive, then the process exits. A second Ctrl-C exits
/// immediately.
async fn interruptible<T>(
    registry: &SessionRegistry,
    cancel: &CancellationToken,
    op: impl Future<Output = skyswitch_core::Result<T>>,
) -> skyswitch_core::Result<T> {
    tokio::pin!(op);
    tokio::select! {
        result = &mut op => return result,
        _ = tokio::signal::ctrl_c() => {}
    }

    eprintln!("Interrupted, cancelling...");
    cancel_prompts(registry, cancel);
    tokio::select! {
        result = &mut op => {
            if let Err(e) = result {
                info!(error = %e, "Cancelled operation finished");
            }
        }
        _ = tokio::signal::ctrl_c() => {}
    }
    // A prompt's stdin reader may still be blocked; do not wait for it.
    std::process::exit(130)
}

fn print_sessions(sessions: &[Session]) {
    if sessions.is_empty() {
        println!("No sessions");
        return;
    }
    println!(
        "{:<36}  {:<24}  {:<12}  {:<8}  {:<16}  {}",
        "ID", "NAME", "KIND", "STATUS", "REGION", "EXPIRES"
    );
    for s in sessions {
        let expires = s
            .minutes_until_expiry()
            .map(|m| format!("{}m", m))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{:<36}  {:<24}  {:<12}  {:<8}  {:<16}  {}",
            s.session_id,
            s.session_name,
            s.kind().display_name(),
            format!("{:?}", s.status),
            s.region,
            expires
        );
    }
}

fn print_credentials(session: &Session, credentials: &CredentialsInfo) -> Result<()> {
    match credentials {
        CredentialsInfo::Aws(creds) => {
            println!("export AWS_ACCESS_KEY_ID={}", creds.access_key_id);
            println!("export AWS_SECRET_ACCESS_KEY={}", creds.secret_access_key);
            match &creds.session_token {
                Some(token) => println!("export AWS_SESSION_TOKEN={}", token),
                None => println!("unset AWS_SESSION_TOKEN"),
            }
            println!("export AWS_REGION={}", session.region);
        }
        CredentialsInfo::Azure(token) => {
            let json = serde_json::json!({
                "accessToken": token.access_token,
                "expiresOn": token.expiration.to_rfc3339(),
                "tenant": token.tenant_id,
                "subscription": token.subscription_id,
            });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
    }
    Ok(())
}

async fn watch(registry: Arc<SessionRegistry>, cancel: CancellationToken) -> Result<()> {
    let interval = registry.context().config.rotation_check_interval();
    {
        let registry = registry.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel_prompts(&registry, &cancel);
            }
        });
    }

    let mut events = registry.context().notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => info!(?event, "Session event"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed session events"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    eprintln!(
        "Rotating active sessions every {}s; Ctrl-C to stop",
        interval.as_secs()
    );
    RotationService::new(registry).run(interval, cancel).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = WorkspaceConfig::load().context("Failed to load configuration")?;
    let cancel = CancellationToken::new();
    let registry = build_registry(config, cancel.clone())?;

    match cli.command {
        Commands::List => print_sessions(&registry.sessions()?),
        Commands::Start { session } => {
            let session = find_session(&registry, &session)?;
            interruptible(&registry, &cancel, registry.start(&session.session_id))
                .await
                .with_context(|| format!("Failed to start '{}'", session.session_name))?;
            println!("Started {}", session.session_name);
        }
        Commands::Stop { session } => {
            let session = find_session(&registry, &session)?;
            registry
                .stop(&session.session_id)
                .await
                .with_context(|| format!("Failed to stop '{}'", session.session_name))?;
            println!("Stopped {}", session.session_name);
        }
        Commands::Rotate { session } => {
            let session = find_session(&registry, &session)?;
            interruptible(&registry, &cancel, registry.rotate(&session.session_id))
                .await
                .with_context(|| format!("Failed to rotate '{}'", session.session_name))?;
        }
        Commands::Delete { session, force } => {
            let session = find_session(&registry, &session)?;
            let dependents = registry.get_dependent_sessions(&session.session_id)?;
            if !dependents.is_empty() && !force {
                let names: Vec<&str> = dependents.iter().map(|s| s.session_name.as_str()).collect();
                bail!(
                    "'{}' is the parent of {}; pass --force to delete it anyway",
                    session.session_name,
                    names.join(", ")
                );
            }
            registry.delete(&session.session_id).await?;
            println!("Deleted {}", session.session_name);
        }
        Commands::Credentials { session } => {
            let session = find_session(&registry, &session)?;
            let credentials = interruptible(
                &registry,
                &cancel,
                registry.generate_credentials(&session.session_id),
            )
            .await?;
            print_credentials(&session, &credentials)?;
        }
        Commands::Sso { action } => {
            sso_commands::handle_sso(action, &registry, &cancel).await?;
        }
        Commands::Watch => watch(registry, cancel).await?,
    }

    Ok(())
}
