use anyhow::Result;
use clap::Subcommand;
use tokio_util::sync::CancellationToken;

use skyswitch_core::models::SsoIntegration;
use skyswitch_core::SessionRegistry;

#[derive(Subcommand)]
pub enum SsoAction {
    /// List integrations and whether they are logged in.
    List,
    /// Register a portal, e.g. https://acme.awsapps.com/start.
    Add {
        alias: String,
        portal_url: String,
        /// Region the portal lives in (defaults to the configured region).
        #[arg(long)]
        region: Option<String>,
    },
    /// Log in if needed and create sessions for every granted role.
    Sync { integration: String },
    /// Forget the token and remove the integration's sessions.
    Logout { integration: String },
}

/// Resolve by id, then alias.
fn find_integration(registry: &SessionRegistry, reference: &str) -> Result<SsoIntegration> {
    let integrations = registry.sso_integrations().list_integrations()?;
    integrations
        .iter()
        .find(|i| i.id == reference)
        .or_else(|| integrations.iter().find(|i| i.alias == reference))
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("No SSO integration '{}'", reference))
}

pub async fn handle_sso(
    action: SsoAction,
    registry: &SessionRegistry,
    cancel: &CancellationToken,
) -> Result<()> {
    let sso = registry.sso_integrations();
    match action {
        SsoAction::List => {
            let integrations = sso.list_integrations()?;
            if integrations.is_empty() {
                println!("No SSO integrations");
            }
            for i in integrations {
                let state = if i.is_online() { "online" } else { "offline" };
                println!("{}  {}  {}  {}  {}", i.id, i.alias, i.portal_url, i.region, state);
            }
        }
        SsoAction::Add {
            alias,
            portal_url,
            region,
        } => {
            let region = region.unwrap_or_else(|| registry.context().config.default_region.clone());
            let integration = sso.create_integration(&alias, &portal_url, &region)?;
            println!("Added {} ({})", integration.alias, integration.id);
        }
        SsoAction::Sync { integration } => {
            let integration = find_integration(registry, &integration)?;
            let report =
                crate::interruptible(registry, cancel, sso.sync_sessions(&integration.id)).await?;
            for session in &report.sessions_added {
                println!("+ {} {}", session.session_name, session.details.role_arn().unwrap_or_default());
            }
            for session in &report.sessions_deleted {
                println!("- {} {}", session.session_name, session.details.role_arn().unwrap_or_default());
            }
            println!(
                "{}: {} added, {} removed",
                integration.alias,
                report.sessions_added.len(),
                report.sessions_deleted.len()
            );
        }
        SsoAction::Logout { integration } => {
            let integration = find_integration(registry, &integration)?;
            sso.logout(&integration.id).await?;
            println!("Logged out of {}", integration.alias);
        }
    }
    Ok(())
}
