//! SSO portal integrations: login via the device flow, token caching, and
//! keeping the integration's SsoRole sessions in step with the portal.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::DesktopBridge;
use crate::error::{Error, Result};
use crate::keychain;
use crate::models::{Session, SessionDetails, SessionStatus, SsoIntegration};
use crate::notifier::SessionEvent;
use crate::oidc::{AccessToken, OidcDeviceFlowClient};
use crate::sso::{list_role_assignments, SsoPortal};

use super::validation::AWS_REGIONS;
use super::{SessionContext, SessionLocks};

/// Outcome of `sync_sessions`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub sessions_added: Vec<Session>,
    pub sessions_deleted: Vec<Session>,
}

pub struct SsoIntegrationService {
    ctx: Arc<SessionContext>,
    oidc: OidcDeviceFlowClient,
    portal: Arc<dyn SsoPortal>,
    bridge: Arc<dyn DesktopBridge>,
    /// One device flow per integration; concurrent starts share its token.
    login_locks: SessionLocks,
    login_cancel: Mutex<CancellationToken>,
}

impl SsoIntegrationService {
    pub fn new(
        ctx: Arc<SessionContext>,
        oidc: OidcDeviceFlowClient,
        portal: Arc<dyn SsoPortal>,
        bridge: Arc<dyn DesktopBridge>,
    ) -> Self {
        Self {
            ctx,
            oidc,
            portal,
            bridge,
            login_locks: SessionLocks::default(),
            login_cancel: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn portal(&self) -> &Arc<dyn SsoPortal> {
        &self.portal
    }

    pub fn oidc(&self) -> &OidcDeviceFlowClient {
        &self.oidc
    }

    // ========================================================================
    // Integration records
    // ========================================================================

    fn validate(alias: &str, portal_url: &str, region: &str) -> Result<()> {
        if alias.trim().is_empty() {
            return Err(Error::validation("alias", "must not be empty"));
        }
        if !portal_url.starts_with("https://") {
            return Err(Error::validation(
                "portal_url",
                format!("'{}' is not an https URL", portal_url),
            ));
        }
        if !AWS_REGIONS.contains(&region) {
            return Err(Error::validation(
                "region",
                format!("'{}' is not an AWS region", region),
            ));
        }
        Ok(())
    }

    pub fn list_integrations(&self) -> Result<Vec<SsoIntegration>> {
        self.ctx.repository.get_sso_integrations()
    }

    pub fn get_integration(&self, integration_id: &str) -> Result<SsoIntegration> {
        self.ctx.repository.get_sso_integration(integration_id)
    }

    pub fn create_integration(
        &self,
        alias: &str,
        portal_url: &str,
        region: &str,
    ) -> Result<SsoIntegration> {
        Self::validate(alias, portal_url, region)?;
        let integration = SsoIntegration::new(alias.trim(), portal_url.trim(), region);
        self.ctx.repository.add_sso_integration(integration.clone())?;
        info!(integration_id = %integration.id, alias = %integration.alias, "SSO integration created");
        Ok(integration)
    }

    /// Changing the portal or region invalidates the cached token.
    pub fn update_integration(
        &self,
        integration_id: &str,
        alias: &str,
        portal_url: &str,
        region: &str,
    ) -> Result<SsoIntegration> {
        Self::validate(alias, portal_url, region)?;
        let mut integration = self.ctx.repository.get_sso_integration(integration_id)?;
        if integration.portal_url != portal_url || integration.region != region {
            self.ctx
                .keychain
                .delete(&keychain::sso_access_token(integration_id))?;
            integration.access_token_expiration = None;
        }
        integration.alias = alias.trim().to_string();
        integration.portal_url = portal_url.trim().to_string();
        integration.region = region.to_string();
        self.ctx.repository.update_sso_integration(&integration)?;
        Ok(integration)
    }

    /// Log out (removing the integration's sessions) and drop the record.
    pub async fn delete_integration(&self, integration_id: &str) -> Result<()> {
        self.logout(integration_id).await?;
        self.ctx.repository.delete_sso_integration(integration_id)?;
        info!(integration_id = %integration_id, "SSO integration deleted");
        Ok(())
    }

    // ========================================================================
    // Login and tokens
    // ========================================================================

    /// Abort a device flow in progress. The login fails with `ModalClosed`.
    pub fn cancel_login(&self) {
        let mut token = self
            .login_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        token.cancel();
        *token = CancellationToken::new();
    }

    fn current_cancel_token(&self) -> CancellationToken {
        self.login_cancel
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Run the device flow and store the resulting token.
    pub async fn login(&self, integration_id: &str) -> Result<AccessToken> {
        let _guard = self.login_locks.acquire(integration_id).await;
        self.login_locked(integration_id).await
    }

    async fn login_locked(&self, integration_id: &str) -> Result<AccessToken> {
        let mut integration = self.ctx.repository.get_sso_integration(integration_id)?;
        let cancel = self.current_cancel_token();
        let portal_url = integration.portal_url.clone();
        let region = integration.region.clone();

        let registration = self.oidc.register_client(&portal_url, &region).await?;
        let authorization = self
            .oidc
            .start_device_authorization(&portal_url, &region, &registration)
            .await?;

        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::ModalClosed),
            result = self.bridge.open_verification_window(&registration, &authorization) => result?,
        }

        let token = self
            .oidc
            .poll_token(&portal_url, &region, &registration, &authorization, &cancel)
            .await?;

        self.ctx
            .keychain
            .set(&keychain::sso_access_token(integration_id), &token.token)?;
        integration.access_token_expiration = Some(token.expires_at);
        self.ctx.repository.update_sso_integration(&integration)?;
        info!(integration_id = %integration_id, expires = %token.expires_at, "SSO login complete");
        Ok(token)
    }

    fn cached_token(&self, integration_id: &str) -> Result<Option<String>> {
        let integration = self.ctx.repository.get_sso_integration(integration_id)?;
        if !integration
            .access_token_expiration
            .is_some_and(|exp| exp > Utc::now())
        {
            return Ok(None);
        }
        self.ctx
            .keychain
            .get(&keychain::sso_access_token(integration_id))
    }

    /// The cached access token, logging in again once it has expired.
    pub async fn access_token(&self, integration_id: &str) -> Result<String> {
        if let Some(token) = self.cached_token(integration_id)? {
            return Ok(token);
        }

        let _guard = self.login_locks.acquire(integration_id).await;
        // A login that held the lock may have just stored a token.
        if let Some(token) = self.cached_token(integration_id)? {
            return Ok(token);
        }

        debug!(integration_id = %integration_id, "SSO token missing or expired, logging in");
        Ok(self.login_locked(integration_id).await?.token)
    }

    /// Forget the cached token so the next `access_token` logs in.
    pub fn invalidate_token(&self, integration_id: &str) -> Result<()> {
        self.ctx
            .keychain
            .delete(&keychain::sso_access_token(integration_id))?;
        let mut integration = self.ctx.repository.get_sso_integration(integration_id)?;
        integration.access_token_expiration = None;
        self.ctx.repository.update_sso_integration(&integration)
    }

    /// Drop the token and every session that came from this integration.
    pub async fn logout(&self, integration_id: &str) -> Result<()> {
        self.invalidate_token(integration_id)?;
        let sessions = self.integration_sessions(integration_id)?;
        let removed = sessions.len();
        for session in sessions {
            self.remove_session(&session).await?;
        }
        info!(integration_id = %integration_id, removed, "SSO integration logged out");
        Ok(())
    }

    // ========================================================================
    // Session sync
    // ========================================================================

    fn integration_sessions(&self, integration_id: &str) -> Result<Vec<Session>> {
        Ok(self
            .ctx
            .repository
            .get_sessions()?
            .into_iter()
            .filter(|s| s.details.sso_integration_id() == Some(integration_id))
            .collect())
    }

    async fn remove_session(&self, session: &Session) -> Result<()> {
        let _guard = self.ctx.locks.acquire(&session.session_id).await;
        let _target = self.ctx.lock_target(session).await;
        // The listing may predate a start or a demotion.
        let session = match self.ctx.repository.get_session_by_id(&session.session_id) {
            Ok(session) => session,
            Err(Error::SessionNotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        if session.status != SessionStatus::Inactive {
            self.ctx.remove_profile(&session)?;
        }
        self.ctx.repository.delete_session(&session.session_id)?;
        self.ctx.locks.forget(&session.session_id);
        self.ctx
            .notifier
            .publish(SessionEvent::Removed(session.session_id.clone()));
        Ok(())
    }

    /// Create a session for every role the portal grants that we don't have
    /// yet, and remove sessions for roles that are gone.
    pub async fn sync_sessions(&self, integration_id: &str) -> Result<SyncReport> {
        let integration = self.ctx.repository.get_sso_integration(integration_id)?;
        let token = self.access_token(integration_id).await?;
        let assignments =
            list_role_assignments(self.portal.as_ref(), &integration.region, &token).await?;
        let existing = self.integration_sessions(integration_id)?;

        let granted: HashSet<String> = assignments.iter().map(|a| a.role_arn()).collect();
        let known: HashSet<String> = existing
            .iter()
            .filter_map(|s| s.details.role_arn().map(str::to_string))
            .collect();
        let profile_id = self.ctx.repository.default_profile_id()?;

        let mut report = SyncReport::default();

        for assignment in &assignments {
            let role_arn = assignment.role_arn();
            if known.contains(&role_arn) {
                continue;
            }
            let session = Session::new(
                assignment.account_name.clone(),
                integration.region.clone(),
                SessionDetails::SsoRole {
                    role_arn,
                    sso_integration_id: integration_id.to_string(),
                    profile_id: profile_id.clone(),
                },
            );
            self.ctx.repository.add_session(session.clone())?;
            self.ctx
                .notifier
                .publish(SessionEvent::Added(session.session_id.clone()));
            report.sessions_added.push(session);
        }

        for session in existing {
            let still_granted = session
                .details
                .role_arn()
                .is_some_and(|arn| granted.contains(arn));
            if still_granted {
                continue;
            }
            if let Err(e) = self.remove_session(&session).await {
                warn!(session_id = %session.session_id, error = %e, "Failed to remove revoked SSO session");
                continue;
            }
            report.sessions_deleted.push(session);
        }

        info!(
            integration_id = %integration_id,
            added = report.sessions_added.len(),
            deleted = report.sessions_deleted.len(),
            "SSO sessions synced"
        );
        self.ctx.notifier.publish(SessionEvent::IntegrationSynced {
            integration_id: integration_id.to_string(),
            added: report.sessions_added.len(),
            deleted: report.sessions_deleted.len(),
        });
        Ok(report)
    }
}
