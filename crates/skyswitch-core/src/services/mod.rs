//! Session lifecycle.
//!
//! Every kind shares one state machine (`SessionService`) and plugs its
//! credential generation in through `SessionStrategy`:
//!
//! ```text
//! Inactive --start--> Pending --ok--> Active --stop--> Inactive
//!                        |
//!                        +--error--> Inactive
//! ```
//!
//! Lifecycle calls on one session are serialized by a per-session lock.
//! `start` refuses to wait for it; everything else queues.
//!
//! Sessions that materialize into the same place (one AWS named profile, or
//! the single Azure CLI login) additionally share a target lock, held only
//! while credentials are applied or removed. At most one session per target
//! is Active.

pub mod azure;
pub mod iam_role_chained;
pub mod iam_role_federated;
pub mod iam_user;
pub mod sso_integration;
pub mod sso_role;
pub mod validation;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, error, info, warn};

use crate::config::WorkspaceConfig;
use crate::credential_file::CredentialFile;
use crate::error::{Error, Result};
use crate::keychain::Keychain;
use crate::models::{
    CredentialsInfo, Session, SessionKind, SessionParams, SessionRequest, SessionStatus,
};
use crate::notifier::{SessionEvent, SessionNotifier};
use crate::repository::WorkspaceRepository;

pub use azure::AzureStrategy;
pub use iam_role_chained::IamRoleChainedStrategy;
pub use iam_role_federated::IamRoleFederatedStrategy;
pub use iam_user::IamUserStrategy;
pub use sso_integration::{SsoIntegrationService, SyncReport};
pub use sso_role::SsoRoleStrategy;

// ============================================================================
// Shared context
// ============================================================================

/// One async mutex per key: session ids, credential targets or SSO
/// integration ids.
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl SessionLocks {
    fn get(&self, session_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(session_id.to_string())
            .or_default()
            .clone()
    }

    /// Fail immediately if another lifecycle call holds the session.
    fn try_acquire(&self, session_id: &str) -> Option<OwnedMutexGuard<()>> {
        self.get(session_id).try_lock_owned().ok()
    }

    async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        self.get(session_id).lock_owned().await
    }

    fn forget(&self, session_id: &str) {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session_id);
    }
}

/// Where a started session's credentials land. Azure sessions all share
/// the CLI's one logged-in account.
fn credential_target(session: &Session) -> String {
    match session.details.profile_id() {
        Some(profile_id) => format!("profile:{}", profile_id),
        None => "azure-cli".to_string(),
    }
}

/// Everything strategies and the state machine share.
pub struct SessionContext {
    pub repository: Arc<dyn WorkspaceRepository>,
    pub credential_file: Arc<CredentialFile>,
    pub keychain: Arc<dyn Keychain>,
    pub notifier: SessionNotifier,
    pub config: Arc<WorkspaceConfig>,
    locks: SessionLocks,
    target_locks: SessionLocks,
}

impl SessionContext {
    pub fn new(
        repository: Arc<dyn WorkspaceRepository>,
        credential_file: Arc<CredentialFile>,
        keychain: Arc<dyn Keychain>,
        notifier: SessionNotifier,
        config: Arc<WorkspaceConfig>,
    ) -> Self {
        Self {
            repository,
            credential_file,
            keychain,
            notifier,
            config,
            locks: SessionLocks::default(),
            target_locks: SessionLocks::default(),
        }
    }

    /// Named profile the session writes into.
    pub fn profile_name(&self, session: &Session) -> Result<String> {
        let profile_id = session.details.profile_id().ok_or_else(|| {
            Error::InvalidResponse(format!(
                "{} sessions have no named profile",
                session.kind().display_name()
            ))
        })?;
        self.repository.get_profile_name(profile_id)
    }

    /// Write AWS credentials into the session's profile section.
    pub fn write_profile(&self, session: &Session, credentials: &CredentialsInfo) -> Result<()> {
        let creds = credentials.as_aws().ok_or_else(|| {
            Error::InvalidResponse("expected AWS credentials, got an Azure token".to_string())
        })?;
        let profile = self.profile_name(session)?;
        self.credential_file.write(&profile, creds, &session.region)
    }

    pub fn remove_profile(&self, session: &Session) -> Result<()> {
        let profile = self.profile_name(session)?;
        self.credential_file.remove(&profile)
    }

    /// Serialize writes to the session's profile or Azure login.
    pub(crate) async fn lock_target(&self, session: &Session) -> OwnedMutexGuard<()> {
        self.target_locks.acquire(&credential_target(session)).await
    }

    fn save_status(&self, session: &mut Session, status: SessionStatus) -> Result<()> {
        session.status = status;
        self.repository.update_session(session)?;
        self.notifier.status_changed(&session.session_id, status);
        Ok(())
    }
}

// ============================================================================
// Strategy
// ============================================================================

/// Per-kind credential generation and materialization.
///
/// The default `apply`/`deapply` write and remove the session's AWS
/// profile section; Azure overrides both.
#[async_trait]
pub trait SessionStrategy: Send + Sync {
    fn kind(&self) -> SessionKind;

    /// Produce fresh credentials. Must not touch the session's status.
    async fn generate(&self, ctx: &SessionContext, session: &Session) -> Result<CredentialsInfo>;

    async fn apply(
        &self,
        ctx: &SessionContext,
        session: &Session,
        credentials: &CredentialsInfo,
    ) -> Result<()> {
        ctx.write_profile(session, credentials)
    }

    async fn deapply(&self, ctx: &SessionContext, session: &Session) -> Result<()> {
        ctx.remove_profile(session)
    }

    /// Route secrets from create/update input to the keychain.
    fn store_secrets(
        &self,
        _ctx: &SessionContext,
        _session: &Session,
        _params: &SessionParams,
    ) -> Result<()> {
        Ok(())
    }

    /// Drop whatever `store_secrets` or `generate` left in the keychain.
    fn forget_secrets(&self, _ctx: &SessionContext, _session: &Session) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// State machine
// ============================================================================

/// Lifecycle operations for every session of one kind.
#[derive(Clone)]
pub struct SessionService {
    ctx: Arc<SessionContext>,
    strategy: Arc<dyn SessionStrategy>,
}

impl SessionService {
    pub fn new(ctx: Arc<SessionContext>, strategy: Arc<dyn SessionStrategy>) -> Self {
        Self { ctx, strategy }
    }

    pub fn kind(&self) -> SessionKind {
        self.strategy.kind()
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    fn check_kind(&self, request: &SessionRequest) -> Result<()> {
        if request.params.kind() != self.kind() {
            return Err(Error::validation(
                "kind",
                format!(
                    "expected {}, got {}",
                    self.kind().display_name(),
                    request.params.kind().display_name()
                ),
            ));
        }
        Ok(())
    }

    pub async fn create(&self, request: SessionRequest) -> Result<Session> {
        self.check_kind(&request)?;
        validation::validate_request(self.ctx.repository.as_ref(), &request)?;

        let session = Session::new(
            request.session_name.trim().to_string(),
            request.region.clone(),
            request.params.to_details(),
        );
        self.strategy
            .store_secrets(&self.ctx, &session, &request.params)?;
        if let Err(e) = self.ctx.repository.add_session(session.clone()) {
            let _ = self.strategy.forget_secrets(&self.ctx, &session);
            return Err(e);
        }

        info!(session_id = %session.session_id, kind = ?session.kind(), "Session created");
        self.ctx
            .notifier
            .publish(SessionEvent::Added(session.session_id.clone()));
        Ok(session)
    }

    /// Replace name, region and details. An active session is stopped,
    /// updated and started again so its profile reflects the change.
    pub async fn update(&self, session_id: &str, request: SessionRequest) -> Result<Session> {
        self.check_kind(&request)?;
        validation::validate_request(self.ctx.repository.as_ref(), &request)?;
        if request.params.parent_session_id() == Some(session_id) {
            return Err(Error::validation(
                "parent_session_id",
                "a session cannot be its own parent",
            ));
        }

        let was_active = {
            let _guard = self.ctx.locks.acquire(session_id).await;
            let mut session = self.ctx.repository.get_session_by_id(session_id)?;
            let was_active = session.status != SessionStatus::Inactive;
            if was_active {
                self.stop_locked(&mut session).await?;
            }

            session.session_name = request.session_name.trim().to_string();
            session.region = request.region.clone();
            session.details = request.params.to_details();
            self.strategy
                .store_secrets(&self.ctx, &session, &request.params)?;
            self.ctx.repository.update_session(&session)?;
            info!(session_id = %session_id, "Session updated");
            self.ctx
                .notifier
                .publish(SessionEvent::Updated(session_id.to_string()));
            was_active
        };

        if was_active {
            self.start(session_id).await?;
        }
        self.ctx.repository.get_session_by_id(session_id)
    }

    pub async fn start(&self, session_id: &str) -> Result<()> {
        let _guard = self
            .ctx
            .locks
            .try_acquire(session_id)
            .ok_or_else(|| Error::AlreadyStarted(session_id.to_string()))?;

        let mut session = self.ctx.repository.get_session_by_id(session_id)?;
        if session.status != SessionStatus::Inactive {
            return Err(Error::AlreadyStarted(session_id.to_string()));
        }

        self.ctx.save_status(&mut session, SessionStatus::Pending)?;
        debug!(session_id = %session_id, "Session pending");

        match self.activate(&mut session).await {
            Ok(()) => {
                info!(session_id = %session_id, name = %session.session_name, "Session started");
                Ok(())
            }
            Err(e) => {
                if e.is_cancellation() {
                    info!(session_id = %session_id, "Session start cancelled");
                } else {
                    error!(session_id = %session_id, error = %e, "Session start failed");
                }
                self.ctx.save_status(&mut session, SessionStatus::Inactive)?;
                Err(e)
            }
        }
    }

    /// Generate, then take the target over: apply, mark Active and demote
    /// whichever session held it before.
    async fn activate(&self, session: &mut Session) -> Result<()> {
        let credentials = self.strategy.generate(&self.ctx, session).await?;

        let _target = self.ctx.lock_target(session).await;
        self.strategy
            .apply(&self.ctx, session, &credentials)
            .await?;
        session.session_token_expiration = credentials.expiration();
        session.start_date_time = Some(Utc::now());
        self.ctx.save_status(session, SessionStatus::Active)?;
        self.demote_target_siblings(session)
    }

    /// Other sessions active on the same target just had their credentials
    /// overwritten. Caller holds the target lock.
    fn demote_target_siblings(&self, session: &Session) -> Result<()> {
        let target = credential_target(session);
        for mut other in self.ctx.repository.get_sessions()? {
            if other.session_id != session.session_id
                && other.is_active()
                && credential_target(&other) == target
            {
                debug!(session_id = %other.session_id, target = %target, "Demoting session sharing the target");
                other.session_token_expiration = None;
                self.ctx.save_status(&mut other, SessionStatus::Inactive)?;
            }
        }
        Ok(())
    }

    /// Regenerate and re-apply credentials for an active session.
    /// Inactive sessions are left alone, including ones demoted while their
    /// credentials were being generated.
    pub async fn rotate(&self, session_id: &str) -> Result<()> {
        let _guard = self.ctx.locks.acquire(session_id).await;
        let session = self.ctx.repository.get_session_by_id(session_id)?;
        if !session.is_active() {
            debug!(session_id = %session_id, status = ?session.status, "Skipping rotation of inactive session");
            return Ok(());
        }

        let credentials = self.strategy.generate(&self.ctx, &session).await?;

        let _target = self.ctx.lock_target(&session).await;
        let mut session = self.ctx.repository.get_session_by_id(session_id)?;
        if !session.is_active() {
            info!(session_id = %session_id, "Session demoted during rotation, discarding credentials");
            return Ok(());
        }
        self.strategy
            .apply(&self.ctx, &session, &credentials)
            .await?;
        session.session_token_expiration = credentials.expiration();
        self.ctx.repository.update_session(&session)?;
        info!(session_id = %session_id, expires = ?session.session_token_expiration, "Session rotated");
        self.ctx
            .notifier
            .publish(SessionEvent::Updated(session_id.to_string()));
        Ok(())
    }

    pub async fn stop(&self, session_id: &str) -> Result<()> {
        let _guard = self.ctx.locks.acquire(session_id).await;
        let mut session = self.ctx.repository.get_session_by_id(session_id)?;
        if session.status == SessionStatus::Inactive {
            return Err(Error::AlreadyStopped(session_id.to_string()));
        }
        self.stop_locked(&mut session).await
    }

    /// Caller holds the session lock. A session demoted since the caller
    /// read it no longer owns its target, so nothing is removed.
    async fn stop_locked(&self, session: &mut Session) -> Result<()> {
        let _target = self.ctx.lock_target(session).await;
        *session = self.ctx.repository.get_session_by_id(&session.session_id)?;
        if session.status == SessionStatus::Inactive {
            debug!(session_id = %session.session_id, "Session already demoted");
            return Ok(());
        }
        self.strategy.deapply(&self.ctx, session).await?;
        session.session_token_expiration = None;
        self.ctx.save_status(session, SessionStatus::Inactive)?;
        info!(session_id = %session.session_id, "Session stopped");
        Ok(())
    }

    /// Stop if needed, forget secrets and remove the record. Chained
    /// sessions built on this one are kept and logged.
    pub async fn delete(&self, session_id: &str) -> Result<()> {
        {
            let _guard = self.ctx.locks.acquire(session_id).await;
            let mut session = self.ctx.repository.get_session_by_id(session_id)?;
            if session.status != SessionStatus::Inactive {
                self.stop_locked(&mut session).await?;
            }

            let dependents = self.get_dependent_sessions(session_id)?;
            if !dependents.is_empty() {
                let names: Vec<&str> = dependents.iter().map(|s| s.session_name.as_str()).collect();
                warn!(
                    session_id = %session_id,
                    dependents = ?names,
                    "Deleting a session that chained sessions depend on"
                );
            }

            if let Err(e) = self.strategy.forget_secrets(&self.ctx, &session) {
                warn!(session_id = %session_id, error = %e, "Failed to remove session secrets");
            }
            self.ctx.repository.delete_session(session_id)?;
        }

        self.ctx.locks.forget(session_id);
        info!(session_id = %session_id, "Session deleted");
        self.ctx
            .notifier
            .publish(SessionEvent::Removed(session_id.to_string()));
        Ok(())
    }

    /// Fresh credentials without changing status or the credential file.
    pub async fn generate_credentials(&self, session_id: &str) -> Result<CredentialsInfo> {
        let session = self.ctx.repository.get_session_by_id(session_id)?;
        self.strategy.generate(&self.ctx, &session).await
    }

    pub fn get_dependent_sessions(&self, session_id: &str) -> Result<Vec<Session>> {
        dependent_sessions(self.ctx.repository.as_ref(), session_id)
    }
}

/// Chained sessions whose parent is `session_id`.
pub fn dependent_sessions(
    repository: &dyn WorkspaceRepository,
    session_id: &str,
) -> Result<Vec<Session>> {
    Ok(repository
        .get_sessions()?
        .into_iter()
        .filter(|s| s.details.parent_session_id() == Some(session_id))
        .collect())
}
