//! Wires the per-kind strategies into services and routes calls by kind
//! or by session id.

use std::collections::HashMap;
use std::sync::Arc;

use crate::azure::AzureCli;
use crate::bridge::DesktopBridge;
use crate::error::{Error, Result};
use crate::models::{CredentialsInfo, Session, SessionKind, SessionRequest};
use crate::oidc::{OidcDeviceFlowClient, OidcTransport};
use crate::services::{
    dependent_sessions, AzureStrategy, IamRoleChainedStrategy, IamRoleFederatedStrategy,
    IamUserStrategy, SessionContext, SessionService, SessionStrategy, SsoIntegrationService,
    SsoRoleStrategy,
};
use crate::sso::SsoPortal;
use crate::sts::StsApi;

/// External collaborators the engine talks to.
pub struct Backends {
    pub sts: Arc<dyn StsApi>,
    pub bridge: Arc<dyn DesktopBridge>,
    pub oidc: Arc<dyn OidcTransport>,
    pub portal: Arc<dyn SsoPortal>,
    pub azure: Arc<dyn AzureCli>,
}

pub struct SessionRegistry {
    ctx: Arc<SessionContext>,
    services: HashMap<SessionKind, SessionService>,
    sso: Arc<SsoIntegrationService>,
}

impl SessionRegistry {
    pub fn new(ctx: Arc<SessionContext>, backends: Backends) -> Self {
        let oidc = OidcDeviceFlowClient::new(backends.oidc, ctx.config.sso_client_name.clone());
        let sso = Arc::new(SsoIntegrationService::new(
            ctx.clone(),
            oidc,
            backends.portal,
            backends.bridge.clone(),
        ));

        let iam_user: Arc<dyn SessionStrategy> = Arc::new(IamUserStrategy::new(
            backends.sts.clone(),
            backends.bridge.clone(),
        ));
        let federated: Arc<dyn SessionStrategy> = Arc::new(IamRoleFederatedStrategy::new(
            backends.sts.clone(),
            backends.bridge.clone(),
        ));
        let sso_role: Arc<dyn SessionStrategy> = Arc::new(SsoRoleStrategy::new(sso.clone()));
        let chained: Arc<dyn SessionStrategy> = Arc::new(IamRoleChainedStrategy::new(
            backends.sts.clone(),
            vec![iam_user.clone(), federated.clone(), sso_role.clone()],
        ));
        let azure: Arc<dyn SessionStrategy> = Arc::new(AzureStrategy::new(backends.azure));

        let services = [iam_user, federated, chained, sso_role, azure]
            .into_iter()
            .map(|strategy| {
                (
                    strategy.kind(),
                    SessionService::new(ctx.clone(), strategy),
                )
            })
            .collect();

        Self { ctx, services, sso }
    }

    pub fn context(&self) -> &Arc<SessionContext> {
        &self.ctx
    }

    pub fn sso_integrations(&self) -> &Arc<SsoIntegrationService> {
        &self.sso
    }

    pub fn service(&self, kind: SessionKind) -> Result<&SessionService> {
        self.services
            .get(&kind)
            .ok_or_else(|| Error::validation("kind", format!("no service for {:?}", kind)))
    }

    pub fn service_for(&self, session_id: &str) -> Result<&SessionService> {
        let session = self.ctx.repository.get_session_by_id(session_id)?;
        self.service(session.kind())
    }

    pub fn sessions(&self) -> Result<Vec<Session>> {
        self.ctx.repository.get_sessions()
    }

    pub fn active_sessions(&self) -> Result<Vec<Session>> {
        Ok(self
            .sessions()?
            .into_iter()
            .filter(Session::is_active)
            .collect())
    }

    pub fn get_dependent_sessions(&self, session_id: &str) -> Result<Vec<Session>> {
        dependent_sessions(self.ctx.repository.as_ref(), session_id)
    }

    // Convenience routing

    pub async fn create(&self, request: SessionRequest) -> Result<Session> {
        self.service(request.params.kind())?.create(request).await
    }

    pub async fn update(&self, session_id: &str, request: SessionRequest) -> Result<Session> {
        self.service_for(session_id)?.update(session_id, request).await
    }

    pub async fn start(&self, session_id: &str) -> Result<()> {
        self.service_for(session_id)?.start(session_id).await
    }

    pub async fn stop(&self, session_id: &str) -> Result<()> {
        self.service_for(session_id)?.stop(session_id).await
    }

    pub async fn rotate(&self, session_id: &str) -> Result<()> {
        self.service_for(session_id)?.rotate(session_id).await
    }

    pub async fn delete(&self, session_id: &str) -> Result<()> {
        self.service_for(session_id)?.delete(session_id).await
    }

    pub async fn generate_credentials(&self, session_id: &str) -> Result<CredentialsInfo> {
        self.service_for(session_id)?
            .generate_credentials(session_id)
            .await
    }
}
