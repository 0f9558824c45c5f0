//! Roles granted through an SSO portal integration.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::{CredentialsInfo, Session, SessionDetails, SessionKind};

use super::sso_integration::SsoIntegrationService;
use super::validation::parse_role_arn;
use super::{SessionContext, SessionStrategy};

pub struct SsoRoleStrategy {
    integrations: Arc<SsoIntegrationService>,
}

impl SsoRoleStrategy {
    pub fn new(integrations: Arc<SsoIntegrationService>) -> Self {
        Self { integrations }
    }
}

#[async_trait]
impl SessionStrategy for SsoRoleStrategy {
    fn kind(&self) -> SessionKind {
        SessionKind::SsoRole
    }

    async fn generate(&self, ctx: &SessionContext, session: &Session) -> Result<CredentialsInfo> {
        let SessionDetails::SsoRole {
            role_arn,
            sso_integration_id,
            ..
        } = &session.details
        else {
            return Err(Error::validation("kind", "not an SSO role session"));
        };

        let (account_id, role_name) = parse_role_arn(role_arn)?;
        let integration = ctx.repository.get_sso_integration(sso_integration_id)?;
        let portal = self.integrations.portal();

        let token = self.integrations.access_token(sso_integration_id).await?;
        debug!(session_id = %session.session_id, account_id = %account_id, role = %role_name, "GetRoleCredentials");
        let creds = match portal
            .get_role_credentials(&integration.region, &token, &account_id, &role_name)
            .await
        {
            Err(Error::Unauthorized) => {
                // The portal revoked the token before its advertised expiry.
                warn!(integration_id = %sso_integration_id, "SSO token rejected, logging in again");
                self.integrations.invalidate_token(sso_integration_id)?;
                let token = self.integrations.access_token(sso_integration_id).await?;
                portal
                    .get_role_credentials(&integration.region, &token, &account_id, &role_name)
                    .await?
            }
            other => other?,
        };

        Ok(CredentialsInfo::Aws(creds))
    }
}
