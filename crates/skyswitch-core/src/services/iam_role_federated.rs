//! SAML-federated role sessions.
//!
//! The front end runs an IdP sign-in browser, hidden at first. Captured
//! requests are classified: an IdP login page means the user must sign in,
//! so the flow restarts with a visible window; a POST to the AWS assertion
//! consumer carries the SAML response we trade with STS.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::bridge::DesktopBridge;
use crate::error::{Error, Result};
use crate::models::{CredentialsInfo, Session, SessionDetails, SessionKind};
use crate::saml::{self, CloudProvider};
use crate::sts::StsApi;

use super::{SessionContext, SessionStrategy};

enum SignInOutcome {
    Assertion(String),
    NeedsAuthentication,
}

pub struct IamRoleFederatedStrategy {
    sts: Arc<dyn StsApi>,
    bridge: Arc<dyn DesktopBridge>,
}

impl IamRoleFederatedStrategy {
    pub fn new(sts: Arc<dyn StsApi>, bridge: Arc<dyn DesktopBridge>) -> Self {
        Self { sts, bridge }
    }

    async fn sign_in(&self, idp_url: &str, need_auth: bool) -> Result<SignInOutcome> {
        let mut requests = self
            .bridge
            .aws_sign_in(idp_url, need_auth)
            .await
            .map_err(|e| match e {
                Error::ModalClosed | Error::SamlAuthentication(_) => e,
                other => Error::SamlAuthentication(other.to_string()),
            })?;

        while let Some(request) = requests.recv().await {
            if saml::is_saml_assertion_url(CloudProvider::Aws, &request.url) {
                let body = request.body.as_deref().unwrap_or_default();
                let assertion = saml::extract_assertion(body)
                    .map_err(|e| Error::SamlAuthentication(e.to_string()))?;
                return Ok(SignInOutcome::Assertion(assertion));
            }
            if !need_auth && saml::is_authentication_url(CloudProvider::Aws, &request.url) {
                debug!(url = %request.url, "IdP wants interactive sign-in");
                return Ok(SignInOutcome::NeedsAuthentication);
            }
        }

        Err(Error::ModalClosed)
    }

    async fn obtain_assertion(&self, idp_url: &str) -> Result<String> {
        match self.sign_in(idp_url, false).await? {
            SignInOutcome::Assertion(assertion) => Ok(assertion),
            SignInOutcome::NeedsAuthentication => {
                info!("Showing the sign-in window");
                match self.sign_in(idp_url, true).await? {
                    SignInOutcome::Assertion(assertion) => Ok(assertion),
                    SignInOutcome::NeedsAuthentication => Err(Error::ModalClosed),
                }
            }
        }
    }
}

#[async_trait]
impl SessionStrategy for IamRoleFederatedStrategy {
    fn kind(&self) -> SessionKind {
        SessionKind::IamRoleFederated
    }

    async fn generate(&self, ctx: &SessionContext, session: &Session) -> Result<CredentialsInfo> {
        let SessionDetails::IamRoleFederated {
            role_arn,
            idp_arn,
            idp_url_id,
            ..
        } = &session.details
        else {
            return Err(Error::validation("kind", "not a federated role session"));
        };

        let idp_url = ctx.repository.get_idp_url(idp_url_id)?;
        let assertion = self.obtain_assertion(&idp_url.url).await?;
        debug!(session_id = %session.session_id, "Obtained SAML assertion");

        let creds = self
            .sts
            .assume_role_with_saml(
                &session.region,
                role_arn,
                idp_arn,
                &assertion,
                ctx.config.saml_role_session_duration_secs,
            )
            .await?;
        Ok(CredentialsInfo::Aws(creds))
    }
}
