//! Azure subscription sessions, driven through the `az` CLI.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::azure::{AzureAccount, AzureCli};
use crate::error::{Error, Result};
use crate::models::{CredentialsInfo, Session, SessionDetails, SessionKind};

use super::{SessionContext, SessionStrategy};

pub struct AzureStrategy {
    cli: Arc<dyn AzureCli>,
}

impl AzureStrategy {
    pub fn new(cli: Arc<dyn AzureCli>) -> Self {
        Self { cli }
    }
}

fn azure_details(session: &Session) -> Result<(&str, &str)> {
    match &session.details {
        SessionDetails::Azure {
            tenant_id,
            subscription_id,
        } => Ok((tenant_id, subscription_id)),
        _ => Err(Error::validation("kind", "not an Azure session")),
    }
}

#[async_trait]
impl SessionStrategy for AzureStrategy {
    fn kind(&self) -> SessionKind {
        SessionKind::Azure
    }

    async fn generate(&self, _ctx: &SessionContext, session: &Session) -> Result<CredentialsInfo> {
        let (tenant_id, subscription_id) = azure_details(session)?;
        let token = AzureAccount::new(self.cli.as_ref())
            .get_access_token(tenant_id, subscription_id)
            .await?;
        Ok(CredentialsInfo::Azure(token))
    }

    async fn apply(
        &self,
        _ctx: &SessionContext,
        session: &Session,
        _credentials: &CredentialsInfo,
    ) -> Result<()> {
        let (_, subscription_id) = azure_details(session)?;
        debug!(session_id = %session.session_id, "Selecting Azure subscription");
        AzureAccount::new(self.cli.as_ref())
            .set_subscription(subscription_id)
            .await
    }

    async fn deapply(&self, _ctx: &SessionContext, session: &Session) -> Result<()> {
        debug!(session_id = %session.session_id, "Clearing Azure CLI account");
        AzureAccount::new(self.cli.as_ref()).clear().await
    }
}
