//! Role sessions assumed from another session's credentials.
//!
//! The parent is looked up exactly one hop away. Chained sessions can't
//! be parents, so the lookup never recurses.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{
    CredentialsInfo, Session, SessionDetails, SessionKind, DEFAULT_ROLE_SESSION_NAME,
};
use crate::sts::StsApi;

use super::{SessionContext, SessionStrategy};

pub struct IamRoleChainedStrategy {
    sts: Arc<dyn StsApi>,
    parents: HashMap<SessionKind, Arc<dyn SessionStrategy>>,
}

impl IamRoleChainedStrategy {
    /// `parents` holds the strategies of the parent-capable kinds; others
    /// are ignored.
    pub fn new(sts: Arc<dyn StsApi>, parents: Vec<Arc<dyn SessionStrategy>>) -> Self {
        let parents = parents
            .into_iter()
            .filter(|s| s.kind().can_be_parent())
            .map(|s| (s.kind(), s))
            .collect();
        Self { sts, parents }
    }

    async fn parent_credentials(
        &self,
        ctx: &SessionContext,
        session: &Session,
        parent_session_id: &str,
    ) -> Result<CredentialsInfo> {
        let parent = match ctx.repository.get_session_by_id(parent_session_id) {
            Ok(parent) => parent,
            Err(Error::SessionNotFound(_)) => {
                return Err(Error::ParentSessionNotFound(session.session_name.clone()))
            }
            Err(e) => return Err(e),
        };

        let strategy = self.parents.get(&parent.kind()).ok_or_else(|| {
            Error::validation(
                "parent_session_id",
                format!("a {} session cannot be a parent", parent.kind().display_name()),
            )
        })?;

        debug!(
            session_id = %session.session_id,
            parent_id = %parent.session_id,
            parent_kind = ?parent.kind(),
            "Generating parent credentials"
        );
        strategy.generate(ctx, &parent).await
    }
}

#[async_trait]
impl SessionStrategy for IamRoleChainedStrategy {
    fn kind(&self) -> SessionKind {
        SessionKind::IamRoleChained
    }

    async fn generate(&self, ctx: &SessionContext, session: &Session) -> Result<CredentialsInfo> {
        let SessionDetails::IamRoleChained {
            role_arn,
            parent_session_id,
            role_session_name,
            ..
        } = &session.details
        else {
            return Err(Error::validation("kind", "not a chained role session"));
        };

        let parent_creds = self
            .parent_credentials(ctx, session, parent_session_id)
            .await?
            .into_aws()?;

        let creds = self
            .sts
            .assume_role(
                &parent_creds,
                &session.region,
                role_arn,
                role_session_name
                    .as_deref()
                    .unwrap_or(DEFAULT_ROLE_SESSION_NAME),
                ctx.config.chained_role_session_duration_secs,
            )
            .await?;
        Ok(CredentialsInfo::Aws(creds))
    }
}
