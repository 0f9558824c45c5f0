//! IAM user sessions: long-lived keys from the keychain, optionally traded
//! for an MFA-backed session token.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info};

use crate::bridge::DesktopBridge;
use crate::error::{Error, Result};
use crate::keychain;
use crate::models::{AwsCredentials, CredentialsInfo, Session, SessionDetails, SessionKind, SessionParams};
use crate::sts::{MfaToken, StsApi};

use super::{SessionContext, SessionStrategy};

pub struct IamUserStrategy {
    sts: Arc<dyn StsApi>,
    bridge: Arc<dyn DesktopBridge>,
}

impl IamUserStrategy {
    pub fn new(sts: Arc<dyn StsApi>, bridge: Arc<dyn DesktopBridge>) -> Self {
        Self { sts, bridge }
    }

    fn static_keys(ctx: &SessionContext, session_id: &str) -> Result<AwsCredentials> {
        let access_key_id = ctx
            .keychain
            .get(&keychain::iam_user_access_key_id(session_id))?
            .ok_or_else(|| Error::Keychain(format!("no access key stored for session {}", session_id)))?;
        let secret_access_key = ctx
            .keychain
            .get(&keychain::iam_user_secret_access_key(session_id))?
            .ok_or_else(|| Error::Keychain(format!("no secret key stored for session {}", session_id)))?;
        Ok(AwsCredentials {
            access_key_id,
            secret_access_key,
            session_token: None,
            expiration: None,
        })
    }

    /// The cached MFA session token, if it outlives the refresh buffer.
    fn cached_session_token(ctx: &SessionContext, session_id: &str) -> Option<AwsCredentials> {
        let raw = ctx
            .keychain
            .get(&keychain::iam_user_session_token(session_id))
            .ok()??;
        let creds: AwsCredentials = match serde_json::from_str(&raw) {
            Ok(creds) => creds,
            Err(e) => {
                debug!(session_id = %session_id, error = %e, "Discarding unreadable session token cache");
                return None;
            }
        };
        let fresh_until = Utc::now() + ctx.config.refresh_buffer();
        match creds.expiration {
            Some(expiration) if expiration > fresh_until => Some(creds),
            _ => None,
        }
    }
}

#[async_trait]
impl SessionStrategy for IamUserStrategy {
    fn kind(&self) -> SessionKind {
        SessionKind::IamUser
    }

    async fn generate(&self, ctx: &SessionContext, session: &Session) -> Result<CredentialsInfo> {
        let SessionDetails::IamUser { mfa_device, .. } = &session.details else {
            return Err(Error::validation("kind", "not an IAM user session"));
        };
        let keys = Self::static_keys(ctx, &session.session_id)?;

        let Some(device) = mfa_device.as_deref() else {
            return Ok(CredentialsInfo::Aws(keys));
        };

        if let Some(cached) = Self::cached_session_token(ctx, &session.session_id) {
            debug!(session_id = %session.session_id, "Reusing cached MFA session token");
            return Ok(CredentialsInfo::Aws(cached));
        }

        let code = self.bridge.need_mfa(&session.session_name).await?;
        let creds = self
            .sts
            .get_session_token(
                &keys,
                &session.region,
                ctx.config.mfa_session_duration_secs,
                Some(MfaToken {
                    serial_number: device,
                    code: code.trim(),
                }),
            )
            .await?;

        let cached = serde_json::to_string(&creds)
            .map_err(|e| Error::Keychain(format!("Failed to serialize session token: {}", e)))?;
        ctx.keychain
            .set(&keychain::iam_user_session_token(&session.session_id), &cached)?;
        info!(session_id = %session.session_id, expires = ?creds.expiration, "Obtained MFA session token");

        Ok(CredentialsInfo::Aws(creds))
    }

    fn store_secrets(
        &self,
        ctx: &SessionContext,
        session: &Session,
        params: &SessionParams,
    ) -> Result<()> {
        let SessionParams::IamUser { keys, .. } = params else {
            return Ok(());
        };
        let id = &session.session_id;
        ctx.keychain
            .set(&keychain::iam_user_access_key_id(id), keys.access_key_id.trim())?;
        ctx.keychain
            .set(&keychain::iam_user_secret_access_key(id), keys.secret_access_key.trim())?;
        // New keys or MFA device invalidate any cached token.
        ctx.keychain.delete(&keychain::iam_user_session_token(id))
    }

    fn forget_secrets(&self, ctx: &SessionContext, session: &Session) -> Result<()> {
        let id = &session.session_id;
        ctx.keychain.delete(&keychain::iam_user_access_key_id(id))?;
        ctx.keychain.delete(&keychain::iam_user_secret_access_key(id))?;
        ctx.keychain.delete(&keychain::iam_user_session_token(id))
    }
}
