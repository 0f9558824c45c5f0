//! STS calls used by the AWS session kinds.

use async_trait::async_trait;
use aws_sdk_sts::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_sts::error::DisplayErrorContext;
use aws_sdk_sts::Client as StsClient;
use chrono::{DateTime, TimeZone, Utc};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::AwsCredentials;

/// Provider name attached to credentials handed to the SDK
const CREDENTIALS_PROVIDER_NAME: &str = "skyswitch";

/// An MFA device serial and the code the user typed.
#[derive(Debug, Clone, Copy)]
pub struct MfaToken<'a> {
    pub serial_number: &'a str,
    pub code: &'a str,
}

#[async_trait]
pub trait StsApi: Send + Sync {
    /// AssumeRole signed with `credentials` (the parent session's).
    async fn assume_role(
        &self,
        credentials: &AwsCredentials,
        region: &str,
        role_arn: &str,
        role_session_name: &str,
        duration_secs: i32,
    ) -> Result<AwsCredentials>;

    /// AssumeRoleWithSAML; unsigned, the assertion is the proof.
    async fn assume_role_with_saml(
        &self,
        region: &str,
        role_arn: &str,
        principal_arn: &str,
        saml_assertion: &str,
        duration_secs: i32,
    ) -> Result<AwsCredentials>;

    async fn get_session_token(
        &self,
        credentials: &AwsCredentials,
        region: &str,
        duration_secs: i32,
        mfa: Option<MfaToken<'_>>,
    ) -> Result<AwsCredentials>;
}

/// `StsApi` over the AWS SDK. A client is built per call since every call
/// signs with different credentials and region.
#[derive(Debug, Clone, Default)]
pub struct AwsSdkSts;

impl AwsSdkSts {
    pub fn new() -> Self {
        Self
    }

    fn client(region: &str, credentials: Option<&AwsCredentials>) -> StsClient {
        let mut builder = aws_sdk_sts::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()));
        if let Some(creds) = credentials {
            builder = builder.credentials_provider(Credentials::new(
                creds.access_key_id.clone(),
                creds.secret_access_key.clone(),
                creds.session_token.clone(),
                None,
                CREDENTIALS_PROVIDER_NAME,
            ));
        }
        StsClient::from_conf(builder.build())
    }
}

fn convert_datetime(dt: &aws_sdk_sts::primitives::DateTime) -> Result<DateTime<Utc>> {
    Utc.timestamp_opt(dt.secs(), dt.subsec_nanos())
        .single()
        .ok_or_else(|| Error::Sts(format!("invalid expiration timestamp {}", dt.secs())))
}

fn convert_credentials(creds: Option<&aws_sdk_sts::types::Credentials>) -> Result<AwsCredentials> {
    let creds = creds.ok_or_else(|| Error::Sts("response carried no credentials".to_string()))?;
    Ok(AwsCredentials {
        access_key_id: creds.access_key_id().to_string(),
        secret_access_key: creds.secret_access_key().to_string(),
        session_token: Some(creds.session_token().to_string()),
        expiration: Some(convert_datetime(creds.expiration())?),
    })
}

#[async_trait]
impl StsApi for AwsSdkSts {
    async fn assume_role(
        &self,
        credentials: &AwsCredentials,
        region: &str,
        role_arn: &str,
        role_session_name: &str,
        duration_secs: i32,
    ) -> Result<AwsCredentials> {
        debug!(role_arn = %role_arn, region = %region, "AssumeRole");
        let output = Self::client(region, Some(credentials))
            .assume_role()
            .role_arn(role_arn)
            .role_session_name(role_session_name)
            .duration_seconds(duration_secs)
            .send()
            .await
            .map_err(|e| Error::Sts(format!("AssumeRole failed: {}", DisplayErrorContext(&e))))?;
        convert_credentials(output.credentials())
    }

    async fn assume_role_with_saml(
        &self,
        region: &str,
        role_arn: &str,
        principal_arn: &str,
        saml_assertion: &str,
        duration_secs: i32,
    ) -> Result<AwsCredentials> {
        debug!(role_arn = %role_arn, region = %region, "AssumeRoleWithSAML");
        let output = Self::client(region, None)
            .assume_role_with_saml()
            .role_arn(role_arn)
            .principal_arn(principal_arn)
            .saml_assertion(saml_assertion)
            .duration_seconds(duration_secs)
            .send()
            .await
            .map_err(|e| {
                Error::Sts(format!("AssumeRoleWithSAML failed: {}", DisplayErrorContext(&e)))
            })?;
        convert_credentials(output.credentials())
    }

    async fn get_session_token(
        &self,
        credentials: &AwsCredentials,
        region: &str,
        duration_secs: i32,
        mfa: Option<MfaToken<'_>>,
    ) -> Result<AwsCredentials> {
        debug!(region = %region, with_mfa = mfa.is_some(), "GetSessionToken");
        let mut request = Self::client(region, Some(credentials))
            .get_session_token()
            .duration_seconds(duration_secs);
        if let Some(mfa) = mfa {
            request = request.serial_number(mfa.serial_number).token_code(mfa.code);
        }
        let output = request.send().await.map_err(|e| {
            Error::Sts(format!("GetSessionToken failed: {}", DisplayErrorContext(&e)))
        })?;
        convert_credentials(output.credentials())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_convert_datetime() {
        let dt = aws_sdk_sts::primitives::DateTime::from_secs(1_700_000_000);
        let converted = convert_datetime(&dt).unwrap();
        assert_eq!(converted.timestamp(), 1_700_000_000);
    }

    #[test]
    fn test_missing_credentials_is_an_error() {
        assert!(matches!(convert_credentials(None), Err(Error::Sts(_))));
    }
}
