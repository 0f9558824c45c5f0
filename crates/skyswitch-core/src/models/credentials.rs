use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Temporary (or static) AWS credentials as written to a named profile.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default)]
    pub session_token: Option<String>,
    #[serde(default)]
    pub expiration: Option<DateTime<Utc>>,
}

impl AwsCredentials {
    pub fn is_expired(&self) -> bool {
        self.expiration.map(|exp| exp <= Utc::now()).unwrap_or(false)
    }
}

// Secrets stay out of logs.
impl fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("session_token", &self.session_token.as_ref().map(|_| "<redacted>"))
            .field("expiration", &self.expiration)
            .finish()
    }
}

/// Long-lived IAM user keys, only ever held in the keychain.
#[derive(Clone, PartialEq, Eq)]
pub struct StaticKeys {
    pub access_key_id: String,
    pub secret_access_key: String,
}

impl fmt::Debug for StaticKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticKeys")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .finish()
    }
}

impl From<StaticKeys> for AwsCredentials {
    fn from(keys: StaticKeys) -> Self {
        Self {
            access_key_id: keys.access_key_id,
            secret_access_key: keys.secret_access_key,
            session_token: None,
            expiration: None,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct AzureAccessToken {
    pub access_token: String,
    pub expiration: DateTime<Utc>,
    pub tenant_id: String,
    pub subscription_id: String,
}

impl fmt::Debug for AzureAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AzureAccessToken")
            .field("access_token", &"<redacted>")
            .field("expiration", &self.expiration)
            .field("tenant_id", &self.tenant_id)
            .field("subscription_id", &self.subscription_id)
            .finish()
    }
}

/// Credentials produced by a session's generation strategy.
/// Held in memory only for the duration of a start/rotate/generate call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialsInfo {
    Aws(AwsCredentials),
    Azure(AzureAccessToken),
}

impl CredentialsInfo {
    pub fn expiration(&self) -> Option<DateTime<Utc>> {
        match self {
            CredentialsInfo::Aws(creds) => creds.expiration,
            CredentialsInfo::Azure(token) => Some(token.expiration),
        }
    }

    pub fn into_aws(self) -> Result<AwsCredentials> {
        match self {
            CredentialsInfo::Aws(creds) => Ok(creds),
            CredentialsInfo::Azure(_) => Err(Error::InvalidResponse(
                "expected AWS credentials, got an Azure token".to_string(),
            )),
        }
    }

    pub fn as_aws(&self) -> Option<&AwsCredentials> {
        match self {
            CredentialsInfo::Aws(creds) => Some(creds),
            CredentialsInfo::Azure(_) => None,
        }
    }
}
