//! Records that sessions reference by id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the profile that always exists in a workspace.
pub const DEFAULT_PROFILE_NAME: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct AwsNamedProfile {
    pub id: String,
    pub name: String,
}

impl AwsNamedProfile {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub struct IdpUrl {
    pub id: String,
    pub url: String,
}

impl IdpUrl {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            url: url.into(),
        }
    }
}

/// One SSO portal login. The access token itself lives in the keychain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "camelCase")]
pub struct SsoIntegration {
    pub id: String,
    pub alias: String,
    pub portal_url: String,
    pub region: String,
    #[serde(default)]
    pub access_token_expiration: Option<DateTime<Utc>>,
}

impl SsoIntegration {
    pub fn new(alias: impl Into<String>, portal_url: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            alias: alias.into(),
            portal_url: portal_url.into(),
            region: region.into(),
            access_token_expiration: None,
        }
    }

    pub fn is_online(&self) -> bool {
        self.access_token_expiration
            .map(|exp| exp > Utc::now())
            .unwrap_or(false)
    }
}
