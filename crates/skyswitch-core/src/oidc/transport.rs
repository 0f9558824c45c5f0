//! SSO OIDC wire protocol: client registration, device authorization and
//! token polling against `https://oidc.<region>.amazonaws.com`.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

const DEVICE_CODE_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Header AWS uses to name the exception type of a failed call
const AWS_ERROR_TYPE_HEADER: &str = "x-amzn-errortype";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub client_id_issued_at: i64,
    /// Unix seconds
    pub client_secret_expires_at: i64,
}

impl ClientRegistration {
    pub fn is_expired(&self) -> bool {
        Utc::now().timestamp() >= self.client_secret_expires_at
    }
}

impl fmt::Debug for ClientRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistration")
            .field("client_id", &self.client_id)
            .field("client_secret", &"<redacted>")
            .field("client_secret_expires_at", &self.client_secret_expires_at)
            .finish()
    }
}

/// Response from the device authorization request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceAuthorization {
    /// Device code for polling
    pub device_code: String,

    /// User code to display
    pub user_code: String,

    /// URL for user to visit
    pub verification_uri: String,

    /// URL with user code pre-filled (optional)
    #[serde(default)]
    pub verification_uri_complete: Option<String>,

    /// Seconds until device code expires
    pub expires_in: u64,

    /// Minimum seconds between polling attempts
    #[serde(default)]
    pub interval: Option<u64>,
}

impl DeviceAuthorization {
    /// Prefers verification_uri_complete if available
    pub fn display_url(&self) -> &str {
        self.verification_uri_complete
            .as_deref()
            .unwrap_or(&self.verification_uri)
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Seconds until access token expires
    pub expires_in: i64,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Outcome of one CreateToken call during device-flow polling.
#[derive(Debug, Clone)]
pub enum TokenPoll {
    Issued(TokenResponse),
    Pending,
    SlowDown,
    Denied,
    Expired,
}

/// OAuth error response
#[derive(Debug, Clone, Deserialize)]
struct OAuthError {
    #[serde(default)]
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

impl OAuthError {
    /// Map the AWS exception name when the body carries no OAuth code
    fn from_error_type(error_type: &str) -> Self {
        let name = error_type.split(':').next().unwrap_or(error_type);
        let error = match name {
            "AuthorizationPendingException" => "authorization_pending",
            "SlowDownException" => "slow_down",
            "AccessDeniedException" => "access_denied",
            "ExpiredTokenException" => "expired_token",
            other => other,
        };
        Self {
            error: error.to_string(),
            error_description: None,
        }
    }

    fn into_poll(self) -> Result<TokenPoll> {
        match self.error.as_str() {
            "authorization_pending" => Ok(TokenPoll::Pending),
            "slow_down" => Ok(TokenPoll::SlowDown),
            "access_denied" => Ok(TokenPoll::Denied),
            "expired_token" => Ok(TokenPoll::Expired),
            _ => Err(Error::InvalidResponse(
                self.error_description.unwrap_or(self.error),
            )),
        }
    }
}

#[async_trait]
pub trait OidcTransport: Send + Sync {
    async fn register_client(&self, region: &str, client_name: &str) -> Result<ClientRegistration>;

    async fn start_device_authorization(
        &self,
        region: &str,
        registration: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorization>;

    async fn create_token(
        &self,
        region: &str,
        registration: &ClientRegistration,
        device_code: &str,
    ) -> Result<TokenPoll>;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterClientRequest<'a> {
    client_name: &'a str,
    client_type: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StartDeviceAuthorizationRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    start_url: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    grant_type: &'a str,
    device_code: &'a str,
}

/// reqwest-backed transport.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpOidcTransport {
    client: Client,
    endpoint_override: Option<String>,
}

impl HttpOidcTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            endpoint_override: None,
        })
    }

    /// Point every region at one endpoint (local stubs, FIPS endpoints)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    fn endpoint(&self, region: &str) -> String {
        self.endpoint_override
            .clone()
            .unwrap_or_else(|| format!("https://oidc.{}.amazonaws.com", region))
    }

    /// Check if response is successful, returning an error with body if not.
    async fn check_response(response: reqwest::Response) -> Result<reqwest::Response> {
        if response.status().is_success() {
            Ok(response)
        } else {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            Err(Error::from_status(status, &body))
        }
    }
}

#[async_trait]
impl OidcTransport for HttpOidcTransport {
    async fn register_client(&self, region: &str, client_name: &str) -> Result<ClientRegistration> {
        let url = format!("{}/client/register", self.endpoint(region));
        let response = self
            .client
            .post(&url)
            .json(&RegisterClientRequest {
                client_name,
                client_type: "public",
            })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("Invalid client registration: {}", e)))
    }

    async fn start_device_authorization(
        &self,
        region: &str,
        registration: &ClientRegistration,
        start_url: &str,
    ) -> Result<DeviceAuthorization> {
        let url = format!("{}/device_authorization", self.endpoint(region));
        let response = self
            .client
            .post(&url)
            .json(&StartDeviceAuthorizationRequest {
                client_id: &registration.client_id,
                client_secret: &registration.client_secret,
                start_url,
            })
            .send()
            .await?;

        let response = Self::check_response(response).await?;
        response
            .json()
            .await
            .map_err(|e| Error::InvalidResponse(format!("Invalid device authorization: {}", e)))
    }

    async fn create_token(
        &self,
        region: &str,
        registration: &ClientRegistration,
        device_code: &str,
    ) -> Result<TokenPoll> {
        let url = format!("{}/token", self.endpoint(region));
        let response = self
            .client
            .post(&url)
            .json(&CreateTokenRequest {
                client_id: &registration.client_id,
                client_secret: &registration.client_secret,
                grant_type: DEVICE_CODE_GRANT_TYPE,
                device_code,
            })
            .send()
            .await?;

        if response.status().is_success() {
            let token: TokenResponse = response
                .json()
                .await
                .map_err(|e| Error::InvalidResponse(format!("Invalid token response: {}", e)))?;
            return Ok(TokenPoll::Issued(token));
        }

        let status = response.status();
        if status.as_u16() == 429 {
            return Ok(TokenPoll::SlowDown);
        }
        let error_type = response
            .headers()
            .get(AWS_ERROR_TYPE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.text().await.unwrap_or_default();
        debug!(status = %status, error_type = ?error_type, "Token poll not yet granted");

        let oauth_error = match serde_json::from_str::<OAuthError>(&body) {
            Ok(parsed) if !parsed.error.is_empty() => parsed,
            _ => match error_type {
                Some(ref t) => OAuthError::from_error_type(t),
                None => return Err(Error::from_status(status, &body)),
            },
        };
        oauth_error.into_poll()
    }
}
