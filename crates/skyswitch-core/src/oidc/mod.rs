//! OAuth2 device authorization grant (RFC 8628) against AWS SSO OIDC.
//!
//! `OidcDeviceFlowClient` drives the flow per portal and tracks where each
//! portal is in it. Transport is pluggable so polling can be tested on
//! tokio's paused clock.

pub mod transport;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

pub use transport::{
    ClientRegistration, DeviceAuthorization, HttpOidcTransport, OidcTransport, TokenPoll,
    TokenResponse,
};

/// Polling never runs faster than this, whatever the server advertises.
const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// RFC 8628 default when the server omits `interval`.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// Added to the interval on every `slow_down` response (RFC 8628 section 3.5).
const SLOW_DOWN_INCREMENT: Duration = Duration::from_secs(5);

/// Where one portal is in the device flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceFlowState {
    #[default]
    Unregistered,
    Registered,
    AuthorizationPending,
    Authorized,
    Denied,
    Expired,
}

/// An SSO access token and its absolute expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl From<TokenResponse> for AccessToken {
    fn from(response: TokenResponse) -> Self {
        Self {
            token: response.access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(response.expires_in),
        }
    }
}

pub struct OidcDeviceFlowClient {
    transport: Arc<dyn OidcTransport>,
    client_name: String,
    /// Keyed by portal URL
    registrations: Mutex<HashMap<String, ClientRegistration>>,
    /// Keyed by portal URL
    states: Mutex<HashMap<String, DeviceFlowState>>,
}

impl OidcDeviceFlowClient {
    pub fn new(transport: Arc<dyn OidcTransport>, client_name: impl Into<String>) -> Self {
        Self {
            transport,
            client_name: client_name.into(),
            registrations: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
        }
    }

    fn registrations(&self) -> MutexGuard<'_, HashMap<String, ClientRegistration>> {
        self.registrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, portal_url: &str, state: DeviceFlowState) {
        debug!(portal = %portal_url, state = ?state, "Device flow state");
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(portal_url.to_string(), state);
    }

    pub fn state(&self, portal_url: &str) -> DeviceFlowState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(portal_url)
            .copied()
            .unwrap_or_default()
    }

    /// Register this app as a public OIDC client, reusing an earlier
    /// registration for the same portal until its secret expires.
    pub async fn register_client(&self, portal_url: &str, region: &str) -> Result<ClientRegistration> {
        if let Some(existing) = self.registrations().get(portal_url) {
            if !existing.is_expired() {
                debug!(portal = %portal_url, "Reusing OIDC client registration");
                let existing = existing.clone();
                self.set_state(portal_url, DeviceFlowState::Registered);
                return Ok(existing);
            }
        }

        let registration = self
            .transport
            .register_client(region, &self.client_name)
            .await?;
        info!(portal = %portal_url, client_id = %registration.client_id, "Registered OIDC client");
        self.registrations()
            .insert(portal_url.to_string(), registration.clone());
        self.set_state(portal_url, DeviceFlowState::Registered);
        Ok(registration)
    }

    pub async fn start_device_authorization(
        &self,
        portal_url: &str,
        region: &str,
        registration: &ClientRegistration,
    ) -> Result<DeviceAuthorization> {
        let authorization = self
            .transport
            .start_device_authorization(region, registration, portal_url)
            .await?;
        self.set_state(portal_url, DeviceFlowState::AuthorizationPending);
        Ok(authorization)
    }

    /// Poll CreateToken until the user approves, denies, or the device code
    /// runs out. Waits at least the advertised interval before every request
    /// and never sleeps past `expires_in`.
    pub async fn poll_token(
        &self,
        portal_url: &str,
        region: &str,
        registration: &ClientRegistration,
        authorization: &DeviceAuthorization,
        cancel: &CancellationToken,
    ) -> Result<AccessToken> {
        let deadline = Instant::now() + Duration::from_secs(authorization.expires_in);
        let mut interval = Duration::from_secs(
            authorization
                .interval
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        )
        .max(MIN_POLL_INTERVAL);
        let mut attempts: u32 = 0;

        loop {
            let next_poll = Instant::now() + interval;
            if next_poll > deadline {
                warn!(portal = %portal_url, attempts, "Device code expired while polling");
                self.set_state(portal_url, DeviceFlowState::Expired);
                return Err(Error::DeviceCodeExpired);
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(portal = %portal_url, "Device authorization cancelled");
                    // The registration stays cached and usable.
                    self.set_state(portal_url, DeviceFlowState::Registered);
                    return Err(Error::ModalClosed);
                }
                _ = sleep_until(next_poll) => {}
            }

            attempts += 1;
            let poll = tokio::select! {
                _ = cancel.cancelled() => {
                    info!(portal = %portal_url, "Device authorization cancelled");
                    // The registration stays cached and usable.
                    self.set_state(portal_url, DeviceFlowState::Registered);
                    return Err(Error::ModalClosed);
                }
                poll = self.transport.create_token(region, registration, &authorization.device_code) => poll?,
            };

            match poll {
                TokenPoll::Issued(response) => {
                    info!(portal = %portal_url, attempts, "Device authorization approved");
                    self.set_state(portal_url, DeviceFlowState::Authorized);
                    return Ok(response.into());
                }
                TokenPoll::Pending => {
                    debug!(portal = %portal_url, attempts, "Authorization pending");
                }
                TokenPoll::SlowDown => {
                    interval += SLOW_DOWN_INCREMENT;
                    debug!(portal = %portal_url, interval_secs = interval.as_secs(), "Slowing down polling");
                }
                TokenPoll::Denied => {
                    warn!(portal = %portal_url, "Device authorization denied");
                    self.set_state(portal_url, DeviceFlowState::Denied);
                    return Err(Error::AccessDenied);
                }
                TokenPoll::Expired => {
                    warn!(portal = %portal_url, "Device code expired");
                    self.set_state(portal_url, DeviceFlowState::Expired);
                    return Err(Error::DeviceCodeExpired);
                }
            }
        }
    }

    /// Forget the cached registration, e.g. after the server rejects it.
    pub fn forget_registration(&self, portal_url: &str) {
        self.registrations().remove(portal_url);
        self.set_state(portal_url, DeviceFlowState::Unregistered);
    }
}
