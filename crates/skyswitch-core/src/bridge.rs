//! The seam to whatever front end owns windows and prompts.
//!
//! The desktop app answers these calls over IPC; the CLI answers them from
//! the terminal. The engine only ever sees this trait.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::Result;
use crate::oidc::{ClientRegistration, DeviceAuthorization};

/// One request the sign-in browser made, as reported by the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRequest {
    pub url: String,
    /// Form body for POSTs (where the SAML response travels).
    pub body: Option<String>,
}

impl CapturedRequest {
    pub fn new(url: impl Into<String>, body: Option<String>) -> Self {
        Self {
            url: url.into(),
            body,
        }
    }
}

#[async_trait]
pub trait DesktopBridge: Send + Sync {
    /// Ask the user for an MFA code for `session_name`.
    async fn need_mfa(&self, session_name: &str) -> Result<String>;

    /// Open an IdP sign-in browser at `idp_url` and stream the requests it
    /// makes. With `need_auth` false the window stays hidden. The channel
    /// closes when the user dismisses the window.
    async fn aws_sign_in(
        &self,
        idp_url: &str,
        need_auth: bool,
    ) -> Result<mpsc::Receiver<CapturedRequest>>;

    /// Show the device-flow user code and verification URL. Returns once the
    /// user confirms, or `Error::ModalClosed` if they dismiss it.
    async fn open_verification_window(
        &self,
        registration: &ClientRegistration,
        authorization: &DeviceAuthorization,
    ) -> Result<()>;

    async fn is_desktop_running(&self) -> bool;
}
