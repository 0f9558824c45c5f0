//! Terminal stand-in for the desktop app's prompts.

use async_trait::async_trait;
use tokio::io::{stdin, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use skyswitch_core::oidc::{ClientRegistration, DeviceAuthorization};
use skyswitch_core::{CapturedRequest, DesktopBridge, Error, Result};

/// Prompts on stderr and reads answers from stdin.
///
/// There is no embedded browser, so SAML-federated sessions can only be
/// started from the desktop app. Cancelling the token closes any open
/// prompt with `ModalClosed`.
pub struct TerminalBridge {
    cancel: CancellationToken,
}

impl TerminalBridge {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }
}

#[async_trait]
impl DesktopBridge for TerminalBridge {
    async fn need_mfa(&self, session_name: &str) -> Result<String> {
        eprint!("MFA code for {}: ", session_name);
        let mut lines = BufReader::new(stdin()).lines();
        let line = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(Error::ModalClosed),
            line = lines.next_line() => line,
        };
        match line {
            Ok(Some(code)) if !code.trim().is_empty() => Ok(code.trim().to_string()),
            Ok(_) => Err(Error::ModalClosed),
            Err(e) => Err(Error::InvalidResponse(format!("Failed to read MFA code: {}", e))),
        }
    }

    async fn aws_sign_in(
        &self,
        idp_url: &str,
        _need_auth: bool,
    ) -> Result<mpsc::Receiver<CapturedRequest>> {
        debug!(idp_url = %idp_url, "SAML sign-in requested from the terminal");
        Err(Error::SamlAuthentication(
            "federated sign-in needs the skyswitch desktop app".to_string(),
        ))
    }

    async fn open_verification_window(
        &self,
        _registration: &ClientRegistration,
        authorization: &DeviceAuthorization,
    ) -> Result<()> {
        let url = authorization.display_url();
        eprintln!("Approve this sign-in in your browser:");
        eprintln!("  code: {}", authorization.user_code);
        eprintln!("  url:  {}", url);
        if let Err(e) = open::that(url) {
            warn!(error = %e, "Could not open a browser; visit the URL by hand");
        }
        Ok(())
    }

    async fn is_desktop_running(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancelled_prompt_is_closed() {
        let cancel = CancellationToken::new();
        let bridge = TerminalBridge::new(cancel.clone());
        cancel.cancel();

        let err = bridge.need_mfa("alice").await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn test_saml_sign_in_needs_desktop_app() {
        let bridge = TerminalBridge::new(CancellationToken::new());
        let err = bridge
            .aws_sign_in("https://acme.okta.com/app/amazon_aws/exk1/sso/saml", true)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SamlAuthentication(_)));
        assert!(!bridge.is_desktop_running().await);
    }
}
