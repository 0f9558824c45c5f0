//! Azure CLI (`az`) integration.
//!
//! Azure sessions don't touch the AWS credential file. Starting one fetches
//! an access token and selects the subscription; stopping clears the CLI's
//! account cache.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::models::AzureAccessToken;

/// `az` invocations can block on network and on interactive login.
const AZ_COMMAND_TIMEOUT_SECS: u64 = 300;

/// Local-time format the CLI uses for `expiresOn`
const AZ_EXPIRES_ON_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Result of one `az` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AzOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs `az` with the given arguments.
#[async_trait]
pub trait AzureCli: Send + Sync {
    async fn run(&self, args: &[&str]) -> Result<AzOutput>;
}

/// The real `az` binary on PATH.
#[derive(Debug, Clone)]
pub struct AzCommand {
    program: String,
}

impl AzCommand {
    pub fn new() -> Self {
        Self {
            program: "az".to_string(),
        }
    }

    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for AzCommand {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AzureCli for AzCommand {
    async fn run(&self, args: &[&str]) -> Result<AzOutput> {
        debug!(program = %self.program, args = ?args, "Running Azure CLI");

        let mut cmd = Command::new(&self.program);
        cmd.args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let child = cmd
            .spawn()
            .map_err(|e| Error::AzureCli(format!("failed to launch {}: {}", self.program, e)))?;

        let output = tokio::time::timeout(
            Duration::from_secs(AZ_COMMAND_TIMEOUT_SECS),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| Error::AzureCli(format!("{} timed out", self.program)))?
        .map_err(|e| Error::AzureCli(format!("{} failed: {}", self.program, e)))?;

        Ok(AzOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccessTokenOutput {
    access_token: String,
    #[serde(default)]
    expires_on: Option<String>,
    /// Unix seconds; newer CLI releases add this next to `expiresOn`
    #[serde(default, rename = "expires_on")]
    expires_on_epoch: Option<i64>,
    #[serde(default)]
    subscription: Option<String>,
    #[serde(default)]
    tenant: Option<String>,
}

/// Parse `expiresOn`: RFC 3339, or the CLI's local-time format.
pub fn parse_expires_on(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Ok(parsed.with_timezone(&Utc));
    }
    let naive = NaiveDateTime::parse_from_str(value, AZ_EXPIRES_ON_FORMAT)
        .map_err(|e| Error::AzureCli(format!("unrecognised expiresOn '{}': {}", value, e)))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| Error::AzureCli(format!("expiresOn '{}' is not a valid local time", value)))
}

fn is_login_required(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("az login") || lower.contains("not logged in")
}

fn failure(action: &str, output: &AzOutput) -> Error {
    Error::AzureCli(format!("{} failed: {}", action, output.stderr.trim()))
}

/// Token, login and account operations on top of an `AzureCli`.
pub struct AzureAccount<'a> {
    cli: &'a dyn AzureCli,
}

impl<'a> AzureAccount<'a> {
    pub fn new(cli: &'a dyn AzureCli) -> Self {
        Self { cli }
    }

    /// Fetch an access token, logging in once if the CLI has no account.
    pub async fn get_access_token(
        &self,
        tenant_id: &str,
        subscription_id: &str,
    ) -> Result<AzureAccessToken> {
        let args = [
            "account",
            "get-access-token",
            "--tenant",
            tenant_id,
            "--subscription",
            subscription_id,
            "--output",
            "json",
        ];

        let mut output = self.cli.run(&args).await?;
        if !output.success && is_login_required(&output.stderr) {
            info!(tenant_id = %tenant_id, "Azure CLI not logged in, running az login");
            self.login(tenant_id).await?;
            output = self.cli.run(&args).await?;
        }
        if !output.success {
            return Err(failure("az account get-access-token", &output));
        }

        let parsed: AccessTokenOutput = serde_json::from_str(&output.stdout)
            .map_err(|e| Error::AzureCli(format!("invalid get-access-token output: {}", e)))?;

        let expiration = match (parsed.expires_on_epoch, parsed.expires_on.as_deref()) {
            (Some(epoch), _) => Utc
                .timestamp_opt(epoch, 0)
                .single()
                .ok_or_else(|| Error::AzureCli(format!("invalid expires_on {}", epoch)))?,
            (None, Some(text)) => parse_expires_on(text)?,
            (None, None) => {
                return Err(Error::AzureCli(
                    "get-access-token output has no expiry".to_string(),
                ))
            }
        };

        Ok(AzureAccessToken {
            access_token: parsed.access_token,
            expiration,
            tenant_id: parsed.tenant.unwrap_or_else(|| tenant_id.to_string()),
            subscription_id: parsed
                .subscription
                .unwrap_or_else(|| subscription_id.to_string()),
        })
    }

    pub async fn login(&self, tenant_id: &str) -> Result<()> {
        let output = self.cli.run(&["login", "--tenant", tenant_id]).await?;
        if !output.success {
            return Err(failure("az login", &output));
        }
        Ok(())
    }

    pub async fn set_subscription(&self, subscription_id: &str) -> Result<()> {
        let output = self
            .cli
            .run(&["account", "set", "--subscription", subscription_id])
            .await?;
        if !output.success {
            return Err(failure("az account set", &output));
        }
        Ok(())
    }

    pub async fn clear(&self) -> Result<()> {
        let output = self.cli.run(&["account", "clear"]).await?;
        if !output.success {
            return Err(failure("az account clear", &output));
        }
        Ok(())
    }
}
