//! Workspace configuration management.
//!
//! This module handles loading and saving the engine configuration: role
//! session durations, rotation timing, and where the credential file and
//! session catalogue live.
//!
//! Configuration is stored at `~/.config/skyswitch/config.json` unless
//! `SKYSWITCH_CONFIG` points elsewhere.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Application name used for config directory paths and the keychain service
pub const APP_NAME: &str = "skyswitch";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Session catalogue file name
const WORKSPACE_FILE: &str = "workspace.json";

/// Environment variable overriding the config file location
pub const CONFIG_ENV_VAR: &str = "SKYSWITCH_CONFIG";

/// One hour, the STS default for AssumeRole and AssumeRoleWithSAML.
const DEFAULT_ROLE_SESSION_DURATION_SECS: i32 = 3600;

/// Twelve hours. GetSessionToken allows up to 36h for IAM users; 12h keeps
/// MFA prompts to once a working day.
const DEFAULT_MFA_SESSION_DURATION_SECS: i32 = 43200;

/// Rotate when the token is within this many minutes of expiry.
const DEFAULT_REFRESH_BUFFER_MINUTES: i64 = 5;

/// How often the rotation loop scans active sessions.
const DEFAULT_ROTATION_CHECK_INTERVAL_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WorkspaceConfig {
    pub default_region: String,
    pub default_location: String,
    pub saml_role_session_duration_secs: i32,
    pub chained_role_session_duration_secs: i32,
    pub mfa_session_duration_secs: i32,
    pub refresh_buffer_minutes: i64,
    pub rotation_check_interval_secs: u64,
    pub credentials_file: Option<PathBuf>,
    pub workspace_file: Option<PathBuf>,
    pub sso_client_name: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            default_region: "us-east-1".to_string(),
            default_location: "eastus".to_string(),
            saml_role_session_duration_secs: DEFAULT_ROLE_SESSION_DURATION_SECS,
            chained_role_session_duration_secs: DEFAULT_ROLE_SESSION_DURATION_SECS,
            mfa_session_duration_secs: DEFAULT_MFA_SESSION_DURATION_SECS,
            refresh_buffer_minutes: DEFAULT_REFRESH_BUFFER_MINUTES,
            rotation_check_interval_secs: DEFAULT_ROTATION_CHECK_INTERVAL_SECS,
            credentials_file: None,
            workspace_file: None,
            sso_client_name: APP_NAME.to_string(),
        }
    }
}

impl WorkspaceConfig {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| Error::Repository(format!("Failed to read config: {}", e)))?;
            serde_json::from_str(&contents)
                .map_err(|e| Error::Repository(format!("Failed to parse config: {}", e)))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Repository(format!("Failed to create config dir: {}", e)))?;
        }
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Repository(e.to_string()))?;
        std::fs::write(path, contents)
            .map_err(|e| Error::Repository(format!("Failed to write config: {}", e)))?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
            return Ok(PathBuf::from(path));
        }
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Repository("Could not find config directory".to_string()))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Shared credentials file, `~/.aws/credentials` unless overridden.
    pub fn credentials_file_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.credentials_file {
            return Ok(path.clone());
        }
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Repository("Could not find home directory".to_string()))?;
        Ok(home.join(".aws").join("credentials"))
    }

    pub fn workspace_file_path(&self) -> Result<PathBuf> {
        if let Some(ref path) = self.workspace_file {
            return Ok(path.clone());
        }
        let config_dir = dirs::config_dir()
            .ok_or_else(|| Error::Repository("Could not find config directory".to_string()))?;
        Ok(config_dir.join(APP_NAME).join(WORKSPACE_FILE))
    }

    pub fn refresh_buffer(&self) -> Duration {
        Duration::minutes(self.refresh_buffer_minutes.max(0))
    }

    pub fn rotation_check_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.rotation_check_interval_secs.max(1))
    }
}
