//! Secret storage for IAM user keys, cached MFA session tokens and SSO
//! access tokens.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use keyring::Entry;

use crate::error::{Error, Result};

/// Secret storage backend. Implementations handle their own atomicity.
pub trait Keychain: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Deleting a missing entry is not an error.
    fn delete(&self, key: &str) -> Result<()>;
}

/// OS keychain via the `keyring` crate.
pub struct KeyringKeychain {
    service: String,
}

impl KeyringKeychain {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, key: &str) -> Result<Entry> {
        Entry::new(&self.service, key)
            .map_err(|e| Error::Keychain(format!("Failed to create keyring entry: {}", e)))
    }

    /// Probe whether the platform keychain is usable at all
    pub fn is_available(&self) -> bool {
        match self.entry("skyswitch-probe") {
            Ok(entry) => !matches!(
                entry.get_password(),
                Err(keyring::Error::PlatformFailure(_)) | Err(keyring::Error::NoStorageAccess(_))
            ),
            Err(_) => false,
        }
    }
}

impl Keychain for KeyringKeychain {
    fn get(&self, key: &str) -> Result<Option<String>> {
        match self.entry(key)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(Error::Keychain(format!(
                "Failed to retrieve secret from keychain: {}",
                e
            ))),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entry(key)?
            .set_password(value)
            .map_err(|e| Error::Keychain(format!("Failed to store secret in keychain: {}", e)))
    }

    fn delete(&self, key: &str) -> Result<()> {
        match self.entry(key)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(Error::Keychain(format!(
                "Failed to delete secret from keychain: {}",
                e
            ))),
        }
    }
}

/// Process-local keychain, used where no OS keychain exists (headless
/// CI boxes) and in tests. Secrets vanish when the process exits.
#[derive(Default)]
pub struct MemoryKeychain {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryKeychain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }
}

impl Keychain for MemoryKeychain {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

// ============================================================================
// Key naming
// ============================================================================

pub fn iam_user_access_key_id(session_id: &str) -> String {
    format!("{}-iam-user-aws-session-access-key-id", session_id)
}

pub fn iam_user_secret_access_key(session_id: &str) -> String {
    format!("{}-iam-user-aws-session-secret-access-key", session_id)
}

pub fn iam_user_session_token(session_id: &str) -> String {
    format!("{}-iam-user-aws-session-token", session_id)
}

pub fn sso_access_token(integration_id: &str) -> String {
    format!("aws-sso-integration-access-token-{}", integration_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_keychain_roundtrip() {
        let keychain = MemoryKeychain::new();
        assert_eq!(keychain.get("k").unwrap(), None);

        keychain.set("k", "v").unwrap();
        assert_eq!(keychain.get("k").unwrap().as_deref(), Some("v"));
        assert!(keychain.contains("k"));

        keychain.delete("k").unwrap();
        keychain.delete("k").unwrap();
        assert!(!keychain.contains("k"));
    }

    #[test]
    fn test_key_names_are_scoped() {
        assert_ne!(iam_user_access_key_id("a"), iam_user_access_key_id("b"));
        assert_ne!(iam_user_access_key_id("a"), iam_user_secret_access_key("a"));
        assert!(sso_access_token("i1").ends_with("i1"));
    }
}
