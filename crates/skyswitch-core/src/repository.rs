//! Session catalogue persistence.
//!
//! `WorkspaceRepository` is the CRUD surface the engine needs. The
//! bundled `JsonWorkspaceRepository` keeps everything in one JSON document,
//! either on disk or purely in memory.

use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{
    AwsNamedProfile, IdpUrl, Session, SsoIntegration, DEFAULT_PROFILE_NAME,
};

pub trait WorkspaceRepository: Send + Sync {
    fn get_sessions(&self) -> Result<Vec<Session>>;

    /// Fails with `SessionNotFound` for unknown ids.
    fn get_session_by_id(&self, session_id: &str) -> Result<Session>;

    fn add_session(&self, session: Session) -> Result<()>;

    fn update_session(&self, session: &Session) -> Result<()>;

    fn delete_session(&self, session_id: &str) -> Result<()>;

    fn get_profiles(&self) -> Result<Vec<AwsNamedProfile>>;

    fn get_profile_name(&self, profile_id: &str) -> Result<String>;

    fn add_profile(&self, profile: AwsNamedProfile) -> Result<()>;

    fn default_profile_id(&self) -> Result<String>;

    fn get_idp_url(&self, idp_url_id: &str) -> Result<IdpUrl>;

    fn add_idp_url(&self, idp_url: IdpUrl) -> Result<()>;

    fn get_sso_integrations(&self) -> Result<Vec<SsoIntegration>>;

    fn get_sso_integration(&self, integration_id: &str) -> Result<SsoIntegration>;

    fn add_sso_integration(&self, integration: SsoIntegration) -> Result<()>;

    fn update_sso_integration(&self, integration: &SsoIntegration) -> Result<()>;

    fn delete_sso_integration(&self, integration_id: &str) -> Result<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct WorkspaceData {
    sessions: Vec<Session>,
    profiles: Vec<AwsNamedProfile>,
    idp_urls: Vec<IdpUrl>,
    sso_integrations: Vec<SsoIntegration>,
}

impl Default for WorkspaceData {
    fn default() -> Self {
        Self {
            sessions: Vec::new(),
            profiles: vec![AwsNamedProfile::new(DEFAULT_PROFILE_NAME)],
            idp_urls: Vec::new(),
            sso_integrations: Vec::new(),
        }
    }
}

pub struct JsonWorkspaceRepository {
    path: Option<PathBuf>,
    data: Mutex<WorkspaceData>,
}

impl JsonWorkspaceRepository {
    /// Volatile repository; nothing touches disk.
    pub fn in_memory() -> Self {
        Self {
            path: None,
            data: Mutex::new(WorkspaceData::default()),
        }
    }

    /// Load the workspace file, starting empty if it does not exist yet.
    pub fn open(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| Error::Repository(format!("Failed to read workspace file: {}", e)))?;
            let mut data: WorkspaceData = serde_json::from_str(&contents)
                .map_err(|e| Error::Repository(format!("Failed to parse workspace file: {}", e)))?;
            if !data.profiles.iter().any(|p| p.name == DEFAULT_PROFILE_NAME) {
                data.profiles.push(AwsNamedProfile::new(DEFAULT_PROFILE_NAME));
            }
            data
        } else {
            WorkspaceData::default()
        };
        debug!(path = %path.display(), sessions = data.sessions.len(), "Workspace loaded");

        Ok(Self {
            path: Some(path),
            data: Mutex::new(data),
        })
    }

    fn lock(&self) -> MutexGuard<'_, WorkspaceData> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn save(&self, data: &WorkspaceData) -> Result<()> {
        let Some(ref path) = self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Repository(format!("Failed to create workspace dir: {}", e)))?;
        }
        let contents = serde_json::to_string_pretty(data)
            .map_err(|e| Error::Repository(e.to_string()))?;
        std::fs::write(path, contents)
            .map_err(|e| Error::Repository(format!("Failed to write workspace file: {}", e)))?;
        Ok(())
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut WorkspaceData) -> Result<T>) -> Result<T> {
        let mut data = self.lock();
        let result = f(&mut data)?;
        self.save(&data)?;
        Ok(result)
    }
}

impl WorkspaceRepository for JsonWorkspaceRepository {
    fn get_sessions(&self) -> Result<Vec<Session>> {
        Ok(self.lock().sessions.clone())
    }

    fn get_session_by_id(&self, session_id: &str) -> Result<Session> {
        self.lock()
            .sessions
            .iter()
            .find(|s| s.session_id == session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    fn add_session(&self, session: Session) -> Result<()> {
        self.mutate(|data| {
            if data.sessions.iter().any(|s| s.session_id == session.session_id) {
                return Err(Error::Repository(format!(
                    "Duplicate session id {}",
                    session.session_id
                )));
            }
            data.sessions.push(session);
            Ok(())
        })
    }

    fn update_session(&self, session: &Session) -> Result<()> {
        self.mutate(|data| {
            let slot = data
                .sessions
                .iter_mut()
                .find(|s| s.session_id == session.session_id)
                .ok_or_else(|| Error::SessionNotFound(session.session_id.clone()))?;
            *slot = session.clone();
            Ok(())
        })
    }

    fn delete_session(&self, session_id: &str) -> Result<()> {
        self.mutate(|data| {
            let before = data.sessions.len();
            data.sessions.retain(|s| s.session_id != session_id);
            if data.sessions.len() == before {
                return Err(Error::SessionNotFound(session_id.to_string()));
            }
            Ok(())
        })
    }

    fn get_profiles(&self) -> Result<Vec<AwsNamedProfile>> {
        Ok(self.lock().profiles.clone())
    }

    fn get_profile_name(&self, profile_id: &str) -> Result<String> {
        self.lock()
            .profiles
            .iter()
            .find(|p| p.id == profile_id)
            .map(|p| p.name.clone())
            .ok_or_else(|| Error::ProfileNotFound(profile_id.to_string()))
    }

    fn add_profile(&self, profile: AwsNamedProfile) -> Result<()> {
        self.mutate(|data| {
            if data.profiles.iter().any(|p| p.name == profile.name) {
                return Err(Error::validation(
                    "profile",
                    format!("a profile named {} already exists", profile.name),
                ));
            }
            data.profiles.push(profile);
            Ok(())
        })
    }

    fn default_profile_id(&self) -> Result<String> {
        self.lock()
            .profiles
            .iter()
            .find(|p| p.name == DEFAULT_PROFILE_NAME)
            .map(|p| p.id.clone())
            .ok_or_else(|| Error::ProfileNotFound(DEFAULT_PROFILE_NAME.to_string()))
    }

    fn get_idp_url(&self, idp_url_id: &str) -> Result<IdpUrl> {
        self.lock()
            .idp_urls
            .iter()
            .find(|u| u.id == idp_url_id)
            .cloned()
            .ok_or_else(|| Error::IdpUrlNotFound(idp_url_id.to_string()))
    }

    fn add_idp_url(&self, idp_url: IdpUrl) -> Result<()> {
        self.mutate(|data| {
            data.idp_urls.push(idp_url);
            Ok(())
        })
    }

    fn get_sso_integrations(&self) -> Result<Vec<SsoIntegration>> {
        Ok(self.lock().sso_integrations.clone())
    }

    fn get_sso_integration(&self, integration_id: &str) -> Result<SsoIntegration> {
        self.lock()
            .sso_integrations
            .iter()
            .find(|i| i.id == integration_id)
            .cloned()
            .ok_or_else(|| Error::IntegrationNotFound(integration_id.to_string()))
    }

    fn add_sso_integration(&self, integration: SsoIntegration) -> Result<()> {
        self.mutate(|data| {
            data.sso_integrations.push(integration);
            Ok(())
        })
    }

    fn update_sso_integration(&self, integration: &SsoIntegration) -> Result<()> {
        self.mutate(|data| {
            let slot = data
                .sso_integrations
                .iter_mut()
                .find(|i| i.id == integration.id)
                .ok_or_else(|| Error::IntegrationNotFound(integration.id.clone()))?;
            *slot = integration.clone();
            Ok(())
        })
    }

    fn delete_sso_integration(&self, integration_id: &str) -> Result<()> {
        self.mutate(|data| {
            data.sso_integrations.retain(|i| i.id != integration_id);
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SessionDetails;

    fn azure_session() -> Session {
        Session::new(
            "azure".to_string(),
            "eastus".to_string(),
            SessionDetails::Azure {
                tenant_id: "t".to_string(),
                subscription_id: "s".to_string(),
            },
        )
    }

    #[test]
    fn test_default_profile_exists() {
        let repo = JsonWorkspaceRepository::in_memory();
        let id = repo.default_profile_id().unwrap();
        assert_eq!(repo.get_profile_name(&id).unwrap(), "default");
    }

    #[test]
    fn test_session_crud() {
        let repo = JsonWorkspaceRepository::in_memory();
        let mut session = azure_session();
        repo.add_session(session.clone()).unwrap();
        assert!(repo.add_session(session.clone()).is_err());

        session.session_name = "renamed".to_string();
        repo.update_session(&session).unwrap();
        assert_eq!(
            repo.get_session_by_id(&session.session_id).unwrap().session_name,
            "renamed"
        );

        repo.delete_session(&session.session_id).unwrap();
        assert!(matches!(
            repo.get_session_by_id(&session.session_id),
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_file_repository_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        let session = azure_session();
        {
            let repo = JsonWorkspaceRepository::open(path.clone()).unwrap();
            repo.add_session(session.clone()).unwrap();
            repo.add_idp_url(IdpUrl::new("https://idp.example.com/saml")).unwrap();
        }

        let repo = JsonWorkspaceRepository::open(path).unwrap();
        assert_eq!(repo.get_sessions().unwrap(), vec![session]);
        assert!(repo.default_profile_id().is_ok());
    }

    #[test]
    fn test_duplicate_profile_name_rejected() {
        let repo = JsonWorkspaceRepository::in_memory();
        assert!(repo.add_profile(AwsNamedProfile::new("default")).is_err());
        repo.add_profile(AwsNamedProfile::new("work")).unwrap();
        assert_eq!(repo.get_profiles().unwrap().len(), 2);
    }
}
