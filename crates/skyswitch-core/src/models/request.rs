use super::credentials::StaticKeys;
use super::session::{SessionDetails, SessionKind};

/// Input to `create` and `update`. Unlike `SessionDetails`, this may carry
/// secrets that are routed to the keychain instead of the catalogue.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub session_name: String,
    /// AWS region, or Azure location.
    pub region: String,
    pub params: SessionParams,
}

#[derive(Debug, Clone)]
pub enum SessionParams {
    IamUser {
        profile_id: String,
        keys: StaticKeys,
        mfa_device: Option<String>,
    },
    IamRoleFederated {
        role_arn: String,
        idp_arn: String,
        idp_url_id: String,
        profile_id: String,
    },
    IamRoleChained {
        role_arn: String,
        parent_session_id: String,
        role_session_name: Option<String>,
        profile_id: String,
    },
    SsoRole {
        role_arn: String,
        sso_integration_id: String,
        profile_id: String,
    },
    Azure {
        tenant_id: String,
        subscription_id: String,
    },
}

impl SessionParams {
    pub fn kind(&self) -> SessionKind {
        match self {
            SessionParams::IamUser { .. } => SessionKind::IamUser,
            SessionParams::IamRoleFederated { .. } => SessionKind::IamRoleFederated,
            SessionParams::IamRoleChained { .. } => SessionKind::IamRoleChained,
            SessionParams::SsoRole { .. } => SessionKind::SsoRole,
            SessionParams::Azure { .. } => SessionKind::Azure,
        }
    }

    pub fn parent_session_id(&self) -> Option<&str> {
        match self {
            SessionParams::IamRoleChained {
                parent_session_id, ..
            } => Some(parent_session_id),
            _ => None,
        }
    }

    /// Catalogue form of these params. Secrets are left behind.
    pub fn to_details(&self) -> SessionDetails {
        match self.clone() {
            SessionParams::IamUser {
                profile_id,
                mfa_device,
                ..
            } => SessionDetails::IamUser {
                profile_id,
                mfa_device: mfa_device.filter(|d| !d.trim().is_empty()),
            },
            SessionParams::IamRoleFederated {
                role_arn,
                idp_arn,
                idp_url_id,
                profile_id,
            } => SessionDetails::IamRoleFederated {
                role_arn,
                idp_arn,
                idp_url_id,
                profile_id,
            },
            SessionParams::IamRoleChained {
                role_arn,
                parent_session_id,
                role_session_name,
                profile_id,
            } => SessionDetails::IamRoleChained {
                role_arn,
                parent_session_id,
                role_session_name: role_session_name.filter(|n| !n.trim().is_empty()),
                profile_id,
            },
            SessionParams::SsoRole {
                role_arn,
                sso_integration_id,
                profile_id,
            } => SessionDetails::SsoRole {
                role_arn,
                sso_integration_id,
                profile_id,
            },
            SessionParams::Azure {
                tenant_id,
                subscription_id,
            } => SessionDetails::Azure {
                tenant_id,
                subscription_id,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_details_drops_secrets() {
        let params = SessionParams::IamUser {
            profile_id: "p".to_string(),
            keys: StaticKeys {
                access_key_id: "AKIAEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
            },
            mfa_device: Some(" ".to_string()),
        };
        let details = params.to_details();
        assert_eq!(details.kind(), SessionKind::IamUser);
        assert_eq!(
            details,
            SessionDetails::IamUser {
                profile_id: "p".to_string(),
                mfa_device: None
            }
        );
        let json = serde_json::to_string(&details).unwrap();
        assert!(!json.contains("AKIAEXAMPLE"));
    }
}
