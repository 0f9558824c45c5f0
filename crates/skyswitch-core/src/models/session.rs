//! The session catalogue entry and its per-kind details.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Role session name used for chained sessions that don't set one.
pub const DEFAULT_ROLE_SESSION_NAME: &str = "assumed-from-leapp";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub enum SessionKind {
    IamUser,
    IamRoleFederated,
    IamRoleChained,
    SsoRole,
    Azure,
}

impl SessionKind {
    pub const ALL: [SessionKind; 5] = [
        SessionKind::IamUser,
        SessionKind::IamRoleFederated,
        SessionKind::IamRoleChained,
        SessionKind::SsoRole,
        SessionKind::Azure,
    ];

    /// Kinds that produce AWS credentials on their own and may therefore
    /// back a chained session.
    pub fn can_be_parent(&self) -> bool {
        matches!(
            self,
            SessionKind::IamUser | SessionKind::IamRoleFederated | SessionKind::SsoRole
        )
    }

    pub fn is_aws(&self) -> bool {
        !matches!(self, SessionKind::Azure)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SessionKind::IamUser => "IAM User",
            SessionKind::IamRoleFederated => "IAM Role Federated",
            SessionKind::IamRoleChained => "IAM Role Chained",
            SessionKind::SsoRole => "AWS SSO Role",
            SessionKind::Azure => "Azure",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
pub enum SessionStatus {
    #[default]
    Inactive,
    Pending,
    Active,
}

/// Kind-specific fields. The variant is the session's kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(tag = "kind", rename_all_fields = "camelCase")]
pub enum SessionDetails {
    IamUser {
        profile_id: String,
        #[serde(default)]
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
        #[serde(default)]
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

impl SessionDetails {
    pub fn kind(&self) -> SessionKind {
        match self {
            SessionDetails::IamUser { .. } => SessionKind::IamUser,
            SessionDetails::IamRoleFederated { .. } => SessionKind::IamRoleFederated,
            SessionDetails::IamRoleChained { .. } => SessionKind::IamRoleChained,
            SessionDetails::SsoRole { .. } => SessionKind::SsoRole,
            SessionDetails::Azure { .. } => SessionKind::Azure,
        }
    }

    /// Named profile the session writes into, for AWS kinds.
    pub fn profile_id(&self) -> Option<&str> {
        match self {
            SessionDetails::IamUser { profile_id, .. }
            | SessionDetails::IamRoleFederated { profile_id, .. }
            | SessionDetails::IamRoleChained { profile_id, .. }
            | SessionDetails::SsoRole { profile_id, .. } => Some(profile_id),
            SessionDetails::Azure { .. } => None,
        }
    }

    pub fn role_arn(&self) -> Option<&str> {
        match self {
            SessionDetails::IamRoleFederated { role_arn, .. }
            | SessionDetails::IamRoleChained { role_arn, .. }
            | SessionDetails::SsoRole { role_arn, .. } => Some(role_arn),
            _ => None,
        }
    }

    pub fn parent_session_id(&self) -> Option<&str> {
        match self {
            SessionDetails::IamRoleChained {
                parent_session_id, ..
            } => Some(parent_session_id),
            _ => None,
        }
    }

    pub fn sso_integration_id(&self) -> Option<&str> {
        match self {
            SessionDetails::SsoRole {
                sso_integration_id, ..
            } => Some(sso_integration_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS))]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: String,
    pub session_name: String,
    #[serde(default)]
    pub status: SessionStatus,
    /// AWS region, or Azure location.
    pub region: String,
    #[serde(default)]
    pub session_token_expiration: Option<DateTime<Utc>>,
    #[serde(default)]
    pub start_date_time: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub details: SessionDetails,
}

impl Session {
    pub fn new(session_name: String, region: String, details: SessionDetails) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            session_name,
            status: SessionStatus::Inactive,
            region,
            session_token_expiration: None,
            start_date_time: None,
            details,
        }
    }

    pub fn kind(&self) -> SessionKind {
        self.details.kind()
    }

    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    /// True when the cached token expires within `buffer` of `now`.
    /// Sessions without an expiry never need rotation.
    pub fn needs_rotation(&self, now: DateTime<Utc>, buffer: Duration) -> bool {
        match self.session_token_expiration {
            Some(expiration) => expiration - now <= buffer,
            None => false,
        }
    }

    /// Minutes until the cached token expires (for display)
    pub fn minutes_until_expiry(&self) -> Option<i64> {
        self.session_token_expiration
            .map(|exp| (exp - Utc::now()).num_minutes().max(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chained() -> Session {
        Session::new(
            "deploy".to_string(),
            "eu-west-1".to_string(),
            SessionDetails::IamRoleChained {
                role_arn: "arn:aws:iam::111111111111:role/Deploy".to_string(),
                parent_session_id: "parent".to_string(),
                role_session_name: None,
                profile_id: "default".to_string(),
            },
        )
    }

    #[test]
    fn test_parent_capable_kinds() {
        assert!(SessionKind::IamUser.can_be_parent());
        assert!(SessionKind::IamRoleFederated.can_be_parent());
        assert!(SessionKind::SsoRole.can_be_parent());
        assert!(!SessionKind::IamRoleChained.can_be_parent());
        assert!(!SessionKind::Azure.can_be_parent());
    }

    #[test]
    fn test_session_serializes_flat_with_kind_tag() {
        let session = chained();
        let json = serde_json::to_value(&session).unwrap();
        assert_eq!(json["kind"], "IamRoleChained");
        assert_eq!(json["parentSessionId"], "parent");
        assert_eq!(json["status"], "Inactive");

        let back: Session = serde_json::from_value(json).unwrap();
        assert_eq!(back, session);
    }

    #[test]
    fn test_needs_rotation() {
        let now = Utc::now();
        let mut session = chained();
        assert!(!session.needs_rotation(now, Duration::minutes(5)));

        session.session_token_expiration = Some(now + Duration::minutes(3));
        assert!(session.needs_rotation(now, Duration::minutes(5)));

        session.session_token_expiration = Some(now + Duration::minutes(30));
        assert!(!session.needs_rotation(now, Duration::minutes(5)));
    }

    #[test]
    fn test_details_accessors() {
        let session = chained();
        assert_eq!(session.kind(), SessionKind::IamRoleChained);
        assert_eq!(session.details.parent_session_id(), Some("parent"));
        assert_eq!(session.details.profile_id(), Some("default"));
        assert_eq!(session.details.sso_integration_id(), None);
    }
}
