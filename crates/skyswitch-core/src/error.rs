use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Session {0} is already started")]
    AlreadyStarted(String),

    #[error("Session {0} is already stopped")]
    AlreadyStopped(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Parent session not found for chained session {0}")]
    ParentSessionNotFound(String),

    #[error("SAML authentication failed: {0}")]
    SamlAuthentication(String),

    #[error("Sign-in window was closed")]
    ModalClosed,

    #[error("Could not extract SAML assertion: {0}")]
    AssertionExtraction(String),

    #[error("Device code expired before the sign-in was approved")]
    DeviceCodeExpired,

    /// The user denied the device authorization request.
    #[error("Sign-in was denied")]
    AccessDenied,

    /// 401: the bearer token was rejected.
    #[error("Unauthorized - access token rejected")]
    Unauthorized,

    /// 403: authenticated but not permitted.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("STS request failed: {0}")]
    Sts(String),

    #[error("Credential file error at {}: {source}", path.display())]
    CredentialFileIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Keychain error: {0}")]
    Keychain(String),

    #[error("Repository error: {0}")]
    Repository(String),

    #[error("Network error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Rate limited - please wait before retrying")]
    RateLimited,

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Azure CLI error: {0}")]
    AzureCli(String),

    #[error("SSO integration not found: {0}")]
    IntegrationNotFound(String),

    #[error("Named profile not found: {0}")]
    ProfileNotFound(String),

    #[error("IdP URL not found: {0}")]
    IdpUrlNotFound(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl Error {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn credential_file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::CredentialFileIo {
            path: path.into(),
            source,
        }
    }

    /// User-initiated aborts. These are reported, never logged as failures.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Error::ModalClosed)
    }

    /// Transient failures a user can safely retry by hand.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Sts(_) | Error::Http(_) | Error::RateLimited)
    }

    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    pub fn from_status(status: reqwest::StatusCode, body: &str) -> Self {
        let truncated = Self::truncate_body(body);
        match status.as_u16() {
            401 => Error::Unauthorized,
            403 => Error::Forbidden(truncated),
            429 => Error::RateLimited,
            _ => Error::InvalidResponse(format!("Status {}: {}", status, truncated)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_is_not_retryable() {
        assert!(Error::ModalClosed.is_cancellation());
        assert!(!Error::ModalClosed.is_retryable());
        assert!(Error::Sts("throttled".into()).is_retryable());
        assert!(!Error::AccessDenied.is_cancellation());
    }

    #[test]
    fn test_from_status_maps_codes() {
        assert!(matches!(
            Error::from_status(reqwest::StatusCode::TOO_MANY_REQUESTS, ""),
            Error::RateLimited
        ));
        assert!(matches!(
            Error::from_status(reqwest::StatusCode::UNAUTHORIZED, ""),
            Error::Unauthorized
        ));
        let err = Error::from_status(reqwest::StatusCode::BAD_GATEWAY, &"x".repeat(600));
        assert!(err.to_string().contains("truncated, 600 total bytes"));
    }

    #[test]
    fn test_forbidden_is_not_unauthorized() {
        let err = Error::from_status(
            reqwest::StatusCode::FORBIDDEN,
            r#"{"__type":"ForbiddenException","message":"No access"}"#,
        );
        match err {
            Error::Forbidden(body) => assert!(body.contains("ForbiddenException")),
            other => panic!("expected Forbidden, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_names_field() {
        let err = Error::validation("role_arn", "must not be empty");
        assert_eq!(err.to_string(), "Invalid role_arn: must not be empty");
    }
}
