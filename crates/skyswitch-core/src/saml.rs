//! SAML sign-in URL classification and assertion extraction.
//!
//! The embedded browser reports every request it makes. Authentication
//! URLs mean the identity provider wants the user to sign in (so a hidden
//! window must be shown). Assertion URLs are the cloud provider's SAML
//! consumer endpoint, whose POST body carries the assertion.

use std::sync::LazyLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regex::Regex;

use crate::error::{Error, Result};

const SAML_RESPONSE_FIELD: &str = "SAMLResponse=";
const RELAY_STATE_FIELD: &str = "&RelayState=";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloudProvider {
    Aws,
    Azure,
}

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("SAML matcher is a valid regex pattern"))
        .collect()
}

/// Identity-provider login pages, shared by both providers.
/// Order matters only for readability; any match classifies the URL.
const IDP_AUTHENTICATION_PATTERNS: &[&str] = &[
    // Generic SAML IdPs
    r"^https://[^/]+/.*[?&]SAMLRequest=",
    r"^https://[^/]+/adfs/ls/",
    r"^https://[^/]+/.*/saml2?/(sso|login|idp)",
    // Okta
    r"^https://[^/]+\.okta(preview)?\.com/",
    r"^https://[^/]+\.okta-emea\.com/",
    // Google Workspace
    r"^https://accounts\.google\.com/(ServiceLogin|signin|o/saml2)",
    // OneLogin
    r"^https://[^/]+\.onelogin\.com/",
    // Auth0
    r"^https://[^/]+\.auth0\.com/",
    // Keycloak
    r"^https://[^/]+/(auth/)?realms/[^/]+/(protocol/saml|login-actions)",
    // JumpCloud
    r"^https://sso\.jumpcloud\.com/saml2/",
    r"^https://console\.jumpcloud\.com/login",
];

/// Azure AD login pages differ per target: federating into AWS goes through
/// the SAML2 endpoint, signing into Azure itself through OAuth2 authorize.
const AWS_AZURE_AD_AUTHENTICATION_PATTERNS: &[&str] =
    &[r"^https://login\.microsoftonline\.com/[^/]+/saml2"];

const AZURE_AZURE_AD_AUTHENTICATION_PATTERNS: &[&str] = &[
    r"^https://login\.microsoftonline\.com/[^/]+/oauth2/(v2\.0/)?authorize",
    r"^https://login\.microsoftonline\.com/[^/]+/login",
];

const AWS_ASSERTION_PATTERNS: &[&str] = &[
    r"^https://signin\.aws\.amazon\.com/saml",
    r"^https://signin\.amazonaws-us-gov\.com/saml",
    r"^https://signin\.amazonaws\.cn/saml",
    r"^https://[a-z0-9-]+\.signin\.aws\.amazon\.com/saml",
];

const AZURE_ASSERTION_PATTERNS: &[&str] = &[
    r"^https://login\.microsoftonline\.com/common/oauth2/nativeclient",
    r"^https://login\.microsoftonline\.com/[^/]+/oauth2/(v2\.0/)?token",
];

struct Matchers {
    authentication: Vec<Regex>,
    assertion: Vec<Regex>,
}

static AWS_MATCHERS: LazyLock<Matchers> = LazyLock::new(|| Matchers {
    authentication: compile(
        &[IDP_AUTHENTICATION_PATTERNS, AWS_AZURE_AD_AUTHENTICATION_PATTERNS].concat(),
    ),
    assertion: compile(AWS_ASSERTION_PATTERNS),
});

static AZURE_MATCHERS: LazyLock<Matchers> = LazyLock::new(|| Matchers {
    authentication: compile(
        &[IDP_AUTHENTICATION_PATTERNS, AZURE_AZURE_AD_AUTHENTICATION_PATTERNS].concat(),
    ),
    assertion: compile(AZURE_ASSERTION_PATTERNS),
});

fn matchers(provider: CloudProvider) -> &'static Matchers {
    match provider {
        CloudProvider::Aws => &AWS_MATCHERS,
        CloudProvider::Azure => &AZURE_MATCHERS,
    }
}

/// True when the browser landed on an identity-provider login page.
/// Assertion URLs never count as authentication URLs.
pub fn is_authentication_url(provider: CloudProvider, url: &str) -> bool {
    let m = matchers(provider);
    !m.assertion.iter().any(|re| re.is_match(url))
        && m.authentication.iter().any(|re| re.is_match(url))
}

/// True when the browser is posting to the provider's assertion consumer.
pub fn is_saml_assertion_url(provider: CloudProvider, url: &str) -> bool {
    matchers(provider).assertion.iter().any(|re| re.is_match(url))
}

/// Pull the URL-decoded, base64 SAML response out of a captured form body.
pub fn extract_assertion(body: &str) -> Result<String> {
    let start = body
        .find(SAML_RESPONSE_FIELD)
        .ok_or_else(|| Error::AssertionExtraction("SAMLResponse field is missing".to_string()))?
        + SAML_RESPONSE_FIELD.len();
    let rest = &body[start..];
    let end = rest
        .find(RELAY_STATE_FIELD)
        .or_else(|| rest.find('&'))
        .unwrap_or(rest.len());
    let raw = &rest[..end];

    if raw.is_empty() {
        return Err(Error::AssertionExtraction(
            "SAMLResponse field is empty".to_string(),
        ));
    }

    let decoded = urlencoding::decode(raw)
        .map_err(|e| Error::AssertionExtraction(format!("invalid URL encoding: {}", e)))?
        .into_owned();

    BASE64
        .decode(decoded.trim())
        .map_err(|e| Error::AssertionExtraction(format!("invalid base64: {}", e)))?;

    Ok(decoded.trim().to_string())
}

/// Decode a base64 SAML response into the XML document.
pub fn decode_assertion(assertion: &str) -> Result<String> {
    let bytes = BASE64
        .decode(assertion.trim())
        .map_err(|e| Error::AssertionExtraction(format!("invalid base64: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| Error::AssertionExtraction(format!("assertion is not UTF-8: {}", e)))
}
