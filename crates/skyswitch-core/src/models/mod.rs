//! Data models for sessions and the records they reference.
//!
//! - `Session`, `SessionKind`, `SessionStatus`, `SessionDetails`: the session catalogue entry
//! - `SessionParams`, `SessionRequest`: create/update input, including secrets that never
//!   land in the catalogue
//! - `CredentialsInfo`, `AwsCredentials`, `AzureAccessToken`: ephemeral generated credentials
//! - `AwsNamedProfile`, `IdpUrl`, `SsoIntegration`: records sessions point at

pub mod credentials;
pub mod request;
pub mod session;
pub mod workspace;

pub use credentials::{AwsCredentials, AzureAccessToken, CredentialsInfo, StaticKeys};
pub use request::{SessionParams, SessionRequest};
pub use session::{Session, SessionDetails, SessionKind, SessionStatus, DEFAULT_ROLE_SESSION_NAME};
pub use workspace::{AwsNamedProfile, IdpUrl, SsoIntegration, DEFAULT_PROFILE_NAME};
