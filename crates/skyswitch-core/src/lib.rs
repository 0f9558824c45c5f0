//! skyswitch core - session lifecycle and credential generation for AWS and
//! Azure identities.
//!
//! A session is a named identity (IAM user, federated role, chained role,
//! SSO role, or Azure subscription). Starting one generates short-lived
//! credentials and writes them into the shared AWS credentials file (or
//! selects the subscription in the Azure CLI). Stopping removes them.
//!
//! - `registry::SessionRegistry`: entry point; routes lifecycle calls by kind
//! - `services`: the shared state machine and one strategy per kind
//! - `rotation::RotationService`: refreshes active sessions before expiry
//! - `credential_file`, `saml`, `oidc`, `sso`, `sts`, `azure`: protocol plumbing
//! - `bridge`, `keychain`, `repository`: seams to the front end and storage

pub mod azure;
pub mod bridge;
pub mod config;
pub mod credential_file;
pub mod error;
pub mod keychain;
pub mod models;
pub mod notifier;
pub mod oidc;
pub mod registry;
pub mod repository;
pub mod rotation;
pub mod saml;
pub mod services;
pub mod sso;
pub mod sts;

pub use bridge::{CapturedRequest, DesktopBridge};
pub use config::WorkspaceConfig;
pub use credential_file::CredentialFile;
pub use error::{Error, Result};
pub use keychain::{Keychain, KeyringKeychain, MemoryKeychain};
pub use notifier::{SessionEvent, SessionNotifier};
pub use registry::{Backends, SessionRegistry};
pub use repository::{JsonWorkspaceRepository, WorkspaceRepository};
pub use rotation::{RotationReport, RotationService};
pub use services::{SessionContext, SessionService, SessionStrategy, SyncReport};
