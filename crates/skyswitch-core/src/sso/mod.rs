//! AWS SSO (IAM Identity Center) portal access.

pub mod portal;

pub use portal::{
    list_role_assignments, HttpSsoPortal, SsoAccount, SsoAccountRole, SsoPortal,
    SsoRoleAssignment,
};
