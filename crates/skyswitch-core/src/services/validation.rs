//! Create/update input checks. Every failure names the offending field.

use std::sync::LazyLock;

use regex::{Regex, RegexBuilder};

use crate::error::{Error, Result};
use crate::models::{SessionParams, SessionRequest};
use crate::repository::WorkspaceRepository;

pub const AWS_REGIONS: &[&str] = &[
    "af-south-1",
    "ap-east-1",
    "ap-northeast-1",
    "ap-northeast-2",
    "ap-northeast-3",
    "ap-south-1",
    "ap-south-2",
    "ap-southeast-1",
    "ap-southeast-2",
    "ap-southeast-3",
    "ap-southeast-4",
    "ap-southeast-5",
    "ap-southeast-7",
    "ca-central-1",
    "ca-west-1",
    "cn-north-1",
    "cn-northwest-1",
    "eu-central-1",
    "eu-central-2",
    "eu-north-1",
    "eu-south-1",
    "eu-south-2",
    "eu-west-1",
    "eu-west-2",
    "eu-west-3",
    "il-central-1",
    "me-central-1",
    "me-south-1",
    "mx-central-1",
    "sa-east-1",
    "us-east-1",
    "us-east-2",
    "us-gov-east-1",
    "us-gov-west-1",
    "us-west-1",
    "us-west-2",
];

pub const AZURE_LOCATIONS: &[&str] = &[
    "australiacentral",
    "australiaeast",
    "australiasoutheast",
    "brazilsouth",
    "canadacentral",
    "canadaeast",
    "centralindia",
    "centralus",
    "eastasia",
    "eastus",
    "eastus2",
    "francecentral",
    "germanywestcentral",
    "israelcentral",
    "italynorth",
    "japaneast",
    "japanwest",
    "koreacentral",
    "koreasouth",
    "mexicocentral",
    "northcentralus",
    "northeurope",
    "norwayeast",
    "polandcentral",
    "qatarcentral",
    "southafricanorth",
    "southcentralus",
    "southeastasia",
    "southindia",
    "spaincentral",
    "swedencentral",
    "switzerlandnorth",
    "uaenorth",
    "uksouth",
    "ukwest",
    "westcentralus",
    "westeurope",
    "westindia",
    "westus",
    "westus2",
    "westus3",
];

static ROLE_ARN: LazyLock<Regex> = LazyLock::new(|| {
    // Unicode `\w` repeated 512 times exceeds the default 10 MiB compiled-size limit.
    RegexBuilder::new(r"^arn:aws(-[a-z]+)*:iam::\d{12}:role/[\w+=,.@/-]{1,512}$")
        .size_limit(64 * 1024 * 1024)
        .build()
        .expect("ROLE_ARN is a valid regex pattern")
});

static SAML_PROVIDER_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws(-[a-z]+)*:iam::\d{12}:saml-provider/[\w.-]{1,128}$")
        .expect("SAML_PROVIDER_ARN is a valid regex pattern")
});

static MFA_DEVICE_ARN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^arn:aws(-[a-z]+)*:iam::\d{12}:(mfa|u2f)/[\w+=,.@/-]+$")
        .expect("MFA_DEVICE_ARN is a valid regex pattern")
});

pub fn is_role_arn(value: &str) -> bool {
    ROLE_ARN.is_match(value)
}

pub fn is_saml_provider_arn(value: &str) -> bool {
    SAML_PROVIDER_ARN.is_match(value)
}

/// Account id and role name from `arn:<partition>:iam::<account>:role/<path/><name>`.
pub fn parse_role_arn(value: &str) -> Result<(String, String)> {
    if !is_role_arn(value) {
        return Err(Error::validation("role_arn", format!("'{}' is not a role ARN", value)));
    }
    let mut parts = value.splitn(6, ':');
    let account_id = parts.nth(4).unwrap_or_default().to_string();
    let resource = parts.next().unwrap_or_default();
    let role_name = resource
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    Ok((account_id, role_name))
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::validation(field, "must not be empty"));
    }
    Ok(())
}

fn require_role_arn(value: &str) -> Result<()> {
    if !is_role_arn(value) {
        return Err(Error::validation(
            "role_arn",
            format!("'{}' is not an IAM role ARN", value),
        ));
    }
    Ok(())
}

fn require_profile(repository: &dyn WorkspaceRepository, profile_id: &str) -> Result<()> {
    repository
        .get_profile_name(profile_id)
        .map(|_| ())
        .map_err(|_| Error::validation("profile_id", format!("no named profile {}", profile_id)))
}

/// Syntax and reference checks for a create or update request.
pub fn validate_request(repository: &dyn WorkspaceRepository, request: &SessionRequest) -> Result<()> {
    require_non_empty("session_name", &request.session_name)?;

    match &request.params {
        SessionParams::Azure {
            tenant_id,
            subscription_id,
        } => {
            if !AZURE_LOCATIONS.contains(&request.region.as_str()) {
                return Err(Error::validation(
                    "region",
                    format!("'{}' is not an Azure location", request.region),
                ));
            }
            require_non_empty("tenant_id", tenant_id)?;
            require_non_empty("subscription_id", subscription_id)?;
            return Ok(());
        }
        _ => {
            if !AWS_REGIONS.contains(&request.region.as_str()) {
                return Err(Error::validation(
                    "region",
                    format!("'{}' is not an AWS region", request.region),
                ));
            }
        }
    }

    match &request.params {
        SessionParams::IamUser {
            profile_id,
            keys,
            mfa_device,
        } => {
            require_non_empty("access_key_id", &keys.access_key_id)?;
            require_non_empty("secret_access_key", &keys.secret_access_key)?;
            if let Some(device) = mfa_device.as_deref().filter(|d| !d.trim().is_empty()) {
                if !MFA_DEVICE_ARN.is_match(device) {
                    return Err(Error::validation(
                        "mfa_device",
                        format!("'{}' is not an MFA device ARN", device),
                    ));
                }
            }
            require_profile(repository, profile_id)
        }
        SessionParams::IamRoleFederated {
            role_arn,
            idp_arn,
            idp_url_id,
            profile_id,
        } => {
            require_role_arn(role_arn)?;
            if !is_saml_provider_arn(idp_arn) {
                return Err(Error::validation(
                    "idp_arn",
                    format!("'{}' is not a SAML provider ARN", idp_arn),
                ));
            }
            repository
                .get_idp_url(idp_url_id)
                .map_err(|_| Error::validation("idp_url_id", format!("no IdP URL {}", idp_url_id)))?;
            require_profile(repository, profile_id)
        }
        SessionParams::IamRoleChained {
            role_arn,
            parent_session_id,
            profile_id,
            ..
        } => {
            require_role_arn(role_arn)?;
            let parent = repository.get_session_by_id(parent_session_id).map_err(|_| {
                Error::validation(
                    "parent_session_id",
                    format!("no session {}", parent_session_id),
                )
            })?;
            if !parent.kind().can_be_parent() {
                return Err(Error::validation(
                    "parent_session_id",
                    format!(
                        "a {} session cannot be a parent",
                        parent.kind().display_name()
                    ),
                ));
            }
            require_profile(repository, profile_id)
        }
        SessionParams::SsoRole {
            role_arn,
            sso_integration_id,
            profile_id,
        } => {
            require_role_arn(role_arn)?;
            repository.get_sso_integration(sso_integration_id).map_err(|_| {
                Error::validation(
                    "sso_integration_id",
                    format!("no SSO integration {}", sso_integration_id),
                )
            })?;
            require_profile(repository, profile_id)
        }
        SessionParams::Azure { .. } => Ok(()),
    }
}
