//! AWS SSO portal API: account and role enumeration, role credentials.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::models::AwsCredentials;

// ============================================================================
// Constants
// ============================================================================

/// Header carrying the OIDC access token on every portal call
const BEARER_TOKEN_HEADER: &str = "x-amz-sso_bearer_token";

/// HTTP request timeout in seconds.
const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

/// Page size for account and role listings (the service maximum)
const PAGE_SIZE: u32 = 100;

/// Concurrent ListAccountRoles calls while enumerating.
/// Large orgs have hundreds of accounts; more than this trips throttling.
const ROLE_LISTING_CONCURRENCY: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoAccount {
    pub account_id: String,
    #[serde(default)]
    pub account_name: String,
    #[serde(default)]
    pub email_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SsoAccountRole {
    pub account_id: String,
    pub role_name: String,
}

/// One role the signed-in user can assume, with its account's display name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SsoRoleAssignment {
    pub account_id: String,
    pub account_name: String,
    pub role_name: String,
}

impl SsoRoleAssignment {
    pub fn role_arn(&self) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account_id, self.role_name)
    }
}

#[async_trait]
pub trait SsoPortal: Send + Sync {
    async fn list_accounts(&self, region: &str, access_token: &str) -> Result<Vec<SsoAccount>>;

    async fn list_account_roles(
        &self,
        region: &str,
        access_token: &str,
        account_id: &str,
    ) -> Result<Vec<SsoAccountRole>>;

    async fn get_role_credentials(
        &self,
        region: &str,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<AwsCredentials>;
}

/// Every role across every account, listing roles a few accounts at a time.
pub async fn list_role_assignments(
    portal: &dyn SsoPortal,
    region: &str,
    access_token: &str,
) -> Result<Vec<SsoRoleAssignment>> {
    let accounts = portal.list_accounts(region, access_token).await?;
    debug!(accounts = accounts.len(), "Listing roles for SSO accounts");

    let per_account: Vec<Vec<SsoRoleAssignment>> = stream::iter(accounts)
        .map(|account| async move {
            let roles = portal
                .list_account_roles(region, access_token, &account.account_id)
                .await?;
            Ok::<_, Error>(
                roles
                    .into_iter()
                    .map(|role| SsoRoleAssignment {
                        account_id: account.account_id.clone(),
                        account_name: account.account_name.clone(),
                        role_name: role.role_name,
                    })
                    .collect::<Vec<_>>(),
            )
        })
        .buffer_unordered(ROLE_LISTING_CONCURRENCY)
        .try_collect()
        .await?;

    let mut assignments: Vec<SsoRoleAssignment> = per_account.into_iter().flatten().collect();
    assignments.sort_by(|a, b| {
        (&a.account_name, &a.account_id, &a.role_name).cmp(&(&b.account_name, &b.account_id, &b.role_name))
    });
    Ok(assignments)
}

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAccountsResponse {
    #[serde(default)]
    account_list: Vec<SsoAccount>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListAccountRolesResponse {
    #[serde(default)]
    role_list: Vec<SsoAccountRole>,
    #[serde(default)]
    next_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RoleCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: String,
    /// Milliseconds since the epoch
    expiration: i64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetRoleCredentialsResponse {
    role_credentials: RoleCredentials,
}

/// reqwest-backed portal client.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpSsoPortal {
    client: Client,
    endpoint_override: Option<String>,
}

impl HttpSsoPortal {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            endpoint_override: None,
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint_override = Some(endpoint.into());
        self
    }

    fn endpoint(&self, region: &str) -> String {
        self.endpoint_override
            .clone()
            .unwrap_or_else(|| format!("https://portal.sso.{}.amazonaws.com", region))
    }

    /// Check response status, returning None for rate-limited (429) responses.
    async fn check_response_for_retry(
        response: reqwest::Response,
    ) -> Result<Option<reqwest::Response>> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Ok(None);
        }
        if status.is_success() {
            Ok(Some(response))
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::from_status(status, &body))
        }
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: &str,
        access_token: &str,
        query: &[(&str, &str)],
    ) -> Result<T> {
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let response = self
                .client
                .get(url)
                .header(BEARER_TOKEN_HEADER, access_token)
                .query(query)
                .send()
                .await?;

            match Self::check_response_for_retry(response).await? {
                Some(response) => {
                    return response.json().await.map_err(|e| {
                        Error::InvalidResponse(format!("Failed to parse response from {}: {}", url, e))
                    });
                }
                None => {
                    retries += 1;
                    if retries > MAX_RATE_LIMIT_RETRIES {
                        return Err(Error::RateLimited);
                    }
                    warn!(url = url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms *= 2;
                }
            }
        }
    }
}

#[async_trait]
impl SsoPortal for HttpSsoPortal {
    async fn list_accounts(&self, region: &str, access_token: &str) -> Result<Vec<SsoAccount>> {
        let url = format!("{}/assignment/accounts", self.endpoint(region));
        let page_size = PAGE_SIZE.to_string();
        let mut accounts = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut query = vec![("max_result", page_size.as_str())];
            if let Some(ref token) = next_token {
                query.push(("next_token", token.as_str()));
            }
            let page: ListAccountsResponse = self.get(&url, access_token, &query).await?;
            accounts.extend(page.account_list);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        debug!(count = accounts.len(), "Listed SSO accounts");
        Ok(accounts)
    }

    async fn list_account_roles(
        &self,
        region: &str,
        access_token: &str,
        account_id: &str,
    ) -> Result<Vec<SsoAccountRole>> {
        let url = format!("{}/assignment/roles", self.endpoint(region));
        let page_size = PAGE_SIZE.to_string();
        let mut roles = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let mut query = vec![
                ("account_id", account_id),
                ("max_result", page_size.as_str()),
            ];
            if let Some(ref token) = next_token {
                query.push(("next_token", token.as_str()));
            }
            let page: ListAccountRolesResponse = self.get(&url, access_token, &query).await?;
            roles.extend(page.role_list);

            match page.next_token {
                Some(token) if !token.is_empty() => next_token = Some(token),
                _ => break,
            }
        }

        Ok(roles)
    }

    async fn get_role_credentials(
        &self,
        region: &str,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<AwsCredentials> {
        let url = format!("{}/federation/credentials", self.endpoint(region));
        let response: GetRoleCredentialsResponse = self
            .get(
                &url,
                access_token,
                &[("account_id", account_id), ("role_name", role_name)],
            )
            .await?;

        let creds = response.role_credentials;
        let expiration = Utc
            .timestamp_millis_opt(creds.expiration)
            .single()
            .ok_or_else(|| {
                Error::InvalidResponse(format!("Invalid credential expiration {}", creds.expiration))
            })?;

        Ok(AwsCredentials {
            access_key_id: creds.access_key_id,
            secret_access_key: creds.secret_access_key,
            session_token: Some(creds.session_token),
            expiration: Some(expiration),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_credentials_deserialization() {
        let json = r#"{
            "roleCredentials": {
                "accessKeyId": "ASIAEXAMPLE",
                "secretAccessKey": "secret",
                "sessionToken": "token",
                "expiration": 1700000000000
            }
        }"#;
        let response: GetRoleCredentialsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.role_credentials.access_key_id, "ASIAEXAMPLE");
        assert_eq!(response.role_credentials.expiration, 1_700_000_000_000);
    }

    #[test]
    fn test_account_listing_deserialization() {
        let json = r#"{
            "accountList": [
                {"accountId": "111111111111", "accountName": "prod", "emailAddress": "ops@acme.io"},
                {"accountId": "222222222222", "accountName": "dev"}
            ],
            "nextToken": null
        }"#;
        let page: ListAccountsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(page.account_list.len(), 2);
        assert!(page.next_token.is_none());
        assert_eq!(page.account_list[1].email_address, None);
    }

    #[test]
    fn test_assignment_role_arn() {
        let assignment = SsoRoleAssignment {
            account_id: "111111111111".to_string(),
            account_name: "prod".to_string(),
            role_name: "AdministratorAccess".to_string(),
        };
        assert_eq!(
            assignment.role_arn(),
            "arn:aws:iam::111111111111:role/AdministratorAccess"
        );
    }

    struct TwoAccounts;

    #[async_trait]
    impl SsoPortal for TwoAccounts {
        async fn list_accounts(&self, _region: &str, _token: &str) -> Result<Vec<SsoAccount>> {
            Ok(vec![
                SsoAccount {
                    account_id: "222222222222".to_string(),
                    account_name: "dev".to_string(),
                    email_address: None,
                },
                SsoAccount {
                    account_id: "111111111111".to_string(),
                    account_name: "prod".to_string(),
                    email_address: None,
                },
            ])
        }

        async fn list_account_roles(
            &self,
            _region: &str,
            _token: &str,
            account_id: &str,
        ) -> Result<Vec<SsoAccountRole>> {
            Ok(["ReadOnly", "Admin"]
                .iter()
                .map(|r| SsoAccountRole {
                    account_id: account_id.to_string(),
                    role_name: r.to_string(),
                })
                .collect())
        }

        async fn get_role_credentials(
            &self,
            _region: &str,
            _token: &str,
            _account_id: &str,
            _role_name: &str,
        ) -> Result<AwsCredentials> {
            Err(Error::Unauthorized)
        }
    }

    #[tokio::test]
    async fn test_list_role_assignments_flattens_sorted() {
        let assignments = list_role_assignments(&TwoAccounts, "us-east-1", "t")
            .await
            .unwrap();
        assert_eq!(assignments.len(), 4);
        assert_eq!(assignments[0].account_name, "dev");
        assert_eq!(assignments[0].role_name, "Admin");
        assert_eq!(assignments[3].account_name, "prod");
        assert_eq!(assignments[3].role_name, "ReadOnly");
    }
}
