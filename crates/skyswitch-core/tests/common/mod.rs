//! Integration test helpers for skyswitch-core.
//!
//! In-memory fakes for every external collaborator plus a `Harness` that
//! wires them into a registry backed by a scratch credentials file.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

use skyswitch_core::azure::{AzOutput, AzureCli};
use skyswitch_core::models::{
    AwsCredentials, AwsNamedProfile, IdpUrl, SessionParams, SessionRequest, SsoIntegration,
    StaticKeys,
};
use skyswitch_core::oidc::{ClientRegistration, DeviceAuthorization, OidcTransport, TokenPoll, TokenResponse};
use skyswitch_core::sso::{SsoAccount, SsoAccountRole, SsoPortal};
use skyswitch_core::sts::{MfaToken, StsApi};
use skyswitch_core::{
    Backends, CapturedRequest, CredentialFile, DesktopBridge, Error, JsonWorkspaceRepository,
    MemoryKeychain, Result, SessionContext, SessionNotifier, SessionRegistry, WorkspaceConfig,
    WorkspaceRepository,
};

static INIT: Once = Once::new();

/// Initialize logging for tests (once).
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

// ============================================================================
// STS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StsCall {
    AssumeRole {
        signed_with: String,
        role_arn: String,
        role_session_name: String,
    },
    AssumeRoleWithSaml {
        role_arn: String,
        principal_arn: String,
        assertion: String,
    },
    GetSessionToken {
        signed_with: String,
        mfa_code: Option<String>,
    },
}

pub struct FakeSts {
    calls: Mutex<Vec<StsCall>>,
    counter: AtomicUsize,
    pub fail: AtomicBool,
    /// Lifetime of issued credentials
    pub lifetime: Mutex<Duration>,
}

impl FakeSts {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            counter: AtomicUsize::new(0),
            fail: AtomicBool::new(false),
            lifetime: Mutex::new(Duration::hours(1)),
        }
    }

    pub fn calls(&self) -> Vec<StsCall> {
        self.calls.lock().unwrap().clone()
    }

    fn issue(&self, call: StsCall, prefix: &str) -> Result<AwsCredentials> {
        self.calls.lock().unwrap().push(call);
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Sts("simulated STS outage".to_string()));
        }
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AwsCredentials {
            access_key_id: format!("ASIA{}{}", prefix, n),
            secret_access_key: format!("{}-secret-{}", prefix, n),
            session_token: Some(format!("{}-token-{}", prefix, n)),
            expiration: Some(Utc::now() + *self.lifetime.lock().unwrap()),
        })
    }
}

#[async_trait]
impl StsApi for FakeSts {
    async fn assume_role(
        &self,
        credentials: &AwsCredentials,
        _region: &str,
        role_arn: &str,
        role_session_name: &str,
        _duration_secs: i32,
    ) -> Result<AwsCredentials> {
        self.issue(
            StsCall::AssumeRole {
                signed_with: credentials.access_key_id.clone(),
                role_arn: role_arn.to_string(),
                role_session_name: role_session_name.to_string(),
            },
            "ROLE",
        )
    }

    async fn assume_role_with_saml(
        &self,
        _region: &str,
        role_arn: &str,
        principal_arn: &str,
        saml_assertion: &str,
        _duration_secs: i32,
    ) -> Result<AwsCredentials> {
        self.issue(
            StsCall::AssumeRoleWithSaml {
                role_arn: role_arn.to_string(),
                principal_arn: principal_arn.to_string(),
                assertion: saml_assertion.to_string(),
            },
            "SAML",
        )
    }

    async fn get_session_token(
        &self,
        credentials: &AwsCredentials,
        _region: &str,
        _duration_secs: i32,
        mfa: Option<MfaToken<'_>>,
    ) -> Result<AwsCredentials> {
        self.issue(
            StsCall::GetSessionToken {
                signed_with: credentials.access_key_id.clone(),
                mfa_code: mfa.map(|m| m.code.to_string()),
            },
            "MFA",
        )
    }
}

// ============================================================================
// Desktop bridge
// ============================================================================

pub struct FakeBridge {
    pub mfa_code: String,
    pub mfa_prompts: AtomicUsize,
    /// When set, `need_mfa` waits for `mfa_release` before answering, or
    /// for `mfa_close` to dismiss the prompt
    pub hold_mfa: AtomicBool,
    pub mfa_release: Notify,
    pub mfa_close: Notify,
    /// One script per `aws_sign_in` call; an exhausted queue closes at once
    sign_in_scripts: Mutex<VecDeque<Vec<CapturedRequest>>>,
    sign_in_calls: Mutex<Vec<bool>>,
    pub verification_windows: AtomicUsize,
}

impl FakeBridge {
    pub fn new() -> Self {
        Self {
            mfa_code: "123456".to_string(),
            mfa_prompts: AtomicUsize::new(0),
            hold_mfa: AtomicBool::new(false),
            mfa_release: Notify::new(),
            mfa_close: Notify::new(),
            sign_in_scripts: Mutex::new(VecDeque::new()),
            sign_in_calls: Mutex::new(Vec::new()),
            verification_windows: AtomicUsize::new(0),
        }
    }

    pub fn script_sign_in(&self, requests: Vec<CapturedRequest>) {
        self.sign_in_scripts.lock().unwrap().push_back(requests);
    }

    /// `need_auth` flag of every sign-in call, in order.
    pub fn sign_in_calls(&self) -> Vec<bool> {
        self.sign_in_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl DesktopBridge for FakeBridge {
    async fn need_mfa(&self, _session_name: &str) -> Result<String> {
        self.mfa_prompts.fetch_add(1, Ordering::SeqCst);
        if self.hold_mfa.load(Ordering::SeqCst) {
            tokio::select! {
                _ = self.mfa_release.notified() => {}
                _ = self.mfa_close.notified() => return Err(Error::ModalClosed),
            }
        }
        Ok(self.mfa_code.clone())
    }

    async fn aws_sign_in(
        &self,
        _idp_url: &str,
        need_auth: bool,
    ) -> Result<mpsc::Receiver<CapturedRequest>> {
        self.sign_in_calls.lock().unwrap().push(need_auth);
        let script = self
            .sign_in_scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let (tx, rx) = mpsc::channel(script.len().max(1));
        for request in script {
            tx.send(request).await.unwrap();
        }
        Ok(rx)
    }

    async fn open_verification_window(
        &self,
        _registration: &ClientRegistration,
        _authorization: &DeviceAuthorization,
    ) -> Result<()> {
        self.verification_windows.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn is_desktop_running(&self) -> bool {
        true
    }
}

// ============================================================================
// SSO OIDC + portal
// ============================================================================

pub struct FakeOidc {
    pub registrations: AtomicUsize,
    pub token_polls: AtomicUsize,
    script: Mutex<VecDeque<TokenPoll>>,
}

impl FakeOidc {
    pub fn new() -> Self {
        Self {
            registrations: AtomicUsize::new(0),
            token_polls: AtomicUsize::new(0),
            script: Mutex::new(VecDeque::new()),
        }
    }

    /// Answer `pending` polls with authorization_pending, then issue a token.
    pub fn approve_after(&self, pending: usize) {
        let mut script = self.script.lock().unwrap();
        for _ in 0..pending {
            script.push_back(TokenPoll::Pending);
        }
        script.push_back(TokenPoll::Issued(TokenResponse {
            access_token: "sso-access-token".to_string(),
            token_type: Some("Bearer".to_string()),
            expires_in: 28_800,
        }));
    }

    pub fn deny(&self) {
        self.script.lock().unwrap().push_back(TokenPoll::Denied);
    }
}

#[async_trait]
impl OidcTransport for FakeOidc {
    async fn register_client(&self, _region: &str, _client_name: &str) -> Result<ClientRegistration> {
        self.registrations.fetch_add(1, Ordering::SeqCst);
        Ok(ClientRegistration {
            client_id: "client-id".to_string(),
            client_secret: "client-secret".to_string(),
            client_id_issued_at: Utc::now().timestamp(),
            client_secret_expires_at: (Utc::now() + Duration::days(90)).timestamp(),
        })
    }

    async fn start_device_authorization(
        &self,
        _region: &str,
        _registration: &ClientRegistration,
        _start_url: &str,
    ) -> Result<DeviceAuthorization> {
        Ok(DeviceAuthorization {
            device_code: "device-code".to_string(),
            user_code: "WXYZ-1234".to_string(),
            verification_uri: "https://device.sso.us-east-1.amazonaws.com/".to_string(),
            verification_uri_complete: None,
            expires_in: 600,
            interval: Some(1),
        })
    }

    async fn create_token(
        &self,
        _region: &str,
        _registration: &ClientRegistration,
        _device_code: &str,
    ) -> Result<TokenPoll> {
        self.token_polls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(TokenPoll::Pending))
    }
}

pub struct FakePortal {
    /// account id -> (account name, role names)
    accounts: Mutex<BTreeMap<String, (String, Vec<String>)>>,
    credential_requests: Mutex<Vec<(String, String)>>,
    /// Answer the next GetRoleCredentials with a 401
    pub reject_next: AtomicBool,
    /// Answer every GetRoleCredentials with a 403
    pub forbid: AtomicBool,
}

impl FakePortal {
    pub fn new() -> Self {
        Self {
            accounts: Mutex::new(BTreeMap::new()),
            credential_requests: Mutex::new(Vec::new()),
            reject_next: AtomicBool::new(false),
            forbid: AtomicBool::new(false),
        }
    }

    pub fn grant(&self, account_id: &str, account_name: &str, roles: &[&str]) {
        self.accounts.lock().unwrap().insert(
            account_id.to_string(),
            (
                account_name.to_string(),
                roles.iter().map(|r| r.to_string()).collect(),
            ),
        );
    }

    pub fn revoke_account(&self, account_id: &str) {
        self.accounts.lock().unwrap().remove(account_id);
    }

    pub fn credential_requests(&self) -> Vec<(String, String)> {
        self.credential_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl SsoPortal for FakePortal {
    async fn list_accounts(&self, _region: &str, _access_token: &str) -> Result<Vec<SsoAccount>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .iter()
            .map(|(id, (name, _))| SsoAccount {
                account_id: id.clone(),
                account_name: name.clone(),
                email_address: None,
            })
            .collect())
    }

    async fn list_account_roles(
        &self,
        _region: &str,
        _access_token: &str,
        account_id: &str,
    ) -> Result<Vec<SsoAccountRole>> {
        Ok(self
            .accounts
            .lock()
            .unwrap()
            .get(account_id)
            .map(|(_, roles)| {
                roles
                    .iter()
                    .map(|r| SsoAccountRole {
                        account_id: account_id.to_string(),
                        role_name: r.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_role_credentials(
        &self,
        _region: &str,
        access_token: &str,
        account_id: &str,
        role_name: &str,
    ) -> Result<AwsCredentials> {
        assert_eq!(access_token, "sso-access-token");
        self.credential_requests
            .lock()
            .unwrap()
            .push((account_id.to_string(), role_name.to_string()));
        if self.reject_next.swap(false, Ordering::SeqCst) {
            return Err(Error::Unauthorized);
        }
        if self.forbid.load(Ordering::SeqCst) {
            return Err(Error::Forbidden(
                "ForbiddenException: No access".to_string(),
            ));
        }
        Ok(AwsCredentials {
            access_key_id: format!("ASIASSO{}", account_id),
            secret_access_key: "sso-secret".to_string(),
            session_token: Some(format!("sso-token-{}-{}", account_id, role_name)),
            expiration: Some(Utc::now() + Duration::hours(1)),
        })
    }
}

// ============================================================================
// Azure CLI
// ============================================================================

pub struct FakeAz {
    calls: Mutex<Vec<Vec<String>>>,
}

impl FakeAz {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl AzureCli for FakeAz {
    async fn run(&self, args: &[&str]) -> Result<AzOutput> {
        self.calls
            .lock()
            .unwrap()
            .push(args.iter().map(|a| a.to_string()).collect());
        let stdout = if args.starts_with(&["account", "get-access-token"]) {
            format!(
                r#"{{"accessToken": "az-token", "expiresOn": "{}", "subscription": "sub-1", "tenant": "tenant-1"}}"#,
                (Utc::now() + Duration::hours(1)).to_rfc3339()
            )
        } else {
            String::new()
        };
        Ok(AzOutput {
            success: true,
            stdout,
            stderr: String::new(),
        })
    }
}

// ============================================================================
// Harness
// ============================================================================

pub const ROLE_ARN: &str = "arn:aws:iam::111111111111:role/Deploy";
pub const IDP_ARN: &str = "arn:aws:iam::111111111111:saml-provider/Okta";
pub const MFA_DEVICE: &str = "arn:aws:iam::111111111111:mfa/alice";

pub struct Harness {
    pub registry: Arc<SessionRegistry>,
    pub repository: Arc<JsonWorkspaceRepository>,
    pub keychain: Arc<MemoryKeychain>,
    pub credential_file: Arc<CredentialFile>,
    pub sts: Arc<FakeSts>,
    pub bridge: Arc<FakeBridge>,
    pub oidc: Arc<FakeOidc>,
    pub portal: Arc<FakePortal>,
    pub az: Arc<FakeAz>,
    pub notifier: SessionNotifier,
    _dir: TempDir,
}

impl Harness {
    pub fn new() -> Self {
        init_test_logging();
        let dir = tempfile::tempdir().unwrap();
        let credentials_path = dir.path().join("aws").join("credentials");

        let config = WorkspaceConfig {
            credentials_file: Some(credentials_path.clone()),
            ..WorkspaceConfig::default()
        };
        let repository = Arc::new(JsonWorkspaceRepository::in_memory());
        let keychain = Arc::new(MemoryKeychain::new());
        let credential_file = Arc::new(CredentialFile::new(credentials_path));
        let notifier = SessionNotifier::new();

        let ctx = Arc::new(SessionContext::new(
            repository.clone(),
            credential_file.clone(),
            keychain.clone(),
            notifier.clone(),
            Arc::new(config),
        ));

        let sts = Arc::new(FakeSts::new());
        let bridge = Arc::new(FakeBridge::new());
        let oidc = Arc::new(FakeOidc::new());
        let portal = Arc::new(FakePortal::new());
        let az = Arc::new(FakeAz::new());

        let registry = Arc::new(SessionRegistry::new(
            ctx,
            Backends {
                sts: sts.clone(),
                bridge: bridge.clone(),
                oidc: oidc.clone(),
                portal: portal.clone(),
                azure: az.clone(),
            },
        ));

        Self {
            registry,
            repository,
            keychain,
            credential_file,
            sts,
            bridge,
            oidc,
            portal,
            az,
            notifier,
            _dir: dir,
        }
    }

    pub fn credentials_path(&self) -> PathBuf {
        self.credential_file.path().to_path_buf()
    }

    /// Raw credentials file contents ("" when missing).
    pub fn file_contents(&self) -> String {
        std::fs::read_to_string(self.credentials_path()).unwrap_or_default()
    }

    pub fn section(&self, profile: &str) -> Option<BTreeMap<String, String>> {
        self.credential_file.read(profile).unwrap()
    }

    pub fn default_profile_id(&self) -> String {
        self.repository.default_profile_id().unwrap()
    }

    pub fn add_profile(&self, name: &str) -> String {
        let profile = AwsNamedProfile::new(name);
        let id = profile.id.clone();
        self.repository.add_profile(profile).unwrap();
        id
    }

    pub fn add_idp_url(&self, url: &str) -> String {
        let idp = IdpUrl::new(url);
        let id = idp.id.clone();
        self.repository.add_idp_url(idp).unwrap();
        id
    }

    pub fn add_sso_integration(&self) -> SsoIntegration {
        self.registry
            .sso_integrations()
            .create_integration("acme", "https://acme.awsapps.com/start", "us-east-1")
            .unwrap()
    }

    pub fn iam_user_request(&self, name: &str, access_key_id: &str) -> SessionRequest {
        SessionRequest {
            session_name: name.to_string(),
            region: "us-east-1".to_string(),
            params: SessionParams::IamUser {
                profile_id: self.default_profile_id(),
                keys: StaticKeys {
                    access_key_id: access_key_id.to_string(),
                    secret_access_key: format!("{}-secret", access_key_id),
                },
                mfa_device: None,
            },
        }
    }

    pub fn chained_request(&self, name: &str, parent_session_id: &str, profile_id: &str) -> SessionRequest {
        SessionRequest {
            session_name: name.to_string(),
            region: "eu-west-1".to_string(),
            params: SessionParams::IamRoleChained {
                role_arn: ROLE_ARN.to_string(),
                parent_session_id: parent_session_id.to_string(),
                role_session_name: None,
                profile_id: profile_id.to_string(),
            },
        }
    }

    pub fn federated_request(&self, name: &str, idp_url_id: &str) -> SessionRequest {
        SessionRequest {
            session_name: name.to_string(),
            region: "us-east-1".to_string(),
            params: SessionParams::IamRoleFederated {
                role_arn: ROLE_ARN.to_string(),
                idp_arn: IDP_ARN.to_string(),
                idp_url_id: idp_url_id.to_string(),
                profile_id: self.default_profile_id(),
            },
        }
    }

    pub fn azure_request(&self, name: &str) -> SessionRequest {
        SessionRequest {
            session_name: name.to_string(),
            region: "westeurope".to_string(),
            params: SessionParams::Azure {
                tenant_id: "tenant-1".to_string(),
                subscription_id: "sub-1".to_string(),
            },
        }
    }
}
