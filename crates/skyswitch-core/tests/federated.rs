//! SAML-federated sessions through a scripted sign-in browser.

mod common;

use common::{Harness, StsCall, IDP_ARN, ROLE_ARN};
use skyswitch_core::models::SessionStatus;
use skyswitch_core::{CapturedRequest, Error, WorkspaceRepository};

const IDP_URL: &str = "https://acme.okta.com/app/amazon_aws/exk123/sso/saml";

fn okta_login() -> CapturedRequest {
    CapturedRequest::new(IDP_URL, None)
}

fn aws_assertion(body: &str) -> CapturedRequest {
    CapturedRequest::new("https://signin.aws.amazon.com/saml", Some(body.to_string()))
}

#[tokio::test]
async fn test_hidden_sign_in_retries_visible() {
    let h = Harness::new();
    let idp = h.add_idp_url(IDP_URL);
    let session = h
        .registry
        .create(h.federated_request("okta-admin", &idp))
        .await
        .unwrap();

    h.bridge.script_sign_in(vec![okta_login()]);
    h.bridge.script_sign_in(vec![
        okta_login(),
        aws_assertion("SAMLResponse=QUJD&RelayState=https%3A%2F%2Fconsole"),
    ]);

    h.registry.start(&session.session_id).await.unwrap();

    assert_eq!(h.bridge.sign_in_calls(), vec![false, true]);
    assert_eq!(
        h.sts.calls(),
        vec![StsCall::AssumeRoleWithSaml {
            role_arn: ROLE_ARN.to_string(),
            principal_arn: IDP_ARN.to_string(),
            assertion: "QUJD".to_string(),
        }]
    );
    let section = h.section("default").unwrap();
    assert_eq!(section["aws_access_key_id"], "ASIASAML1");
    assert_eq!(section["aws_session_token"], "SAML-token-1");
}

#[tokio::test]
async fn test_existing_idp_session_skips_window() {
    let h = Harness::new();
    let idp = h.add_idp_url(IDP_URL);
    let session = h
        .registry
        .create(h.federated_request("okta-admin", &idp))
        .await
        .unwrap();

    h.bridge
        .script_sign_in(vec![aws_assertion("SAMLResponse=QUJD")]);
    h.registry.start(&session.session_id).await.unwrap();

    assert_eq!(h.bridge.sign_in_calls(), vec![false]);
    assert_eq!(
        h.repository
            .get_session_by_id(&session.session_id)
            .unwrap()
            .status,
        SessionStatus::Active
    );
}

#[tokio::test]
async fn test_closed_window_cancels_start() {
    let h = Harness::new();
    let idp = h.add_idp_url(IDP_URL);
    let session = h
        .registry
        .create(h.federated_request("okta-admin", &idp))
        .await
        .unwrap();

    // Hidden attempt asks for login, then the user closes the visible window.
    h.bridge.script_sign_in(vec![okta_login()]);
    h.bridge.script_sign_in(vec![okta_login()]);

    let err = h.registry.start(&session.session_id).await.unwrap_err();
    assert!(matches!(err, Error::ModalClosed));
    assert!(err.is_cancellation());
    assert_eq!(
        h.repository
            .get_session_by_id(&session.session_id)
            .unwrap()
            .status,
        SessionStatus::Inactive
    );
    assert!(h.sts.calls().is_empty());
    assert!(h.section("default").is_none());
}

#[tokio::test]
async fn test_malformed_assertion_fails_authentication() {
    let h = Harness::new();
    let idp = h.add_idp_url(IDP_URL);
    let session = h
        .registry
        .create(h.federated_request("okta-admin", &idp))
        .await
        .unwrap();

    h.bridge
        .script_sign_in(vec![aws_assertion("RelayState=only")]);

    let err = h.registry.start(&session.session_id).await.unwrap_err();
    assert!(matches!(err, Error::SamlAuthentication(_)));
    assert!(h.sts.calls().is_empty());
}

#[tokio::test]
async fn test_federated_session_can_parent_a_chain() {
    let h = Harness::new();
    let idp = h.add_idp_url(IDP_URL);
    let parent = h
        .registry
        .create(h.federated_request("okta-admin", &idp))
        .await
        .unwrap();
    let ops = h.add_profile("ops");
    let child = h
        .registry
        .create(h.chained_request("ops", &parent.session_id, &ops))
        .await
        .unwrap();

    h.bridge
        .script_sign_in(vec![aws_assertion("SAMLResponse=QUJD")]);
    h.registry.start(&child.session_id).await.unwrap();

    let calls = h.sts.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[0], StsCall::AssumeRoleWithSaml { .. }));
    assert_eq!(
        calls[1],
        StsCall::AssumeRole {
            signed_with: "ASIASAML1".to_string(),
            role_arn: ROLE_ARN.to_string(),
            role_session_name: skyswitch_core::models::DEFAULT_ROLE_SESSION_NAME.to_string(),
        }
    );
    assert!(h.section("ops").is_some());
    assert!(h.section("default").is_none());
}
