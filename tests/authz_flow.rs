//! End-to-end authz-check flows.
//!
//! Exercises the per-request gateway hook: subject validation from
//! request headers, token issuance into response headers, credential
//! header stripping, and the identity-envelope token shape.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{TimeZone, Utc};
use serde_json::json;

use txn_token_service::authz::{AuthzEndpoint, CheckRequest, CheckResponse, TokenHeader};
use txn_token_service::clock::FixedClock;
use txn_token_service::credential::{AttestedIdentity, Claims, CredentialKind};
use txn_token_service::datasource::DataSourceRegistry;
use txn_token_service::issuer::jwt::{DEFAULT_TOKEN_TTL, TxnTokenIssuerConfig};
use txn_token_service::issuer::{
    IdentityEnvelopeIssuer, IssuerRegistry, StaticEd25519Signer, TXN_TOKEN_TYPE, TxnTokenIssuer,
};
use txn_token_service::mapper::SubjectClaimsMapper;
use txn_token_service::service::TokenService;
use txn_token_service::trust::TrustStore;
use txn_token_service::validator::StaticValidator;

const IDENTITY_TYPE: &str = "urn:example:token-type:identity";

fn subject_identity() -> AttestedIdentity {
    let mut claims = Claims::new();
    claims.insert("org_id".into(), json!("12345"));
    AttestedIdentity {
        subject: "alice".into(),
        issuer: "https://idp".into(),
        trust_domain: "t".into(),
        claims,
        ..AttestedIdentity::default()
    }
}

fn endpoint() -> AuthzEndpoint {
    let clock = FixedClock::at(Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap());
    let signer = Arc::new(StaticEd25519Signer::generate().unwrap());

    let mut issuers = IssuerRegistry::new();
    issuers
        .register(
            TXN_TOKEN_TYPE,
            Arc::new(TxnTokenIssuer::new(
                TxnTokenIssuerConfig {
                    issuer_url: "https://tokens.example.com".into(),
                    ttl: DEFAULT_TOKEN_TTL,
                },
                vec![Arc::new(SubjectClaimsMapper)],
                Vec::new(),
                signer,
                Arc::clone(&clock) as _,
            )),
        )
        .unwrap();
    issuers
        .register(
            IDENTITY_TYPE,
            Arc::new(IdentityEnvelopeIssuer::new(
                IDENTITY_TYPE,
                vec![Arc::new(SubjectClaimsMapper)],
                clock,
            )),
        )
        .unwrap();

    let store = TrustStore::builder()
        .validator(
            "fixture",
            Arc::new(StaticValidator::attesting(
                vec![CredentialKind::Bearer],
                subject_identity(),
            )),
        )
        .build()
        .unwrap();

    AuthzEndpoint::new(
        store,
        Arc::new(TokenService::new(
            "t",
            Arc::new(issuers),
            Arc::new(DataSourceRegistry::new()),
        )),
        vec![
            TokenHeader {
                token_type: TXN_TOKEN_TYPE.into(),
                header: "x-txn-token".into(),
            },
            TokenHeader {
                token_type: IDENTITY_TYPE.into(),
                header: "x-rh-identity".into(),
            },
        ],
    )
}

fn request_with_credentials() -> CheckRequest {
    CheckRequest {
        method: "POST".into(),
        path: "/api/orders".into(),
        host: "orders.internal".into(),
        headers: HashMap::from([
            ("Authorization".to_string(), "Bearer edge-token".to_string()),
            ("User-Agent".to_string(), "curl/8".to_string()),
        ]),
        source_address: "10.1.2.3".into(),
        context_extensions: Claims::new(),
    }
}

#[tokio::test]
async fn allowed_request_carries_one_header_per_configured_token() {
    let response = endpoint().check(request_with_credentials()).await;

    let CheckResponse::Ok {
        headers_to_add,
        headers_to_remove,
    } = response
    else {
        panic!("expected OK, got {response:?}");
    };

    assert_eq!(headers_to_add.len(), 2);
    assert_eq!(headers_to_add[0].name, "x-txn-token");
    assert_eq!(headers_to_add[1].name, "x-rh-identity");

    // The transaction token is a JWT carrying the subject.
    let txn = &headers_to_add[0].value;
    assert_eq!(txn.split('.').count(), 3);

    // The identity header is the enveloped claim document.
    let identity: serde_json::Value =
        serde_json::from_slice(&STANDARD.decode(&headers_to_add[1].value).unwrap()).unwrap();
    assert_eq!(identity["identity"]["org_id"], json!("12345"));

    // The inbound credential header is stripped before proxying.
    assert_eq!(headers_to_remove, vec!["authorization"]);
}

#[tokio::test]
async fn missing_credentials_deny_with_unauthenticated_code() {
    let mut request = request_with_credentials();
    request.headers.remove("Authorization");

    match endpoint().check(request).await {
        CheckResponse::Denied { code, message } => {
            assert_eq!(code, 401);
            assert!(!message.is_empty());
        }
        CheckResponse::Ok { .. } => panic!("expected denial"),
    }
}

#[tokio::test]
async fn non_bearer_authorization_denies() {
    let mut request = request_with_credentials();
    request
        .headers
        .insert("Authorization".into(), "Basic dXNlcjpwdw==".into());

    assert!(matches!(
        endpoint().check(request).await,
        CheckResponse::Denied { code: 401, .. }
    ));
}

#[tokio::test]
async fn check_response_serializes_for_the_proxy_contract() {
    let response = endpoint().check(request_with_credentials()).await;
    let wire = serde_json::to_value(&response).unwrap();

    assert_eq!(wire["status"], json!("ok"));
    assert!(wire["headers_to_add"].is_array());
    assert_eq!(wire["headers_to_remove"], json!(["authorization"]));
}
