//! Credential extraction from transport metadata.
//!
//! Both entry points authenticate the calling workload the same way:
//! prefer the peer client certificate the edge proxy forwards in
//! `x-forwarded-client-cert` (XFCC), fall back to `Authorization:
//! Bearer`. The subject credential on the authz-check path comes from
//! request headers, together with the list of header names consumed —
//! the proxy strips those from the upstream request so external
//! credentials never reach backends.

use std::collections::HashMap;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use percent_encoding::percent_decode_str;

use crate::credential::Credential;

const XFCC_HEADER: &str = "x-forwarded-client-cert";
const AUTHORIZATION_HEADER: &str = "authorization";

/// Extract the actor credential from forwarded transport metadata.
///
/// Returns `None` when neither a client certificate nor a bearer token
/// is present — callers treat that as the anonymous actor, not an
/// error.
#[must_use]
pub fn actor_credential(headers: &HashMap<String, String>) -> Option<Credential> {
    if let Some(xfcc) = headers.get(XFCC_HEADER) {
        if let Some(credential) = parse_xfcc(xfcc) {
            return Some(credential);
        }
    }

    bearer_token(headers).map(Credential::bearer)
}

/// Extract the subject credential from request headers, along with the
/// names of the headers consumed.
///
/// Currently `Authorization: Bearer` only; the consumed-header list is
/// what the authz-check response tells the proxy to strip.
#[must_use]
pub fn subject_credential(
    headers: &HashMap<String, String>,
) -> Option<(Credential, Vec<String>)> {
    let token = bearer_token(headers)?;
    Some((
        Credential::bearer(token),
        vec![AUTHORIZATION_HEADER.to_string()],
    ))
}

fn bearer_token(headers: &HashMap<String, String>) -> Option<String> {
    let value = headers.get(AUTHORIZATION_HEADER)?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(token.to_string())
}

/// Parse the first element of an XFCC header into an mTLS credential.
///
/// XFCC elements are `;`-separated `Key=Value` pairs, one element per
/// hop, comma-separated. The certificate value is a percent-encoded
/// PEM document.
fn parse_xfcc(value: &str) -> Option<Credential> {
    let element = value.split(',').next()?;

    let mut cert = None;
    let mut chain = Vec::new();
    let mut peer_hash = None;
    let mut issuer_identity = None;

    for pair in element.split(';') {
        let Some((key, raw)) = pair.split_once('=') else {
            continue;
        };
        let raw = raw.trim_matches('"');
        match key.trim() {
            "Cert" => cert = decode_pem_chain(raw).and_then(|mut c| {
                if c.is_empty() { None } else { Some(c.remove(0)) }
            }),
            "Chain" => chain = decode_pem_chain(raw).unwrap_or_default(),
            "Hash" => peer_hash = Some(raw.to_string()),
            "By" => issuer_identity = Some(raw.to_string()),
            _ => {}
        }
    }

    cert.map(|cert| Credential::Mtls {
        cert,
        chain,
        peer_hash,
        issuer_identity,
    })
}

/// Decode a percent-encoded PEM document into DER blocks.
fn decode_pem_chain(encoded: &str) -> Option<Vec<Bytes>> {
    let pem = percent_decode_str(encoded).decode_utf8().ok()?;

    let mut blocks = Vec::new();
    let mut body = String::new();
    let mut in_block = false;
    for line in pem.lines() {
        let line = line.trim();
        if line.starts_with("-----BEGIN") {
            in_block = true;
            body.clear();
        } else if line.starts_with("-----END") {
            in_block = false;
            blocks.push(Bytes::from(STANDARD.decode(&body).ok()?));
        } else if in_block {
            body.push_str(line);
        }
    }

    if blocks.is_empty() { None } else { Some(blocks) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::CredentialKind;
    use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

    fn headers(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sample_pem() -> String {
        // Content is irrelevant here — extraction decodes, validation parses.
        let der = [0x30u8, 0x82, 0x01, 0x0a, 0xde, 0xad, 0xbe, 0xef];
        format!(
            "-----BEGIN CERTIFICATE-----\n{}\n-----END CERTIFICATE-----\n",
            STANDARD.encode(der)
        )
    }

    #[test]
    fn no_metadata_means_no_actor() {
        assert!(actor_credential(&headers(&[])).is_none());
    }

    #[test]
    fn bearer_fallback_produces_bearer_credential() {
        let credential =
            actor_credential(&headers(&[("authorization", "Bearer abc123")])).unwrap();
        assert_eq!(credential.kind(), CredentialKind::Bearer);
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert!(actor_credential(&headers(&[("authorization", "bearer abc")])).is_some());
        assert!(actor_credential(&headers(&[("authorization", "Basic abc")])).is_none());
        assert!(actor_credential(&headers(&[("authorization", "Bearer ")])).is_none());
    }

    #[test]
    fn xfcc_certificate_wins_over_bearer() {
        let encoded =
            utf8_percent_encode(&sample_pem(), NON_ALPHANUMERIC).to_string();
        let value = format!("By=spiffe://mesh/ingress;Hash=ab12cd;Cert=\"{encoded}\"");
        let credential = actor_credential(&headers(&[
            ("x-forwarded-client-cert", value.as_str()),
            ("authorization", "Bearer abc"),
        ]))
        .unwrap();

        match credential {
            Credential::Mtls {
                cert,
                peer_hash,
                issuer_identity,
                ..
            } => {
                assert!(!cert.is_empty());
                assert_eq!(peer_hash.as_deref(), Some("ab12cd"));
                assert_eq!(issuer_identity.as_deref(), Some("spiffe://mesh/ingress"));
            }
            other => panic!("unexpected credential {other:?}"),
        }
    }

    #[test]
    fn xfcc_without_cert_falls_back_to_bearer() {
        let credential = actor_credential(&headers(&[
            ("x-forwarded-client-cert", "By=spiffe://mesh/ingress;Hash=ab"),
            ("authorization", "Bearer abc"),
        ]))
        .unwrap();
        assert_eq!(credential.kind(), CredentialKind::Bearer);
    }

    #[test]
    fn subject_extraction_reports_consumed_headers() {
        let (credential, consumed) =
            subject_credential(&headers(&[("authorization", "Bearer tok")])).unwrap();
        assert_eq!(credential.kind(), CredentialKind::Bearer);
        assert_eq!(consumed, vec!["authorization"]);
    }

    #[test]
    fn subject_extraction_rejects_non_bearer_schemes() {
        assert!(subject_credential(&headers(&[("authorization", "Basic dXNlcg==")])).is_none());
        assert!(subject_credential(&headers(&[])).is_none());
    }
}
