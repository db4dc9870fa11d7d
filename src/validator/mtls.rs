//! Attestation from peer X.509 certificates.
//!
//! The edge proxy terminates mTLS and forwards the verified peer
//! certificate; this validator extracts the fields identity policy cares
//! about (SPIFFE URI SANs, CN, OU, DNS SANs) and checks the validity
//! window against the injected clock. Chain verification already
//! happened at the proxy — the certificate reaching this service is
//! trusted material, not an untrusted assertion.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::DateTime;
use serde_json::json;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::GeneralName;
use x509_parser::prelude::FromDer;

use crate::clock::Clock;
use crate::credential::{AttestedIdentity, Claims, Credential, CredentialKind};
use crate::{Error, Result};

const ACCEPTED_KINDS: &[CredentialKind] = &[CredentialKind::Mtls];

/// Configuration for an [`MtlsValidator`].
#[derive(Debug, Clone)]
pub struct MtlsValidatorConfig {
    /// Trust domain stamped onto attested identities.
    pub trust_domain: String,
    /// When set, the credential's proxy-asserted issuer identity must
    /// equal this value.
    pub require_issuer_identity: Option<String>,
}

/// Validates forwarded client certificates.
pub struct MtlsValidator {
    config: MtlsValidatorConfig,
    clock: Arc<dyn Clock>,
}

impl MtlsValidator {
    /// Build a validator from config.
    #[must_use]
    pub fn new(config: MtlsValidatorConfig, clock: Arc<dyn Clock>) -> Self {
        Self { config, clock }
    }
}

#[async_trait]
impl super::Validator for MtlsValidator {
    async fn validate(&self, credential: &Credential) -> Result<AttestedIdentity> {
        let Credential::Mtls {
            cert,
            peer_hash,
            issuer_identity,
            ..
        } = credential
        else {
            return Err(Error::InvalidCredential(format!(
                "mTLS validator cannot handle '{}' credentials",
                credential.kind()
            )));
        };

        if let Some(required) = &self.config.require_issuer_identity {
            if issuer_identity.as_deref() != Some(required.as_str()) {
                return Err(Error::InvalidCredential(format!(
                    "certificate issuer identity {issuer_identity:?} does not match '{required}'"
                )));
            }
        }

        let (_, parsed) = X509Certificate::from_der(cert)
            .map_err(|e| Error::InvalidCredential(format!("unparseable certificate: {e}")))?;

        let now = self.clock.now().timestamp();
        let not_after = parsed.validity().not_after.timestamp();
        if now >= not_after {
            return Err(Error::ExpiredCredential);
        }
        if now < parsed.validity().not_before.timestamp() {
            return Err(Error::InvalidCredential("certificate not yet valid".into()));
        }

        let common_name = extract_cn(&parsed);
        let organizational_unit = extract_ou(&parsed);
        let (san_uris, san_dns) = extract_sans(&parsed);

        // SPIFFE URI is the preferred workload identity; CN is the
        // fallback for plain service certs.
        let subject = san_uris
            .first()
            .cloned()
            .or_else(|| common_name.clone())
            .ok_or_else(|| {
                Error::InvalidCredential("certificate carries no usable identity".into())
            })?;

        let mut claims = Claims::new();
        if let Some(cn) = &common_name {
            claims.insert("common_name".into(), json!(cn));
        }
        if let Some(ou) = &organizational_unit {
            claims.insert("organizational_unit".into(), json!(ou));
        }
        if !san_uris.is_empty() {
            claims.insert("san_uris".into(), json!(san_uris));
        }
        if !san_dns.is_empty() {
            claims.insert("san_dns_names".into(), json!(san_dns));
        }
        if let Some(hash) = peer_hash {
            claims.insert("peer_certificate_hash".into(), json!(hash));
        }

        Ok(AttestedIdentity {
            subject,
            issuer: parsed.issuer().to_string(),
            trust_domain: self.config.trust_domain.clone(),
            claims,
            expires_at: DateTime::from_timestamp(not_after, 0),
            issued_at: DateTime::from_timestamp(parsed.validity().not_before.timestamp(), 0),
            audience: Vec::new(),
            scope: String::new(),
        })
    }

    fn credential_kinds(&self) -> &[CredentialKind] {
        ACCEPTED_KINDS
    }
}

/// First CN attribute of the subject DN.
fn extract_cn(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_common_name()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string)
}

/// First OU attribute of the subject DN.
fn extract_ou(cert: &X509Certificate<'_>) -> Option<String> {
    cert.subject()
        .iter_organizational_unit()
        .next()
        .and_then(|attr| attr.as_str().ok())
        .map(str::to_string)
}

/// URI and DNS entries of the SAN extension.
fn extract_sans(cert: &X509Certificate<'_>) -> (Vec<String>, Vec<String>) {
    let mut uris = Vec::new();
    let mut dns_names = Vec::new();

    if let Ok(Some(san)) = cert.subject_alternative_name() {
        for name in &san.value.general_names {
            match name {
                GeneralName::URI(uri) => uris.push((*uri).to_string()),
                GeneralName::DNSName(dns) => dns_names.push((*dns).to_string()),
                _ => {}
            }
        }
    }

    (uris, dns_names)
}
