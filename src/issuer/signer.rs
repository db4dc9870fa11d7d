//! Rotating signer abstraction.
//!
//! The signed-token issuer acquires `(key, key id, algorithm)` from a
//! [`RotatingSigner`] on every issuance, so key rotation never touches
//! the issuance path. `public_keys` returns *all* currently published
//! keys — including rotated-out keys still in their verification grace
//! period — which is what the JWKS surface serves.
//!
//! [`StaticEd25519Signer`] is the in-process implementation: one
//! Ed25519 key, either generated at startup or loaded from a PKCS#8 PEM
//! file. KMS-style backends implement the same trait elsewhere.

use std::sync::Arc;

use base64::Engine as _;
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use jsonwebtoken::{Algorithm, EncodingKey};
use rand::Rng;
use sha2::{Digest, Sha256};

use super::{KeyMaterial, PublicKey};
use crate::{Error, Result};

/// Everything needed to sign one token.
#[derive(Debug, Clone)]
pub struct SigningKeyHandle {
    /// Key id written into the JWS protected header.
    pub key_id: String,
    /// Signing algorithm.
    pub algorithm: Algorithm,
    /// The signing key.
    pub key: Arc<EncodingKey>,
}

/// Source of signing keys with atomic rotation.
pub trait RotatingSigner: Send + Sync {
    /// The key to sign with right now.
    fn current(&self) -> Result<SigningKeyHandle>;

    /// All published verification keys, grace-period keys included.
    fn public_keys(&self) -> Result<Vec<PublicKey>>;
}

/// Single-key Ed25519 signer.
#[derive(Debug)]
pub struct StaticEd25519Signer {
    handle: SigningKeyHandle,
    public: PublicKey,
}

impl StaticEd25519Signer {
    /// Generate a fresh key.
    ///
    /// Tokens signed before a restart become unverifiable — acceptable
    /// for development and tests, not for production fleets.
    pub fn generate() -> Result<Self> {
        let mut seed = [0u8; 32];
        rand::rng().fill_bytes(&mut seed);
        Self::from_signing_key(&SigningKey::from_bytes(&seed))
    }

    /// Load the key from a PKCS#8 PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let signing_key = SigningKey::from_pkcs8_pem(pem)
            .map_err(|e| Error::Config(format!("signing key PEM: {e}")))?;
        Self::from_signing_key(&signing_key)
    }

    fn from_signing_key(signing_key: &SigningKey) -> Result<Self> {
        let verifying_key = signing_key.verifying_key().to_bytes();

        // kid = truncated digest of the public key; stable across
        // restarts for file-loaded keys.
        let digest = Sha256::digest(verifying_key);
        let key_id = hex::encode(&digest[..8]);

        let pem = signing_key
            .to_pkcs8_pem(Default::default())
            .map_err(|e| Error::Signing(format!("key serialization: {e}")))?;
        let encoding_key = EncodingKey::from_ed_pem(pem.as_bytes())
            .map_err(|e| Error::Signing(format!("key import: {e}")))?;

        let public = PublicKey {
            key_id: key_id.clone(),
            algorithm: "EdDSA".into(),
            key_use: "sig".into(),
            key: KeyMaterial::Ed25519 {
                x: verifying_key.to_vec(),
            },
        };

        Ok(Self {
            handle: SigningKeyHandle {
                key_id,
                algorithm: Algorithm::EdDSA,
                key: Arc::new(encoding_key),
            },
            public,
        })
    }

    /// The public half, base64url-encoded — handy in tests building
    /// JWK sets for the matching validator.
    #[must_use]
    pub fn public_key_b64(&self) -> String {
        let KeyMaterial::Ed25519 { x } = &self.public.key else {
            unreachable!("static signer always holds an Ed25519 key");
        };
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(x)
    }
}

impl RotatingSigner for StaticEd25519Signer {
    fn current(&self) -> Result<SigningKeyHandle> {
        Ok(self.handle.clone())
    }

    fn public_keys(&self) -> Result<Vec<PublicKey>> {
        Ok(vec![self.public.clone()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_produces_consistent_handle_and_public_key() {
        let signer = StaticEd25519Signer::generate().unwrap();

        let handle = signer.current().unwrap();
        assert_eq!(handle.algorithm, Algorithm::EdDSA);
        assert_eq!(handle.key_id.len(), 16);

        let keys = signer.public_keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].key_id, handle.key_id);
        assert_eq!(keys[0].algorithm, "EdDSA");
        assert_eq!(keys[0].key_use, "sig");
        match &keys[0].key {
            KeyMaterial::Ed25519 { x } => assert_eq!(x.len(), 32),
            other => panic!("unexpected key material {other:?}"),
        }
    }

    #[test]
    fn pem_round_trip_preserves_kid() {
        let original = SigningKey::from_bytes(&[42u8; 32]);
        let pem = original.to_pkcs8_pem(Default::default()).unwrap();

        let a = StaticEd25519Signer::from_pem(&pem).unwrap();
        let b = StaticEd25519Signer::from_pem(&pem).unwrap();
        assert_eq!(a.current().unwrap().key_id, b.current().unwrap().key_id);
    }

    #[test]
    fn bad_pem_is_a_config_error() {
        let err = StaticEd25519Signer::from_pem("not a pem").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn distinct_keys_get_distinct_kids() {
        let a = StaticEd25519Signer::generate().unwrap();
        let b = StaticEd25519Signer::generate().unwrap();
        assert_ne!(a.current().unwrap().key_id, b.current().unwrap().key_id);
    }
}
