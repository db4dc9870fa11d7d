//! Error types for the transaction-token service.

use std::io;

use thiserror::Error;

/// Result type alias for the transaction-token service.
pub type Result<T> = std::result::Result<T, Error>;

/// Transaction-token service errors.
///
/// Variants group into the failure families the endpoints care about:
/// credential validation, policy, request decoding, issuance, and
/// upstream I/O. [`Error::is_auth_failure`] is the split the RPC layer
/// uses to decide between 401/403 and 500.
#[derive(Error, Debug)]
pub enum Error {
    /// Credential malformed, signature invalid, issuer mismatch,
    /// missing subject.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Credential past its `exp` according to the validator's clock.
    #[error("Credential expired")]
    ExpiredCredential,

    /// No validator registered for the credential's kind.
    #[error("No validator registered for credential type '{0}'")]
    NoValidator(String),

    /// Every eligible validator rejected the credential. Carries the
    /// last validator's error.
    #[error("All validators failed, last error: {last}")]
    AllValidatorsFailed {
        /// Number of validators that were tried.
        tried: usize,
        /// The error from the last validator in registration order.
        #[source]
        last: Box<Error>,
    },

    /// Policy or mapper expression failed to compile.
    #[error("Invalid script: {0}")]
    ScriptInvalid(String),

    /// base64 or JSON decode failure on client-supplied data.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Unknown or wrong `grant_type` on the exchange endpoint.
    #[error("Unsupported grant type: {0}")]
    UnsupportedGrantType(String),

    /// Explicit `audience` in the exchange request does not match the
    /// service trust domain.
    #[error("Audience mismatch: requested '{requested}', trust domain is '{trust_domain}'")]
    AudienceMismatch {
        /// The audience the client asked for.
        requested: String,
        /// The service's configured trust domain.
        trust_domain: String,
    },

    /// No issuer registered for the requested token type.
    #[error("No issuer registered for token type '{0}'")]
    UnknownTokenType(String),

    /// Signer unavailable, unsupported algorithm, or serialization
    /// failure during signing.
    #[error("Signing error: {0}")]
    Signing(String),

    /// Non-nil error from a data source fetch; aborts the mapper chain.
    #[error("Data source '{name}' failed: {source}")]
    DataSource {
        /// Name of the failing data source.
        name: String,
        /// Underlying error.
        #[source]
        source: Box<Error>,
    },

    /// JWKS fetch or key-set aggregation failure.
    #[error("JWKS error: {0}")]
    Jwks(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error is an authentication/authorization failure as
    /// opposed to an internal fault.
    ///
    /// Auth failures surface to clients with their message; internal
    /// faults surface as opaque 500s.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidCredential(_)
                | Self::ExpiredCredential
                | Self::NoValidator(_)
                | Self::AllValidatorsFailed { .. }
        )
    }

    /// Wrap this error as a data source failure for `name`.
    #[must_use]
    pub fn for_data_source(self, name: impl Into<String>) -> Self {
        Self::DataSource {
            name: name.into(),
            source: Box::new(self),
        }
    }
}
