//! Configuration management.
//!
//! Configuration loads from a YAML file merged with
//! `TXN_TOKEN_`-prefixed environment variables (nested keys separated
//! by `__`). Every section has serde defaults so a minimal file — trust
//! domain, one validator, one issuer — is a working deployment.

use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::authz::TokenHeader;
use crate::claims::{ClaimsFilter, ClaimsFilterRule};
use crate::credential::{Claims, CredentialKind};
use crate::{Error, Result};

/// Environment variable prefix for overrides.
const ENV_PREFIX: &str = "TXN_TOKEN_";

/// Main configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// HTTP server binding.
    pub server: ServerConfig,
    /// The service's trust domain — the audience of every issued token.
    pub trust_domain: String,
    /// Subject/actor credential validators, in trial order.
    pub validators: Vec<ValidatorConfig>,
    /// Validator eligibility policies (CEL, OR-composed). Empty means
    /// no filtering.
    pub validator_policies: Vec<String>,
    /// Claims filters constraining client-asserted request context.
    pub claims_filters: ClaimsFiltersConfig,
    /// Data sources available to mappers.
    pub data_sources: Vec<DataSourceConfig>,
    /// Token issuers by type.
    pub issuers: Vec<IssuerConfig>,
    /// Exchange endpoint settings.
    pub exchange: ExchangeConfig,
    /// Authz-check endpoint settings.
    pub authz: AuthzConfig,
    /// JWKS publication settings.
    pub jwks: JwksConfig,
}

impl Config {
    /// Load from an optional YAML file plus environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();
        if let Some(path) = path {
            if !path.exists() {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            figment = figment.merge(Yaml::file(path));
        }
        let config: Self = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if self.trust_domain.is_empty() {
            return Err(Error::Config("trust_domain is required".into()));
        }
        for header in &self.authz.token_headers {
            if !self
                .issuers
                .iter()
                .any(|issuer| issuer.token_type() == header.token_type)
            {
                return Err(Error::Config(format!(
                    "authz token header '{}' references unknown token type '{}'",
                    header.header, header.token_type
                )));
            }
        }
        Ok(())
    }
}

/// HTTP server binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// One validator definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ValidatorConfig {
    /// JWT validation against an issuer JWKS.
    Jwt {
        /// Registry name (what policies see).
        name: String,
        /// Expected `iss` claim.
        issuer: String,
        /// JWKS URL override.
        #[serde(default)]
        jwks_url: Option<String>,
        /// Trust domain stamped on attested identities.
        trust_domain: String,
        /// JWKS refresh interval.
        #[serde(with = "humantime_serde", default = "default_jwks_refresh")]
        refresh_interval: Duration,
    },
    /// Raw JSON identity documents.
    Json {
        /// Registry name.
        name: String,
        /// Require an `issuer` field in the document.
        #[serde(default)]
        require_issuer: bool,
        /// Pin the trust domain.
        #[serde(default)]
        trust_domain: Option<String>,
        /// Filter over document claims.
        #[serde(default)]
        claims_filter: ClaimsFilter,
    },
    /// Forwarded client certificates.
    Mtls {
        /// Registry name.
        name: String,
        /// Trust domain stamped on attested identities.
        trust_domain: String,
        /// Required proxy-asserted issuer identity.
        #[serde(default)]
        require_issuer_identity: Option<String>,
    },
    /// Fixed identity (bootstrap, tests).
    Static {
        /// Registry name.
        name: String,
        /// Credential kinds the validator claims.
        kinds: Vec<CredentialKind>,
        /// The identity it attests.
        identity: StaticIdentityConfig,
    },
}

impl ValidatorConfig {
    /// The validator's registry name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Jwt { name, .. }
            | Self::Json { name, .. }
            | Self::Mtls { name, .. }
            | Self::Static { name, .. } => name,
        }
    }
}

fn default_jwks_refresh() -> Duration {
    crate::validator::jwt::DEFAULT_REFRESH_INTERVAL
}

/// Identity attested by a static validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticIdentityConfig {
    /// Subject.
    pub subject: String,
    /// Issuer.
    pub issuer: String,
    /// Trust domain.
    pub trust_domain: String,
    /// Claims.
    pub claims: Claims,
}

/// Claims-filter policy for client-asserted request context.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClaimsFiltersConfig {
    /// Ordered rules; first match wins.
    pub rules: Vec<ClaimsFilterRule>,
    /// Fallback filter when no rule matches.
    pub default: ClaimsFilter,
}

/// One HTTP data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSourceConfig {
    /// Registry name.
    pub name: String,
    /// Endpoint receiving the fetch input.
    pub url: String,
    /// Per-request timeout.
    #[serde(with = "humantime_serde", default = "default_data_source_timeout")]
    pub timeout: Duration,
    /// Cache behavior; absent disables caching.
    #[serde(default)]
    pub cache: Option<DataSourceCacheConfig>,
}

fn default_data_source_timeout() -> Duration {
    crate::datasource::http::DEFAULT_TIMEOUT
}

/// Cache behavior of a data source.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSourceCacheConfig {
    /// Entry lifetime; zero caches indefinitely.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// Input paths forming the masked cache key.
    pub key_paths: Vec<String>,
    /// Use the distributed group cache instead of the in-process map.
    pub distributed: bool,
}

impl Default for DataSourceCacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            key_paths: vec!["subject.subject".to_string()],
            distributed: false,
        }
    }
}

/// One issuer definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IssuerConfig {
    /// Signed transaction tokens.
    TxnToken {
        /// Token-type URN; defaults to the transaction-token URN.
        #[serde(default)]
        token_type: String,
        /// `iss` claim value.
        issuer_url: String,
        /// Token lifetime.
        #[serde(with = "humantime_serde", default = "default_token_ttl")]
        ttl: Duration,
        /// PKCS#8 PEM signing key file; an ephemeral key is generated
        /// when absent.
        #[serde(default)]
        signing_key_file: Option<String>,
        /// Mappers feeding the `tctx` claim.
        #[serde(default)]
        transaction_mappers: Vec<MapperConfig>,
        /// Mappers feeding the `req_ctx` claim.
        #[serde(default)]
        request_mappers: Vec<MapperConfig>,
    },
    /// Unsigned base64-JSON tokens.
    Unsigned {
        /// Token-type URN.
        token_type: String,
        /// Mappers producing the claim document.
        #[serde(default)]
        mappers: Vec<MapperConfig>,
    },
    /// `{"identity": ...}`-enveloped tokens.
    IdentityEnvelope {
        /// Token-type URN.
        token_type: String,
        /// Mappers producing the enveloped claims.
        #[serde(default)]
        mappers: Vec<MapperConfig>,
    },
}

fn default_token_ttl() -> Duration {
    crate::issuer::jwt::DEFAULT_TOKEN_TTL
}

impl IssuerConfig {
    /// The token type this issuer serves.
    #[must_use]
    pub fn token_type(&self) -> &str {
        match self {
            Self::TxnToken { token_type, .. } if token_type.is_empty() => {
                crate::issuer::TXN_TOKEN_TYPE
            }
            Self::TxnToken { token_type, .. }
            | Self::Unsigned { token_type, .. }
            | Self::IdentityEnvelope { token_type, .. } => token_type,
        }
    }
}

/// One claim mapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MapperConfig {
    /// Pass the subject's claims through.
    Subject,
    /// Emit normalized request attributes.
    RequestAttributes,
    /// CEL projection.
    Cel {
        /// The expression; must evaluate to a map.
        script: String,
        /// Data sources bound under `data`.
        #[serde(default)]
        data_sources: Vec<String>,
    },
    /// Fixed claims.
    Static {
        /// The claims to emit.
        claims: Claims,
    },
}

/// Exchange endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExchangeConfig {
    /// Token type minted when the request names none; defaults to the
    /// transaction token.
    pub default_token_type: String,
}

/// Authz-check endpoint settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthzConfig {
    /// Tokens to issue per allowed request, and the headers carrying
    /// them upstream.
    pub token_headers: Vec<TokenHeader>,
}

/// JWKS publication settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwksConfig {
    /// Background refresh interval.
    #[serde(with = "humantime_serde")]
    pub refresh_interval: Duration,
}

impl Default for JwksConfig {
    fn default() -> Self {
        Self {
            refresh_interval: crate::jwks::DEFAULT_REFRESH_INTERVAL,
        }
    }
}

/// Convenience for tests and examples: parse config from a YAML string.
impl std::str::FromStr for Config {
    type Err = Error;

    fn from_str(yaml: &str) -> Result<Self> {
        let config: Self = Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MINIMAL: &str = r#"
trust_domain: "prod-cluster"
validators:
  - type: jwt
    name: corp-idp
    issuer: "https://idp.example.com"
    trust_domain: "prod-cluster"
issuers:
  - type: txn_token
    issuer_url: "https://tokens.example.com"
"#;

    #[test]
    fn minimal_yaml_parses_with_defaults() {
        let config: Config = MINIMAL.parse().unwrap();

        assert_eq!(config.trust_domain, "prod-cluster");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.validators.len(), 1);
        assert_eq!(config.validators[0].name(), "corp-idp");
        assert_eq!(
            config.issuers[0].token_type(),
            crate::issuer::TXN_TOKEN_TYPE
        );
        assert_eq!(
            config.jwks.refresh_interval,
            Duration::from_secs(60)
        );
    }

    #[test]
    fn full_yaml_parses() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 9443
trust_domain: "prod-cluster"
validators:
  - type: jwt
    name: corp-idp
    issuer: "https://idp.example.com"
    jwks_url: "https://idp.example.com/keys"
    trust_domain: "prod-cluster"
    refresh_interval: 5m
  - type: json
    name: sidecar
    require_issuer: true
    trust_domain: "mesh"
    claims_filter:
      mode: allow
      claims: ["role", "team"]
  - type: mtls
    name: mesh-certs
    trust_domain: "mesh"
validator_policies:
  - 'actor.trust_domain == "mesh" || validator_name == "corp-idp"'
claims_filters:
  default:
    mode: deny
    claims: ["admin"]
  rules:
    - subject: "spiffe://mesh/gateway"
      filter:
        mode: passthrough
data_sources:
  - name: directory
    url: "http://directory.internal/v1/lookup"
    timeout: 10s
    cache:
      ttl: 1h
      key_paths: ["subject.subject", "subject.trust_domain"]
  - name: entitlements
    url: "http://entitlements.internal/v1/check"
    cache:
      ttl: 5m
      distributed: true
issuers:
  - type: txn_token
    issuer_url: "https://tokens.example.com"
    ttl: 5m
    transaction_mappers:
      - type: subject
      - type: cel
        script: '{"groups": data.directory.groups}'
        data_sources: ["directory"]
    request_mappers:
      - type: request_attributes
  - type: unsigned
    token_type: "urn:example:token-type:unsigned"
    mappers:
      - type: static
        claims:
          env: prod
  - type: identity_envelope
    token_type: "urn:example:token-type:identity"
    mappers:
      - type: subject
exchange:
  default_token_type: "urn:ietf:params:oauth:token-type:txn_token"
authz:
  token_headers:
    - token_type: "urn:ietf:params:oauth:token-type:txn_token"
      header: "x-txn-token"
    - token_type: "urn:example:token-type:identity"
      header: "x-rh-identity"
jwks:
  refresh_interval: 30s
"#;
        let config: Config = yaml.parse().unwrap();

        assert_eq!(config.server.port, 9443);
        assert_eq!(config.validators.len(), 3);
        assert_eq!(config.validator_policies.len(), 1);
        assert_eq!(config.data_sources.len(), 2);
        assert!(config.data_sources[1].cache.as_ref().unwrap().distributed);
        assert_eq!(config.issuers.len(), 3);
        assert_eq!(config.authz.token_headers.len(), 2);
        assert_eq!(config.jwks.refresh_interval, Duration::from_secs(30));

        match &config.validators[0] {
            ValidatorConfig::Jwt {
                refresh_interval, ..
            } => assert_eq!(*refresh_interval, Duration::from_secs(300)),
            other => panic!("unexpected validator {other:?}"),
        }
    }

    #[test]
    fn missing_trust_domain_is_rejected() {
        let err = "validators: []".parse::<Config>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn authz_header_must_reference_a_known_issuer() {
        let yaml = r#"
trust_domain: "t"
issuers:
  - type: unsigned
    token_type: "urn:a"
authz:
  token_headers:
    - token_type: "urn:missing"
      header: "x-token"
"#;
        let err = yaml.parse::<Config>().unwrap_err();
        assert!(err.to_string().contains("urn:missing"));
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/config.yaml"))).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn load_reads_yaml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, MINIMAL).unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.trust_domain, "prod-cluster");
    }
}
