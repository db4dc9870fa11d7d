//! Service assembly and the HTTP server loop.
//!
//! [`Service::build`] turns a [`Config`] into the full wiring:
//! validators, trust store, policy filters, data sources (wrapped per
//! their cache config), issuers, registries, endpoints, JWKS publisher
//! and health registry. Invalid scripts, duplicate names and broken key
//! material all fail here, before the server ever binds.

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::authz::AuthzEndpoint;
use crate::claims::ClaimsFilterRegistry;
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, DataSourceConfig, IssuerConfig, MapperConfig, ValidatorConfig};
use crate::credential::AttestedIdentity;
use crate::datasource::http::{HttpCacheConfig, HttpDataSourceConfig};
use crate::datasource::{
    CachedDataSource, DataSource, DataSourceRegistry, GroupCachedDataSource, HttpDataSource,
    LocalCacheGroup,
};
use crate::exchange::ExchangeEndpoint;
use crate::health::{HealthRegistry, ServingStatus};
use crate::issuer::jwt::TxnTokenIssuerConfig;
use crate::issuer::{
    IdentityEnvelopeIssuer, IssuerRegistry, RotatingSigner, StaticEd25519Signer, TxnTokenIssuer,
    UnsignedIssuer,
};
use crate::jwks::JwksPublisher;
use crate::mapper::{
    CelMapper, ClaimMapper, RequestAttributesMapper, StaticMapper, SubjectClaimsMapper,
};
use crate::observe::TracingObserver;
use crate::service::TokenService;
use crate::trust::{AnyPolicy, CelPolicy, TrustStore, ValidatorPolicy};
use crate::validator::json::JsonValidatorConfig;
use crate::validator::jwt::JwtValidatorConfig;
use crate::validator::mtls::MtlsValidatorConfig;
use crate::validator::{
    JsonValidator, JwtValidator, MtlsValidator, StaticValidator, Validator,
};
use crate::{Error, Result};

/// Interval between sweeps of expired in-memory cache entries.
const CACHE_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// The assembled service, ready to run.
#[derive(Debug)]
pub struct Service {
    bind_address: String,
    router: Router,
    health: Arc<HealthRegistry>,
    background: Vec<JoinHandle<()>>,
}

impl Service {
    /// Wire everything up from configuration.
    pub async fn build(config: Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;

        // Trust store.
        let mut store_builder = TrustStore::builder();
        for validator_config in &config.validators {
            let name = validator_config.name().to_string();
            let validator =
                build_validator(validator_config, http.clone(), Arc::clone(&clock)).await?;
            store_builder = store_builder.validator(name, validator);
        }
        if let Some(policy) = build_policy(&config.validator_policies)? {
            store_builder = store_builder.policy(policy);
        }
        let trust_store = store_builder.build()?;

        // Data sources, wrapped per their cache configuration.
        let mut data_sources = DataSourceRegistry::new();
        let mut background = Vec::new();
        for source_config in &config.data_sources {
            let (source, cleanup) = build_data_source(source_config, Arc::clone(&clock))?;
            data_sources.register(source)?;
            background.extend(cleanup);
        }
        let data_sources = Arc::new(data_sources);

        // Issuers.
        let mut issuers = IssuerRegistry::new();
        for issuer_config in &config.issuers {
            let token_type = issuer_config.token_type().to_string();
            let issuer = build_issuer(issuer_config, Arc::clone(&clock))?;
            issuers.register(token_type, issuer)?;
        }
        let issuers = Arc::new(issuers);

        let token_service = Arc::new(
            TokenService::new(
                config.trust_domain.clone(),
                Arc::clone(&issuers),
                Arc::clone(&data_sources),
            )
            .with_observer(Arc::new(TracingObserver)),
        );

        let claims_filters = Arc::new(ClaimsFilterRegistry::new(
            config.claims_filters.rules.clone(),
            config.claims_filters.default.clone(),
        ));

        // Endpoints.
        let exchange = Arc::new(ExchangeEndpoint::new(
            trust_store.clone(),
            Arc::clone(&token_service),
            claims_filters,
            config.exchange.default_token_type.clone(),
        ));
        let authz = Arc::new(AuthzEndpoint::new(
            trust_store,
            Arc::clone(&token_service),
            config.authz.token_headers.clone(),
        ));

        // JWKS: populate eagerly, refresh in the background. An initial
        // failure only warns — the next tick or request retries.
        let jwks = Arc::new(JwksPublisher::new(
            Arc::clone(&issuers),
            config.jwks.refresh_interval,
        ));
        if let Err(e) = jwks.refresh().await {
            warn!(error = %e, "initial JWKS refresh failed");
        }
        background.push(jwks.spawn_refresh());

        let health = Arc::new(HealthRegistry::new());
        health.register("exchange");
        health.register("authz-check");
        health.register("jwks");

        let router = Router::new()
            .merge(crate::exchange::routes(exchange))
            .merge(crate::authz::routes(authz))
            .merge(crate::jwks::routes(jwks))
            .merge(crate::health::routes(Arc::clone(&health)))
            .layer(TraceLayer::new_for_http());

        Ok(Self {
            bind_address: format!("{}:{}", config.server.host, config.server.port),
            router,
            health,
            background,
        })
    }

    /// The assembled router (tests drive it without binding a socket).
    #[must_use]
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind, mark services serving, and run until shutdown.
    pub async fn run(mut self) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.bind_address).await?;
        info!(address = %self.bind_address, "transaction token service listening");

        self.health.set_all(ServingStatus::Serving);

        let health = Arc::clone(&self.health);
        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                info!("shutdown signal received, draining");
                health.set_all(ServingStatus::NotServing);
            })
            .await?;

        for task in self.background.drain(..) {
            task.abort();
        }
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

async fn build_validator(
    config: &ValidatorConfig,
    http: reqwest::Client,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn Validator>> {
    let validator: Arc<dyn Validator> = match config {
        ValidatorConfig::Jwt {
            issuer,
            jwks_url,
            trust_domain,
            refresh_interval,
            ..
        } => Arc::new(
            JwtValidator::new(
                JwtValidatorConfig {
                    issuer: issuer.clone(),
                    jwks_url: jwks_url.clone(),
                    trust_domain: trust_domain.clone(),
                    refresh_interval: *refresh_interval,
                },
                http,
                clock,
            )
            .await?,
        ),
        ValidatorConfig::Json {
            require_issuer,
            trust_domain,
            claims_filter,
            ..
        } => Arc::new(JsonValidator::new(JsonValidatorConfig {
            require_issuer: *require_issuer,
            trust_domain: trust_domain.clone(),
            claims_filter: claims_filter.clone(),
        })),
        ValidatorConfig::Mtls {
            trust_domain,
            require_issuer_identity,
            ..
        } => Arc::new(MtlsValidator::new(
            MtlsValidatorConfig {
                trust_domain: trust_domain.clone(),
                require_issuer_identity: require_issuer_identity.clone(),
            },
            clock,
        )),
        ValidatorConfig::Static {
            kinds, identity, ..
        } => Arc::new(StaticValidator::attesting(
            kinds.clone(),
            AttestedIdentity {
                subject: identity.subject.clone(),
                issuer: identity.issuer.clone(),
                trust_domain: identity.trust_domain.clone(),
                claims: identity.claims.clone(),
                ..AttestedIdentity::default()
            },
        )),
    };
    Ok(validator)
}

fn build_policy(scripts: &[String]) -> Result<Option<Arc<dyn ValidatorPolicy>>> {
    let mut policies: Vec<Arc<dyn ValidatorPolicy>> = Vec::with_capacity(scripts.len());
    for script in scripts {
        policies.push(Arc::new(CelPolicy::compile(script)?));
    }

    Ok(match policies.len() {
        0 => None,
        1 => policies.pop(),
        _ => Some(Arc::new(AnyPolicy::new(policies))),
    })
}

/// Build one data source with its cache wrapper and, for in-process
/// caches, the periodic cleanup task.
fn build_data_source(
    config: &DataSourceConfig,
    clock: Arc<dyn Clock>,
) -> Result<(Arc<dyn DataSource>, Option<JoinHandle<()>>)> {
    let source: Arc<dyn DataSource> = Arc::new(HttpDataSource::new(HttpDataSourceConfig {
        name: config.name.clone(),
        url: config.url.clone(),
        timeout: config.timeout,
        cache: config.cache.as_ref().map(|cache| HttpCacheConfig {
            ttl: cache.ttl,
            key_paths: cache.key_paths.clone(),
        }),
    })?);

    let Some(cache) = &config.cache else {
        return Ok((source, None));
    };

    if cache.distributed {
        let wrapped = GroupCachedDataSource::new(source, clock, |loader| {
            Arc::new(LocalCacheGroup::new(loader))
        })?;
        return Ok((Arc::new(wrapped), None));
    }

    let cached = Arc::new(CachedDataSource::new(source, clock)?);
    let sweeper = Arc::clone(&cached);
    let cleanup = tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_CLEANUP_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            sweeper.cleanup();
        }
    });
    Ok((cached, Some(cleanup)))
}

fn build_mappers(configs: &[MapperConfig]) -> Result<Vec<Arc<dyn ClaimMapper>>> {
    configs
        .iter()
        .map(|config| {
            let mapper: Arc<dyn ClaimMapper> = match config {
                MapperConfig::Subject => Arc::new(SubjectClaimsMapper),
                MapperConfig::RequestAttributes => Arc::new(RequestAttributesMapper),
                MapperConfig::Cel {
                    script,
                    data_sources,
                } => Arc::new(CelMapper::compile(script, data_sources.clone())?),
                MapperConfig::Static { claims } => Arc::new(StaticMapper::new(claims.clone())),
            };
            Ok(mapper)
        })
        .collect()
}

fn build_issuer(
    config: &IssuerConfig,
    clock: Arc<dyn Clock>,
) -> Result<Arc<dyn crate::issuer::Issuer>> {
    let issuer: Arc<dyn crate::issuer::Issuer> = match config {
        IssuerConfig::TxnToken {
            issuer_url,
            ttl,
            signing_key_file,
            transaction_mappers,
            request_mappers,
            ..
        } => {
            let signer: Arc<dyn RotatingSigner> = match signing_key_file {
                Some(path) => {
                    let pem = std::fs::read_to_string(path).map_err(|e| {
                        Error::Config(format!("signing key file {path}: {e}"))
                    })?;
                    Arc::new(StaticEd25519Signer::from_pem(&pem)?)
                }
                None => {
                    info!("no signing key configured, generating an ephemeral Ed25519 key");
                    Arc::new(StaticEd25519Signer::generate()?)
                }
            };
            Arc::new(TxnTokenIssuer::new(
                TxnTokenIssuerConfig {
                    issuer_url: issuer_url.clone(),
                    ttl: *ttl,
                },
                build_mappers(transaction_mappers)?,
                build_mappers(request_mappers)?,
                signer,
                clock,
            ))
        }
        IssuerConfig::Unsigned {
            token_type,
            mappers,
        } => Arc::new(UnsignedIssuer::new(
            token_type.clone(),
            build_mappers(mappers)?,
            clock,
        )),
        IssuerConfig::IdentityEnvelope {
            token_type,
            mappers,
        } => Arc::new(IdentityEnvelopeIssuer::new(
            token_type.clone(),
            build_mappers(mappers)?,
            clock,
        )),
    };
    Ok(issuer)
}
