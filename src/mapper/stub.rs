//! Fixed-claims mapper.

use async_trait::async_trait;

use super::{ClaimMapper, MapperInput};
use crate::Result;
use crate::credential::Claims;

/// Emits a fixed claim set regardless of input.
///
/// Configured for deployment-wide constants (environment labels, tenant
/// ids); also the simplest mapper for tests.
#[derive(Debug, Clone, Default)]
pub struct StaticMapper {
    claims: Claims,
}

impl StaticMapper {
    /// Mapper that always emits `claims`.
    #[must_use]
    pub fn new(claims: Claims) -> Self {
        Self { claims }
    }
}

#[async_trait]
impl ClaimMapper for StaticMapper {
    async fn map(&self, _input: &MapperInput<'_>) -> Result<Option<Claims>> {
        if self.claims.is_empty() {
            return Ok(None);
        }
        Ok(Some(self.claims.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{AttestedIdentity, RequestAttributes};
    use crate::datasource::{DataSourceRegistry, FetchInput};
    use serde_json::json;

    #[tokio::test]
    async fn emits_fixed_claims() {
        let mut claims = Claims::new();
        claims.insert("env".into(), json!("prod"));
        let mapper = StaticMapper::new(claims);

        let subject = AttestedIdentity::default();
        let request = RequestAttributes::default();
        let registry = DataSourceRegistry::new();
        let fetch_input = FetchInput::default();

        let mapped = mapper
            .map(&MapperInput {
                subject: &subject,
                actor: None,
                request: &request,
                data_sources: &registry,
                fetch_input: &fetch_input,
            })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mapped["env"], json!("prod"));
    }

    #[tokio::test]
    async fn empty_claims_contribute_nothing() {
        let mapper = StaticMapper::default();
        let subject = AttestedIdentity::default();
        let request = RequestAttributes::default();
        let registry = DataSourceRegistry::new();
        let fetch_input = FetchInput::default();

        assert!(
            mapper
                .map(&MapperInput {
                    subject: &subject,
                    actor: None,
                    request: &request,
                    data_sources: &registry,
                    fetch_input: &fetch_input,
                })
                .await
                .unwrap()
                .is_none()
        );
    }
}
