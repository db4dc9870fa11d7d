//! Claim mappers — pure functions from validated request state to
//! claims.
//!
//! Issuers run a configured chain of mappers over one [`MapperInput`]
//! and fold the outputs into a single claim set with a late-wins merge
//! on top-level keys. A mapper returning `None` contributes nothing; an
//! error aborts the fold.

pub mod cel;
pub mod request;
pub mod stub;
pub mod subject;

use async_trait::async_trait;

use crate::Result;
use crate::credential::{AttestedIdentity, Claims, RequestAttributes};
use crate::datasource::{DataSourceRegistry, FetchInput};

pub use cel::CelMapper;
pub use request::RequestAttributesMapper;
pub use stub::StaticMapper;
pub use subject::SubjectClaimsMapper;

/// Everything a mapper may consult.
///
/// The fetch input is pre-built from the subject, actor and request so
/// mappers that consult data sources don't reconstruct it per call.
pub struct MapperInput<'a> {
    /// The validated subject.
    pub subject: &'a AttestedIdentity,
    /// The validated actor, when one was presented.
    pub actor: Option<&'a AttestedIdentity>,
    /// Request attributes.
    pub request: &'a RequestAttributes,
    /// Data sources available for enrichment.
    pub data_sources: &'a DataSourceRegistry,
    /// Pre-built data source input for this issuance.
    pub fetch_input: &'a FetchInput,
}

/// Produces claims from the mapper input.
#[async_trait]
pub trait ClaimMapper: Send + Sync {
    /// Map input state to claims; `None` contributes nothing.
    async fn map(&self, input: &MapperInput<'_>) -> Result<Option<Claims>>;
}

/// Fold `from` into `into`, later keys winning at the top level.
pub fn merge_claims(into: &mut Claims, from: Claims) {
    for (key, value) in from {
        into.insert(key, value);
    }
}
