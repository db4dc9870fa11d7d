//! Passthrough of the subject's attested claims.

use async_trait::async_trait;

use super::{ClaimMapper, MapperInput};
use crate::Result;
use crate::credential::Claims;

/// Emits the subject's claims unchanged.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubjectClaimsMapper;

#[async_trait]
impl ClaimMapper for SubjectClaimsMapper {
    async fn map(&self, input: &MapperInput<'_>) -> Result<Option<Claims>> {
        if input.subject.claims.is_empty() {
            return Ok(None);
        }
        Ok(Some(input.subject.claims.clone()))
    }
}
