//! Projection of request attributes into claims.

use async_trait::async_trait;
use serde_json::json;

use super::{ClaimMapper, MapperInput, merge_claims};
use crate::Result;
use crate::credential::Claims;

/// Emits a normalized subset of the request fields plus anything in
/// `additional`.
///
/// Empty fields are omitted rather than emitted as `""`; `additional`
/// entries land at the top level and win over the normalized fields on
/// key collision.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestAttributesMapper;

#[async_trait]
impl ClaimMapper for RequestAttributesMapper {
    async fn map(&self, input: &MapperInput<'_>) -> Result<Option<Claims>> {
        let request = input.request;
        let mut claims = Claims::new();

        if !request.method.is_empty() {
            claims.insert("method".into(), json!(request.method));
        }
        if !request.path.is_empty() {
            claims.insert("path".into(), json!(request.path));
        }
        if !request.ip_address.is_empty() {
            claims.insert("ip_address".into(), json!(request.ip_address));
        }
        if !request.user_agent.is_empty() {
            claims.insert("user_agent".into(), json!(request.user_agent));
        }

        merge_claims(&mut claims, request.additional.clone());

        if claims.is_empty() {
            return Ok(None);
        }
        Ok(Some(claims))
    }
}
