//! Expression-language claim mapper.
//!
//! A CEL expression projects the validated request state into a claim
//! map. Four bindings are in scope:
//!
//! - `subject`, `actor`, `request` — the same map conversions the
//!   policy filter uses,
//! - `data.<name>` — the payload of each data source declared for this
//!   mapper, fetched *before* evaluation (JSON payloads are parsed,
//!   anything else is bound as a base64 string, a no-contribution fetch
//!   binds `null`).
//!
//! The expression must evaluate to a map; `null` contributes nothing.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use async_trait::async_trait;
use cel_interpreter::objects::Key;
use cel_interpreter::{Context, Program, Value};
use serde_json::json;

use super::{ClaimMapper, MapperInput};
use crate::credential::Claims;
use crate::{Error, Result};

/// Variables a mapper expression may reference.
const MAPPER_BINDINGS: &[&str] = &["subject", "actor", "request", "data"];

/// A compiled CEL claim-mapping expression.
pub struct CelMapper {
    program: Program,
    source: String,
    data_source_names: Vec<String>,
}

impl CelMapper {
    /// Compile a mapper expression.
    ///
    /// `data_source_names` lists the sources fetched before every
    /// evaluation and bound under `data`. Compilation rejects empty
    /// scripts, syntax errors and undefined variables.
    pub fn compile(source: &str, data_source_names: Vec<String>) -> Result<Self> {
        if source.trim().is_empty() {
            return Err(Error::ScriptInvalid("empty mapper expression".into()));
        }

        let program = Program::compile(source)
            .map_err(|e| Error::ScriptInvalid(format!("mapper expression: {e}")))?;

        for variable in program.references().variables() {
            if !MAPPER_BINDINGS.iter().any(|binding| *binding == variable) {
                return Err(Error::ScriptInvalid(format!(
                    "mapper expression references undefined variable '{variable}'"
                )));
            }
        }

        Ok(Self {
            program,
            source: source.to_string(),
            data_source_names,
        })
    }
}

#[async_trait]
impl ClaimMapper for CelMapper {
    async fn map(&self, input: &MapperInput<'_>) -> Result<Option<Claims>> {
        let mut data = serde_json::Map::new();
        for name in &self.data_source_names {
            let source = input.data_sources.get(name)?;
            let value = match source.fetch(input.fetch_input).await? {
                Some(result) if result.content_type.contains("json") => {
                    serde_json::from_slice(&result.data)
                        .map_err(|e| Error::Json(e).for_data_source(name))?
                }
                Some(result) => json!(STANDARD.encode(&result.data)),
                None => serde_json::Value::Null,
            };
            data.insert(name.clone(), value);
        }

        let mut context = Context::default();
        context
            .add_variable("subject", serde_json::to_value(input.subject)?)
            .map_err(|e| Error::Internal(format!("mapper binding 'subject': {e}")))?;
        let actor = match input.actor {
            Some(actor) => serde_json::to_value(actor)?,
            None => serde_json::Value::Null,
        };
        context
            .add_variable("actor", actor)
            .map_err(|e| Error::Internal(format!("mapper binding 'actor': {e}")))?;
        context
            .add_variable("request", serde_json::to_value(input.request)?)
            .map_err(|e| Error::Internal(format!("mapper binding 'request': {e}")))?;
        context
            .add_variable("data", serde_json::Value::Object(data))
            .map_err(|e| Error::Internal(format!("mapper binding 'data': {e}")))?;

        let value = self.program.execute(&context).map_err(|e| {
            Error::Internal(format!("mapper '{}' evaluation failed: {e}", self.source))
        })?;

        match cel_to_json(&value)? {
            serde_json::Value::Null => Ok(None),
            serde_json::Value::Object(claims) => {
                if claims.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(claims))
                }
            }
            other => Err(Error::Internal(format!(
                "mapper '{}' must evaluate to a map, got {other}",
                self.source
            ))),
        }
    }
}

impl std::fmt::Debug for CelMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CelMapper")
            .field("source", &self.source)
            .field("data_sources", &self.data_source_names)
            .finish()
    }
}

/// Convert a CEL evaluation result into a JSON value.
fn cel_to_json(value: &Value) -> Result<serde_json::Value> {
    let converted = match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::UInt(u) => json!(u),
        Value::Float(f) => json!(f),
        Value::String(s) => json!(s.as_str()),
        Value::Bytes(b) => json!(STANDARD.encode(b.as_slice())),
        Value::List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(cel_to_json)
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Map(map) => {
            let mut object = serde_json::Map::new();
            for (key, item) in map.map.iter() {
                object.insert(key_to_string(key), cel_to_json(item)?);
            }
            serde_json::Value::Object(object)
        }
        Value::Timestamp(t) => json!(t.to_rfc3339()),
        Value::Duration(d) => json!(format!("{}s", d.num_seconds())),
        other => {
            return Err(Error::Internal(format!(
                "unsupported CEL result {other:?}"
            )));
        }
    };
    Ok(converted)
}

fn key_to_string(key: &Key) -> String {
    match key {
        Key::String(s) => s.as_str().to_string(),
        Key::Int(i) => i.to_string(),
        Key::Uint(u) => u.to_string(),
        Key::Bool(b) => b.to_string(),
    }
}
