//! Validator eligibility policy.
//!
//! A policy decides, per `(actor, validator-name, request)`, whether a
//! subject-credential validator may be used for this request. The
//! canonical implementation compiles a boolean CEL expression with three
//! bindings:
//!
//! - `actor` — the actor's attested identity as a map (nested claims
//!   reachable via dotted paths, e.g. `actor.claims.role`),
//! - `validator_name` — the name under evaluation,
//! - `request` — the request attributes as a map.
//!
//! Policies run once per (validator, request) pair, so the conversion of
//! actor and request into maps happens once per request
//! ([`PolicyInput`]) and is reused across the name iteration.

use std::sync::Arc;

use cel_interpreter::{Context, Program, Value};

use crate::credential::{AttestedIdentity, RequestAttributes};
use crate::{Error, Result};

/// Variables a policy expression may reference.
const POLICY_BINDINGS: &[&str] = &["actor", "validator_name", "request"];

/// Pre-converted evaluation input, built once per request.
///
/// The identity and request attributes go through a canonical
/// JSON round-trip so the expression sees plain maps — nested claim
/// values, numeric widening and missing-key absence behave the same for
/// every credential family.
#[derive(Debug, Clone)]
pub struct PolicyInput {
    /// Actor identity as a JSON value.
    pub actor: serde_json::Value,
    /// Request attributes as a JSON value.
    pub request: serde_json::Value,
}

impl PolicyInput {
    /// Convert an actor and request into reusable policy bindings.
    pub fn new(actor: &AttestedIdentity, request: &RequestAttributes) -> Result<Self> {
        Ok(Self {
            actor: serde_json::to_value(actor)?,
            request: serde_json::to_value(request)?,
        })
    }
}

/// Decides which validators are eligible for a given actor and request.
pub trait ValidatorPolicy: Send + Sync {
    /// Whether `validator_name` may validate subjects for this input.
    ///
    /// # Errors
    ///
    /// Evaluation failures (as opposed to a `false` verdict) surface as
    /// errors so callers can distinguish "denied" from "broken".
    fn is_allowed(&self, input: &PolicyInput, validator_name: &str) -> Result<bool>;
}

/// A compiled CEL policy expression.
pub struct CelPolicy {
    program: Program,
    source: String,
}

impl CelPolicy {
    /// Compile a policy expression.
    ///
    /// Empty scripts, syntax errors, and references to variables other
    /// than `actor`, `validator_name` and `request` all fail here, at
    /// construction — not at request time.
    pub fn compile(source: &str) -> Result<Self> {
        if source.trim().is_empty() {
            return Err(Error::ScriptInvalid("empty policy expression".into()));
        }

        let program = Program::compile(source)
            .map_err(|e| Error::ScriptInvalid(format!("policy expression: {e}")))?;

        for variable in program.references().variables() {
            if !POLICY_BINDINGS.iter().any(|binding| *binding == variable) {
                return Err(Error::ScriptInvalid(format!(
                    "policy expression references undefined variable '{variable}'"
                )));
            }
        }

        Ok(Self {
            program,
            source: source.to_string(),
        })
    }

    /// The expression source, for logs and error context.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }
}

impl ValidatorPolicy for CelPolicy {
    fn is_allowed(&self, input: &PolicyInput, validator_name: &str) -> Result<bool> {
        let mut context = Context::default();
        context
            .add_variable("actor", &input.actor)
            .map_err(|e| Error::Internal(format!("policy binding 'actor': {e}")))?;
        context
            .add_variable("request", &input.request)
            .map_err(|e| Error::Internal(format!("policy binding 'request': {e}")))?;
        context
            .add_variable("validator_name", validator_name)
            .map_err(|e| Error::Internal(format!("policy binding 'validator_name': {e}")))?;

        match self.program.execute(&context) {
            // Non-boolean results are a quiet "no", not an error.
            Ok(Value::Bool(verdict)) => Ok(verdict),
            Ok(_) => Ok(false),
            Err(e) => Err(Error::Internal(format!(
                "policy '{}' evaluation failed: {e}",
                self.source
            ))),
        }
    }
}

impl std::fmt::Debug for CelPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CelPolicy")
            .field("source", &self.source)
            .finish()
    }
}

/// OR-composition over sub-policies.
///
/// The first `true` wins. All-`false` yields `false`. When *every*
/// sub-policy errors, the aggregate error surfaces; partial errors are
/// tolerated as long as one sub-policy produced a verdict.
pub struct AnyPolicy {
    policies: Vec<Arc<dyn ValidatorPolicy>>,
}

impl AnyPolicy {
    /// Compose `policies` under OR semantics.
    #[must_use]
    pub fn new(policies: Vec<Arc<dyn ValidatorPolicy>>) -> Self {
        Self { policies }
    }
}

impl ValidatorPolicy for AnyPolicy {
    fn is_allowed(&self, input: &PolicyInput, validator_name: &str) -> Result<bool> {
        let mut errors = Vec::new();

        for policy in &self.policies {
            match policy.is_allowed(input, validator_name) {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(e) => errors.push(e),
            }
        }

        if !self.policies.is_empty() && errors.len() == self.policies.len() {
            let combined = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::Internal(format!(
                "all {} policy filters failed: {combined}",
                errors.len()
            )));
        }

        Ok(false)
    }
}
