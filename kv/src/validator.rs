//! The validator (§4.5): applies a registered schema's Standard-Schema-like
//! `{value, issues?}` contract to a value being written.

use crate::error::{CResult, Error, Issue};
use crate::key::Key;
use crate::schema::SchemaRegistry;
use crate::value::Value;

/// The outcome of running a schema: either the (possibly transformed)
/// value with no issues, or the original value plus a non-empty issue list.
pub struct ValidateResult {
    pub value: Value,
    pub issues: Vec<Issue>,
}

impl ValidateResult {
    pub fn ok(value: Value) -> Self {
        Self { value, issues: Vec::new() }
    }

    pub fn issues(value: Value, issues: Vec<Issue>) -> Self {
        Self { value, issues }
    }
}

/// A user-supplied schema, registered against a [`crate::schema::SchemaPattern`].
/// Synchronous only: the commit protocol (§4.6 step 1) awaits validation
/// before opening the store transaction, so an async schema can be adapted
/// by blocking on its future at the call site without holding any store
/// lock (§9 "Validator composability").
pub trait Schema: Send + Sync {
    fn validate(&self, value: &Value) -> CResult<ValidateResult>;
}

/// A schema that accepts every value unchanged. Useful as a registry
/// placeholder in tests that only exercise pattern lookup, not validation.
pub struct NoIssues;

impl Schema for NoIssues {
    fn validate(&self, value: &Value) -> CResult<ValidateResult> {
        Ok(ValidateResult::ok(value.clone()))
    }
}

pub struct Validator;

impl Validator {
    /// If there is no registry, or the registry yields no schema for
    /// `key`, returns `value` unchanged. Otherwise runs the schema: a
    /// non-empty issue list, or an `Err` from the schema itself, raises
    /// [`Error::Validation`]; an error is wrapped as a single issue.
    pub fn validate(key: &Key, value: Value, registry: Option<&SchemaRegistry>) -> CResult<Value> {
        let Some(registry) = registry else {
            return Ok(value);
        };
        let Some(schema) = registry.lookup(key) else {
            return Ok(value);
        };

        let outcome = match schema.validate(&value) {
            Ok(outcome) => outcome,
            Err(e) => ValidateResult::issues(value, vec![Issue::new(e.to_string())]),
        };

        if outcome.issues.is_empty() {
            Ok(outcome.value)
        } else {
            Err(Error::Validation { key: format!("{:?}", key), issues: outcome.issues })
        }
    }
}
