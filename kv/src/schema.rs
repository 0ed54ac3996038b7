//! The schema registry (§4.4): pattern registration, wildcard matching, and
//! exact-over-wildcard lookup precedence.

use crate::error::{CResult, Error};
use crate::key::KeyPart;
use crate::validator::Schema;

/// A [`crate::key::Key`] in which any part may be the reserved wildcard
/// text `"*"`. A pattern with no wildcards is "exact".
pub type SchemaPattern = Vec<KeyPart>;

fn is_exact(pattern: &SchemaPattern) -> bool {
    !pattern.iter().any(|p| p.is_wildcard())
}

fn structurally_equal(a: &SchemaPattern, b: &SchemaPattern) -> bool {
    a == b
}

/// A key `K` matches a pattern `P` iff `|K| = |P|` and, for each position,
/// either `P[i] = "*"` or `P[i]` equals `K[i]` by value.
pub fn matches(pattern: &SchemaPattern, key: &[KeyPart]) -> bool {
    pattern.len() == key.len() && pattern.iter().zip(key.iter()).all(|(p, k)| p.is_wildcard() || p == k)
}

/// An insertion-ordered list of `(pattern, schema)` entries, filled only
/// through [`SchemaRegistryBuilder`]; once a database is open it is
/// immutable and lives as long as the database (§3 "Lifecycle").
pub struct SchemaRegistry {
    entries: Vec<(SchemaPattern, Box<dyn Schema>)>,
}

impl SchemaRegistry {
    /// Exact-beats-wildcard lookup (§4.4): first scan all wildcard-free
    /// patterns, then all patterns containing at least one wildcard.
    pub fn lookup(&self, key: &[KeyPart]) -> Option<&dyn Schema> {
        self.entries
            .iter()
            .filter(|(p, _)| is_exact(p))
            .find(|(p, _)| matches(p, key))
            .or_else(|| self.entries.iter().filter(|(p, _)| !is_exact(p)).find(|(p, _)| matches(p, key)))
            .map(|(_, schema)| schema.as_ref())
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Builder for a [`SchemaRegistry`]; the only way to populate one (§3).
#[derive(Default)]
pub struct SchemaRegistryBuilder {
    entries: Vec<(SchemaPattern, Box<dyn Schema>)>,
}

impl SchemaRegistryBuilder {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    /// Registers `(pattern, schema)`. Rejects a `pattern` that is
    /// structurally equal to an already-registered one.
    pub fn register(mut self, pattern: SchemaPattern, schema: impl Schema + 'static) -> CResult<Self> {
        if self.entries.iter().any(|(p, _)| structurally_equal(p, &pattern)) {
            return Err(Error::InvalidMutation(format!("duplicate schema pattern {:?}", pattern)));
        }
        self.entries.push((pattern, Box::new(schema)));
        Ok(self)
    }

    pub fn build(self) -> SchemaRegistry {
        SchemaRegistry { entries: self.entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::WILDCARD;
    use crate::validator::{NoIssues, ValidateResult};
    use crate::value::Value;

    fn text(s: &str) -> KeyPart {
        KeyPart::Text(s.to_string())
    }

    /// A schema that always rejects, used to tell apart which of two
    /// matching patterns actually won a lookup.
    struct RejectAll;
    impl Schema for RejectAll {
        fn validate(&self, value: &Value) -> CResult<ValidateResult> {
            Ok(ValidateResult::issues(value.clone(), vec![crate::error::Issue::new("rejected")]))
        }
    }

    #[test]
    fn exact_pattern_beats_wildcard_regardless_of_registration_order() {
        let registry = SchemaRegistryBuilder::new()
            .register(vec![text("users"), text(WILDCARD)], RejectAll)
            .unwrap()
            .register(vec![text("users"), text("bob")], NoIssues)
            .unwrap()
            .build();
        // both match; exact must win even though the wildcard pattern was
        // registered first. If the wildcard's `RejectAll` schema won
        // instead, validating any value here would come back with issues.
        let schema = registry.lookup(&[text("users"), text("bob")]).unwrap();
        let value = Value::Json(serde_json::json!("anything"));
        let result = schema.validate(&value).unwrap();
        assert!(result.issues.is_empty());
    }

    #[test]
    fn duplicate_pattern_registration_is_rejected() {
        let result = SchemaRegistryBuilder::new()
            .register(vec![text("a")], NoIssues)
            .unwrap()
            .register(vec![text("a")], NoIssues);
        assert!(result.is_err());
    }

    #[test]
    fn wildcard_matches_any_part_type() {
        let pattern = vec![text(WILDCARD)];
        assert!(matches(&pattern, &[text("anything")]));
        assert!(matches(&pattern, &[KeyPart::Int(5)]));
        assert!(matches(&pattern, &[KeyPart::Bool(true)]));
    }

    #[test]
    fn wildcard_does_not_match_different_length_keys() {
        let pattern = vec![text(WILDCARD)];
        assert!(!matches(&pattern, &[text("a"), text("b")]));
        assert!(!matches(&pattern, &[]));
    }
}
