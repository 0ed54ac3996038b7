//! The atomic engine (§4.6): multi-key optimistic commits, combining a set
//! of versionstamp checks with set/delete/arithmetic mutations into one
//! all-or-nothing store transaction.

use crate::error::{CResult, Error};
use crate::key::{self, Key, MAX_KEY_SIZE_WRITE};
use crate::schema::SchemaRegistry;
use crate::storage::engine::{Engine, Row};
use crate::storage::txn::Store;
use crate::validator::Validator;
use crate::value::{KvU64, Value, ValueSerializer};
use crate::versionstamp::{is_valid_versionstamp, VersionstampAuthority};

const MAX_CHECKS: usize = 100;
const MAX_MUTATIONS: usize = 1000;
const MAX_CHECK_KEY_BYTES: usize = 81_920;
const MAX_MUTATION_BYTES: usize = 819_200;
/// `sum`/`min`/`max` mutations count as this many bytes of value regardless
/// of the operand's actual encoded size (§4.6 budgets).
const ARITHMETIC_MUTATION_BYTES: usize = 8;

#[derive(Clone)]
struct Check {
    key: Key,
    versionstamp: Option<String>,
}

#[derive(Clone)]
enum MutationKind {
    Set { value: Value, expire_in_ms: Option<i64> },
    Delete,
    Sum(KvU64),
    Min(KvU64),
    Max(KvU64),
}

#[derive(Clone)]
struct Mutation {
    key: Key,
    kind: MutationKind,
}

/// A mutation's computed effect, staged before any writes happen so a
/// later mutation in the same commit can observe an earlier one on the
/// same key without re-reading the pre-transaction engine state.
enum PendingOp {
    Set(Vec<u8>, Row),
    Delete(Vec<u8>),
}

/// The outcome of [`AtomicBuilder::commit`]: `ok: false` only on a failed
/// check (§4.6 "Returns"). Every other failure mode is a raised `Error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicOutcome {
    pub ok: bool,
    pub versionstamp: Option<String>,
}

/// Accumulates checks and mutations, then commits them as one transaction.
/// Built fresh by `Database::atomic()` (one builder per commit attempt).
pub struct AtomicBuilder<'a, E: Engine> {
    store: &'a Store<E>,
    registry: Option<&'a SchemaRegistry>,
    notify: Box<dyn Fn() + 'a>,
    checks: Vec<Check>,
    mutations: Vec<Mutation>,
}

impl<'a, E: Engine> AtomicBuilder<'a, E> {
    pub fn new(store: &'a Store<E>, registry: Option<&'a SchemaRegistry>, notify: impl Fn() + 'a) -> Self {
        Self { store, registry, notify: Box::new(notify), checks: Vec::new(), mutations: Vec::new() }
    }

    /// Adds a check that `key`'s current versionstamp equals `versionstamp`
    /// (or that the key is absent, when `versionstamp` is `None`).
    pub fn check(mut self, key: Key, versionstamp: Option<String>) -> CResult<Self> {
        key::validate_key(&key, false, false, MAX_KEY_SIZE_WRITE)?;
        if let Some(vs) = &versionstamp {
            if !is_valid_versionstamp(vs) {
                return Err(Error::InvalidMutation(format!("malformed versionstamp {:?}", vs)));
            }
        }
        self.checks.push(Check { key, versionstamp });
        Ok(self)
    }

    pub fn set(mut self, key: Key, value: Value, expire_in_ms: Option<i64>) -> CResult<Self> {
        key::validate_key(&key, false, false, MAX_KEY_SIZE_WRITE)?;
        self.mutations.push(Mutation { key, kind: MutationKind::Set { value, expire_in_ms } });
        Ok(self)
    }

    pub fn delete(mut self, key: Key) -> CResult<Self> {
        key::validate_key(&key, false, false, MAX_KEY_SIZE_WRITE)?;
        self.mutations.push(Mutation { key, kind: MutationKind::Delete });
        Ok(self)
    }

    pub fn sum(mut self, key: Key, operand: KvU64) -> CResult<Self> {
        key::validate_key(&key, false, false, MAX_KEY_SIZE_WRITE)?;
        self.mutations.push(Mutation { key, kind: MutationKind::Sum(operand) });
        Ok(self)
    }

    pub fn min(mut self, key: Key, operand: KvU64) -> CResult<Self> {
        key::validate_key(&key, false, false, MAX_KEY_SIZE_WRITE)?;
        self.mutations.push(Mutation { key, kind: MutationKind::Min(operand) });
        Ok(self)
    }

    pub fn max(mut self, key: Key, operand: KvU64) -> CResult<Self> {
        key::validate_key(&key, false, false, MAX_KEY_SIZE_WRITE)?;
        self.mutations.push(Mutation { key, kind: MutationKind::Max(operand) });
        Ok(self)
    }

    fn check_budgets(&self) -> CResult<()> {
        if self.checks.len() > MAX_CHECKS {
            return Err(Error::InvalidMutation(format!("at most {} checks are allowed per commit", MAX_CHECKS)));
        }
        if self.mutations.len() > MAX_MUTATIONS {
            return Err(Error::InvalidMutation(format!("at most {} mutations are allowed per commit", MAX_MUTATIONS)));
        }
        let check_key_bytes: usize = self.checks.iter().map(|c| key::encode(&c.key).len()).sum::<usize>()
            + self.mutations.iter().map(|m| key::encode(&m.key).len()).sum::<usize>();
        if check_key_bytes > MAX_CHECK_KEY_BYTES {
            return Err(Error::InvalidMutation(format!(
                "sum of key sizes {} exceeds the limit of {} bytes",
                check_key_bytes, MAX_CHECK_KEY_BYTES
            )));
        }
        let mut mutation_bytes = 0usize;
        for m in &self.mutations {
            mutation_bytes += match &m.kind {
                MutationKind::Set { value, .. } => ValueSerializer::serialize(value)?.len(),
                MutationKind::Delete => 0,
                MutationKind::Sum(_) | MutationKind::Min(_) | MutationKind::Max(_) => ARITHMETIC_MUTATION_BYTES,
            };
        }
        if mutation_bytes > MAX_MUTATION_BYTES {
            return Err(Error::InvalidMutation(format!(
                "sum of mutation sizes {} exceeds the limit of {} bytes",
                mutation_bytes, MAX_MUTATION_BYTES
            )));
        }
        Ok(())
    }

    /// Runs the five-step commit protocol (§4.6). Retried as a whole,
    /// including re-validation, on store contention by
    /// [`Store::with_transaction`].
    pub fn commit(&mut self) -> CResult<AtomicOutcome> {
        self.check_budgets()?;

        let checks = self.checks.clone();
        let mutations = self.mutations.clone();
        let registry = self.registry;
        let now = crate::versionstamp::now_ms();

        // Step 1: pre-commit validation of every `set` mutation's value,
        // done before the store transaction opens so schema validation
        // never runs while the engine mutex is held.
        let mut validated = Vec::with_capacity(mutations.len());
        for m in &mutations {
            match &m.kind {
                MutationKind::Set { value, expire_in_ms } => {
                    let v = Validator::validate(&m.key, value.clone(), registry)?;
                    validated.push(Mutation { key: m.key.clone(), kind: MutationKind::Set { value: v, expire_in_ms: *expire_in_ms } });
                }
                _ => validated.push(m.clone()),
            }
        }

        let outcome = self.store.with_transaction(move |engine| {
            // Step 2: a fresh versionstamp for this commit attempt.
            let versionstamp = VersionstampAuthority::next(engine)?;

            // Step 3a: checks, in declared order.
            for check in &checks {
                let encoded = key::encode(&check.key);
                let current_vs = engine.get(&encoded, now)?.map(|row| row.versionstamp);
                if current_vs != check.versionstamp {
                    return Ok(AtomicOutcome { ok: false, versionstamp: None });
                }
            }

            // Step 3b: compute every mutation's effect before writing any of
            // them, so a `TypeMismatch` on mutation N leaves mutations
            // 0..N-1 unapplied too (§4.6: "no mutations persisted"). An
            // overlay of already-computed ops lets a mutation observe an
            // earlier mutation on the same key in this same commit, instead
            // of always reading the pre-transaction engine state.
            let mut overlay: std::collections::HashMap<Vec<u8>, PendingOp> = std::collections::HashMap::new();
            let mut order = Vec::with_capacity(validated.len());
            for m in &validated {
                let encoded = key::encode(&m.key);
                let op = match &m.kind {
                    MutationKind::Set { value, expire_in_ms } => {
                        let bytes = ValueSerializer::serialize(value)?;
                        let expires_at = expire_in_ms.map(|ms| now + ms);
                        PendingOp::Set(encoded.clone(), Row { value: bytes, versionstamp: versionstamp.clone(), expires_at })
                    }
                    MutationKind::Delete => PendingOp::Delete(encoded.clone()),
                    MutationKind::Sum(operand) => {
                        let new_value = arithmetic(engine, &overlay, &encoded, now, *operand, |cur, op| KvU64(cur.0.wrapping_add(op.0)))?;
                        let bytes = ValueSerializer::serialize(&Value::U64(new_value))?;
                        PendingOp::Set(encoded.clone(), Row { value: bytes, versionstamp: versionstamp.clone(), expires_at: None })
                    }
                    MutationKind::Min(operand) => {
                        let new_value = arithmetic(engine, &overlay, &encoded, now, *operand, |cur, op| KvU64(cur.0.min(op.0)))?;
                        let bytes = ValueSerializer::serialize(&Value::U64(new_value))?;
                        PendingOp::Set(encoded.clone(), Row { value: bytes, versionstamp: versionstamp.clone(), expires_at: None })
                    }
                    MutationKind::Max(operand) => {
                        let new_value = arithmetic(engine, &overlay, &encoded, now, *operand, |cur, op| KvU64(cur.0.max(op.0)))?;
                        let bytes = ValueSerializer::serialize(&Value::U64(new_value))?;
                        PendingOp::Set(encoded.clone(), Row { value: bytes, versionstamp: versionstamp.clone(), expires_at: None })
                    }
                };
                order.push(encoded.clone());
                overlay.insert(encoded, op);
            }

            for key_bytes in order {
                match overlay.remove(&key_bytes) {
                    Some(PendingOp::Set(key_bytes, row)) => engine.set(&key_bytes, row)?,
                    Some(PendingOp::Delete(key_bytes)) => engine.delete(&key_bytes)?,
                    None => {}
                }
            }

            Ok(AtomicOutcome { ok: true, versionstamp: Some(versionstamp) })
        })?;

        if outcome.ok {
            (self.notify)();
        }
        Ok(outcome)
    }
}

/// Reads the current value at `key_bytes` (absent ⇒ `operand` per §4.6's
/// "initial value is operand if missing"), requiring it be a [`KvU64`].
/// Consults `overlay` first so a mutation observes an earlier mutation on
/// the same key within the same commit, before falling back to the
/// pre-transaction engine state.
fn arithmetic<E: Engine>(
    engine: &mut E,
    overlay: &std::collections::HashMap<Vec<u8>, PendingOp>,
    key_bytes: &[u8],
    now_ms: i64,
    operand: KvU64,
    combine: impl Fn(KvU64, KvU64) -> KvU64,
) -> CResult<KvU64> {
    let row = match overlay.get(key_bytes) {
        Some(PendingOp::Set(_, row)) => Some(row.clone()),
        Some(PendingOp::Delete(_)) => None,
        None => engine.get(key_bytes, now_ms)?,
    };
    match row {
        None => Ok(operand),
        Some(row) => {
            let current = ValueSerializer::deserialize(&row.value)?;
            let current = current
                .as_kv_u64()
                .ok_or_else(|| Error::TypeMismatch("arithmetic mutation over a non-KvU64 existing value".into()))?;
            Ok(combine(current, operand))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPart;
    use crate::storage::memory::Memory;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn text_key(s: &str) -> Key {
        vec![KeyPart::Text(s.into())]
    }

    #[test]
    fn declared_mutation_order_is_observed() {
        let store = Store::new(Memory::new());
        let noop = || {};
        let mut builder = AtomicBuilder::new(&store, None, noop);
        builder = builder
            .set(text_key("k"), Value::Json(json!("v1")), None)
            .unwrap()
            .delete(text_key("k"))
            .unwrap();
        let outcome = builder.commit().unwrap();
        assert!(outcome.ok);

        let encoded = key::encode(&text_key("k"));
        let row = store.with_read(|e| e.get(&encoded, 0)).unwrap();
        assert!(row.is_none());
    }

    #[test]
    fn sum_observes_a_set_on_the_same_key_earlier_in_the_same_commit() {
        let store = Store::new(Memory::new());
        let noop = || {};
        let outcome = AtomicBuilder::new(&store, None, noop)
            .set(text_key("k"), Value::U64(KvU64(5)), None)
            .unwrap()
            .sum(text_key("k"), KvU64(1))
            .unwrap()
            .commit()
            .unwrap();
        assert!(outcome.ok);

        let encoded = key::encode(&text_key("k"));
        let row = store.with_read(|e| e.get(&encoded, 0)).unwrap().unwrap();
        let value = ValueSerializer::deserialize(&row.value).unwrap();
        assert_eq!(value.as_kv_u64(), Some(KvU64(6)));
    }

    #[test]
    fn sum_with_no_existing_entry_yields_the_operand() {
        let store = Store::new(Memory::new());
        let noop = || {};
        let outcome = AtomicBuilder::new(&store, None, noop).sum(text_key("counter"), KvU64(10)).unwrap().commit().unwrap();
        assert!(outcome.ok);

        let encoded = key::encode(&text_key("counter"));
        let row = store.with_read(|e| e.get(&encoded, 0)).unwrap().unwrap();
        let value = ValueSerializer::deserialize(&row.value).unwrap();
        assert_eq!(value.as_kv_u64(), Some(KvU64(10)));
    }

    #[test]
    fn sum_wraps_on_overflow() {
        let store = Store::new(Memory::new());
        let noop = || {};
        AtomicBuilder::new(&store, None, noop).set(text_key("a"), Value::U64(KvU64(u64::MAX)), None).unwrap().commit().unwrap();
        let outcome = AtomicBuilder::new(&store, None, noop).sum(text_key("a"), KvU64(10)).unwrap().commit().unwrap();
        assert!(outcome.ok);

        let encoded = key::encode(&text_key("a"));
        let row = store.with_read(|e| e.get(&encoded, 0)).unwrap().unwrap();
        let value = ValueSerializer::deserialize(&row.value).unwrap();
        assert_eq!(value.as_kv_u64(), Some(KvU64(9)));
    }

    #[test]
    fn failed_check_reports_ok_false_and_applies_no_mutations() {
        let store = Store::new(Memory::new());
        let noop = || {};
        let vs = AtomicBuilder::new(&store, None, noop).set(text_key("t"), Value::Json(json!("1")), None).unwrap().commit().unwrap().versionstamp.unwrap();

        let second = AtomicBuilder::new(&store, None, noop)
            .check(text_key("t"), Some(vs.clone()))
            .unwrap()
            .set(text_key("t"), Value::Json(json!("2")), None)
            .unwrap()
            .commit()
            .unwrap();
        assert!(second.ok);

        let third = AtomicBuilder::new(&store, None, noop)
            .check(text_key("t"), Some(vs))
            .unwrap()
            .set(text_key("t"), Value::Json(json!("3")), None)
            .unwrap()
            .commit()
            .unwrap();
        assert!(!third.ok);
        assert!(third.versionstamp.is_none());

        let encoded = key::encode(&text_key("t"));
        let row = store.with_read(|e| e.get(&encoded, 0)).unwrap().unwrap();
        assert_eq!(ValueSerializer::deserialize(&row.value).unwrap(), Value::Json(json!("2")));
    }

    #[test]
    fn arithmetic_over_non_u64_value_raises_type_mismatch_and_persists_nothing() {
        let store = Store::new(Memory::new());
        let noop = || {};
        AtomicBuilder::new(&store, None, noop).set(text_key("x"), Value::Json(json!("not a number")), None).unwrap().commit().unwrap();
        AtomicBuilder::new(&store, None, noop).set(text_key("y"), Value::Json(json!("untouched")), None).unwrap().commit().unwrap();

        let err = AtomicBuilder::new(&store, None, noop)
            .set(text_key("y"), Value::Json(json!("should not persist")), None)
            .unwrap()
            .sum(text_key("x"), KvU64(1))
            .unwrap()
            .commit()
            .unwrap_err();
        assert!(matches!(err, Error::TypeMismatch(_)));

        let encoded = key::encode(&text_key("y"));
        let row = store.with_read(|e| e.get(&encoded, 0)).unwrap().unwrap();
        assert_eq!(ValueSerializer::deserialize(&row.value).unwrap(), Value::Json(json!("untouched")));
    }

    #[test]
    fn commit_invokes_notify_only_on_success() {
        let store = Store::new(Memory::new());
        let calls = AtomicUsize::new(0);
        let notify = || {
            calls.fetch_add(1, Ordering::SeqCst);
        };
        AtomicBuilder::new(&store, None, notify).set(text_key("a"), Value::Json(json!(1)), None).unwrap().commit().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let vs = "f".repeat(20);
        AtomicBuilder::new(&store, None, notify).check(text_key("a"), Some(vs)).unwrap().commit().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn too_many_checks_is_rejected_at_commit() {
        let store = Store::new(Memory::new());
        let noop = || {};
        let mut builder = AtomicBuilder::new(&store, None, noop);
        for i in 0..=MAX_CHECKS {
            builder = builder.check(text_key(&format!("k{}", i)), None).unwrap();
        }
        assert!(builder.commit().is_err());
    }
}
