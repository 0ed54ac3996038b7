//! The top-level database handle (§4.8): lifecycle, point operations, list,
//! watch, atomic commits, and bulk load.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::atomic::AtomicBuilder;
use crate::error::{CResult, Error};
use crate::key::{self, Key, MAX_KEY_SIZE_READ};
use crate::list::{ListIter, ListOptions, Selector};
use crate::schema::SchemaRegistry;
use crate::storage::engine::{Engine, Status};
use crate::storage::log_cask::LogCask;
use crate::storage::memory::Memory;
use crate::storage::txn::Store;
use crate::validator::Validator;
use crate::value::{Value, ValueSerializer};
use crate::versionstamp::now_ms;
use crate::watch::{EntryMaybe, WatchHandle, WatchSubsystem};

/// `getMany` accepts at most this many keys (§4.8).
const MAX_GET_MANY_KEYS: usize = 10;
/// `from`/`fromAsync` batch items into transactions of up to this size (§4.8).
const MAX_BULK_BATCH: usize = 1000;

#[derive(Default)]
pub struct OpenOptions {
    /// If set, `close()` destroys the store instead of merely closing it.
    pub destroy_on_close: bool,
    pub schema_registry: Option<SchemaRegistry>,
}

#[derive(Default, Clone, Copy)]
pub struct SetOptions {
    pub expire_in_ms: Option<i64>,
}

/// How `from`/`fromAsync` should react to a per-item failure (§4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OnError {
    Stop,
    Continue,
}

pub struct BulkLoadOptions<'a> {
    pub prefix: Key,
    pub on_error: OnError,
    /// Extracts the trailing key part for one item.
    pub extract: &'a dyn Fn(&serde_json::Value) -> CResult<crate::key::KeyPart>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkLoadReport {
    pub loaded: usize,
    pub skipped: usize,
}

/// The embedded store's top-level handle, generic over the pluggable
/// [`Engine`] (§4.2). Owns the ordered store, the schema registry, and the
/// watch subscriber set for as long as it lives (§3 "Ownership").
pub struct Database<E: Engine> {
    store: Store<E>,
    registry: Option<SchemaRegistry>,
    watch: Arc<WatchSubsystem>,
    destroy_on_close: bool,
    closed: AtomicBool,
}

impl<E: Engine> Database<E> {
    fn from_store(store: Store<E>, opts: OpenOptions) -> CResult<Self> {
        store.with_transaction(|e| e.cleanup(now_ms()))?;
        Ok(Self {
            store,
            registry: opts.schema_registry,
            watch: Arc::new(WatchSubsystem::new()),
            destroy_on_close: opts.destroy_on_close,
            closed: AtomicBool::new(false),
        })
    }

    fn ensure_open(&self) -> CResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    pub fn status(&self) -> CResult<Status> {
        self.ensure_open()?;
        self.store.with_read(|e| e.status())
    }

    pub fn close(&self) -> CResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.destroy_on_close {
            self.store.with_transaction(|e| e.destroy())?;
        }
        self.watch.close();
        Ok(())
    }

    pub fn destroy(&self) -> CResult<()> {
        self.ensure_open()?;
        self.store.with_transaction(|e| e.destroy())?;
        self.watch.notify(&self.store);
        Ok(())
    }

    pub fn clear(&self) -> CResult<()> {
        self.ensure_open()?;
        self.store.with_transaction(|e| e.clear())?;
        self.watch.notify(&self.store);
        Ok(())
    }

    pub fn get(&self, key: &Key) -> CResult<EntryMaybe> {
        self.ensure_open()?;
        key::validate_key(key, false, false, MAX_KEY_SIZE_READ)?;
        let encoded = key::encode(key);
        let now = now_ms();
        let row = self.store.with_read(|e| e.get(&encoded, now))?;
        Ok(match row {
            Some(row) => EntryMaybe {
                key: key.clone(),
                value: Some(ValueSerializer::deserialize(&row.value)?),
                versionstamp: Some(row.versionstamp),
            },
            None => EntryMaybe { key: key.clone(), value: None, versionstamp: None },
        })
    }

    pub fn get_many(&self, keys: &[Key]) -> CResult<Vec<EntryMaybe>> {
        self.ensure_open()?;
        if keys.len() > MAX_GET_MANY_KEYS {
            return Err(Error::InvalidKey(format!("getMany accepts at most {} keys", MAX_GET_MANY_KEYS)));
        }
        keys.iter().map(|k| self.get(k)).collect()
    }

    pub fn set(&self, key: Key, value: Value, opts: SetOptions) -> CResult<String> {
        self.ensure_open()?;
        let outcome = self.atomic()?.set(key, value, opts.expire_in_ms)?.commit()?;
        Ok(outcome.versionstamp.expect("an unconditional set always succeeds"))
    }

    pub fn delete(&self, key: Key) -> CResult<()> {
        self.ensure_open()?;
        self.atomic()?.delete(key)?.commit()?;
        Ok(())
    }

    pub fn list(&self, selector: Selector, opts: ListOptions) -> CResult<ListIter<'_, E>> {
        self.ensure_open()?;
        ListIter::new(&self.store, selector, opts)
    }

    pub fn watch(&self, keys: Vec<Key>) -> CResult<(UnboundedReceiverStream<Vec<EntryMaybe>>, WatchHandle)> {
        self.ensure_open()?;
        self.watch.subscribe(&self.store, keys)
    }

    pub fn atomic(&self) -> CResult<AtomicBuilder<'_, E>> {
        self.ensure_open()?;
        let watch = Arc::clone(&self.watch);
        let store_ref = &self.store;
        Ok(AtomicBuilder::new(store_ref, self.registry.as_ref(), move || watch.notify(store_ref)))
    }

    /// Bulk-loads `items`, grouping them into transactions of up to
    /// [`MAX_BULK_BATCH`] and deriving each key as `opts.prefix ++
    /// [extract(item)]` (§4.8). On any fatal failure (an error with
    /// `opts.on_error = Stop`, or any error that escapes validation) the
    /// database is closed before the error is returned — the only API
    /// surface that auto-closes.
    pub fn from_iter<I>(&self, items: I, opts: BulkLoadOptions<'_>) -> CResult<BulkLoadReport>
    where
        I: IntoIterator<Item = serde_json::Value>,
    {
        self.ensure_open()?;
        let mut report = BulkLoadReport::default();
        let mut batch: Vec<serde_json::Value> = Vec::with_capacity(MAX_BULK_BATCH.min(64));

        let mut items = items.into_iter().peekable();
        while items.peek().is_some() {
            batch.clear();
            batch.extend(items.by_ref().take(MAX_BULK_BATCH));

            if let Err(e) = self.load_batch(&batch, &opts, &mut report) {
                let _ = self.close();
                return Err(e);
            }
        }
        Ok(report)
    }

    fn load_batch(&self, batch: &[serde_json::Value], opts: &BulkLoadOptions<'_>, report: &mut BulkLoadReport) -> CResult<()> {
        let mut builder = self.atomic()?;
        for item in batch {
            match (opts.extract)(item) {
                Ok(part) => {
                    let mut key = opts.prefix.clone();
                    key.push(part);
                    let value = Validator::validate(&key, Value::Json(item.clone()), self.registry.as_ref())?;
                    builder = builder.set(key, value, None)?;
                    report.loaded += 1;
                }
                Err(e) => match opts.on_error {
                    OnError::Stop => return Err(e),
                    OnError::Continue => report.skipped += 1,
                },
            }
        }
        builder.commit()?;
        Ok(())
    }
}

impl Database<Memory> {
    pub fn open_in_memory(opts: OpenOptions) -> CResult<Self> {
        Self::from_store(Store::new(Memory::new()), opts)
    }
}

impl Database<LogCask> {
    /// Opens (or creates) a durable store at `path`.
    pub fn open(path: impl AsRef<Path>, opts: OpenOptions) -> CResult<Self> {
        let engine = LogCask::new(path.as_ref().to_path_buf())?;
        let store = Store::new_with_lock_path(engine, path.as_ref());
        Self::from_store(store, opts)
    }

    /// Compacts the on-disk log, dropping tombstones and expired rows.
    pub fn compact(&self) -> CResult<()> {
        self.ensure_open()?;
        self.store.with_transaction(|e| e.compact())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPart;
    use serde_json::json;

    fn text_key(s: &str) -> Key {
        vec![KeyPart::Text(s.into())]
    }

    #[test]
    fn s1_set_get_set_delete_round_trip() {
        let db = Database::open_in_memory(OpenOptions::default()).unwrap();
        let v1 = db.set(text_key("a"), Value::Json(json!("b")), SetOptions::default()).unwrap();
        let entry = db.get(&text_key("a")).unwrap();
        assert_eq!(entry.value, Some(Value::Json(json!("b"))));
        assert_eq!(entry.versionstamp, Some(v1.clone()));

        let v2 = db.set(text_key("a"), Value::Json(json!("c")), SetOptions::default()).unwrap();
        assert!(v2 > v1);

        db.delete(text_key("a")).unwrap();
        let entry = db.get(&text_key("a")).unwrap();
        assert_eq!(entry.value, None);
        assert_eq!(entry.versionstamp, None);
    }

    #[test]
    fn s4_compare_and_set_via_atomic_check() {
        let db = Database::open_in_memory(OpenOptions::default()).unwrap();
        let v1 = db.set(text_key("t"), Value::Json(json!("1")), SetOptions::default()).unwrap();

        let outcome =
            db.atomic().unwrap().check(text_key("t"), Some(v1.clone())).unwrap().set(text_key("t"), Value::Json(json!("2")), None).unwrap().commit().unwrap();
        assert!(outcome.ok);
        let v2 = outcome.versionstamp.unwrap();
        assert!(v2 > v1);

        let second =
            db.atomic().unwrap().check(text_key("t"), Some(v1)).unwrap().set(text_key("t"), Value::Json(json!("3")), None).unwrap().commit().unwrap();
        assert!(!second.ok);
        assert_eq!(db.get(&text_key("t")).unwrap().value, Some(Value::Json(json!("2"))));
    }

    #[test]
    fn get_many_rejects_more_than_ten_keys() {
        let db = Database::open_in_memory(OpenOptions::default()).unwrap();
        let keys: Vec<Key> = (0..11).map(|i| text_key(&format!("k{}", i))).collect();
        assert!(db.get_many(&keys).is_err());
    }

    #[test]
    fn closed_database_rejects_further_operations() {
        let db = Database::open_in_memory(OpenOptions::default()).unwrap();
        db.close().unwrap();
        assert!(matches!(db.get(&text_key("a")), Err(Error::Closed)));
        assert!(matches!(db.set(text_key("a"), Value::Json(json!(1)), SetOptions::default()), Err(Error::Closed)));
    }

    #[test]
    fn close_is_idempotent() {
        let db = Database::open_in_memory(OpenOptions::default()).unwrap();
        db.close().unwrap();
        db.close().unwrap();
    }

    #[test]
    fn destroy_on_close_clears_the_store() {
        let mut opts = OpenOptions::default();
        opts.destroy_on_close = true;
        let db = Database::open_in_memory(opts).unwrap();
        db.set(text_key("a"), Value::Json(json!(1)), SetOptions::default()).unwrap();
        db.close().unwrap();
        assert_eq!(db.store.with_read(|e| e.status()).unwrap().keys, 0);
    }

    #[test]
    fn bulk_load_derives_keys_from_prefix_and_extracted_part() {
        let db = Database::open_in_memory(OpenOptions::default()).unwrap();
        let items = vec![json!({"id": "a", "n": 1}), json!({"id": "b", "n": 2})];
        let extract = |item: &serde_json::Value| -> CResult<KeyPart> {
            Ok(KeyPart::Text(item.get("id").and_then(|v| v.as_str()).unwrap().to_string()))
        };
        let opts = BulkLoadOptions { prefix: vec![KeyPart::Text("items".into())], on_error: OnError::Stop, extract: &extract };
        let report = db.from_iter(items, opts).unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(db.get(&vec![KeyPart::Text("items".into()), KeyPart::Text("a".into())]).unwrap().value, Some(Value::Json(json!({"id": "a", "n": 1}))));
    }

    #[test]
    fn bulk_load_on_error_continue_skips_bad_items_but_loads_the_rest() {
        let db = Database::open_in_memory(OpenOptions::default()).unwrap();
        let items = vec![json!({"id": "a"}), json!({"no_id": true}), json!({"id": "c"})];
        let extract = |item: &serde_json::Value| -> CResult<KeyPart> {
            item.get("id")
                .and_then(|v| v.as_str())
                .map(|s| KeyPart::Text(s.to_string()))
                .ok_or_else(|| Error::InvalidKey("missing id".into()))
        };
        let opts = BulkLoadOptions { prefix: vec![KeyPart::Text("items".into())], on_error: OnError::Continue, extract: &extract };
        let report = db.from_iter(items, opts).unwrap();
        assert_eq!(report.loaded, 2);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn bulk_load_on_error_stop_closes_the_database() {
        let db = Database::open_in_memory(OpenOptions::default()).unwrap();
        let items = vec![json!({"no_id": true})];
        let extract = |item: &serde_json::Value| -> CResult<KeyPart> {
            item.get("id")
                .and_then(|v| v.as_str())
                .map(|s| KeyPart::Text(s.to_string()))
                .ok_or_else(|| Error::InvalidKey("missing id".into()))
        };
        let opts = BulkLoadOptions { prefix: vec![KeyPart::Text("items".into())], on_error: OnError::Stop, extract: &extract };
        assert!(db.from_iter(items, opts).is_err());
        assert!(matches!(db.get(&text_key("anything")), Err(Error::Closed)));
    }
}
