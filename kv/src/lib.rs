#![allow(non_camel_case_types)]

//! `kvdb` is an embedded, transactional, ordered key-value store with
//! composite structured keys, monotonic versionstamps, optimistic
//! concurrency control, change-notification watch streams, per-entry TTL
//! expiration, and a pluggable schema validation layer.
//!
//! Values are written to an append-only log file (the [`storage::log_cask`]
//! engine) with an in-memory mapping of keys to file positions; an
//! in-process [`storage::memory`] engine is also available for tests and
//! ephemeral use. All live keys must fit in memory. Deletes write a
//! tombstone; `Database::<LogCask>::compact` rewrites the log with only
//! live, non-expired rows.
//!
//! ## Getting started
//!
//! ```rust,no_run
//! use kvdb::db::{Database, OpenOptions, SetOptions};
//! use kvdb::key::KeyPart;
//! use kvdb::value::Value;
//!
//! fn main() -> kvdb::error::CResult<()> {
//!     let db = Database::open("./kvdb-data", OpenOptions::default())?;
//!
//!     let key = vec![KeyPart::Text("users".into()), KeyPart::Text("ada".into())];
//!     db.set(key.clone(), Value::Json(serde_json::json!({"name": "Ada"})), SetOptions::default())?;
//!
//!     let entry = db.get(&key)?;
//!     assert!(entry.value.is_some());
//!
//!     db.close()?;
//!     Ok(())
//! }
//! ```

pub mod atomic;
pub mod db;
pub mod encoding;
pub mod error;
pub mod key;
pub mod list;
pub mod row;
pub mod schema;
pub mod storage;
pub mod validator;
pub mod value;
pub mod versionstamp;
pub mod watch;
