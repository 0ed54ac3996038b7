//! List / iteration (§4.9): selectors, batched range scans, and cursors.

use std::collections::VecDeque;

use crate::error::{CResult, Error};
use crate::key::{self, Key};
use crate::storage::engine::{prefix_upper_bound, Engine, Row};
use crate::storage::txn::Store;
use crate::value::{Value, ValueSerializer};
use crate::versionstamp::now_ms;

const DEFAULT_BATCH_SIZE: usize = 500;
const MAX_BATCH_SIZE: usize = 1000;
/// Upper sentinel bound for the empty-prefix special case (§4.9): above
/// every encoded key, since no valid tag byte exceeds `0x05`.
const SENTINEL_UPPER_BOUND: [u8; 3] = [0xff, 0xff, 0xff];

/// One decoded, materialized result of a list scan.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry {
    pub key: Key,
    pub value: Value,
    pub versionstamp: String,
    pub expires_at: Option<i64>,
}

/// The four legal bound combinations (§4.9 "Selectors"). Any other shape is
/// rejected at the call site before a `Selector` is even constructed.
#[derive(Debug, Clone)]
pub enum Selector {
    Prefix { prefix: Key },
    PrefixStart { prefix: Key, start: Key },
    PrefixEnd { prefix: Key, end: Key },
    Range { start: Key, end: Key },
}

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub limit: Option<usize>,
    pub batch_size: usize,
    pub reverse: bool,
    pub cursor: Option<String>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self { limit: None, batch_size: DEFAULT_BATCH_SIZE, reverse: false, cursor: None }
    }
}

fn clamp_batch_size(n: usize) -> usize {
    n.clamp(1, MAX_BATCH_SIZE)
}

/// Computes `(start, end, exclude_key, prefix_bytes)` for a selector.
/// `prefix_bytes` is carried separately from `start`/`end` because a cursor
/// resumes relative to the prefix, not to whichever bound happens to start
/// at the prefix's bytes (§4.9's `{prefix, end}` case passes `start =
/// prefix`, so `start` alone cannot be used to reconstruct the prefix).
fn compute_bounds(selector: &Selector) -> CResult<(Vec<u8>, Vec<u8>, Option<Vec<u8>>, Option<Vec<u8>>)> {
    match selector {
        Selector::Prefix { prefix } => {
            if prefix.is_empty() {
                Ok((Vec::new(), SENTINEL_UPPER_BOUND.to_vec(), None, None))
            } else {
                let prefix_bytes = key::encode(prefix);
                let end = prefix_upper_bound(&prefix_bytes).unwrap_or_else(|| SENTINEL_UPPER_BOUND.to_vec());
                Ok((prefix_bytes.clone(), end, Some(prefix_bytes.clone()), Some(prefix_bytes)))
            }
        }
        Selector::PrefixStart { prefix, start } => {
            let prefix_bytes = key::encode(prefix);
            let start_bytes = key::encode(start);
            if !start_bytes.starts_with(&prefix_bytes[..]) {
                return Err(Error::InvalidSelector("start must fall within the prefix's keyspace".into()));
            }
            let end = prefix_upper_bound(&prefix_bytes).unwrap_or_else(|| SENTINEL_UPPER_BOUND.to_vec());
            Ok((start_bytes, end, Some(prefix_bytes.clone()), Some(prefix_bytes)))
        }
        Selector::PrefixEnd { prefix, end } => {
            let prefix_bytes = key::encode(prefix);
            let end_bytes = key::encode(end);
            if !end_bytes.starts_with(&prefix_bytes[..]) {
                return Err(Error::InvalidSelector("end must fall within the prefix's keyspace".into()));
            }
            // §9 open question: the reference passes `start = prefix` here;
            // `exclude_key` is what suppresses the prefix anchor row.
            Ok((prefix_bytes.clone(), end_bytes, Some(prefix_bytes.clone()), Some(prefix_bytes)))
        }
        Selector::Range { start, end } => {
            let start_bytes = key::encode(start);
            let end_bytes = key::encode(end);
            if start_bytes > end_bytes {
                return Err(Error::InvalidSelector("start must not be greater than end".into()));
            }
            Ok((start_bytes, end_bytes, None, None))
        }
    }
}

fn advance_past(key_bytes: &[u8]) -> Vec<u8> {
    let mut v = key_bytes.to_vec();
    v.push(0x00);
    v
}

fn decode_entry(key_bytes: Vec<u8>, row: Row) -> CResult<Entry> {
    let key = key::decode(&key_bytes)?;
    let value = ValueSerializer::deserialize(&row.value)?;
    Ok(Entry { key, value, versionstamp: row.versionstamp, expires_at: row.expires_at })
}

/// A restartable finite producer of [`Entry`]s (§9 "Lazy list iterator"):
/// suspension happens once per batch fetch, not per entry.
pub struct ListIter<'a, E: Engine> {
    store: &'a Store<E>,
    start: Vec<u8>,
    end: Vec<u8>,
    exclude_key: Option<Vec<u8>>,
    reverse: bool,
    batch_size: usize,
    remaining_limit: Option<usize>,
    buffer: VecDeque<(Vec<u8>, Row)>,
    exhausted: bool,
    last_key_bytes: Option<Vec<u8>>,
}

impl<'a, E: Engine> ListIter<'a, E> {
    pub fn new(store: &'a Store<E>, selector: Selector, opts: ListOptions) -> CResult<Self> {
        let (mut start, mut end, exclude_key, prefix_bytes) = compute_bounds(&selector)?;

        if let Some(cursor) = &opts.cursor {
            let part = key::decode_cursor(cursor)?;
            let part_bytes = key::encode_part(&part);
            let mut resume_bytes = prefix_bytes.clone().unwrap_or_default();
            resume_bytes.extend_from_slice(&part_bytes);
            if opts.reverse {
                end = resume_bytes;
            } else {
                start = advance_past(&resume_bytes);
            }
        }

        Ok(Self {
            store,
            start,
            end,
            exclude_key,
            reverse: opts.reverse,
            batch_size: clamp_batch_size(opts.batch_size),
            remaining_limit: opts.limit,
            buffer: VecDeque::new(),
            exhausted: false,
            last_key_bytes: None,
        })
    }

    /// The resumption token for a later `list` call picking up strictly
    /// after (or before, reversed) the last entry yielded so far (§4.9
    /// "Cursor").
    pub fn cursor(&self) -> CResult<Option<String>> {
        match &self.last_key_bytes {
            None => Ok(None),
            Some(bytes) => {
                let key = key::decode(bytes)?;
                let last_part = key.last().ok_or_else(|| Error::DecodeError("empty key has no cursor part".into()))?;
                Ok(Some(key::encode_cursor(last_part)))
            }
        }
    }

    fn fetch_next_batch(&mut self) -> CResult<()> {
        if self.exhausted {
            return Ok(());
        }
        let this_batch = match self.remaining_limit {
            Some(0) => {
                self.exhausted = true;
                return Ok(());
            }
            Some(n) => self.batch_size.min(n),
            None => self.batch_size,
        };

        let rows = self.store.with_read(|engine| {
            engine.range_scan(&self.start, &self.end, self.exclude_key.as_deref(), now_ms(), this_batch, self.reverse)
        })?;

        if rows.len() < this_batch {
            self.exhausted = true;
        }
        if let Some(n) = &mut self.remaining_limit {
            *n -= rows.len();
        }
        if let Some((last_key, _)) = rows.last() {
            if self.reverse {
                self.end = last_key.clone();
            } else {
                self.start = advance_past(last_key);
            }
        }
        self.buffer.extend(rows);
        Ok(())
    }
}

impl<'a, E: Engine> Iterator for ListIter<'a, E> {
    type Item = CResult<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && !self.exhausted {
            if let Err(e) = self.fetch_next_batch() {
                return Some(Err(e));
            }
        }
        let (key_bytes, row) = self.buffer.pop_front()?;
        self.last_key_bytes = Some(key_bytes.clone());
        Some(decode_entry(key_bytes, row))
    }
}
