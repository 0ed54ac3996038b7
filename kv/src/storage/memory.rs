//! A purely in-memory ordered store, kept structurally close to the
//! teacher's `BTreeMap`-backed `Memory` engine (`kv/src/storage/memory.rs`),
//! retargeted to store [`Row`]s and carry a separate persistent counter.

use std::collections::BTreeMap;

use crate::error::CResult;
use crate::storage::engine::Engine;
use crate::storage::{Row, Status};

pub struct Memory {
    data: BTreeMap<Vec<u8>, Row>,
    counter: u64,
}

impl Memory {
    pub fn new() -> Self {
        Self { data: BTreeMap::new(), counter: 0 }
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

fn is_live(row: &Row, now_ms: i64) -> bool {
    !matches!(row.expires_at, Some(exp) if exp <= now_ms)
}

impl Engine for Memory {
    fn get(&mut self, key: &[u8], now_ms: i64) -> CResult<Option<Row>> {
        Ok(self.data.get(key).filter(|r| is_live(r, now_ms)).cloned())
    }

    fn set(&mut self, key: &[u8], row: Row) -> CResult<()> {
        self.data.insert(key.to_vec(), row);
        Ok(())
    }

    fn delete(&mut self, key: &[u8]) -> CResult<()> {
        self.data.remove(key);
        Ok(())
    }

    fn range_scan(
        &mut self,
        start: &[u8],
        end: &[u8],
        exclude_key: Option<&[u8]>,
        now_ms: i64,
        limit: usize,
        reverse: bool,
    ) -> CResult<Vec<(Vec<u8>, Row)>> {
        let range = self.data.range(start.to_vec()..end.to_vec());
        let filtered = |k: &Vec<u8>, row: &Row| {
            is_live(row, now_ms) && exclude_key.map_or(true, |ex| ex != k.as_slice())
        };
        let mut out: Vec<(Vec<u8>, Row)> = if reverse {
            range.rev().filter(|(k, r)| filtered(k, r)).take(limit).map(|(k, r)| (k.clone(), r.clone())).collect()
        } else {
            range.filter(|(k, r)| filtered(k, r)).take(limit).map(|(k, r)| (k.clone(), r.clone())).collect()
        };
        out.shrink_to_fit();
        Ok(out)
    }

    fn cleanup(&mut self, now_ms: i64) -> CResult<()> {
        self.data.retain(|_, row| is_live(row, now_ms));
        Ok(())
    }

    fn clear(&mut self) -> CResult<()> {
        self.data.clear();
        Ok(())
    }

    fn destroy(&mut self) -> CResult<()> {
        self.data.clear();
        self.counter = 0;
        Ok(())
    }

    fn status(&mut self) -> CResult<Status> {
        Ok(Status {
            name: "memory".into(),
            keys: self.data.len() as u64,
            size: self.data.iter().fold(0, |size, (k, r)| size + k.len() as u64 + r.value.len() as u64),
            total_disk_size: 0,
            live_disk_size: 0,
            garbage_disk_size: 0,
        })
    }

    fn get_counter(&mut self) -> CResult<u64> {
        Ok(self.counter)
    }

    fn set_counter(&mut self, value: u64) -> CResult<()> {
        self.counter = value;
        Ok(())
    }
}
