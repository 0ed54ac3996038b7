//! The watch subsystem (§4.7): post-commit notification streams fed to
//! subscribers of a fixed key set.
//!
//! Grounded on `tokio::sync::mpsc` + `tokio_stream::wrappers::
//! UnboundedReceiverStream`, the same pairing the teacher's async surfaces
//! use elsewhere for fan-out; a tagged subscriber id (rather than a raw
//! sender held by the caller) avoids the use-after-free the cancel/fanout
//! race invites (§9 "Watch fanout vs cancellation race").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::error::CResult;
use crate::key::{self, Key};
use crate::storage::engine::Engine;
use crate::storage::txn::Store;
use crate::value::{Value, ValueSerializer};
use crate::versionstamp::now_ms;

/// The present-or-absent projection of one watched key in a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct EntryMaybe {
    pub key: Key,
    pub value: Option<Value>,
    pub versionstamp: Option<String>,
}

struct Subscriber {
    id: u64,
    keys: Vec<Key>,
    sender: mpsc::UnboundedSender<Vec<EntryMaybe>>,
}

/// Owns the subscriber set for one database handle. Lives as long as the
/// database (§3 "Ownership").
#[derive(Default)]
pub struct WatchSubsystem {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl WatchSubsystem {
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(Vec::new()), next_id: AtomicU64::new(0) }
    }

    /// Registers a subscriber for `keys`, immediately pushing one snapshot
    /// of current state (§4.7 "On subscription"). The returned
    /// [`WatchHandle`] removes the subscription on cancel or drop.
    pub fn subscribe<E: Engine>(
        self: &Arc<Self>,
        store: &Store<E>,
        keys: Vec<Key>,
    ) -> CResult<(UnboundedReceiverStream<Vec<EntryMaybe>>, WatchHandle)> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let snapshot = Self::snapshot(store, &keys)?;
        let _ = sender.send(snapshot);

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.subscribers.lock().unwrap().push(Subscriber { id, keys, sender });

        Ok((UnboundedReceiverStream::new(receiver), WatchHandle { subsystem: Arc::clone(self), id }))
    }

    fn snapshot<E: Engine>(store: &Store<E>, keys: &[Key]) -> CResult<Vec<EntryMaybe>> {
        store.with_read(|engine| {
            let now = now_ms();
            keys.iter()
                .map(|k| {
                    let encoded = key::encode(k);
                    Ok(match engine.get(&encoded, now)? {
                        Some(row) => EntryMaybe {
                            key: k.clone(),
                            value: Some(ValueSerializer::deserialize(&row.value)?),
                            versionstamp: Some(row.versionstamp),
                        },
                        None => EntryMaybe { key: k.clone(), value: None, versionstamp: None },
                    })
                })
                .collect()
        })
    }

    /// Pushes a fresh snapshot to every subscriber, whether or not their
    /// keys were touched by the write that triggered this call (§4.7: "the
    /// reference implementation does not filter"). Called once per
    /// successful committing write.
    pub fn notify<E: Engine>(&self, store: &Store<E>) {
        let subs: Vec<(Vec<Key>, mpsc::UnboundedSender<Vec<EntryMaybe>>)> = {
            let guard = self.subscribers.lock().unwrap();
            guard.iter().map(|s| (s.keys.clone(), s.sender.clone())).collect()
        };
        for (keys, sender) in subs {
            if let Ok(snapshot) = Self::snapshot(store, &keys) {
                let _ = sender.send(snapshot);
            }
        }
    }

    fn cancel(&self, id: u64) {
        self.subscribers.lock().unwrap().retain(|s| s.id != id);
    }

    /// Drops every subscriber, terminating their streams (§4.7 "On database
    /// close, every subscriber's sequence terminates cleanly").
    pub fn close(&self) {
        self.subscribers.lock().unwrap().clear();
    }
}

/// A subscription handle. `cancel` is idempotent: calling it after the
/// subscription was already removed (by an earlier cancel, or by
/// [`WatchSubsystem::close`]) is simply a no-op retain over an already
/// absent id.
pub struct WatchHandle {
    subsystem: Arc<WatchSubsystem>,
    id: u64,
}

impl WatchHandle {
    pub fn cancel(&self) {
        self.subsystem.cancel(self.id);
    }
}

impl Drop for WatchHandle {
    fn drop(&mut self) {
        self.subsystem.cancel(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::KeyPart;
    use crate::storage::engine::Row;
    use crate::storage::memory::Memory;
    use tokio_stream::StreamExt;

    fn text_key(s: &str) -> Key {
        vec![KeyPart::Text(s.into())]
    }

    #[tokio::test]
    async fn subscribe_emits_one_snapshot_immediately() {
        let store = Store::new(Memory::new());
        let watch = Arc::new(WatchSubsystem::new());
        let (mut stream, _handle) = watch.subscribe(&store, vec![text_key("a")]).unwrap();
        let snapshot = stream.next().await.unwrap();
        assert_eq!(snapshot, vec![EntryMaybe { key: text_key("a"), value: None, versionstamp: None }]);
    }

    #[tokio::test]
    async fn commit_delivers_a_snapshot_to_every_subscriber_regardless_of_keys_touched() {
        let store = Store::new(Memory::new());
        let watch = Arc::new(WatchSubsystem::new());
        let (mut stream, _handle) = watch.subscribe(&store, vec![text_key("unrelated")]).unwrap();
        let _ = stream.next().await.unwrap(); // the immediate snapshot

        store
            .with_transaction(|e| {
                e.set(
                    &key::encode(&text_key("a")),
                    Row { value: b"1".to_vec(), versionstamp: "00000000000000000001".into(), expires_at: None },
                )
            })
            .unwrap();
        watch.notify(&store);

        let snapshot = stream.next().await.unwrap();
        assert_eq!(snapshot, vec![EntryMaybe { key: text_key("unrelated"), value: None, versionstamp: None }]);
    }

    #[tokio::test]
    async fn cancel_removes_the_subscriber_so_later_commits_are_not_delivered() {
        let store = Store::new(Memory::new());
        let watch = Arc::new(WatchSubsystem::new());
        let (mut stream, handle) = watch.subscribe(&store, vec![text_key("a")]).unwrap();
        let _ = stream.next().await.unwrap();

        handle.cancel();
        handle.cancel(); // idempotent

        watch.notify(&store);
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn close_terminates_every_subscriber_stream() {
        let store = Store::new(Memory::new());
        let watch = Arc::new(WatchSubsystem::new());
        let (mut a, _ha) = watch.subscribe(&store, vec![text_key("a")]).unwrap();
        let (mut b, _hb) = watch.subscribe(&store, vec![text_key("b")]).unwrap();
        let _ = a.next().await.unwrap();
        let _ = b.next().await.unwrap();

        watch.close();

        assert!(a.next().await.is_none());
        assert!(b.next().await.is_none());
    }
}
